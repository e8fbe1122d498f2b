//! Types exchanged with the attendance contract, live or mocked.

use crate::chain::error::{AddressError, AttendanceFailure};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 20-byte wallet address.
///
/// Parsing is case-insensitive; display is always lowercase `0x`-prefixed hex,
/// which is also the canonical form used for storage keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Shortened form for logs: `0x1234…abcd`.
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("0x{}…{}", &full[..4], &full[36..])
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AddressError(s.to_string()))?;

        if digits.len() != 40 {
            return Err(AddressError(s.to_string()));
        }

        let bytes = hex::decode(digits).map_err(|_| AddressError(s.to_string()))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| AddressError(s.to_string()))?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Name and student number attached to a registered wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub name: String,
    pub student_id: String,
}

/// Registration record as returned by `getStudentInfo`.
///
/// Unknown addresses come back with `is_registered == false` and empty fields,
/// matching the contract's zero-value storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub address: Address,
    pub name: String,
    pub student_id: String,
    pub is_registered: bool,
}

impl StudentRecord {
    pub fn unregistered(address: Address) -> Self {
        Self {
            address,
            name: String::new(),
            student_id: String::new(),
            is_registered: false,
        }
    }

    pub fn info(&self) -> Option<StudentInfo> {
        self.is_registered.then(|| StudentInfo {
            name: self.name.clone(),
            student_id: self.student_id.clone(),
        })
    }
}

/// Course metadata. Times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: u64,
    pub name: String,
    pub start_time: u64,
    pub end_time: u64,
    pub teacher: Address,
    pub is_active: bool,
}

impl Course {
    pub fn accepts_attendance_at(&self, now: u64) -> bool {
        now >= self.start_time && now <= self.end_time
    }
}

/// One attendance entry; at most one exists per (student, course).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_address: Address,
    pub course_id: u64,
    pub timestamp: u64,
}

/// Confirmation of a state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub success: bool,
}

/// A student that could not be marked present inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAttendance {
    pub student: Address,
    pub reason: AttendanceFailure,
}

/// Successful/failed split returned by batch attendance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPartition {
    pub successful: Vec<Address>,
    pub failed: Vec<FailedAttendance>,
}

impl BatchPartition {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_is_case_insensitive() {
        let mixed: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
        let lower: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();
        assert_eq!(mixed, lower);
        assert_eq!(
            mixed.to_string(),
            "0x70997970c51812dc3a010c7d01b50e0d17dc79c8"
        );
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!("70997970c51812dc3a010c7d01b50e0d17dc79c8".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz997970c51812dc3a010c7d01b50e0d17dc79c8"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn test_address_short_form() {
        let addr: Address = "0x1111111111111111111111111111111111112222".parse().unwrap();
        assert_eq!(addr.short(), "0x1111…2222");
    }

    #[test]
    fn test_address_serde_as_string() {
        let addr: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x2222222222222222222222222222222222222222\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_course_window_is_inclusive() {
        let course = Course {
            id: 1,
            name: "Algorithms".to_string(),
            start_time: 100,
            end_time: 200,
            teacher: Address::ZERO,
            is_active: true,
        };
        assert!(course.accepts_attendance_at(100));
        assert!(course.accepts_attendance_at(200));
        assert!(!course.accepts_attendance_at(99));
        assert!(!course.accepts_attendance_at(201));
    }
}
