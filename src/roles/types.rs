//! Role model shared by the resolver, the gate and the session cache.

use crate::chain::types::{Address, StudentInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Effective role of a wallet. Unregistered wallets have no role (`None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
    System,
    Owner,
}

impl Role {
    /// Apply the precedence owner > system > admin > student > unregistered.
    pub fn effective(
        is_owner: bool,
        is_system: bool,
        is_admin: bool,
        is_registered: bool,
    ) -> Option<Role> {
        if is_owner {
            Some(Role::Owner)
        } else if is_system {
            Some(Role::System)
        } else if is_admin {
            Some(Role::Admin)
        } else if is_registered {
            Some(Role::Student)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
            Role::System => "system",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a wallet's role against the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResolution {
    pub is_registered: bool,
    pub role: Option<Role>,
    pub is_admin: bool,
    pub is_owner: bool,
    pub is_system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_info: Option<StudentInfo>,
}

impl RoleResolution {
    pub fn unregistered() -> Self {
        Self::default()
    }

    /// Build a resolution from raw capability flags, upholding
    /// `is_owner => is_admin` and `is_system => is_admin`.
    pub fn from_flags(
        is_owner: bool,
        is_system: bool,
        is_admin: bool,
        student_info: Option<StudentInfo>,
    ) -> Self {
        let is_registered = student_info.is_some();
        Self {
            is_registered,
            role: Role::effective(is_owner, is_system, is_admin, is_registered),
            is_admin: is_admin || is_owner || is_system,
            is_owner,
            is_system,
            student_info,
        }
    }
}

/// Time-boxed role grant held in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    pub address: Address,
    pub is_admin: bool,
    pub is_system: bool,
    pub is_owner: bool,
    pub role: Option<Role>,
    pub expiry: Option<DateTime<Utc>>,
    pub acquired_at: DateTime<Utc>,
}

impl RoleGrant {
    /// Grant for a role with its implied flags. No expiry until saved.
    pub fn for_role(address: Address, role: Role, acquired_at: DateTime<Utc>) -> Self {
        let is_owner = role == Role::Owner;
        let is_system = role == Role::System;
        Self {
            address,
            is_admin: role != Role::Student,
            is_system,
            is_owner,
            role: Some(role),
            expiry: None,
            acquired_at,
        }
    }

    /// Snapshot of a resolution as a grant.
    pub fn from_resolution(
        address: Address,
        resolution: &RoleResolution,
        acquired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            is_admin: resolution.is_admin,
            is_system: resolution.is_system,
            is_owner: resolution.is_owner,
            role: resolution.role,
            expiry: None,
            acquired_at,
        }
    }

    /// A grant without an expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}
