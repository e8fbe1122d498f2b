//! Client-held permission cache keyed by wallet address.
//!
//! Entries live under `permissions_<lowercase address>` as JSON and expire
//! 24 hours after they were saved. The cache never fails: storage problems
//! are logged and read as misses.

use crate::chain::types::Address;
use crate::clock::Clock;
use crate::roles::types::{Role, RoleGrant, RoleResolution};
use crate::session::storage::PermissionStorage;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const KEY_PREFIX: &str = "permissions_";

/// Grant lifetime in hours.
pub const PERMISSION_TTL_HOURS: i64 = 24;

/// Stored layout. Timestamps are unix milliseconds.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPermissions {
    is_admin: bool,
    is_system: bool,
    #[serde(default)]
    is_owner: bool,
    user_role: Option<Role>,
    #[serde(default)]
    expiry: Option<i64>,
    #[serde(default)]
    acquired_at: Option<i64>,
}

pub struct SessionPermissionCache {
    /// Backing key-value store.
    storage: Arc<dyn PermissionStorage>,

    clock: Arc<dyn Clock>,

    /// Lifetime applied by [`save`](Self::save).
    ttl: Duration,
}

impl SessionPermissionCache {
    pub fn new(storage: Arc<dyn PermissionStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            ttl: Duration::hours(PERMISSION_TTL_HOURS),
        }
    }

    pub fn storage_key(address: Address) -> String {
        format!("{}{}", KEY_PREFIX, address)
    }

    /// Save a grant with a fresh expiry of now + 24h. Returns the stamped grant.
    pub fn save(&self, grant: &RoleGrant) -> RoleGrant {
        let now = self.clock.now();
        let stamped = RoleGrant {
            expiry: Some(now + self.ttl),
            acquired_at: now,
            ..grant.clone()
        };
        self.store(&stamped);
        stamped
    }

    /// Write a grant exactly as given, keeping its expiry.
    pub fn store(&self, grant: &RoleGrant) {
        let stored = StoredPermissions {
            is_admin: grant.is_admin,
            is_system: grant.is_system,
            is_owner: grant.is_owner,
            user_role: grant.role,
            expiry: grant.expiry.map(|e| e.timestamp_millis()),
            acquired_at: Some(grant.acquired_at.timestamp_millis()),
        };

        let key = Self::storage_key(grant.address);
        let json = match serde_json::to_string(&stored) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode permissions for {}: {}", grant.address.short(), e);
                return;
            }
        };
        if let Err(e) = self.storage.set_item(&key, &json) {
            warn!("Failed to save permissions for {}: {}", grant.address.short(), e);
        }
    }

    /// Cached grant for `address`, if present and unexpired.
    ///
    /// Expired or malformed entries are removed.
    pub fn restore(&self, address: Address) -> Option<RoleGrant> {
        let key = Self::storage_key(address);
        let raw = match self.storage.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read permissions for {}: {}", address.short(), e);
                return None;
            }
        };

        let stored: StoredPermissions = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Discarding malformed permissions for {}: {}", address.short(), e);
                self.remove(&key, address);
                return None;
            }
        };

        let now = self.clock.now();
        let grant = RoleGrant {
            address,
            is_admin: stored.is_admin,
            is_system: stored.is_system,
            is_owner: stored.is_owner,
            role: stored.user_role,
            expiry: stored.expiry.and_then(DateTime::<Utc>::from_timestamp_millis),
            acquired_at: stored
                .acquired_at
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or(now),
        };

        if grant.is_expired(now) {
            debug!("Cached permissions for {} expired", address.short());
            self.remove(&key, address);
            return None;
        }

        Some(grant)
    }

    pub fn clear(&self, address: Address) {
        self.remove(&Self::storage_key(address), address);
    }

    fn remove(&self, key: &str, address: Address) {
        if let Err(e) = self.storage.remove_item(key) {
            warn!("Failed to clear permissions for {}: {}", address.short(), e);
        }
    }
}

/// Combine a cached grant with a fresh resolution.
///
/// Role and admin/system flags come from the cached grant when one exists;
/// registration, ownership and student details always come from the fresh
/// result.
pub fn merge(cached: Option<&RoleGrant>, fresh: &RoleResolution) -> RoleResolution {
    match cached {
        Some(grant) => RoleResolution {
            is_registered: fresh.is_registered,
            role: grant.role,
            is_admin: grant.is_admin,
            is_owner: fresh.is_owner,
            is_system: grant.is_system,
            student_info: fresh.student_info.clone(),
        },
        None => fresh.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::StudentInfo;
    use crate::clock::ManualClock;
    use crate::session::storage::MemoryStorage;

    const NOW: i64 = 1_700_000_000;

    fn cache() -> (SessionPermissionCache, Arc<MemoryStorage>, Arc<ManualClock>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::at_unix(NOW));
        (
            SessionPermissionCache::new(storage.clone(), clock.clone()),
            storage,
            clock,
        )
    }

    fn who() -> Address {
        "0xABCDEF0000000000000000000000000000000001".parse().unwrap()
    }

    #[test]
    fn test_save_uses_lowercase_key_and_24h_expiry() {
        let (cache, storage, clock) = cache();
        let saved = cache.save(&RoleGrant::for_role(who(), Role::System, clock.now()));
        assert_eq!(saved.expiry, Some(clock.now() + Duration::hours(24)));

        let raw = storage
            .get_item("permissions_0xabcdef0000000000000000000000000000000001")
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["userRole"], "system");
        assert_eq!(json["isSystem"], true);
        assert_eq!(json["expiry"], (NOW + 86_400) * 1000);
    }

    #[test]
    fn test_restore_round_trip_then_expire() {
        let (cache, storage, clock) = cache();
        cache.save(&RoleGrant::for_role(who(), Role::Admin, clock.now()));

        clock.advance(Duration::hours(23));
        let restored = cache.restore(who()).unwrap();
        assert_eq!(restored.role, Some(Role::Admin));
        assert!(restored.is_admin);

        clock.advance(Duration::hours(2));
        assert!(cache.restore(who()).is_none());
        assert_eq!(
            storage.get_item(&SessionPermissionCache::storage_key(who())).unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_expiry_never_expires() {
        let (cache, storage, clock) = cache();
        storage
            .set_item(
                &SessionPermissionCache::storage_key(who()),
                r#"{"isAdmin":true,"isSystem":false,"userRole":"admin"}"#,
            )
            .unwrap();
        clock.advance(Duration::days(400));
        assert_eq!(cache.restore(who()).unwrap().role, Some(Role::Admin));
    }

    #[test]
    fn test_malformed_entry_is_evicted() {
        let (cache, storage, _) = cache();
        let key = SessionPermissionCache::storage_key(who());
        storage.set_item(&key, "{not json").unwrap();
        assert!(cache.restore(who()).is_none());
        assert_eq!(storage.get_item(&key).unwrap(), None);
    }

    #[test]
    fn test_store_keeps_existing_expiry() {
        let (cache, _, clock) = cache();
        let saved = cache.save(&RoleGrant::for_role(who(), Role::Admin, clock.now()));
        clock.advance(Duration::hours(5));
        cache.store(&saved);
        assert_eq!(cache.restore(who()).unwrap().expiry, saved.expiry);
    }

    #[test]
    fn test_cached_role_takes_precedence() {
        let cached = RoleGrant::for_role(who(), Role::System, Utc::now());
        let fresh = RoleResolution::from_flags(
            false,
            false,
            false,
            Some(StudentInfo {
                name: "Wang Wu".to_string(),
                student_id: "2023003".to_string(),
            }),
        );
        assert_eq!(fresh.role, Some(Role::Student));

        let merged = merge(Some(&cached), &fresh);
        assert_eq!(merged.role, Some(Role::System));
        assert!(merged.is_registered);
        assert!(merged.is_system && merged.is_admin);
        assert_eq!(merged.student_info, fresh.student_info);

        assert_eq!(merge(None, &fresh), fresh);
    }

    #[test]
    fn test_clear_removes_entry() {
        let (cache, _, clock) = cache();
        cache.save(&RoleGrant::for_role(who(), Role::Admin, clock.now()));
        cache.clear(who());
        assert!(cache.restore(who()).is_none());
    }
}
