//! Role gate for privileged operations, with a 6-second resolution cache.
//!
//! Gate decisions reuse recently resolved roles so a burst of admin requests
//! does not fan out into repeated role queries, while a revoked role stops
//! passing within one TTL.

use crate::chain::types::Address;
use crate::roles::error::AccessError;
use crate::roles::resolver::RoleResolver;
use crate::roles::types::RoleResolution;
use log::debug;
use moka::future::Cache;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cache TTL in seconds.
const GATE_CACHE_TTL_SECONDS: u64 = 6;

/// Role an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Admin, owner or system.
    Admin,
    /// System operators only.
    System,
}

impl Requirement {
    pub fn is_met_by(&self, resolution: &RoleResolution) -> bool {
        match self {
            Requirement::Admin => resolution.is_admin || resolution.is_owner || resolution.is_system,
            Requirement::System => resolution.is_system,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Admin => f.write_str("admin"),
            Requirement::System => f.write_str("system"),
        }
    }
}

pub struct RoleGate {
    resolver: Arc<RoleResolver>,

    /// Recent resolutions keyed by caller address.
    cache: Cache<Address, RoleResolution>,
}

impl RoleGate {
    pub fn new(resolver: Arc<RoleResolver>) -> Self {
        Self::with_ttl(resolver, Duration::from_secs(GATE_CACHE_TTL_SECONDS))
    }

    pub fn with_ttl(resolver: Arc<RoleResolver>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(ttl)
            .build();

        Self { resolver, cache }
    }

    pub fn resolver(&self) -> &Arc<RoleResolver> {
        &self.resolver
    }

    /// Resolved roles for an address, from cache when fresh.
    pub async fn roles(&self, address: Address) -> Result<RoleResolution, AccessError> {
        if let Some(resolution) = self.cache.get(&address).await {
            debug!("Gate cache hit for {}", address.short());
            return Ok(resolution);
        }

        let resolution = self.resolver.resolve_role(address).await?;
        self.cache.insert(address, resolution.clone()).await;
        Ok(resolution)
    }

    /// Check that `address` satisfies `requirement`.
    pub async fn authorize(
        &self,
        address: Address,
        requirement: Requirement,
    ) -> Result<RoleResolution, AccessError> {
        let resolution = self.roles(address).await?;
        if requirement.is_met_by(&resolution) {
            Ok(resolution)
        } else {
            Err(AccessError::InsufficientPermission {
                required: requirement,
            })
        }
    }

    /// Drop the cached roles for an address.
    pub async fn invalidate(&self, address: Address) {
        self.cache.invalidate(&address).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::accessor::StaticLedger;
    use crate::chain::mock::{MockLedger, DEFAULT_OPERATOR};
    use crate::clock::ManualClock;
    use crate::roles::resolver::EmergencyKeys;

    fn gate() -> (RoleGate, Arc<MockLedger>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let ledger = Arc::new(MockLedger::with_defaults(clock.clone()));
        let resolver = RoleResolver::new(
            Arc::new(StaticLedger(ledger.clone())),
            EmergencyKeys::default(),
            clock,
        );
        (RoleGate::new(Arc::new(resolver)), ledger)
    }

    #[test]
    fn test_requirements() {
        let admin = RoleResolution::from_flags(false, false, true, None);
        let system = RoleResolution::from_flags(false, true, false, None);
        let student = RoleResolution::unregistered();

        assert!(Requirement::Admin.is_met_by(&admin));
        assert!(Requirement::Admin.is_met_by(&system));
        assert!(!Requirement::System.is_met_by(&admin));
        assert!(Requirement::System.is_met_by(&system));
        assert!(!Requirement::Admin.is_met_by(&student));
    }

    #[tokio::test]
    async fn test_authorize_owner_and_reject_student() {
        let (gate, _) = gate();
        assert!(gate.authorize(DEFAULT_OPERATOR, Requirement::Admin).await.is_ok());
        assert!(gate.authorize(DEFAULT_OPERATOR, Requirement::System).await.is_ok());

        let student = Address::from_bytes([0x11; 20]);
        assert_eq!(
            gate.authorize(student, Requirement::Admin).await,
            Err(AccessError::InsufficientPermission {
                required: Requirement::Admin
            })
        );
    }

    #[tokio::test]
    async fn test_cached_roles_until_invalidated() {
        let (gate, ledger) = gate();
        let who = Address::from_bytes([0x33; 20]);
        assert!(gate.authorize(who, Requirement::Admin).await.is_err());

        ledger.grant_admin(who);
        assert!(gate.authorize(who, Requirement::Admin).await.is_err());

        gate.invalidate(who).await;
        assert!(gate.authorize(who, Requirement::Admin).await.is_ok());
    }
}
