//! Role resolution against the ledger's role surface.

use crate::chain::accessor::LedgerSource;
use crate::chain::types::Address;
use crate::clock::Clock;
use crate::roles::error::AccessError;
use crate::roles::types::{Role, RoleGrant, RoleResolution};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;

/// Shared secrets that unlock emergency grants.
#[derive(Clone)]
pub struct EmergencyKeys {
    pub admin: String,
    pub system: String,
}

impl Default for EmergencyKeys {
    fn default() -> Self {
        Self {
            admin: "admin".to_string(),
            system: "xjtuse".to_string(),
        }
    }
}

impl fmt::Debug for EmergencyKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmergencyKeys")
            .field("admin", &"<redacted>")
            .field("system", &"<redacted>")
            .finish()
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub struct RoleResolver {
    /// Ledger currently selected by the accessor.
    source: Arc<dyn LedgerSource>,

    /// Keys accepted for emergency access.
    keys: EmergencyKeys,

    /// Stamps emergency grants.
    clock: Arc<dyn Clock>,
}

impl RoleResolver {
    pub fn new(source: Arc<dyn LedgerSource>, keys: EmergencyKeys, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            keys,
            clock,
        }
    }

    /// Resolve an address to its role.
    ///
    /// The four role queries run concurrently. A failed query counts as a
    /// missing capability and never aborts the others; only an unavailable
    /// backend is an error.
    pub async fn resolve_role(&self, address: Address) -> Result<RoleResolution, AccessError> {
        let ledger = self.source.ledger()?;

        let (owner, admin, system, student) = tokio::join!(
            ledger.owner(),
            ledger.is_admin(address),
            ledger.has_system_access(address),
            ledger.get_student_info(address),
        );

        let is_owner = match owner {
            Ok(owner) => owner == address,
            Err(e) => {
                warn!("owner() query failed while resolving {}: {}", address.short(), e);
                false
            }
        };
        let is_admin = admin.unwrap_or_else(|e| {
            warn!("isAdmin query failed for {}: {}", address.short(), e);
            false
        });
        let is_system = system.unwrap_or_else(|e| {
            warn!("hasSystemAccess query failed for {}: {}", address.short(), e);
            false
        });
        let student_info = match student {
            Ok(record) => record.info(),
            Err(e) => {
                warn!("getStudentInfo query failed for {}: {}", address.short(), e);
                None
            }
        };

        let resolution = RoleResolution::from_flags(is_owner, is_system, is_admin, student_info);
        info!(
            "Resolved {} as {}",
            address.short(),
            resolution.role.map(|r| r.as_str()).unwrap_or("unregistered")
        );
        Ok(resolution)
    }

    /// Exchange a shared key for an emergency grant. Nothing is written to the ledger.
    pub fn grant_emergency_access(&self, address: Address, key: &str) -> Result<RoleGrant, AccessError> {
        let role = if constant_time_eq(key.as_bytes(), self.keys.admin.as_bytes()) {
            Role::Admin
        } else if constant_time_eq(key.as_bytes(), self.keys.system.as_bytes()) {
            Role::System
        } else {
            warn!("Rejected emergency access attempt for {}", address.short());
            return Err(AccessError::InvalidKey);
        };

        warn!("Emergency {} access granted to {}", role, address.short());
        Ok(RoleGrant::for_role(address, role, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::accessor::StaticLedger;
    use crate::chain::error::LedgerError;
    use crate::chain::gateway::{ChainGateway, GatewayConfig, TransportFactory};
    use crate::chain::ledger::AttendanceLedger;
    use crate::chain::live::LiveLedger;
    use crate::chain::mock::{MockLedger, DEFAULT_OPERATOR};
    use crate::chain::error::ChainError;
    use crate::clock::ManualClock;

    fn resolver_over(ledger: Arc<dyn AttendanceLedger>) -> RoleResolver {
        RoleResolver::new(
            Arc::new(StaticLedger(ledger)),
            EmergencyKeys::default(),
            Arc::new(ManualClock::at_unix(1_700_000_000)),
        )
    }

    fn mock() -> Arc<MockLedger> {
        Arc::new(MockLedger::with_defaults(Arc::new(ManualClock::at_unix(1_700_000_000))))
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"xjtuse", b"xjtuse"));
        assert!(!constant_time_eq(b"xjtuse", b"xjtusf"));
        assert!(!constant_time_eq(b"admin", b"admi"));
    }

    #[tokio::test]
    async fn test_resolve_owner_student_and_unregistered() {
        let resolver = resolver_over(mock());

        let owner = resolver.resolve_role(DEFAULT_OPERATOR).await.unwrap();
        assert_eq!(owner.role, Some(Role::Owner));
        assert!(owner.is_admin && owner.is_owner && owner.is_system);

        let student = resolver
            .resolve_role(Address::from_bytes([0x11; 20]))
            .await
            .unwrap();
        assert_eq!(student.role, Some(Role::Student));
        assert_eq!(student.student_info.unwrap().student_id, "2023001");

        let nobody = resolver
            .resolve_role(Address::from_bytes([0x99; 20]))
            .await
            .unwrap();
        assert_eq!(nobody, RoleResolution::unregistered());
    }

    #[tokio::test]
    async fn test_registered_admin_resolves_admin() {
        let ledger = mock();
        let who = Address::from_bytes([0x22; 20]);
        ledger.grant_admin(who);
        let resolution = resolver_over(ledger).resolve_role(who).await.unwrap();
        assert_eq!(resolution.role, Some(Role::Admin));
        assert!(resolution.is_registered);
        assert!(!resolution.is_system);
    }

    #[tokio::test]
    async fn test_failed_queries_degrade_to_unregistered() {
        let factory: TransportFactory = Arc::new(|config: &GatewayConfig| {
            Err(ChainError::ConnectionFailed {
                url: config.url.clone(),
                reason: "down".to_string(),
            })
        });
        let gateway = Arc::new(ChainGateway::new(GatewayConfig::new("https://rpc.example.org"), factory));
        let live = LiveLedger::new(
            gateway,
            Address::from_bytes([0xcc; 20]),
            None,
            Arc::new(ManualClock::at_unix(0)),
        );

        let resolution = resolver_over(Arc::new(live))
            .resolve_role(Address::from_bytes([0x11; 20]))
            .await
            .unwrap();
        assert_eq!(resolution, RoleResolution::unregistered());
    }

    struct NoBackend;

    impl LedgerSource for NoBackend {
        fn ledger(&self) -> Result<Arc<dyn AttendanceLedger>, LedgerError> {
            Err(LedgerError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_an_error() {
        let resolver = RoleResolver::new(
            Arc::new(NoBackend),
            EmergencyKeys::default(),
            Arc::new(ManualClock::at_unix(0)),
        );
        let result = resolver.resolve_role(DEFAULT_OPERATOR).await;
        assert_eq!(result, Err(AccessError::Ledger(LedgerError::Unavailable)));
    }

    #[test]
    fn test_emergency_keys() {
        let resolver = resolver_over(mock());
        let who = Address::from_bytes([0x44; 20]);

        let admin = resolver.grant_emergency_access(who, "admin").unwrap();
        assert_eq!(admin.role, Some(Role::Admin));
        assert!(admin.is_admin && !admin.is_system);

        let system = resolver.grant_emergency_access(who, "xjtuse").unwrap();
        assert_eq!(system.role, Some(Role::System));
        assert!(system.is_admin && system.is_system);

        assert_eq!(
            resolver.grant_emergency_access(who, "letmein"),
            Err(AccessError::InvalidKey)
        );
    }
}
