//! Live-versus-mock backend selection.
//!
//! The accessor hands out one [`AttendanceLedger`] regardless of what backs
//! it. Selection is re-evaluated on a timer so a node that comes up later is
//! picked up without a restart.

use crate::chain::error::LedgerError;
use crate::chain::gateway::ChainGateway;
use crate::chain::ledger::{AttendanceLedger, BatchAttendance, CourseCreation, PendingTransaction};
use crate::chain::live::LiveLedger;
use crate::chain::mock::{MockLedger, DEFAULT_OPERATOR};
use crate::chain::types::{Address, AttendanceRecord, Course, StudentRecord};
use crate::clock::Clock;
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Which backend currently serves ledger calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Live,
    Mock,
    Unavailable,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Live => write!(f, "live"),
            BackendMode::Mock => write!(f, "mock"),
            BackendMode::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Selection inputs.
#[derive(Debug, Clone, Default)]
pub struct AccessorConfig {
    /// Deployed contract. Without it only the mock ledger can serve.
    pub contract_address: Option<Address>,
    /// Account used to send contract writes.
    pub signer: Option<Address>,
    pub development: bool,
    /// Always serve from the mock ledger.
    pub force_mock: bool,
    /// Permit the mock ledger against a remote node.
    pub allow_mock_fallback: bool,
}

/// Anything that can hand out the ledger to use right now.
pub trait LedgerSource: Send + Sync {
    fn ledger(&self) -> Result<Arc<dyn AttendanceLedger>, LedgerError>;
}

/// A fixed ledger, for tests and embedded use.
pub struct StaticLedger(pub Arc<dyn AttendanceLedger>);

impl LedgerSource for StaticLedger {
    fn ledger(&self) -> Result<Arc<dyn AttendanceLedger>, LedgerError> {
        Ok(self.0.clone())
    }
}

struct Selection {
    mode: BackendMode,
    ledger: Option<Arc<dyn AttendanceLedger>>,
}

pub struct ContractAccessor {
    /// Node connection whose reachability drives selection.
    gateway: Arc<ChainGateway>,

    /// Contract proxy, present only when a contract address is configured.
    live: Option<Arc<dyn AttendanceLedger>>,

    /// In-process ledger used when the contract cannot be reached.
    mock: Arc<MockLedger>,

    config: AccessorConfig,

    /// Backend chosen by the last [`refresh`](Self::refresh).
    selected: RwLock<Selection>,
}

impl ContractAccessor {
    /// Build an accessor around an explicit live ledger.
    pub fn new(
        gateway: Arc<ChainGateway>,
        live: Option<Arc<dyn AttendanceLedger>>,
        mock: Arc<MockLedger>,
        config: AccessorConfig,
    ) -> Self {
        let accessor = Self {
            gateway,
            live,
            mock,
            config,
            selected: RwLock::new(Selection {
                mode: BackendMode::Unavailable,
                ledger: None,
            }),
        };
        accessor.refresh();
        accessor
    }

    /// Build an accessor whose live ledger targets the configured contract.
    pub fn for_contract(
        gateway: Arc<ChainGateway>,
        mock: Arc<MockLedger>,
        config: AccessorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let live = config.contract_address.map(|contract| {
            let ledger = LiveLedger::new(gateway.clone(), contract, config.signer, clock);
            Arc::new(GuardedLedger::new(
                Arc::new(ledger),
                gateway.is_local_node(),
                config.development,
            )) as Arc<dyn AttendanceLedger>
        });

        if live.is_none() {
            warn!("CONTRACT_ADDRESS not set, live contract disabled");
        }

        Self::new(gateway, live, mock, config)
    }

    fn mock_allowed(&self) -> bool {
        self.config.development || self.gateway.is_local_node() || self.config.allow_mock_fallback
    }

    fn decide(&self) -> BackendMode {
        if self.config.force_mock {
            BackendMode::Mock
        } else if self.live.is_some() && self.gateway.is_reachable() {
            BackendMode::Live
        } else if self.mock_allowed() {
            BackendMode::Mock
        } else {
            BackendMode::Unavailable
        }
    }

    /// Re-evaluate the backend and swap it in. Mode changes are logged.
    pub fn refresh(&self) -> BackendMode {
        let mode = self.decide();
        let ledger = match mode {
            BackendMode::Live => self.live.clone(),
            BackendMode::Mock => Some(self.mock.clone() as Arc<dyn AttendanceLedger>),
            BackendMode::Unavailable => None,
        };

        let mut selected = self.selected.write();
        if selected.mode != mode {
            match mode {
                BackendMode::Live => info!("Contract backend: live contract"),
                BackendMode::Mock => warn!("Contract backend: mock ledger"),
                BackendMode::Unavailable => warn!("Contract backend: unavailable"),
            }
        }
        *selected = Selection { mode, ledger };
        mode
    }

    pub fn current(&self) -> Result<Arc<dyn AttendanceLedger>, LedgerError> {
        self.selected
            .read()
            .ledger
            .clone()
            .ok_or(LedgerError::Unavailable)
    }

    pub fn mode(&self) -> BackendMode {
        self.selected.read().mode
    }

    pub fn mock(&self) -> &Arc<MockLedger> {
        &self.mock
    }

    pub fn gateway(&self) -> &Arc<ChainGateway> {
        &self.gateway
    }

    pub fn has_live_contract(&self) -> bool {
        self.live.is_some()
    }

    /// Periodically re-run [`refresh`](Self::refresh).
    pub fn spawn_mode_watcher(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let accessor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                accessor.refresh();
            }
        })
    }
}

impl LedgerSource for ContractAccessor {
    fn ledger(&self) -> Result<Arc<dyn AttendanceLedger>, LedgerError> {
        self.current()
    }
}

/// Live ledger wrapper that degrades role queries instead of failing them.
///
/// On a local node in development every role check passes. Otherwise a
/// failed role query denies, and a failed `owner()` on a local node falls
/// back to the default operator.
pub struct GuardedLedger {
    inner: Arc<dyn AttendanceLedger>,
    /// Gateway targets a local node.
    local_node: bool,
    development: bool,
}

impl GuardedLedger {
    pub fn new(inner: Arc<dyn AttendanceLedger>, local_node: bool, development: bool) -> Self {
        Self {
            inner,
            local_node,
            development,
        }
    }

    fn permissive(&self) -> bool {
        self.local_node && self.development
    }
}

#[async_trait]
impl AttendanceLedger for GuardedLedger {
    async fn register_student(
        &self,
        student: Address,
        name: &str,
        student_id: &str,
    ) -> Result<PendingTransaction, LedgerError> {
        self.inner.register_student(student, name, student_id).await
    }

    async fn get_student_info(&self, student: Address) -> Result<StudentRecord, LedgerError> {
        self.inner.get_student_info(student).await
    }

    async fn get_student_count(&self) -> Result<u64, LedgerError> {
        self.inner.get_student_count().await
    }

    async fn get_students(&self, start: u64, count: u64) -> Result<Vec<Address>, LedgerError> {
        self.inner.get_students(start, count).await
    }

    async fn create_course(
        &self,
        name: &str,
        start_time: u64,
        end_time: u64,
    ) -> Result<CourseCreation, LedgerError> {
        self.inner.create_course(name, start_time, end_time).await
    }

    async fn get_course_info(&self, course_id: u64) -> Result<Course, LedgerError> {
        self.inner.get_course_info(course_id).await
    }

    async fn get_course_count(&self) -> Result<u64, LedgerError> {
        self.inner.get_course_count().await
    }

    async fn activate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError> {
        self.inner.activate_course(course_id).await
    }

    async fn deactivate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError> {
        self.inner.deactivate_course(course_id).await
    }

    async fn record_attendance(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<PendingTransaction, LedgerError> {
        self.inner.record_attendance(student, course_id).await
    }

    async fn batch_record_attendance(
        &self,
        students: &[Address],
        course_id: u64,
    ) -> Result<BatchAttendance, LedgerError> {
        self.inner.batch_record_attendance(students, course_id).await
    }

    async fn check_attendance(&self, student: Address, course_id: u64) -> Result<bool, LedgerError> {
        self.inner.check_attendance(student, course_id).await
    }

    async fn get_attendance_details(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<Option<AttendanceRecord>, LedgerError> {
        self.inner.get_attendance_details(student, course_id).await
    }

    async fn is_admin(&self, who: Address) -> Result<bool, LedgerError> {
        if self.permissive() {
            return Ok(true);
        }
        Ok(self.inner.is_admin(who).await.unwrap_or_else(|e| {
            warn!("isAdmin query failed for {}, denying: {}", who.short(), e);
            false
        }))
    }

    async fn has_system_access(&self, who: Address) -> Result<bool, LedgerError> {
        if self.permissive() {
            return Ok(true);
        }
        Ok(self.inner.has_system_access(who).await.unwrap_or_else(|e| {
            warn!("hasSystemAccess query failed for {}, denying: {}", who.short(), e);
            false
        }))
    }

    async fn owner(&self) -> Result<Address, LedgerError> {
        match self.inner.owner().await {
            Ok(owner) => Ok(owner),
            Err(e) if self.local_node => {
                warn!("owner() query failed on local node, using default: {}", e);
                Ok(DEFAULT_OPERATOR)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::error::ChainError;
    use crate::chain::gateway::tests::connected_factory;
    use crate::chain::gateway::{GatewayConfig, TransportFactory};
    use crate::clock::ManualClock;

    fn refused() -> TransportFactory {
        Arc::new(|config: &GatewayConfig| {
            Err(ChainError::ConnectionFailed {
                url: config.url.clone(),
                reason: "connection refused".to_string(),
            })
        })
    }

    fn gateway(url: &str, factory: TransportFactory) -> Arc<ChainGateway> {
        let mut config = GatewayConfig::new(url);
        config.retry_count = 1;
        config.retry_delay = Duration::from_millis(1);
        Arc::new(ChainGateway::new(config, factory))
    }

    fn mock() -> Arc<MockLedger> {
        Arc::new(MockLedger::with_defaults(Arc::new(ManualClock::at_unix(1_700_000_000))))
    }

    fn stand_in_live() -> Option<Arc<dyn AttendanceLedger>> {
        Some(mock() as Arc<dyn AttendanceLedger>)
    }

    #[test]
    fn test_remote_unreachable_without_fallback_is_unavailable() {
        let accessor = ContractAccessor::new(
            gateway("https://rpc.example.org", refused()),
            stand_in_live(),
            mock(),
            AccessorConfig::default(),
        );
        assert_eq!(accessor.mode(), BackendMode::Unavailable);
        assert_eq!(accessor.current().err(), Some(LedgerError::Unavailable));
    }

    #[test]
    fn test_fallback_conditions_select_mock() {
        let dev = AccessorConfig {
            development: true,
            ..Default::default()
        };
        let accessor = ContractAccessor::new(
            gateway("https://rpc.example.org", refused()),
            stand_in_live(),
            mock(),
            dev,
        );
        assert_eq!(accessor.mode(), BackendMode::Mock);

        let local = ContractAccessor::new(
            gateway("http://localhost:8545", refused()),
            None,
            mock(),
            AccessorConfig::default(),
        );
        assert_eq!(local.mode(), BackendMode::Mock);

        let allowed = ContractAccessor::new(
            gateway("https://rpc.example.org", refused()),
            None,
            mock(),
            AccessorConfig {
                allow_mock_fallback: true,
                ..Default::default()
            },
        );
        assert_eq!(allowed.mode(), BackendMode::Mock);
    }

    #[tokio::test]
    async fn test_upgrades_to_live_once_reachable() {
        let gw = gateway("https://rpc.example.org", connected_factory());
        let accessor = ContractAccessor::new(
            gw.clone(),
            stand_in_live(),
            mock(),
            AccessorConfig {
                allow_mock_fallback: true,
                ..Default::default()
            },
        );
        assert_eq!(accessor.mode(), BackendMode::Mock);

        gw.connect().await.unwrap();
        assert_eq!(accessor.refresh(), BackendMode::Live);
        assert!(accessor.current().is_ok());
    }

    #[tokio::test]
    async fn test_mode_watcher_picks_up_live_node() {
        let gw = gateway("https://rpc.example.org", connected_factory());
        let accessor = Arc::new(ContractAccessor::new(
            gw.clone(),
            stand_in_live(),
            mock(),
            AccessorConfig {
                allow_mock_fallback: true,
                ..Default::default()
            },
        ));
        assert_eq!(accessor.mode(), BackendMode::Mock);

        let watcher = accessor.spawn_mode_watcher(Duration::from_millis(10));
        gw.connect().await.unwrap();

        let upgraded = tokio::time::timeout(Duration::from_secs(2), async {
            while accessor.mode() != BackendMode::Live {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        watcher.abort();
        assert!(upgraded.is_ok(), "watcher never switched to the live ledger");
    }

    #[tokio::test]
    async fn test_force_mock_wins_over_live() {
        let gw = gateway("https://rpc.example.org", connected_factory());
        gw.connect().await.unwrap();
        let accessor = ContractAccessor::new(
            gw,
            stand_in_live(),
            mock(),
            AccessorConfig {
                force_mock: true,
                ..Default::default()
            },
        );
        assert_eq!(accessor.mode(), BackendMode::Mock);
    }

    fn unreachable_live(url: &str) -> Arc<dyn AttendanceLedger> {
        Arc::new(LiveLedger::new(
            gateway(url, refused()),
            Address::from_bytes([0xcc; 20]),
            None,
            Arc::new(ManualClock::at_unix(0)),
        ))
    }

    #[tokio::test]
    async fn test_guarded_roles_deny_on_failure() {
        let who = Address::from_bytes([0x11; 20]);
        let guarded = GuardedLedger::new(unreachable_live("https://rpc.example.org"), false, false);
        assert!(!guarded.is_admin(who).await.unwrap());
        assert!(!guarded.has_system_access(who).await.unwrap());
        assert!(guarded.owner().await.is_err());
    }

    #[tokio::test]
    async fn test_guarded_roles_permissive_on_local_dev() {
        let who = Address::from_bytes([0x11; 20]);
        let guarded = GuardedLedger::new(unreachable_live("http://localhost:8545"), true, true);
        assert!(guarded.is_admin(who).await.unwrap());
        assert!(guarded.has_system_access(who).await.unwrap());
        assert_eq!(guarded.owner().await.unwrap(), DEFAULT_OPERATOR);
    }
}
