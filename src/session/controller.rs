//! Wallet session state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──accounts──▶ Connected
//!      ▲                        │                      │   ▲
//!      └──── rejected / none ───┘          accounts    ▼   │ resolved
//!      ▲                                   changed  Switching
//!      └──────────── disconnect / empty accounts ──────┘
//! ```
//!
//! Every resolution carries a [`ResolutionTicket`]; results for a ticket that
//! no longer matches the active session are dropped, so one account's roles
//! never surface under another.

use crate::chain::types::Address;
use crate::roles::types::{RoleGrant, RoleResolution};
use crate::session::cache::{merge, SessionPermissionCache};
use crate::session::error::{IdentityError, SessionError};
use crate::session::identity::IdentityService;
use crate::session::wallet::{AccountSubscription, WalletProvider};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Switching,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Switching => write!(f, "switching"),
        }
    }
}

/// What the session currently shows for the active wallet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub address: Option<Address>,
    #[serde(flatten)]
    pub roles: RoleResolution,
    /// Roles come from a cached emergency grant.
    pub emergency: bool,
}

/// Identifies one resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionTicket {
    pub address: Address,
    pub generation: u64,
}

pub struct WalletSessionController {
    /// Browser wallet the session connects through.
    wallet: Arc<dyn WalletProvider>,

    /// Backend used for role lookups and emergency access.
    identity: Arc<dyn IdentityService>,

    /// Client-held grants, merged over fresh resolutions.
    cache: SessionPermissionCache,

    /// Account-change listener. Re-armed on disconnect.
    subscription: AccountSubscription,

    state: SessionState,

    /// Identity published to the rest of the client.
    current: SessionIdentity,

    /// Bumped on every connect, switch and disconnect. Results carrying an
    /// older generation are discarded.
    generation: u64,
}

impl WalletSessionController {
    /// Create a disconnected controller already listening for account changes.
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        identity: Arc<dyn IdentityService>,
        cache: SessionPermissionCache,
    ) -> Self {
        let mut subscription = AccountSubscription::new();
        subscription.subscribe(wallet.as_ref());

        Self {
            wallet,
            identity,
            cache,
            subscription,
            state: SessionState::Disconnected,
            current: SessionIdentity::default(),
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.current
    }

    pub fn subscription(&self) -> &AccountSubscription {
        &self.subscription
    }

    pub fn cache(&self) -> &SessionPermissionCache {
        &self.cache
    }

    fn reset_roles(&mut self) {
        self.current.roles = RoleResolution::unregistered();
        self.current.emergency = false;
    }

    /// Start a resolution for the active address, superseding earlier ones.
    pub fn begin_resolution(&mut self, address: Address) -> ResolutionTicket {
        self.generation += 1;
        ResolutionTicket {
            address,
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &ResolutionTicket) -> bool {
        ticket.generation == self.generation
            && self.current.address == Some(ticket.address)
            && matches!(self.state, SessionState::Connected | SessionState::Switching)
    }

    /// Apply a finished resolution. Returns `false` if the ticket is stale.
    ///
    /// With a cached grant the merged result is written back under the
    /// grant's original expiry. On failure the cached grant alone is shown.
    pub fn apply_resolution(
        &mut self,
        ticket: ResolutionTicket,
        cached: Option<RoleGrant>,
        fresh: Result<RoleResolution, IdentityError>,
    ) -> bool {
        if !self.is_current(&ticket) {
            debug!(
                "Discarding stale resolution for {} (generation {})",
                ticket.address.short(),
                ticket.generation
            );
            return false;
        }

        match fresh {
            Ok(fresh) => {
                let merged = merge(cached.as_ref(), &fresh);
                if let Some(grant) = &cached {
                    let updated = RoleGrant {
                        expiry: grant.expiry,
                        ..RoleGrant::from_resolution(ticket.address, &merged, grant.acquired_at)
                    };
                    self.cache.store(&updated);
                }
                self.current.roles = merged;
            }
            Err(e) => {
                warn!("Role resolution failed for {}: {}", ticket.address.short(), e);
                self.current.roles = cached
                    .as_ref()
                    .map(Self::resolution_from_grant)
                    .unwrap_or_default();
            }
        }

        self.current.emergency = cached.is_some();
        true
    }

    fn resolution_from_grant(grant: &RoleGrant) -> RoleResolution {
        RoleResolution {
            is_registered: false,
            role: grant.role,
            is_admin: grant.is_admin,
            is_owner: grant.is_owner,
            is_system: grant.is_system,
            student_info: None,
        }
    }

    /// Restore the cached grant, then resolve and merge.
    async fn resolve_active(&mut self, address: Address) {
        self.reset_roles();
        let ticket = self.begin_resolution(address);

        let cached = self.cache.restore(address);
        if let Some(grant) = &cached {
            self.current.roles = Self::resolution_from_grant(grant);
            self.current.emergency = true;
        }

        let fresh = self.identity.check_user(address).await;
        self.apply_resolution(ticket, cached, fresh);
    }

    /// Prompt the wallet and open a session for its first account.
    pub async fn connect(&mut self) -> Result<Address, SessionError> {
        self.state = SessionState::Connecting;

        let accounts = match self.wallet.request_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.state = SessionState::Disconnected;
                warn!("Wallet connection failed: {}", e);
                return Err(e.into());
            }
        };

        let Some(&address) = accounts.first() else {
            self.state = SessionState::Disconnected;
            return Err(SessionError::NoAccounts);
        };

        self.current.address = Some(address);
        self.state = SessionState::Connected;
        info!("Wallet connected: {}", address.short());

        self.resolve_active(address).await;
        Ok(address)
    }

    /// React to the wallet switching accounts.
    ///
    /// Roles are reset before anything else so the previous account's roles
    /// are never shown for the new one.
    pub async fn handle_accounts_changed(&mut self, accounts: Vec<Address>) {
        let previous = self.current.address;
        self.reset_roles();

        let Some(&next) = accounts.first() else {
            if let Some(previous) = previous {
                self.cache.clear(previous);
            }
            self.current.address = None;
            self.generation += 1;
            self.state = SessionState::Disconnected;
            info!("Wallet reported no accounts, session closed");
            return;
        };

        self.state = SessionState::Switching;
        if let Some(previous) = previous.filter(|p| *p != next) {
            self.cache.clear(previous);
        }

        self.current.address = Some(next);
        info!("Wallet account switched to {}", next.short());
        self.resolve_active(next).await;
        self.state = SessionState::Connected;
    }

    /// Handle every account event already delivered. Returns how many were handled.
    pub async fn poll_wallet_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(accounts) = self.subscription.try_next() {
            self.handle_accounts_changed(accounts).await;
            handled += 1;
        }
        handled
    }

    /// Wait for the next account event and handle it. `false` when the wallet is gone.
    pub async fn next_wallet_event(&mut self) -> bool {
        match self.subscription.next().await {
            Some(accounts) => {
                self.handle_accounts_changed(accounts).await;
                true
            }
            None => false,
        }
    }

    /// Close the session and clear the active address's cached grant.
    ///
    /// The account listener is re-registered so the next connection observes
    /// each switch exactly once.
    pub fn disconnect(&mut self) {
        if let Some(address) = self.current.address.take() {
            self.cache.clear(address);
            info!("Wallet disconnected: {}", address.short());
        }
        self.reset_roles();
        self.generation += 1;
        self.state = SessionState::Disconnected;

        self.subscription.unsubscribe();
        self.subscription.subscribe(self.wallet.as_ref());
    }

    /// Exchange an emergency key and apply the grant to this session.
    pub async fn request_emergency_access(&mut self, key: &str) -> Result<RoleGrant, SessionError> {
        let address = self.current.address.ok_or(SessionError::NotConnected)?;
        let grant = self.identity.emergency_access(address, key).await?;
        let saved = self.cache.save(&grant);

        self.current.roles.role = saved.role;
        self.current.roles.is_admin = saved.is_admin;
        self.current.roles.is_system = saved.is_system;
        self.current.emergency = true;
        info!(
            "Emergency {} access applied to session {}",
            saved.role.map(|r| r.as_str()).unwrap_or("none"),
            address.short()
        );
        Ok(saved)
    }

    /// Re-resolve the active address.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        let address = self.current.address.ok_or(SessionError::NotConnected)?;
        self.resolve_active(address).await;
        Ok(())
    }
}
