//! Wallet provider seam and account-change subscriptions.

use crate::chain::types::Address;
use crate::session::error::WalletError;
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// A browser-style wallet: prompts for accounts and reports account switches.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user to expose accounts. The first account is the active one.
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Receiver of account-change events. An empty list means the wallet disconnected.
    fn subscribe_accounts(&self) -> broadcast::Receiver<Vec<Address>>;
}

/// Explicit account-change listener handle.
///
/// `subscribe` and `unsubscribe` are idempotent, so at most one listener is
/// registered and every switch is observed once.
#[derive(Debug, Default)]
pub struct AccountSubscription {
    receiver: Option<broadcast::Receiver<Vec<Address>>>,
}

impl AccountSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, provider: &dyn WalletProvider) {
        if self.receiver.is_none() {
            self.receiver = Some(provider.subscribe_accounts());
            debug!("Subscribed to wallet account changes");
        }
    }

    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!("Unsubscribed from wallet account changes");
        }
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Next pending event without waiting.
    pub fn try_next(&mut self) -> Option<Vec<Address>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(accounts) => return Some(accounts),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Skipped {} stale account events", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event. `None` once unsubscribed or the wallet is gone.
    pub async fn next(&mut self) -> Option<Vec<Address>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(accounts) => return Some(accounts),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} stale account events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// In-memory wallet for tests and local tooling.
pub struct MemoryWallet {
    accounts: Mutex<Vec<Address>>,
    rejecting: AtomicBool,
    events: broadcast::Sender<Vec<Address>>,
}

impl MemoryWallet {
    pub fn new(accounts: Vec<Address>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(accounts),
            rejecting: AtomicBool::new(false),
            events,
        }
    }

    /// Make subsequent `request_accounts` calls fail as a user rejection.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Switch accounts and notify subscribers.
    pub fn switch_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock() = accounts.clone();
        // No subscribers is fine.
        let _ = self.events.send(accounts);
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl WalletProvider for MemoryWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(WalletError::UserRejected);
        }
        Ok(self.accounts.lock().clone())
    }

    fn subscribe_accounts(&self) -> broadcast::Receiver<Vec<Address>> {
        self.events.subscribe()
    }
}
