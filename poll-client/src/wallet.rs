use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{PollError, Result};
use crate::gateway::ChainGateway;
use crate::model::{Account, TxHash};
use crate::storage::{ClientStorage, KeyValueStore};

/// What happened to the faucet during a connect.
#[derive(Debug, Clone, PartialEq)]
pub enum FundingOutcome {
    Funded { tx_hash: TxHash },
    CoolingDown { remaining: chrono::Duration },
    /// The transfer did not go through. The connection itself still stands.
    Failed(PollError),
    AlreadyConnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOutcome {
    pub account: Account,
    pub funding: FundingOutcome,
}

/// Result of the account half of a connect.
#[derive(Debug, Clone, PartialEq)]
pub enum Adoption {
    /// The wallet granted access and this account is now the session's.
    New(Account),
    Existing(Account),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccountChange {
    Disconnected,
    Switched(Account),
    Unchanged,
}

/// Renders a cooldown as `"{d}d {h}h {m}m"`.
pub fn format_cooldown(remaining: chrono::Duration) -> String {
    let minutes = remaining.num_minutes().max(0);
    format!("{}d {}h {}m", minutes / (24 * 60), (minutes / 60) % 24, minutes % 60)
}

/// The connected account and the faucet policy attached to connecting.
pub struct WalletSession {
    account: RwLock<Option<Account>>,
    // Serializes connect attempts so a double click prompts once.
    connect_lock: Mutex<()>,
    funding_lock: Mutex<()>,
    funding_amount: U256,
    funding_cooldown: chrono::Duration,
}

impl WalletSession {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            account: RwLock::new(None),
            connect_lock: Mutex::new(()),
            funding_lock: Mutex::new(()),
            funding_amount: config.funding_amount_wei()?,
            funding_cooldown: config.funding_cooldown(),
        })
    }

    pub fn current(&self) -> Option<Account> {
        self.account.read().clone()
    }

    pub fn address(&self) -> Option<Address> {
        self.account.read().as_ref().map(|account| account.address)
    }

    pub fn is_connected(&self) -> bool {
        self.account.read().is_some()
    }

    /// Asks the wallet for account access and adopts the first account, then
    /// runs the faucet. A session that is already connected is returned as is.
    pub async fn connect<G, S, C>(
        &self,
        gateway: &G,
        storage: &ClientStorage<S>,
        clock: &C,
    ) -> Result<ConnectOutcome>
    where
        G: ChainGateway,
        S: KeyValueStore,
        C: Clock,
    {
        let mut account = match self.adopt(gateway, storage).await? {
            Adoption::Existing(account) => {
                return Ok(ConnectOutcome {
                    account,
                    funding: FundingOutcome::AlreadyConnected,
                })
            }
            Adoption::New(account) => account,
        };

        let funding = self.fund_if_due(gateway, storage, clock, &account.address).await;
        if let FundingOutcome::Funded { .. } = funding {
            account.funded_at = read_last_funded(storage, &account.address).or_else(|| Some(clock.now()));
        }
        Ok(ConnectOutcome { account, funding })
    }

    /// The first half of a connect: prompt the wallet and adopt its first
    /// account. The faucet is left to [`Self::fund_if_due`], so the session is
    /// usable while a transfer is still confirming.
    pub async fn adopt<G, S>(&self, gateway: &G, storage: &ClientStorage<S>) -> Result<Adoption>
    where
        G: ChainGateway,
        S: KeyValueStore,
    {
        let _guard = self.connect_lock.lock().await;

        if let Some(account) = self.current() {
            debug!(address = %account.address, "wallet already connected");
            return Ok(Adoption::Existing(account));
        }

        let accounts = gateway.request_accounts().await?;
        let address = *accounts.first().ok_or(PollError::NoAccounts)?;

        let mut account = Account::new(address);
        account.funded_at = read_last_funded(storage, &address);
        *self.account.write() = Some(account.clone());

        if let Err(e) = storage.save_address(&address) {
            warn!(%address, "Failed to persist wallet address: {}", e);
        }
        info!(%address, "wallet connected");
        Ok(Adoption::New(account))
    }

    /// Picks up the last connected address without prompting the wallet.
    pub fn restore<S: KeyValueStore>(&self, storage: &ClientStorage<S>) -> Result<Option<Account>> {
        let Some(address) = storage.load_address()? else {
            return Ok(None);
        };

        let mut account = Account::new(address);
        account.funded_at = read_last_funded(storage, &address);
        *self.account.write() = Some(account.clone());

        info!(%address, "wallet session restored");
        Ok(Some(account))
    }

    /// Handles the provider's `accountsChanged` event. Switching accounts
    /// never triggers the faucet. The in-memory account always follows the
    /// provider; a failed write only costs the persisted session.
    pub fn on_accounts_changed<S: KeyValueStore>(
        &self,
        accounts: &[Address],
        storage: &ClientStorage<S>,
    ) -> AccountChange {
        let Some(&address) = accounts.first() else {
            if self.account.write().take().is_none() {
                return AccountChange::Unchanged;
            }
            if let Err(e) = storage.clear_address() {
                warn!("Failed to forget wallet address: {}", e);
            }
            info!("wallet disconnected by provider");
            return AccountChange::Disconnected;
        };

        if self.address() == Some(address) {
            return AccountChange::Unchanged;
        }

        let mut account = Account::new(address);
        account.funded_at = read_last_funded(storage, &address);
        *self.account.write() = Some(account.clone());
        if let Err(e) = storage.save_address(&address) {
            warn!(%address, "Failed to persist wallet address: {}", e);
        }

        info!(%address, "wallet account switched");
        AccountChange::Switched(account)
    }

    pub fn disconnect<S: KeyValueStore>(&self, storage: &ClientStorage<S>) {
        if let Some(account) = self.account.write().take() {
            info!(address = %account.address, "wallet disconnected");
        }
        if let Err(e) = storage.clear_address() {
            warn!("Failed to forget wallet address: {}", e);
        }
    }

    /// Sends the faucet transfer to `address` unless it was funded within the
    /// cooldown. Transfers are serialized, so a reconnect during a pending
    /// transfer sees its record instead of paying twice.
    pub async fn fund_if_due<G, S, C>(
        &self,
        gateway: &G,
        storage: &ClientStorage<S>,
        clock: &C,
        address: &Address,
    ) -> FundingOutcome
    where
        G: ChainGateway,
        S: KeyValueStore,
        C: Clock,
    {
        let _guard = self.funding_lock.lock().await;

        let last_funded = match storage.last_funded(address) {
            Ok(last_funded) => last_funded,
            Err(e) => {
                warn!(%address, "Failed to read funding record, skipping faucet: {}", e);
                return FundingOutcome::Failed(e);
            }
        };

        if let Some(remaining) = self.cooldown_remaining(last_funded, clock.now()) {
            info!(%address, remaining = %format_cooldown(remaining), "faucet cooling down");
            return FundingOutcome::CoolingDown { remaining };
        }

        match gateway.fund(*address, self.funding_amount).await {
            Ok(tx_hash) => {
                let funded_at = clock.now();
                if let Err(e) = storage.record_funding(address, funded_at) {
                    warn!(%address, "Failed to record funding time: {}", e);
                }
                let mut current = self.account.write();
                if let Some(current) = current.as_mut().filter(|current| current.address == *address) {
                    current.funded_at = Some(funded_at);
                }
                drop(current);
                info!(%address, %tx_hash, "faucet transfer confirmed");
                FundingOutcome::Funded { tx_hash }
            }
            Err(e) => {
                warn!(%address, "Faucet transfer failed: {}", e);
                FundingOutcome::Failed(e)
            }
        }
    }

    /// Time left before `last_funded` allows another transfer, or `None` when
    /// one is due.
    fn cooldown_remaining(
        &self,
        last_funded: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<chrono::Duration> {
        let elapsed = now.signed_duration_since(last_funded?);
        if elapsed > self.funding_cooldown {
            return None;
        }
        let remaining = self
            .funding_cooldown
            .checked_sub(&elapsed)
            .unwrap_or(self.funding_cooldown);
        Some(remaining.min(self.funding_cooldown))
    }
}

fn read_last_funded<S: KeyValueStore>(storage: &ClientStorage<S>, address: &Address) -> Option<DateTime<Utc>> {
    storage.last_funded(address).unwrap_or_else(|e| {
        warn!(%address, "Failed to read funding record: {}", e);
        None
    })
}
