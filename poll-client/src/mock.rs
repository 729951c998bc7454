use alloy_primitives::{Address, U256};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{PollError, Result};
use crate::gateway::{ChainGateway, RawClosedPoll, RawPoll};
use crate::model::{PollId, TxHash};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::PollClient;

pub const ALICE: Address = Address::with_last_byte(0xa1);
pub const BOB: Address = Address::with_last_byte(0xb0);

// 2024-01-01T00:00:00Z
pub const GENESIS: u64 = 1_704_067_200;

pub type TestClient = PollClient<FakeChain, MemoryStore, ManualClock>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub request_accounts: usize,
    pub status_reads: usize,
    pub create_poll: usize,
    pub participate: usize,
    pub vote: usize,
    pub fund: usize,
}

#[derive(Debug, Default)]
pub struct ChainState {
    pub accounts: Vec<Address>,
    pub accounts_error: Option<PollError>,
    pub polls: Vec<RawPoll>,
    pub closed: Vec<RawClosedPoll>,
    pub participants: HashSet<(PollId, Address)>,
    pub votes: HashMap<(PollId, Address), U256>,
    /// Status reads for these polls fail.
    pub unreadable: HashSet<PollId>,
    pub list_error: Option<PollError>,
    /// Consumed by the next participate, vote or create transaction.
    pub next_tx_error: Option<PollError>,
    pub fund_error: Option<PollError>,
    /// How long transactions take to confirm.
    pub confirm_delay: Option<Duration>,
    /// How long a faucet transfer takes to confirm.
    pub fund_delay: Option<Duration>,
    /// How long listing the active polls takes.
    pub list_delay: Option<Duration>,
    pub funded: Vec<(Address, U256)>,
    pub created: Vec<(String, Vec<String>, u64)>,
    pub calls: Calls,
    tx_count: u8,
}

impl ChainState {
    fn next_hash(&mut self) -> TxHash {
        self.tx_count = self.tx_count.wrapping_add(1);
        TxHash::with_last_byte(self.tx_count)
    }
}

/// In-memory stand-in for the wallet, the poll contracts and the faucet.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: &[Address]) -> Self {
        let chain = Self::new();
        chain.state().accounts = accounts.to_vec();
        chain
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock()
    }

    pub fn calls(&self) -> Calls {
        self.state().calls
    }

    pub fn add_poll(&self, id: u64, options: &[&str], start_time: u64, duration_minutes: u64) {
        self.state().polls.push(raw_poll(id, options, start_time, duration_minutes));
    }

    pub fn set_participated(&self, poll_id: PollId, account: Address) {
        self.state().participants.insert((poll_id, account));
    }

    pub fn set_voted(&self, poll_id: PollId, account: Address, option_index: u64) {
        let mut state = self.state();
        state.participants.insert((poll_id, account));
        state.votes.insert((poll_id, account), U256::from(option_index));
    }

    async fn confirm(&self) {
        let delay = self.state().confirm_delay;
        wait(delay).await;
    }
}

async fn wait(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

pub fn raw_poll(id: u64, options: &[&str], start_time: u64, duration_minutes: u64) -> RawPoll {
    RawPoll {
        id: U256::from(id),
        name: format!("Poll {}", id),
        options: options.iter().map(|option| option.to_string()).collect(),
        start_time: U256::from(start_time),
        duration_minutes: U256::from(duration_minutes),
    }
}

impl ChainGateway for FakeChain {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let mut state = self.state();
        state.calls.request_accounts += 1;
        match &state.accounts_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.accounts.clone()),
        }
    }

    async fn active_polls(&self) -> Result<Vec<RawPoll>> {
        let delay = self.state().list_delay;
        wait(delay).await;

        let state = self.state();
        match &state.list_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.polls.clone()),
        }
    }

    async fn closed_polls(&self) -> Result<Vec<RawClosedPoll>> {
        Ok(self.state().closed.clone())
    }

    async fn has_participated(&self, poll_id: PollId, account: Address) -> Result<bool> {
        let mut state = self.state();
        state.calls.status_reads += 1;
        if state.unreadable.contains(&poll_id) {
            return Err(PollError::Network("status read failed".to_string()));
        }
        Ok(state.participants.contains(&(poll_id, account)))
    }

    async fn has_voted(&self, poll_id: PollId, account: Address) -> Result<bool> {
        let mut state = self.state();
        state.calls.status_reads += 1;
        Ok(state.votes.contains_key(&(poll_id, account)))
    }

    async fn user_vote(&self, poll_id: PollId, account: Address) -> Result<U256> {
        let mut state = self.state();
        state.calls.status_reads += 1;
        Ok(state.votes.get(&(poll_id, account)).copied().unwrap_or_default())
    }

    async fn create_poll(
        &self,
        _from: Address,
        name: &str,
        options: &[String],
        duration_minutes: u64,
    ) -> Result<TxHash> {
        self.confirm().await;
        let mut state = self.state();
        state.calls.create_poll += 1;
        if let Some(e) = state.next_tx_error.take() {
            return Err(e);
        }

        let id = state.polls.len() as u64 + 1;
        state.polls.push(RawPoll {
            id: U256::from(id),
            name: name.to_string(),
            options: options.to_vec(),
            start_time: U256::from(GENESIS),
            duration_minutes: U256::from(duration_minutes),
        });
        state
            .created
            .push((name.to_string(), options.to_vec(), duration_minutes));
        Ok(state.next_hash())
    }

    async fn participate(&self, from: Address, poll_id: PollId) -> Result<TxHash> {
        self.confirm().await;
        let mut state = self.state();
        state.calls.participate += 1;
        if let Some(e) = state.next_tx_error.take() {
            return Err(e);
        }

        let tx_hash = state.next_hash();
        if !state.participants.insert((poll_id, from)) {
            return Err(PollError::TransactionReverted {
                tx_hash: tx_hash.to_string(),
            });
        }
        Ok(tx_hash)
    }

    async fn vote(&self, from: Address, poll_id: PollId, option_index: usize) -> Result<TxHash> {
        self.confirm().await;
        let mut state = self.state();
        state.calls.vote += 1;
        if let Some(e) = state.next_tx_error.take() {
            return Err(e);
        }

        let tx_hash = state.next_hash();
        let key = (poll_id, from);
        if !state.participants.contains(&key) || state.votes.contains_key(&key) {
            return Err(PollError::TransactionReverted {
                tx_hash: tx_hash.to_string(),
            });
        }
        state.votes.insert(key, U256::from(option_index));
        Ok(tx_hash)
    }

    async fn fund(&self, to: Address, amount: U256) -> Result<TxHash> {
        let delay = self.state().fund_delay;
        wait(delay).await;

        let mut state = self.state();
        state.calls.fund += 1;
        if let Some(e) = &state.fund_error {
            return Err(e.clone());
        }
        state.funded.push((to, amount));
        Ok(state.next_hash())
    }
}

/// A [`MemoryStore`] whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PollError::Storage("disk full".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(key)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at_unix(secs: u64) -> Self {
        let now = Utc
            .timestamp_opt(secs as i64, 0)
            .single()
            .expect("valid test timestamp");
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set_unix(&self, secs: u64) {
        *self.now.lock() = Utc
            .timestamp_opt(secs as i64, 0)
            .single()
            .expect("valid test timestamp");
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_unix(GENESIS)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        poll_manager_address: Address::with_last_byte(0x10),
        poll_registry_address: Address::with_last_byte(0x20),
        page_size: 6,
        ..ClientConfig::default()
    }
}

pub fn new_client(chain: &FakeChain, clock: &ManualClock) -> TestClient {
    PollClient::new(test_config(), chain.clone(), MemoryStore::new(), clock.clone())
        .expect("valid test config")
}
