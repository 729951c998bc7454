use alloy_primitives::Address;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::countdown::{CountdownHandle, CountdownScheduler};
use crate::error::{PollError, Result};
use crate::gateway::ChainGateway;
use crate::model::{Account, ClosedPoll, PollCollection, PollId, PollView, TxAction, TxHash};
use crate::pager::{Page, Paged, Pager, ViewFilter, ViewFilterPager};
use crate::snapshot::{PollSnapshotSync, SharedSnapshot, SyncReport};
use crate::storage::{ClientStorage, KeyValueStore};
use crate::voting::{TransitionReceipt, VotingStateMachine};
use crate::wallet::{AccountChange, Adoption, ConnectOutcome, FundingOutcome, WalletSession};

/// One user's poll session: wallet, chain snapshot, voting, countdown and
/// paging, behind a single handle.
pub struct PollClient<G, S, C> {
    config: ClientConfig,
    gateway: G,
    storage: ClientStorage<S>,
    clock: Arc<C>,
    wallet: WalletSession,
    sync: PollSnapshotSync,
    voting: VotingStateMachine,
    snapshot: Arc<SharedSnapshot>,
    countdown: Arc<CountdownScheduler>,
    pager: Mutex<ViewFilterPager>,
    closed: Mutex<Vec<ClosedPoll>>,
    closed_pager: Mutex<Pager>,
    // Refreshes and countdown ticks take turns through this.
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<G, S, C> PollClient<G, S, C>
where
    G: ChainGateway,
    S: KeyValueStore,
    C: Clock,
{
    pub fn new(config: ClientConfig, gateway: G, store: S, clock: C) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            wallet: WalletSession::new(&config)?,
            pager: Mutex::new(ViewFilterPager::new(config.page_size, ViewFilter::default())),
            closed: Mutex::new(Vec::new()),
            closed_pager: Mutex::new(Pager::new(config.page_size)),
            config,
            gateway,
            storage: ClientStorage::new(store),
            clock: Arc::new(clock),
            sync: PollSnapshotSync::new(),
            voting: VotingStateMachine::new(),
            snapshot: Arc::new(SharedSnapshot::new()),
            countdown: Arc::new(CountdownScheduler::new()),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn storage(&self) -> &ClientStorage<S> {
        &self.storage
    }

    pub fn account(&self) -> Option<Account> {
        self.wallet.current()
    }

    pub fn snapshot(&self) -> Arc<PollCollection> {
        self.snapshot.load()
    }

    /// Picks up the persisted session and view toggle, then loads the polls.
    pub async fn restore(&self) -> Result<Option<Account>> {
        match self.storage.view_filter() {
            Ok(filter) => self.pager.lock().set_filter(filter),
            Err(e) => warn!("Failed to restore view filter: {}", e),
        }

        let account = self.wallet.restore(&self.storage)?;
        self.account_changed(account.as_ref().map(|account| account.address))
            .await;
        Ok(account)
    }

    /// Connects the wallet and loads the polls for the adopted account before
    /// the faucet runs, so voting does not wait on a transfer confirming.
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        let account = match self.wallet.adopt(&self.gateway, &self.storage).await? {
            Adoption::Existing(account) => {
                return Ok(ConnectOutcome {
                    account,
                    funding: FundingOutcome::AlreadyConnected,
                })
            }
            Adoption::New(account) => account,
        };
        self.account_changed(Some(account.address)).await;

        let funding = self
            .wallet
            .fund_if_due(&self.gateway, &self.storage, self.clock.as_ref(), &account.address)
            .await;
        let account = self
            .wallet
            .current()
            .filter(|current| current.address == account.address)
            .unwrap_or(account);
        Ok(ConnectOutcome { account, funding })
    }

    pub async fn disconnect(&self) {
        self.wallet.disconnect(&self.storage);
        self.account_changed(None).await;
    }

    pub async fn on_accounts_changed(&self, accounts: &[Address]) -> AccountChange {
        let change = self.wallet.on_accounts_changed(accounts, &self.storage);
        match &change {
            AccountChange::Unchanged => {}
            AccountChange::Disconnected => self.account_changed(None).await,
            AccountChange::Switched(account) => self.account_changed(Some(account.address)).await,
        }
        change
    }

    // Nothing read for the previous account may show for the new one.
    async fn account_changed(&self, owner: Option<Address>) {
        self.snapshot.invalidate(owner);
        self.countdown.reset();
        if let Err(e) = self.refresh().await {
            warn!("Failed to load polls after account change: {}", e);
        }
    }

    /// Re-reads the active polls for the current account. A result that comes
    /// back after the account changed is thrown away.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let _gate = self.gate.lock().await;

        let account = self.wallet.address();
        let (collection, report) = self
            .sync
            .refresh(&self.gateway, account, self.clock.unix_now())
            .await?;

        if self.wallet.address() != account {
            debug!("discarding poll refresh for a previous account");
            return Ok(report);
        }

        self.snapshot.publish(collection);
        Ok(report)
    }

    /// Fetches the results of every closed poll and keeps them for paging.
    pub async fn closed_polls(&self) -> Result<Vec<ClosedPoll>> {
        let closed = self.sync.closed_polls(&self.gateway).await?;
        *self.closed.lock() = closed.clone();
        Ok(closed)
    }

    /// The current page of the results last fetched by [`Self::closed_polls`].
    pub fn closed_page(&self) -> Paged<ClosedPoll> {
        let closed = self.closed.lock();
        self.closed_pager.lock().view(closed.as_slice())
    }

    pub fn next_closed_page(&self) -> Paged<ClosedPoll> {
        let closed = self.closed.lock();
        let mut pager = self.closed_pager.lock();
        pager.next_page(closed.len());
        pager.view(closed.as_slice())
    }

    pub fn prev_closed_page(&self) -> Paged<ClosedPoll> {
        let closed = self.closed.lock();
        let mut pager = self.closed_pager.lock();
        pager.prev_page(closed.len());
        pager.view(closed.as_slice())
    }

    pub async fn create_poll(&self, name: &str, options: &[String], duration_minutes: u64) -> Result<TxHash> {
        let account = self.wallet.address().ok_or(PollError::WalletNotConnected)?;

        let name = name.trim();
        if name.is_empty() {
            return Err(PollError::InvalidPoll("poll name is required".to_string()));
        }
        if options.len() < 2 {
            return Err(PollError::InvalidPoll("at least two options are required".to_string()));
        }
        if options.iter().any(|option| option.trim().is_empty()) {
            return Err(PollError::InvalidPoll("options cannot be blank".to_string()));
        }
        if duration_minutes == 0 {
            return Err(PollError::InvalidPoll("duration must be at least one minute".to_string()));
        }

        let options: Vec<String> = options.iter().map(|option| option.trim().to_string()).collect();
        let tx_hash = self
            .gateway
            .create_poll(account, name, &options, duration_minutes)
            .await
            .inspect_err(|e| warn!(%account, "{} failed: {}", TxAction::CreatePoll, e))?;

        info!(%account, %tx_hash, name, "poll created");
        self.refresh_after_confirmation().await;
        Ok(tx_hash)
    }

    pub async fn participate(&self, poll_id: PollId) -> Result<TransitionReceipt> {
        let collection = self.snapshot.load();
        let receipt = self
            .voting
            .participate(&self.gateway, self.wallet.address(), &collection, poll_id)
            .await?;

        self.apply(&receipt).await;
        Ok(receipt)
    }

    pub async fn vote(&self, poll_id: PollId, option: &str) -> Result<TransitionReceipt> {
        let collection = self.snapshot.load();
        let receipt = self
            .voting
            .vote(&self.gateway, self.wallet.address(), &collection, poll_id, Some(option))
            .await?;

        self.apply(&receipt).await;
        Ok(receipt)
    }

    /// Votes with the option previously picked through [`Self::select_option`].
    pub async fn vote_selected(&self, poll_id: PollId) -> Result<TransitionReceipt> {
        let account = self.wallet.address();
        let selection = match account {
            Some(address) => self.storage.selections(&address)?.remove(&poll_id),
            None => None,
        };

        let collection = self.snapshot.load();
        let receipt = self
            .voting
            .vote(&self.gateway, account, &collection, poll_id, selection.as_deref())
            .await?;

        self.apply(&receipt).await;
        Ok(receipt)
    }

    /// Remembers an option choice that has not been submitted yet.
    pub fn select_option(&self, poll_id: PollId, option: &str) -> Result<()> {
        let account = self.wallet.address().ok_or(PollError::WalletNotConnected)?;
        let collection = self.snapshot.load();
        let entry = collection.get(poll_id).ok_or(PollError::UnknownPoll(poll_id))?;

        if entry.poll.option_index(option).is_none() {
            return Err(PollError::InvalidOption(option.to_string()));
        }
        self.storage.save_selection(&account, poll_id, option)
    }

    async fn apply(&self, receipt: &TransitionReceipt) {
        if !self
            .snapshot
            .merge(receipt.account, receipt.poll_id, receipt.state)
        {
            debug!(
                poll_id = receipt.poll_id,
                account = %receipt.account,
                "confirmed transition not merged into current snapshot"
            );
        }

        if receipt.action == TxAction::Vote {
            if let Err(e) = self.storage.clear_selection(&receipt.account, receipt.poll_id) {
                warn!(poll_id = receipt.poll_id, "Failed to clear selection: {}", e);
            }
        }

        self.refresh_after_confirmation().await;
    }

    async fn refresh_after_confirmation(&self) {
        if let Err(e) = self.refresh().await {
            warn!("Failed to refresh after confirmation, keeping merged state: {}", e);
        }
    }

    /// Presentation view of every poll in the snapshot for the current account.
    pub fn poll_views(&self) -> Vec<PollView> {
        let collection = self.snapshot.load();
        let now = self.clock.unix_now();

        let selections = match collection.owner {
            Some(address) => self.storage.selections(&address).unwrap_or_else(|e| {
                warn!(%address, "Failed to read selections: {}", e);
                Default::default()
            }),
            None => Default::default(),
        };

        collection
            .entries()
            .map(|entry| {
                let time_remaining_secs = self.countdown.remaining(&entry.poll, now);
                PollView {
                    poll: entry.poll.clone(),
                    record: entry.state.record(),
                    status_known: entry.status_known,
                    time_remaining_secs,
                    is_active: time_remaining_secs > 0,
                    pending_selection: if entry.state.has_voted() {
                        None
                    } else {
                        selections.get(&entry.poll.id).cloned()
                    },
                }
            })
            .collect()
    }

    pub fn page(&self) -> Page {
        let views = self.poll_views();
        self.pager.lock().view(&views)
    }

    pub fn next_page(&self) -> Page {
        let views = self.poll_views();
        let mut pager = self.pager.lock();
        pager.next_page(&views);
        pager.view(&views)
    }

    pub fn prev_page(&self) -> Page {
        let views = self.poll_views();
        let mut pager = self.pager.lock();
        pager.prev_page(&views);
        pager.view(&views)
    }

    pub fn set_page(&self, page: usize) -> Page {
        let views = self.poll_views();
        let mut pager = self.pager.lock();
        pager.set_page(page, &views);
        pager.view(&views)
    }

    pub fn view_filter(&self) -> ViewFilter {
        self.pager.lock().filter()
    }

    /// Switches halves and remembers the choice for the next session.
    pub fn set_view_filter(&self, filter: ViewFilter) -> Result<Page> {
        self.pager.lock().set_filter(filter);
        self.storage.save_view_filter(filter)?;
        Ok(self.page())
    }

    /// Starts the countdown tick loop. Must be called inside a tokio runtime.
    pub fn start_countdown(&self) -> CountdownHandle {
        let snapshot = self.snapshot.clone();
        let scheduler = self.countdown.clone();
        let clock = self.clock.clone();
        let gate = self.gate.clone();

        CountdownHandle::spawn(self.config.tick_interval(), move || {
            let snapshot = snapshot.clone();
            let scheduler = scheduler.clone();
            let clock = clock.clone();
            let gate = gate.clone();
            async move {
                let _gate = gate.lock().await;
                scheduler.tick(&snapshot.load(), clock.unix_now())
            }
        })
    }
}
