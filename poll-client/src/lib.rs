//! Client session for an on-chain polling dapp.
//!
//! A [`PollClient`] connects a wallet, tops it up from a testnet faucet, keeps
//! an in-memory snapshot of the active polls and the user's progress on each
//! (not participated, participated, voted), drives the participate and vote
//! transactions, counts polls down to expiry and pages through them. The poll
//! contracts own the ballots; this crate only calls them through a
//! [`ChainGateway`].

mod clock;
mod client;
mod config;
mod contracts;
mod countdown;
mod error;
mod gateway;
mod model;
mod pager;
mod snapshot;
mod storage;
mod voting;
mod wallet;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests;

pub use clock::{Clock, SystemClock};
pub use client::PollClient;
pub use config::{ClientConfig, DEFAULT_CHAIN_ID, DEFAULT_FUNDING_AMOUNT, DEFAULT_PAGE_SIZE, FUNDING_COOLDOWN_SECS};
pub use contracts::{
    EvmGateway, FundingSigner, IPollManager, IPollRegistry, ReceiptStatus, TransactionRequest, WalletProvider,
};
pub use countdown::{format_countdown, CountdownFrame, CountdownHandle, CountdownScheduler};
pub use error::{PollError, Result};
pub use gateway::{narrow_index, narrow_u64, ChainGateway, RawClosedPoll, RawPoll};
pub use model::{
    Account, ClosedPoll, ParticipationRecord, Poll, PollCollection, PollEntry, PollId, PollView, TxAction, TxHash,
    VotingState,
};
pub use pager::{Page, Paged, Pager, ViewFilter, ViewFilterPager};
pub use snapshot::{PollSnapshotSync, SharedSnapshot, SyncReport};
pub use storage::{ClientStorage, FileStore, KeyValueStore, MemoryStore};
pub use voting::{TransitionReceipt, VotingStateMachine};
pub use wallet::{format_cooldown, AccountChange, Adoption, ConnectOutcome, FundingOutcome, WalletSession};
