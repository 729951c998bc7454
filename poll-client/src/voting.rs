use alloy_primitives::Address;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::error::{PollError, Result};
use crate::gateway::ChainGateway;
use crate::model::{PollCollection, PollEntry, PollId, TxAction, TxHash, VotingState};

/// A confirmed transition, keyed by what it applies to rather than by the
/// order calls were made in.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReceipt {
    pub poll_id: PollId,
    pub account: Address,
    pub action: TxAction,
    pub tx_hash: TxHash,
    /// State the poll is in for `account` now that the transaction confirmed.
    pub state: VotingState,
}

/// Guards and submits the participate and vote transactions. It never touches
/// the collection it is handed; callers merge the returned receipt.
#[derive(Debug, Default)]
pub struct VotingStateMachine {
    in_flight: Mutex<HashSet<(PollId, Address)>>,
}

impl VotingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, poll_id: PollId, account: Address) -> bool {
        self.in_flight.lock().contains(&(poll_id, account))
    }

    pub async fn participate<G: ChainGateway>(
        &self,
        gateway: &G,
        account: Option<Address>,
        collection: &PollCollection,
        poll_id: PollId,
    ) -> Result<TransitionReceipt> {
        let account = account.ok_or(PollError::WalletNotConnected)?;
        let entry = lookup(collection, account, poll_id)?;

        let next = VotingState::Participated;
        check_transition(entry, &next, TxAction::Participate)?;

        let _flight = self.begin(poll_id, account, TxAction::Participate)?;
        let tx_hash = gateway
            .participate(account, poll_id)
            .await
            .inspect_err(|e| warn!(poll_id, %account, "participation failed: {}", e))?;

        info!(poll_id, %account, %tx_hash, "participation confirmed");
        Ok(TransitionReceipt {
            poll_id,
            account,
            action: TxAction::Participate,
            tx_hash,
            state: next,
        })
    }

    /// Votes for the first option labelled `selection`. Selection problems are
    /// reported before the state guard, so a bad selection never reaches the
    /// chain whatever state the poll is in.
    pub async fn vote<G: ChainGateway>(
        &self,
        gateway: &G,
        account: Option<Address>,
        collection: &PollCollection,
        poll_id: PollId,
        selection: Option<&str>,
    ) -> Result<TransitionReceipt> {
        let account = account.ok_or(PollError::WalletNotConnected)?;
        let entry = lookup(collection, account, poll_id)?;

        let label = selection.ok_or(PollError::NoOptionSelected)?;
        let option_index = entry
            .poll
            .option_index(label)
            .ok_or_else(|| PollError::InvalidOption(label.to_string()))?;

        let next = VotingState::Voted { option_index };
        check_transition(entry, &next, TxAction::Vote)?;

        let _flight = self.begin(poll_id, account, TxAction::Vote)?;
        let tx_hash = gateway
            .vote(account, poll_id, option_index)
            .await
            .inspect_err(|e| warn!(poll_id, %account, option_index, "vote failed: {}", e))?;

        info!(poll_id, %account, option_index, %tx_hash, "vote confirmed");
        Ok(TransitionReceipt {
            poll_id,
            account,
            action: TxAction::Vote,
            tx_hash,
            state: next,
        })
    }

    fn begin(&self, poll_id: PollId, account: Address, action: TxAction) -> Result<InFlight<'_>> {
        if !self.in_flight.lock().insert((poll_id, account)) {
            return Err(PollError::OperationInFlight { poll_id, action });
        }
        Ok(InFlight {
            set: &self.in_flight,
            key: (poll_id, account),
        })
    }
}

// Clears the in-flight mark however the transaction ends, including when the
// future is dropped mid-wait.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<(PollId, Address)>>,
    key: (PollId, Address),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

// A snapshot taken for another account says nothing about this one.
fn lookup(collection: &PollCollection, account: Address, poll_id: PollId) -> Result<&PollEntry> {
    if collection.owner != Some(account) {
        return Err(PollError::UnknownPoll(poll_id));
    }
    collection.get(poll_id).ok_or(PollError::UnknownPoll(poll_id))
}

fn check_transition(entry: &PollEntry, next: &VotingState, action: TxAction) -> Result<()> {
    if entry.state.can_advance_to(next) {
        return Ok(());
    }
    Err(PollError::InvalidTransition {
        poll_id: entry.poll.id,
        state: entry.state,
        action,
    })
}
