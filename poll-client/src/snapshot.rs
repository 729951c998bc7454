use alloy_primitives::{Address, U256};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{PollError, Result};
use crate::gateway::{narrow_index, narrow_u64, ChainGateway};
use crate::model::{ClosedPoll, Poll, PollCollection, PollEntry, PollId, VotingState};

/// Per-poll problems met during a refresh. The refresh itself still succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Polls kept with a default status because a status read failed.
    pub degraded: Vec<PollId>,
    /// Raw ids of polls left out because an integer did not fit.
    pub dropped: Vec<U256>,
    pub errors: Vec<PollError>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty() && self.dropped.is_empty()
    }
}

/// Turns chain reads into a [`PollCollection`] for one account.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollSnapshotSync;

impl PollSnapshotSync {
    pub fn new() -> Self {
        PollSnapshotSync
    }

    /// Fetches the active polls and, with an account, that account's status
    /// on each one. Only a failure to list the polls fails the refresh.
    pub async fn refresh<G: ChainGateway>(
        &self,
        gateway: &G,
        account: Option<Address>,
        fetched_at: u64,
    ) -> Result<(PollCollection, SyncReport)> {
        let raw_polls = gateway.active_polls().await?;
        let mut report = SyncReport::default();
        let mut entries = Vec::with_capacity(raw_polls.len());

        for raw in raw_polls {
            let poll = match raw.narrow() {
                Ok(poll) => poll,
                Err(e) => {
                    error!(poll_id = %raw.id, "dropping poll: {}", e);
                    report.dropped.push(raw.id);
                    report.errors.push(e);
                    continue;
                }
            };

            let Some(account) = account else {
                entries.push(PollEntry {
                    poll,
                    state: VotingState::NotParticipated,
                    status_known: true,
                });
                continue;
            };

            match read_status(gateway, &poll, account).await {
                Ok(state) => entries.push(PollEntry {
                    poll,
                    state,
                    status_known: true,
                }),
                Err(e) => {
                    let failure = PollError::PartialReadFailure {
                        poll_id: poll.id,
                        reason: e.to_string(),
                    };
                    warn!(poll_id = poll.id, %account, "{}", failure);
                    report.degraded.push(poll.id);
                    report.errors.push(failure);
                    entries.push(PollEntry {
                        poll,
                        state: VotingState::NotParticipated,
                        status_known: false,
                    });
                }
            }
        }

        let collection = PollCollection::new(account, fetched_at, entries);
        info!(
            polls = collection.len(),
            degraded = report.degraded.len(),
            dropped = report.dropped.len(),
            "poll snapshot refreshed"
        );
        Ok((collection, report))
    }

    /// Results of finished polls. Polls whose counts cannot be matched to
    /// their options, or do not fit, are left out.
    pub async fn closed_polls<G: ChainGateway>(&self, gateway: &G) -> Result<Vec<ClosedPoll>> {
        let raw_closed = gateway.closed_polls().await?;
        let mut closed = Vec::with_capacity(raw_closed.len());

        for raw in raw_closed {
            let poll = match raw.poll.narrow() {
                Ok(poll) => poll,
                Err(e) => {
                    error!(poll_id = %raw.poll.id, "dropping closed poll: {}", e);
                    continue;
                }
            };

            if raw.vote_counts.len() != poll.options.len() {
                warn!(
                    poll_id = poll.id,
                    options = poll.options.len(),
                    counts = raw.vote_counts.len(),
                    "dropping closed poll with mismatched vote counts"
                );
                continue;
            }

            let counts: Result<Vec<u64>> = raw
                .vote_counts
                .iter()
                .map(|count| narrow_u64("vote count", *count))
                .collect();

            match counts {
                Ok(counts) => closed.push(ClosedPoll::new(poll, counts)),
                Err(e) => error!(poll_id = poll.id, "dropping closed poll: {}", e),
            }
        }

        Ok(closed)
    }
}

// One read per flag, in order. A vote implies participation even if the
// participation flag says otherwise.
async fn read_status<G: ChainGateway>(gateway: &G, poll: &Poll, account: Address) -> Result<VotingState> {
    let participated = gateway.has_participated(poll.id, account).await?;
    let voted = gateway.has_voted(poll.id, account).await?;

    if !voted {
        return Ok(if participated {
            VotingState::Participated
        } else {
            VotingState::NotParticipated
        });
    }

    if !participated {
        debug!(poll_id = poll.id, %account, "voted without participation flag");
    }

    let raw_index = gateway.user_vote(poll.id, account).await?;
    let option_index = narrow_index("option index", raw_index)?;
    if option_index >= poll.options.len() {
        return Err(PollError::Decode(format!(
            "option index {} out of range for {} options",
            option_index,
            poll.options.len()
        )));
    }

    Ok(VotingState::Voted { option_index })
}

/// The one shared poll collection. Readers get an `Arc` to an immutable
/// collection; writers swap in a new one.
#[derive(Debug)]
pub struct SharedSnapshot {
    current: RwLock<Arc<PollCollection>>,
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(PollCollection::empty(None))),
        }
    }

    pub fn load(&self) -> Arc<PollCollection> {
        self.current.read().clone()
    }

    pub fn replace(&self, collection: PollCollection) {
        *self.current.write() = Arc::new(collection);
    }

    /// Installs a freshly read collection without losing any confirmed
    /// progress the read did not see yet.
    pub fn publish(&self, mut collection: PollCollection) {
        let mut current = self.current.write();
        collection.carry_forward(&current);
        *current = Arc::new(collection);
    }

    /// Drops everything known about the previous account.
    pub fn invalidate(&self, owner: Option<Address>) {
        self.replace(PollCollection::empty(owner));
    }

    /// Advances one poll for `owner`. Returns false, changing nothing, when the
    /// snapshot belongs to someone else or the step is not forward.
    pub fn merge(&self, owner: Address, poll_id: PollId, state: VotingState) -> bool {
        let mut current = self.current.write();
        if current.owner != Some(owner) {
            return false;
        }

        match current.with_state(poll_id, state) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::with_last_byte(0xa1);
    const BOB: Address = Address::with_last_byte(0xb0);

    fn collection(owner: Option<Address>) -> PollCollection {
        PollCollection::new(
            owner,
            100,
            vec![PollEntry {
                poll: Poll {
                    id: 1,
                    name: "Lunch".to_string(),
                    options: vec!["A".to_string(), "B".to_string()],
                    start_time: 0,
                    duration_minutes: 10,
                },
                state: VotingState::NotParticipated,
                status_known: true,
            }],
        )
    }

    #[test]
    fn merge_only_moves_forward_for_owner() {
        let shared = SharedSnapshot::new();
        shared.replace(collection(Some(ALICE)));
        let before = shared.load();

        assert!(!shared.merge(BOB, 1, VotingState::Participated));
        assert!(!shared.merge(ALICE, 1, VotingState::Voted { option_index: 0 }));
        assert!(shared.merge(ALICE, 1, VotingState::Participated));
        assert!(shared.merge(ALICE, 1, VotingState::Voted { option_index: 1 }));
        assert!(!shared.merge(ALICE, 1, VotingState::Participated));

        assert_eq!(before.get(1).unwrap().state, VotingState::NotParticipated);
        assert_eq!(shared.load().get(1).unwrap().state, VotingState::Voted { option_index: 1 });
    }

    #[test]
    fn invalidate_clears_and_reassigns_owner() {
        let shared = SharedSnapshot::new();
        shared.replace(collection(Some(ALICE)));

        shared.invalidate(Some(BOB));
        let current = shared.load();
        assert!(current.is_empty());
        assert_eq!(current.owner, Some(BOB));
    }
}
