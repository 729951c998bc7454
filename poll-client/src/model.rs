use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type PollId = u64;
pub type TxHash = B256;

/// The connected wallet account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Account {
    pub address: Address,
    pub funded_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            funded_at: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub name: String,
    /// Index into this list is the on-chain vote selector.
    pub options: Vec<String>,
    /// Epoch seconds.
    pub start_time: u64,
    pub duration_minutes: u64,
}

impl Poll {
    pub fn end_time(&self) -> u64 {
        self.start_time
            .saturating_add(self.duration_minutes.saturating_mul(60))
    }

    pub fn time_remaining(&self, now: u64) -> u64 {
        self.end_time().saturating_sub(now)
    }

    pub fn is_active(&self, now: u64) -> bool {
        now < self.end_time()
    }

    /// First option whose label matches exactly.
    pub fn option_index(&self, label: &str) -> Option<usize> {
        self.options.iter().position(|option| option == label)
    }
}

/// Per (poll, account) voting progress. `Voted` is terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VotingState {
    #[default]
    NotParticipated,
    Participated,
    Voted { option_index: usize },
}

impl VotingState {
    pub fn has_participated(&self) -> bool {
        !matches!(self, VotingState::NotParticipated)
    }

    pub fn has_voted(&self) -> bool {
        matches!(self, VotingState::Voted { .. })
    }

    pub fn chosen_option_index(&self) -> Option<usize> {
        match self {
            VotingState::Voted { option_index } => Some(*option_index),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            VotingState::NotParticipated => 0,
            VotingState::Participated => 1,
            VotingState::Voted { .. } => 2,
        }
    }

    /// True when `next` is the single step after `self`.
    pub fn can_advance_to(&self, next: &VotingState) -> bool {
        next.rank() == self.rank() + 1
    }

    pub fn record(&self) -> ParticipationRecord {
        ParticipationRecord {
            has_participated: self.has_participated(),
            has_voted: self.has_voted(),
            chosen_option_index: self.chosen_option_index(),
        }
    }
}

impl fmt::Display for VotingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VotingState::NotParticipated => write!(f, "not participating"),
            VotingState::Participated => write!(f, "participating"),
            VotingState::Voted { option_index } => write!(f, "voted for option {}", option_index),
        }
    }
}

/// Flat form of [`VotingState`] handed to presentation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParticipationRecord {
    pub has_participated: bool,
    pub has_voted: bool,
    pub chosen_option_index: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxAction {
    CreatePoll,
    Participate,
    Vote,
}

impl fmt::Display for TxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxAction::CreatePoll => write!(f, "create poll"),
            TxAction::Participate => write!(f, "participate in"),
            TxAction::Vote => write!(f, "vote on"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PollEntry {
    pub poll: Poll,
    pub state: VotingState,
    /// False when the status read for this poll failed and `state` is a default.
    pub status_known: bool,
}

/// Chain-derived polls for one account. Never edited in place: every change
/// produces a new collection that replaces the old one as a whole.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PollCollection {
    pub owner: Option<Address>,
    pub fetched_at: u64,
    entries: BTreeMap<PollId, PollEntry>,
}

impl PollCollection {
    pub fn new(owner: Option<Address>, fetched_at: u64, entries: Vec<PollEntry>) -> Self {
        Self {
            owner,
            fetched_at,
            entries: entries
                .into_iter()
                .map(|entry| (entry.poll.id, entry))
                .collect(),
        }
    }

    pub fn empty(owner: Option<Address>) -> Self {
        Self {
            owner,
            fetched_at: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, poll_id: PollId) -> Option<&PollEntry> {
        self.entries.get(&poll_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PollEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keeps any state from `previous` that is further along than what was just
    /// read for the same account. A node lagging behind a confirmed transaction,
    /// or a failed status read, must not roll a poll back.
    pub fn carry_forward(&mut self, previous: &PollCollection) {
        if self.owner.is_none() || self.owner != previous.owner {
            return;
        }

        for (poll_id, entry) in self.entries.iter_mut() {
            let Some(old) = previous.entries.get(poll_id) else {
                continue;
            };
            if old.state.rank() > entry.state.rank() {
                entry.state = old.state;
                entry.status_known = old.status_known;
            }
        }
    }

    /// Copy of this collection with one poll's state advanced, or `None` when
    /// the change would not be a forward step for that poll.
    pub fn with_state(&self, poll_id: PollId, state: VotingState) -> Option<PollCollection> {
        let entry = self.entries.get(&poll_id)?;
        if !entry.state.can_advance_to(&state) {
            return None;
        }

        let mut next = self.clone();
        next.entries.insert(
            poll_id,
            PollEntry {
                poll: entry.poll.clone(),
                state,
                status_known: true,
            },
        );
        Some(next)
    }
}

/// Derived, never persisted view of a single poll for presentation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PollView {
    pub poll: Poll,
    pub record: ParticipationRecord,
    pub status_known: bool,
    pub time_remaining_secs: u64,
    pub is_active: bool,
    pub pending_selection: Option<String>,
}

impl PollView {
    /// Label of the option this account voted for, if any.
    pub fn user_vote(&self) -> Option<&str> {
        self.record
            .chosen_option_index
            .and_then(|index| self.poll.options.get(index))
            .map(String::as_str)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClosedPoll {
    pub poll: Poll,
    pub vote_counts: Vec<u64>,
    pub total_votes: u64,
    /// Share of the total per option, rounded to one decimal place.
    pub percentages: Vec<f64>,
}

impl ClosedPoll {
    pub fn new(poll: Poll, vote_counts: Vec<u64>) -> Self {
        let total_votes = vote_counts.iter().fold(0u64, |acc, n| acc.saturating_add(*n));
        let percentages = vote_counts
            .iter()
            .map(|count| {
                if total_votes == 0 {
                    0.0
                } else {
                    ((*count as f64 / total_votes as f64) * 1000.0).round() / 10.0
                }
            })
            .collect();

        Self {
            poll,
            vote_counts,
            total_votes,
            percentages,
        }
    }

    /// Indices of the options with the most votes; empty when nobody voted.
    pub fn leading_options(&self) -> Vec<usize> {
        let max = self.vote_counts.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return Vec::new();
        }
        self.vote_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == max)
            .map(|(index, _)| index)
            .collect()
    }
}
