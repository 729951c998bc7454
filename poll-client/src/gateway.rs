use alloy_primitives::{Address, U256};

use crate::error::{PollError, Result};
use crate::model::{Poll, PollId, TxHash};

/// A poll exactly as the registry contract returns it, before any integer
/// narrowing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoll {
    pub id: U256,
    pub name: String,
    pub options: Vec<String>,
    pub start_time: U256,
    pub duration_minutes: U256,
}

impl RawPoll {
    /// Narrows every chain integer, failing instead of truncating. The derived
    /// end time must fit as well.
    pub fn narrow(&self) -> Result<Poll> {
        let poll = Poll {
            id: narrow_u64("poll id", self.id)?,
            name: self.name.clone(),
            options: self.options.clone(),
            start_time: narrow_u64("start time", self.start_time)?,
            duration_minutes: narrow_u64("duration", self.duration_minutes)?,
        };

        poll.duration_minutes
            .checked_mul(60)
            .and_then(|secs| poll.start_time.checked_add(secs))
            .ok_or_else(|| PollError::NarrowingOverflow {
                field: "end time",
                value: self
                    .start_time
                    .saturating_add(self.duration_minutes.saturating_mul(U256::from(60)))
                    .to_string(),
            })?;

        Ok(poll)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawClosedPoll {
    pub poll: RawPoll,
    pub vote_counts: Vec<U256>,
}

pub fn narrow_u64(field: &'static str, value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| PollError::NarrowingOverflow {
        field,
        value: value.to_string(),
    })
}

pub fn narrow_index(field: &'static str, value: U256) -> Result<usize> {
    usize::try_from(value).map_err(|_| PollError::NarrowingOverflow {
        field,
        value: value.to_string(),
    })
}

/// The call/sign boundary to the wallet, the poll contracts and the faucet.
///
/// Transaction methods resolve only once the transaction is confirmed on
/// chain. A revert, a rejection in the wallet or a wait that runs out all
/// come back as errors, and the caller must treat the action as not applied.
#[allow(async_fn_in_trait)]
pub trait ChainGateway {
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    async fn active_polls(&self) -> Result<Vec<RawPoll>>;

    async fn closed_polls(&self) -> Result<Vec<RawClosedPoll>>;

    async fn has_participated(&self, poll_id: PollId, account: Address) -> Result<bool>;

    async fn has_voted(&self, poll_id: PollId, account: Address) -> Result<bool>;

    async fn user_vote(&self, poll_id: PollId, account: Address) -> Result<U256>;

    async fn create_poll(
        &self,
        from: Address,
        name: &str,
        options: &[String],
        duration_minutes: u64,
    ) -> Result<TxHash>;

    async fn participate(&self, from: Address, poll_id: PollId) -> Result<TxHash>;

    async fn vote(&self, from: Address, poll_id: PollId, option_index: usize) -> Result<TxHash>;

    /// Faucet transfer from the funding key to `to`.
    async fn fund(&self, to: Address, amount: U256) -> Result<TxHash>;
}
