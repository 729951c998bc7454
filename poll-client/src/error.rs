use thiserror::Error;

use crate::model::{TxAction, VotingState};

pub type Result<T> = std::result::Result<T, PollError>;

/// Everything the poll client can fail with.
///
/// Wallet, account and transaction errors are recoverable: the caller shows
/// the message and every state machine is left exactly as it was.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PollError {
    #[error("no wallet provider is available")]
    NoProvider,

    #[error("the wallet returned no accounts, is it unlocked?")]
    NoAccounts,

    #[error("the request was rejected in the wallet")]
    UserRejected,

    #[error("connect a wallet first")]
    WalletNotConnected,

    #[error("option {0:?} is not one of the poll's options")]
    InvalidOption(String),

    #[error("no option selected")]
    NoOptionSelected,

    #[error("transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: String },

    #[error("timed out waiting for transaction {tx_hash} to confirm")]
    TransactionTimeout { tx_hash: String },

    #[error("failed to read status of poll {poll_id}: {reason}")]
    PartialReadFailure { poll_id: u64, reason: String },

    #[error("{field} value {value} does not fit in a host integer")]
    NarrowingOverflow { field: &'static str, value: String },

    #[error("cannot {action} poll {poll_id} while {state}")]
    InvalidTransition {
        poll_id: u64,
        state: VotingState,
        action: TxAction,
    },

    #[error("another attempt to {action} poll {poll_id} is already in flight")]
    OperationInFlight { poll_id: u64, action: TxAction },

    #[error("poll {0} is not in the current snapshot")]
    UnknownPoll(u64),

    #[error("invalid poll: {0}")]
    InvalidPoll(String),

    #[error("the wallet is on chain {actual}, switch it to chain {expected}")]
    WrongChain { expected: u64, actual: u64 },

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode chain response: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PollError {
    /// Transaction-level failures, after which the chain outcome is whatever
    /// the next refresh reports.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            PollError::UserRejected
                | PollError::TransactionReverted { .. }
                | PollError::TransactionTimeout { .. }
                | PollError::Network(_)
        )
    }
}
