use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{PollError, Result};
use crate::gateway::{ChainGateway, RawClosedPoll, RawPoll};
use crate::model::{PollId, TxHash};

// Poll contracts ABI (subset used by the client)
sol! {
    interface IPollRegistry {
        struct PollData {
            uint256 pollId;
            string pollName;
            string[] options;
            uint256 startTime;
            uint256 duration;
        }

        function getActivePolls() external view returns (PollData[]);
        function getClosedPolls() external view returns (PollData[] polls, uint256[][] voteCounts);
    }

    interface IPollManager {
        function createPoll(string name, string[] options, uint256 durationMinutes) external;
        function participate(uint256 pollId) external;
        function vote(uint256 pollId, uint256 optionIndex) external;
        function hasParticipated(uint256 pollId, address user) external view returns (bool);
        function hasVoted(uint256 pollId, address user) external view returns (bool);
        function getUserVote(uint256 pollId, address user) external view returns (uint256);
    }
}

impl From<IPollRegistry::PollData> for RawPoll {
    fn from(data: IPollRegistry::PollData) -> Self {
        RawPoll {
            id: data.pollId,
            name: data.pollName,
            options: data.options,
            start_time: data.startTime,
            duration_minutes: data.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// The injected browser wallet (or any EIP-1193 style provider).
#[allow(async_fn_in_trait)]
pub trait WalletProvider {
    /// `eth_requestAccounts`; may prompt the user.
    async fn request_accounts(&self) -> Result<Vec<String>>;

    /// `eth_chainId`.
    async fn chain_id(&self) -> Result<u64>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes>;

    /// Signs and broadcasts, resolving once the node has accepted the transaction.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus>;
}

/// Holder of the faucet key, talking to the RPC endpoint directly.
#[allow(async_fn_in_trait)]
pub trait FundingSigner {
    fn address(&self) -> Address;

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus>;
}

/// [`ChainGateway`] over a wallet provider and a funding signer, speaking the
/// poll contracts' ABI.
pub struct EvmGateway<W, F> {
    wallet: W,
    funder: F,
    poll_manager: Address,
    poll_registry: Address,
    chain_id: u64,
    confirmation_timeout: Duration,
}

impl<W: WalletProvider, F: FundingSigner> EvmGateway<W, F> {
    pub fn new(config: &ClientConfig, wallet: W, funder: F) -> Self {
        Self {
            wallet,
            funder,
            poll_manager: config.poll_manager_address,
            poll_registry: config.poll_registry_address,
            chain_id: config.chain_id,
            confirmation_timeout: config.confirmation_timeout(),
        }
    }

    async fn read<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return> {
        let output = self.wallet.call(to, call.abi_encode().into()).await?;
        C::abi_decode_returns(&output, true)
            .map_err(|e| PollError::Decode(format!("Failed to decode {} output: {}", C::SIGNATURE, e)))
    }

    async fn submit<C: SolCall>(&self, from: Address, call: C) -> Result<TxHash> {
        let tx = TransactionRequest {
            from,
            to: self.poll_manager,
            input: call.abi_encode().into(),
            value: U256::ZERO,
        };

        let tx_hash = self.wallet.send_transaction(tx).await?;
        debug!(%tx_hash, call = C::SIGNATURE, "transaction submitted");
        confirm(tx_hash, self.confirmation_timeout, self.wallet.wait_for_receipt(tx_hash)).await
    }
}

/// Waits for the receipt, bounded by `timeout`. Giving up does not cancel the
/// transaction; whatever the chain eventually does shows up on the next read.
async fn confirm<Fut>(tx_hash: TxHash, timeout: Duration, wait: Fut) -> Result<TxHash>
where
    Fut: Future<Output = Result<ReceiptStatus>>,
{
    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(ReceiptStatus::Success)) => Ok(tx_hash),
        Ok(Ok(ReceiptStatus::Reverted)) => {
            warn!(%tx_hash, "transaction reverted");
            Err(PollError::TransactionReverted {
                tx_hash: tx_hash.to_string(),
            })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(%tx_hash, timeout_secs = timeout.as_secs(), "gave up waiting for receipt");
            Err(PollError::TransactionTimeout {
                tx_hash: tx_hash.to_string(),
            })
        }
    }
}

impl<W: WalletProvider, F: FundingSigner> ChainGateway for EvmGateway<W, F> {
    // Accounts are only adopted on the configured chain.
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let accounts = self.wallet.request_accounts().await?;

        let actual = self.wallet.chain_id().await?;
        if actual != self.chain_id {
            warn!(expected = self.chain_id, actual, "wallet is on the wrong chain");
            return Err(PollError::WrongChain {
                expected: self.chain_id,
                actual,
            });
        }

        accounts
            .iter()
            .map(|account| {
                account
                    .parse::<Address>()
                    .map_err(|_| PollError::InvalidAddress(account.clone()))
            })
            .collect()
    }

    async fn active_polls(&self) -> Result<Vec<RawPoll>> {
        let polls = self
            .read(self.poll_registry, IPollRegistry::getActivePollsCall {})
            .await?
            ._0;
        Ok(polls.into_iter().map(RawPoll::from).collect())
    }

    async fn closed_polls(&self) -> Result<Vec<RawClosedPoll>> {
        let result = self
            .read(self.poll_registry, IPollRegistry::getClosedPollsCall {})
            .await?;

        if result.polls.len() != result.voteCounts.len() {
            return Err(PollError::Decode(format!(
                "getClosedPolls returned {} polls but {} vote count lists",
                result.polls.len(),
                result.voteCounts.len()
            )));
        }

        Ok(result
            .polls
            .into_iter()
            .zip(result.voteCounts)
            .map(|(poll, vote_counts)| RawClosedPoll {
                poll: poll.into(),
                vote_counts,
            })
            .collect())
    }

    async fn has_participated(&self, poll_id: PollId, account: Address) -> Result<bool> {
        let call = IPollManager::hasParticipatedCall {
            pollId: U256::from(poll_id),
            user: account,
        };
        Ok(self.read(self.poll_manager, call).await?._0)
    }

    async fn has_voted(&self, poll_id: PollId, account: Address) -> Result<bool> {
        let call = IPollManager::hasVotedCall {
            pollId: U256::from(poll_id),
            user: account,
        };
        Ok(self.read(self.poll_manager, call).await?._0)
    }

    async fn user_vote(&self, poll_id: PollId, account: Address) -> Result<U256> {
        let call = IPollManager::getUserVoteCall {
            pollId: U256::from(poll_id),
            user: account,
        };
        Ok(self.read(self.poll_manager, call).await?._0)
    }

    async fn create_poll(
        &self,
        from: Address,
        name: &str,
        options: &[String],
        duration_minutes: u64,
    ) -> Result<TxHash> {
        let call = IPollManager::createPollCall {
            name: name.to_string(),
            options: options.to_vec(),
            durationMinutes: U256::from(duration_minutes),
        };
        self.submit(from, call).await
    }

    async fn participate(&self, from: Address, poll_id: PollId) -> Result<TxHash> {
        let call = IPollManager::participateCall {
            pollId: U256::from(poll_id),
        };
        self.submit(from, call).await
    }

    async fn vote(&self, from: Address, poll_id: PollId, option_index: usize) -> Result<TxHash> {
        let call = IPollManager::voteCall {
            pollId: U256::from(poll_id),
            optionIndex: U256::from(option_index),
        };
        self.submit(from, call).await
    }

    async fn fund(&self, to: Address, amount: U256) -> Result<TxHash> {
        let tx = TransactionRequest {
            from: self.funder.address(),
            to,
            input: Bytes::new(),
            value: amount,
        };

        let tx_hash = self.funder.send_transaction(tx).await?;
        info!(%tx_hash, recipient = %to, %amount, "faucet transfer sent");
        confirm(tx_hash, self.confirmation_timeout, self.funder.wait_for_receipt(tx_hash)).await
    }
}
