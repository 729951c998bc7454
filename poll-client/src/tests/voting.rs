use std::time::Duration;

use crate::error::PollError;
use crate::mock::*;
use crate::model::{PollCollection, TxAction, VotingState};
use crate::snapshot::PollSnapshotSync;
use crate::voting::VotingStateMachine;

async fn snapshot(chain: &FakeChain) -> PollCollection {
    PollSnapshotSync::new()
        .refresh(chain, Some(ALICE), GENESIS)
        .await
        .unwrap()
        .0
}

fn chain() -> FakeChain {
    let chain = FakeChain::with_accounts(&[ALICE]);
    chain.add_poll(1, &["A", "B"], GENESIS, 10);
    chain
}

#[tokio::test]
async fn participate_then_vote() {
    let chain = chain();
    let machine = VotingStateMachine::new();

    let receipt = machine
        .participate(&chain, Some(ALICE), &snapshot(&chain).await, 1)
        .await
        .unwrap();
    assert_eq!(receipt.state, VotingState::Participated);
    assert_eq!(receipt.action, TxAction::Participate);
    assert_eq!(receipt.account, ALICE);

    let receipt = machine
        .vote(&chain, Some(ALICE), &snapshot(&chain).await, 1, Some("B"))
        .await
        .unwrap();
    assert_eq!(receipt.state, VotingState::Voted { option_index: 1 });
    assert_eq!(chain.calls().vote, 1);
}

#[tokio::test]
async fn reverted_participation_changes_nothing() {
    let chain = chain();
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;
    chain.state().next_tx_error = Some(PollError::TransactionReverted {
        tx_hash: "0x01".to_string(),
    });

    let err = machine
        .participate(&chain, Some(ALICE), &collection, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::TransactionReverted { .. }));

    let collection = snapshot(&chain).await;
    assert_eq!(collection.get(1).unwrap().state, VotingState::NotParticipated);

    let err = machine
        .vote(&chain, Some(ALICE), &collection, 1, Some("A"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PollError::InvalidTransition {
            poll_id: 1,
            state: VotingState::NotParticipated,
            action: TxAction::Vote,
        }
    );
    assert_eq!(chain.calls().vote, 0);
    assert!(!machine.is_in_flight(1, ALICE));
}

#[tokio::test]
async fn unknown_option_never_reaches_chain() {
    let chain = chain();
    chain.set_participated(1, ALICE);
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;

    let err = machine
        .vote(&chain, Some(ALICE), &collection, 1, Some("C"))
        .await
        .unwrap_err();
    assert_eq!(err, PollError::InvalidOption("C".to_string()));

    let err = machine
        .vote(&chain, Some(ALICE), &collection, 1, None)
        .await
        .unwrap_err();
    assert_eq!(err, PollError::NoOptionSelected);

    assert_eq!(chain.calls().vote, 0);
}

#[tokio::test]
async fn selection_is_checked_before_state() {
    let chain = chain();
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;

    // Not participated yet, but the bad label is what gets reported.
    let err = machine
        .vote(&chain, Some(ALICE), &collection, 1, Some("C"))
        .await
        .unwrap_err();
    assert_eq!(err, PollError::InvalidOption("C".to_string()));
}

#[tokio::test]
async fn voted_is_terminal() {
    let chain = chain();
    chain.set_voted(1, ALICE, 0);
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;

    let err = machine
        .vote(&chain, Some(ALICE), &collection, 1, Some("B"))
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::InvalidTransition { action: TxAction::Vote, .. }));

    let err = machine
        .participate(&chain, Some(ALICE), &collection, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PollError::InvalidTransition {
            state: VotingState::Voted { option_index: 0 },
            ..
        }
    ));

    assert_eq!(chain.calls().vote, 0);
    assert_eq!(chain.calls().participate, 0);
    assert_eq!(
        snapshot(&chain).await.get(1).unwrap().state,
        VotingState::Voted { option_index: 0 }
    );
}

#[tokio::test]
async fn requires_wallet_and_known_poll() {
    let chain = chain();
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;

    assert_eq!(
        machine.participate(&chain, None, &collection, 1).await.unwrap_err(),
        PollError::WalletNotConnected
    );
    assert_eq!(
        machine.vote(&chain, None, &collection, 1, Some("A")).await.unwrap_err(),
        PollError::WalletNotConnected
    );
    assert_eq!(
        machine.participate(&chain, Some(ALICE), &collection, 42).await.unwrap_err(),
        PollError::UnknownPoll(42)
    );
    // A snapshot read for someone else is no basis for BOB's transition.
    assert_eq!(
        machine.participate(&chain, Some(BOB), &collection, 1).await.unwrap_err(),
        PollError::UnknownPoll(1)
    );
    assert_eq!(chain.calls().participate, 0);
}

#[tokio::test(start_paused = true)]
async fn second_submission_while_in_flight_is_rejected() {
    let chain = chain();
    chain.state().confirm_delay = Some(Duration::from_secs(12));
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;

    let (first, second) = tokio::join!(
        machine.participate(&chain, Some(ALICE), &collection, 1),
        machine.participate(&chain, Some(ALICE), &collection, 1),
    );

    assert!(first.is_ok());
    assert_eq!(
        second.unwrap_err(),
        PollError::OperationInFlight {
            poll_id: 1,
            action: TxAction::Participate,
        }
    );
    assert_eq!(chain.calls().participate, 1);
    assert!(!machine.is_in_flight(1, ALICE));
}

#[tokio::test(start_paused = true)]
async fn abandoned_wait_releases_the_poll() {
    let chain = chain();
    chain.state().confirm_delay = Some(Duration::from_secs(120));
    let machine = VotingStateMachine::new();
    let collection = snapshot(&chain).await;

    let waited = tokio::time::timeout(
        Duration::from_secs(1),
        machine.participate(&chain, Some(ALICE), &collection, 1),
    )
    .await;

    assert!(waited.is_err());
    assert!(!machine.is_in_flight(1, ALICE));
}
