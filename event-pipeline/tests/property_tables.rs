//! Table-driven coverage for batch-boundary arithmetic and error-kind
//! mapping, parameterized with `rstest` per the reference service's own
//! table-style test modules.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use futures::StreamExt;
use rstest::rstest;

use event_pipeline::error::{AppError, DomainError, InfraError};
use event_pipeline::pipeline::{BlockTracker, Dispatcher, EmitterConfig, EventsEmitter, StartingBlock};
use event_pipeline::ports::log_source::mocks::ScriptedLogSource;
use event_pipeline::store::{InMemoryBlockTrackerStore, InMemoryConfirmationBufferStore};
use event_pipeline::types::{BlockNumber, BlockRef};

/// `(starting_block, head, batch_size) -> expected (step_from, step_to) pairs`.
#[rstest]
#[case(0, 9, 10, vec![(0, 9)])]
#[case(100, 340, 100, vec![(100, 199), (200, 299), (300, 340)])]
#[case(1000, 1099, 50, vec![(1000, 1049), (1050, 1099)])]
#[case(5, 5, 1, vec![(5, 5)])]
#[case(0, 0, 100, vec![(0, 0)])]
#[tokio::test]
async fn batch_boundaries_match_expected_steps(
    #[case] starting_block: u64,
    #[case] head: u64,
    #[case] batch_size: u64,
    #[case] expected: Vec<(u64, u64)>,
) {
    let contract = Address::from([0x09; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    for n in starting_block..=head {
        source.set_header(n, B256::from([(n % 251) as u8; 32]));
    }
    source.advance_head(head, B256::from([(head % 251) as u8; 32]));

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size,
        confirmations: 0,
        starting_block: StartingBlock::Number(starting_block),
        ..EmitterConfig::default()
    };
    let emitter = EventsEmitter::new(source, tracker, buffer_store, dispatcher, contract, config).unwrap();

    let current = BlockRef::new(BlockNumber::new(head), B256::from([(head % 251) as u8; 32]));
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let steps: Vec<(u64, u64)> = batches
        .iter()
        .map(|b| (b.progress.step_from_block.value(), b.progress.step_to_block.value()))
        .collect();
    assert_eq!(steps, expected);

    // No two consecutive steps may overlap or leave a gap.
    for pair in steps.windows(2) {
        assert_eq!(pair[1].0, pair[0].1 + 1, "batch boundaries must be contiguous and non-overlapping");
    }
}

fn matches_infra(app: &AppError) -> bool {
    matches!(app, AppError::Infra(_))
}

fn matches_domain(app: &AppError) -> bool {
    matches!(app, AppError::Domain(_))
}

/// `(error constructor, expected top-level kind)`.
#[rstest]
#[case(AppError::from(InfraError::LogSource(Box::from("rpc timeout"))), matches_infra as fn(&AppError) -> bool)]
#[case(AppError::from(InfraError::BlockTrackerStore("connection reset".into())), matches_infra)]
#[case(AppError::from(InfraError::ConfirmationBufferStore("disk full".into())), matches_infra)]
#[case(AppError::from(DomainError::Configuration("missing topics".into())), matches_domain)]
#[case(AppError::from(DomainError::InvalidStartingBlock("not-a-number".into())), matches_domain)]
#[case(
    AppError::from(DomainError::DuplicateEvent {
        contract: "0x0".into(),
        transaction_hash: "0x1".into(),
        log_index: 0,
    }),
    matches_domain
)]
fn error_kinds_map_to_expected_app_error_variant(
    #[case] error: AppError,
    #[case] expected_kind: fn(&AppError) -> bool,
) {
    assert!(expected_kind(&error), "unexpected error variant: {error:?}");
}
