//! End-to-end scenario coverage for the fetch/confirm pipeline, driven
//! entirely through the public API against the in-memory store adapters and
//! a scripted `LogSource` double.
//!
//! Each test name corresponds to a scenario from the reference service's own
//! `tests/reorg_integration.rs`, generalized here to the two-cursor /
//! confirmation-buffer model this crate adds:
//!
//! - `s1` - catch-up with no confirmation requirement
//! - `s2` - confirmation promotion as the head advances
//! - `s3` - a shallow reorg within the confirmation window
//! - `s4` - a reorg that reaches past `lastProcessed`
//! - `s5` - batch-boundary non-overlap
//! - `s6` - client-side event-name filtering

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use futures::StreamExt;

use event_pipeline::pipeline::{
    BlockTracker, Confirmator, Dispatcher, EmitterConfig, EventsEmitter, StartingBlock,
};
use event_pipeline::ports::log_source::mocks::ScriptedLogSource;
use event_pipeline::store::{InMemoryBlockTrackerStore, InMemoryConfirmationBufferStore};
use event_pipeline::types::{BlockNumber, BlockRef, LogRecord};

fn log(contract: Address, block: u64, log_index: u64, tx_byte: u8, event_name: &str) -> LogRecord {
    LogRecord {
        address: contract,
        block_number: BlockNumber::new(block),
        block_hash: B256::from([block as u8; 32]),
        transaction_hash: B256::from([tx_byte; 32]),
        log_index,
        event_name: event_name.into(),
        topics: vec![],
        decoded_payload: serde_json::json!({}),
    }
}

fn block_ref(number: u64, hash_byte: u64) -> BlockRef {
    BlockRef::new(BlockNumber::new(number), B256::from([hash_byte as u8; 32]))
}

#[tokio::test]
async fn s1_catch_up_with_no_confirmations() {
    let contract = Address::from([0x01; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    for n in 100..=340 {
        source.set_header(n, B256::from([n as u8; 32]));
    }
    source.advance_head(340, B256::from([(340u32 as u8); 32]));
    source.push_log(log(contract, 215, 3, 0xAA, "Transfer"));

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size: 100,
        confirmations: 0,
        starting_block: StartingBlock::Number(100),
        ..EmitterConfig::default()
    };
    let emitter =
        EventsEmitter::new(source, tracker.clone(), buffer_store, dispatcher, contract, config).unwrap();

    let current = block_ref(340, 340);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(batches.len(), 3);
    let events: Vec<_> = batches.iter().flat_map(|b| b.events.iter()).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transaction_hash, B256::from([0xAA; 32]));

    let last_fetched = tracker.last_fetched().await.unwrap().unwrap();
    assert_eq!(last_fetched.number.value(), 340);
    let last_processed = tracker.last_processed().await.unwrap().unwrap();
    assert_eq!(last_processed.number.value(), 215);
}

#[tokio::test]
async fn s2_confirmation_promotion_as_head_advances() {
    let contract = Address::from([0x02; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    source.set_header(398, B256::from([0x01; 32]));
    source.advance_head(400, B256::from([0x02; 32]));
    source.push_log(log(contract, 398, 0, 0xBB, "Transfer"));

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size: 50,
        confirmations: 6,
        starting_block: StartingBlock::Number(398),
        ..EmitterConfig::default()
    };
    let emitter = EventsEmitter::new(
        source.clone(),
        tracker.clone(),
        buffer_store.clone(),
        dispatcher.clone(),
        contract,
        config,
    )
    .unwrap();

    // First fetch cycle at head=400: depth is 2, below the confirmation
    // threshold of 6, so the log is buffered rather than emitted.
    let current = block_ref(400, 0x02);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    let total_events: usize = batches.iter().map(|b| b.events.len()).sum();
    assert_eq!(total_events, 0);
    assert_eq!(buffer_store.find_all(contract).await.unwrap().len(), 1);

    // A promotion pass at the same head reports progress but does not
    // promote yet.
    let confirmator = Confirmator::new(
        source.clone(),
        tracker.clone(),
        buffer_store.clone(),
        dispatcher.clone(),
        contract,
        6,
    );
    confirmator.run_confirmations_routine(current).await.unwrap();
    assert_eq!(buffer_store.find_all(contract).await.unwrap().len(), 1);

    // Head advances to 404: depth is now 6, the transaction is still
    // present, so the row is promoted and lastProcessed advances.
    source.advance_head(404, B256::from([0x03; 32]));
    let current = block_ref(404, 0x03);
    confirmator.run_confirmations_routine(current).await.unwrap();

    assert!(buffer_store.find_all(contract).await.unwrap().is_empty());
    let last_processed = tracker.last_processed().await.unwrap().unwrap();
    assert_eq!(last_processed.number.value(), 398);
}

#[tokio::test]
async fn s3_shallow_reorg_within_confirmation_window() {
    let contract = Address::from([0x03; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    for n in 490..=505 {
        source.set_header(n, B256::from([n as u8; 32]));
    }
    source.advance_head(500, B256::from([(500u32 as u8); 32]));
    let dropped = log(contract, 500, 0, 0xCC, "Transfer");
    source.push_log(dropped.clone());

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size: 50,
        confirmations: 12,
        starting_block: StartingBlock::Number(490),
        ..EmitterConfig::default()
    };
    let emitter = EventsEmitter::new(
        source.clone(),
        tracker.clone(),
        buffer_store.clone(),
        dispatcher,
        contract,
        config,
    )
    .unwrap();

    // Initial fetch: the log is well within the confirmation window and
    // gets buffered.
    let current = block_ref(500, 500);
    let _: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(buffer_store.find_all(contract).await.unwrap().len(), 1);

    // A reorg replaces blocks 498..=505 with new hashes and drops the
    // transaction; the stored lastFetched hash at 500 no longer matches.
    for n in 498..=505 {
        source.set_header(n, B256::from([0xF0 + (n - 498) as u8; 32]));
    }
    source.retain_logs(|l| l.transaction_hash != dropped.transaction_hash);
    source.advance_head(505, B256::from([0xFF; 32]));

    let current = block_ref(505, 0xFF);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // handleReorg refetches [lastProcessed+1, head] as one batch; no
    // lastProcessed exists yet, so it refetches from the configured
    // starting block.
    assert_eq!(batches.len(), 1);
    let total_events: usize = batches.iter().map(|b| b.events.len()).sum();
    assert_eq!(total_events, 0);
    assert!(
        buffer_store.find_all(contract).await.unwrap().is_empty(),
        "reorg must clear the buffered row whose transaction disappeared"
    );

    let last_fetched = tracker.last_fetched().await.unwrap().unwrap();
    assert_eq!(last_fetched.number.value(), 505);
    assert_eq!(last_fetched.hash, B256::from([0xFF; 32]));
}

#[tokio::test]
async fn s4_reorg_reaching_past_last_processed() {
    let contract = Address::from([0x04; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    for n in 600..=610 {
        source.set_header(n, B256::from([n as u8; 32]));
    }
    source.advance_head(600, B256::from([(600u32 as u8); 32]));

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    tracker.set_last_fetched(block_ref(600, 600)).await.unwrap();
    tracker
        .set_last_processed_if_higher(block_ref(600, 600))
        .await
        .unwrap();

    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size: 50,
        confirmations: 3,
        starting_block: StartingBlock::Number(0),
        ..EmitterConfig::default()
    };
    let emitter = EventsEmitter::new(
        source.clone(),
        tracker.clone(),
        buffer_store.clone(),
        dispatcher,
        contract,
        config,
    )
    .unwrap();

    // A reorg rewrites the header at the already-processed block 600 and
    // the chain advances to 610.
    source.set_header(600, B256::from([0xAB; 32]));
    source.advance_head(610, B256::from([(610u32 as u8); 32]));
    source.push_log(log(contract, 605, 0, 0xDD, "Transfer"));

    let current = block_ref(610, 610);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // isReorg() detects the lastFetched hash mismatch at 600, notices
    // lastProcessed(600) is also invalidated (reorgOutOfRange), and
    // handleReorg then refetches from lastProcessed+1 = 601 through 610.
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].progress.step_from_block.value(), 601);
    assert_eq!(batches[0].progress.step_to_block.value(), 610);

    let last_fetched = tracker.last_fetched().await.unwrap().unwrap();
    assert_eq!(last_fetched.number.value(), 610);
}

#[tokio::test]
async fn s5_batch_boundaries_do_not_overlap() {
    let contract = Address::from([0x05; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    for n in 1000..=1100 {
        source.set_header(n, B256::from([(n % 251) as u8; 32]));
    }
    source.advance_head(1099, B256::from([(1099 % 251) as u8; 32]));

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size: 50,
        confirmations: 0,
        starting_block: StartingBlock::Number(1000),
        ..EmitterConfig::default()
    };
    let emitter = EventsEmitter::new(source.clone(), tracker, buffer_store, dispatcher, contract, config).unwrap();

    // [1000, 1099] is exactly two 50-block batches; no off-by-one overlap
    // at the boundary.
    let current = block_ref(1099, 1099 % 251);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].progress.step_from_block.value(), 1000);
    assert_eq!(batches[0].progress.step_to_block.value(), 1049);
    assert_eq!(batches[1].progress.step_from_block.value(), 1050);
    assert_eq!(batches[1].progress.step_to_block.value(), 1099);

    // Head advances by one block: the next fetch covers exactly the new
    // block, not a window re-touching the prior batch.
    source.advance_head(1100, B256::from([(1100 % 251) as u8; 32]));
    let current = block_ref(1100, 1100 % 251);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].progress.step_from_block.value(), 1100);
    assert_eq!(batches[0].progress.step_to_block.value(), 1100);
}

#[tokio::test]
async fn s6_client_side_event_name_filter() {
    let contract = Address::from([0x06; 20]);
    let source = Arc::new(ScriptedLogSource::new());
    source.set_header(10, B256::from([10u8; 32]));
    source.advance_head(10, B256::from([10u8; 32]));
    source.push_log(log(contract, 10, 0, 0x01, "Transfer"));
    source.push_log(log(contract, 10, 1, 0x02, "Approval"));

    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let config = EmitterConfig {
        events: Some(vec!["Transfer".into()]),
        batch_size: 50,
        starting_block: StartingBlock::Number(10),
        ..EmitterConfig::default()
    };
    let emitter = EventsEmitter::new(source, tracker, buffer_store, dispatcher, contract, config).unwrap();

    let current = block_ref(10, 10);
    let batches: Vec<_> = emitter
        .fetch(Some(current), false)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let events: Vec<_> = batches.into_iter().flat_map(|b| b.events).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "Transfer");
}
