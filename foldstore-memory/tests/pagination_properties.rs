//! Property tests for pagination transparency against the in-memory store.
//!
//! Whatever page size the reader is configured with, replaying an
//! aggregate must land on the same memento and the same positions.

use std::collections::BTreeSet;
use std::sync::Arc;

use foldstore::{
    Aggregate, AggregateId, AggregateReader, AggregateWriter, Dispatcher, EventSequence,
    EventType, JsonCodec, NeverSnapshot, PartitionKey, ReaderConfig, Timestamp,
};
use foldstore_memory::InMemoryStore;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ItemAdded {
    id: String,
}

type Items = BTreeSet<String>;

fn dispatcher() -> Arc<Dispatcher<Items>> {
    Arc::new(
        Dispatcher::builder()
            .on("ItemAdded", |mut items: Items, e: ItemAdded| {
                items.insert(e.id);
                items
            })
            .build(),
    )
}

fn reader(
    store: &InMemoryStore,
) -> AggregateReader<InMemoryStore, InMemoryStore, JsonCodec, Items> {
    AggregateReader::new(store.clone(), store.clone(), JsonCodec, dispatcher())
}

/// Builds a history whose commit boundaries follow `commit_sizes`, one
/// `ItemAdded` per unit, and returns the aggregate as last committed.
async fn build_history(store: &InMemoryStore, commit_sizes: &[usize]) -> Aggregate<Items> {
    let id = AggregateId::try_new("list-prop").unwrap();
    let pk = PartitionKey::try_new("p0").unwrap();
    let writer = AggregateWriter::new(store.clone(), store.clone(), JsonCodec);

    let mut aggregate = reader(store).read(id, pk).await.unwrap();
    let mut n = 0;
    for size in commit_sizes {
        for _ in 0..*size {
            n += 1;
            aggregate = aggregate
                .record(
                    &dispatcher(),
                    &JsonCodec,
                    EventType::try_new("ItemAdded").unwrap(),
                    Timestamp::now(),
                    &ItemAdded {
                        id: format!("item-{n:02}"),
                    },
                )
                .unwrap();
        }
        aggregate = writer
            .commit(aggregate, &NeverSnapshot)
            .await
            .unwrap()
            .aggregate;
    }
    aggregate
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn page_size_never_changes_the_replayed_aggregate(
        commit_sizes in prop::collection::vec(1usize..4, 1..8),
        page_size in 1usize..9,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (committed, default_pages, custom_pages) = rt.block_on(async {
            let store = InMemoryStore::new();
            let committed = build_history(&store, &commit_sizes).await;
            let id = committed.aggregate_id().clone();
            let pk = committed.partition_key().clone();

            let default_pages = reader(&store).read(id.clone(), pk.clone()).await.unwrap();
            let custom_pages = reader(&store)
                .with_config(ReaderConfig::new().with_page_size(page_size))
                .read(id, pk)
                .await
                .unwrap();
            (committed, default_pages, custom_pages)
        });

        let total: usize = commit_sizes.iter().sum();
        prop_assert_eq!(custom_pages.memento(), default_pages.memento());
        prop_assert_eq!(custom_pages.event_sequence(), default_pages.event_sequence());
        prop_assert_eq!(custom_pages.commit_sequence(), default_pages.commit_sequence());
        prop_assert_eq!(custom_pages.memento(), committed.memento());
        prop_assert_eq!(custom_pages.event_sequence(), EventSequence::new(total as i64));
    }
}
