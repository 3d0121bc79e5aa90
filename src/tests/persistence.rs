use super::{alice, bob};
use crate::{
    auction::{ClaimKind, Item, ItemStatus, Timestamp},
    persistence::{
        InMemoryItemStore, ItemQuery, ItemStore, PostgresItemStore, QueryOrder, StoreError,
    },
};
use anyhow::Result;

fn listing(title: &str, at: Timestamp) -> Item {
    Item::listing(title, "", 100, at)
}

#[tokio::test]
async fn create_assigns_ids_and_first_version() -> Result<()> {
    let store = InMemoryItemStore::new();
    let a = store.create(listing("a", 1)).await?;
    let b = store.create(listing("b", 2)).await?;
    assert_ne!(a, b);

    let doc = store.get(&a).await?.expect("created");
    assert_eq!(doc.version, 1);
    assert_eq!(doc.data.id, a);
    assert_eq!(doc.data.title, "a");
    assert!(store.get("nope").await?.is_none());
    Ok(())
}

/// Version checks and the append-only history rule, shared by every
/// store implementation
async fn check_conditional_writes(store: &(dyn ItemStore + Send + Sync)) -> Result<()> {
    let id = store.create(listing("a", 1)).await?;
    let read = store.get(&id).await?.expect("created");
    assert_eq!(read.version, 1);

    let claimed = read.data.claim(ClaimKind::Mine, &alice(), 2)?;
    let written = store.conditional_update(&id, read.version, claimed).await?;
    assert_eq!(written.version, 2);

    let stale = read.data.claim(ClaimKind::Mine, &bob(), 3)?;
    match store.conditional_update(&id, read.version, stale).await {
        Err(StoreError::VersionConflict {
            expected: 1,
            actual: 2,
        }) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    let stored = store.get(&id).await?.expect("created");
    assert_eq!(stored, written);
    assert_eq!(stored.data.current_bidder.as_deref(), Some("u1"));

    let mut rewritten = stored.data.clone();
    rewritten.bid_history[0].bid_amount = 1;
    assert!(matches!(
        store.conditional_update(&id, stored.version, rewritten).await,
        Err(StoreError::Backend(_))
    ));

    let mut truncated = stored.data.clone();
    truncated.bid_history.clear();
    assert!(matches!(
        store.conditional_update(&id, stored.version, truncated).await,
        Err(StoreError::Backend(_))
    ));

    let stolen = stored.data.steal(&bob(), 150, 4)?;
    let written = store.conditional_update(&id, stored.version, stolen).await?;
    assert_eq!(written.version, 3);
    assert_eq!(
        store.get(&id).await?.expect("created").data.bid_history,
        written.data.bid_history
    );

    assert!(matches!(
        store.conditional_update("nope", 1, listing("x", 1)).await,
        Err(StoreError::NotFound(_))
    ));
    Ok(())
}

async fn check_conditional_delete(store: &(dyn ItemStore + Send + Sync)) -> Result<()> {
    let id = store.create(listing("a", 1)).await?;
    let read = store.get(&id).await?.expect("created");
    store
        .conditional_update(&id, read.version, read.data.claim(ClaimKind::Grab, &alice(), 2)?)
        .await?;

    assert!(matches!(
        store.conditional_delete(&id, read.version).await,
        Err(StoreError::VersionConflict {
            expected: 1,
            actual: 2,
        })
    ));
    assert!(store.get(&id).await?.is_some());

    store.conditional_delete(&id, 2).await?;
    assert!(store.get(&id).await?.is_none());
    assert!(matches!(
        store.conditional_delete(&id, 2).await,
        Err(StoreError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn conditional_writes_check_version_and_history() -> Result<()> {
    check_conditional_writes(&InMemoryItemStore::new()).await
}

#[tokio::test]
async fn conditional_delete_checks_the_version() -> Result<()> {
    check_conditional_delete(&InMemoryItemStore::new()).await
}

#[tokio::test]
async fn query_filters_orders_and_limits() -> Result<()> {
    let store = InMemoryItemStore::new();
    let old = store.create(listing("old", 10)).await?;
    let mid = store.create(listing("mid", 20)).await?;
    let new = store.create(listing("new", 30)).await?;

    // claiming the oldest makes it the most recently updated
    let read = store.get(&old).await?.expect("created");
    store
        .conditional_update(&old, read.version, read.data.claim(ClaimKind::Grab, &alice(), 40)?)
        .await?;

    let ids = |docs: Vec<crate::persistence::Versioned<Item>>| {
        docs.into_iter().map(|d| d.data.id).collect::<Vec<_>>()
    };

    assert_eq!(
        ids(store.query(&ItemQuery::default()).await?),
        vec![old.clone(), new.clone(), mid.clone()]
    );
    assert_eq!(
        ids(store
            .query(&ItemQuery::default().order_by(QueryOrder::CreatedDesc))
            .await?),
        vec![new.clone(), mid.clone(), old.clone()]
    );
    assert_eq!(
        ids(store
            .query(&ItemQuery::default().with_statuses(&[ItemStatus::Available]).limit(1))
            .await?),
        vec![new.clone()]
    );
    assert_eq!(
        ids(store.query(&ItemQuery::default().with_bidder("u1")).await?),
        vec![old.clone()]
    );
    assert_eq!(
        ids(store
            .query(&ItemQuery::default().with_current_bidder("u1"))
            .await?),
        vec![old.clone()]
    );
    assert!(store
        .query(&ItemQuery::default().with_current_bidder("u2"))
        .await?
        .is_empty());
    Ok(())
}

/// Needs a scratch database: `DATABASE_URL=postgres://.. cargo test -- --ignored`
#[tokio::test]
#[ignore]
async fn postgres_conditional_writes() -> Result<()> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return Ok(());
    };
    let store = tokio::task::spawn_blocking(move || -> Result<_> {
        let store = PostgresItemStore::connect(&url, 2)?;
        store.migrate()?;
        Ok(store)
    })
    .await??;

    check_conditional_writes(&store).await?;
    check_conditional_delete(&store).await?;
    Ok(())
}
