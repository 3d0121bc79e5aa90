use super::*;
use anyhow::format_err;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct Inner {
    next_id: u64,
    docs: BTreeMap<ItemId, Versioned<Item>>,
}

/// Fake in-memory document store.
///
/// Useful for unit-tests and for running without a database.
#[derive(Default)]
pub struct InMemoryItemStore {
    inner: RwLock<Inner>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedItemStore {
        Arc::new(Self::new())
    }
}

fn sort_key(order: QueryOrder, item: &Item) -> u64 {
    match order {
        QueryOrder::UpdatedDesc => item.updated_at,
        QueryOrder::CreatedDesc => item.created_at,
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, id: ItemIdRef<'_>) -> Result<Option<Versioned<Item>>, StoreError> {
        Ok(self.inner.read().docs.get(id).cloned())
    }

    async fn query(&self, query: &ItemQuery) -> Result<Vec<Versioned<Item>>, StoreError> {
        let mut res: Vec<_> = self
            .inner
            .read()
            .docs
            .values()
            .filter(|doc| query.matches(&doc.data))
            .cloned()
            .collect();

        res.sort_by(|a, b| {
            sort_key(query.order, &b.data)
                .cmp(&sort_key(query.order, &a.data))
                .then_with(|| b.data.id.cmp(&a.data.id))
        });
        if let Some(limit) = query.limit {
            res.truncate(limit);
        }
        Ok(res)
    }

    async fn create(&self, mut item: Item) -> Result<ItemId, StoreError> {
        let mut write = self.inner.write();

        write.next_id += 1;
        let id = format!("item-{:08}", write.next_id);
        item.id = id.clone();
        write.docs.insert(
            id.clone(),
            Versioned {
                version: 1,
                data: item,
            },
        );
        Ok(id)
    }

    async fn conditional_update(
        &self,
        id: ItemIdRef<'_>,
        expected: Version,
        mut item: Item,
    ) -> Result<Versioned<Item>, StoreError> {
        let mut write = self.inner.write();

        let doc = write
            .docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;

        if doc.version != expected {
            return Err(StoreError::VersionConflict {
                expected,
                actual: doc.version,
            });
        }
        if !item.bid_history.starts_with(&doc.data.bid_history) {
            return Err(format_err!("bid history of {id} is append-only").into());
        }

        item.id = id.to_owned();
        *doc = Versioned {
            version: expected + 1,
            data: item,
        };
        Ok(doc.clone())
    }

    async fn conditional_delete(
        &self,
        id: ItemIdRef<'_>,
        expected: Version,
    ) -> Result<(), StoreError> {
        let mut write = self.inner.write();

        let doc = write
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        if doc.version != expected {
            return Err(StoreError::VersionConflict {
                expected,
                actual: doc.version,
            });
        }
        write.docs.remove(id);
        Ok(())
    }
}
