use super::{ItemQuery, ItemStore, QueryOrder, StoreError, Version, Versioned};
use crate::auction::{BidEntry, Claim, Item, ItemId, ItemIdRef};
use ::postgres::{types::ToSql, GenericClient, Row};
use anyhow::{format_err, Context, Result};
use async_trait::async_trait;
use r2d2_postgres::{postgres::NoTls, PostgresConnectionManager};
use std::collections::HashMap;
use tracing::{debug, info};

pub type PostgresPool = r2d2::Pool<PostgresConnectionManager<NoTls>>;
pub type PostgresConnection = r2d2::PooledConnection<PostgresConnectionManager<NoTls>>;

const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS item_ids;
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    version BIGINT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    price BIGINT NOT NULL,
    current_bid BIGINT NOT NULL,
    current_bidder TEXT,
    mine_claimed_by TEXT,
    mine_claimed_by_name TEXT,
    mine_claimed_at BIGINT,
    grab_claimed_by TEXT,
    grab_claimed_by_name TEXT,
    grab_claimed_at BIGINT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    sold_at BIGINT
);
CREATE TABLE IF NOT EXISTS bid_history (
    item_id TEXT NOT NULL REFERENCES items (id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    user_name TEXT NOT NULL,
    bid_amount BIGINT NOT NULL,
    bid_type TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    PRIMARY KEY (item_id, seq)
);
CREATE INDEX IF NOT EXISTS bid_history_user_id ON bid_history (user_id);
CREATE INDEX IF NOT EXISTS items_current_bidder ON items (current_bidder);
";

const ITEM_COLUMNS: &str = "id, version, title, description, status, price, current_bid, \
    current_bidder, mine_claimed_by, mine_claimed_by_name, mine_claimed_at, grab_claimed_by, \
    grab_claimed_by_name, grab_claimed_at, created_at, updated_at, sold_at";

/// Item documents in Postgres
///
/// The driver is blocking, so every call runs on tokio's blocking pool.
#[derive(Clone)]
pub struct PostgresItemStore {
    pool: PostgresPool,
}

impl PostgresItemStore {
    /// Blocks while the pool opens its first connections
    pub fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(
            url.parse().context("invalid postgres url")?,
            NoTls,
        );
        let pool = r2d2::Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context("failed to build postgres pool")?;
        Ok(Self { pool })
    }

    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.batch_execute(SCHEMA)
            .context("failed to create schema")?;
        info!("postgres schema ready");
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PostgresConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("failed to get postgres connection")?;
            f(&mut conn)
        })
        .await
        .context("postgres task failed")?
    }
}

fn to_db(v: u64) -> Result<i64> {
    Ok(i64::try_from(v)?)
}

fn from_db(v: i64) -> Result<u64> {
    Ok(u64::try_from(v)?)
}

/// Owned column values of an item, in `SET`/`VALUES` order
struct ItemColumns {
    title: String,
    description: String,
    status: &'static str,
    price: i64,
    current_bid: i64,
    current_bidder: Option<String>,
    mine_by: Option<String>,
    mine_name: Option<String>,
    mine_at: Option<i64>,
    grab_by: Option<String>,
    grab_name: Option<String>,
    grab_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    sold_at: Option<i64>,
}

impl ItemColumns {
    fn new(item: &Item) -> Result<Self> {
        let (mine_by, mine_name, mine_at) = split_claim(item.mine_claim.as_ref())?;
        let (grab_by, grab_name, grab_at) = split_claim(item.grab_claim.as_ref())?;
        Ok(Self {
            title: item.title.clone(),
            description: item.description.clone(),
            status: item.status.as_str(),
            price: to_db(item.price)?,
            current_bid: to_db(item.current_bid)?,
            current_bidder: item.current_bidder.clone(),
            mine_by,
            mine_name,
            mine_at,
            grab_by,
            grab_name,
            grab_at,
            created_at: to_db(item.created_at)?,
            updated_at: to_db(item.updated_at)?,
            sold_at: item.sold_at.map(to_db).transpose()?,
        })
    }

    fn params(&self) -> [&(dyn ToSql + Sync); 15] {
        [
            &self.title,
            &self.description,
            &self.status,
            &self.price,
            &self.current_bid,
            &self.current_bidder,
            &self.mine_by,
            &self.mine_name,
            &self.mine_at,
            &self.grab_by,
            &self.grab_name,
            &self.grab_at,
            &self.created_at,
            &self.updated_at,
            &self.sold_at,
        ]
    }
}

type ClaimColumns = (Option<String>, Option<String>, Option<i64>);

fn split_claim(claim: Option<&Claim>) -> Result<ClaimColumns> {
    Ok(match claim {
        Some(c) => (
            Some(c.user_id.clone()),
            Some(c.user_name.clone()),
            Some(to_db(c.claimed_at)?),
        ),
        None => (None, None, None),
    })
}

fn claim_from_row(row: &Row, prefix: &str) -> Result<Option<Claim>> {
    let by: Option<String> = row.try_get(format!("{prefix}_claimed_by").as_str())?;
    let name: Option<String> = row.try_get(format!("{prefix}_claimed_by_name").as_str())?;
    let at: Option<i64> = row.try_get(format!("{prefix}_claimed_at").as_str())?;
    Ok(match (by, name, at) {
        (Some(user_id), Some(user_name), Some(at)) => Some(Claim {
            user_id,
            user_name,
            claimed_at: from_db(at)?,
        }),
        (None, None, None) => None,
        _ => return Err(format_err!("partially written {prefix} claim")),
    })
}

fn item_from_row(row: &Row, bid_history: Vec<BidEntry>) -> Result<Versioned<Item>> {
    Ok(Versioned {
        version: from_db(row.try_get("version")?)?,
        data: Item {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get::<_, &str>("status")?.parse()?,
            price: from_db(row.try_get("price")?)?,
            current_bid: from_db(row.try_get("current_bid")?)?,
            current_bidder: row.try_get("current_bidder")?,
            mine_claim: claim_from_row(row, "mine")?,
            grab_claim: claim_from_row(row, "grab")?,
            bid_history,
            created_at: from_db(row.try_get("created_at")?)?,
            updated_at: from_db(row.try_get("updated_at")?)?,
            sold_at: row.try_get::<_, Option<i64>>("sold_at")?.map(from_db).transpose()?,
        },
    })
}

fn load_history(
    client: &mut impl GenericClient,
    ids: &[ItemId],
) -> Result<HashMap<ItemId, Vec<BidEntry>>> {
    let mut res: HashMap<ItemId, Vec<BidEntry>> = HashMap::new();
    for row in client.query(
        "SELECT item_id, user_id, user_name, bid_amount, bid_type, created_at \
         FROM bid_history WHERE item_id = ANY($1) ORDER BY item_id, seq",
        &[&ids],
    )? {
        res.entry(row.try_get("item_id")?).or_default().push(BidEntry {
            user_id: row.try_get("user_id")?,
            user_name: row.try_get("user_name")?,
            bid_amount: from_db(row.try_get("bid_amount")?)?,
            bid_type: row.try_get::<_, &str>("bid_type")?.parse()?,
            timestamp: from_db(row.try_get("created_at")?)?,
        });
    }
    Ok(res)
}

fn append_history(
    client: &mut impl GenericClient,
    id: ItemIdRef,
    from: usize,
    entries: &[BidEntry],
) -> Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        let seq = i32::try_from(from + i)?;
        client.execute(
            "INSERT INTO bid_history (item_id, seq, user_id, user_name, bid_amount, bid_type, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &id,
                &seq,
                &entry.user_id,
                &entry.user_name,
                &to_db(entry.bid_amount)?,
                &entry.bid_type.as_str(),
                &to_db(entry.timestamp)?,
            ],
        )?;
    }
    Ok(())
}

/// Why a conditional write on `id` matched no row
fn version_mismatch(
    client: &mut impl GenericClient,
    id: ItemId,
    expected: Version,
) -> Result<StoreError> {
    let current = client
        .query_opt("SELECT version FROM items WHERE id = $1", &[&id])
        .context("failed to read item version")?;
    Ok(match current {
        None => StoreError::NotFound(id),
        Some(row) => StoreError::VersionConflict {
            expected,
            actual: from_db(row.try_get(0).context("missing version")?)?,
        },
    })
}

fn rows_to_items(client: &mut impl GenericClient, rows: Vec<Row>) -> Result<Vec<Versioned<Item>>> {
    let ids = rows
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<Result<Vec<ItemId>, _>>()?;
    let mut history = load_history(client, &ids)?;
    rows.iter()
        .zip(ids.iter())
        .map(|(row, id)| item_from_row(row, history.remove(id).unwrap_or_default()))
        .collect()
}

#[async_trait]
impl ItemStore for PostgresItemStore {
    async fn get(&self, id: ItemIdRef<'_>) -> Result<Option<Versioned<Item>>, StoreError> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let rows = conn
                .query(
                    format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1").as_str(),
                    &[&id],
                )
                .context("failed to load item")?;
            Ok(rows_to_items(&mut **conn, rows)?.pop())
        })
        .await
    }

    async fn query(&self, query: &ItemQuery) -> Result<Vec<Versioned<Item>>, StoreError> {
        let query = query.clone();
        self.blocking(move |conn| {
            let mut clauses = vec![];
            let mut params: Vec<Box<dyn ToSql + Sync>> = vec![];

            if let Some(statuses) = query.statuses {
                let statuses: Vec<String> =
                    statuses.iter().map(|s| s.as_str().to_owned()).collect();
                params.push(Box::new(statuses));
                clauses.push(format!("status = ANY(${})", params.len()));
            }
            if let Some(bidder) = query.current_bidder {
                params.push(Box::new(bidder));
                clauses.push(format!("current_bidder = ${}", params.len()));
            }
            if let Some(bidder) = query.bidder {
                params.push(Box::new(bidder));
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM bid_history h WHERE h.item_id = items.id AND h.user_id = ${})",
                    params.len()
                ));
            }

            let mut sql = format!("SELECT {ITEM_COLUMNS} FROM items");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(match query.order {
                QueryOrder::UpdatedDesc => " ORDER BY updated_at DESC, id DESC",
                QueryOrder::CreatedDesc => " ORDER BY created_at DESC, id DESC",
            });
            if let Some(limit) = query.limit {
                params.push(Box::new(i64::try_from(limit).context("limit too large")?));
                sql.push_str(&format!(" LIMIT ${}", params.len()));
            }
            debug!(%sql, "item query");

            let params: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| &**p).collect();
            let rows = conn.query(sql.as_str(), &params).context("item query failed")?;
            Ok(rows_to_items(&mut **conn, rows)?)
        })
        .await
    }

    async fn create(&self, item: Item) -> Result<ItemId, StoreError> {
        self.blocking(move |conn| {
            let columns = ItemColumns::new(&item)?;
            let mut tx = conn.transaction().context("failed to start transaction")?;
            let id: ItemId = tx
                .query_one(
                    "INSERT INTO items (id, version, title, description, status, price, current_bid, \
                     current_bidder, mine_claimed_by, mine_claimed_by_name, mine_claimed_at, \
                     grab_claimed_by, grab_claimed_by_name, grab_claimed_at, created_at, updated_at, sold_at) \
                     VALUES ('item-' || nextval('item_ids'), 1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
                     RETURNING id",
                    &columns.params(),
                )
                .context("failed to insert item")?
                .try_get("id")
                .context("insert returned no id")?;
            append_history(&mut tx, &id, 0, &item.bid_history)?;
            tx.commit().context("failed to commit item")?;
            Ok(id)
        })
        .await
    }

    async fn conditional_update(
        &self,
        id: ItemIdRef<'_>,
        expected: Version,
        mut item: Item,
    ) -> Result<Versioned<Item>, StoreError> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let columns = ItemColumns::new(&item)?;
            let expected_db = to_db(expected)?;
            let mut tx = conn.transaction().context("failed to start transaction")?;

            let mut params: Vec<&(dyn ToSql + Sync)> = vec![&id, &expected_db];
            params.extend(columns.params());
            let updated = tx
                .execute(
                    "UPDATE items SET version = version + 1, title = $3, description = $4, \
                     status = $5, price = $6, current_bid = $7, current_bidder = $8, \
                     mine_claimed_by = $9, mine_claimed_by_name = $10, mine_claimed_at = $11, \
                     grab_claimed_by = $12, grab_claimed_by_name = $13, grab_claimed_at = $14, \
                     created_at = $15, updated_at = $16, sold_at = $17 \
                     WHERE id = $1 AND version = $2",
                    &params,
                )
                .context("failed to update item")?;

            if updated == 0 {
                return Err(version_mismatch(&mut tx, id, expected)?);
            }

            let stored = load_history(&mut tx, std::slice::from_ref(&id))?
                .remove(&id)
                .unwrap_or_default();
            if !item.bid_history.starts_with(&stored) {
                return Err(format_err!("bid history of {id} is append-only").into());
            }
            append_history(&mut tx, &id, stored.len(), &item.bid_history[stored.len()..])?;
            tx.commit().context("failed to commit item update")?;

            item.id = id;
            Ok(Versioned {
                version: expected + 1,
                data: item,
            })
        })
        .await
    }

    async fn conditional_delete(
        &self,
        id: ItemIdRef<'_>,
        expected: Version,
    ) -> Result<(), StoreError> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let expected_db = to_db(expected)?;
            let mut tx = conn.transaction().context("failed to start transaction")?;
            let deleted = tx
                .execute(
                    "DELETE FROM items WHERE id = $1 AND version = $2",
                    &[&id, &expected_db],
                )
                .context("failed to delete item")?;
            if deleted == 0 {
                return Err(version_mismatch(&mut tx, id, expected)?);
            }
            tx.commit().context("failed to commit item delete")?;
            Ok(())
        })
        .await
    }
}
