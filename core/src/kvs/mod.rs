//! A document-store port modeled on the primitives the original system
//! actually ran against (a DynamoDB-style item store): get/put-with-condition
//! returning the new item, delete, index-aware paginated query, and a
//! bounded-size atomic multi-row increment used by the counters repository.
//!
//! Two backends implement this port: [`memory::InMemoryKvs`] for tests and
//! local runs, and [`postgres::PostgresKvs`] for production, which encodes
//! the same conditional-update semantics as a `WHERE version = $n` guard —
//! the same compare-and-swap idiom the rest of this codebase's optimistic
//! concurrency already relies on.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The two tables this service persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Romances,
    Counters,
}

/// Romance rows are reachable by their primary key or, for peer
/// enumeration, by a secondary index over the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    Primary,
    GsiByMaxMinUser,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttrValue {
    S(String),
    N(i64),
    U(Uuid),
    /// Present only in a `put_or_update` `sets` map, never in a stored or
    /// returned item: clears the named attribute instead of writing it,
    /// the port's equivalent of DynamoDB's `REMOVE`.
    Null,
}

impl std::hash::Hash for AttrValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            AttrValue::S(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            AttrValue::N(n) => {
                1u8.hash(state);
                n.hash(state);
            }
            AttrValue::U(u) => {
                2u8.hash(state);
                u.hash(state);
            }
            AttrValue::Null => {
                3u8.hash(state);
            }
        }
    }
}

pub type Item = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    pub pk: AttrValue,
    pub sk: AttrValue,
}

impl ItemKey {
    pub fn new(pk: AttrValue, sk: AttrValue) -> Self {
        Self { pk, sk }
    }
}

/// A precondition on [`Kvs::put_or_update`]. Corresponds to a DynamoDB
/// `ConditionExpression`, reduced to the two shapes this service needs.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Always succeeds — an unconditional upsert.
    None,
    /// Succeeds only if the item does not yet exist (first write).
    AttributeNotExists(&'static str),
    /// Succeeds only if the named numeric attribute currently equals the
    /// given value — the optimistic-concurrency guard.
    AttributeEquals(&'static str, i64),
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub cursor: Option<ItemKey>,
}

/// One row of an atomic "increment this counter attribute by one" batch,
/// the only multi-item transaction this service performs. `extra_sets` are
/// additional attributes written unconditionally alongside the increment —
/// used to make a row self-describing the way `romance`'s stored `a`/`b`
/// attributes are, so a caller that gets rows back from [`Kvs::query`]
/// (which echoes no key back) can still tell which row is which.
#[derive(Debug, Clone)]
pub struct IncrWrite {
    pub table: Table,
    pub key: ItemKey,
    pub attr: &'static str,
    pub ttl_epoch_seconds: Option<i64>,
    pub extra_sets: Vec<(&'static str, AttrValue)>,
}

#[derive(Debug, thiserror::Error)]
pub enum KvsError {
    #[error("conditional check failed")]
    ConditionalCheckFailed,
    #[error("item not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Kvs: Send + Sync {
    async fn get_item(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, KvsError>;

    /// Applies `sets` to the item at `key`, creating it if absent, and
    /// returns the resulting item (DynamoDB's `ReturnValues=ALL_NEW`).
    /// Fails with [`KvsError::ConditionalCheckFailed`] if `condition` does
    /// not hold.
    async fn put_or_update(
        &self,
        table: Table,
        key: &ItemKey,
        condition: Condition,
        sets: Item,
    ) -> Result<Item, KvsError>;

    async fn delete_item(&self, table: Table, key: &ItemKey) -> Result<(), KvsError>;

    /// Queries `table` via `index` for items whose partition matches
    /// `partition` in ascending sort-key order, starting after `cursor` if
    /// given, and whose sort key is `>= sort_from` if given. Each call to
    /// this method returns one page; pass back `Page::cursor` to continue.
    async fn query(
        &self,
        table: Table,
        index: Index,
        partition: AttrValue,
        sort_from: Option<AttrValue>,
        cursor: Option<ItemKey>,
    ) -> Result<Page, KvsError>;

    /// Applies every write atomically: all succeed or none do. Each write
    /// increments `attr` by one, creating the row (and setting `attr` to 1)
    /// if it does not exist yet.
    async fn transact_incr(&self, writes: Vec<IncrWrite>) -> Result<(), KvsError>;

    /// Deletes up to 25 items from `table` in one batch.
    async fn batch_delete(&self, table: Table, keys: Vec<ItemKey>) -> Result<(), KvsError>;
}

pub const BATCH_DELETE_LIMIT: usize = 25;
pub const PAGE_SIZE: usize = 25;
