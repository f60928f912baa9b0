use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AttrValue, Condition, Index, IncrWrite, Item, ItemKey, Kvs, KvsError, Page, Table, PAGE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    table_tag: u8,
    pk: AttrValue,
    sk: AttrValue,
}

fn table_tag(table: Table) -> u8 {
    match table {
        Table::Romances => 0,
        Table::Counters => 1,
    }
}

/// Deterministic, in-process store used by tests and local runs. Backed by
/// a [`DashMap`] the way `actors::registry::ActorRegistry` keeps its actor
/// table — one flat concurrent map, no sharding logic of its own.
pub struct InMemoryKvs {
    rows: DashMap<RowKey, Item>,
    version_seed: AtomicI64,
}

impl Default for InMemoryKvs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvs {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            version_seed: AtomicI64::new(0),
        }
    }

    fn row_key(table: Table, key: &ItemKey) -> RowKey {
        RowKey {
            table_tag: table_tag(table),
            pk: key.pk.clone(),
            sk: key.sk.clone(),
        }
    }
}

#[async_trait]
impl Kvs for InMemoryKvs {
    async fn get_item(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, KvsError> {
        Ok(self.rows.get(&Self::row_key(table, key)).map(|r| r.clone()))
    }

    async fn put_or_update(
        &self,
        table: Table,
        key: &ItemKey,
        condition: Condition,
        sets: Item,
    ) -> Result<Item, KvsError> {
        let row_key = Self::row_key(table, key);
        let mut entry = self.rows.entry(row_key).or_default();

        match condition {
            Condition::None => {}
            Condition::AttributeNotExists(_) => {
                if !entry.is_empty() {
                    return Err(KvsError::ConditionalCheckFailed);
                }
            }
            Condition::AttributeEquals(attr, expected) => {
                let current = entry.get(attr).and_then(|v| match v {
                    AttrValue::N(n) => Some(*n),
                    _ => None,
                });
                if current != Some(expected) {
                    return Err(KvsError::ConditionalCheckFailed);
                }
            }
        }

        for (k, v) in sets {
            match v {
                AttrValue::Null => {
                    entry.remove(&k);
                }
                v => {
                    entry.insert(k, v);
                }
            }
        }
        let _ = self.version_seed.fetch_add(1, Ordering::Relaxed);
        Ok(entry.clone())
    }

    async fn delete_item(&self, table: Table, key: &ItemKey) -> Result<(), KvsError> {
        self.rows.remove(&Self::row_key(table, key));
        Ok(())
    }

    async fn query(
        &self,
        table: Table,
        index: Index,
        partition: AttrValue,
        sort_from: Option<AttrValue>,
        cursor: Option<ItemKey>,
    ) -> Result<Page, KvsError> {
        let tag = table_tag(table);
        let mut matches: Vec<(RowKey, Item)> = self
            .rows
            .iter()
            .filter(|e| e.key().table_tag == tag)
            .filter(|e| {
                let part = match index {
                    Index::Primary => &e.key().pk,
                    Index::GsiByMaxMinUser => &e.key().sk,
                };
                *part == partition
            })
            .filter(|e| match &sort_from {
                Some(from) => {
                    let sort_val = match index {
                        Index::Primary => &e.key().sk,
                        Index::GsiByMaxMinUser => &e.key().pk,
                    };
                    sort_val >= from
                }
                None => true,
            })
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        matches.sort_by(|a, b| {
            let sa = match index {
                Index::Primary => &a.0.sk,
                Index::GsiByMaxMinUser => &a.0.pk,
            };
            let sb = match index {
                Index::Primary => &b.0.sk,
                Index::GsiByMaxMinUser => &b.0.pk,
            };
            sa.cmp(sb)
        });

        let start = match &cursor {
            None => 0,
            Some(cur) => matches
                .iter()
                .position(|(rk, _)| rk.pk == cur.pk && rk.sk == cur.sk)
                .map(|i| i + 1)
                .unwrap_or(0),
        };

        let page: Vec<_> = matches.iter().skip(start).take(PAGE_SIZE).cloned().collect();
        let next_cursor = if start + page.len() < matches.len() {
            page.last().map(|(rk, _)| ItemKey::new(rk.pk.clone(), rk.sk.clone()))
        } else {
            None
        };

        Ok(Page {
            items: page.into_iter().map(|(_, item)| item).collect(),
            cursor: next_cursor,
        })
    }

    async fn transact_incr(&self, writes: Vec<IncrWrite>) -> Result<(), KvsError> {
        for write in &writes {
            let row_key = Self::row_key(write.table, &write.key);
            let mut entry = self.rows.entry(row_key).or_default();
            let current = match entry.get(write.attr) {
                Some(AttrValue::N(n)) => *n,
                _ => 0,
            };
            entry.insert(write.attr.to_string(), AttrValue::N(current + 1));
            if let Some(ttl) = write.ttl_epoch_seconds {
                entry.insert("ttl".to_string(), AttrValue::N(ttl));
            }
            for (attr, value) in &write.extra_sets {
                entry.insert(attr.to_string(), value.clone());
            }
        }
        Ok(())
    }

    async fn batch_delete(&self, table: Table, keys: Vec<ItemKey>) -> Result<(), KvsError> {
        for key in keys {
            self.rows.remove(&Self::row_key(table, &key));
        }
        Ok(())
    }
}
