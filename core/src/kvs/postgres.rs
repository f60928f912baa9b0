use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::{PgPool, Row};

use super::{AttrValue, Condition, IncrWrite, Index, Item, ItemKey, Kvs, KvsError, Page, Table, PAGE_SIZE};

fn table_name(table: Table) -> &'static str {
    match table {
        Table::Romances => "kvs_romances",
        Table::Counters => "kvs_counters",
    }
}

/// Encodes an [`AttrValue`] into a string that sorts the same way the
/// original value would, so `ORDER BY`/range comparisons on the `pk`/`sk`
/// text columns behave like they would against a typed column.
fn key_string(v: &AttrValue) -> String {
    match v {
        AttrValue::S(s) => format!("S:{s}"),
        AttrValue::N(n) => format!("N:{n:020}"),
        AttrValue::U(u) => format!("U:{u}"),
        AttrValue::Null => unreachable!("Null is a sets-only sentinel, never a key"),
    }
}

fn decode_key_string(s: &str) -> AttrValue {
    if let Some(rest) = s.strip_prefix("S:") {
        AttrValue::S(rest.to_string())
    } else if let Some(rest) = s.strip_prefix("N:") {
        AttrValue::N(rest.parse().unwrap_or(0))
    } else if let Some(rest) = s.strip_prefix("U:") {
        AttrValue::U(rest.parse().unwrap_or_default())
    } else {
        AttrValue::S(s.to_string())
    }
}

fn attr_to_json(v: &AttrValue) -> Json {
    match v {
        AttrValue::S(s) => serde_json::json!({"t": "S", "v": s}),
        AttrValue::N(n) => serde_json::json!({"t": "N", "v": n}),
        AttrValue::U(u) => serde_json::json!({"t": "U", "v": u.to_string()}),
        AttrValue::Null => serde_json::Value::Null,
    }
}

fn json_to_attr(v: &Json) -> Option<AttrValue> {
    let t = v.get("t")?.as_str()?;
    match t {
        "S" => Some(AttrValue::S(v.get("v")?.as_str()?.to_string())),
        "N" => Some(AttrValue::N(v.get("v")?.as_i64()?)),
        "U" => Some(AttrValue::U(v.get("v")?.as_str()?.parse().ok()?)),
        _ => None,
    }
}

fn item_to_json(item: &Item) -> Json {
    let map: serde_json::Map<String, Json> =
        item.iter().map(|(k, v)| (k.clone(), attr_to_json(v))).collect();
    Json::Object(map)
}

fn json_to_item(v: &Json) -> Item {
    v.as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| json_to_attr(v).map(|av| (k.clone(), av)))
                .collect()
        })
        .unwrap_or_default()
}

/// Postgres-backed implementation of the [`Kvs`] port. Each logical table is
/// a single physical table of `(pk, sk, attrs jsonb)`, with `attrs` holding
/// every non-key attribute — the document-store shape the port describes,
/// laid over `sqlx` the same way the rest of this codebase's repositories
/// do, including row-level locking (`FOR UPDATE`) to make the
/// conditional-update check race-free under concurrent writers.
pub struct PostgresKvs {
    pool: PgPool,
}

impl PostgresKvs {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the backing tables if absent. This crate ships no
    /// `migrations/` directory of its own (it adds no schema the teacher
    /// crate's migration pipeline doesn't already cover elsewhere), so
    /// callers that want the two KVS tables available run this once at
    /// startup.
    pub async fn ensure_schema(&self) -> Result<(), KvsError> {
        for table in [table_name(Table::Romances), table_name(Table::Counters)] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    attrs JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    PRIMARY KEY (pk, sk)
                )"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {table}_sk_pk_idx ON {table} (sk, pk)"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Kvs for PostgresKvs {
    async fn get_item(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, KvsError> {
        let row = sqlx::query(&format!(
            "SELECT attrs FROM {} WHERE pk = $1 AND sk = $2",
            table_name(table)
        ))
        .bind(key_string(&key.pk))
        .bind(key_string(&key.sk))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KvsError::Backend(e.to_string()))?;

        Ok(row.map(|r| json_to_item(&r.get::<Json, _>("attrs"))))
    }

    async fn put_or_update(
        &self,
        table: Table,
        key: &ItemKey,
        condition: Condition,
        sets: Item,
    ) -> Result<Item, KvsError> {
        let name = table_name(table);
        let pk = key_string(&key.pk);
        let sk = key_string(&key.sk);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;

        let existing: Option<Json> = sqlx::query_scalar(&format!(
            "SELECT attrs FROM {name} WHERE pk = $1 AND sk = $2 FOR UPDATE"
        ))
        .bind(&pk)
        .bind(&sk)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| KvsError::Backend(e.to_string()))?;

        match &condition {
            Condition::None => {}
            Condition::AttributeNotExists(_) => {
                if existing.is_some() {
                    return Err(KvsError::ConditionalCheckFailed);
                }
            }
            Condition::AttributeEquals(attr, expected) => {
                let current = existing
                    .as_ref()
                    .and_then(|j| j.get(attr))
                    .and_then(json_to_attr)
                    .and_then(|v| match v {
                        AttrValue::N(n) => Some(n),
                        _ => None,
                    });
                if current != Some(*expected) {
                    return Err(KvsError::ConditionalCheckFailed);
                }
            }
        }

        let mut merged = existing.as_ref().map(json_to_item).unwrap_or_default();
        for (k, v) in sets {
            match v {
                AttrValue::Null => {
                    merged.remove(&k);
                }
                v => {
                    merged.insert(k, v);
                }
            }
        }
        let merged_json = item_to_json(&merged);

        sqlx::query(&format!(
            "INSERT INTO {name} (pk, sk, attrs) VALUES ($1, $2, $3)
             ON CONFLICT (pk, sk) DO UPDATE SET attrs = EXCLUDED.attrs"
        ))
        .bind(&pk)
        .bind(&sk)
        .bind(&merged_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| KvsError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| KvsError::Backend(e.to_string()))?;
        Ok(merged)
    }

    async fn delete_item(&self, table: Table, key: &ItemKey) -> Result<(), KvsError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE pk = $1 AND sk = $2",
            table_name(table)
        ))
        .bind(key_string(&key.pk))
        .bind(key_string(&key.sk))
        .execute(&self.pool)
        .await
        .map_err(|e| KvsError::Backend(e.to_string()))?;
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
        let name = table_name(table);
        let (part_col, sort_col) = match index {
            Index::Primary => ("pk", "sk"),
            Index::GsiByMaxMinUser => ("sk", "pk"),
        };
        let partition_s = key_string(&partition);
        let sort_from_s = sort_from.as_ref().map(key_string);
        let cursor_sort_s = cursor.as_ref().map(|c| {
            key_string(if part_col == "pk" { &c.sk } else { &c.pk })
        });
        let limit = (PAGE_SIZE + 1) as i64;

        let query_str = match (&sort_from_s, &cursor_sort_s) {
            (Some(_), Some(_)) => format!(
                "SELECT pk, sk, attrs FROM {name} WHERE {part_col} = $1 AND {sort_col} >= $2 AND {sort_col} > $3 ORDER BY {sort_col} ASC LIMIT $4"
            ),
            (Some(_), None) => format!(
                "SELECT pk, sk, attrs FROM {name} WHERE {part_col} = $1 AND {sort_col} >= $2 ORDER BY {sort_col} ASC LIMIT $3"
            ),
            (None, Some(_)) => format!(
                "SELECT pk, sk, attrs FROM {name} WHERE {part_col} = $1 AND {sort_col} > $2 ORDER BY {sort_col} ASC LIMIT $3"
            ),
            (None, None) => format!(
                "SELECT pk, sk, attrs FROM {name} WHERE {part_col} = $1 ORDER BY {sort_col} ASC LIMIT $2"
            ),
        };

        let mut q = sqlx::query(&query_str).bind(&partition_s);
        q = match (&sort_from_s, &cursor_sort_s) {
            (Some(from), Some(cur)) => q.bind(from.clone()).bind(cur.clone()).bind(limit),
            (Some(from), None) => q.bind(from.clone()).bind(limit),
            (None, Some(cur)) => q.bind(cur.clone()).bind(limit),
            (None, None) => q.bind(limit),
        };

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;

        let mut decoded: Vec<(String, String, Item)> = rows
            .into_iter()
            .map(|r| {
                let pk: String = r.get("pk");
                let sk: String = r.get("sk");
                let item = json_to_item(&r.get::<Json, _>("attrs"));
                (pk, sk, item)
            })
            .collect();

        let has_more = decoded.len() > PAGE_SIZE;
        if has_more {
            decoded.truncate(PAGE_SIZE);
        }

        let cursor = if has_more {
            decoded
                .last()
                .map(|(pk, sk, _)| ItemKey::new(decode_key_string(pk), decode_key_string(sk)))
        } else {
            None
        };

        Ok(Page {
            items: decoded.into_iter().map(|(_, _, item)| item).collect(),
            cursor,
        })
    }

    async fn transact_incr(&self, writes: Vec<IncrWrite>) -> Result<(), KvsError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;

        for write in &writes {
            let name = table_name(write.table);
            let pk = key_string(&write.key.pk);
            let sk = key_string(&write.key.sk);

            let existing: Option<Json> = sqlx::query_scalar(&format!(
                "SELECT attrs FROM {name} WHERE pk = $1 AND sk = $2 FOR UPDATE"
            ))
            .bind(&pk)
            .bind(&sk)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;

            let mut item = existing.as_ref().map(json_to_item).unwrap_or_default();
            let current = match item.get(write.attr) {
                Some(AttrValue::N(n)) => *n,
                _ => 0,
            };
            item.insert(write.attr.to_string(), AttrValue::N(current + 1));
            if let Some(ttl) = write.ttl_epoch_seconds {
                item.insert("ttl".to_string(), AttrValue::N(ttl));
            }
            for (attr, value) in &write.extra_sets {
                item.insert(attr.to_string(), value.clone());
            }
            let json = item_to_json(&item);

            sqlx::query(&format!(
                "INSERT INTO {name} (pk, sk, attrs) VALUES ($1, $2, $3)
                 ON CONFLICT (pk, sk) DO UPDATE SET attrs = EXCLUDED.attrs"
            ))
            .bind(&pk)
            .bind(&sk)
            .bind(&json)
            .execute(&mut *tx)
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| KvsError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn batch_delete(&self, table: Table, keys: Vec<ItemKey>) -> Result<(), KvsError> {
        let name = table_name(table);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KvsError::Backend(e.to_string()))?;
        for key in keys {
            sqlx::query(&format!("DELETE FROM {name} WHERE pk = $1 AND sk = $2"))
                .bind(key_string(&key.pk))
                .bind(key_string(&key.sk))
                .execute(&mut *tx)
                .await
                .map_err(|e| KvsError::Backend(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| KvsError::Backend(e.to_string()))?;
        Ok(())
    }
}
