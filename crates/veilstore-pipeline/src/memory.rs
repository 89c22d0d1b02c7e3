//! In-memory implementation of the Backend trait.
//!
//! This is primarily for tests and embedded use. It implements the same
//! procedure surface a PostgreSQL deployment would expose as stored
//! procedures, but keeps everything in memory with no persistence.
//!
//! Procedure names are `verb + tag + field` concatenations, so the backend
//! must know the registered type tags to split them. Everything stored here
//! is ciphertext or hashes; the backend never inspects plaintext.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::backend::{Backend, BatchEntry};
use crate::error::{PipelineError, Result};
use crate::statement::{RowSet, Statement, Value};

type Record = HashMap<String, Value>;

/// In-memory backend.
///
/// All data is lost when the backend is dropped. Thread-safe via RwLock.
pub struct MemoryBackend {
    /// Registered type tags, longest first so prefix matching is unambiguous.
    tags: Vec<&'static str>,
    inner: RwLock<Inner>,
}

struct Inner {
    /// One table per tag, rows keyed by id.
    tables: HashMap<&'static str, BTreeMap<i64, Record>>,
    /// Name escrow, keyed by the deposit hash.
    escrow: HashMap<Vec<u8>, Vec<u8>>,
    /// Monotonic id allocator shared by all tables.
    next_id: i64,
}

impl MemoryBackend {
    /// Create a backend that understands the given type tags.
    pub fn with_tags(tags: &[&'static str]) -> Self {
        let mut tags: Vec<&'static str> = tags.to_vec();
        tags.sort_by_key(|t| std::cmp::Reverse(t.len()));
        Self {
            tags,
            inner: RwLock::new(Inner {
                tables: HashMap::new(),
                escrow: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Split `rest` into `(tag, suffix)` against the registered tags.
    fn split_tag<'a>(&self, rest: &'a str) -> Option<(&'static str, &'a str)> {
        self.tags
            .iter()
            .find(|tag| rest.starts_with(**tag))
            .map(|tag| (*tag, &rest[tag.len()..]))
    }

    fn dispatch(&self, stmt: &Statement) -> Result<RowSet> {
        let call = stmt.call.as_str();

        if call == "depositsharedname" {
            return self.deposit_shared_name(stmt);
        }
        if call == "searchsharedname" {
            return self.search_shared_name(stmt);
        }

        for verb in ["create", "remove", "giveaccess", "verify", "save", "get", "load"] {
            if let Some(rest) = call.strip_prefix(verb) {
                let (tag, field) = self.split_tag(rest).ok_or_else(|| {
                    PipelineError::UnknownProcedure(stmt.call.clone())
                })?;
                return match verb {
                    "create" if field.is_empty() => self.create(tag, stmt),
                    "remove" if field.is_empty() => self.remove(tag, stmt),
                    "giveaccess" if field.is_empty() => self.update(tag, stmt),
                    "verify" => self.get_column(tag, &format!("{field}verification"), stmt),
                    "save" => self.update(tag, stmt),
                    "get" => self.get(tag, field, stmt),
                    "load" => self.load(tag, field, stmt),
                    _ => Err(PipelineError::UnknownProcedure(stmt.call.clone())),
                };
            }
        }

        Err(PipelineError::UnknownProcedure(stmt.call.clone()))
    }

    fn require_id(stmt: &Statement) -> Result<i64> {
        stmt.param("id")
            .and_then(Value::as_bigint)
            .ok_or_else(|| PipelineError::BadArguments {
                procedure: stmt.call.clone(),
                reason: "missing bigint parameter `id`".into(),
            })
    }

    fn require_bytes<'a>(stmt: &'a Statement, name: &str) -> Result<&'a [u8]> {
        stmt.param(name)
            .and_then(Value::as_bytes)
            .ok_or_else(|| PipelineError::BadArguments {
                procedure: stmt.call.clone(),
                reason: format!("missing bytea parameter `{name}`"),
            })
    }

    fn create(&self, tag: &'static str, stmt: &Statement) -> Result<RowSet> {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;

        let record: Record = stmt
            .params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        inner.tables.entry(tag).or_default().insert(id, record);

        Ok(RowSet::single(vec![Some(Value::BigInt(id))]))
    }

    fn remove(&self, tag: &'static str, stmt: &Statement) -> Result<RowSet> {
        let id = Self::require_id(stmt)?;
        let mut inner = self.inner.write().unwrap();
        let removed = inner
            .tables
            .get_mut(tag)
            .and_then(|table| table.remove(&id))
            .is_some();
        Ok(RowSet::single(vec![Some(Value::Int(removed as i32))]))
    }

    /// Shared by `save{t}{field}` and `giveaccess{t}`: every parameter but
    /// `id` is written as a column.
    fn update(&self, tag: &'static str, stmt: &Statement) -> Result<RowSet> {
        let id = Self::require_id(stmt)?;
        let mut inner = self.inner.write().unwrap();
        let Some(record) = inner.tables.get_mut(tag).and_then(|t| t.get_mut(&id)) else {
            return Ok(RowSet::single(vec![Some(Value::Int(0))]));
        };
        for (name, value) in &stmt.params {
            if *name != "id" {
                record.insert(name.to_string(), value.clone());
            }
        }
        Ok(RowSet::single(vec![Some(Value::Int(1))]))
    }

    fn get(&self, tag: &'static str, field: &str, stmt: &Statement) -> Result<RowSet> {
        let id = Self::require_id(stmt)?;
        let inner = self.inner.read().unwrap();
        let Some(record) = inner.tables.get(tag).and_then(|t| t.get(&id)) else {
            return Ok(RowSet::empty());
        };

        // Link rows answer two of their getters with multi-column rows.
        if field == "access" && record.contains_key("childaccess") {
            return Ok(RowSet::single(vec![
                record.get("childaccess").cloned(),
                record.get("parentaccess").cloned(),
            ]));
        }
        if field == "child" && record.contains_key("childhash") {
            return Ok(RowSet::single(vec![
                record.get("child").cloned(),
                record.get("childhash").cloned(),
                record.get("privateaccess").cloned(),
            ]));
        }

        Ok(RowSet::single(vec![record.get(field).cloned()]))
    }

    fn get_column(&self, tag: &'static str, column: &str, stmt: &Statement) -> Result<RowSet> {
        let id = Self::require_id(stmt)?;
        let inner = self.inner.read().unwrap();
        let Some(record) = inner.tables.get(tag).and_then(|t| t.get(&id)) else {
            return Ok(RowSet::empty());
        };
        Ok(RowSet::single(vec![record.get(column).cloned()]))
    }

    fn load(&self, tag: &'static str, field: &str, stmt: &Statement) -> Result<RowSet> {
        match field {
            "items" => {
                let parent = Self::require_bytes(stmt, "parent")?;
                self.scan(tag, |record| {
                    record.get("parent").and_then(Value::as_bytes) == Some(parent)
                })
            }
            "children" => {
                let parent = Self::require_bytes(stmt, "parent")?;
                self.scan(tag, |record| {
                    record.get("parenthash").and_then(Value::as_bytes) == Some(parent)
                })
            }
            "parents" => {
                let public_child = Self::require_bytes(stmt, "publicchild")?;
                let child = Self::require_bytes(stmt, "child")?;
                self.scan(tag, |record| {
                    let hash = record.get("childhash").and_then(Value::as_bytes);
                    hash == Some(child) || hash == Some(public_child)
                })
            }
            ranged => {
                // `load{schedule}{child}s`: tag is the schedule's, the rows
                // live in the child's table.
                let child_tag = ranged
                    .strip_suffix('s')
                    .and_then(|t| self.tags.iter().find(|tag| **tag == t))
                    .copied()
                    .ok_or_else(|| PipelineError::UnknownProcedure(stmt.call.clone()))?;
                self.load_ranged(child_tag, stmt)
            }
        }
    }

    fn scan(&self, tag: &'static str, pred: impl Fn(&Record) -> bool) -> Result<RowSet> {
        let inner = self.inner.read().unwrap();
        let rows = inner
            .tables
            .get(tag)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, record)| pred(record))
                    .map(|(id, _)| crate::statement::Row(vec![Some(Value::BigInt(*id))]))
                    .collect()
            })
            .unwrap_or_default();
        Ok(RowSet { rows })
    }

    /// Ranged child loading for schedules.
    ///
    /// The row stores only its additive term and the obfuscated position
    /// `pos = ticks / pm / (pa + row_pa)`; with the schedule secrets passed
    /// in per query, the true tick count is reconstructed as
    /// `pos * pm * (pa + row_pa)` and filtered against the window.
    fn load_ranged(&self, child_tag: &'static str, stmt: &Statement) -> Result<RowSet> {
        let parent = Self::require_bytes(stmt, "hash")?;
        let bad = |name: &str| PipelineError::BadArguments {
            procedure: stmt.call.clone(),
            reason: format!("missing parameter `{name}`"),
        };
        let pa = stmt
            .param("pa")
            .and_then(Value::as_double)
            .ok_or_else(|| bad("pa"))?;
        let pm = stmt
            .param("pm")
            .and_then(Value::as_double)
            .ok_or_else(|| bad("pm"))?;
        let start = stmt
            .param("starttime")
            .and_then(Value::as_bigint)
            .ok_or_else(|| bad("starttime"))?;
        let end = stmt
            .param("endtime")
            .and_then(Value::as_bigint)
            .ok_or_else(|| bad("endtime"))?;
        let count = stmt
            .param("count")
            .and_then(Value::as_int)
            .ok_or_else(|| bad("count"))?;

        let inner = self.inner.read().unwrap();
        let mut hits: Vec<(f64, i64)> = inner
            .tables
            .get(child_tag)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, record)| {
                        record.get("parent").and_then(Value::as_bytes) == Some(parent)
                    })
                    .filter_map(|(id, record)| {
                        let row_pa = record.get("pa").and_then(Value::as_double)?;
                        let pos = record.get("pm").and_then(Value::as_double)?;
                        let ticks = pos * pm * (pa + row_pa);
                        (ticks >= start as f64 && ticks <= end as f64).then_some((ticks, *id))
                    })
                    .collect()
            })
            .unwrap_or_default();

        hits.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(count.max(0) as usize);

        Ok(RowSet {
            rows: hits
                .into_iter()
                .map(|(_, id)| crate::statement::Row(vec![Some(Value::BigInt(id))]))
                .collect(),
        })
    }

    fn deposit_shared_name(&self, stmt: &Statement) -> Result<RowSet> {
        let hash = Self::require_bytes(stmt, "hash")?.to_vec();
        let blob = Self::require_bytes(stmt, "name")?.to_vec();
        let mut inner = self.inner.write().unwrap();
        inner.escrow.insert(hash, blob);
        Ok(RowSet::single(vec![Some(Value::Int(1))]))
    }

    fn search_shared_name(&self, stmt: &Statement) -> Result<RowSet> {
        let public_hash = Self::require_bytes(stmt, "publichash")?;
        let inner = self.inner.read().unwrap();
        match inner.escrow.get(public_hash) {
            Some(blob) => Ok(RowSet::single(vec![Some(Value::Bytes(blob.clone()))])),
            None => Ok(RowSet::empty()),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(&self, batch: &[BatchEntry]) -> Result<Vec<(u32, RowSet)>> {
        let mut results = Vec::with_capacity(batch.len());
        for (correlation, stmt) in batch {
            results.push((*correlation, self.dispatch(stmt)?));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::with_tags(&["account", "planner", "appointment", "accountplannerlink"])
    }

    async fn run(backend: &MemoryBackend, stmt: Statement) -> RowSet {
        let results = backend.execute(&[(0, stmt)]).await.unwrap();
        results.into_iter().next().unwrap().1
    }

    #[tokio::test]
    async fn test_create_allocates_monotonic_ids() {
        let backend = backend();
        let first = run(
            &backend,
            Statement::new("createaccount", vec![("hash", Value::Bytes(vec![1]))]),
        )
        .await;
        let second = run(
            &backend,
            Statement::new("createplanner", vec![("hash", Value::Bytes(vec![2]))]),
        )
        .await;
        let a = first.first().unwrap().bigint(0).unwrap();
        let b = second.first().unwrap().bigint(0).unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_get_returns_stored_column() {
        let backend = backend();
        let created = run(
            &backend,
            Statement::new("createaccount", vec![("name", Value::Bytes(vec![9, 9]))]),
        )
        .await;
        let id = created.first().unwrap().bigint(0).unwrap();

        let got = run(
            &backend,
            Statement::new("getaccountname", vec![("id", Value::BigInt(id))]),
        )
        .await;
        assert_eq!(got.first().unwrap().bytes(0), Some(&[9u8, 9][..]));

        // Absent column resolves to NULL, absent row to no rows.
        let null = run(
            &backend,
            Statement::new("getaccountdata", vec![("id", Value::BigInt(id))]),
        )
        .await;
        assert!(null.first().unwrap().get(0).is_none());
        let missing = run(
            &backend,
            Statement::new("getaccountname", vec![("id", Value::BigInt(id + 100))]),
        )
        .await;
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_link_getters_are_multicolumn() {
        let backend = backend();
        let created = run(
            &backend,
            Statement::new(
                "createaccountplannerlink",
                vec![
                    ("child", Value::Bytes(vec![1])),
                    ("childaccess", Value::Bytes(vec![2])),
                    ("childhash", Value::Bytes(vec![3])),
                    ("parentaccess", Value::Bytes(vec![4])),
                    ("privateaccess", Value::Bytes(vec![5])),
                ],
            ),
        )
        .await;
        let id = created.first().unwrap().bigint(0).unwrap();

        let access = run(
            &backend,
            Statement::new("getaccountplannerlinkaccess", vec![("id", Value::BigInt(id))]),
        )
        .await;
        let row = access.first().unwrap();
        assert_eq!(row.bytes(0), Some(&[2u8][..]));
        assert_eq!(row.bytes(1), Some(&[4u8][..]));

        let child = run(
            &backend,
            Statement::new("getaccountplannerlinkchild", vec![("id", Value::BigInt(id))]),
        )
        .await;
        let row = child.first().unwrap();
        assert_eq!(row.bytes(0), Some(&[1u8][..]));
        assert_eq!(row.bytes(1), Some(&[3u8][..]));
        assert_eq!(row.bytes(2), Some(&[5u8][..]));
    }

    #[tokio::test]
    async fn test_save_and_verify_roundtrip() {
        let backend = backend();
        let created = run(&backend, Statement::new("createaccount", vec![])).await;
        let id = created.first().unwrap().bigint(0).unwrap();

        run(
            &backend,
            Statement::new(
                "saveaccountname",
                vec![
                    ("id", Value::BigInt(id)),
                    ("name", Value::Bytes(vec![7])),
                    ("nameverification", Value::Bytes(vec![8])),
                ],
            ),
        )
        .await;

        let sig = run(
            &backend,
            Statement::new("verifyaccountname", vec![("id", Value::BigInt(id))]),
        )
        .await;
        assert_eq!(sig.first().unwrap().bytes(0), Some(&[8u8][..]));
    }

    #[tokio::test]
    async fn test_escrow_deposit_and_search() {
        let backend = backend();
        run(
            &backend,
            Statement::new(
                "depositsharedname",
                vec![
                    ("hash", Value::Bytes(vec![1, 2, 3])),
                    ("name", Value::Bytes(vec![42])),
                ],
            ),
        )
        .await;

        let found = run(
            &backend,
            Statement::new(
                "searchsharedname",
                vec![
                    ("publichash", Value::Bytes(vec![1, 2, 3])),
                    ("hash", Value::Bytes(vec![0])),
                ],
            ),
        )
        .await;
        assert_eq!(found.first().unwrap().bytes(0), Some(&[42u8][..]));
    }

    #[tokio::test]
    async fn test_ranged_load_filters_and_sorts() {
        let backend = backend();
        let pa = 683000.0_f64;
        let pm = 683100.0_f64;
        let parent = vec![0xAA];

        for (row_pa, ticks) in [(100.0_f64, 5_000_000_000_000.0_f64), (250.0, 1_000_000_000_000.0)] {
            let pos = ticks / pm / (pa + row_pa);
            run(
                &backend,
                Statement::new(
                    "createappointment",
                    vec![
                        ("parent", Value::Bytes(parent.clone())),
                        ("pa", Value::Double(row_pa)),
                        ("pm", Value::Double(pos)),
                    ],
                ),
            )
            .await;
        }

        let loaded = run(
            &backend,
            Statement::new(
                "loadplannerappointments",
                vec![
                    ("hash", Value::Bytes(parent)),
                    ("pa", Value::Double(pa)),
                    ("pm", Value::Double(pm)),
                    ("starttime", Value::BigInt(0)),
                    ("endtime", Value::BigInt(2_000_000_000_000)),
                    ("count", Value::Int(10)),
                ],
            ),
        )
        .await;

        // Only the second row falls inside the window.
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.first().unwrap().bigint(0), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_procedure_rejected() {
        let backend = backend();
        let err = backend
            .execute(&[(0, Statement::new("frobnicate", vec![]))])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownProcedure(_)));
    }
}
