// SPDX-License-Identifier: MIT
//! Durable span storage — one SQLite row per ended span.
//!
//! Inserts are batched inside a single transaction with
//! `ON CONFLICT(id) DO NOTHING`, so repeated flush attempts of the same
//! record are safe.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use crate::span::{attrs_from_json, SpanEvent, SpanKind, SpanRecord, SpanStatus};
use crate::tracer::SpanQuery;

/// Raw row shape as stored.  JSON payloads stay serialized until conversion.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SpanRow {
    id: String,
    trace_id: String,
    parent_span_id: Option<String>,
    name: String,
    kind: String,
    start_time: String,
    end_time: Option<String>,
    duration_ms: Option<i64>,
    status_code: String,
    status_message: Option<String>,
    attributes: String,
    events: String,
    agent_id: String,
    project_id: String,
    classification: String,
    redacted: bool,
    #[allow(dead_code)]
    created_at: String,
}

impl SpanRow {
    /// Convert a stored row back into a record.  Rows whose timestamps no
    /// longer parse are dropped, not fatal.
    fn into_record(self) -> Option<SpanRecord> {
        let start_time = parse_ts(&self.start_time)?;
        let end_time = self.end_time.as_deref().and_then(parse_ts)?;
        Some(SpanRecord {
            span_id: self.id,
            trace_id: self.trace_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            kind: SpanKind::parse(&self.kind),
            start_time,
            end_time,
            duration_ms: self.duration_ms.unwrap_or(0),
            status: SpanStatus::parse(&self.status_code),
            status_message: self.status_message,
            attributes: attrs_from_json(&self.attributes),
            events: events_from_json(&self.events),
            agent_id: self.agent_id,
            project_id: self.project_id,
            classification: self.classification,
            redacted: self.redacted,
        })
    }
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn events_from_json(raw: &str) -> Vec<SpanEvent> {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            Some(SpanEvent {
                name: obj.get("name")?.as_str()?.to_string(),
                timestamp: parse_ts(obj.get("timestamp")?.as_str()?)?,
                attributes: obj
                    .get("attributes")
                    .and_then(|a| a.as_object())
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

// ─── SpanStore ────────────────────────────────────────────────────────────────

/// Span persistence over a shared SQLite pool (cheap to clone — Arc-backed).
#[derive(Clone)]
pub struct SpanStore {
    pool: SqlitePool,
}

impl SpanStore {
    /// Wrap an existing pool.  Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) `spans.db` under `data_dir` with WAL journaling and
    /// run the schema migration.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("create span store dir: {}", data_dir.display()))?;
        let db_path = data_dir.join("spans.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Return a clone of the connection pool.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn migrate(&self) -> Result<()> {
        let stmts = [
            r"CREATE TABLE IF NOT EXISTS spans (
                id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                parent_span_id TEXT,
                name TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'INTERNAL',
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_ms INTEGER,
                status_code TEXT NOT NULL DEFAULT 'UNSET',
                status_message TEXT,
                attributes TEXT NOT NULL DEFAULT '{}',
                events TEXT NOT NULL DEFAULT '[]',
                agent_id TEXT NOT NULL DEFAULT '',
                project_id TEXT NOT NULL DEFAULT '',
                classification TEXT NOT NULL DEFAULT '',
                redacted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id)",
            "CREATE INDEX IF NOT EXISTS idx_spans_project ON spans(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_spans_start ON spans(start_time)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("Creating spans table")?;
        }

        // Databases created before the redacted column existed get it via
        // ALTER; SQLite has no ADD COLUMN IF NOT EXISTS, so the duplicate
        // column error is ignored.
        let altered = sqlx::query("ALTER TABLE spans ADD COLUMN redacted INTEGER NOT NULL DEFAULT 0")
            .execute(&self.pool)
            .await;
        if let Err(e) = altered {
            if !e.to_string().contains("duplicate column") {
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Write a drained batch inside one transaction.
    ///
    /// Conflicting ids are ignored so a repeated flush of the same records
    /// is harmless.  Any error aborts the whole batch — the caller discards
    /// it (drop-on-failure is the contract, not a bug).
    pub async fn insert_batch(&self, records: &[SpanRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.context("Begin span batch")?;
        for record in records {
            sqlx::query(
                r"INSERT INTO spans
                  (id, trace_id, parent_span_id, name, kind, start_time, end_time,
                   duration_ms, status_code, status_message, attributes, events,
                   agent_id, project_id, classification, redacted, created_at)
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                  ON CONFLICT(id) DO NOTHING",
            )
            .bind(&record.span_id)
            .bind(&record.trace_id)
            .bind(&record.parent_span_id)
            .bind(&record.name)
            .bind(record.kind.as_str())
            .bind(record.start_time.to_rfc3339())
            .bind(record.end_time.to_rfc3339())
            .bind(record.duration_ms)
            .bind(record.status.as_str())
            .bind(&record.status_message)
            .bind(record.attributes_json())
            .bind(record.events_json())
            .bind(&record.agent_id)
            .bind(&record.project_id)
            .bind(&record.classification)
            .bind(record.redacted)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("Inserting span")?;
        }
        tx.commit().await.context("Commit span batch")?;
        Ok(())
    }

    /// Filtered read, newest-first, capped at `query.limit`.
    pub async fn query(&self, query: &SpanQuery) -> Result<Vec<SpanRecord>> {
        let mut sql = String::from(
            "SELECT id, trace_id, parent_span_id, name, kind, start_time, end_time, \
             duration_ms, status_code, status_message, attributes, events, \
             agent_id, project_id, classification, redacted, created_at \
             FROM spans WHERE 1 = 1",
        );
        if query.trace_id.is_some() {
            sql.push_str(" AND trace_id = ?");
        }
        if query.project_id.is_some() {
            sql.push_str(" AND project_id = ?");
        }
        if query.name.is_some() {
            sql.push_str(" AND name = ?");
        }
        sql.push_str(" ORDER BY start_time DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, SpanRow>(&sql);
        if let Some(trace_id) = &query.trace_id {
            q = q.bind(trace_id);
        }
        if let Some(project_id) = &query.project_id {
            q = q.bind(project_id);
        }
        if let Some(name) = &query.name {
            q = q.bind(name);
        }
        q = q.bind(query.limit.max(0));

        let rows = q
            .fetch_all(&self.pool)
            .await
            .context("Querying spans")?;
        Ok(rows.into_iter().filter_map(SpanRow::into_record).collect())
    }

    /// Total stored span count.
    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM spans")
            .fetch_one(&self.pool)
            .await
            .context("Counting spans")?;
        Ok(row.0)
    }

    /// Delete spans recorded more than `days` days ago and return the count.
    /// Pass `0` to skip pruning.
    pub async fn prune_older_than(&self, days: u32) -> Result<u64> {
        if days == 0 {
            return Ok(0);
        }
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days))).to_rfc3339();
        let result = sqlx::query("DELETE FROM spans WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .context("Pruning spans")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{new_span_id, new_trace_id, AttrValue};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn make_store() -> SpanStore {
        // Single connection so the in-memory database is actually shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        let store = SpanStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn record(name: &str, trace_id: &str, project_id: &str) -> SpanRecord {
        let now = Utc::now();
        SpanRecord {
            span_id: new_span_id(),
            trace_id: trace_id.to_string(),
            parent_span_id: None,
            name: name.to_string(),
            kind: SpanKind::Internal,
            start_time: now,
            end_time: now,
            duration_ms: 0,
            status: SpanStatus::Ok,
            status_message: None,
            attributes: vec![("k".to_string(), AttrValue::from("v"))],
            events: Vec::new(),
            agent_id: "agent-1".to_string(),
            project_id: project_id.to_string(),
            classification: "UNCLASSIFIED".to_string(),
            redacted: false,
        }
    }

    #[tokio::test]
    async fn insert_and_query_by_trace() {
        let store = make_store().await;
        let trace = new_trace_id();
        store
            .insert_batch(&[record("a", &trace, "p1"), record("b", &trace, "p1")])
            .await
            .unwrap();
        store
            .insert_batch(&[record("c", &new_trace_id(), "p2")])
            .await
            .unwrap();

        let hits = store.query(&SpanQuery::for_trace(&trace)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|r| r.trace_id == trace));
    }

    #[tokio::test]
    async fn conflicting_ids_are_ignored() {
        let store = make_store().await;
        let rec = record("dup", &new_trace_id(), "p");
        store.insert_batch(&[rec.clone()]).await.unwrap();
        store.insert_batch(&[rec]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_nonexistent_trace_is_empty_not_error() {
        let store = make_store().await;
        let hits = store
            .query(&SpanQuery::for_trace("nonexistent"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn combined_filters_and_limit() {
        let store = make_store().await;
        let trace = new_trace_id();
        let mut batch = Vec::new();
        for _ in 0..5 {
            batch.push(record("op", &trace, "proj"));
        }
        batch.push(record("other", &trace, "proj"));
        store.insert_batch(&batch).await.unwrap();

        let hits = store
            .query(
                &SpanQuery::for_trace(&trace)
                    .with_project("proj")
                    .with_name("op")
                    .with_limit(3),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|r| r.name == "op"));
    }

    #[tokio::test]
    async fn round_trip_preserves_payload() {
        let store = make_store().await;
        let trace = new_trace_id();
        let mut rec = record("payload", &trace, "p");
        rec.redacted = true;
        rec.events.push(SpanEvent {
            name: "exception".to_string(),
            timestamp: Utc::now(),
            attributes: vec![("exception.type".to_string(), AttrValue::from("ValueError"))],
        });
        store.insert_batch(&[rec]).await.unwrap();

        let hits = store.query(&SpanQuery::for_trace(&trace)).await.unwrap();
        assert_eq!(hits.len(), 1);
        let got = &hits[0];
        assert_eq!(got.events.len(), 1);
        assert_eq!(got.events[0].name, "exception");
        assert_eq!(got.agent_id, "agent-1");
        assert_eq!(got.classification, "UNCLASSIFIED");
        assert!(got.redacted);
    }

    #[tokio::test]
    async fn prune_deletes_only_rows_older_than_cutoff() {
        let store = make_store().await;
        store
            .insert_batch(&[
                record("old", &new_trace_id(), "p"),
                record("recent", &new_trace_id(), "p"),
            ])
            .await
            .unwrap();
        let stale = (Utc::now() - chrono::Duration::days(40)).to_rfc3339();
        sqlx::query("UPDATE spans SET created_at = ? WHERE name = 'old'")
            .bind(&stale)
            .execute(&store.pool())
            .await
            .unwrap();

        assert_eq!(store.prune_older_than(30).await.unwrap(), 1);
        let left = store.query(&SpanQuery::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "recent");
    }

    #[tokio::test]
    async fn prune_zero_days_is_noop() {
        let store = make_store().await;
        store
            .insert_batch(&[record("keep", &new_trace_id(), "p")])
            .await
            .unwrap();
        assert_eq!(store.prune_older_than(0).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
