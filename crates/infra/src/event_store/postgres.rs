//! Postgres-backed event store implementation.
//!
//! ## Schema
//!
//! See [`SCHEMA`]. `events` is keyed by `(instance_id, aggregate_type,
//! aggregate_id, sequence)`; `position` is a global sequence. Claims live in
//! `unique_constraints`, keyed by `(instance_id, unique_type, unique_field)`
//! with `instance_id = ''` for global claims.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) on `events` | `23505` | `Concurrency` | Another push took the same sequence |
//! | Database (check constraint violation) | `23514` | `InvalidPush` | Invalid data (e.g. sequence <= 0) |
//! | Database (other) | Any other | `Database` | |
//! | PoolClosed / network / other | N/A | `Database` | |
//!
//! Colliding claims are detected with `ON CONFLICT DO NOTHING` and reported
//! as `UniqueConstraint` with the claim's own message.
//!
//! ## Atomicity
//!
//! A push runs in one transaction. Dropping the push future before commit
//! (cancellation) drops the transaction, which rolls it back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{field, instrument, Span};

use irongate_core::{AggregateRef, StreamKey};
use irongate_events::{Order, SearchQuery, UniqueAction, UniqueConstraint};

use super::r#trait::{stream_expectations, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Tables used by [`PostgresEventStore`]. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    instance_id     TEXT        NOT NULL,
    aggregate_type  TEXT        NOT NULL,
    aggregate_id    TEXT        NOT NULL,
    sequence        BIGINT      NOT NULL CHECK (sequence > 0),
    position        BIGSERIAL   NOT NULL UNIQUE,
    event_type      TEXT        NOT NULL,
    owner           TEXT        NOT NULL,
    creator         TEXT        NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    payload         JSONB       NOT NULL,
    PRIMARY KEY (instance_id, aggregate_type, aggregate_id, sequence)
);

CREATE INDEX IF NOT EXISTS events_instance_position ON events (instance_id, position);
CREATE INDEX IF NOT EXISTS events_owner ON events (instance_id, owner, aggregate_type);

CREATE TABLE IF NOT EXISTS unique_constraints (
    instance_id   TEXT NOT NULL,
    unique_type   TEXT NOT NULL,
    unique_field  TEXT NOT NULL,
    PRIMARY KEY (instance_id, unique_type, unique_field)
);
"#;

/// Postgres-backed event store.
///
/// ## Optimistic Concurrency
///
/// `push()` locks the head row of every touched aggregate (`FOR UPDATE`),
/// compares its sequence with the expectation and inserts the new events.
/// Two pushes creating the same aggregate have no row to lock; the primary key
/// on `(…, sequence)` makes the second insert fail, which is reported as a
/// concurrency error as well.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connects and makes sure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, query),
        fields(instances = ?query.instance_ids, sub_queries = query.sub_queries.len(), event_count = field::Empty),
        err
    )]
    async fn filter(&self, query: &SearchQuery) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut sql = select_events(query);
        let rows = sql
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("filter", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredEventRow::from_row(&row)
                .map_err(|e| EventStoreError::Database(format!("failed to deserialize event row: {e}")))?;
            events.push(stored.into());
        }

        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), aggregates = field::Empty),
        err
    )]
    async fn push(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let expectations = stream_expectations(&events)?;
        Span::current().record("aggregates", expectations.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Stream keys come sorted out of the map, so concurrent pushes lock
        // aggregates in the same order.
        let mut sequences = std::collections::HashMap::with_capacity(expectations.len());
        for (key, expected) in &expectations {
            let head = lock_stream_head(&mut tx, key).await?;
            let current = head.as_ref().map(|h| h.0).unwrap_or(0);
            if let Some(seq) = expected.sequence {
                if seq != current {
                    return Err(EventStoreError::Concurrency(format!(
                        "{}/{}: expected sequence {seq}, found {current}",
                        key.aggregate_type, key.aggregate_id
                    )));
                }
            }
            if let Some((_, owner)) = &head {
                if owner != &expected.owner {
                    return Err(EventStoreError::InvalidPush(format!(
                        "{}/{}: owner is '{owner}', push uses '{}'",
                        key.aggregate_type, key.aggregate_id, expected.owner
                    )));
                }
            }
            sequences.insert(key.clone(), current);
        }

        let created_at = Utc::now();
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let sequence = sequences.entry(e.aggregate.stream_key()).or_default();
            *sequence += 1;

            let position: i64 = sqlx::query(
                r#"
                INSERT INTO events (
                    instance_id,
                    aggregate_type,
                    aggregate_id,
                    sequence,
                    event_type,
                    owner,
                    creator,
                    created_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING position
                "#,
            )
            .bind(&e.aggregate.instance_id)
            .bind(&e.aggregate.aggregate_type)
            .bind(&e.aggregate.id)
            .bind(*sequence as i64)
            .bind(&e.event_type)
            .bind(&e.aggregate.owner)
            .bind(&e.creator)
            .bind(created_at)
            .bind(&e.payload)
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get::<i64, _>("position"))
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EventStoreError::Concurrency(format!(
                        "concurrent push detected: {} sequence {} already exists",
                        e.aggregate, sequence
                    ))
                } else {
                    map_sqlx_error("insert_event", err)
                }
            })?;

            for op in &e.unique_constraints {
                apply_constraint(&mut tx, &e.aggregate.instance_id, op).await?;
            }

            committed.push(StoredEvent {
                aggregate: e.aggregate,
                event_type: e.event_type,
                sequence: *sequence,
                position: position as u64,
                created_at,
                creator: e.creator,
                payload: e.payload,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }
}

/// Current `(sequence, owner)` of a stream, locking its head row.
async fn lock_stream_head(
    tx: &mut Transaction<'_, Postgres>,
    key: &StreamKey,
) -> Result<Option<(u64, String)>, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT sequence, owner
        FROM events
        WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
        ORDER BY sequence DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(&key.instance_id)
    .bind(&key.aggregate_type)
    .bind(&key.aggregate_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_stream_head", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| EventStoreError::Database(format!("failed to read sequence: {e}")))?;
    let owner: String = row
        .try_get("owner")
        .map_err(|e| EventStoreError::Database(format!("failed to read owner: {e}")))?;
    Ok(Some((sequence as u64, owner)))
}

async fn apply_constraint(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: &str,
    op: &UniqueConstraint,
) -> Result<(), EventStoreError> {
    match op.action {
        UniqueAction::Add => {
            let key = op.key(instance_id);
            let inserted = sqlx::query(
                r#"
                INSERT INTO unique_constraints (instance_id, unique_type, unique_field)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&key.instance_id)
            .bind(&key.unique_type)
            .bind(&key.unique_field)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("add_unique_constraint", e))?;
            if inserted.rows_affected() == 0 {
                return Err(EventStoreError::UniqueConstraint {
                    message: op.error_message.clone(),
                });
            }
        }
        UniqueAction::Remove => {
            let key = op.key(instance_id);
            sqlx::query(
                r#"
                DELETE FROM unique_constraints
                WHERE instance_id = $1 AND unique_type = $2 AND unique_field = $3
                "#,
            )
            .bind(&key.instance_id)
            .bind(&key.unique_type)
            .bind(&key.unique_field)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("remove_unique_constraint", e))?;
        }
        UniqueAction::RemoveInstance => {
            sqlx::query("DELETE FROM unique_constraints WHERE instance_id = $1")
                .bind(instance_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("remove_instance_constraints", e))?;
        }
    }
    Ok(())
}

/// Translates a [`SearchQuery`] into SQL with bound parameters.
fn select_events(query: &SearchQuery) -> QueryBuilder<'static, Postgres> {
    let mut sql = QueryBuilder::new(
        "SELECT instance_id, aggregate_type, aggregate_id, sequence, position, event_type, \
         owner, creator, created_at, payload FROM events WHERE TRUE",
    );

    if !query.instance_ids.is_empty() {
        sql.push(" AND instance_id = ANY(")
            .push_bind(query.instance_ids.clone())
            .push(")");
    }
    if let Some(owner) = &query.owner {
        sql.push(" AND owner = ").push_bind(owner.clone());
    }
    if let Some(creator) = &query.creator {
        sql.push(" AND creator = ").push_bind(creator.clone());
    }
    if let Some(after) = query.created_after {
        sql.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(after) = query.position_after {
        sql.push(" AND position > ").push_bind(after as i64);
    }

    if !query.sub_queries.is_empty() {
        sql.push(" AND (");
        for (idx, sub) in query.sub_queries.iter().enumerate() {
            if idx > 0 {
                sql.push(" OR ");
            }
            sql.push("(TRUE");
            if !sub.aggregate_types.is_empty() {
                sql.push(" AND aggregate_type = ANY(")
                    .push_bind(sub.aggregate_types.clone())
                    .push(")");
            }
            if !sub.aggregate_ids.is_empty() {
                sql.push(" AND aggregate_id = ANY(")
                    .push_bind(sub.aggregate_ids.clone())
                    .push(")");
            }
            if !sub.event_types.is_empty() {
                sql.push(" AND event_type = ANY(")
                    .push_bind(sub.event_types.clone())
                    .push(")");
            }
            if let Some(seq) = sub.sequence_greater {
                sql.push(" AND sequence > ").push_bind(seq as i64);
            }
            if let Some(seq) = sub.sequence_less {
                sql.push(" AND sequence < ").push_bind(seq as i64);
            }
            sql.push(")");
        }
        sql.push(")");
    }

    sql.push(match query.order {
        Order::Asc => " ORDER BY position ASC",
        Order::Desc => " ORDER BY position DESC",
    });
    if let Some(limit) = query.limit {
        sql.push(" LIMIT ").push_bind(limit as i64);
    }
    sql
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidPush(msg),
                _ => EventStoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => EventStoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    instance_id: String,
    aggregate_type: String,
    aggregate_id: String,
    sequence: i64,
    position: i64,
    event_type: String,
    owner: String,
    creator: String,
    created_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for StoredEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            instance_id: row.try_get("instance_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            sequence: row.try_get("sequence")?,
            position: row.try_get("position")?,
            event_type: row.try_get("event_type")?,
            owner: row.try_get("owner")?,
            creator: row.try_get("creator")?,
            created_at: row.try_get("created_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            aggregate: AggregateRef::new(row.aggregate_type, row.aggregate_id, row.instance_id, row.owner),
            event_type: row.event_type,
            sequence: row.sequence as u64,
            position: row.position as u64,
            created_at: row.created_at,
            creator: row.creator,
            payload: row.payload,
        }
    }
}
