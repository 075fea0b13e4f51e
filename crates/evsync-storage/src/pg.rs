//! Postgres-backed [`EventStore`].
//!
//! Uniqueness of the canonical row per `event_id` lives in the schema (a unique partial
//! index), so concurrent sweeps cannot both insert the same event through [`EventStore::upsert`].

use async_trait::async_trait;
use evsync_core::{
    EventId, EventMeta, EventRecord, LocalEventRecord, LocalRecordId, PublicationStatus, WriteAction,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::store::{EventStore, StoreError, UpsertOutcome};

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    /// All rows for an upstream event, canonical first.
    pub async fn records_for(&self, event_id: &EventId) -> Result<Vec<LocalEventRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, canonical, title, body, status, event_id, event_modified,
                   start_date, end_date, event_url, created_at, updated_at
              FROM events
             WHERE event_id = $1
             ORDER BY canonical DESC, created_at
            "#,
        )
        .bind(event_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            out.push(LocalEventRecord {
                id: row.try_get("id")?,
                canonical: row.try_get("canonical")?,
                record: EventRecord {
                    title: row.try_get("title")?,
                    body: row.try_get("body")?,
                    status: PublicationStatus::parse(&status)
                        .ok_or_else(|| StoreError::Rejected(format!("unknown status {status}")))?,
                    meta: EventMeta {
                        event_id: EventId::new(row.try_get::<String, _>("event_id")?),
                        event_modified: row.try_get("event_modified")?,
                        start_date: row.try_get("start_date")?,
                        end_date: row.try_get("end_date")?,
                        event_url: row.try_get("event_url")?,
                    },
                },
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn find_by_external_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<LocalRecordId>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id
              FROM events
             WHERE event_id = $1
               AND canonical
             LIMIT 1
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    /// Claims the canonical slot when it is free, otherwise stores a non-canonical duplicate.
    async fn insert(&self, record: &EventRecord) -> Result<LocalRecordId, StoreError> {
        let claimed = sqlx::query(
            r#"
            INSERT INTO events
                (id, event_id, canonical, title, body, status,
                 event_modified, start_date, end_date, event_url)
            VALUES ($1, $2, TRUE, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (event_id) WHERE canonical DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.meta.event_id.as_str())
        .bind(&record.title)
        .bind(&record.body)
        .bind(record.status.as_str())
        .bind(&record.meta.event_modified)
        .bind(&record.meta.start_date)
        .bind(&record.meta.end_date)
        .bind(record.meta.event_url.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(row.try_get("id")?);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO events
                (id, event_id, canonical, title, body, status,
                 event_modified, start_date, end_date, event_url)
            VALUES ($1, $2, FALSE, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.meta.event_id.as_str())
        .bind(&record.title)
        .bind(&record.body)
        .bind(record.status.as_str())
        .bind(&record.meta.event_modified)
        .bind(&record.meta.start_date)
        .bind(&record.meta.end_date)
        .bind(record.meta.event_url.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn update(&self, id: LocalRecordId, record: &EventRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
               SET title = $2,
                   body = $3,
                   status = $4,
                   event_modified = $5,
                   start_date = $6,
                   end_date = $7,
                   event_url = $8,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&record.title)
        .bind(&record.body)
        .bind(record.status.as_str())
        .bind(&record.meta.event_modified)
        .bind(&record.meta.start_date)
        .bind(&record.meta.end_date)
        .bind(record.meta.event_url.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn upsert(&self, record: &EventRecord) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO events
                (id, event_id, canonical, title, body, status,
                 event_modified, start_date, end_date, event_url)
            VALUES ($1, $2, TRUE, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (event_id) WHERE canonical DO UPDATE
               SET title = EXCLUDED.title,
                   body = EXCLUDED.body,
                   status = EXCLUDED.status,
                   event_modified = EXCLUDED.event_modified,
                   start_date = EXCLUDED.start_date,
                   end_date = EXCLUDED.end_date,
                   event_url = EXCLUDED.event_url,
                   updated_at = NOW()
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.meta.event_id.as_str())
        .bind(&record.title)
        .bind(&record.body)
        .bind(record.status.as_str())
        .bind(&record.meta.event_modified)
        .bind(&record.meta.start_date)
        .bind(&record.meta.end_date)
        .bind(record.meta.event_url.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(UpsertOutcome {
            id: row.try_get("id")?,
            action: if inserted {
                WriteAction::Inserted
            } else {
                WriteAction::Updated
            },
        })
    }
}
