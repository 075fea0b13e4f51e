use async_trait::async_trait;
use chrono::Utc;
use evsync_core::{EventId, EventRecord, LocalEventRecord, LocalRecordId, WriteAction};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("no local record with id {0}")]
    NotFound(LocalRecordId),
    #[error("write rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: LocalRecordId,
    pub action: WriteAction,
}

/// Local content store keyed by the upstream event id.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Canonical local record for `event_id`, if any.
    async fn find_by_external_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<LocalRecordId>, StoreError>;

    async fn insert(&self, record: &EventRecord) -> Result<LocalRecordId, StoreError>;

    async fn update(&self, id: LocalRecordId, record: &EventRecord) -> Result<(), StoreError>;

    /// Insert-or-update keyed by `record.meta.event_id`.
    ///
    /// The default is a lookup followed by a write and is racy across processes;
    /// stores that can do it atomically override this.
    async fn upsert(&self, record: &EventRecord) -> Result<UpsertOutcome, StoreError> {
        match self.find_by_external_id(&record.meta.event_id).await? {
            Some(id) => {
                self.update(id, record).await?;
                Ok(UpsertOutcome {
                    id,
                    action: WriteAction::Updated,
                })
            }
            None => Ok(UpsertOutcome {
                id: self.insert(record).await?,
                action: WriteAction::Inserted,
            }),
        }
    }
}

/// In-process store used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<LocalEventRecord>,
    mutations: usize,
}

impl MemoryState {
    fn canonical_position(&self, event_id: &EventId) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.canonical && &r.record.meta.event_id == event_id)
    }

    fn insert(&mut self, record: &EventRecord) -> LocalRecordId {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let canonical = self.canonical_position(&record.meta.event_id).is_none();
        self.records.push(LocalEventRecord {
            id,
            canonical,
            record: record.clone(),
            created_at: now,
            updated_at: now,
        });
        self.mutations += 1;
        id
    }

    fn update_at(&mut self, index: usize, record: &EventRecord) {
        let existing = &mut self.records[index];
        existing.record = record.clone();
        existing.updated_at = Utc::now();
        self.mutations += 1;
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<LocalEventRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn records_for(&self, event_id: &EventId) -> Vec<LocalEventRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| &r.record.meta.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Number of inserts and updates applied so far.
    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn find_by_external_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<LocalRecordId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.canonical_position(event_id).map(|i| state.records[i].id))
    }

    async fn insert(&self, record: &EventRecord) -> Result<LocalRecordId, StoreError> {
        Ok(self.state.lock().await.insert(record))
    }

    async fn update(&self, id: LocalRecordId, record: &EventRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let index = state
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        state.update_at(index, record);
        Ok(())
    }

    async fn upsert(&self, record: &EventRecord) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        match state.canonical_position(&record.meta.event_id) {
            Some(index) => {
                state.update_at(index, record);
                Ok(UpsertOutcome {
                    id: state.records[index].id,
                    action: WriteAction::Updated,
                })
            }
            None => Ok(UpsertOutcome {
                id: state.insert(record),
                action: WriteAction::Inserted,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evsync_core::{EventMeta, PublicationStatus};

    fn record(event_id: &str, title: &str) -> EventRecord {
        EventRecord {
            title: title.to_string(),
            body: String::new(),
            status: PublicationStatus::Publish,
            meta: EventMeta {
                event_id: EventId::from(event_id),
                event_modified: "2024-08-01T10:00:00".to_string(),
                start_date: "2024-09-01".to_string(),
                end_date: "2024-09-03".to_string(),
                event_url: None,
            },
        }
    }

    #[tokio::test]
    async fn upsert_updates_the_canonical_record_in_place() {
        let store = MemoryEventStore::new();
        let first = store.upsert(&record("7", "Old")).await.unwrap();
        let second = store.upsert(&record("7", "New")).await.unwrap();

        assert_eq!(first.action, WriteAction::Inserted);
        assert_eq!(second.action, WriteAction::Updated);
        assert_eq!(first.id, second.id);

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record.title, "New");
        assert_eq!(store.mutation_count().await, 2);
    }

    #[tokio::test]
    async fn second_insert_for_same_event_is_not_canonical() {
        let store = MemoryEventStore::new();
        let canonical = store.insert(&record("7", "A")).await.unwrap();
        let duplicate = store.insert(&record("7", "A")).await.unwrap();

        assert_ne!(canonical, duplicate);
        assert_eq!(
            store.find_by_external_id(&EventId::from("7")).await.unwrap(),
            Some(canonical)
        );
        let rows = store.records_for(&EventId::from("7")).await;
        assert_eq!(rows.iter().filter(|r| r.canonical).count(), 1);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let store = MemoryEventStore::new();
        let missing = Uuid::new_v4();
        let err = store.update(missing, &record("1", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == missing));
        assert_eq!(store.mutation_count().await, 0);
    }
}
