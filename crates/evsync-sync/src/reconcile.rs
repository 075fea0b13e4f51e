use std::sync::Arc;

use evsync_adapters::{sanitize_text_field, sanitize_textarea_field};
use evsync_core::{EventId, EventMeta, EventRecord, PublicationStatus, RemoteEvent, WriteAction};
use evsync_storage::{EventStore, StoreError, UpsertOutcome};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("store write for event {event_id} failed: {source}")]
pub struct ReconcileError {
    pub event_id: EventId,
    #[source]
    pub source: StoreError,
}

/// Field mapping from a remote event to the record written locally.
pub fn map_event(event: &RemoteEvent) -> EventRecord {
    EventRecord {
        title: sanitize_text_field(&event.title),
        body: sanitize_textarea_field(&event.overview),
        status: PublicationStatus::Publish,
        meta: EventMeta {
            event_id: event.id.clone(),
            event_modified: event.modified.clone(),
            start_date: event.start.clone(),
            end_date: event.end.clone(),
            event_url: event.link.clone(),
        },
    }
}

/// Projects remote events into the local store, one mutation per event.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn EventStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Update the local record for `event.id` in place, or insert one when absent.
    ///
    /// With `force_insert` a new record is inserted even if one exists; the store keeps the
    /// first one canonical.
    #[tracing::instrument(level = "debug", skip(self, event), fields(event_id = %event.id))]
    pub async fn upsert(
        &self,
        event: &RemoteEvent,
        force_insert: bool,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let record = map_event(event);
        let result = if force_insert {
            self.store.insert(&record).await.map(|id| UpsertOutcome {
                id,
                action: WriteAction::Inserted,
            })
        } else {
            self.store.upsert(&record).await
        };
        result.map_err(|source| ReconcileError {
            event_id: event.id.clone(),
            source,
        })
    }
}
