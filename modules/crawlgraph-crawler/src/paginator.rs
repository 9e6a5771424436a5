use thiserror::Error;
use tracing::{debug, info, warn};

use crawlgraph_common::{DataType, EntityId, ResumeCursor};
use crawlgraph_graph::{ResilientStore, StoreError};

use crate::traits::{PageIterator, SourceError};

#[derive(Debug, Error)]
pub enum PaginatorError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wraps a raw [`PageIterator`] and keeps the entity's shared resume cursor
/// for `data_type` in step with what the caller has stored.
///
/// - On open, a stored cursor is replayed into the iterator; one that cannot
///   be parsed or is rejected is discarded and the listing starts over.
/// - `next` never moves the stored cursor forward. The caller `commit`s once
///   every item returned so far is in the graph, so an interrupted run never
///   resumes past items that were not written.
/// - Exhaustion and a cursor the source rejects both clear the stored cursor.
pub struct ResumablePaginator<T> {
    inner: Box<dyn PageIterator<Item = T>>,
    store: ResilientStore,
    entity_id: EntityId,
    data_type: DataType,
    resumed: bool,
    initial_count: u64,
    committed: Option<ResumeCursor>,
    /// Exhausted, or the source rejected the cursor; nothing left to commit.
    closed: bool,
}

impl<T: Send> ResumablePaginator<T> {
    pub async fn open(
        mut inner: Box<dyn PageIterator<Item = T>>,
        store: ResilientStore,
        entity_id: EntityId,
        data_type: DataType,
    ) -> Result<Self, StoreError> {
        let mut resumed = false;
        let mut initial_count = 0;
        let mut committed = None;

        let stored = store.resume_cursor(entity_id, data_type).await?;
        if let Some(raw) = stored.filter(|raw| !raw.is_empty()) {
            let restored = ResumeCursor::from_json(&raw)
                .map_err(|e| e.to_string())
                .and_then(|cursor| {
                    inner.resume(&cursor).map_err(|e| e.to_string())?;
                    Ok(cursor)
                });
            match restored {
                Ok(cursor) => {
                    resumed = true;
                    initial_count = cursor.count;
                    committed = Some(cursor.clone());
                    info!(
                        entity_id,
                        data_type = data_type.as_str(),
                        count = cursor.count,
                        "Resuming from saved cursor"
                    );
                }
                Err(reason) => {
                    warn!(
                        entity_id,
                        data_type = data_type.as_str(),
                        reason = reason.as_str(),
                        "Discarding unusable resume cursor, starting from scratch"
                    );
                    store.clear_cursor(entity_id, data_type).await?;
                }
            }
        }

        Ok(Self {
            inner,
            store,
            entity_id,
            data_type,
            resumed,
            initial_count,
            committed,
            closed: false,
        })
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Items already delivered by earlier runs when resuming.
    pub fn initial_count(&self) -> u64 {
        self.initial_count
    }

    pub fn total_index(&self) -> u64 {
        self.inner.total_index()
    }

    pub async fn next(&mut self) -> Result<Option<T>, PaginatorError> {
        match self.inner.next_item().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.store
                    .clear_cursor(self.entity_id, self.data_type)
                    .await?;
                self.committed = None;
                self.closed = true;
                Ok(None)
            }
            Err(SourceError::InvalidCursor(reason)) => {
                warn!(
                    entity_id = self.entity_id,
                    data_type = self.data_type.as_str(),
                    reason = reason.as_str(),
                    "Source rejected cursor, clearing it"
                );
                self.store
                    .clear_cursor(self.entity_id, self.data_type)
                    .await?;
                self.committed = None;
                self.closed = true;
                Err(SourceError::InvalidCursor(reason).into())
            }
            // The stored cursor is still the last committed position.
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the position after the last returned item. Call only once
    /// those items are stored.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        let Some(cursor) = self.inner.checkpoint() else {
            return Ok(());
        };
        if self.committed.as_ref() == Some(&cursor) {
            return Ok(());
        }
        debug!(
            entity_id = self.entity_id,
            data_type = self.data_type.as_str(),
            count = cursor.count,
            "Checkpoint committed"
        );
        self.store
            .save_cursor(self.entity_id, self.data_type, cursor.clone())
            .await?;
        self.committed = Some(cursor);
        Ok(())
    }
}
