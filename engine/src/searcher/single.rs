//! Lookup of one record by id.

use super::{
    emit_outcome, spawn_refresh, RequestSlot, SearchKind, SearcherEvent, SourceSubscription,
};
use crate::{
    error::Result,
    event::EventEmitter,
    source::{DataSource, SourceEvent},
    CancellableFuture, EditedRecord, Error, RecordId,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
struct SingleState {
    data_id: Option<RecordId>,
    record: Option<EditedRecord>,
    ready: bool,
    slot: RequestSlot,
}

struct SingleInner {
    source: DataSource,
    state: Mutex<SingleState>,
    events: EventEmitter<SearcherEvent>,
    _subscription: SourceSubscription,
}

impl SingleInner {
    fn start(
        self: &Arc<Self>,
        id: RecordId,
        kind: SearchKind,
    ) -> CancellableFuture<Option<EditedRecord>> {
        let generation = {
            let mut state = self.state.lock();
            state.data_id = Some(id.clone());
            state.slot.begin()
        };
        debug!(generation, id = %id, ?kind, "single record lookup started");
        self.events.emit(&kind.start());

        let future = self.source.find_data(&id);
        let canceller = future.canceller();
        self.state.lock().slot.track(generation, canceller.clone());

        let weak = Arc::downgrade(self);
        CancellableFuture::with_abort_hook(
            async move {
                let result = future.await;
                let inner = weak.upgrade().ok_or(Error::Aborted)?;

                let outcome = {
                    let mut state = inner.state.lock();
                    if !state.slot.is_current(generation) {
                        return Err(Error::Aborted);
                    }
                    state.slot.finish(generation);
                    match &result {
                        Ok(record) => {
                            state.record = record.clone();
                            let first_ready = !state.ready;
                            state.ready = true;
                            Ok(first_ready)
                        }
                        Err(err) => Err(err.clone()),
                    }
                };

                emit_outcome(&inner.events, kind, &outcome);
                result
            },
            move || canceller.abort(),
        )
    }

    fn refresh(self: &Arc<Self>) -> Result<CancellableFuture<Option<EditedRecord>>> {
        let id = self.state.lock().data_id.clone().ok_or(Error::NotYetReady)?;
        Ok(self.start(id, SearchKind::Refresh))
    }

    fn on_source_event(self: &Arc<Self>, event: &SourceEvent) {
        let Some(id) = self.state.lock().data_id.clone() else {
            return;
        };

        let (relevant, refresh) = match event {
            SourceEvent::Edit(edit) => {
                let affected = edit.affects(&id);
                if affected {
                    self.reproject(&id);
                }
                (affected, false)
            }
            SourceEvent::ChangeSource(change) => {
                let affected = change.affects(&id);
                (affected, affected)
            }
            SourceEvent::Rollback => {
                self.reproject(&id);
                (true, true)
            }
            SourceEvent::CommitSuccess(_) => (true, true),
            SourceEvent::CommitStart
            | SourceEvent::CommitError(_)
            | SourceEvent::CommitComplete => (true, false),
        };

        if relevant {
            self.events.emit(&SearcherEvent::Source(event.clone()));
        }
        if refresh {
            spawn_refresh("single", self.refresh());
        }
    }

    fn reproject(&self, id: &str) {
        let mut state = self.state.lock();
        let original = state.record.as_ref().and_then(|row| row.original.clone());
        state.record = match original {
            Some(original) => self.source.apply_data(&original).ok(),
            None => self.source.project_id(id),
        };
    }
}

/// Tracks a single record by id, e.g. for a detail form next to the grid.
#[derive(Clone)]
pub struct SingleRecordSearcher {
    inner: Arc<SingleInner>,
}

impl SingleRecordSearcher {
    pub fn new(source: DataSource) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SingleInner>| SingleInner {
            _subscription: SourceSubscription::new(&source, weak.clone(), |inner, event| {
                inner.on_source_event(event)
            }),
            source,
            state: Mutex::new(SingleState::default()),
            events: EventEmitter::new(),
        });
        Self { inner }
    }

    /// Track another record. Aborts a lookup still in flight.
    pub fn change_data_id(
        &self,
        id: impl Into<RecordId>,
    ) -> Result<CancellableFuture<Option<EditedRecord>>> {
        let id = id.into();
        if id.contains('/') {
            return Err(Error::IllegalTypeDataId {
                property: self.inner.source.id_property().to_string(),
                found: id,
            });
        }
        Ok(self.inner.start(id, SearchKind::Change))
    }

    /// Look the tracked record up again.
    pub fn refresh(&self) -> Result<CancellableFuture<Option<EditedRecord>>> {
        self.inner.refresh()
    }

    /// The tracked record with pending edits applied, once found.
    pub fn get_data(&self) -> Option<EditedRecord> {
        self.inner.state.lock().record.clone()
    }

    pub fn get_data_id(&self) -> Option<RecordId> {
        self.inner.state.lock().data_id.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    pub fn events(&self) -> &EventEmitter<SearcherEvent> {
        &self.inner.events
    }

    pub fn data_source(&self) -> &DataSource {
        &self.inner.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::LocalAccessor;
    use crate::config::SourceConfig;
    use crate::{EditCommand, EditStatus};
    use serde_json::json;

    fn single() -> SingleRecordSearcher {
        let accessor = Arc::new(LocalAccessor::new(
            "id",
            vec![json!({"id": "a", "v": 1}), json!({"id": "b", "v": 2})],
        ));
        SingleRecordSearcher::new(DataSource::new(accessor, SourceConfig::default()))
    }

    #[tokio::test]
    async fn finds_and_tracks_edits() {
        let single = single();
        let found = single.change_data_id("a").unwrap().await.unwrap().unwrap();
        assert_eq!(found.edit_status, EditStatus::Unchanged);
        assert!(single.is_ready());

        single
            .data_source()
            .edit(EditCommand::ReplaceValue {
                record: json!({"id": "a", "v": 1}),
                property: "v".into(),
                value: json!(7),
            })
            .unwrap();

        let current = single.get_data().unwrap();
        assert_eq!(current.edit_status, EditStatus::Updated);
        assert_eq!(current.current()["v"], 7);
    }

    #[tokio::test]
    async fn only_matching_edits_are_reemitted() {
        let single = single();
        single.change_data_id("a").unwrap().await.unwrap();
        let (_, mut rx) = single.events().subscribe();

        let source = single.data_source().clone();
        source
            .edit(EditCommand::Remove {
                record: json!({"id": "b", "v": 2}),
            })
            .unwrap();
        assert!(rx.try_recv().is_err());

        source
            .edit(EditCommand::Remove {
                record: json!({"id": "a", "v": 1}),
            })
            .unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(SearcherEvent::Source(SourceEvent::Edit(_)))
        ));
        assert_eq!(single.get_data().unwrap().edit_status, EditStatus::Removed);
    }

    #[tokio::test]
    async fn change_aborts_previous_lookup() {
        let single = single();
        let first = single.change_data_id("a").unwrap();
        let second = single.change_data_id("b").unwrap();

        assert!(first.await.unwrap_err().is_aborted());
        assert_eq!(second.await.unwrap().unwrap().record_id, "b");
        assert_eq!(single.get_data_id().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn missing_record_resolves_to_none() {
        let single = single();
        assert!(single.change_data_id("zz").unwrap().await.unwrap().is_none());
        assert!(single.get_data().is_none());
    }

    #[test]
    fn refresh_without_id_is_not_ready() {
        assert_eq!(single().refresh().unwrap_err(), Error::NotYetReady);
        assert_eq!(
            single().change_data_id("a/b").unwrap_err().key(),
            "IllegalTypeDataId"
        );
    }
}
