//! Script lifecycle observers.
//!
//! Observers are notified synchronously, in registration order, for every
//! event of a run. The registry is a shared handle: each notification walks a
//! snapshot, so an observer may add or remove registrations from inside a
//! callback and the change applies from the next event on.

use super::RunSummary;
use crate::db::{ColumnDescriptor, RowHandle};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Receiver of script lifecycle events.
///
/// Every method has an empty default, so implementors only override the
/// events they care about.
pub trait ScriptObserver: Send + Sync {
    /// The run is starting.
    fn begin_script(&self) {}

    /// A comment line was read (trimmed text).
    fn comment(&self, _text: &str) {}

    /// A statement is about to execute.
    fn sql(&self, _sql: &str) {}

    /// The full script executed successfully.
    fn success(&self) {}

    /// The full script failed.
    fn error(&self, _message: &str) {}

    /// A statement updated `count` rows.
    fn update_count(&self, _count: u64) {}

    /// A result set is about to be streamed.
    fn result_set(&self, _columns: &[ColumnDescriptor]) {}

    /// The next row of the current result set.
    fn row(&self, _row: &RowHandle<'_>) {}

    /// The current result set is exhausted.
    fn no_more_rows(&self) {}

    /// The run finished, successfully or not.
    fn end_script(&self, _summary: &RunSummary) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ScriptObserver for NoopObserver {}

/// Handle identifying one registration in an [`ObserverRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Registrations {
    next_id: u64,
    entries: Vec<(ObserverId, Arc<dyn ScriptObserver>)>,
}

/// Ordered, shared set of registered observers.
///
/// Registering the same observer twice yields two registrations, and it is
/// then notified twice per event.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<Registrations>>,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer at the end of the notification order.
    pub fn add(&self, observer: Arc<dyn ScriptObserver>) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push((id, observer));
        id
    }

    /// Removes a registration. Returns false if it was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(entry_id, _)| *entry_id != id);
        inner.entries.len() != before
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `event` on every registered observer, in registration order.
    pub fn notify(&self, event: impl Fn(&dyn ScriptObserver)) {
        let snapshot: Vec<Arc<dyn ScriptObserver>> = self
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in snapshot {
            event(observer.as_ref());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Observer registry lock was poisoned; continuing");
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// One recorded lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    BeginScript,
    Comment(String),
    Sql(String),
    Success,
    Error(String),
    UpdateCount(u64),
    ResultSet(Vec<String>),
    Row(Vec<Option<String>>),
    NoMoreRows,
    EndScript(RunSummary),
}

/// Observer that records every event, for tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ScriptEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<ScriptEvent> {
        self.lock().clone()
    }

    /// Statements announced through `sql`, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                ScriptEvent::Sql(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Summary passed to the last `end_script`, if any.
    pub fn summary(&self) -> Option<RunSummary> {
        self.lock().iter().rev().find_map(|event| match event {
            ScriptEvent::EndScript(summary) => Some(summary.clone()),
            _ => None,
        })
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, event: ScriptEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScriptEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ScriptObserver for RecordingObserver {
    fn begin_script(&self) {
        self.record(ScriptEvent::BeginScript);
    }

    fn comment(&self, text: &str) {
        self.record(ScriptEvent::Comment(text.to_string()));
    }

    fn sql(&self, sql: &str) {
        self.record(ScriptEvent::Sql(sql.to_string()));
    }

    fn success(&self) {
        self.record(ScriptEvent::Success);
    }

    fn error(&self, message: &str) {
        self.record(ScriptEvent::Error(message.to_string()));
    }

    fn update_count(&self, count: u64) {
        self.record(ScriptEvent::UpdateCount(count));
    }

    fn result_set(&self, columns: &[ColumnDescriptor]) {
        self.record(ScriptEvent::ResultSet(
            columns.iter().map(|c| c.label.clone()).collect(),
        ));
    }

    fn row(&self, row: &RowHandle<'_>) {
        match row.values() {
            Ok(values) => self.record(ScriptEvent::Row(values)),
            Err(e) => warn!("Could not record row: {e}"),
        }
    }

    fn no_more_rows(&self) {
        self.record(ScriptEvent::NoMoreRows);
    }

    fn end_script(&self, summary: &RunSummary) {
        self.record(ScriptEvent::EndScript(summary.clone()));
    }
}
