// src/model/events.rs
// Lifecycle listener registry owned by each model

use super::record::Record;
use crate::error::Result;
use crate::log_trace;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl ModelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ModelEvent::Saving => "saving",
            ModelEvent::Saved => "saved",
            ModelEvent::Creating => "creating",
            ModelEvent::Created => "created",
            ModelEvent::Updating => "updating",
            ModelEvent::Updated => "updated",
            ModelEvent::Deleting => "deleting",
            ModelEvent::Deleted => "deleted",
        }
    }
}

/// Receives the record and, on updates, its pre-save snapshot
pub type RecordListener = Arc<dyn Fn(&Record, Option<&Record>) -> Result<()> + Send + Sync>;

/// Receives the raw documents of every model query
pub type FetchListener = Arc<dyn Fn(&[Value]) -> Result<()> + Send + Sync>;

/// Listeners of one model; an error from any listener aborts the operation
#[derive(Default)]
pub struct ModelEvents {
    listeners: RwLock<HashMap<ModelEvent, Vec<RecordListener>>>,
    fetching: RwLock<Vec<FetchListener>>,
}

impl fmt::Debug for ModelEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .read()
            .iter()
            .map(|(event, list)| (event.name(), list.len()))
            .collect();
        f.debug_struct("ModelEvents")
            .field("listeners", &counts)
            .field("fetching", &self.fetching.read().len())
            .finish()
    }
}

impl ModelEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: ModelEvent, listener: F)
    where
        F: Fn(&Record, Option<&Record>) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(event)
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn on_fetching<F>(&self, listener: F)
    where
        F: Fn(&[Value]) -> Result<()> + Send + Sync + 'static,
    {
        self.fetching.write().push(Arc::new(listener));
    }

    /// Run the listeners of `event` in registration order
    pub fn trigger(&self, event: ModelEvent, record: &Record, old: Option<&Record>) -> Result<()> {
        // Clone the list so a listener may register more listeners
        let listeners = match self.listeners.read().get(&event) {
            Some(list) => list.clone(),
            None => return Ok(()),
        };
        log_trace!("{} event: {} listener(s)", event.name(), listeners.len());
        for listener in listeners {
            listener(record, old)?;
        }
        Ok(())
    }

    pub fn trigger_fetching(&self, documents: &[Value]) -> Result<()> {
        let listeners = self.fetching.read().clone();
        for listener in listeners {
            listener(documents)?;
        }
        Ok(())
    }
}
