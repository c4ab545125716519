use crate::error::PipeError;
use crate::model::PipeSnapshot;
use std::sync::Arc;
use uuid::Uuid;

/// Change notification produced by one watcher tick.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Created(PipeSnapshot),
    Updated(PipeSnapshot),
    Deleted(PipeSnapshot),
    /// The tick could not enumerate the host; retained state is unchanged.
    TickFailed { host: String, error: Arc<PipeError> },
}

impl WatchEvent {
    /// Pipe carried by a change event.
    pub fn pipe(&self) -> Option<&PipeSnapshot> {
        match self {
            WatchEvent::Created(pipe) | WatchEvent::Updated(pipe) | WatchEvent::Deleted(pipe) => {
                Some(pipe)
            }
            WatchEvent::TickFailed { .. } => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            WatchEvent::Created(_) => "created",
            WatchEvent::Updated(_) => "updated",
            WatchEvent::Deleted(_) => "deleted",
            WatchEvent::TickFailed { .. } => "failed",
        }
    }
}

impl PartialEq for WatchEvent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WatchEvent::Created(a), WatchEvent::Created(b))
            | (WatchEvent::Updated(a), WatchEvent::Updated(b))
            | (WatchEvent::Deleted(a), WatchEvent::Deleted(b)) => a == b,
            (
                WatchEvent::TickFailed { host: a, error: x },
                WatchEvent::TickFailed { host: b, error: y },
            ) => a == b && x.to_string() == y.to_string(),
            _ => false,
        }
    }
}

/// Events of one tick, delivered together after the tick committed.
#[derive(Debug, Clone)]
pub struct WatchBatch {
    /// Identifies one start..stop run of the watcher.
    pub session: Uuid,
    /// 1 for the first tick of a session.
    pub tick: u64,
    pub host: String,
    pub events: Vec<WatchEvent>,
}

impl WatchBatch {
    pub fn is_initial(&self) -> bool {
        self.tick == 1
    }
}

/// Callback invoked on the watcher thread for every non-empty batch.
pub type BatchCallback = Arc<dyn Fn(&WatchBatch) + Send + Sync>;
