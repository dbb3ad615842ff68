use bevy_ecs::prelude::Entity;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    Compiled { script: String, type_name: String, generation: u64, elapsed: Duration },
    Recompiled { script: String, type_name: String, generation: u64, reattached: usize, elapsed: Duration },
    RecompileFailed { script: String, error: String, suspended: usize },
    RecompileSkipped { script: String },
    Attached { script: String, entity: Entity },
    Detached { script: String, entity: Entity },
    Discarded { script: String },
}

impl ScriptEvent {
    pub fn script(&self) -> &str {
        match self {
            ScriptEvent::Compiled { script, .. }
            | ScriptEvent::Recompiled { script, .. }
            | ScriptEvent::RecompileFailed { script, .. }
            | ScriptEvent::RecompileSkipped { script }
            | ScriptEvent::Attached { script, .. }
            | ScriptEvent::Detached { script, .. }
            | ScriptEvent::Discarded { script } => script,
        }
    }
}

impl fmt::Display for ScriptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptEvent::Compiled { script, type_name, generation, elapsed } => write!(
                f,
                "Compiled script={script} type={type_name} generation={generation} took={}ms",
                elapsed.as_millis()
            ),
            ScriptEvent::Recompiled { script, type_name, generation, reattached, elapsed } => write!(
                f,
                "Recompiled script={script} type={type_name} generation={generation} reattached={reattached} took={}ms",
                elapsed.as_millis()
            ),
            ScriptEvent::RecompileFailed { script, error, suspended } => {
                write!(f, "RecompileFailed script={script} suspended={suspended} error={error}")
            }
            ScriptEvent::RecompileSkipped { script } => write!(f, "RecompileSkipped script={script}"),
            ScriptEvent::Attached { script, entity } => {
                write!(f, "Attached script={script} entity={}", entity.index())
            }
            ScriptEvent::Detached { script, entity } => {
                write!(f, "Detached script={script} entity={}", entity.index())
            }
            ScriptEvent::Discarded { script } => write!(f, "Discarded script={script}"),
        }
    }
}

/// Events kept per bus before the oldest are dropped.
pub const MAX_PENDING_EVENTS: usize = 256;

/// Pending lifecycle events, oldest first.
///
/// Callers are expected to drain the bus regularly. When they don't, it keeps only the newest
/// [`MAX_PENDING_EVENTS`] and counts what it dropped.
#[derive(Debug)]
pub struct EventBus {
    events: VecDeque<ScriptEvent>,
    capacity: usize,
    dropped: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(MAX_PENDING_EVENTS)
    }
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: VecDeque::new(), capacity: capacity.max(1), dropped: 0 }
    }

    pub fn push(&mut self, event: ScriptEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<ScriptEvent> {
        self.dropped = 0;
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded since the last drain.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
