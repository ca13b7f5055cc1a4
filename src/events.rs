//! Typed observer registration.
//!
//! Each component exposes its own notification point instead of publishing
//! onto one untyped bus, so consumers declare exactly which notifications
//! they depend on.

use crate::types::{CellId, ModuleId};
use parking_lot::RwLock;

/// A set of subscribers for one event type.
///
/// Notification is synchronous and in registration order. Subscribers are
/// held for the lifetime of the component; there is no unsubscription,
/// matching how the engine wires observers once at startup.
pub struct Observers<E> {
    subscribers: RwLock<Vec<Box<dyn Fn(&E) + Send + Sync>>>,
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, f: impl Fn(&E) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(f));
    }

    pub fn notify(&self, event: &E) {
        for subscriber in self.subscribers.read().iter() {
            subscriber(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cell's requirement set was satisfied by the dependency gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireSatisfied {
    pub cell: Option<CellId>,
    pub required: Vec<ModuleId>,
}

/// A load configuration was registered and all of its modules resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigApplied {
    pub modules: Vec<ModuleId>,
}

/// A new output record was attached to a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAdded {
    pub cell: CellId,
    pub index: usize,
}

/// Outputs of a cell were frozen at a persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputsFrozen {
    pub cell: CellId,
    pub frozen: usize,
}

/// Outputs of a cell were restored on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputsRestored {
    pub cell: CellId,
    /// Records appended verbatim from their frozen snapshot.
    pub frozen: usize,
    /// Surviving live records re-rendered through their closure.
    pub replayed: usize,
}
