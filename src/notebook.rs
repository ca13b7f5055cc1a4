//! In-memory notebook model.
//!
//! This is the slice of the host document the engine reads and writes:
//! per-cell requirement metadata and output lists, the notebook-level load
//! configuration, the finalization stamp, and a save request. Cells may be
//! deleted while a gate or execution is in flight, so every mutation goes
//! through [`Notebook::with_cell`], which re-checks existence under the lock;
//! a vanished target yields `None` and the pending operation drops out
//! silently at the call site.

use crate::error::RequireError;
use crate::loader::LoadConfiguration;
use crate::output::CellOutput;
use crate::types::{CellId, ModuleId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Ordered sequence of module identifiers attached to one cell.
///
/// Order is insertion order; duplicates are permitted (the gate deduplicates
/// at fan-out). Replaced wholesale when a cell re-declares.
pub type RequirementSet = Vec<ModuleId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Code,
    Markdown,
}

/// One notebook cell, referenced by the engine but owned by the host.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: CellId,
    pub cell_type: CellType,
    pub requirements: RequirementSet,
    pub outputs: Vec<CellOutput>,
    /// True from the moment a dependency-gated execution starts until it
    /// settles; disambiguates which cell an async completion belongs to.
    pub running: bool,
}

impl Cell {
    fn new(cell_type: CellType) -> Self {
        Self {
            id: CellId::next(),
            cell_type,
            requirements: Vec::new(),
            outputs: Vec::new(),
            running: false,
        }
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }
}

/// Notebook-level finalization stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalized {
    pub trusted: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct NotebookState {
    order: Vec<CellId>,
    cells: HashMap<CellId, Cell>,
    selected: Option<CellId>,
    config: Option<LoadConfiguration>,
    finalized: Option<Finalized>,
    trusted: bool,
    saves: u64,
}

/// The host document interface the engine needs.
#[derive(Default)]
pub struct Notebook {
    state: RwLock<NotebookState>,
}

impl Notebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code_cell(&self) -> CellId {
        self.add_cell(CellType::Code)
    }

    pub fn add_markdown_cell(&self) -> CellId {
        self.add_cell(CellType::Markdown)
    }

    fn add_cell(&self, cell_type: CellType) -> CellId {
        let cell = Cell::new(cell_type);
        let id = cell.id;
        let mut state = self.state.write();
        state.order.push(id);
        state.cells.insert(id, cell);
        if state.selected.is_none() {
            state.selected = Some(id);
        }
        id
    }

    pub fn remove_cell(&self, id: CellId) {
        let mut state = self.state.write();
        state.order.retain(|c| *c != id);
        state.cells.remove(&id);
        if state.selected == Some(id) {
            state.selected = state.order.first().copied();
        }
    }

    /// Run `f` against the cell if it still exists. Returns `None` when the
    /// cell has vanished; callers treat that as a silent drop, not an error.
    pub fn with_cell<R>(&self, id: CellId, f: impl FnOnce(&mut Cell) -> R) -> Option<R> {
        let mut state = self.state.write();
        match state.cells.get_mut(&id) {
            Some(cell) => Some(f(cell)),
            None => {
                debug!(cell = %id, "target cell no longer exists; dropping operation");
                None
            }
        }
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.state.read().cells.contains_key(&id)
    }

    /// Cell ids in document order.
    pub fn cell_ids(&self) -> Vec<CellId> {
        self.state.read().order.clone()
    }

    /// Code cell ids in document order.
    pub fn code_cell_ids(&self) -> Vec<CellId> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter(|id| state.cells.get(id).map(Cell::is_code).unwrap_or(false))
            .copied()
            .collect()
    }

    pub fn select(&self, id: CellId) {
        let mut state = self.state.write();
        if state.cells.contains_key(&id) {
            state.selected = Some(id);
        }
    }

    pub fn selected(&self) -> Option<CellId> {
        self.state.read().selected
    }

    pub fn set_running(&self, id: CellId, running: bool) {
        self.with_cell(id, |cell| cell.running = running);
    }

    /// First cell currently marked running, in document order.
    pub fn running_cell(&self) -> Option<CellId> {
        let state = self.state.read();
        state
            .order
            .iter()
            .find(|id| state.cells.get(id).map(|c| c.running).unwrap_or(false))
            .copied()
    }

    /// Resolve the cell an `execute` request belongs to: prefer the running
    /// cell, fall back to the selected cell if it is a code cell, otherwise
    /// the cell immediately preceding the selected one.
    pub fn resolve_target(&self) -> Result<CellId, RequireError> {
        if let Some(running) = self.running_cell() {
            return Ok(running);
        }

        let state = self.state.read();
        let selected = state.selected.ok_or(RequireError::NoTargetCell)?;
        let selected_cell = state
            .cells
            .get(&selected)
            .ok_or(RequireError::NoTargetCell)?;

        if selected_cell.is_code() {
            return Ok(selected);
        }

        let pos = state
            .order
            .iter()
            .position(|id| *id == selected)
            .ok_or(RequireError::NoTargetCell)?;
        pos.checked_sub(1)
            .and_then(|prev| state.order.get(prev).copied())
            .ok_or(RequireError::NoTargetCell)
    }

    pub fn requirements(&self, id: CellId) -> Option<RequirementSet> {
        self.state.read().cells.get(&id).map(|c| c.requirements.clone())
    }

    /// Replace a cell's requirement set (never merged).
    pub fn set_requirements(&self, id: CellId, required: RequirementSet) {
        self.with_cell(id, |cell| cell.requirements = required);
    }

    /// Clear requirement metadata on one cell, or on every cell.
    pub fn clear_requirements(&self, id: Option<CellId>) {
        match id {
            Some(id) => {
                self.with_cell(id, |cell| cell.requirements.clear());
            }
            None => {
                let mut state = self.state.write();
                for cell in state.cells.values_mut() {
                    cell.requirements.clear();
                }
            }
        }
    }

    pub fn outputs(&self, id: CellId) -> Option<Vec<CellOutput>> {
        self.state.read().cells.get(&id).map(|c| c.outputs.clone())
    }

    /// Append an output to a cell, returning its index. `None` if the cell
    /// vanished while the producing operation was in flight.
    pub fn push_output(&self, id: CellId, output: CellOutput) -> Option<usize> {
        self.with_cell(id, |cell| {
            cell.outputs.push(output);
            cell.outputs.len() - 1
        })
    }

    pub fn clear_outputs(&self, id: CellId) {
        self.with_cell(id, |cell| cell.outputs.clear());
    }

    /// Register a load configuration, wholesale replacing the previous one.
    pub fn set_config(&self, config: LoadConfiguration) {
        self.state.write().config = Some(config);
    }

    pub fn config(&self) -> Option<LoadConfiguration> {
        self.state.read().config.clone()
    }

    /// Drop the notebook-level requirement metadata.
    pub fn clear_config(&self) {
        self.state.write().config = None;
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.state.write().trusted = trusted;
    }

    pub fn is_trusted(&self) -> bool {
        self.state.read().trusted
    }

    pub fn stamp_finalized(&self) -> Finalized {
        let mut state = self.state.write();
        let stamp = Finalized {
            trusted: state.trusted,
            timestamp: Utc::now(),
        };
        state.finalized = Some(stamp.clone());
        stamp
    }

    pub fn finalized(&self) -> Option<Finalized> {
        self.state.read().finalized.clone()
    }

    /// Request a save of the host document. Purely local bookkeeping here;
    /// the host reacts to the counter.
    pub fn request_save(&self) {
        self.state.write().saves += 1;
    }

    pub fn save_count(&self) -> u64 {
        self.state.read().saves
    }

    /// Serialize the persisted slice of the document.
    pub fn to_document(&self) -> PersistedNotebook {
        let state = self.state.read();
        PersistedNotebook {
            cells: state
                .order
                .iter()
                .filter_map(|id| state.cells.get(id))
                .map(|cell| PersistedCell {
                    cell_type: cell.cell_type,
                    metadata: CellMetadata {
                        require: cell.requirements.clone(),
                    },
                    outputs: cell.outputs.clone(),
                })
                .collect(),
            metadata: NotebookMetadata {
                require: state.config.clone(),
                finalized: state.finalized.clone(),
            },
        }
    }

    /// Rebuild the in-memory model from a persisted document.
    pub fn from_document(doc: PersistedNotebook) -> Self {
        let notebook = Notebook::new();
        for persisted in doc.cells {
            let id = notebook.add_cell(persisted.cell_type);
            notebook.with_cell(id, |cell| {
                cell.requirements = persisted.metadata.require.clone();
                cell.outputs = persisted.outputs.clone();
            });
        }
        {
            let mut state = notebook.state.write();
            state.config = doc.metadata.require;
            state.finalized = doc.metadata.finalized;
        }
        notebook
    }
}

/// Per-cell metadata as persisted in the host document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMetadata {
    #[serde(default)]
    pub require: RequirementSet,
}

/// Persisted form of one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCell {
    pub cell_type: CellType,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
}

/// Notebook-level metadata as persisted in the host document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require: Option<LoadConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized: Option<Finalized>,
}

/// The persisted slice of the host document the engine round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedNotebook {
    pub cells: Vec<PersistedCell>,
    #[serde(default)]
    pub metadata: NotebookMetadata,
}
