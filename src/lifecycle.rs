//! Output lifecycle management.
//!
//! Batches freezing and restoration across every cell of a notebook at the
//! defined lifecycle points: freeze before save, finalize at session
//! teardown, restore on open. Records freeze only at these explicit
//! persistence boundaries, never eagerly when an output is added.

use crate::events::{Observers, OutputsFrozen, OutputsRestored};
use crate::gate::DependencyGate;
use crate::notebook::{Finalized, Notebook};
use crate::output::{OutputContext, RestoreDisposition};
use crate::types::CellId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct OutputLifecycleManager {
    notebook: Arc<Notebook>,
    gate: Arc<DependencyGate>,
    frozen: Observers<OutputsFrozen>,
    restored: Observers<OutputsRestored>,
}

impl OutputLifecycleManager {
    pub fn new(notebook: Arc<Notebook>, gate: Arc<DependencyGate>) -> Self {
        Self {
            notebook,
            gate,
            frozen: Observers::new(),
            restored: Observers::new(),
        }
    }

    pub fn on_frozen(&self, f: impl Fn(&OutputsFrozen) + Send + Sync + 'static) {
        self.frozen.subscribe(f);
    }

    pub fn on_restored(&self, f: impl Fn(&OutputsRestored) + Send + Sync + 'static) {
        self.restored.subscribe(f);
    }

    /// Freeze every live record of every code cell. Invoked at the pre-save
    /// boundary. Returns the number of records frozen by this call.
    pub fn freeze_all(&self) -> usize {
        let mut total = 0;
        for cell in self.notebook.code_cell_ids() {
            let frozen_here = self
                .notebook
                .with_cell(cell, |c| {
                    let mut count = 0;
                    for output in &mut c.outputs {
                        if let Some(record) = output.as_record_mut() {
                            if !record.is_frozen() {
                                record.freeze();
                                count += 1;
                            }
                        }
                    }
                    count
                })
                .unwrap_or(0);

            if frozen_here > 0 {
                self.frozen.notify(&OutputsFrozen {
                    cell,
                    frozen: frozen_here,
                });
            }
            total += frozen_here;
        }
        debug!(frozen = total, "froze live outputs");
        total
    }

    /// Freeze everything, stamp the notebook with the trust flag and a
    /// timestamp, and request a save of the host document.
    ///
    /// Invoked at session teardown, possibly after the control-process
    /// connection has already died: this is purely local state mutation plus
    /// a save request, never channel traffic.
    pub fn finalize_all(&self) -> Finalized {
        let frozen = self.freeze_all();
        let stamp = self.notebook.stamp_finalized();
        self.notebook.request_save();
        info!(
            frozen,
            trusted = stamp.trusted,
            "finalized notebook outputs"
        );
        stamp
    }

    /// Restore every code cell's outputs on notebook open.
    ///
    /// Frozen records append their snapshot without executing; a live record
    /// that somehow survived is re-executed through its replay invocation,
    /// falling back to its text placeholder. Each cell's requirement set is
    /// then re-evaluated through the gate, fire-and-forget: failures are
    /// logged, not fatal, since the cell may simply be showing stale output.
    ///
    /// Must run on the tokio runtime (requirement rechecks are spawned).
    /// Returns the rendered output-area markup per cell.
    pub async fn restore_all(&self) -> BTreeMap<CellId, String> {
        let mut rendered = BTreeMap::new();

        for cell in self.notebook.code_cell_ids() {
            // Take the outputs out so replay can suspend without holding
            // the notebook lock; a cell deleted meanwhile drops them.
            let Some(mut outputs) = self
                .notebook
                .with_cell(cell, |c| std::mem::take(&mut c.outputs))
            else {
                continue;
            };

            let ctx = OutputContext::new(cell);
            let mut frozen = 0;
            let mut replayed = 0;
            for output in &mut outputs {
                if let Some(record) = output.as_record_mut() {
                    match record.restore(&ctx).await {
                        RestoreDisposition::Frozen => frozen += 1,
                        RestoreDisposition::Replayed => replayed += 1,
                        RestoreDisposition::Placeholder => {}
                    }
                }
            }

            if self.notebook.with_cell(cell, |c| c.outputs = outputs).is_none() {
                continue;
            }

            rendered.insert(cell, ctx.anchor.html());
            self.restored.notify(&OutputsRestored {
                cell,
                frozen,
                replayed,
            });

            self.recheck_requirements(cell);
        }

        rendered
    }

    /// Re-evaluate one cell's requirement set through the gate without
    /// blocking restoration.
    fn recheck_requirements(&self, cell: CellId) {
        let Some(required) = self.notebook.requirements(cell) else {
            return;
        };
        if required.is_empty() {
            return;
        }

        let gate = Arc::clone(&self.gate);
        tokio::spawn(async move {
            if let Err(err) = gate.resolve_all(Some(cell), &required).await {
                warn!(cell = %cell, error = %err, "stale requirements failed to resolve");
            }
        });
    }
}
