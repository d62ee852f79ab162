use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// A callback failure as reported to the error harvest
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    /// The wrapper event that reported it: `fn-err`, `cb-err` or `tracer-err`
    pub event: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_interaction_id: Option<u64>,
}

#[derive(Default)]
struct CollectorState {
    /// Errors raised under a still-open interaction, keyed by its id
    pending: HashMap<u64, Vec<ErrorRecord>>,
    released: Vec<ErrorRecord>,
}

/// Holds errors raised inside an interaction until it finishes, then
/// releases them annotated (saved) or as-is (discarded).
///
/// Only errors of running interactions are held; nothing is kept per
/// interaction once it has been routed.
#[derive(Clone, Default)]
pub struct ErrorCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error raised while `interaction` was running.
    /// Errors outside a running interaction are released at once.
    pub fn record(&self, record: ErrorRecord, interaction: Option<u64>) {
        let mut state = self.state.lock();
        match interaction {
            Some(id) => state.pending.entry(id).or_default().push(record),
            None => state.released.push(record),
        }
    }

    pub fn on_saved(&self, interaction_id: u64) {
        let mut state = self.state.lock();
        if let Some(records) = state.pending.remove(&interaction_id) {
            state.released.extend(records.into_iter().map(|mut record| {
                record.browser_interaction_id = Some(interaction_id);
                record
            }));
        }
    }

    pub fn on_discarded(&self, interaction_id: u64) {
        let mut state = self.state.lock();
        if let Some(records) = state.pending.remove(&interaction_id) {
            state.released.extend(records);
        }
    }

    /// Errors still waiting on their interaction
    pub fn pending(&self) -> usize {
        self.state.lock().pending.values().map(Vec::len).sum()
    }

    /// Released errors, oldest first
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.lock().released.clone()
    }

    /// Drain the released errors
    pub fn take(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut self.state.lock().released)
    }
}
