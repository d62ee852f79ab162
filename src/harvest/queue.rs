use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::host::Scheduler;
use crate::tree::InteractionPayload;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<InteractionPayload>,
    batches: Vec<Vec<InteractionPayload>>,
    dropped: usize,
    flush_armed: bool,
}

/// Saved interaction payloads awaiting harvest.
///
/// The first payload pushed into an empty queue arms a one-shot flush on
/// the raw scheduler; the flush moves everything pending into a batch.
#[derive(Clone)]
pub struct HarvestQueue {
    state: Arc<Mutex<QueueState>>,
    scheduler: Arc<dyn Scheduler>,
    max_len: usize,
    interval_ms: u64,
}

impl HarvestQueue {
    pub fn new(scheduler: Arc<dyn Scheduler>, max_len: usize, interval_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            scheduler,
            max_len: max_len.max(1),
            interval_ms,
        }
    }

    pub fn push(&self, payload: InteractionPayload) {
        let arm = {
            let mut state = self.state.lock();
            state.pending.push_back(payload);
            while state.pending.len() > self.max_len {
                if let Some(oldest) = state.pending.pop_front() {
                    state.dropped += 1;
                    warn!(
                        interaction_id = oldest.id,
                        max = self.max_len,
                        "Harvest queue full, dropping oldest payload"
                    );
                }
            }
            let arm = !state.flush_armed;
            state.flush_armed = true;
            arm
        };
        if arm {
            self.arm_flush();
        }
    }

    fn arm_flush(&self) {
        let state: Weak<Mutex<QueueState>> = Arc::downgrade(&self.state);
        self.scheduler.set_timeout(
            self.interval_ms,
            Box::new(move || {
                if let Some(state) = state.upgrade() {
                    flush_state(&mut state.lock());
                }
            }),
        );
    }

    /// Move pending payloads into a harvested batch. Returns the batch size.
    pub fn flush(&self) -> usize {
        flush_state(&mut self.state.lock())
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn dropped(&self) -> usize {
        self.state.lock().dropped
    }

    /// Batches harvested so far, oldest first
    pub fn batches(&self) -> Vec<Vec<InteractionPayload>> {
        self.state.lock().batches.clone()
    }

    /// Drain every payload, harvested or still pending, in arrival order
    pub fn take(&self) -> Vec<InteractionPayload> {
        let mut state = self.state.lock();
        let mut payloads: Vec<InteractionPayload> =
            state.batches.drain(..).flatten().collect();
        payloads.extend(state.pending.drain(..));
        payloads
    }
}

fn flush_state(state: &mut QueueState) -> usize {
    state.flush_armed = false;
    if state.pending.is_empty() {
        return 0;
    }
    let batch: Vec<InteractionPayload> = state.pending.drain(..).collect();
    let len = batch.len();
    debug!(payloads = len, "Harvested interaction batch");
    state.batches.push(batch);
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::tree::{NodeId, NodePayload, NodeType};
    use serde_json::Map;

    fn payload(id: u64) -> InteractionPayload {
        InteractionPayload {
            id,
            trigger: "click".into(),
            start: 0,
            end: Some(1),
            initial_page_url: None,
            old_url: None,
            new_url: None,
            old_route: None,
            new_route: None,
            custom_name: None,
            custom: Map::new(),
            root: NodePayload {
                id: NodeId(id),
                node_type: NodeType::Interaction,
                name: None,
                start: 0,
                end: Some(1),
                callback_duration: 0,
                attributes: Map::new(),
                children: Vec::new(),
            },
        }
    }

    #[test]
    fn full_queue_drops_oldest() {
        let host = Host::new("http://app.test/");
        let queue = HarvestQueue::new(host.scheduler(), 2, 100);
        for id in 1..=3 {
            queue.push(payload(id));
        }

        assert_eq!(queue.dropped(), 1);
        let ids: Vec<u64> = queue.take().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn flush_timer_batches_pending_payloads() {
        let host = Host::new("http://app.test/");
        let queue = HarvestQueue::new(host.scheduler(), 10, 100);
        queue.push(payload(1));
        queue.push(payload(2));

        host.advance(99);
        assert!(queue.batches().is_empty());
        host.advance(1);
        assert_eq!(queue.batches().len(), 1);
        assert_eq!(queue.pending(), 0);

        queue.push(payload(3));
        host.run_until_idle();
        let sizes: Vec<usize> = queue.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }
}
