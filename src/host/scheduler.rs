//! Virtual clock with macrotask timers and a microtask queue

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{AsyncId, AsyncIdAllocator};

pub type Task = Box<dyn FnOnce() + Send>;

/// The raw timer facility the interaction tree schedules its finish checks on
pub trait Scheduler: Send + Sync {
    /// Current virtual time in milliseconds
    fn now(&self) -> u64;
    fn set_timeout(&self, delay_ms: u64, task: Task) -> AsyncId;
    /// Returns `true` if the timer was still pending
    fn clear_timeout(&self, id: AsyncId) -> bool;
}

/// Upper bound on macrotasks run by one [`EventLoop::run_until_idle`] call
const MAX_TASKS_PER_RUN: usize = 100_000;

#[derive(Default)]
struct LoopState {
    now: u64,
    seq: u64,
    timers: BTreeMap<(u64, u64), (AsyncId, Task)>,
    index: HashMap<AsyncId, (u64, u64)>,
    microtasks: VecDeque<Task>,
}

/// Single-threaded run-to-completion event loop over virtual time.
///
/// Tasks never run while the loop's lock is held, so a task may schedule or
/// clear other tasks freely.
pub struct EventLoop {
    ids: Arc<AsyncIdAllocator>,
    state: Mutex<LoopState>,
}

impl EventLoop {
    pub fn new(ids: Arc<AsyncIdAllocator>) -> Self {
        Self {
            ids,
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn queue_microtask(&self, task: Task) {
        self.state.lock().microtasks.push_back(task);
    }

    /// Run microtasks until the queue is empty, including ones queued meanwhile
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.state.lock().microtasks.pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    fn pop_due(&self, limit: Option<u64>) -> Option<Task> {
        let mut state = self.state.lock();
        let key = *state.timers.keys().next()?;
        if limit.is_some_and(|limit| key.0 > limit) {
            return None;
        }
        let (id, task) = state.timers.remove(&key)?;
        state.index.remove(&id);
        state.now = state.now.max(key.0);
        Some(task)
    }

    /// Run the earliest macrotask, then a microtask checkpoint.
    /// Returns `false` when no timer is pending.
    pub fn run_next(&self) -> bool {
        self.run_microtasks();
        match self.pop_due(None) {
            Some(task) => {
                task();
                self.run_microtasks();
                true
            }
            None => false,
        }
    }

    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
            if ran >= MAX_TASKS_PER_RUN {
                tracing::warn!(ran, "Event loop still busy, giving up");
                break;
            }
        }
        ran
    }

    /// Run every macrotask due within the next `ms`, then move the clock to the end
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.now() + ms;
        self.run_microtasks();
        let mut ran = 0;
        while let Some(task) = self.pop_due(Some(target)) {
            task();
            self.run_microtasks();
            ran += 1;
        }
        let mut state = self.state.lock();
        state.now = state.now.max(target);
        ran
    }

    /// Spend `ms` of virtual time inside the running task
    pub fn busy(&self, ms: u64) {
        self.state.lock().now += ms;
    }

    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.state.lock().microtasks.len()
    }
}

impl Scheduler for EventLoop {
    fn now(&self) -> u64 {
        self.state.lock().now
    }

    fn set_timeout(&self, delay_ms: u64, task: Task) -> AsyncId {
        let id = self.ids.next();
        let mut state = self.state.lock();
        let key = (state.now + delay_ms, state.seq);
        state.seq += 1;
        state.timers.insert(key, (id, task));
        state.index.insert(id, key);
        id
    }

    fn clear_timeout(&self, id: AsyncId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state
                .index
                .remove(&id)
                .and_then(|key| state.timers.remove(&key))
        };
        removed.is_some()
    }
}
