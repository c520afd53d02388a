use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A deferred action run against `C` on the owning activity's next tick.
pub type Task<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Queue of actions marshalled onto the update or render activity.
///
/// Clones share the queue, so a clone can be handed to another thread (a file
/// watcher, say) and tasks dispatched there run on the owner's next tick.
pub struct TaskQueue<C> {
    tasks: Arc<Mutex<VecDeque<Task<C>>>>,
}

impl<C> TaskQueue<C> {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn dispatch(&self, task: impl FnOnce(&mut C) + Send + 'static) {
        self.tasks.lock().push_back(Box::new(task));
    }

    /// Take every queued task, oldest first.
    pub fn drain(&self) -> Vec<Task<C>> {
        self.tasks.lock().drain(..).collect()
    }

    /// Run the tasks queued so far. Tasks dispatched while running wait for
    /// the next call.
    pub fn run_all(&self, ctx: &mut C) -> usize {
        let tasks = self.drain();
        let count = tasks.len();
        for task in tasks {
            task(ctx);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl<C> Clone for TaskQueue<C> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
        }
    }
}

impl<C> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TaskQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("queued", &self.len()).finish()
    }
}

#[derive(Debug, Default)]
struct GateState {
    updated: u64,
    rendered: u64,
    closed: bool,
}

/// Hand-off between the update and render threads.
///
/// The update thread may finish at most one frame before the render thread
/// has consumed it. Closing the gate wakes and stops both sides.
#[derive(Debug, Default)]
pub struct FrameGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update side: block until the previous update has been rendered.
    /// Returns `false` once the gate is closed.
    pub fn wait_for_render(&self) -> bool {
        let mut state = self.state.lock();
        while state.updated > state.rendered && !state.closed {
            self.cond.wait(&mut state);
        }
        !state.closed
    }

    pub fn signal_update(&self) {
        self.state.lock().updated += 1;
        self.cond.notify_all();
    }

    /// Render side: block until an update frame is ready. Returns `false`
    /// once the gate is closed.
    pub fn wait_for_update(&self) -> bool {
        let mut state = self.state.lock();
        while state.updated == state.rendered && !state.closed {
            self.cond.wait(&mut state);
        }
        !state.closed
    }

    pub fn signal_rendered(&self) {
        self.state.lock().rendered += 1;
        self.cond.notify_all();
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// `(updated, rendered)` frame counts.
    pub fn frames(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.updated, state.rendered)
    }
}
