//! Event scheduler backed by a min-heap keyed by (deadline, insertion order).

use crate::SimTime;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventState {
    Pending,
    Cancelled,
    Expired,
}

/// Handle to a scheduled event.
///
/// `cancel` is idempotent and safe on handles that already fired.  The
/// default handle was never armed and reports not-pending.
#[derive(Clone)]
pub struct EventId(Rc<Cell<EventState>>);

impl EventId {
    pub fn cancel(&self) {
        if self.0.get() == EventState::Pending {
            self.0.set(EventState::Cancelled);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.0.get() == EventState::Pending
    }
}

impl Default for EventId {
    fn default() -> Self {
        EventId(Rc::new(Cell::new(EventState::Expired)))
    }
}

struct Event {
    deadline: SimTime,
    seq: u64,
    state: Rc<Cell<EventState>>,
    action: Box<dyn FnOnce()>,
}

// BinaryHeap is a max-heap; order events so that the earliest (deadline, seq)
// pops first.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Core {
    now: SimTime,
    next_seq: u64,
    heap: BinaryHeap<Event>,
}

/// Cloneable handle to the single-threaded event loop.
#[derive(Clone)]
pub struct Scheduler(Rc<RefCell<Core>>);

impl Scheduler {
    pub fn new() -> Self {
        Scheduler(Rc::new(RefCell::new(Core {
            now: SimTime::ZERO,
            next_seq: 0,
            heap: BinaryHeap::new(),
        })))
    }

    pub fn now(&self) -> SimTime {
        self.0.borrow().now
    }

    /// Arm `action` to run `delay` after the current simulated time.
    pub fn schedule(&self, delay: Duration, action: impl FnOnce() + 'static) -> EventId {
        let mut core = self.0.borrow_mut();
        let deadline = core.now + delay;
        let seq = core.next_seq;
        core.next_seq += 1;
        let state = Rc::new(Cell::new(EventState::Pending));
        core.heap.push(Event {
            deadline,
            seq,
            state: state.clone(),
            action: Box::new(action),
        });
        EventId(state)
    }

    /// Run events until the heap is drained.
    pub fn run(&self) {
        while self.step(None) {}
    }

    /// Run every event due at or before `deadline`, then advance the clock to
    /// `deadline`.
    pub fn run_until(&self, deadline: SimTime) {
        while self.step(Some(deadline)) {}
        let mut core = self.0.borrow_mut();
        if core.now < deadline {
            core.now = deadline;
        }
    }

    // The borrow is released before the action runs so that events can
    // schedule further events.
    fn step(&self, limit: Option<SimTime>) -> bool {
        let event = {
            let mut core = self.0.borrow_mut();
            match core.heap.peek() {
                Some(ev) if limit.is_none_or(|t| ev.deadline <= t) => (),
                _ => return false,
            }
            let ev = core.heap.pop().unwrap();
            core.now = ev.deadline;
            ev
        };
        if event.state.get() == EventState::Pending {
            event.state.set(EventState::Expired);
            (event.action)();
        }
        true
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}
