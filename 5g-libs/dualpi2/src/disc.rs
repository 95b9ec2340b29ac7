use crate::{Dualpi2Config, QueueItem, QueueMode, TrafficClass};
use packet::Packet;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sim::{EventId, Scheduler, SimTime};
use slog::{Logger, debug, trace};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Counters exposed as an immutable snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dualpi2Stats {
    /// Packets rejected at enqueue because the queue was full.
    pub forced_drop: u32,
    /// Not-ECT Classic packets dropped by the coupled probability.
    pub unforced_classic_drop: u32,
    /// ECT Classic packets CE-marked by the coupled probability.
    pub unforced_classic_mark: u32,
    /// L4S packets CE-marked by threshold or probability.
    pub unforced_l4s_mark: u32,
}

/// Cloneable handle to a DualPI² queue pair.
///
/// The probability update timer keeps only a weak reference, so dropping the
/// last handle stops the controller.
#[derive(Clone)]
pub struct Dualpi2 {
    state: Rc<RefCell<State>>,
}

struct State {
    cfg: Dualpi2Config,
    classic: VecDeque<QueueItem>,
    l4s: VecDeque<QueueItem>,
    classic_bytes: usize,
    l4s_bytes: usize,
    drop_prob: f64,
    classic_drop_prob: f64,
    l4s_drop_prob: f64,
    qdelay_old: Duration,
    // derived from the config at construction
    t_shift: Duration,
    alpha_u: f64,
    beta_u: f64,
    stats: Dualpi2Stats,
    rng: SmallRng,
    scheduler: Scheduler,
    update_event: EventId,
    logger: Logger,
}

impl Dualpi2 {
    pub fn new(cfg: Dualpi2Config, scheduler: &Scheduler, logger: &Logger) -> Self {
        let state = Rc::new(RefCell::new(State {
            t_shift: 2 * cfg.classic_delay_ref,
            alpha_u: cfg.alpha * cfg.t_update.as_secs_f64(),
            beta_u: cfg.beta * cfg.t_update.as_secs_f64(),
            rng: SmallRng::seed_from_u64(cfg.seed),
            classic: VecDeque::new(),
            l4s: VecDeque::new(),
            classic_bytes: 0,
            l4s_bytes: 0,
            drop_prob: 0.0,
            classic_drop_prob: 0.0,
            l4s_drop_prob: 0.0,
            qdelay_old: Duration::ZERO,
            stats: Dualpi2Stats::default(),
            scheduler: scheduler.clone(),
            update_event: EventId::default(),
            logger: logger.clone(),
            cfg,
        }));
        let first_update = state.borrow().cfg.s_update;
        let event = State::schedule_update(&state, first_update);
        state.borrow_mut().update_event = event;
        Dualpi2 { state }
    }

    /// Stamp the arrival tag and queue the item by class.  Returns false,
    /// counting a forced drop, if the limit would be exceeded.
    pub fn enqueue(&self, item: QueueItem) -> bool {
        self.state.borrow_mut().enqueue(item)
    }

    /// Put an item back at the front of its class queue.  No limit check,
    /// and the item keeps its timestamps.
    pub fn requeue(&self, item: QueueItem) {
        self.state.borrow_mut().requeue(item)
    }

    /// Pick a queue by time-shifted head comparison and apply the class's
    /// marking or dropping rule.  Returns None only when both queues are
    /// empty.
    pub fn dequeue(&self) -> Option<QueueItem> {
        self.state.borrow_mut().dequeue()
    }

    /// Head-of-line packet of one class, if any.
    pub fn peek(&self, class: TrafficClass) -> Option<Packet> {
        let state = self.state.borrow();
        let queue = match class {
            TrafficClass::Classic => &state.classic,
            TrafficClass::L4S => &state.l4s,
        };
        queue.front().map(|item| item.packet().clone())
    }

    /// Occupancy in the configured unit (packets or bytes).
    pub fn queue_size(&self) -> usize {
        self.state.borrow().queue_size()
    }

    pub fn queue_size_bytes(&self) -> usize {
        let state = self.state.borrow();
        state.classic_bytes + state.l4s_bytes
    }

    pub fn packet_count(&self) -> usize {
        let state = self.state.borrow();
        state.classic.len() + state.l4s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet_count() == 0
    }

    /// The later of the two head-of-queue arrival timestamps; zero when both
    /// queues are empty.  Callers subtract this from now to get the
    /// head-of-line delay.
    pub fn head_of_line_timestamp(&self) -> SimTime {
        self.state.borrow().head_of_line_timestamp()
    }

    pub fn drop_probability(&self) -> f64 {
        self.state.borrow().drop_prob
    }

    /// Force the base probability and rederive the coupled pair.
    pub fn set_drop_probability(&self, prob: f64) {
        let mut state = self.state.borrow_mut();
        let k = state.cfg.k as f64;
        state.drop_prob = prob;
        state.l4s_drop_prob = prob * k;
        state.classic_drop_prob = prob * prob;
    }

    pub fn classic_drop_probability(&self) -> f64 {
        self.state.borrow().classic_drop_prob
    }

    pub fn l4s_drop_probability(&self) -> f64 {
        self.state.borrow().l4s_drop_prob
    }

    pub fn stats(&self) -> Dualpi2Stats {
        self.state.borrow().stats
    }
}

impl State {
    fn queue_size(&self) -> usize {
        match self.cfg.mode {
            QueueMode::Packets => self.classic.len() + self.l4s.len(),
            QueueMode::Bytes => self.classic_bytes + self.l4s_bytes,
        }
    }

    fn head_of_line_timestamp(&self) -> SimTime {
        let classic_time = self
            .classic
            .front()
            .map(|item| item.arrival())
            .unwrap_or(SimTime::ZERO);
        let l4s_time = self
            .l4s
            .front()
            .map(|item| item.arrival())
            .unwrap_or(SimTime::ZERO);
        classic_time.max(l4s_time)
    }

    fn enqueue(&mut self, mut item: QueueItem) -> bool {
        item.stamp_arrival(self.scheduler.now());

        let n_queued = self.queue_size();
        let over_limit = match self.cfg.mode {
            QueueMode::Packets => n_queued >= self.cfg.queue_limit,
            QueueMode::Bytes => n_queued + item.size() > self.cfg.queue_limit,
        };
        if over_limit {
            self.stats.forced_drop += 1;
            debug!(self.logger, "Queue limit reached, packet dropped";
                "size" => item.size());
            return false;
        }

        trace!(self.logger, "Enqueuing packet"; "l4s" => item.is_l4s(), "size" => item.size());
        match item.class() {
            TrafficClass::L4S => {
                self.l4s_bytes += item.size();
                self.l4s.push_back(item);
            }
            TrafficClass::Classic => {
                self.classic_bytes += item.size();
                self.classic.push_back(item);
            }
        }
        true
    }

    fn requeue(&mut self, item: QueueItem) {
        match item.class() {
            TrafficClass::L4S => {
                self.l4s_bytes += item.size();
                self.l4s.push_front(item);
            }
            TrafficClass::Classic => {
                self.classic_bytes += item.size();
                self.classic.push_front(item);
            }
        }
    }

    fn dequeue(&mut self) -> Option<QueueItem> {
        let now = self.scheduler.now();

        while self.queue_size() > 0 {
            let classic_time = self
                .classic
                .front()
                .map(|item| item.arrival())
                .unwrap_or(SimTime::ZERO);
            let l4s_time = self
                .l4s
                .front()
                .map(|item| item.arrival())
                .unwrap_or(SimTime::ZERO);

            if !self.l4s.is_empty() && l4s_time + self.t_shift >= classic_time {
                let mut item = self.l4s.pop_front().unwrap();
                self.l4s_bytes -= item.size();

                // Threshold marking only bites while the L4S queue holds more
                // than a couple of packets, to avoid marking a draining tail.
                let above_floor = match self.cfg.mode {
                    QueueMode::Bytes => self.l4s_bytes > 2 * self.cfg.mean_packet_size,
                    QueueMode::Packets => self.l4s.len() > 2,
                };
                if (now - item.arrival() > self.cfg.l4s_threshold && above_floor)
                    || self.l4s_drop_prob > self.rng.random::<f64>()
                {
                    item.mark();
                    self.stats.unforced_l4s_mark += 1;
                }
                return Some(item);
            }

            let mut item = self.classic.pop_front().unwrap();
            self.classic_bytes -= item.size();

            if self.classic_drop_prob / self.cfg.k as f64 > self.rng.random::<f64>() {
                if item.mark() {
                    self.stats.unforced_classic_mark += 1;
                    return Some(item);
                }
                if self.queue_size() > 0 {
                    self.stats.unforced_classic_drop += 1;
                    debug!(self.logger, "Unmarkable Classic packet dropped";
                        "size" => item.size());
                    continue;
                }
                // The only packet in the queue: send it rather than starve.
                return Some(item);
            }
            return Some(item);
        }
        None
    }

    /// One PI² controller round: sample the Classic head-of-line delay,
    /// integrate towards the delay reference, square-couple the result.
    fn calculate_p(state: &Rc<RefCell<State>>) {
        let mut s = state.borrow_mut();
        let now = s.scheduler.now();
        let qdelay = s
            .classic
            .front()
            .map(|item| now - item.arrival())
            .unwrap_or(Duration::ZERO);

        // Zero delay with a non-empty queue means the backlog is below the
        // drain rate; leave the probability alone this round.
        if qdelay.is_zero() && s.queue_size() > 0 {
            let period = s.cfg.t_update;
            drop(s);
            let event = State::schedule_update(state, period);
            state.borrow_mut().update_event = event;
            return;
        }

        let delta = s.alpha_u * (qdelay.as_secs_f64() - s.cfg.classic_delay_ref.as_secs_f64())
            + s.beta_u * (qdelay.as_secs_f64() - s.qdelay_old.as_secs_f64());
        let mut prob = s.drop_prob + delta;

        // Collapse quickly once the queue has been idle for two periods.
        if qdelay.is_zero() && s.qdelay_old.is_zero() {
            prob *= 0.98;
        }
        prob = prob.clamp(0.0, 1.0);

        let k = s.cfg.k as f64;
        s.drop_prob = prob;
        s.l4s_drop_prob = prob * k;
        s.classic_drop_prob = prob * prob;
        s.qdelay_old = qdelay;
        trace!(s.logger, "Probability update";
            "qdelay_us" => qdelay.as_micros() as u64, "p" => prob);

        let period = s.cfg.t_update;
        drop(s);
        let event = State::schedule_update(state, period);
        state.borrow_mut().update_event = event;
    }

    fn schedule_update(state: &Rc<RefCell<State>>, delay: Duration) -> EventId {
        let weak = Rc::downgrade(state);
        let scheduler = state.borrow().scheduler.clone();
        scheduler.schedule(delay, move || {
            if let Some(state) = weak.upgrade() {
                State::calculate_p(&state);
            }
        })
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.update_event.cancel();
    }
}
