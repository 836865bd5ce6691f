//! Frame-pacing scheduler.
//!
//! The only component with mutable pipeline state. It is a pure state
//! machine: entry points never touch an adapter or hold a lock across one.
//! Instead, `on_captured` and `on_tick` return commands (submit/cancel) and
//! tick outcomes (present/repeat) for the orchestrator to execute after the
//! borrow ends.
//!
//! A pair walks `Awaiting Second Frame -> Interpolation Requested ->
//! Interpolation Ready -> Draining -> Retired`. When the display tick
//! outruns the backend, the last frame is repeated (`MissedInterpolation`);
//! when the pipeline falls more than `max_pending_pairs` behind, the oldest
//! pair is dropped outright (`FrameDropped`) so end-to-end latency stays
//! bounded.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::events::{emit, EventSender, PipelineEvent};
use crate::frame::{Frame, FrameKind};
use crate::interpolate::{fractions_for_multiplier, InterpolationJob};
use crate::PacingConfig;

/// Backend work the orchestrator must run on the scheduler's behalf,
/// outside any scheduler borrow.
#[derive(Debug)]
pub enum BackendCommand {
    Submit(InterpolationJob),
    Cancel { pair: u64 },
}

/// What the display should do this tick.
#[derive(Debug)]
pub enum TickAction {
    /// A frame not shown before.
    Present(Frame),
    /// Nothing new is ready; show the previous frame again.
    Repeat(Frame),
    /// Nothing has ever been presented.
    Idle,
}

#[derive(Debug)]
pub struct TickOutcome {
    pub action: TickAction,
    pub commands: Vec<BackendCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    Requested,
    Ready,
    Draining,
}

struct FramePair {
    seq: u64,
    first: Frame,
    second: Frame,
    state: PairState,
    /// A request is outstanding; absence of synthetics means "wait", not
    /// "move on".
    awaiting_results: bool,
    /// Ready synthetics, ascending by fraction, all ahead of the cursor.
    pending: Vec<Frame>,
    /// Highest fraction already presented.
    presented_fraction: f32,
    first_done: bool,
    second_done: bool,
    requested_at: Instant,
}

enum Step {
    Frame(Frame),
    NotReady,
    Exhausted,
}

impl FramePair {
    fn new(seq: u64, first: Frame, second: Frame) -> Self {
        let requested_at = second.timestamp;
        Self {
            seq,
            first,
            second,
            state: PairState::Requested,
            awaiting_results: true,
            pending: Vec::new(),
            presented_fraction: 0.0,
            first_done: false,
            second_done: false,
            requested_at,
        }
    }

    /// Stop waiting on the backend and drain with whatever arrived.
    fn settle(&mut self) {
        self.awaiting_results = false;
        if self.state == PairState::Requested {
            self.state = PairState::Ready;
        }
    }

    fn next_step(&mut self) -> Step {
        if !self.first_done {
            self.first_done = true;
            self.state = PairState::Draining;
            return Step::Frame(self.first.clone());
        }
        if !self.pending.is_empty() {
            let frame = self.pending.remove(0);
            if let FrameKind::Synthetic { fraction, .. } = frame.kind() {
                self.presented_fraction = fraction;
            }
            self.state = PairState::Draining;
            return Step::Frame(frame);
        }
        if self.awaiting_results {
            return Step::NotReady;
        }
        if !self.second_done {
            self.second_done = true;
            self.state = PairState::Draining;
            return Step::Frame(self.second.clone());
        }
        Step::Exhausted
    }
}

pub struct PacingScheduler {
    config: PacingConfig,
    min_pair_interval: Duration,
    interpolation_timeout: Duration,
    pairs: VecDeque<FramePair>,
    next_pair_seq: u64,
    /// First half of the next pair (`Awaiting Second Frame`).
    pending_first: Option<Frame>,
    /// The lone bootstrap frame has already been shown.
    pending_first_presented: bool,
    last_presented: Option<Frame>,
    last_real_presented: Option<u64>,
    events: EventSender,
}

impl PacingScheduler {
    pub fn new(config: PacingConfig, events: EventSender) -> Self {
        let min_pair_interval = Duration::from_millis(config.min_pair_interval_ms);
        let interpolation_timeout = Duration::from_millis(config.interpolation_timeout_ms);
        Self {
            config,
            min_pair_interval,
            interpolation_timeout,
            pairs: VecDeque::new(),
            next_pair_seq: 0,
            pending_first: None,
            pending_first_presented: false,
            last_presented: None,
            last_real_presented: None,
            events,
        }
    }

    pub fn pending_pairs(&self) -> usize {
        self.pairs.len()
    }

    /// A new real frame arrived from the capture source.
    pub fn on_captured(&mut self, frame: Frame) -> Vec<BackendCommand> {
        let mut commands = Vec::new();
        metrics::counter!("frames_captured").increment(1);

        let first = match self.pending_first.take() {
            None => {
                self.pending_first = Some(frame);
                self.pending_first_presented = false;
                return commands;
            }
            Some(first) => first,
        };

        // "Latest frame" grabbers re-deliver identical frames; coalesce
        // grabs closer together than the minimum pair interval.
        let interval = frame.timestamp.saturating_duration_since(first.timestamp);
        if interval < self.min_pair_interval {
            trace!(sequence = frame.meta.sequence, "coalesced near-duplicate grab");
            metrics::counter!("frames_coalesced").increment(1);
            self.pending_first = Some(first);
            return commands;
        }

        // The newest pair owns the backend: older outstanding requests are
        // canceled and their pairs drain with whatever already arrived.
        for pair in self.pairs.iter_mut() {
            if pair.awaiting_results {
                debug!(pair = pair.seq, "superseded; canceling interpolation");
                pair.settle();
                commands.push(BackendCommand::Cancel { pair: pair.seq });
            }
        }

        self.next_pair_seq += 1;
        let seq = self.next_pair_seq;
        trace!(
            pair = seq,
            a = first.meta.sequence,
            b = frame.meta.sequence,
            interval_us = interval.as_micros() as u64,
            "pair closed, interpolation requested"
        );

        commands.push(BackendCommand::Submit(InterpolationJob {
            pair: seq,
            first: first.clone(),
            second: frame.clone(),
            fractions: fractions_for_multiplier(self.config.multiplier),
        }));
        self.pairs.push_back(FramePair::new(seq, first, frame.clone()));

        // The closing frame opens the next interval.
        self.pending_first = Some(frame);
        self.pending_first_presented = true;
        commands
    }

    /// Synthetic frames came back from the backend (complete or the partial
    /// remainder of a canceled request).
    pub fn on_interpolated(&mut self, pair_seq: u64, frames: Vec<Frame>) {
        let Some(pair) = self.pairs.iter_mut().find(|p| p.seq == pair_seq) else {
            // Retired or dropped; consuming the frames releases them.
            debug!(pair = pair_seq, n = frames.len(), "results for retired pair discarded");
            return;
        };
        pair.settle();

        if pair.second_done {
            // The interval is over; showing these now would go backwards.
            return;
        }

        for frame in frames {
            let fraction = match frame.kind() {
                FrameKind::Synthetic { fraction, .. } => fraction,
                FrameKind::Real => {
                    warn!(pair = pair_seq, "backend returned a real frame; ignored");
                    continue;
                }
            };
            let passed = fraction <= pair.presented_fraction;
            let duplicate = pair.pending.iter().any(|f| {
                matches!(f.kind(), FrameKind::Synthetic { fraction: g, .. } if g == fraction)
            });
            if !passed && !duplicate {
                pair.pending.push(frame);
            }
        }
        pair.pending.sort_by(|x, y| {
            let fx = match x.kind() {
                FrameKind::Synthetic { fraction, .. } => fraction,
                FrameKind::Real => 0.0,
            };
            let fy = match y.kind() {
                FrameKind::Synthetic { fraction, .. } => fraction,
                FrameKind::Real => 0.0,
            };
            fx.total_cmp(&fy)
        });
        trace!(pair = pair_seq, ready = pair.pending.len(), "interpolation ready");
    }

    /// The backend gave up on a pair; its interval presents real frames only.
    pub fn on_interpolation_failed(&mut self, pair_seq: u64, reason: &str) {
        if let Some(pair) = self.pairs.iter_mut().find(|p| p.seq == pair_seq) {
            pair.settle();
            pair.pending.clear();
        }
        warn!(pair = pair_seq, reason, "interpolation failed; real frames only");
        emit(
            &self.events,
            PipelineEvent::InterpolationFailed {
                pair: pair_seq,
                reason: reason.to_string(),
            },
        );
    }

    /// One display refresh. Walks the oldest pair in timestamp order:
    /// real A, synthetics ascending by fraction, real B.
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        let mut commands = Vec::new();

        // Bound end-to-end latency: beyond the threshold the oldest pair is
        // dropped whole, a visible skip instead of unbounded lag.
        while self.pairs.len() > self.config.max_pending_pairs {
            if let Some(mut dropped) = self.pairs.pop_front() {
                warn!(pair = dropped.seq, "pipeline behind; dropping oldest pair");
                if dropped.awaiting_results {
                    dropped.settle();
                    commands.push(BackendCommand::Cancel { pair: dropped.seq });
                }
                metrics::counter!("pairs_dropped").increment(1);
                emit(&self.events, PipelineEvent::FrameDropped { pair: dropped.seq });
            }
        }

        loop {
            let last_real = self.last_real_presented;
            let timeout = self.interpolation_timeout;
            let Some(pair) = self.pairs.front_mut() else {
                break;
            };

            // Consecutive pairs share their boundary frame; don't show it twice.
            if !pair.first_done && last_real == Some(pair.first.meta.sequence) {
                pair.first_done = true;
            }

            if pair.awaiting_results
                && now.saturating_duration_since(pair.requested_at) > timeout
            {
                debug!(pair = pair.seq, "interpolation deadline passed");
                pair.settle();
                emit(
                    &self.events,
                    PipelineEvent::InterpolationTimedOut { pair: pair.seq },
                );
            }

            match pair.next_step() {
                Step::Frame(frame) => {
                    return TickOutcome {
                        action: self.present(frame),
                        commands,
                    };
                }
                Step::NotReady => {
                    // Smoothness over novelty: repeat rather than block.
                    metrics::counter!("missed_interpolations").increment(1);
                    emit(
                        &self.events,
                        PipelineEvent::MissedInterpolation { pair: pair.seq },
                    );
                    return TickOutcome {
                        action: self.repeat(),
                        commands,
                    };
                }
                Step::Exhausted => {
                    if let Some(retired) = self.pairs.pop_front() {
                        trace!(pair = retired.seq, "pair retired");
                    }
                }
            }
        }

        // No pair yet: the very first captured frame is still presentable.
        if !self.pending_first_presented {
            if let Some(first) = self.pending_first.clone() {
                self.pending_first_presented = true;
                return TickOutcome {
                    action: self.present(first),
                    commands,
                };
            }
        }

        TickOutcome {
            action: self.repeat(),
            commands,
        }
    }

    fn present(&mut self, frame: Frame) -> TickAction {
        if frame.kind().is_real() {
            self.last_real_presented = Some(frame.meta.sequence);
        }
        metrics::counter!("frames_presented").increment(1);
        self.last_presented = Some(frame.clone());
        TickAction::Present(frame)
    }

    fn repeat(&mut self) -> TickAction {
        match &self.last_presented {
            Some(frame) => {
                metrics::counter!("frames_repeated").increment(1);
                TickAction::Repeat(frame.clone())
            }
            None => TickAction::Idle,
        }
    }
}
