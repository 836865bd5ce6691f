//! Diagnostic event stream.
//!
//! Every pacing decision that deviates from the happy path emits exactly one
//! event here, so drop/duplicate/fallback behavior stays observable.

/// Events emitted by the scheduler and orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A display tick arrived before the pair's synthetic frames; the last
    /// frame was presented again.
    MissedInterpolation { pair: u64 },
    /// Backpressure retired a pair before it finished draining.
    FrameDropped { pair: u64 },
    /// An interpolation request outlived its deadline and the pair
    /// force-advanced with whatever frames had arrived.
    InterpolationTimedOut { pair: u64 },
    /// The backend failed a pair; its interval presents real frames only.
    InterpolationFailed { pair: u64, reason: String },
    /// The capture source reported itself unavailable.
    CaptureStalled { reason: String },
    /// The presentation surface was lost and rebuilt.
    SurfaceRebuilt,
}

pub type EventSender = flume::Sender<PipelineEvent>;
pub type EventReceiver = flume::Receiver<PipelineEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    flume::unbounded()
}

/// Send without caring whether anyone is listening; diagnostics must never
/// stall the pipeline.
pub fn emit(tx: &EventSender, event: PipelineEvent) {
    let _ = tx.send(event);
}
