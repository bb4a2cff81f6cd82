//! Recorder state machine.
//!
//! The recorder's lifecycle is an explicit value ([`RecordingPhase`]) moved
//! by a pure function ([`next_phase`]). The `Recorder` applies the returned
//! [`Transition`] and performs the side effects; keeping the table here makes
//! it testable without a device.

use serde::{Deserialize, Serialize};

/// Phase of a single recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPhase {
    /// No attempt in progress
    Idle,

    /// Waiting for the device to hand over a stream
    Requesting,

    /// Encoder running, chunks being accepted
    Active,

    /// Stop requested, encoder draining
    Stopping,

    /// Attempt finished with exactly one artifact
    Finalized,
}

impl Default for RecordingPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for RecordingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordingPhase::Idle => "idle",
            RecordingPhase::Requesting => "requesting",
            RecordingPhase::Active => "active",
            RecordingPhase::Stopping => "stopping",
            RecordingPhase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Inputs that can move the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderInput {
    /// Caller asked to start a new attempt
    Start,

    /// The device produced a stream and the encoder is running
    StreamAcquired,

    /// Device acquisition or encoder start failed
    AcquireFailed,

    /// The encoder emitted a segment
    Chunk,

    /// The encoder reported a recoverable problem
    EncoderWarning,

    /// The encoder reported a problem it cannot continue from
    EncoderFailed,

    /// Caller asked to stop
    Stop,

    /// The encoder closed its channel after a stop request
    DrainComplete,

    /// Caller discarded the attempt
    Reset,
}

/// Result of applying an input to a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to a new phase
    To(RecordingPhase),

    /// Input accepted, phase unchanged
    Stay,

    /// Input has no meaning in this phase and is a no-op
    Ignored,

    /// Input is not allowed in this phase and must be reported
    Rejected,
}

/// Compute the transition for `input` in `phase`.
pub fn next_phase(phase: RecordingPhase, input: RecorderInput) -> Transition {
    use RecorderInput as I;
    use RecordingPhase as P;

    match (phase, input) {
        (P::Idle, I::Start) => Transition::To(P::Requesting),
        (_, I::Start) => Transition::Rejected,

        (P::Requesting, I::StreamAcquired) => Transition::To(P::Active),
        (P::Requesting, I::AcquireFailed) => Transition::To(P::Idle),

        // Segments drained after the stop request still belong to the attempt
        (P::Active | P::Stopping, I::Chunk) => Transition::Stay,

        (P::Active | P::Stopping, I::EncoderWarning) => Transition::Stay,
        (P::Active, I::EncoderFailed) => Transition::To(P::Idle),
        (P::Stopping, I::EncoderFailed) => Transition::Stay,

        (P::Active, I::Stop) => Transition::To(P::Stopping),
        (P::Stopping, I::DrainComplete) => Transition::To(P::Finalized),

        (_, I::Reset) => Transition::To(P::Idle),

        _ => Transition::Ignored,
    }
}
