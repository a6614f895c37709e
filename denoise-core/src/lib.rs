//! # denoise-core
//!
//! Real-time denoising transport.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureCallback ─raw SPSC ring─► ProcessingWorker (own thread)
//!                                                     │
//!                                            Denoiser::process_chunk
//!                                                     │
//! Speakers   ◄─ CaptureCallback ◄─denoised SPSC ring──┘
//!
//! SessionController: start / stop / switch_variant, status via broadcast
//! ```
//!
//! The audio callback is zero-alloc and lock-free. All heap work, engine
//! loading and rate conversion happen on the worker thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use audio::{AudioHost, CaptureCallback, GainControl, SignalSource, SimulatedHost};
pub use buffering::{AudioBridge, DiagnosticsSnapshot, RingBuffer};
pub use engine::{FailurePolicy, SessionConfig, SessionController};
pub use error::{DenoiseError, Result};
pub use inference::{
    ArtifactBundle, ArtifactLoader, BuiltinLoader, Denoiser, DenoiserLoader, EngineVariant,
    LoadContext, StubLoader,
};
pub use ipc::events::{SessionStatus, SessionStatusEvent};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalHost;

#[cfg(feature = "rnnoise")]
pub use inference::RnnoiseLoader;
