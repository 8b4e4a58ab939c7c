//! rt-backend: real-time audio backend client for a PipeWire-style
//! low-latency audio server.
//!
//! Bridges an application's device abstraction to the server via a
//! cooperative event loop: device discovery through registry/global
//! events, node/metadata proxies, POD-parsed format negotiation, and
//! playback/capture streams with real-time process callbacks and
//! clock-latency reporting.
//!
//! Out of scope: resampling, mixing, and session management — the
//! application is expected to adapt to whatever rate/layout the server
//! negotiates.

mod capture_stream;
mod device;
mod event_manager;
mod metadata_proxy;
mod node_proxy;
mod pod;
mod playback_stream;
mod ring_buffer;

pub use capture_stream::CaptureStream;
pub use device::{DeviceList, DeviceNode};
pub use event_manager::EventManager;
pub use metadata_proxy::MetadataProxy;
pub use node_proxy::NodeProxy;
pub use playback_stream::{MixerClock, PlaybackStream, RenderFn, StreamRequest};

pub use rt_core::{BackendError, BackendResult, Channels, ClockLatency, ClockTime, Latency, Sample};

/// Clamp applied to a negotiated sample rate.
pub const MIN_OUTPUT_RATE: u32 = 8_000;
pub const MAX_OUTPUT_RATE: u32 = 192_000;

/// Update-size bounds applied when a stream adopts the device's rate.
pub const MIN_UPDATE_SIZE: u32 = 64;
pub const MAX_UPDATE_SIZE: u32 = 8_192;
