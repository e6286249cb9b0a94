//! LiveKit room adapter
//!
//! Implements the flow [`Transport`](crate::flow::Transport) over the LiveKit
//! Rust SDK. Room events are forwarded as transport events; local capture
//! sources become named LiveKit tracks when a pad publishes them.

mod track;
mod transport;

pub use track::{LiveKitTrack, NativeTrack, extract_native_track};
pub use transport::LiveKitTransport;
