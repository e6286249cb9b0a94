pub mod config;
pub mod flow;
#[cfg(feature = "livekit")]
pub mod livekit;

// Re-export commonly used items for convenience
pub use config::FlowConfig;
pub use flow::{
    ConnectionDetails, ConnectionState, Engine, FlowError, FlowResult, Node, Pad, RunState,
};
