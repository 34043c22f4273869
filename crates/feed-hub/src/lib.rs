//! Live order book feeds shared between consumers.
//!
//! - [`ConnectionRegistry`] keeps one upstream connection per stream key.
//! - [`StreamMultiplexer`] fans one upstream session out to every observer.
//! - [`supervise`] / [`FeedHandle`] retry failures, watch for silence and
//!   publish a [`FeedState`] per consumer.
//! - [`FeedHub`] wires them together.

mod config;
mod hub;
mod multiplexer;
mod registry;
mod supervisor;

#[cfg(test)]
mod testing;

pub use config::FeedConfig;
pub use hub::FeedHub;
pub use multiplexer::{SharedStream, StreamEvent, StreamMultiplexer};
pub use registry::{Connection, ConnectionRegistry};
pub use supervisor::{
    supervise, FeedFailure, FeedHandle, FeedPhase, FeedState, SupervisorPolicy,
};
