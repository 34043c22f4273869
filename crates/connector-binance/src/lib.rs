mod client;
mod parser;

pub use client::{depth_stream_name, DepthTransport, DEFAULT_DEPTH_LEVELS};
pub use parser::{parse_message, ParsedMessage};
