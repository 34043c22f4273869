//! Read-only JSON client over `reqwest`.
//!
//! Used for catalog lookups; every call is a GET that decodes a JSON body or
//! maps the failure to a [`RestError`].

mod client;
mod error;

pub use client::RestClient;
pub use error::RestError;
