//! # quarry_core
//!
//! Core domain logic for Quarry: the authorization and request-mediation
//! plane shared by the gateway and the tool server.

pub mod authz;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod kv;
pub mod observer;
pub mod principal;
pub mod ratelimit;
pub mod retriever;
pub mod session;
pub mod users;
pub mod uuid;

pub use error::{Error, Result};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
