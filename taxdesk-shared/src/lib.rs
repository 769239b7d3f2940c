//! # TaxDesk Shared Library
//!
//! Persistence and security building blocks used by the TaxDesk API server.
//!
//! ## Module Organization
//!
//! - `auth`: Password hashing, JWT handling, one-time tokens, principals and authorization checks
//! - `db`: Connection pool and migrations
//! - `models`: Database models and their queries

pub mod auth;
pub mod db;
pub mod models;

/// Current version of the TaxDesk shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
