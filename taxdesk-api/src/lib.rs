//! # TaxDesk API Server Library
//!
//! HTTP layer of the TaxDesk tax-return filing service.
//!
//! ## Modules
//!
//! - `app`: Application state, router builder and authentication layers
//! - `config`: Environment configuration
//! - `error`: Error type and HTTP response mapping
//! - `extract`: Extractors with JSON error rejections
//! - `middleware`: Security headers and rate limiting
//! - `routes`: API route handlers
//! - `storage`: Document file storage

pub mod app;
pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod storage;
