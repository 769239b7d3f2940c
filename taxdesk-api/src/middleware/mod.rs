/// Middleware for the API server
///
/// - `security`: OWASP response headers
/// - `rate_limit`: In-process per-client token bucket limiter

pub mod rate_limit;
pub mod security;
