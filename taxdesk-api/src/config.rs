/// Configuration management for the API server
///
/// Configuration is read from environment variables (a `.env` file is loaded
/// first when present). Parsing goes through [`Config::from_lookup`] so it can
/// be exercised without touching the process environment.
///
/// # Environment Variables
///
/// - `API_HOST` (default `0.0.0.0`), `API_PORT` or `PORT` (default `8080`)
/// - `APP_ENV`: `production` enables HSTS
/// - `CORS_ORIGIN`: comma separated origins or `*` (default `*`)
/// - `DATABASE_URL`, or `DB_HOST`/`DB_PORT`/`DB_NAME`/`DB_USER`/`DB_PASSWORD`
/// - `DATABASE_MAX_CONNECTIONS` (default 10)
/// - `JWT_SECRET` (required, at least 32 characters), `JWT_EXPIRES_IN` (default `7d`)
/// - `RATE_LIMIT_WINDOW_MS` (default 900000), `RATE_LIMIT_MAX_REQUESTS` (default 100),
///   `RATE_LIMIT_AUTH_MAX_REQUESTS` (default 10)
/// - `TRUST_PROXY` (default false): key rate limits on `X-Forwarded-For`
/// - `UPLOAD_DIR` (default `./uploads`), `MAX_FILE_SIZE` (default 10 MiB),
///   `MAX_FILES_PER_UPLOAD` (default 5), `ALLOWED_FILE_TYPES`
/// - `REQUIRE_EMAIL_VERIFICATION` (default false)
///
/// # Example
///
/// ```no_run
/// use taxdesk_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

const DEFAULT_ALLOWED_FILE_TYPES: &str = "pdf,jpg,jpeg,png,doc,docx,xls,xlsx,csv";
const MIN_JWT_SECRET_LEN: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub uploads: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Production mode enables HSTS
    pub production: bool,

    /// When false, new accounts are created verified
    pub require_email_verification: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 signing secret. Generate with `openssl rand -hex 32`.
    pub secret: String,

    /// Token lifetime in seconds
    pub expires_in_secs: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_ms: u64,

    /// Requests per window for general API routes
    pub max_requests: u32,

    /// Requests per window for auth and contact form routes
    pub auth_max_requests: u32,

    /// Use the first `X-Forwarded-For` hop instead of the peer address.
    /// Only safe behind a proxy that overwrites the header.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,

    /// Per-file size ceiling in bytes
    pub max_file_size: u64,

    pub max_files: usize,

    /// Lowercase extensions without the dot
    pub allowed_types: Vec<String>,
}

impl UploadConfig {
    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.allowed_types.iter().any(|allowed| *allowed == ext)
    }
}

impl Config {
    /// Loads configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from a variable lookup function
    ///
    /// # Errors
    ///
    /// Fails if a required variable is missing or a value doesn't parse.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("API_PORT").or_else(|| var("PORT")) {
            Some(port) => port.parse::<u16>().context("API_PORT must be a port number")?,
            None => 8080,
        };

        let cors_origins = split_list(&var("CORS_ORIGIN").unwrap_or_else(|| "*".to_string()));

        let database_url = match var("DATABASE_URL") {
            Some(url) => url,
            None => {
                let host = var("DB_HOST").context("DATABASE_URL or DB_HOST is required")?;
                taxdesk_shared::db::pool::DatabaseConfig::url_from_parts(
                    &host,
                    parse_or(&var, "DB_PORT", 5432)?,
                    &var("DB_NAME").unwrap_or_else(|| "taxdesk".to_string()),
                    &var("DB_USER").unwrap_or_else(|| "postgres".to_string()),
                    &var("DB_PASSWORD").unwrap_or_default(),
                )
            }
        };

        let jwt_secret = var("JWT_SECRET").context("JWT_SECRET environment variable is required")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {} characters long", MIN_JWT_SECRET_LEN);
        }

        let expires_in = var("JWT_EXPIRES_IN").unwrap_or_else(|| "7d".to_string());
        let expires_in_secs = parse_duration(&expires_in)
            .with_context(|| format!("Invalid JWT_EXPIRES_IN: {}", expires_in))?;

        Ok(Self {
            api: ApiConfig {
                host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
                cors_origins,
                production: var("APP_ENV").is_some_and(|env| env == "production"),
                require_email_verification: parse_or(&var, "REQUIRE_EMAIL_VERIFICATION", false)?,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                expires_in_secs,
            },
            rate_limit: RateLimitConfig {
                window_ms: parse_or(&var, "RATE_LIMIT_WINDOW_MS", 900_000)?,
                max_requests: parse_or(&var, "RATE_LIMIT_MAX_REQUESTS", 100)?,
                auth_max_requests: parse_or(&var, "RATE_LIMIT_AUTH_MAX_REQUESTS", 10)?,
                trust_proxy: parse_or(&var, "TRUST_PROXY", false)?,
            },
            uploads: UploadConfig {
                dir: PathBuf::from(var("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string())),
                max_file_size: parse_or(&var, "MAX_FILE_SIZE", 10 * 1024 * 1024)?,
                max_files: parse_or(&var, "MAX_FILES_PER_UPLOAD", 5)?,
                allowed_types: split_list(
                    &var("ALLOWED_FILE_TYPES").unwrap_or_else(|| DEFAULT_ALLOWED_FILE_TYPES.to_string()),
                )
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.api.cors_origins.iter().any(|origin| origin == "*")
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Parses `7d`, `24h`, `30m`, `45s` or a plain number of seconds
pub fn parse_duration(value: &str) -> anyhow::Result<i64> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((idx, 'd')) => (&value[..idx], 86_400),
        Some((idx, 'h')) => (&value[..idx], 3_600),
        Some((idx, 'm')) => (&value[..idx], 60),
        Some((idx, 's')) => (&value[..idx], 1),
        Some(_) => (value, 1),
        None => anyhow::bail!("Duration is empty"),
    };

    let amount: i64 = digits.parse().context("Duration must be a whole number")?;
    if amount <= 0 {
        anyhow::bail!("Duration must be positive");
    }

    Ok(amount * multiplier)
}
