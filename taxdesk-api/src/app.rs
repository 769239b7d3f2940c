/// Application state and router builder
///
/// # Routes
///
/// ```text
/// /health                        public
/// /api/auth/*                    public (auth limiter) + authenticated
/// /api/users/*                   admin or self
/// /api/tax-returns/*             role and ownership checked per handler
/// /api/contact                   public POST (auth limiter), admin otherwise
/// /api/uploads/*                 tax return access
/// /api/admin/*                   admin
/// ```
///
/// # Middleware Stack
///
/// Outermost first: security headers, CORS, tracing, general rate limit on
/// `/api`, then per-router bearer authentication and the admin guard.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use taxdesk_api::{app::{build_router, AppState}, config::Config, storage::LocalFileStore};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = sqlx::PgPool::connect(&config.database.url).await?;
/// let storage = LocalFileStore::new(&config.uploads.dir).await?;
/// let app = build_router(AppState::new(pool, config, Arc::new(storage)));
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::get,
    Router,
};
use sqlx::PgPool;
use taxdesk_shared::auth::authorization::require_role;
use taxdesk_shared::auth::middleware::{authenticate, bearer_token};
use taxdesk_shared::models::user::Role;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Config;
use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::middleware::rate_limit::{api_rate_limit, RateLimiter};
use crate::middleware::security::SecurityHeadersLayer;
use crate::routes;
use crate::storage::FileStore;

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub storage: Arc<dyn FileStore>,

    /// General API limiter
    pub api_limiter: Arc<RateLimiter>,

    /// Limiter for auth endpoints and the contact form
    pub auth_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config, storage: Arc<dyn FileStore>) -> Self {
        let window = Duration::from_millis(config.rate_limit.window_ms);

        Self {
            db,
            api_limiter: Arc::new(RateLimiter::new(config.rate_limit.max_requests, window)),
            auth_limiter: Arc::new(RateLimiter::new(config.rate_limit.auth_max_requests, window)),
            config: Arc::new(config),
            storage,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    /// Lifetime of newly issued tokens
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.jwt.expires_in_secs)
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/auth", routes::auth::router(&state))
        .nest("/users", routes::users::router(&state))
        .nest("/tax-returns", routes::tax_returns::router(&state))
        .nest("/contact", routes::contact::router(&state))
        .nest("/uploads", routes::uploads::router(&state))
        .nest("/admin", routes::admin::router(&state))
        .layer(from_fn_with_state(state.clone(), api_rate_limit));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if config.allows_any_origin() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

/// Resolves the bearer token into a `Principal` request extension
pub async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header)?;

    let principal = authenticate(&state.db, token, state.jwt_secret()).await?;
    tracing::debug!(user_id = %principal.user_id, role = %principal.role, "Authenticated request");

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Rejects non-admin principals; must run after [`jwt_auth_layer`]
pub async fn require_admin(
    CurrentUser(principal): CurrentUser,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    require_role(&principal, &[Role::Admin])?;
    Ok(next.run(req).await)
}
