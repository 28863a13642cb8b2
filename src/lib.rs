//! Callboard is the account, verification and sign-in API for the
//! Callboard casting platform.

#![forbid(unsafe_code)]
#![deny(unused_mut)]

pub mod account;
pub mod config;
pub mod crypto;
mod database;
pub mod error;
pub mod google;
pub mod mail;
mod router;
pub mod token;

use std::sync::Arc;

use account::{AccountRegistry, AccountStore, PgAccountStore};
use axum::Router;
use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use google::{DisabledVerifier, GoogleVerifier, IdentityVerifier};
use mail::{MailManager, Mailer};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub registry: AccountRegistry,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /register` goes to `register`.
        .route("/register", post(router::register::handler))
        // `POST /verify` goes to `verify`.
        .route("/verify", post(router::verify::handler))
        // Role-scoped credential sign-in.
        .route("/login/director", post(router::login::director))
        .route("/login/artist", post(router::login::artist))
        // Federated sign-in.
        .route("/login/google", post(router::google::handler))
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    // handle jwt. the signing secret is fatal when absent.
    let secret = std::env::var("TOKEN_SECRET")
        .expect("missing `TOKEN_SECRET` environnement variable");
    let token = token::TokenManager::new(secret);

    let pwd = crypto::PasswordManager::new(config.argon2.clone())?;

    // handle mail sender.
    let mail: Arc<dyn Mailer> = if let Some(cfg) = &config.mail {
        Arc::new(MailManager::new(cfg).await?)
    } else {
        Arc::new(MailManager::default())
    };

    // handle federated sign-in.
    let identity: Arc<dyn IdentityVerifier> =
        if let Some(cfg) = &config.google {
            Arc::new(GoogleVerifier::new(&cfg.client_id)?)
        } else {
            tracing::warn!("missing `google` entry, federated sign-in disabled");
            Arc::new(DisabledVerifier)
        };

    let store: Arc<dyn AccountStore> =
        Arc::new(PgAccountStore::new(db.postgres));
    let registry = AccountRegistry::new(store, pwd, token, mail, identity);

    Ok(AppState { config, registry })
}
