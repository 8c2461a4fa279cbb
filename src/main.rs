#![deny(clippy::all, clippy::pedantic)]

mod database;
mod error;
mod models;

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::Path,
    http::{StatusCode, header::LOCATION},
    response::Response,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use database::{Database, SharedStore, StoreError};
use error::UrlError;
use models::{AnalyticsItem, UrlRecord};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use url::Url;

const CODE_LENGTH: usize = 6;
const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lookup-then-create rounds the shortener runs before reporting the
/// code space as exhausted.
const ALLOCATION_ATTEMPTS: u32 = 5;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShortenParams {
    pub long_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShortenResponse {
    pub short_url: String,
}

/// Public base under which short links are served, e.g. `https://sho.rt`.
#[derive(Clone)]
struct BaseUrl(Arc<str>);

impl BaseUrl {
    fn new(raw: &str) -> Self {
        Self(Arc::from(raw.trim_end_matches('/')))
    }

    fn short_link(&self, code: &str) -> String {
        format!("{}/{code}", self.0)
    }
}

async fn shorten_url_route(
    store: Extension<SharedStore>,
    base_url: Extension<BaseUrl>,
    params: Json<ShortenParams>,
) -> Result<Json<ShortenResponse>, UrlError> {
    let Ok(url) = params.long_url.parse::<Url>() else {
        return Err(UrlError::MalformedUrl);
    };
    if !matches!(url.scheme(), "https" | "http") {
        return Err(UrlError::MalformedUrl);
    }

    let code = allocate_code(&store.0, &url).await?;

    Ok(Json(ShortenResponse {
        short_url: base_url.short_link(&code),
    }))
}

/// Returns the existing code for `url`, or allocates a fresh one.
///
/// A generated code that collides, or a concurrent shortening of the same
/// URL, surfaces as a duplicate-key failure on the conditional create;
/// both cases retry the lookup-then-create round.
async fn allocate_code(store: &SharedStore, url: &Url) -> Result<String, UrlError> {
    for _ in 0..ALLOCATION_ATTEMPTS {
        if let Some(existing) = store.find_by_long_url(url).await? {
            return Ok(existing.code);
        }

        let record = UrlRecord::new(generate_code(), url.clone());
        match store.insert(&record).await {
            Ok(()) => return Ok(record.code),
            Err(StoreError::DuplicateCode | StoreError::DuplicateLongUrl) => {}
            Err(err) => return Err(err.into()),
        }
    }

    Err(UrlError::CodeSpaceExhausted)
}

async fn redirect_route(
    store: Extension<SharedStore>,
    path: Path<String>,
) -> Result<Response, UrlError> {
    let target = store.record_visit(&path.0, today_utc()).await?;

    // Unknown codes fall back to the service root instead of a 404.
    let location = target.map_or_else(|| String::from("/"), String::from);
    Ok(Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(LOCATION, location)
        .body(Body::empty())
        .unwrap())
}

async fn analytics_route(
    store: Extension<SharedStore>,
) -> Result<Json<Vec<AnalyticsItem>>, UrlError> {
    let records = store.list().await?;

    Ok(Json(records.into_iter().map(AnalyticsItem::from).collect()))
}

async fn health_route() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}

#[must_use]
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let index = rng.random_range(0..CODE_ALPHABET.len());
            char::from(CODE_ALPHABET[index])
        })
        .collect()
}

/// Calendar day used for analytics bucketing. UTC, matching what
/// `createdAt` and the stored bucket dates use.
#[must_use]
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Assembles the service around an injected store handle.
pub fn router(store: SharedStore, base_url: &str) -> Router {
    Router::new()
        .route("/shorten", post(shorten_url_route))
        .route("/analytics", get(analytics_route))
        .route("/healthz", get(health_route))
        .route("/{code}", get(redirect_route))
        .layer(Extension(store))
        .layer(Extension(BaseUrl::new(base_url)))
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let mongodb_url =
        env::var("MONGODB_URL").expect("Expected MONGODB_URL as an environment variable");
    let base_url = env::var("BASE_URL").expect("Expected BASE_URL as an environment variable");
    let port = env::var("PORT").expect("Expected PORT as an environment variable");

    let database = Database::new(&mongodb_url).await.unwrap();
    let store: SharedStore = Arc::new(database);
    let app = router(store, &base_url);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .unwrap();

    axum::serve(listener, app).await.unwrap();
}
