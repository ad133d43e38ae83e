mod error;
mod http;
mod lifecycle;
mod metrics;
mod models;
mod query;
mod security;
mod store;
mod supabase;
mod validate;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use error::{MarketError, MarketErrorKind};
use lifecycle::{
    CleanupReport, DashboardPage, ImageRemoval, ImageUpload, ListingDetail, ListingManager,
    MarketplacePage, MAX_IMAGE_BYTES,
};
use models::{ApiError, CylinderSize, Listing, Profile};
use query::{ListingQuery, SortKey, TypeFilter};
use security::{Session, require_session};
use supabase::{AuthSession, SupabaseAuth, SupabaseRest, SupabaseStorage};
use validate::{RawListingInput, RawProfileInput, SignInInput, SignUpInput};

type Manager = ListingManager<SupabaseRest, SupabaseStorage>;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "gasbora.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let manager = ListingManager::new(
        Arc::new(SupabaseRest::from_env()),
        Arc::new(SupabaseStorage::from_env()),
    );
    let auth = SupabaseAuth::from_env();
    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");

    let state = AppState {
        manager,
        auth: auth.clone(),
        openapi: Arc::new(openapi),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/my/listings", get(my_listings))
        .route("/listings", post(create_listing))
        .route(
            "/listings/{id}",
            patch(update_listing).delete(delete_listing),
        )
        .route("/listings/{id}/status", post(toggle_listing_status))
        .route("/listings/{id}/images", post(add_listing_image))
        .route(
            "/listings/{id}/images/{index}",
            axum::routing::delete(remove_listing_image),
        )
        .route(
            "/images",
            post(upload_image)
                .delete(remove_image)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024)),
        )
        .route("/profiles/me", patch(update_my_profile))
        .route("/auth/signout", post(sign_out))
        .route_layer(middleware::from_fn_with_state(auth, require_session));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/listings", get(list_listings))
        .route("/listings/{id}", get(get_listing))
        .route("/profiles/{user_id}", get(get_profile))
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "gasbora.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    manager: Manager,
    auth: SupabaseAuth,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "gasbora-api",
    }))
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(MarketError::permission("docs", "unauthorized").into());
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Gasbora API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

// -------- Marketplace (public) --------

/// Browse query parameters, all optional; unknown enum values are rejected
/// rather than silently widened to "all".
#[derive(Debug, Default, Deserialize)]
struct BrowseParams {
    search: Option<String>,
    size: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    min_price: Option<String>,
    max_price: Option<String>,
    sort: Option<String>,
}

fn browse_query(params: &BrowseParams) -> Result<ListingQuery, MarketError> {
    let mut query = ListingQuery::unfiltered();
    if let Some(search) = &params.search {
        query.search = search.trim().to_string();
    }
    if let Some(raw) = &params.size {
        query.size = Some(CylinderSize::from_label(raw).ok_or_else(|| {
            MarketError::invalid_field("browse", "size", format!("unknown cylinder size: {raw}"))
        })?);
    }
    if let Some(raw) = &params.kind {
        query.kind = match raw.as_str() {
            "all" => TypeFilter::All,
            "full" => TypeFilter::Full,
            "refill" => TypeFilter::Refill,
            other => {
                return Err(MarketError::invalid_field(
                    "browse",
                    "type",
                    format!("unknown listing type: {other}"),
                ));
            }
        };
    }
    if let Some(raw) = &params.min_price {
        query.min_price = parse_price("min_price", raw)?;
    }
    if let Some(raw) = &params.max_price {
        query.max_price = parse_price("max_price", raw)?;
    }
    if let Some(raw) = &params.sort {
        query.sort = match raw.as_str() {
            "newest" => SortKey::Newest,
            "price-low" => SortKey::PriceLow,
            "price-high" => SortKey::PriceHigh,
            other => {
                return Err(MarketError::invalid_field(
                    "browse",
                    "sort",
                    format!("unknown sort key: {other}"),
                ));
            }
        };
    }
    Ok(query)
}

fn parse_price(field: &'static str, raw: &str) -> Result<f64, MarketError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| {
            MarketError::invalid_field("browse", field, format!("not a valid price: {raw}"))
        })
}

/// Marketplace browse with filter and sort parameters.
///
/// - Method: `GET`
/// - Path: `/listings`
/// - Auth: none
async fn list_listings(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Result<Json<MarketplacePage>, AppError> {
    metrics::inc_requests("/listings");
    let query = browse_query(&params)?;
    Ok(Json(state.manager.browse(&query).await?))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListingDetail>, AppError> {
    metrics::inc_requests("/listings/{id}");
    let id = parse_id("get_listing", &id)?;
    Ok(Json(state.manager.detail(id).await?))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Profile>, AppError> {
    let user_id = parse_id("get_profile", &user_id)?;
    Ok(Json(state.manager.profile(user_id).await?))
}

/// Self-service profile edit; the session identity scopes the write, so no
/// id appears in the path.
async fn update_my_profile(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<RawProfileInput>,
) -> Result<Json<Profile>, AppError> {
    metrics::inc_requests("/profiles/me#patch");
    Ok(Json(
        state
            .manager
            .update_profile(session.user_id, &input)
            .await?,
    ))
}

fn parse_id(op: &'static str, raw: &str) -> Result<Uuid, MarketError> {
    Uuid::parse_str(raw).map_err(|_| MarketError::invalid_field(op, "id", "not a valid id"))
}

// -------- Auth --------

async fn sign_up(
    State(state): State<AppState>,
    Json(input): Json<SignUpInput>,
) -> Result<Json<AuthSession>, AppError> {
    metrics::inc_requests("/auth/signup");
    let role =
        validate::sign_up(&input).map_err(|fields| MarketError::validation("sign_up", fields))?;
    Ok(Json(state.auth.sign_up(&input, role).await?))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(input): Json<SignInInput>,
) -> Result<Json<AuthSession>, AppError> {
    metrics::inc_requests("/auth/signin");
    validate::sign_in(&input).map_err(|fields| MarketError::validation("sign_in", fields))?;
    Ok(Json(state.auth.sign_in(&input.email, &input.password).await?))
}

async fn sign_out(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<StatusCode, AppError> {
    state.auth.sign_out(&session.access_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -------- Listing lifecycle (session required) --------

/// Listing form body: the raw fields plus the ordered image URL sequence.
#[derive(Debug, Deserialize)]
struct ListingForm {
    #[serde(flatten)]
    fields: RawListingInput,
    #[serde(default)]
    images: Vec<String>,
}

async fn my_listings(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<DashboardPage>, AppError> {
    metrics::inc_requests("/my/listings");
    Ok(Json(state.manager.dashboard(session.user_id).await?))
}

async fn create_listing(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(form): Json<ListingForm>,
) -> Result<(StatusCode, Json<Listing>), AppError> {
    metrics::inc_requests("/listings#post");
    let created = state
        .manager
        .create(session.user_id, &form.fields, form.images)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_listing(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(form): Json<ListingForm>,
) -> Result<Json<Listing>, AppError> {
    metrics::inc_requests("/listings/{id}#patch");
    let id = parse_id("update_listing", &id)?;
    let updated = state
        .manager
        .update(session.user_id, id, &form.fields, form.images)
        .await?;
    Ok(Json(updated))
}

async fn delete_listing(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<CleanupReport>, AppError> {
    metrics::inc_requests("/listings/{id}#delete");
    let id = parse_id("delete_listing", &id)?;
    Ok(Json(state.manager.delete(session.user_id, id).await?))
}

async fn toggle_listing_status(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    metrics::inc_requests("/listings/{id}/status");
    let id = parse_id("toggle_status", &id)?;
    Ok(Json(state.manager.toggle_status(session.user_id, id).await?))
}

async fn add_listing_image(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<ImageUrlBody>,
) -> Result<Json<Listing>, AppError> {
    metrics::inc_requests("/listings/{id}/images#post");
    let id = parse_id("add_listing_image", &id)?;
    Ok(Json(
        state.manager.add_image(session.user_id, id, body.url).await?,
    ))
}

async fn remove_listing_image(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<Listing>, AppError> {
    metrics::inc_requests("/listings/{id}/images#delete");
    let id = parse_id("remove_listing_image", &id)?;
    Ok(Json(
        state
            .manager
            .remove_image_at(session.user_id, id, index)
            .await?,
    ))
}

// -------- Images (session required) --------

#[derive(Debug, serde::Serialize)]
struct UploadResponse {
    url: String,
}

async fn upload_image(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    metrics::inc_requests("/images#post");
    let mime = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let url = state
        .manager
        .upload_image(
            session.user_id,
            ImageUpload {
                bytes: body.to_vec(),
                mime,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { url })))
}

#[derive(Debug, Deserialize)]
struct ImageUrlBody {
    url: String,
}

async fn remove_image(
    State(state): State<AppState>,
    Json(request): Json<ImageUrlBody>,
) -> Result<Json<ImageRemoval>, AppError> {
    metrics::inc_requests("/images#delete");
    Ok(Json(state.manager.remove_image(&request.url).await))
}

// -------- Error mapping --------

#[derive(Debug)]
struct AppError(MarketError);

impl From<MarketError> for AppError {
    fn from(value: MarketError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            MarketErrorKind::Validation => StatusCode::BAD_REQUEST,
            MarketErrorKind::Permission => StatusCode::FORBIDDEN,
            MarketErrorKind::NotFound => StatusCode::NOT_FOUND,
            MarketErrorKind::Conflict => StatusCode::CONFLICT,
            MarketErrorKind::Capacity => StatusCode::PAYLOAD_TOO_LARGE,
            MarketErrorKind::Transport => StatusCode::BAD_GATEWAY,
        };
        let payload = ApiError {
            error: self.0.op().to_string(),
            detail: Some(self.0.detail().to_string()),
            fields: self.0.fields().cloned(),
        };
        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browse_params_default_to_the_unfiltered_query() {
        let query = browse_query(&BrowseParams::default()).expect("defaults");
        assert!(query.search.is_empty());
        assert_eq!(query.size, None);
        assert_eq!(query.kind, TypeFilter::All);
        assert_eq!(query.min_price, 0.0);
        assert_eq!(query.max_price, f64::MAX);
        assert_eq!(query.sort, SortKey::Newest);
    }

    #[test]
    fn browse_params_parse_each_filter() {
        let params = BrowseParams {
            search: Some("  k-gas ".to_string()),
            size: Some("13kg".to_string()),
            kind: Some("refill".to_string()),
            min_price: Some("500".to_string()),
            max_price: Some("3000".to_string()),
            sort: Some("price-low".to_string()),
        };
        let query = browse_query(&params).expect("valid");
        assert_eq!(query.search, "k-gas");
        assert_eq!(query.size, Some(CylinderSize::Kg13));
        assert_eq!(query.kind, TypeFilter::Refill);
        assert_eq!(query.min_price, 500.0);
        assert_eq!(query.max_price, 3000.0);
        assert_eq!(query.sort, SortKey::PriceLow);
    }

    #[test]
    fn unknown_enum_values_are_rejected_not_widened() {
        for params in [
            BrowseParams {
                size: Some("9kg".to_string()),
                ..BrowseParams::default()
            },
            BrowseParams {
                kind: Some("empty".to_string()),
                ..BrowseParams::default()
            },
            BrowseParams {
                sort: Some("cheapest".to_string()),
                ..BrowseParams::default()
            },
            BrowseParams {
                min_price: Some("NaN".to_string()),
                ..BrowseParams::default()
            },
        ] {
            let err = browse_query(&params).expect_err("bad param");
            assert_eq!(err.kind(), MarketErrorKind::Validation);
        }
    }

    #[test]
    fn invalid_uuid_is_a_field_error() {
        let err = parse_id("get_listing", "not-a-uuid").expect_err("invalid");
        assert_eq!(err.kind(), MarketErrorKind::Validation);
        assert!(err.fields().is_some_and(|f| f.contains_key("id")));
    }
}
