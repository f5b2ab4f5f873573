//! HTTP route handlers.
//!
//! Every `/api` route maps onto exactly one worker command; the worker's JSON
//! reply is returned verbatim.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Request, State},
    handler::HandlerWithoutStateExt,
    http::{Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{MethodRouter, delete, get, post},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::bridge::protocol::WorkerCommand;
use crate::bus::BusError;
use crate::service::{HealthSnapshot, KitchenService, ServiceError};

/// Errors surfaced at the HTTP boundary as `{"error": "..."}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("route not found")]
    RouteNotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCommand(e) => Self::BadRequest(e.to_string()),
            ServiceError::Bus(e) => Self::Bus(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Bus(e) => {
                tracing::error!(error = %e, "Worker command failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

#[derive(Debug, Deserialize)]
struct CatalogRequest {
    name: String,
    unit: String,
}

#[derive(Debug, Deserialize)]
struct StockRequest {
    id: i64,
    qtd: f64,
}

#[derive(Debug, Deserialize)]
struct RecipeRequest {
    name: String,
    preparo: String,
}

#[derive(Debug, Deserialize)]
struct RecipeIngredientRequest {
    id_receita: i64,
    id_ingrediente: i64,
    qtd: f64,
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    id: i64,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id: {raw:?}")))
}

async fn run(service: &KitchenService, command: WorkerCommand) -> ApiResult {
    Ok(Json(service.execute(command).await?))
}

async fn health_check(State(service): State<Arc<KitchenService>>) -> Json<HealthSnapshot> {
    Json(service.health())
}

async fn get_data(State(service): State<Arc<KitchenService>>) -> ApiResult {
    run(&service, WorkerCommand::GetAll).await
}

async fn add_catalog_item(State(service): State<Arc<KitchenService>>, body: Bytes) -> ApiResult {
    let CatalogRequest { name, unit } = parse_body(&body)?;
    run(&service, WorkerCommand::AddCatalogItem { name, unit }).await
}

async fn delete_catalog_item(
    State(service): State<Arc<KitchenService>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    run(&service, WorkerCommand::DeleteCatalogItem { id }).await
}

async fn add_stock(State(service): State<Arc<KitchenService>>, body: Bytes) -> ApiResult {
    let StockRequest { id, qtd } = parse_body(&body)?;
    run(&service, WorkerCommand::AddStock { id, quantity: qtd }).await
}

async fn delete_stock(
    State(service): State<Arc<KitchenService>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    run(&service, WorkerCommand::DeleteStock { id }).await
}

async fn add_recipe(State(service): State<Arc<KitchenService>>, body: Bytes) -> ApiResult {
    let RecipeRequest { name, preparo } = parse_body(&body)?;
    run(
        &service,
        WorkerCommand::AddRecipe {
            name,
            preparation: preparo,
        },
    )
    .await
}

async fn delete_recipe(
    State(service): State<Arc<KitchenService>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    run(&service, WorkerCommand::DeleteRecipe { id }).await
}

async fn add_recipe_ingredient(
    State(service): State<Arc<KitchenService>>,
    body: Bytes,
) -> ApiResult {
    let request: RecipeIngredientRequest = parse_body(&body)?;
    run(
        &service,
        WorkerCommand::AddRecipeIngredient {
            recipe_id: request.id_receita,
            ingredient_id: request.id_ingrediente,
            quantity: request.qtd,
        },
    )
    .await
}

async fn enqueue_order(State(service): State<Arc<KitchenService>>, body: Bytes) -> ApiResult {
    let OrderRequest { id } = parse_body(&body)?;
    run(&service, WorkerCommand::EnqueueOrder { recipe_id: id }).await
}

async fn process_order(State(service): State<Arc<KitchenService>>) -> ApiResult {
    run(&service, WorkerCommand::ProcessOrder).await
}

async fn cancel_order(
    State(service): State<Arc<KitchenService>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    run(&service, WorkerCommand::CancelOrder { id }).await
}

async fn route_not_found() -> ApiError {
    ApiError::RouteNotFound
}

async fn asset_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// The browser sends preflights expecting an empty 204.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// A wrong method on a known API path is still "route not found", not 405.
fn api(method_router: MethodRouter<Arc<KitchenService>>) -> MethodRouter<Arc<KitchenService>> {
    method_router.fallback(route_not_found)
}

fn api_routes() -> Router<Arc<KitchenService>> {
    Router::new()
        .route("/data", api(get(get_data)))
        .route("/catalog", api(post(add_catalog_item)))
        .route("/catalog/{id}", api(delete(delete_catalog_item)))
        .route("/stock", api(post(add_stock)))
        .route("/stock/{id}", api(delete(delete_stock)))
        .route("/recipe", api(post(add_recipe)))
        .route("/recipe/{id}", api(delete(delete_recipe)))
        .route("/recipe/ingredient", api(post(add_recipe_ingredient)))
        .route("/order", api(post(enqueue_order)))
        .route("/order/process", api(post(process_order)))
        .route("/order/{id}", api(delete(cancel_order)))
        .fallback(route_not_found)
}

/// Unknown `/api` paths are JSON 404s; everything else outside the API is a
/// dashboard asset from the web directory.
pub fn routes(service: Arc<KitchenService>) -> Router {
    let assets = ServeDir::new(service.web_dir())
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(asset_not_found.into_service());

    Router::new()
        .route("/health-check", get(health_check))
        .nest("/api", api_routes())
        .fallback_service(assets)
        .layer(cors())
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(service)
}
