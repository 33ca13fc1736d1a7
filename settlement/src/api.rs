//! HTTP boundary
//!
//! JSON handlers over [`SettlementEngine`]. Mutating admin routes read the
//! acting admin from the `X-Admin-Id` header.

use crate::engine::{SettlementEngine, SettlementRequest, WalletRequest};
use crate::Error;
use actix_web::{web, HttpRequest, HttpResponse};
use ledger_core::types::DEFAULT_PAGE_LIMIT;
use ledger_core::{PageRequest, TransferFilter, TransferStatus, TransferUpdate, UserId};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying the acting admin's id
pub const ADMIN_HEADER: &str = "X-Admin-Id";

type Engine = web::Data<Arc<SettlementEngine>>;

/// `?page=&limit=`
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

impl PageQuery {
    fn to_request(&self) -> Result<PageRequest, Error> {
        Ok(PageRequest::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )?)
    }
}

/// `GET /settlements` filters
#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    user_id: Option<String>,
    status: Option<TransferStatus>,
    page: Option<u32>,
    limit: Option<u32>,
}

/// `POST /users`
#[derive(Debug, Deserialize)]
pub struct RegisterUserBody {
    user_id: String,
}

/// `POST /users/{id}/purchases`
#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    credits: i64,
    reference: Option<String>,
    description: Option<String>,
}

/// `POST /users/{id}/adjustments`
#[derive(Debug, Deserialize)]
pub struct AdjustmentBody {
    amount: i64,
    reason: String,
}

/// `GET /admin/activity`
#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    limit: Option<usize>,
}

fn admin_id(req: &HttpRequest) -> Result<String, Error> {
    req.headers()
        .get(ADMIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("missing {} header", ADMIN_HEADER)))
}

/// Health check endpoint
pub async fn health_check(engine: Engine) -> Result<HttpResponse, Error> {
    let stats = engine.stats()?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "settlement-server",
        "version": env!("CARGO_PKG_VERSION"),
        "ledger": stats
    })))
}

/// Prometheus metrics
pub async fn metrics(engine: Engine) -> Result<HttpResponse, Error> {
    let body = engine.render_metrics()?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Initiate a settlement
pub async fn create_settlement(
    engine: Engine,
    req: HttpRequest,
    body: web::Json<SettlementRequest>,
) -> Result<HttpResponse, Error> {
    let admin = admin_id(&req)?;
    let result = engine.initiate_settlement(&admin, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(result))
}

/// Apply an admin patch to a settlement
pub async fn update_settlement(
    engine: Engine,
    req: HttpRequest,
    transfer_id: web::Path<Uuid>,
    body: web::Json<TransferUpdate>,
) -> Result<HttpResponse, Error> {
    let admin = admin_id(&req)?;
    let transfer = engine
        .update_settlement(&admin, transfer_id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(transfer))
}

/// Get settlement by ID
pub async fn get_settlement(
    engine: Engine,
    transfer_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let transfer = engine.get_transfer(transfer_id.into_inner())?;
    Ok(HttpResponse::Ok().json(transfer))
}

/// List settlements, newest first
pub async fn list_settlements(
    engine: Engine,
    query: web::Query<TransferQuery>,
) -> Result<HttpResponse, Error> {
    let query = query.into_inner();
    let filter = TransferFilter {
        user_id: query.user_id.map(UserId::new),
        status: query.status,
    };
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .to_request()?;

    Ok(HttpResponse::Ok().json(engine.list_transfers(&filter, page)?))
}

/// Register a user
pub async fn create_user(
    engine: Engine,
    req: HttpRequest,
    body: web::Json<RegisterUserBody>,
) -> Result<HttpResponse, Error> {
    let admin = admin_id(&req)?;
    let account = engine
        .register_user(&admin, UserId::new(body.into_inner().user_id))
        .await?;
    Ok(HttpResponse::Created().json(account))
}

/// Current balance
pub async fn get_balance(engine: Engine, user_id: web::Path<String>) -> Result<HttpResponse, Error> {
    let user_id = UserId::new(user_id.into_inner());
    let balance = engine.get_balance(&user_id)?;
    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "balance": balance
    })))
}

/// Paginated ledger, newest first
pub async fn list_ledger(
    engine: Engine,
    user_id: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, Error> {
    let user_id = UserId::new(user_id.into_inner());
    let page = engine.list_entries(&user_id, query.to_request()?)?;
    Ok(HttpResponse::Ok().json(page))
}

/// Record a completed purchase
pub async fn create_purchase(
    engine: Engine,
    user_id: web::Path<String>,
    body: web::Json<PurchaseBody>,
) -> Result<HttpResponse, Error> {
    let body = body.into_inner();
    let entry = engine
        .complete_purchase(
            &UserId::new(user_id.into_inner()),
            body.credits,
            body.reference,
            body.description,
        )
        .await?;
    Ok(HttpResponse::Created().json(entry))
}

/// Manual credit adjustment
pub async fn create_adjustment(
    engine: Engine,
    req: HttpRequest,
    user_id: web::Path<String>,
    body: web::Json<AdjustmentBody>,
) -> Result<HttpResponse, Error> {
    let admin = admin_id(&req)?;
    let entry = engine
        .adjust_credits(
            &admin,
            &UserId::new(user_id.into_inner()),
            body.amount,
            &body.reason,
        )
        .await?;
    Ok(HttpResponse::Created().json(entry))
}

/// Register a wallet
pub async fn add_wallet(
    engine: Engine,
    req: HttpRequest,
    user_id: web::Path<String>,
    body: web::Json<WalletRequest>,
) -> Result<HttpResponse, Error> {
    let admin = admin_id(&req)?;
    let wallet = engine
        .add_wallet(&admin, &UserId::new(user_id.into_inner()), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(wallet))
}

/// A user's wallets
pub async fn list_wallets(engine: Engine, user_id: web::Path<String>) -> Result<HttpResponse, Error> {
    let wallets = engine.list_wallets(&UserId::new(user_id.into_inner()))?;
    Ok(HttpResponse::Ok().json(wallets))
}

/// Replay check of a user's history
pub async fn verify_user(engine: Engine, user_id: web::Path<String>) -> Result<HttpResponse, Error> {
    let report = engine.verify_user(&UserId::new(user_id.into_inner()))?;
    Ok(HttpResponse::Ok().json(report))
}

/// Recent admin activity
pub async fn list_activity(
    engine: Engine,
    query: web::Query<ActivityQuery>,
) -> Result<HttpResponse, Error> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT as usize);
    Ok(HttpResponse::Ok().json(engine.recent_activity(limit).await?))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| Error::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| Error::Validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| Error::Validation(err.to_string()).into()),
    )
    .route("/health", web::get().to(health_check))
    .route("/metrics", web::get().to(metrics))
    .service(
        web::scope("/settlements")
            .route("", web::post().to(create_settlement))
            .route("", web::get().to(list_settlements))
            .route("/{id}", web::get().to(get_settlement))
            .route("/{id}", web::patch().to(update_settlement)),
    )
    .service(
        web::scope("/users")
            .route("", web::post().to(create_user))
            .route("/{id}/balance", web::get().to(get_balance))
            .route("/{id}/ledger", web::get().to(list_ledger))
            .route("/{id}/purchases", web::post().to(create_purchase))
            .route("/{id}/adjustments", web::post().to(create_adjustment))
            .route("/{id}/wallets", web::post().to(add_wallet))
            .route("/{id}/wallets", web::get().to(list_wallets))
            .route("/{id}/verify", web::get().to(verify_user)),
    )
    .route("/admin/activity", web::get().to(list_activity));
}
