// ============================================================================
// HTTP ROUTES
// ============================================================================
//
//   GET  /                               welcome / health
//   POST /api/users/register             pre-registration (public)
//   GET  /api/users/invite/{invite_code} invite lookup (public)
//   POST /api/users/referral             link referral (bearer)
//   POST /api/users/sync                 register or sync identity (bearer)
//   GET  /api/users/profile              owner profile (bearer)
//   PUT  /api/users/wallet-address       set wallet address (bearer)
//
// Handlers stay thin: authenticate, call the service, map the error.
//
// ============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::auth::{authenticate, IdentityVerifier, VerifiedIdentity};
use crate::error::{CoreError, CoreResult};
use crate::model::{ProfileHints, UserId};
use crate::service::ReferralService;

pub type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReferralService>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(service: Arc<ReferralService>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { service, verifier }
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, (StatusCode, Json<Value>)> {
        authenticate(self.verifier.as_ref(), headers).map_err(err)
    }
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(alias = "name")]
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "inviteCode", alias = "referredByCode")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(alias = "name")]
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralRequest {
    pub user_id: Option<String>,
    #[serde(alias = "referrerInviteCode", alias = "referralCode")]
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddressRequest {
    pub user_id: Option<String>,
    pub chain: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileQuery {
    pub user_id: Option<String>,
}

// ============================================================================
// ERRORS
// ============================================================================

pub fn status_for(e: &CoreError) -> StatusCode {
    match e {
        CoreError::InvalidIdentity(_)
        | CoreError::ReferrerNotFound(_)
        | CoreError::SelfReferral
        | CoreError::ReferralCycle(_)
        | CoreError::InvalidAmount(_)
        | CoreError::UnknownChain(_)
        | CoreError::InvalidAddressFormat { .. } => StatusCode::BAD_REQUEST,
        CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        CoreError::Forbidden => StatusCode::FORBIDDEN,
        CoreError::UserNotFound(_) | CoreError::InviteNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::ConcurrencyConflict | CoreError::EmailAlreadyRegistered(_) => StatusCode::CONFLICT,
        CoreError::CodeSpaceExhausted { .. } | CoreError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn err(e: CoreError) -> (StatusCode, Json<Value>) {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(kind = e.kind(), "Request failed: {}", e);
    }
    (
        status,
        Json(json!({ "success": false, "kind": e.kind(), "error": e.to_string() })),
    )
}

/// Run a store-backed call on the blocking pool. The task runs to
/// completion even if the client goes away.
async fn blocking<T, F>(f: F) -> Result<T, (StatusCode, Json<Value>)>
where
    F: FnOnce() -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(err),
        Err(e) => Err(err(CoreError::StoreUnavailable(format!("blocking task failed: {}", e)))),
    }
}

fn bad_body(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    let msg = msg.into();
    warn!("Rejected request body: {}", msg);
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "kind": "InvalidRequest", "error": msg })),
    )
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

pub async fn register_handler(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> ApiResult {
    let hints = ProfileHints {
        display_name: req.display_name,
        email: req.email,
    };
    let service = state.service.clone();
    let response = blocking(move || service.register(&hints, req.referral_code.as_deref())).await?;
    Ok(Json(json!({ "success": true, "user": response.user, "referral": response.referral })))
}

pub async fn invite_handler(State(state): State<AppState>, Path(invite_code): Path<String>) -> ApiResult {
    let service = state.service.clone();
    let details = blocking(move || service.get_invite_details(&invite_code)).await?;
    Ok(Json(json!({ "success": true, "invite": details })))
}

pub async fn referral_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReferralRequest>,
) -> ApiResult {
    let identity = state.authenticate(&headers)?;
    let user_id = req.user_id.map(UserId::from);
    let service = state.service.clone();
    let response = blocking(move || {
        service.process_referral(&identity.subject, user_id.as_ref(), &req.invite_code)
    })
    .await?;
    Ok(Json(json!({ "success": true, "linked": response.linked, "reason": response.reason, "referredByCode": response.referred_by_code })))
}

/// Body is optional; token claims supply hints the body leaves out. Only
/// the token's email can adopt a pre-registered record.
pub async fn sync_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let identity = state.authenticate(&headers)?;
    let req: SyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_body(format!("invalid JSON body: {}", e)))?
    };

    let verified_email = identity.hints.email.clone();
    let hints = ProfileHints {
        display_name: req.display_name.or(identity.hints.display_name),
        email: req.email.or(identity.hints.email),
    };
    let service = state.service.clone();
    let user = blocking(move || service.register_or_sync(&identity.subject, verified_email.as_deref(), &hints)).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

pub async fn profile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ProfileQuery>,
) -> ApiResult {
    let identity = state.authenticate(&headers)?;
    let user_id = query.user_id.map(UserId::from);
    let service = state.service.clone();
    let profile = blocking(move || service.get_user_profile(&identity.subject, user_id.as_ref())).await?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

pub async fn wallet_address_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WalletAddressRequest>,
) -> ApiResult {
    let identity = state.authenticate(&headers)?;
    let user_id = req.user_id.map(UserId::from);
    let service = state.service.clone();
    let response = blocking(move || {
        service.update_wallet_address(&identity.subject, user_id.as_ref(), &req.chain, &req.address)
    })
    .await?;
    Ok(Json(json!({ "success": true, "walletAddresses": response.wallet_addresses })))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/users/register", post(register_handler))
        .route("/api/users/invite/{invite_code}", get(invite_handler))
        .route("/api/users/referral", post(referral_handler))
        .route("/api/users/sync", post(sync_handler))
        .route("/api/users/profile", get(profile_handler))
        .route("/api/users/wallet-address", put(wallet_address_handler))
        .with_state(state)
}
