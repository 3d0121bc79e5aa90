//! HTTP request layer over the claim engine
//!
//! The acting user always comes from the bearer token; request bodies only
//! carry amounts and listing fields. Creating and deleting listings needs an
//! admin identity. Finalization is open to any caller, since it only closes
//! sales whose window has already passed.
use super::{ClaimEngine, ClaimError, ServiceControl};
use crate::{
    auction::{Amount, Item, ItemId},
    identity::{Identity, SharedIdentityProvider},
    persistence::StoreError,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing::{error, info};

pub const API_SERVICE_ID: &str = "api";

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ClaimEngine>,
    pub identities: SharedIdentityProvider,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing or unknown bearer token")]
    Unauthenticated,
    #[error("admin access required")]
    Forbidden,
    #[error("identity provider failed: {0}")]
    IdentityProvider(anyhow::Error),
    #[error(transparent)]
    Claim(#[from] ClaimError),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_bid: Option<Amount>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retryable, current_bid) = match &self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, false, None),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, false, None),
            ApiError::IdentityProvider(_) => (StatusCode::SERVICE_UNAVAILABLE, true, None),
            ApiError::Claim(e) => {
                let status = match e {
                    ClaimError::NotFound(_) => StatusCode::NOT_FOUND,
                    ClaimError::Conflict { .. } => StatusCode::CONFLICT,
                    ClaimError::InvalidBid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    ClaimError::InvalidState { .. } | ClaimError::InvalidListing(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    ClaimError::Store(StoreError::Backend(_)) => StatusCode::SERVICE_UNAVAILABLE,
                    ClaimError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let current_bid = match e {
                    ClaimError::InvalidBid { current_bid, .. } => Some(*current_bid),
                    _ => None,
                };
                (status, e.is_retryable(), current_bid)
            }
        };
        if status.is_server_error() {
            error!(error = ?self, "request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
                retryable,
                current_bid,
            }),
        )
            .into_response()
    }
}

/// The caller, resolved from `Authorization: Bearer <token>`
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthenticated)?;

        state
            .identities
            .resolve(token)
            .await
            .map_err(ApiError::IdentityProvider)?
            .map(Caller)
            .ok_or(ApiError::Unauthenticated)
    }
}

/// A caller whose identity carries the admin flag
pub struct Admin(pub Identity);

#[async_trait]
impl FromRequestParts<ApiState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, ApiError> {
        let Caller(identity) = Caller::from_request_parts(parts, state).await?;
        if !identity.admin {
            return Err(ApiError::Forbidden);
        }
        Ok(Admin(identity))
    }
}

#[derive(Deserialize, Debug)]
pub struct NewListing {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Amount,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Created {
    pub id: ItemId,
}

#[derive(Deserialize, Debug)]
pub struct StealBid {
    pub amount: Amount,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Finalized {
    pub sold: bool,
}

async fn list_open(State(state): State<ApiState>) -> Json<Vec<Item>> {
    Json(state.engine.list_open_items().await)
}

async fn list_available(State(state): State<ApiState>) -> Json<Vec<Item>> {
    Json(state.engine.list_available_items().await)
}

async fn create_listing(
    State(state): State<ApiState>,
    Admin(admin): Admin,
    Json(listing): Json<NewListing>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let id = state
        .engine
        .create_listing(&listing.title, &listing.description, listing.price)
        .await?;
    info!(item = %id, user = %admin.uid, "listing created through api");
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn get_item(
    State(state): State<ApiState>,
    Path(id): Path<ItemId>,
) -> Result<Json<Item>, ApiError> {
    Ok(Json(state.engine.get_item(&id).await?))
}

async fn delete_listing(
    State(state): State<ApiState>,
    Path(id): Path<ItemId>,
    Admin(admin): Admin,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_listing(&id).await?;
    info!(item = %id, user = %admin.uid, "listing deleted through api");
    Ok(StatusCode::NO_CONTENT)
}

async fn claim_mine(
    State(state): State<ApiState>,
    Path(id): Path<ItemId>,
    Caller(caller): Caller,
) -> Result<StatusCode, ApiError> {
    state.engine.claim_mine(&id, &caller.claimant()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn claim_grab(
    State(state): State<ApiState>,
    Path(id): Path<ItemId>,
    Caller(caller): Caller,
) -> Result<StatusCode, ApiError> {
    state.engine.claim_grab(&id, &caller.claimant()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn place_steal_bid(
    State(state): State<ApiState>,
    Path(id): Path<ItemId>,
    Caller(caller): Caller,
    Json(bid): Json<StealBid>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .place_steal_bid(&id, &caller.claimant(), bid.amount)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn finalize_sale(
    State(state): State<ApiState>,
    Path(id): Path<ItemId>,
    _caller: Caller,
) -> Result<Json<Finalized>, ApiError> {
    let sold = state.engine.finalize_sale(&id).await?;
    Ok(Json(Finalized { sold }))
}

async fn my_bids(State(state): State<ApiState>, Caller(caller): Caller) -> Json<Vec<Item>> {
    Json(state.engine.get_user_bids(&caller.uid).await)
}

async fn my_claims(State(state): State<ApiState>, Caller(caller): Caller) -> Json<Vec<Item>> {
    Json(state.engine.get_user_claims(&caller.uid).await)
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/items", get(list_open).post(create_listing))
        .route("/items/available", get(list_available))
        .route("/items/:id", get(get_item).delete(delete_listing))
        .route("/items/:id/mine", post(claim_mine))
        .route("/items/:id/grab", post(claim_grab))
        .route("/items/:id/steal", post(place_steal_bid))
        .route("/items/:id/finalize", post(finalize_sale))
        .route("/me/bids", get(my_bids))
        .route("/me/claims", get(my_claims))
        .with_state(state)
}

/// Serve until the service control asks everything to stop
pub async fn serve(addr: SocketAddr, state: ApiState, svc_ctl: ServiceControl) -> Result<()> {
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(router(state).into_make_service());
    info!(%addr, "api listening");

    server
        .with_graceful_shutdown(async move { svc_ctl.stopped().await })
        .await
        .context("api server failed")?;
    Ok(())
}
