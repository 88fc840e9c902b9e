use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::negotiation::{rdf_body, rdf_format};
use crate::AppState;

use super::{deleted_response, listing_response, mutation_response, preconditions, resource_response};

pub async fn list_orgs(State(state): State<AppState>, Caller(ctx): Caller, headers: HeaderMap) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let orgs = state.engine.list_orgs(&ctx).await?;
    listing_response(&orgs, format)
}

pub async fn put_org(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(org): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let body = rdf_body(&headers, body)?;
    let mutation = state
        .engine
        .put_org(&ctx, &org, &body, &preconditions(&headers))
        .await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

pub async fn get_org(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(org): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let resource = state.engine.read_org(&ctx, &org).await?;
    resource_response(&resource, format)
}

pub async fn delete_org(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(org): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let txn = state
        .engine
        .delete_org(&ctx, &org, &preconditions(&headers))
        .await?;
    deleted_response(&txn)
}
