use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use mms_core::RepoAddress;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::negotiation::{rdf_body, rdf_format};
use crate::AppState;

use super::{deleted_response, listing_response, mutation_response, preconditions, resource_response};

pub async fn list_repos(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(org): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let repos = state.engine.list_repos(&ctx, &org).await?;
    listing_response(&repos, format)
}

/// Creating a repo also creates its `master` branch, an empty initial
/// commit and its Model and Staging snapshots.
pub async fn put_repo(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let body = rdf_body(&headers, body)?;
    let mutation = state
        .engine
        .put_repo(&ctx, &RepoAddress::new(org, repo), &body, &preconditions(&headers))
        .await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

pub async fn get_repo(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let resource = state.engine.read_repo(&ctx, &RepoAddress::new(org, repo)).await?;
    resource_response(&resource, format)
}

pub async fn delete_repo(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let txn = state
        .engine
        .delete_repo(&ctx, &RepoAddress::new(org, repo), &preconditions(&headers))
        .await?;
    deleted_response(&txn)
}

/// Commit metadata.
pub async fn get_commit(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo, commit)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let resource = state
        .engine
        .read_commit(&ctx, &RepoAddress::new(org, repo), &commit)
        .await?;
    resource_response(&resource, format)
}
