//! Branches and locks.
//!
//! Both live under a repo and share read, list and delete; they differ in
//! how they are created. A branch is created from a source branch, lock or
//! commit named by `mms:ref` / `mms:commit` in the body; a lock pins a
//! commit the same way.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use mms_core::{RefAddress, RefKind, RepoAddress};
use mms_engine::Preconditions;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::negotiation::{rdf_body, rdf_format};
use crate::AppState;

use super::{deleted_response, listing_response, mutation_response, preconditions, resource_response};

pub(crate) fn address(kind: RefKind, org: String, repo: String, id: String) -> RefAddress {
    let repo = RepoAddress::new(org, repo);
    match kind {
        RefKind::Branch => repo.branch(id),
        RefKind::Lock => repo.lock(id),
    }
}

async fn list(state: AppState, caller: Caller, kind: RefKind, org: String, repo: String, headers: HeaderMap) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let refs = state
        .engine
        .list_refs(&caller.0, &RepoAddress::new(org, repo), kind)
        .await?;
    listing_response(&refs, format)
}

async fn get(state: AppState, caller: Caller, r: RefAddress, headers: HeaderMap) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let resource = state.engine.read_ref(&caller.0, &r).await?;
    resource_response(&resource, format)
}

async fn delete(state: AppState, caller: Caller, r: RefAddress, pre: Preconditions) -> ApiResult<Response> {
    let txn = state.engine.delete_ref(&caller.0, &r, &pre).await?;
    deleted_response(&txn)
}

pub async fn list_branches(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    list(state, caller, RefKind::Branch, org, repo, headers).await
}

pub async fn list_locks(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    list(state, caller, RefKind::Lock, org, repo, headers).await
}

pub async fn put_branch(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let body = rdf_body(&headers, body)?;
    let r = address(RefKind::Branch, org, repo, id);
    let mutation = state
        .engine
        .create_branch(&ctx, &r, &body, &preconditions(&headers))
        .await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

pub async fn put_lock(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let body = rdf_body(&headers, body)?;
    let r = address(RefKind::Lock, org, repo, id);
    let mutation = state
        .engine
        .create_lock(&ctx, &r, &body, &preconditions(&headers))
        .await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

pub async fn get_branch(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    get(state, caller, address(RefKind::Branch, org, repo, id), headers).await
}

pub async fn get_lock(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    get(state, caller, address(RefKind::Lock, org, repo, id), headers).await
}

pub async fn delete_branch(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    delete(state, caller, address(RefKind::Branch, org, repo, id), preconditions(&headers)).await
}

pub async fn delete_lock(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    delete(state, caller, address(RefKind::Lock, org, repo, id), preconditions(&headers)).await
}
