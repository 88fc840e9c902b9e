use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use mms_core::{RefAddress, RefKind, RepoAddress};
use mms_engine::DiffSide;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::negotiation::{rdf_body, rdf_format};
use crate::AppState;

use super::refs::address;
use super::{mutation_response, rdf_response, resource_response};

async fn create(state: AppState, caller: Caller, r: RefAddress, headers: HeaderMap, body: Bytes) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let body = rdf_body(&headers, body)?;
    let mutation = state.engine.create_diff(&caller.0, &r, &body).await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

/// Diff from the source named in the body (`mms:srcRef` or
/// `mms:srcCommit`) to the branch head. Repeating a request returns the
/// existing diff.
pub async fn diff_branch(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    create(state, caller, address(RefKind::Branch, org, repo, id), headers, body).await
}

pub async fn diff_lock(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    create(state, caller, address(RefKind::Lock, org, repo, id), headers, body).await
}

pub async fn get_diff(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let resource = state.engine.read_diff(&ctx, &RepoAddress::new(org, repo), &id).await?;
    resource_response(&resource, format)
}

async fn side(state: AppState, caller: Caller, repo: RepoAddress, id: String, side: DiffSide, headers: HeaderMap) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let triples = state.engine.read_diff_graph(&caller.0, &repo, &id, side).await?;
    rdf_response(StatusCode::OK, &triples, format)
}

pub async fn get_insertions(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    side(state, caller, RepoAddress::new(org, repo), id, DiffSide::Insertions, headers).await
}

pub async fn get_deletions(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    side(state, caller, RepoAddress::new(org, repo), id, DiffSide::Deletions, headers).await
}
