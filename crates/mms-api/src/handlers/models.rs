//! Model content of a ref: whole-graph reads and loads, SPARQL updates
//! (each one a commit) and read-only queries.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use mms_core::{Error, RefAddress, RefKind};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::negotiation::{query_accept, rdf_body, rdf_format, sparql_body, SPARQL_QUERY, SPARQL_UPDATE};
use crate::AppState;

use super::refs::address;
use super::{mutation_response, preconditions, rdf_response};

#[derive(Debug, Default, Deserialize)]
pub struct UpdateParams {
    /// Commit message.
    pub message: Option<String>,
}

async fn graph(state: AppState, caller: Caller, r: RefAddress, headers: HeaderMap) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let triples = state.engine.read_model(&caller.0, &r).await?;
    rdf_response(StatusCode::OK, &triples, format)
}

async fn query(state: AppState, caller: Caller, r: RefAddress, headers: HeaderMap, body: Bytes) -> ApiResult<Response> {
    let accept = query_accept(&headers)?;
    let sparql = sparql_body(&headers, body, SPARQL_QUERY)?;
    let response = state
        .engine
        .query_ref(&caller.0, &r, &sparql, accept.as_deref())
        .await?;
    let content_type = HeaderValue::from_str(&response.content_type)
        .map_err(|_| Error::Store {
            status: 502,
            body: format!("Invalid content type from store: {}", response.content_type),
        })?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], response.body).into_response())
}

pub async fn get_branch_graph(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    graph(state, caller, address(RefKind::Branch, org, repo, id), headers).await
}

pub async fn get_lock_graph(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    graph(state, caller, address(RefKind::Lock, org, repo, id), headers).await
}

/// Replace a branch's model. Lands as one commit holding the diff
/// against the current head.
pub async fn put_branch_graph(
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
        .load_model(&ctx, &r, &body, &preconditions(&headers))
        .await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

/// Apply a SPARQL Update to a branch as a new commit.
pub async fn update_branch(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    Query(params): Query<UpdateParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let format = rdf_format(&headers)?;
    let sparql = sparql_body(&headers, body, SPARQL_UPDATE)?;
    let r = address(RefKind::Branch, org, repo, id);
    let mutation = state
        .engine
        .commit_update(&ctx, &r, &sparql, params.message.as_deref(), &preconditions(&headers))
        .await?;
    mutation_response(state.engine.iris(), &mutation, format)
}

pub async fn query_branch(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    query(state, caller, address(RefKind::Branch, org, repo, id), headers, body).await
}

pub async fn query_lock(
    State(state): State<AppState>,
    caller: Caller,
    Path((org, repo, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    query(state, caller, address(RefKind::Lock, org, repo, id), headers, body).await
}
