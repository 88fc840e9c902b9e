//! Route handlers, grouped by resource.

pub mod diffs;
pub mod health;
pub mod models;
pub mod orgs;
pub mod refs;
pub mod repos;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use mms_core::{Error, IriFactory};
use mms_engine::{Mutation, Preconditions, Resource};
use mms_sparql::rdf::{self, RdfFormat};
use mms_sparql::Triple;

use crate::error::ApiResult;

/// `If-Match` / `If-None-Match` of a request.
pub(crate) fn preconditions(headers: &HeaderMap) -> Preconditions {
    let etags = |name: header::HeaderName| -> Vec<String> {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Preconditions::parse_header)
            .collect()
    };
    Preconditions {
        if_match: etags(header::IF_MATCH),
        if_none_match: etags(header::IF_NONE_MATCH),
    }
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::Internal(format!("Invalid header value: {}", value)).into())
}

fn quoted(etag: &str) -> String {
    format!("\"{}\"", etag)
}

/// Serialized triples with their media type.
pub(crate) fn rdf_response(status: StatusCode, triples: &[Triple], format: RdfFormat) -> ApiResult<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.media_type()));
    Ok((status, headers, rdf::serialize(triples, format)).into_response())
}

/// A single resource, with its ETag and canonical IRI.
pub(crate) fn resource_response(resource: &Resource, format: RdfFormat) -> ApiResult<Response> {
    let mut response = rdf_response(StatusCode::OK, &resource.triples, format)?;
    let headers = response.headers_mut();
    if let Some(etag) = &resource.etag {
        headers.insert(header::ETAG, header_value(&quoted(etag))?);
    }
    headers.insert(header::LINK, header_value(&format!("<{}>; rel=\"canonical\"", resource.iri))?);
    Ok(response)
}

/// 201 with `Location` for a created resource, 200 otherwise.
pub(crate) fn mutation_response(iris: &IriFactory, mutation: &Mutation, format: RdfFormat) -> ApiResult<Response> {
    let status = if mutation.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut response = rdf_response(status, &mutation.resource.triples, format)?;
    let headers = response.headers_mut();
    headers.insert(header::ETAG, header_value(&quoted(mutation.etag()))?);
    headers.insert(
        header::LINK,
        header_value(&format!("<{}>; rel=\"canonical\"", mutation.resource.iri))?,
    );
    if mutation.created {
        let location = iris.path_of(&mutation.resource.iri).unwrap_or(&mutation.resource.iri);
        headers.insert(header::LOCATION, header_value(location)?);
    }
    Ok(response)
}

/// Every resource of a listing in one document.
pub(crate) fn listing_response(resources: &[Resource], format: RdfFormat) -> ApiResult<Response> {
    let triples: Vec<Triple> = resources.iter().flat_map(|r| r.triples.iter().cloned()).collect();
    rdf_response(StatusCode::OK, &triples, format)
}

/// 204 carrying the etag of the delete transaction.
pub(crate) fn deleted_response(transaction_id: &str) -> ApiResult<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, header_value(&quoted(transaction_id))?);
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}
