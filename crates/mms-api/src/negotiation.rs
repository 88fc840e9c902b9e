//! Content negotiation over `Accept` and `Content-Type`.

use axum::body::Bytes;
use axum::http::{header, HeaderMap};

use mms_core::{Error, Result, N_TRIPLES, SPARQL_RESULTS_JSON};
use mms_engine::RdfBody;
use mms_sparql::rdf::{RdfFormat, TURTLE};

pub const SPARQL_QUERY: &str = "application/sparql-query";
pub const SPARQL_UPDATE: &str = "application/sparql-update";

/// Media types a passthrough query may be answered with.
const QUERY_RESULTS: [&str; 3] = [SPARQL_RESULTS_JSON, TURTLE, N_TRIPLES];

/// Media ranges of an `Accept` header ordered by descending quality,
/// dropping ranges with `q=0`.
fn media_ranges(headers: &HeaderMap) -> Vec<String> {
    let mut ranges: Vec<(String, f32)> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|range| {
            let mut parts = range.split(';');
            let media = parts.next()?.trim().to_ascii_lowercase();
            if media.is_empty() {
                return None;
            }
            let q = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((media, q))
        })
        .filter(|(_, q)| *q > 0.0)
        .collect();
    ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranges.into_iter().map(|(m, _)| m).collect()
}

fn is_wildcard(range: &str) -> bool {
    range == "*/*" || range == "text/*" || range == "application/*"
}

/// Serialization for an RDF response. Turtle unless the client asks for
/// N-Triples; 406 when it accepts neither.
pub fn rdf_format(headers: &HeaderMap) -> Result<RdfFormat> {
    let ranges = media_ranges(headers);
    if ranges.is_empty() {
        return Ok(RdfFormat::Turtle);
    }
    for range in &ranges {
        if is_wildcard(range) {
            return Ok(RdfFormat::Turtle);
        }
        if let Some(format) = RdfFormat::from_media_type(range) {
            return Ok(format);
        }
    }
    Err(Error::NotAcceptable(format!(
        "Cannot produce any of: {}; available: {}, {}",
        ranges.join(", "),
        TURTLE,
        N_TRIPLES
    )))
}

/// `Accept` forwarded with a client query. `None` lets the query form decide.
pub fn query_accept(headers: &HeaderMap) -> Result<Option<String>> {
    let ranges = media_ranges(headers);
    if ranges.is_empty() || ranges.iter().any(|r| is_wildcard(r)) {
        return Ok(None);
    }
    let supported: Vec<&str> = ranges
        .iter()
        .filter_map(|r| QUERY_RESULTS.iter().find(|m| **m == r.as_str()).copied())
        .collect();
    if supported.is_empty() {
        return Err(Error::NotAcceptable(format!(
            "Cannot produce any of: {}; available: {}",
            ranges.join(", "),
            QUERY_RESULTS.join(", ")
        )));
    }
    Ok(Some(supported.join(", ")))
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn utf8(bytes: Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Parse("Request body is not valid UTF-8".into()))
}

/// An RDF request body. A missing `Content-Type` is read as Turtle.
pub fn rdf_body(headers: &HeaderMap, bytes: Bytes) -> Result<RdfBody> {
    let format = match content_type(headers) {
        None => RdfFormat::Turtle,
        Some(ct) => RdfFormat::from_media_type(&ct)
            .ok_or_else(|| Error::UnsupportedMediaType(format!("{}; expected {} or {}", ct, TURTLE, N_TRIPLES)))?,
    };
    Ok(RdfBody::new(utf8(bytes)?, format))
}

/// A SPARQL request body of media type `expected`.
pub fn sparql_body(headers: &HeaderMap, bytes: Bytes, expected: &str) -> Result<String> {
    if let Some(ct) = content_type(headers) {
        if ct != expected {
            return Err(Error::UnsupportedMediaType(format!("{}; expected {}", ct, expected)));
        }
    }
    let text = utf8(bytes)?;
    if text.trim().is_empty() {
        return Err(Error::InvalidInput("Empty SPARQL request".into()));
    }
    Ok(text)
}
