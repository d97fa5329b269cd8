//! Request header parsing and response metadata headers

use std::collections::HashMap;

use actix_web::http::header::{self, HeaderMap};
use actix_web::HttpResponseBuilder;
use chrono::{TimeZone, Utc};

use crate::error::GatewayError;
use crate::storage::{ByteRange, ObjectMetadata};

pub const META_PREFIX: &str = "x-object-meta-";
pub const OBJECT_VERSION: &str = "X-Object-Version";
pub const TIMESTAMP: &str = "X-Timestamp";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Declared body size: 411 when absent, 400 when unparsable.
pub fn content_length(headers: &HeaderMap) -> Result<u64, GatewayError> {
    let value = headers.get(header::CONTENT_LENGTH).ok_or(GatewayError::LengthRequired)?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| GatewayError::BadRequest(format!("invalid Content-Length {:?}", value)))
}

/// Whether the client asked for create-if-absent. Only `*` is understood.
pub fn if_none_match(headers: &HeaderMap) -> Result<bool, GatewayError> {
    match headers.get(header::IF_NONE_MATCH) {
        None => Ok(false),
        Some(value) => match value.to_str().map(str::trim) {
            Ok("*") => Ok(true),
            _ => Err(GatewayError::InvalidPrecondition(String::from_utf8_lossy(value.as_bytes()).into_owned())),
        },
    }
}

/// Etag announced by the client, unquoted and lower-cased
pub fn expected_etag(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::ETAG.as_str())
        .map(normalize_etag)
        .filter(|etag| !etag.is_empty())
}

pub fn normalize_etag(value: &str) -> String {
    value.trim().trim_matches('"').to_lowercase()
}

pub fn content_type(headers: &HeaderMap) -> String {
    header_str(headers, header::CONTENT_TYPE.as_str())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// `X-Object-Meta-*` headers, keyed by the lower-cased suffix
pub fn object_properties(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            let value = value.to_str().ok()?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// A single `bytes=` range. Malformed and multi-range headers are ignored.
pub fn parse_range(headers: &HeaderMap) -> Option<ByteRange> {
    let spec = header_str(headers, header::RANGE.as_str())?.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    match (start.is_empty(), end.is_empty()) {
        (false, false) => Some(ByteRange::Bounded(start.parse().ok()?, end.parse().ok()?)),
        (false, true) => Some(ByteRange::From(start.parse().ok()?)),
        (true, false) => Some(ByteRange::Suffix(end.parse().ok()?)),
        (true, true) => None,
    }
}

pub fn quoted_etag(hash: &str) -> String {
    format!("\"{}\"", hash)
}

pub fn http_date(seconds: i64) -> String {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Headers describing a stored object. Content-Length is left to the caller.
pub fn apply_metadata(builder: &mut HttpResponseBuilder, metadata: &ObjectMetadata) {
    builder
        .insert_header((header::ETAG, quoted_etag(&metadata.hash)))
        .insert_header((header::CONTENT_TYPE, metadata.mime_type.as_str()))
        .insert_header((header::LAST_MODIFIED, http_date(metadata.ctime)))
        .insert_header((TIMESTAMP, format!("{}.00000", metadata.ctime)))
        .insert_header((OBJECT_VERSION, metadata.version.to_string()))
        .insert_header((header::ACCEPT_RANGES, "bytes"));
    for (key, value) in &metadata.properties {
        builder.insert_header((format!("X-Object-Meta-{}", key), value.as_str()));
    }
}
