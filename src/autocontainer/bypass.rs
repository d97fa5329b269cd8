//! Per-request opt-out of container derivation

use actix_web::http::header::HeaderMap;
use actix_web::web;

pub const BYPASS_HEADER: &str = "X-bypass-autocontainer";
pub const BYPASS_QUERY: &str = "bypass-autocontainer";
const TRUE_VALUES: [&str; 3] = ["true", "yes", "1"];

fn is_true(value: &str) -> bool {
    let value = value.to_lowercase();
    TRUE_VALUES.contains(&value.as_str())
}

/// Should derivation be skipped for this request?
///
/// Either the bypass header or the first `bypass-autocontainer` query value
/// must hold one of the truthy values.
pub fn should_bypass(headers: &HeaderMap, query: &str) -> bool {
    let header = headers
        .get(BYPASS_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(is_true)
        .unwrap_or(false);
    if header {
        return true;
    }

    web::Query::<Vec<(String, String)>>::from_query(query)
        .ok()
        .and_then(|params| {
            params
                .into_inner()
                .into_iter()
                .find(|(name, _)| name == BYPASS_QUERY)
                .map(|(_, value)| is_true(&value))
        })
        .unwrap_or(false)
}
