//! actix-web layer applying the container router before route matching

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::uri::{PathAndQuery, Uri};
use actix_web::middleware::Next;
use actix_web::{web, Error, ResponseError};
use log::{debug, warn};

use crate::autocontainer::{ContainerRouter, Routed};
use crate::error::GatewayError;

/// Rewrite the request URI to the derived container, or answer 400 when the
/// path cannot be routed. Requests go through untouched when no
/// `ContainerRouter` is registered as app data.
///
/// Register with `App::wrap(actix_web::middleware::from_fn(autocontainer))`.
pub async fn autocontainer(
    mut req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let router = match req.app_data::<web::Data<ContainerRouter>>() {
        Some(router) => router.clone(),
        None => return Ok(next.call(req).await?.map_into_boxed_body()),
    };

    let routed = router.route(req.path(), req.headers(), req.query_string());
    match routed {
        Ok(Routed::Unchanged) => {}
        Ok(Routed::Rewritten(path)) => {
            if let Err(e) = rewrite_uri(&mut req, &path) {
                warn!("Cannot rewrite {} to {}: {}", req.path(), path, e);
                let response = e.error_response();
                return Ok(req.into_response(response));
            }
        }
        Err(e) => {
            warn!("Autocontainer routing failed: {}", e);
            let response = GatewayError::from(e).error_response();
            return Ok(req.into_response(response));
        }
    }

    Ok(next.call(req).await?.map_into_boxed_body())
}

fn rewrite_uri(req: &mut ServiceRequest, path: &str) -> Result<(), GatewayError> {
    let target = match req.query_string() {
        "" => path.to_string(),
        query => format!("{}?{}", path, query),
    };
    let path_and_query = PathAndQuery::try_from(target.as_str())
        .map_err(|e| GatewayError::BadRequest(format!("invalid rewritten path: {}", e)))?;

    let mut parts = req.head().uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    let uri = Uri::from_parts(parts)
        .map_err(|e| GatewayError::BadRequest(format!("invalid rewritten uri: {}", e)))?;

    debug!("Request URI rewritten to {}", uri);
    req.match_info_mut().get_mut().update(&uri);
    req.head_mut().uri = uri;
    Ok(())
}
