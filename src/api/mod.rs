//! HTTP surface: object routes under `/v1/{account}/{container}/{object}`

use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::GatewayError;
use crate::service::headers::parse_range;
use crate::service::ObjectTarget;

pub const OBJECT_ROUTE: &str = "/v1/{account}/{container}/{object:.*}";

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub version: Option<String>,
}

/// Register the object routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(OBJECT_ROUTE)
            .route(web::put().to(put_object))
            .route(web::get().to(get_object))
            .route(web::head().to(head_object))
            .route(web::delete().to(delete_object)),
    );
}

fn object_target(path: web::Path<(String, String, String)>, req: &HttpRequest) -> Result<ObjectTarget, GatewayError> {
    let (account, container, object) = path.into_inner();
    if account.is_empty() || container.is_empty() || object.is_empty() {
        return Err(GatewayError::BadRequest(format!("incomplete object path {}", req.path())));
    }
    let version = web::Query::<VersionQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().version);
    Ok(ObjectTarget::new(account, container, object).with_version(version))
}

pub async fn put_object(
    path: web::Path<(String, String, String)>,
    req: HttpRequest,
    payload: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let target = object_target(path, &req)?;
    debug!("PUT {}", target);
    app_state.controller.put(&target, req.headers(), payload).await
}

pub async fn get_object(
    path: web::Path<(String, String, String)>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let target = object_target(path, &req)?;
    debug!("GET {}", target);
    app_state.controller.get(&target, parse_range(req.headers())).await
}

pub async fn head_object(
    path: web::Path<(String, String, String)>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let target = object_target(path, &req)?;
    debug!("HEAD {}", target);
    app_state.controller.head(&target).await
}

pub async fn delete_object(
    path: web::Path<(String, String, String)>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let target = object_target(path, &req)?;
    debug!("DELETE {}", target);
    app_state.controller.delete(&target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock_store::MockObjectStorage;
    use crate::storage::ObjectStorage;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_version_query_reaches_backend() {
        let store = Arc::new(MockObjectStorage::new());
        store.insert_object("AUTH_demo", "cont", "obj", b"data", "text/plain");
        let version = store.object_show("AUTH_demo", "cont", "obj", None).await.unwrap().version;
        let state = AppState::with_mock(store);

        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::HEAD)
            .uri(&format!("/v1/AUTH_demo/cont/obj?version={}", version))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::HEAD)
            .uri("/v1/AUTH_demo/cont/obj?version=1")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_empty_object_name_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new_for_testing()))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::get().uri("/v1/AUTH_demo/cont/").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
