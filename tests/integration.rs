use std::sync::Arc;

use actix_web::body::to_bytes;
use actix_web::error::PayloadError;
use actix_web::http::{Method, StatusCode};
use actix_web::middleware::from_fn;
use actix_web::{test, web, App, ResponseError};
use bytes::Bytes;
use futures::stream;

use autocontainer_gateway::api;
use autocontainer_gateway::app_state::AppState;
use autocontainer_gateway::autocontainer::middleware::autocontainer;
use autocontainer_gateway::autocontainer::{ContainerBuilder, ContainerRouter};
use autocontainer_gateway::config::TimeoutConfig;
use autocontainer_gateway::metadata::StaticContainerInfo;
use autocontainer_gateway::service::{ObjectController, ObjectTarget};
use autocontainer_gateway::storage::mock_store::MockObjectStorage;

const ACCOUNT: &str = "AUTH_demo";

macro_rules! gateway {
    ($store:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::with_mock($store.clone())))
                .app_data(web::Data::new(ContainerRouter::new(None, ContainerBuilder::default())))
                .wrap(from_fn(autocontainer))
                .configure(api::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_put_get_through_autocontainer() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/12/photo.jpg")
        .insert_header(("Content-Type", "image/jpeg"))
        .set_payload("not really a jpeg")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(resp.headers().contains_key("etag"));
    assert!(resp.headers().contains_key("x-object-version"));

    // "12/photo.jpg" flattens to "12photo.jpg", digits "12" in base 16
    assert_eq!(
        store.object_data(ACCOUNT, "0000000000000012", "12/photo.jpg"),
        Some(Bytes::from_static(b"not really a jpeg"))
    );

    let req = test::TestRequest::get().uri("/AUTH_demo/12/photo.jpg").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/jpeg");
    assert_eq!(resp.headers().get("accept-ranges").unwrap(), "bytes");
    let body = test::read_body(resp).await;
    assert_eq!(body, Bytes::from_static(b"not really a jpeg"));
}

#[actix_web::test]
async fn test_client_container_is_discarded() {
    let store = Arc::new(MockObjectStorage::new());
    store.insert_object(ACCOUNT, "0000000000000034", "1234/report.pdf", b"%PDF", "application/pdf");
    let app = gateway!(store);

    let req = test::TestRequest::get().uri("/v1/AUTH_demo/whatever/1234/report.pdf").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, Bytes::from_static(b"%PDF"));
}

#[actix_web::test]
async fn test_bypass_keeps_client_container() {
    let store = Arc::new(MockObjectStorage::new());
    store.insert_object(ACCOUNT, "mine", "photo.jpg", b"jpeg", "image/jpeg");
    let app = gateway!(store);

    let req = test::TestRequest::get()
        .uri("/v1/AUTH_demo/mine/photo.jpg")
        .insert_header(("X-bypass-autocontainer", "yes"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/v1/AUTH_demo/mine/photo.jpg?bypass-autocontainer=1")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    // without bypass the container is derived, and "photo.jpg" has no digits
    let req = test::TestRequest::get().uri("/v1/AUTH_demo/mine/photo.jpg").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_delete_missing_object_is_no_content() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::delete().uri("/AUTH_demo/42/gone").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(store.calls("object_delete"), 1);
}

#[actix_web::test]
async fn test_head_and_get_missing_object() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::default().method(Method::HEAD).uri("/AUTH_demo/42/gone").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    let req = test::TestRequest::get().uri("/AUTH_demo/42/gone").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_put_without_length_never_reaches_backend() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put().uri("/AUTH_demo/42/obj").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::LENGTH_REQUIRED);
    assert_eq!(store.calls("content_prepare"), 0);
}

#[actix_web::test]
async fn test_put_with_unsupported_precondition() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/42/obj")
        .insert_header(("If-None-Match", "foo"))
        .set_payload("data")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.calls("content_prepare"), 0);
    assert_eq!(store.calls("object_show"), 0);
}

#[actix_web::test]
async fn test_put_if_none_match_star() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let put = || {
        test::TestRequest::put()
            .uri("/AUTH_demo/42/obj")
            .insert_header(("If-None-Match", "*"))
            .set_payload("data")
            .to_request()
    };
    assert_eq!(test::call_service(&app, put()).await.status(), StatusCode::CREATED);
    assert_eq!(test::call_service(&app, put()).await.status(), StatusCode::PRECONDITION_FAILED);
}

#[actix_web::test]
async fn test_put_etag_checks() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/42/obj")
        .insert_header(("Etag", "\"8D777F385D3DFEC8815D20F7496026DC\""))
        .set_payload("data")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("etag").unwrap(), "\"8d777f385d3dfec8815d20f7496026dc\"");

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/42/other")
        .insert_header(("Etag", "d41d8cd98f00b204e9800998ecf8427e"))
        .set_payload("data")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(store.object_data(ACCOUNT, "0000000000000042", "42/other"), None);
}

#[actix_web::test]
async fn test_short_body_is_client_closed_request() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/42/obj")
        .set_payload("abc")
        .insert_header(("Content-Length", "10"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 499);
    assert_eq!(store.calls("content_create"), 0);
}

#[actix_web::test]
async fn test_object_too_large() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/42/huge")
        .insert_header(("Content-Length", "999999999999"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[actix_web::test]
async fn test_get_returns_exact_length() {
    let store = Arc::new(MockObjectStorage::new());
    let data = vec![0xABu8; 300 * 1024 + 17];
    store.insert_object(ACCOUNT, "0000000000000007", "7/blob", &data, "application/octet-stream");
    let app = gateway!(store);

    let req = test::TestRequest::get().uri("/AUTH_demo/7/blob").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), &data.len().to_string());
    assert_eq!(test::read_body(resp).await.len(), data.len());
}

#[actix_web::test]
async fn test_ranges() {
    let store = Arc::new(MockObjectStorage::new());
    store.insert_object(ACCOUNT, "0000000000000007", "7/digits", b"0123456789", "text/plain");
    let app = gateway!(store);

    let req = test::TestRequest::get()
        .uri("/AUTH_demo/7/digits")
        .insert_header(("Range", "bytes=-3"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers().get("content-range").unwrap(), "bytes 7-9/10");
    assert_eq!(test::read_body(resp).await, Bytes::from_static(b"789"));

    let req = test::TestRequest::get()
        .uri("/AUTH_demo/7/digits")
        .insert_header(("Range", "bytes=20-"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::RANGE_NOT_SATISFIABLE);

    let req = test::TestRequest::get()
        .uri("/AUTH_demo/7/digits")
        .insert_header(("Range", "bytes=0-1,5-6"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await.len(), 10);
}

#[actix_web::test]
async fn test_user_metadata_round_trip() {
    let store = Arc::new(MockObjectStorage::new());
    let app = gateway!(store);

    let req = test::TestRequest::put()
        .uri("/AUTH_demo/42/tagged")
        .insert_header(("X-Object-Meta-Owner", "ops"))
        .set_payload("payload")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::default().method(Method::HEAD).uri("/AUTH_demo/42/tagged").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-object-meta-owner").unwrap(), "ops");
    assert_eq!(resp.headers().get("content-length").unwrap(), "7");
}

#[actix_web::test]
async fn test_default_account_takes_whole_path() {
    let store = Arc::new(MockObjectStorage::new());
    store.insert_object("AUTH_shared", "0000000000000099", "99/a/b", b"x", "text/plain");
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::with_mock(store.clone())))
            .app_data(web::Data::new(ContainerRouter::new(
                Some("AUTH_shared".to_string()),
                ContainerBuilder::default(),
            )))
            .wrap(from_fn(autocontainer))
            .configure(api::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/99/a/b").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

fn controller(store: &Arc<MockObjectStorage>, timeouts: TimeoutConfig) -> ObjectController {
    ObjectController::new(
        store.clone(),
        store.clone(),
        Arc::new(StaticContainerInfo::default()),
        timeouts,
        1024 * 1024,
    )
}

fn length_header(len: u64) -> actix_web::http::header::HeaderMap {
    let mut headers = actix_web::http::header::HeaderMap::new();
    headers.insert(
        actix_web::http::header::CONTENT_LENGTH,
        actix_web::http::header::HeaderValue::from(len),
    );
    headers
}

fn failing_body(err: PayloadError) -> impl futures::Stream<Item = Result<Bytes, PayloadError>> + Unpin {
    stream::iter(vec![Ok(Bytes::from_static(b"abc")), Err(err)])
}

#[actix_web::test]
async fn test_upload_failures_are_distinguishable() {
    let store = Arc::new(MockObjectStorage::new());
    let target = ObjectTarget::new(ACCOUNT, "0000000000000042", "42/obj");
    let controller = controller(&store, TimeoutConfig::default());

    let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
    let err = controller.put(&target, &length_header(10), failing_body(PayloadError::Io(reset))).await.unwrap_err();
    assert_eq!(err.status_code().as_u16(), 499);

    let slow = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
    let err = controller.put(&target, &length_header(10), failing_body(PayloadError::Io(slow))).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);

    let err = controller.put(&target, &length_header(10), failing_body(PayloadError::EncodingCorrupted)).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(err.error_response().into_body()).await.unwrap();
    assert_eq!(body, Bytes::from_static(b"An error occurred"));

    assert_eq!(store.calls("content_create"), 0);
}

#[actix_web::test]
async fn test_stalled_client_times_out() {
    let store = Arc::new(MockObjectStorage::new());
    let target = ObjectTarget::new(ACCOUNT, "0000000000000042", "42/obj");
    let timeouts = TimeoutConfig { client_read_ms: 30, ..TimeoutConfig::default() };
    let controller = controller(&store, timeouts);

    let err = controller
        .put(&target, &length_header(10), stream::pending::<Result<Bytes, PayloadError>>())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);
}
