//! Request identification.
//!
//! Every request gets an `x-request-id` header as early as possible: an
//! incoming one is kept, otherwise a UUID v4 is generated. The same value is
//! echoed on the response.

use axum::http::{HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Layer that assigns missing request ids.
pub fn set_request_id() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), UuidRequestId)
}

/// Layer that copies the request id onto the response.
pub fn propagate_request_id() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Access to the id assigned by [`set_request_id`].
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.extensions()
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .or_else(|| self.headers().get(X_REQUEST_ID).and_then(|v| v.to_str().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn assigns_and_propagates_uuid() {
        let app = Router::new()
            .route("/", get(|| async {}))
            .layer(propagate_request_id())
            .layer(set_request_id());

        let response = app.oneshot(Request::new(Body::empty())).await.unwrap();
        let id = response.headers()[X_REQUEST_ID].to_str().unwrap();
        assert_eq!(Uuid::parse_str(id).unwrap().get_version_num(), 4);
    }

    #[tokio::test]
    async fn keeps_incoming_id() {
        let app = Router::new()
            .route("/", get(|| async {}))
            .layer(propagate_request_id())
            .layer(set_request_id());

        let req = Request::builder().header(X_REQUEST_ID, "abc-123").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.headers()[X_REQUEST_ID], "abc-123");
        assert_eq!(req_id_of("abc-123"), Some("abc-123".to_string()));
    }

    fn req_id_of(value: &str) -> Option<String> {
        let req = Request::builder().header(X_REQUEST_ID, value).body(()).unwrap();
        req.request_id().map(str::to_string)
    }
}
