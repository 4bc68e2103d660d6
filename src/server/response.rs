//! Response and body helpers shared by the routes

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::error;

use crate::types::GatewayError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error type request bodies must convert into
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest JSON body accepted
pub const MAX_JSON_BODY: usize = 16 * 1024;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    full_body(Bytes::new())
}

fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

pub fn response_with(status: StatusCode, content_type: &'static str, body: BoxBody) -> Response<BoxBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    with_cors(response)
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    match serde_json::to_string(body) {
        Ok(json) => response_with(status, "application/json", full_body(json)),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            error_response(&GatewayError::Internal(e.to_string()), false)
        }
    }
}

/// `{"data": ...}` success envelope
pub fn data_response<T: Serialize>(body: &T) -> Response<BoxBody> {
    json_response(StatusCode::OK, &serde_json::json!({ "data": body }))
}

/// `{"errors": [...]}` failure envelope
pub fn error_response(err: &GatewayError, dev_mode: bool) -> Response<BoxBody> {
    let envelope = err.to_envelope(dev_mode);
    response_with(
        err.status_code(),
        "application/json",
        full_body(envelope.to_string()),
    )
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = with_cors(Response::new(empty_body()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response.headers_mut().insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("86400"),
    );
    response
}

pub fn not_found(path: &str) -> Response<BoxBody> {
    error_response(&GatewayError::NotFound(format!("route {}", path)), false)
}

/// Collect a request body, refusing anything over [`MAX_JSON_BODY`].
///
/// The cap is enforced while reading, so an oversized body is never
/// buffered past the limit.
pub async fn read_body<B>(req: Request<B>) -> Result<Bytes, GatewayError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let collected = Limited::new(req.into_body(), MAX_JSON_BODY).collect().await;

    match collected {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(GatewayError::validation(format!(
                "Request body exceeds {} bytes",
                MAX_JSON_BODY
            )))
        }
        Err(e) => Err(GatewayError::validation(format!("Failed to read body: {}", e))),
    }
}

pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GatewayError> {
    if bytes.is_empty() {
        return Err(GatewayError::validation("Request body is empty"));
    }
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response_uses_envelope_status() {
        let response = error_response(&GatewayError::AuthenticationRequired, false);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errors"][0]["extensions"]["code"], "AUTHENTICATION_REQUIRED");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let big = format!("{{\"content\":\"{}\"}}", "x".repeat(MAX_JSON_BODY));
        let req = Request::new(Full::new(Bytes::from(big)));
        assert!(matches!(
            read_body(req).await,
            Err(GatewayError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_endless_body_stops_at_cap() {
        use futures::stream;
        use http_body_util::StreamBody;
        use hyper::body::Frame;
        use std::convert::Infallible;
        use std::time::Duration;

        let frames = stream::repeat_with(|| {
            Ok::<_, Infallible>(Frame::data(Bytes::from(vec![b'x'; 64 * 1024])))
        });
        let req = Request::new(StreamBody::new(frames));

        let result = tokio::time::timeout(Duration::from_millis(500), read_body(req))
            .await
            .expect("capped read returns promptly");

        let Err(GatewayError::Validation { message, .. }) = result else {
            panic!("expected validation error");
        };
        assert!(message.contains("exceeds"));
    }

    #[tokio::test]
    async fn test_body_within_cap_is_returned() {
        let req = Request::new(Full::new(Bytes::from_static(b"{\"content\":\"hi\"}")));
        let bytes = read_body(req).await.unwrap();
        let value: serde_json::Value = decode_json(&bytes).unwrap();
        assert_eq!(value["content"], "hi");
    }

    #[test]
    fn test_preflight_has_cors_headers() {
        let response = cors_preflight();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }
}
