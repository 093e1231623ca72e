//! JSON error bodies.
//!
//! Every failure leaves the server as
//! `{"error": {"code": <status>, "name": <reason>, "description": <text>}}`.

use axum::Json;
use axum::extract::path::ErrorKind;
use axum::extract::rejection::PathRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quadbridge_types::BridgeError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    description: String,
}

impl ApiError {
    pub fn new(status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let status = match &err {
            BridgeError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            BridgeError::NotConnected
            | BridgeError::AlreadyConnected { .. }
            | BridgeError::Send(_) => StatusCode::CONFLICT,
            BridgeError::Connect { .. } => StatusCode::BAD_GATEWAY,
            BridgeError::NoFrame => StatusCode::NOT_FOUND,
            BridgeError::Receive(_) | BridgeError::Config(_) | BridgeError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        if let PathRejection::FailedToDeserializePathParams(failed) = &rejection {
            match failed.kind() {
                ErrorKind::InvalidUtf8InPathParam { key } => {
                    return BridgeError::invalid(key, "not valid UTF-8").into();
                }
                ErrorKind::ParseErrorAtKey { key, value, .. } => {
                    return BridgeError::invalid(key, format!("cannot parse '{value}'")).into();
                }
                _ => {}
            }
        }
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.status.as_u16(),
                "name": self.status.canonical_reason().unwrap_or("Error"),
                "description": self.description,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn bridge_errors_map_to_statuses() {
        let cases = [
            (BridgeError::invalid("x", "nope"), StatusCode::BAD_REQUEST),
            (BridgeError::NotConnected, StatusCode::CONFLICT),
            (
                BridgeError::AlreadyConnected {
                    remote: "127.0.0.1:5002".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (BridgeError::Send("broken pipe".to_string()), StatusCode::CONFLICT),
            (
                BridgeError::Connect {
                    addr: "127.0.0.1:5002".to_string(),
                    details: "refused".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (BridgeError::NoFrame, StatusCode::NOT_FOUND),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn body_has_code_name_and_description() {
        let response = ApiError::from(BridgeError::invalid("angle", "'abc' is not an integer"))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], 400);
        assert_eq!(body["error"]["name"], "Bad Request");
        let description = body["error"]["description"].as_str().unwrap();
        assert!(description.contains("'angle'"));
    }
}
