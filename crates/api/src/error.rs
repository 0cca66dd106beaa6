//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use domain::StockShortage;
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Error raised by the checkout core.
    Checkout(CheckoutError),
    /// Malformed path, query or header.
    BadRequest(String),
    /// The caller identity header is missing or invalid.
    Unauthorized(String),
    NotFound(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lines: Option<Vec<ShortLine>>,
}

/// One line the buyer lost to someone else.
#[derive(Debug, Serialize)]
struct ShortLine {
    product_id: String,
    variant_id: Option<String>,
    requested: u32,
    available: u32,
}

impl From<&StockShortage> for ShortLine {
    fn from(shortage: &StockShortage) -> Self {
        Self {
            product_id: shortage.key.product_id.to_string(),
            variant_id: shortage.key.variant_id.as_ref().map(ToString::to_string),
            requested: shortage.requested,
            available: shortage.available,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                body("validation_error", message),
            ),
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, body("unauthorized", message))
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, body("not_found", message)),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn body(error: &'static str, message: impl Into<String>) -> ErrorBody {
    ErrorBody {
        error,
        message: message.into(),
        lines: None,
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, ErrorBody) {
    match err {
        CheckoutError::Validation(message) => {
            (StatusCode::BAD_REQUEST, body("validation_error", message))
        }
        CheckoutError::TotalMismatch { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            body("total_mismatch", err.to_string()),
        ),
        CheckoutError::InsufficientStock(ref shortages) => (
            StatusCode::CONFLICT,
            ErrorBody {
                error: "out_of_stock",
                message: "Some items are no longer available in the requested quantity"
                    .to_string(),
                lines: Some(shortages.iter().map(ShortLine::from).collect()),
            },
        ),
        CheckoutError::GatewayUnavailable(ref detail) => {
            tracing::warn!(%detail, "payment gateway unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                body(
                    "gateway_unavailable",
                    "Payment service is temporarily unavailable, please try again",
                ),
            )
        }
        // Reason stays in the security log
        CheckoutError::VerificationFailed(_) => (
            StatusCode::PAYMENT_REQUIRED,
            body("payment_failed", "Payment could not be verified"),
        ),
        CheckoutError::PaymentFailed(message) => {
            (StatusCode::PAYMENT_REQUIRED, body("payment_failed", message))
        }
        CheckoutError::AttemptsExhausted { .. } => (
            StatusCode::PAYMENT_REQUIRED,
            body("payment_failed", err.to_string()),
        ),
        CheckoutError::PaymentCancelled => (
            StatusCode::PAYMENT_REQUIRED,
            body("payment_cancelled", "Payment was cancelled"),
        ),
        CheckoutError::ReservationExpired(_) => (
            StatusCode::GONE,
            body("reservation_expired", err.to_string()),
        ),
        CheckoutError::ConsistencyViolation(message) => {
            (StatusCode::CONFLICT, body("conflict", message))
        }
        CheckoutError::OrderNotFound(_) | CheckoutError::AttemptNotFound(_) => {
            (StatusCode::NOT_FOUND, body("not_found", err.to_string()))
        }
        CheckoutError::Store(_) | CheckoutError::Domain(_) => {
            tracing::error!(error = %err, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("internal_error", "Something went wrong"),
            )
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use domain::{Money, StockKey};

    use super::*;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_out_of_stock_lists_lines() {
        let err = ApiError::from(CheckoutError::InsufficientStock(vec![StockShortage {
            key: StockKey::variant("TEE", "M"),
            requested: 2,
            available: 1,
        }]));

        let (status, json) = render(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "out_of_stock");
        assert_eq!(json["lines"][0]["product_id"], "TEE");
        assert_eq!(json["lines"][0]["variant_id"], "M");
        assert_eq!(json["lines"][0]["available"], 1);
    }

    #[tokio::test]
    async fn test_reason_codes() {
        let cases = [
            (
                CheckoutError::TotalMismatch {
                    expected: Money::from_minor(1),
                    computed: Money::from_minor(2),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "total_mismatch",
            ),
            (
                CheckoutError::GatewayUnavailable("timeout".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
                "gateway_unavailable",
            ),
            (
                CheckoutError::PaymentCancelled,
                StatusCode::PAYMENT_REQUIRED,
                "payment_cancelled",
            ),
            (
                CheckoutError::ReservationExpired(OrderId::new()),
                StatusCode::GONE,
                "reservation_expired",
            ),
            (
                CheckoutError::ConsistencyViolation("late".to_string()),
                StatusCode::CONFLICT,
                "conflict",
            ),
        ];

        for (err, expected_status, code) in cases {
            let (status, json) = render(err.into()).await;
            assert_eq!(status, expected_status);
            assert_eq!(json["error"], code);
            assert!(json.get("lines").is_none());
        }
    }

    #[tokio::test]
    async fn test_verification_detail_is_hidden() {
        let err = ApiError::from(CheckoutError::VerificationFailed(
            checkout::RejectionReason::SignatureMismatch,
        ));
        let (_, json) = render(err).await;
        assert_eq!(json["error"], "payment_failed");
        assert!(!json["message"].as_str().unwrap().contains("signature"));
    }
}
