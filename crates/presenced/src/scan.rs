//! JSON rendering of scan results.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use presence_store::ScanOutcome;

/// A scan result as an HTTP response: `{"message": ..}` for results,
/// `{"error": ..}` for failures, 502 when the store is down.
pub struct ScanReply(pub ScanOutcome);

impl IntoResponse for ScanReply {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        match self.0 {
            ScanOutcome::StoreUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ref other if other.is_error() => Json(serde_json::json!({ "error": message })).into_response(),
            _ => Json(serde_json::json!({ "message": message })).into_response(),
        }
    }
}
