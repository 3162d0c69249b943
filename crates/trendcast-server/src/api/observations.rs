use axum::{extract::State, Extension, Json};
use trendcast_core::ObservationMessage;
use trendcast_engine::MessageReport;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

/// Accept one upstream message, either `{"id", "observedAt", "themes"}` or a
/// bare `{theme: score}` map, and merge every theme in it.
pub(super) async fn ingest(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: String,
) -> Result<Json<ApiResponse<MessageReport>>, ApiError> {
    let message = ObservationMessage::parse(&body).map_err(|e| {
        ApiError::new(
            req_id.0.clone(),
            "validation_error",
            format!("malformed observation message: {e}"),
        )
    })?;

    let report = state
        .accumulator
        .merge_message(message, trendcast_engine::unix_now())
        .await;

    if report.failed > 0 && report.applied == 0 && report.duplicates == 0 {
        return Err(ApiError::new(
            req_id.0,
            "store_unavailable",
            "no observation could be merged",
        ));
    }

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    }))
}
