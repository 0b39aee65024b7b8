use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::auth::AuthError;
use crate::http::AppState;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                details: None,
            },
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing => ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token"),
            other => ApiError::new(StatusCode::UNAUTHORIZED, "invalid token")
                .with_details(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => {
                ApiError::new(StatusCode::NOT_FOUND, format!("job not found: {id}"))
            }
            other => {
                error!(error = %other, "storage failure");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
                    .with_details(other.to_string())
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    pub job_id: i64,
}

pub async fn ping_handler() -> &'static str {
    "pong"
}

/// Queue a wishlist sync for the calling user. The body is optional.
#[instrument(skip_all)]
pub async fn start_sync_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncAccepted>), ApiError> {
    let user_id = state.auth.user_id_from_headers(&headers)?;
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice::<SyncRequest>(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, "malformed request body")
                .with_details(e.to_string())
        })?
    };

    if state.users.get(user_id).await?.is_none() {
        warn!(user_id, "sync requested for unknown user");
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("user not found: {user_id}"),
        ));
    }

    let job = state.jobs.create_queued(user_id, request.force).await?;
    info!(job_id = job.id, user_id, force = request.force, "sync job queued");
    Ok((StatusCode::ACCEPTED, Json(SyncAccepted { job_id: job.id })))
}

#[instrument(skip(state))]
pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(id) = job_id.parse::<i64>() else {
        return ApiError::new(StatusCode::BAD_REQUEST, format!("invalid job id: {job_id}"))
            .into_response();
    };
    match state.jobs.get(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => ApiError::new(StatusCode::NOT_FOUND, format!("job not found: {id}"))
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// The caller's wishlist joined with cached catalog data.
#[instrument(skip_all)]
pub async fn wishlist_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = state.auth.user_id_from_headers(&headers)?;
    let items = state.wishlist.list_for_user(user_id).await?;
    Ok((StatusCode::OK, Json(items)).into_response())
}
