use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("{0} is required and must not be blank")]
    BlankField(&'static str),

    #[error("maximum event size exceeded")]
    EventTooBig,
    #[error("invalid event could not be processed")]
    NonRetryableSinkError,
    #[error("transient error, please retry")]
    RetryableSinkError,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::RequestParsingError(_)
            | IngestError::BlankField(_)
            | IngestError::EventTooBig
            | IngestError::NonRetryableSinkError => (StatusCode::BAD_REQUEST, self.to_string()),

            IngestError::RetryableSinkError => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        }
        .into_response()
    }
}
