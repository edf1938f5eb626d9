use axum::{http::StatusCode, response::{IntoResponse, Response}};

use crate::error::ChatError;

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::RejectedConnection(_)) => StatusCode::UNAUTHORIZED,
            Some(ChatError::ForbiddenAction(_)) => StatusCode::FORBIDDEN,
            Some(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(ChatError::MalformedEvent(_)) => StatusCode::BAD_REQUEST,
            Some(ChatError::Persistence(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{:#}\n\n{}", self.0, self.0.backtrace());
            return (status, "internal server error").into_response();
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_errors_map_to_statuses() {
        let forbidden: AppError = ChatError::ForbiddenAction("nope".into()).into();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let missing: AppError = ChatError::NotFound("user".into()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let other: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn server_errors_hide_their_cause() {
        let err: AppError = ChatError::Persistence(sqlx::Error::Protocol("table messages is locked".into())).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"internal server error");
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let err: AppError = ChatError::NotFound("user 42".into()).into();
        let body = axum::body::to_bytes(err.into_response().into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"not found: user 42");
    }
}
