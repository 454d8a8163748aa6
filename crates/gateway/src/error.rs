use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    chatmap_sessions::{InvalidSessionId, SessionId},
    chatmap_whatsapp::{MediaError, SessionError},
    tracing::{debug, error},
};

use crate::qr::QrRenderError;

/// Every handler failure, rendered as a plain-text body with a status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),

    #[error(transparent)]
    InvalidSession(#[from] InvalidSessionId),

    #[error("QR code for session {0} not generated yet")]
    QrNotReady(SessionId),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Qr(#[from] QrRenderError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParam(_) | Self::InvalidSession(_) => StatusCode::BAD_REQUEST,
            Self::QrNotReady(_) => StatusCode::NOT_FOUND,
            Self::Session(e) => match e {
                SessionError::NotFound(_) | SessionError::QrTimeout(_) => StatusCode::NOT_FOUND,
                SessionError::AlreadyAuthenticated(_) => StatusCode::CONFLICT,
                SessionError::PairingFailed { .. } => StatusCode::BAD_GATEWAY,
                SessionError::Store(_) | SessionError::Protocol(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                },
            },
            Self::Media(e) => match e {
                MediaError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
                MediaError::UnsupportedExtension(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                MediaError::NoSession(_) => StatusCode::NOT_FOUND,
                MediaError::MalformedReference(_)
                | MediaError::Download(_)
                | MediaError::LogStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Qr(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            debug!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, message).into_response()
    }
}
