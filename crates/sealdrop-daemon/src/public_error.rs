use axum::http::StatusCode;

/// Stable error codes returned to HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicErrorCode {
    InvalidInput,
    Unauthenticated,
    RateLimited,
    Ineligible,
    AlreadyClaimed,
    CapExceeded,
    FailedPrecondition,
    NotFound,
    TransferFailed,
    Unavailable,
    Internal,
}

impl PublicErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Ineligible => "INELIGIBLE",
            Self::AlreadyClaimed => "ALREADY_CLAIMED",
            Self::CapExceeded => "CAP_EXCEEDED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::NotFound => "NOT_FOUND",
            Self::TransferFailed => "TRANSFER_FAILED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Ineligible => StatusCode::FORBIDDEN,
            Self::AlreadyClaimed | Self::CapExceeded => StatusCode::CONFLICT,
            Self::FailedPrecondition => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TransferFailed => StatusCode::BAD_GATEWAY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
