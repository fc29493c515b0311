use {blindbackup_protocol::ErrorCode, hyper::StatusCode, std::io};

/// Failure of a single request. Everything except `Internal` is reported to the
/// client as is; `Internal` details only go to the server log.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("permission denied")]
    PermissionDenied,
    #[error("path escapes the home directory: {0:?}")]
    PathEscape(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::PathEscape(_) => ErrorCode::PathEscape,
            Self::NotFound => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Converts a filesystem error, keeping the categories a client may see.
    pub fn io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::AlreadyExists => Self::Conflict("already exists"),
            io::ErrorKind::NotADirectory => Self::Conflict("not a directory"),
            io::ErrorKind::IsADirectory => Self::Conflict("is a directory"),
            io::ErrorKind::DirectoryNotEmpty => Self::Conflict("directory not empty"),
            _ => Self::Internal(err.into()),
        }
    }
}

impl From<io::Error> for DispatchError {
    fn from(err: io::Error) -> Self {
        Self::io(err)
    }
}

#[must_use]
pub fn status_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::PathEscape => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
