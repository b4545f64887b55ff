use std::fmt;

use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error codes the service reports in `{"error_code": ...}` bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// TOK1
    WrongToken,
    /// TOK2
    ExpiredToken,
    /// TOK3
    WrongHeader,
    /// FILE1
    FileTooLarge,
    /// FILE2; also returned when the file exists but belongs to someone else
    FileNotFound,
    /// FILE3
    TooManyFiles,
    /// USER_ID1
    UserNotFound,
    /// USER_ID2
    SearchFailed,
    /// ARGS1
    IncorrectArgs,
    Unknown,
}

impl RemoteErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "TOK1" => Self::WrongToken,
            "TOK2" => Self::ExpiredToken,
            "TOK3" => Self::WrongHeader,
            "FILE1" => Self::FileTooLarge,
            "FILE2" => Self::FileNotFound,
            "FILE3" => Self::TooManyFiles,
            "USER_ID1" => Self::UserNotFound,
            "USER_ID2" => Self::SearchFailed,
            "ARGS1" => Self::IncorrectArgs,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::WrongToken => "TOK1",
            Self::ExpiredToken => "TOK2",
            Self::WrongHeader => "TOK3",
            Self::FileTooLarge => "FILE1",
            Self::FileNotFound => "FILE2",
            Self::TooManyFiles => "FILE3",
            Self::UserNotFound => "USER_ID1",
            Self::SearchFailed => "USER_ID2",
            Self::IncorrectArgs => "ARGS1",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WrongToken => "the token is not valid",
            Self::ExpiredToken => "the token has expired",
            Self::WrongHeader => "the Authorization header is malformed",
            Self::FileTooLarge => "the file exceeds the server size limit",
            Self::FileNotFound => "the file does not exist or belongs to another user",
            Self::TooManyFiles => "the per-user file quota is exhausted",
            Self::UserNotFound => "no such user",
            Self::SearchFailed => "the user search failed",
            Self::IncorrectArgs => "the request arguments were rejected",
            Self::Unknown => "the server reported an error",
        })
    }
}

/// Failures talking to the directory service.
///
/// `Remote` means the server answered and said no; `Transport` means it
/// could not be reached or did not finish answering.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{kind} ({code}){}", detail(.message))]
    Remote {
        kind: RemoteErrorKind,
        code: String,
        message: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    BadResponse(String),
}

fn detail(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

impl ApiError {
    pub fn remote(code: &str, message: Option<String>) -> Self {
        ApiError::Remote {
            kind: RemoteErrorKind::from_code(code),
            code: code.to_string(),
            message,
        }
    }

    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            ApiError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// A response body that broke off while being read.
    ///
    /// reqwest tags these as decode errors, so they bypass the `From` impl.
    pub(crate) fn body(e: reqwest::Error) -> Self {
        ApiError::Transport(format!("reading response body: {e}"))
    }
}

impl From<RemoteErrorKind> for ApiError {
    fn from(kind: RemoteErrorKind) -> Self {
        ApiError::Remote {
            kind,
            code: kind.code().to_string(),
            message: None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::BadResponse(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_roundtrip() {
        for code in [
            "TOK1", "TOK2", "TOK3", "FILE1", "FILE2", "FILE3", "USER_ID1", "USER_ID2", "ARGS1",
        ] {
            let kind = RemoteErrorKind::from_code(code);
            assert_ne!(kind, RemoteErrorKind::Unknown, "{code}");
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn test_unknown_code_is_generic() {
        let err = ApiError::remote("TEAPOT9", None);
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Unknown));
        assert!(err.to_string().contains("TEAPOT9"));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_display_includes_message() {
        let err = ApiError::remote("FILE1", Some("51300 bytes".into()));
        let rendered = err.to_string();
        assert!(rendered.contains("FILE1"));
        assert!(rendered.contains("51300 bytes"));
    }

    #[test]
    fn test_transport_is_flagged() {
        assert!(ApiError::Transport("connection refused".into()).is_transport());
        assert!(!ApiError::from(RemoteErrorKind::WrongToken).is_transport());
    }
}
