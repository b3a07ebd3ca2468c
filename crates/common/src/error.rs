//! Error types shared across Qamrec crates.

/// Top-level error type for Qamrec operations.
#[derive(Debug, thiserror::Error)]
pub enum QamrecError {
    /// A recorder or decode source could not be obtained or constructed.
    #[error("Acquisition error: {message}")]
    Acquisition { message: String },

    /// An active recording failed; no artifact is produced.
    #[error("Recording error: {message}")]
    Recording { message: String },

    /// Decode, seek, or encode failure while transcoding.
    #[error("Conversion error: {message}")]
    Conversion { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Device not found: {message}")]
    DeviceNotFound { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using QamrecError.
pub type QamrecResult<T> = Result<T, QamrecError>;

/// Coarse classification of a [`QamrecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Acquisition,
    Recording,
    Conversion,
    PermissionDenied,
    DeviceNotFound,
    Unsupported,
    Config,
    Io,
    Other,
}

impl QamrecError {
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition {
            message: msg.into(),
        }
    }

    pub fn recording(msg: impl Into<String>) -> Self {
        Self::Recording {
            message: msg.into(),
        }
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }

    pub fn device_not_found(msg: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquisition { .. } => ErrorKind::Acquisition,
            Self::Recording { .. } => ErrorKind::Recording,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Config { .. } | Self::Json(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Re-tag an error as an acquisition failure.
    ///
    /// Permission and device errors from the acquisition collaborator are
    /// passed through untouched so callers can show them verbatim.
    pub fn into_acquisition(self) -> Self {
        match self {
            e @ (Self::Acquisition { .. }
            | Self::PermissionDenied { .. }
            | Self::DeviceNotFound { .. }) => e,
            other => Self::acquisition(other.to_string()),
        }
    }

    /// Re-tag an error as a conversion failure.
    pub fn into_conversion(self) -> Self {
        match self {
            e @ Self::Conversion { .. } => e,
            other => Self::conversion(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_survive_acquisition_retag() {
        let err = QamrecError::permission_denied("screen share refused").into_acquisition();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.to_string(), "Permission denied: screen share refused");
    }

    #[test]
    fn io_errors_become_conversion_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err = QamrecError::from(io).into_conversion();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert!(err.to_string().contains("short read"));
    }
}
