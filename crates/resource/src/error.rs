//! Error types for resource lifecycle operations
use thiserror::Error;

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by resources and requests.
///
/// The enum is `Clone` because a failed open is copied onto every request
/// queued behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required argument was missing or unusable
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument
        message: String,
    },

    /// The request's resource no longer exists
    #[error("Request is detached from its resource")]
    Detached,

    /// The resource's request queue is at capacity
    #[error("Request queue is full ({capacity} requests queued)")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The resource is closing; the caller may try again once it settles
    #[error("Resource is closing, retry later")]
    Retry,

    /// The resource is closed and cannot be marked active
    #[error("Resource is closed")]
    Locked,

    /// The resource has been destroyed
    #[error("Resource has been destroyed")]
    Destroyed,

    /// The request was already completed once
    #[error("Request has already completed")]
    AlreadyCompleted,

    /// A work hook reported failure
    #[error("Operation failed (code {code}): {message}")]
    Failed {
        /// errno-style code supplied by the hook
        code: i32,
        /// Human readable description
        message: String,
    },

    /// Resource configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a work-hook failure with an errno-style code
    pub fn failed<S: Into<String>>(code: i32, message: S) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The positive errno value equivalent to this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } | Self::Configuration { .. } => libc::EINVAL,
            Self::Detached => libc::EFAULT,
            Self::QueueFull { .. } => libc::ENOBUFS,
            Self::Retry => libc::EAGAIN,
            Self::Locked => libc::ENOLCK,
            Self::Destroyed => libc::ENODEV,
            Self::AlreadyCompleted => libc::EALREADY,
            Self::Failed { code, .. } => *code,
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retry | Self::QueueFull { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Failed {
            code: err.raw_os_error().unwrap_or(libc::EIO),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Error::Retry.errno(), libc::EAGAIN);
        assert_eq!(Error::Locked.errno(), libc::ENOLCK);
        assert_eq!(Error::Detached.errno(), libc::EFAULT);
        assert_eq!(Error::invalid_argument("x").errno(), libc::EINVAL);
        assert_eq!(Error::failed(42, "boom").errno(), 42);
    }

    #[test]
    fn io_errors_keep_os_code() {
        let err: Error = std::io::Error::from_raw_os_error(libc::ENOENT).into();
        assert_eq!(err.errno(), libc::ENOENT);

        let err: Error = std::io::Error::other("custom").into();
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn retryable() {
        assert!(Error::Retry.is_retryable());
        assert!(Error::QueueFull { capacity: 1 }.is_retryable());
        assert!(!Error::Locked.is_retryable());
    }
}
