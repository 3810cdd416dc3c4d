//! Error taxonomies. Each variant that is reachable from the wire carries
//! the Stratum error code from the table in the submit-validation flow;
//! everything below the wire boundary uses `anyhow` for ad-hoc context.

use thiserror::Error;

/// Errors produced while classifying a fresh connection's protocol.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("no bytes received before detection timeout")]
    Timeout,
    #[error("connection closed before protocol could be determined")]
    ConnectionClosed,
    #[error("bytes received do not match any known protocol")]
    Unclassifiable,
    #[error("i/o error during detection: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while validating a `mining.submit`. The `code()` method
/// returns the wire error code the v1 handler replies with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("session is not authorized")]
    Unauthorized,
    #[error("job not found or stale")]
    JobNotFound,
    #[error("duplicate share")]
    Duplicate,
    #[error("ntime out of range")]
    TimeOutOfRange,
    #[error("malformed submission: {0}")]
    Malformed(String),
    #[error("share does not meet session target")]
    LowDifficulty,
    #[error("session not subscribed")]
    NotSubscribed,
}

impl ShareError {
    pub fn code(&self) -> i32 {
        match self {
            ShareError::Unauthorized => 24,
            ShareError::JobNotFound => 21,
            ShareError::Duplicate => 22,
            ShareError::TimeOutOfRange | ShareError::Malformed(_) | ShareError::LowDifficulty => 23,
            ShareError::NotSubscribed => 25,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_submit_error_table() {
        assert_eq!(ShareError::JobNotFound.code(), 21);
        assert_eq!(ShareError::Duplicate.code(), 22);
        assert_eq!(ShareError::LowDifficulty.code(), 23);
        assert_eq!(ShareError::TimeOutOfRange.code(), 23);
        assert_eq!(ShareError::Unauthorized.code(), 24);
        assert_eq!(ShareError::NotSubscribed.code(), 25);
    }
}
