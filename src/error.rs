// Error taxonomy shared by every upstream fetch.
//
// Fetch functions return `Result<T>`; the HTTP layer and the dashboard fold
// these into neutral values, so none of these ever reach a client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Authentication rejected by upstream (HTTP {status})")]
    AuthRejected { status: u16 },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("File error: {0}")]
    FileError(String),
}

impl BoardError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(source: &str, status: reqwest::StatusCode) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                BoardError::AuthRejected {
                    status: status.as_u16(),
                }
            }
            _ => BoardError::UpstreamUnavailable(format!(
                "{} request failed with status: {}",
                source, status
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
