use thiserror::Error;

/// Errors produced by the broker and its collaborators
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Input was not valid lowercase RFC 3548 base32
    #[error("invalid base32 data: {0:?}")]
    InvalidBase32(String),

    /// A storage FURL could not be parsed
    #[error("invalid FURL {furl:?}: {reason}")]
    InvalidFurl { furl: String, reason: String },

    /// The announcement carries no storage FURL to connect to
    #[error("server {0} announced no storage endpoint")]
    MissingEndpoint(String),

    /// Every location hint was tried and none accepted a connection
    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect attempt did not finish in time
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),
}

impl BrokerError {
    /// Errors that no amount of retrying will fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BrokerError::InvalidBase32(_)
                | BrokerError::InvalidFurl { .. }
                | BrokerError::MissingEndpoint(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
