/// Errors that can occur in relay transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to one or more relays.
    #[error("failed to connect to relays {relays:?}: {message}")]
    Connect {
        relays: Vec<String>,
        message: String,
    },

    /// Relay sync was requested with an empty relay set.
    #[error("relay set is empty")]
    NoRelays,
}

pub type Result<T> = std::result::Result<T, TransportError>;
