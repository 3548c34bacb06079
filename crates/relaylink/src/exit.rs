use std::fmt;
use std::io;

use relaylink_peer::PeerError;
use relaylink_shard::ShardError;
use relaylink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match err {
        TransportError::Connect { .. } => TRANSPORT_ERROR,
        TransportError::NoRelays => USAGE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn shard_error(context: &str, err: ShardError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Shard(err) => shard_error(context, err),
        PeerError::KeyStore(err) => io_error(context, err),
        PeerError::InvalidReference(_) | PeerError::InvalidKey(_) | PeerError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PeerError::NoRelays(_)
        | PeerError::DuplicateRequest(_)
        | PeerError::InvalidSubscription => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        PeerError::BringUp(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_errors_map_to_stable_codes() {
        assert_eq!(
            peer_error("x", PeerError::InvalidReference("bad".into())).code,
            DATA_INVALID
        );
        assert_eq!(peer_error("x", PeerError::NoRelays("bob".into())).code, USAGE);
        assert_eq!(
            peer_error("x", PeerError::Transport(TransportError::NoRelays)).code,
            USAGE
        );
        assert_eq!(
            peer_error(
                "x",
                PeerError::KeyStore(io::Error::new(io::ErrorKind::PermissionDenied, "nope"))
            )
            .code,
            PERMISSION_DENIED
        );
        assert_eq!(
            peer_error("x", PeerError::Shard(ShardError::MissingCorrelation)).code,
            DATA_INVALID
        );
    }

    #[test]
    fn context_prefixes_message() {
        let err = peer_error("decode failed", PeerError::InvalidKey("short".into()));
        assert_eq!(err.to_string(), "decode failed: invalid key: short");
    }
}
