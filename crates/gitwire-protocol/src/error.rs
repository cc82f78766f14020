use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid pkt-line length: {0}")]
    InvalidLength(String),

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("unexpected packet: {0}")]
    UnexpectedPacket(String),

    #[error("stream ended unexpectedly")]
    UnexpectedEndOfStream,

    #[error("unknown sideband channel: {0}")]
    UnknownChannel(u8),

    #[error("remote error: {0}")]
    Sideband(String),

    #[error("core error: {0}")]
    Core(#[from] gitwire_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_too_large_display() {
        let err = Error::PayloadTooLarge {
            size: 70000,
            limit: 65516,
        };
        let msg = err.to_string();
        assert!(msg.contains("70000"));
        assert!(msg.contains("65516"));
    }

    #[test]
    fn test_sideband_display() {
        let err = Error::Sideband("fatal: not a repository".to_string());
        assert!(err.to_string().contains("not a repository"));
    }
}
