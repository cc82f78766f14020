use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    #[default]
    V0,
    V1,
    V2,
}

impl ProtocolVersion {
    /// Parses a `version <n>` announcement line, as sent ahead of the
    /// advertisement by v1-capable servers.
    pub fn parse_line(line: &str) -> Option<Result<Self>> {
        let rest = line.trim_end().strip_prefix("version ")?;
        Some(match rest {
            "0" => Ok(ProtocolVersion::V0),
            "1" => Ok(ProtocolVersion::V1),
            "2" => Ok(ProtocolVersion::V2),
            other => Err(Error::InvalidProtocol(format!(
                "unknown protocol version: {}",
                other
            ))),
        })
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ProtocolVersion::V0 => 0,
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version {}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_line() {
        assert_eq!(
            ProtocolVersion::parse_line("version 1\n").unwrap().unwrap(),
            ProtocolVersion::V1
        );
        assert_eq!(
            ProtocolVersion::parse_line("version 2").unwrap().unwrap(),
            ProtocolVersion::V2
        );
    }

    #[test]
    fn test_parse_non_version_line() {
        assert!(ProtocolVersion::parse_line("0123abc HEAD").is_none());
    }

    #[test]
    fn test_parse_unknown_version() {
        assert!(ProtocolVersion::parse_line("version 9").unwrap().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::V1.to_string(), "version 1");
    }
}
