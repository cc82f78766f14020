use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use gitwire_core::RefName;

use crate::error::{Error, Result};
use crate::pktline::{PktLineReader, PktLineWriter};

pub const UNPACK_OK: &str = "ok";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub name: RefName,
    pub status: String,
}

impl CommandStatus {
    pub fn ok(name: RefName) -> Self {
        Self {
            name,
            status: UNPACK_OK.to_string(),
        }
    }

    pub fn failed(name: RefName, reason: impl Into<String>) -> Self {
        Self {
            name,
            status: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == UNPACK_OK
    }

    fn to_line(&self) -> String {
        if self.is_ok() {
            format!("ok {}\n", self.name)
        } else {
            format!("ng {} {}\n", self.name, self.status)
        }
    }
}

/// The server's reply to a push: unpack outcome plus one status per command.
#[derive(Debug, Clone, Default)]
pub struct ReportStatus {
    pub unpack_status: String,
    pub command_statuses: Vec<CommandStatus>,
}

impl ReportStatus {
    pub fn new() -> Self {
        Self {
            unpack_status: UNPACK_OK.to_string(),
            command_statuses: Vec::new(),
        }
    }

    pub fn unpack_ok(&self) -> bool {
        self.unpack_status == UNPACK_OK
    }

    /// The first failure, if any: the unpack error wins, then the first
    /// failed command.
    pub fn error(&self) -> Result<()> {
        if !self.unpack_ok() {
            return Err(Error::InvalidProtocol(format!(
                "unpack error: {}",
                self.unpack_status
            )));
        }
        for status in &self.command_statuses {
            if !status.is_ok() {
                return Err(Error::InvalidProtocol(format!(
                    "command failed for {}: {}",
                    status.name, status.status
                )));
            }
        }
        Ok(())
    }

    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        w.write_data(format!("unpack {}\n", self.unpack_status)).await?;
        for status in &self.command_statuses {
            w.write_data(status.to_line()).await?;
        }
        w.write_flush().await?;
        Ok(())
    }

    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let payloads = r.read_until_flush().await?;
        Self::parse(&payloads)
    }

    pub fn parse(payloads: &[Bytes]) -> Result<Self> {
        let mut report = ReportStatus::default();
        let mut saw_unpack = false;

        for payload in payloads {
            let line = std::str::from_utf8(payload)
                .map_err(|_| Error::InvalidProtocol("report status is not utf-8".to_string()))?;
            let line = line.trim_end_matches('\n');

            if let Some(rest) = line.strip_prefix("unpack ") {
                report.unpack_status = rest.to_string();
                saw_unpack = true;
            } else if let Some(rest) = line.strip_prefix("ok ") {
                let name =
                    RefName::new(rest).map_err(|e| Error::InvalidProtocol(e.to_string()))?;
                report.command_statuses.push(CommandStatus::ok(name));
            } else if let Some(rest) = line.strip_prefix("ng ") {
                let (name, reason) = rest.split_once(' ').ok_or_else(|| {
                    Error::InvalidProtocol(format!("malformed ng line: {}", line))
                })?;
                let name =
                    RefName::new(name).map_err(|e| Error::InvalidProtocol(e.to_string()))?;
                report
                    .command_statuses
                    .push(CommandStatus::failed(name, reason));
            } else {
                return Err(Error::InvalidProtocol(format!(
                    "unknown report status line: {}",
                    line
                )));
            }
        }

        if !saw_unpack {
            return Err(Error::InvalidProtocol(
                "report status missing unpack line".to_string(),
            ));
        }
        Ok(report)
    }
}
