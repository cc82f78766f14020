use tokio::io::{AsyncRead, AsyncWrite};

use gitwire_core::Oid;

use crate::error::{Error, Result};
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};

/// The shallow/unshallow block the server sends in reply to a deepen
/// request, terminated by a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShallowUpdate {
    pub shallows: Vec<Oid>,
    pub unshallows: Vec<Oid>,
}

impl ShallowUpdate {
    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        for oid in &self.shallows {
            w.write_data(format!("shallow {}\n", oid)).await?;
        }
        for oid in &self.unshallows {
            w.write_data(format!("unshallow {}\n", oid)).await?;
        }
        w.write_flush().await?;
        Ok(())
    }

    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let mut update = ShallowUpdate::default();
        for payload in r.read_until_flush().await? {
            let line = std::str::from_utf8(&payload)
                .map_err(|_| Error::InvalidProtocol("shallow update is not utf-8".to_string()))?;
            let line = line.trim_end_matches('\n');
            if let Some(rest) = line.strip_prefix("shallow ") {
                update.shallows.push(parse_oid(rest)?);
            } else if let Some(rest) = line.strip_prefix("unshallow ") {
                update.unshallows.push(parse_oid(rest)?);
            } else {
                return Err(Error::InvalidProtocol(format!(
                    "unknown shallow update line: {}",
                    line
                )));
            }
        }
        Ok(update)
    }
}

fn parse_oid(s: &str) -> Result<Oid> {
    Oid::from_hex(s).map_err(|e| Error::InvalidProtocol(format!("invalid oid: {}", e)))
}

/// A single ACK/NAK response packet, as used by the v0/v1 negotiation once
/// multi-ack has been filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    Ack(Oid),
    Nak,
}

impl ServerResponse {
    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        match self {
            ServerResponse::Ack(oid) => w.write_data(format!("ACK {}\n", oid)).await,
            ServerResponse::Nak => w.write_data("NAK\n".to_string()).await,
        }
    }

    /// Reads exactly one ACK/NAK packet.
    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let pkt = r
            .read_pkt()
            .await?
            .ok_or(Error::UnexpectedEndOfStream)?;
        let payload = match pkt {
            PktLine::Data(d) => d,
            other => return Err(Error::UnexpectedPacket(format!("{:?}", other))),
        };
        let line = std::str::from_utf8(&payload)
            .map_err(|_| Error::InvalidProtocol("server response is not utf-8".to_string()))?;
        let line = line.trim_end_matches('\n');

        if line == "NAK" {
            return Ok(ServerResponse::Nak);
        }
        if let Some(rest) = line.strip_prefix("ACK ") {
            // Trailing multi-ack statuses are not expected here; tolerate and
            // ignore them so a misbehaving server does not kill the session.
            let hex = rest.split(' ').next().unwrap_or(rest);
            return Ok(ServerResponse::Ack(parse_oid(hex)?));
        }

        Err(Error::InvalidProtocol(format!(
            "expected ACK or NAK, got: {}",
            line
        )))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, ServerResponse::Ack(_))
    }
}
