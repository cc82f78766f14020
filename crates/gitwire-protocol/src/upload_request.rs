use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use gitwire_core::Oid;

use crate::capability::{Capabilities, Capability};
use crate::error::{Error, Result};
use crate::pktline::{PktLineReader, PktLineWriter};

/// The fetch request body: wants, shallow state, and requested depth. The
/// first want line carries the negotiated capability list.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub capabilities: Capabilities,
    pub wants: Vec<Oid>,
    pub shallows: Vec<Oid>,
    pub depth: Option<u32>,
}

impl UploadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_capabilities(adv: &Capabilities) -> Self {
        let mut req = Self::new();
        if adv.supports(&Capability::Agent) {
            req.capabilities
                .set_value(Capability::Agent, crate::capability::default_agent());
        }
        req
    }

    pub fn is_empty(&self) -> bool {
        self.wants.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.wants.is_empty() {
            return Err(Error::InvalidProtocol("want list cannot be empty".to_string()));
        }
        if self.depth.is_some() && !self.capabilities.supports(&Capability::Shallow) {
            return Err(Error::InvalidProtocol(
                "deepen requires the shallow capability".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        self.validate()?;

        for (i, want) in self.wants.iter().enumerate() {
            let line = if i == 0 && !self.capabilities.is_empty() {
                format!("want {} {}\n", want, self.capabilities)
            } else {
                format!("want {}\n", want)
            };
            w.write_data(line).await?;
        }
        for shallow in &self.shallows {
            w.write_data(format!("shallow {}\n", shallow)).await?;
        }
        if let Some(depth) = self.depth {
            if depth > 0 {
                w.write_data(format!("deepen {}\n", depth)).await?;
            }
        }
        w.write_flush().await?;
        Ok(())
    }

    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let payloads = r.read_until_flush().await?;
        Self::parse(&payloads)
    }

    pub fn parse(payloads: &[Bytes]) -> Result<Self> {
        let mut req = Self::new();

        for (i, payload) in payloads.iter().enumerate() {
            let line = std::str::from_utf8(payload)
                .map_err(|_| Error::InvalidProtocol("upload request is not utf-8".to_string()))?;
            let line = line.trim_end_matches('\n');

            if let Some(rest) = line.strip_prefix("want ") {
                let (hex, caps) = match rest.split_once(' ') {
                    Some((hex, caps)) => (hex, Some(caps)),
                    None => (rest, None),
                };
                let oid = Oid::from_hex(hex)
                    .map_err(|e| Error::InvalidProtocol(format!("invalid want: {}", e)))?;
                req.wants.push(oid);
                if let Some(caps) = caps {
                    if i == 0 {
                        req.capabilities = Capabilities::parse(caps);
                    }
                }
            } else if let Some(rest) = line.strip_prefix("shallow ") {
                let oid = Oid::from_hex(rest)
                    .map_err(|e| Error::InvalidProtocol(format!("invalid shallow: {}", e)))?;
                req.shallows.push(oid);
            } else if let Some(rest) = line.strip_prefix("deepen ") {
                let depth: u32 = rest.parse().map_err(|_| {
                    Error::InvalidProtocol(format!("invalid deepen value: {}", rest))
                })?;
                req.depth = Some(depth);
            } else {
                return Err(Error::InvalidProtocol(format!(
                    "unknown upload request line: {}",
                    line
                )));
            }
        }

        Ok(req)
    }
}

/// The haves the client claims to hold, each on its own packet.
#[derive(Debug, Clone, Default)]
pub struct UploadHaves {
    pub haves: Vec<Oid>,
}

impl UploadHaves {
    pub async fn encode<W: AsyncWrite + Unpin>(
        &self,
        w: &mut PktLineWriter<W>,
        flush: bool,
    ) -> Result<()> {
        for have in &self.haves {
            w.write_data(format!("have {}\n", have)).await?;
        }
        if flush {
            w.write_flush().await?;
        }
        Ok(())
    }
}
