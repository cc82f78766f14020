use tokio::io::{AsyncRead, AsyncWrite};

use gitwire_core::{Oid, RefName};

use crate::capability::{Capabilities, Capability};
use crate::error::{Error, Result};
use crate::pktline::{PktLineReader, PktLineWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Delete,
    Update,
    Invalid,
}

/// A single reference update command: `(name, old, new)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: RefName,
    pub old: Oid,
    pub new: Oid,
}

impl Command {
    pub fn new(name: RefName, old: Oid, new: Oid) -> Self {
        Self { name, old, new }
    }

    pub fn create(name: RefName, new: Oid) -> Self {
        Self::new(name, Oid::ZERO, new)
    }

    pub fn delete(name: RefName, old: Oid) -> Self {
        Self::new(name, old, Oid::ZERO)
    }

    pub fn action(&self) -> Action {
        match (self.old.is_zero(), self.new.is_zero()) {
            (true, true) => Action::Invalid,
            (true, false) => Action::Create,
            (false, true) => Action::Delete,
            (false, false) => Action::Update,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.action() == Action::Invalid {
            return Err(Error::InvalidProtocol(format!(
                "malformed command for {}: old and new are both zero",
                self.name
            )));
        }
        Ok(())
    }

    fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split(' ');
        let (old, new, name) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(old), Some(new), Some(name), None) => (old, new, name),
            _ => {
                return Err(Error::InvalidProtocol(format!(
                    "malformed command line: {}",
                    line
                )))
            }
        };
        Ok(Self {
            name: RefName::new(name).map_err(|e| Error::InvalidProtocol(e.to_string()))?,
            old: Oid::from_hex(old)
                .map_err(|e| Error::InvalidProtocol(format!("invalid old oid: {}", e)))?,
            new: Oid::from_hex(new)
                .map_err(|e| Error::InvalidProtocol(format!("invalid new oid: {}", e)))?,
        })
    }
}

/// The reference-update request of a push: commands, capabilities, and
/// optional push options. The packfile body follows the encoded request on
/// the raw stream.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequests {
    pub capabilities: Capabilities,
    pub commands: Vec<Command>,
    pub options: Vec<(String, String)>,
}

impl UpdateRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_capabilities(adv: &Capabilities) -> Self {
        let mut req = Self::new();
        if adv.supports(&Capability::Agent) {
            req.capabilities
                .set_value(Capability::Agent, crate::capability::default_agent());
        }
        if adv.supports(&Capability::ReportStatus) {
            req.capabilities.set(Capability::ReportStatus);
        }
        req
    }

    pub fn validate(&self) -> Result<()> {
        if self.commands.is_empty() {
            return Err(Error::InvalidProtocol("commands cannot be empty".to_string()));
        }
        for cmd in &self.commands {
            cmd.validate()?;
        }
        Ok(())
    }

    /// Whether any command needs a packfile body (deletes alone do not).
    pub fn needs_packfile(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c.action(), Action::Create | Action::Update))
    }

    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        self.validate()?;

        for (i, cmd) in self.commands.iter().enumerate() {
            let line = if i == 0 {
                format!("{} {} {}\0{}\n", cmd.old, cmd.new, cmd.name, self.capabilities)
            } else {
                format!("{} {} {}\n", cmd.old, cmd.new, cmd.name)
            };
            w.write_data(line).await?;
        }
        w.write_flush().await?;

        if self.capabilities.supports(&Capability::PushOptions) {
            for (key, value) in &self.options {
                if value.is_empty() {
                    w.write_data(format!("{}\n", key)).await?;
                } else {
                    w.write_data(format!("{}={}\n", key, value)).await?;
                }
            }
            w.write_flush().await?;
        }
        Ok(())
    }

    /// Decodes the command section (and options when negotiated). The caller
    /// keeps the reader to consume the packfile body that follows.
    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let mut req = Self::new();

        let payloads = r.read_until_flush().await?;
        for (i, payload) in payloads.iter().enumerate() {
            let line = std::str::from_utf8(payload)
                .map_err(|_| Error::InvalidProtocol("update request is not utf-8".to_string()))?;
            let line = line.trim_end_matches('\n');

            let line = if i == 0 {
                let (cmd, caps) = match line.split_once('\0') {
                    Some((cmd, caps)) => (cmd, caps),
                    None => (line, ""),
                };
                req.capabilities = Capabilities::parse(caps);
                cmd
            } else {
                line
            };
            req.commands.push(Command::parse(line)?);
        }

        if req.capabilities.supports(&Capability::PushOptions) {
            for payload in r.read_until_flush().await? {
                let line = std::str::from_utf8(&payload)
                    .map_err(|_| Error::InvalidProtocol("push option is not utf-8".to_string()))?;
                let line = line.trim_end_matches('\n');
                match line.split_once('=') {
                    Some((key, value)) => {
                        req.options.push((key.to_string(), value.to_string()))
                    }
                    None => req.options.push((line.to_string(), String::new())),
                }
            }
        }

        Ok(req)
    }
}
