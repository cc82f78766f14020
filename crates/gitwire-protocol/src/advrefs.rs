use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use gitwire_core::{Oid, RefName, Reference};

use crate::capability::{Capabilities, Capability};
use crate::error::{Error, Result};
use crate::pktline::{PktLineReader, PktLineWriter};
use crate::version::ProtocolVersion;

const PEELED_SUFFIX: &str = "^{}";
const CAPABILITIES_MARKER: &str = "capabilities^{}";

/// The initial server message: reference list, peeled tags, HEAD, and the
/// server capability set.
#[derive(Debug, Clone, Default)]
pub struct AdvRefs {
    pub version: Option<ProtocolVersion>,
    pub head: Option<Oid>,
    pub head_symref: Option<RefName>,
    pub capabilities: Capabilities,
    pub references: BTreeMap<RefName, Oid>,
    pub peeled: HashMap<RefName, Oid>,
}

impl AdvRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference. Hash references land in the reference map; a
    /// symbolic HEAD is recorded as a symref capability.
    pub fn add_reference(&mut self, reference: &Reference) {
        match (&reference.target, reference.name.is_head()) {
            (gitwire_core::RefTarget::Hash(oid), true) => {
                self.head = Some(*oid);
            }
            (gitwire_core::RefTarget::Hash(oid), false) => {
                self.references.insert(reference.name.clone(), *oid);
            }
            (gitwire_core::RefTarget::Symbolic(target), true) => {
                self.head_symref = Some(target.clone());
                self.capabilities
                    .add(Capability::SymRef, format!("HEAD:{}", target));
            }
            (gitwire_core::RefTarget::Symbolic(_), false) => {}
        }
    }

    /// An advertisement with no references is only meaningful for the
    /// receive direction; fetch treats it as an empty remote.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.head.is_none()
    }

    /// Remote references as `Reference` values, HEAD included (symbolic when
    /// the server advertised a symref for it).
    pub fn all_references(&self) -> BTreeMap<RefName, Reference> {
        let mut refs: BTreeMap<RefName, Reference> = self
            .references
            .iter()
            .map(|(name, oid)| (name.clone(), Reference::hash(name.clone(), *oid)))
            .collect();
        if let Some(target) = &self.head_symref {
            refs.insert(
                RefName::head(),
                Reference::symbolic(RefName::head(), target.clone()),
            );
        } else if let Some(oid) = self.head {
            refs.insert(RefName::head(), Reference::hash(RefName::head(), oid));
        }
        refs
    }

    /// Strips the capabilities no client of this implementation ever uses.
    /// Applied to every received advertisement before further use.
    pub fn filter_unsupported(&mut self) {
        for cap in [
            Capability::MultiAck,
            Capability::MultiAckDetailed,
            Capability::ThinPack,
        ] {
            self.capabilities.delete(&cap);
        }
    }

    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        let mut lines: Vec<String> = Vec::new();

        if let Some(head) = self.head {
            lines.push(format!("{} HEAD", head));
        }
        for (name, oid) in &self.references {
            lines.push(format!("{} {}", oid, name));
            if let Some(peeled) = self.peeled.get(name) {
                lines.push(format!("{} {}{}", peeled, name, PEELED_SUFFIX));
            }
        }

        if lines.is_empty() {
            // Empty repository: a single capabilities marker line.
            lines.push(format!("{} {}", Oid::ZERO, CAPABILITIES_MARKER));
        }

        for (i, line) in lines.iter().enumerate() {
            let payload = if i == 0 {
                format!("{}\0{}\n", line, self.capabilities)
            } else {
                format!("{}\n", line)
            };
            w.write_data(payload).await?;
        }
        w.write_flush().await?;
        Ok(())
    }

    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let payloads = r.read_until_flush().await?;
        Self::parse(&payloads)
    }

    pub fn parse(payloads: &[Bytes]) -> Result<Self> {
        let mut advrefs = AdvRefs::new();
        let mut first = true;

        for payload in payloads {
            let line = std::str::from_utf8(payload)
                .map_err(|_| Error::InvalidProtocol("advertisement is not utf-8".to_string()))?;
            let line = line.trim_end_matches('\n');

            if first {
                if let Some(version) = ProtocolVersion::parse_line(line) {
                    advrefs.version = Some(version?);
                    continue;
                }
                first = false;
                let (refline, caps) = match line.split_once('\0') {
                    Some((refline, caps)) => (refline, caps),
                    None => (line, ""),
                };
                advrefs.capabilities = Capabilities::parse(caps);
                advrefs.parse_symrefs();
                advrefs.parse_ref_line(refline)?;
            } else {
                advrefs.parse_ref_line(line)?;
            }
        }

        Ok(advrefs)
    }

    fn parse_symrefs(&mut self) {
        let values = match self.capabilities.get(&Capability::SymRef) {
            Some(values) => values.to_vec(),
            None => return,
        };
        for value in values {
            if let Some((src, target)) = value.split_once(':') {
                if src == RefName::HEAD {
                    if let Ok(target) = RefName::new(target) {
                        self.head_symref = Some(target);
                    }
                }
            }
        }
    }

    fn parse_ref_line(&mut self, line: &str) -> Result<()> {
        let (hex, name) = line
            .split_once(' ')
            .ok_or_else(|| Error::InvalidProtocol(format!("malformed ref line: {}", line)))?;
        let oid = Oid::from_hex(hex)
            .map_err(|e| Error::InvalidProtocol(format!("malformed ref line: {}", e)))?;

        if name == CAPABILITIES_MARKER && oid.is_zero() {
            return Ok(());
        }
        if name == RefName::HEAD {
            self.head = Some(oid);
            return Ok(());
        }
        if let Some(base) = name.strip_suffix(PEELED_SUFFIX) {
            let base = RefName::new(base)
                .map_err(|e| Error::InvalidProtocol(e.to_string()))?;
            self.peeled.insert(base, oid);
            return Ok(());
        }

        let name = RefName::new(name).map_err(|e| Error::InvalidProtocol(e.to_string()))?;
        self.references.insert(name, oid);
        Ok(())
    }
}
