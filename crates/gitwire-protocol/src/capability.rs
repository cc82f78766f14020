use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Agent,
    OfsDelta,
    SideBand,
    SideBand64k,
    NoProgress,
    IncludeTag,
    Shallow,
    DeleteRefs,
    ReportStatus,
    NoThin,
    ThinPack,
    Atomic,
    PushOptions,
    AllowTipSha1InWant,
    AllowReachableSha1InWant,
    MultiAck,
    MultiAckDetailed,
    SymRef,
    Other(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Agent => "agent",
            Capability::OfsDelta => "ofs-delta",
            Capability::SideBand => "side-band",
            Capability::SideBand64k => "side-band-64k",
            Capability::NoProgress => "no-progress",
            Capability::IncludeTag => "include-tag",
            Capability::Shallow => "shallow",
            Capability::DeleteRefs => "delete-refs",
            Capability::ReportStatus => "report-status",
            Capability::NoThin => "no-thin",
            Capability::ThinPack => "thin-pack",
            Capability::Atomic => "atomic",
            Capability::PushOptions => "push-options",
            Capability::AllowTipSha1InWant => "allow-tip-sha1-in-want",
            Capability::AllowReachableSha1InWant => "allow-reachable-sha1-in-want",
            Capability::MultiAck => "multi_ack",
            Capability::MultiAckDetailed => "multi_ack_detailed",
            Capability::SymRef => "symref",
            Capability::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "agent" => Capability::Agent,
            "ofs-delta" => Capability::OfsDelta,
            "side-band" => Capability::SideBand,
            "side-band-64k" => Capability::SideBand64k,
            "no-progress" => Capability::NoProgress,
            "include-tag" => Capability::IncludeTag,
            "shallow" => Capability::Shallow,
            "delete-refs" => Capability::DeleteRefs,
            "report-status" => Capability::ReportStatus,
            "no-thin" => Capability::NoThin,
            "thin-pack" => Capability::ThinPack,
            "atomic" => Capability::Atomic,
            "push-options" => Capability::PushOptions,
            "allow-tip-sha1-in-want" => Capability::AllowTipSha1InWant,
            "allow-reachable-sha1-in-want" => Capability::AllowReachableSha1InWant,
            "multi_ack" => Capability::MultiAck,
            "multi_ack_detailed" => Capability::MultiAckDetailed,
            "symref" => Capability::SymRef,
            other => Capability::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn default_agent() -> String {
    format!("gitwire/{}", env!("CARGO_PKG_VERSION"))
}

/// Ordered capability list. Insertion order is preserved so a parsed list
/// serializes back to the same bytes; membership checks are hash lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    order: Vec<Capability>,
    values: HashMap<Capability, Vec<String>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Self {
        let mut caps = Self::new();
        for token in s.split(' ').filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => caps.add(Capability::parse(key), value),
                None => caps.set(Capability::parse(token)),
            }
        }
        caps
    }

    pub fn supports(&self, cap: &Capability) -> bool {
        self.values.contains_key(cap)
    }

    /// Sets `cap` with no values, replacing any existing values.
    pub fn set(&mut self, cap: Capability) {
        self.set_values(cap, Vec::new());
    }

    /// Sets `cap = value`, replacing any existing values.
    pub fn set_value(&mut self, cap: Capability, value: impl Into<String>) {
        self.set_values(cap, vec![value.into()]);
    }

    pub fn set_values(&mut self, cap: Capability, values: Vec<String>) {
        if !self.values.contains_key(&cap) {
            self.order.push(cap.clone());
        }
        self.values.insert(cap, values);
    }

    /// Appends a value, keeping existing ones (used for repeated keys such
    /// as symref).
    pub fn add(&mut self, cap: Capability, value: impl Into<String>) {
        if !self.values.contains_key(&cap) {
            self.order.push(cap.clone());
        }
        self.values.entry(cap).or_default().push(value.into());
    }

    pub fn delete(&mut self, cap: &Capability) {
        if self.values.remove(cap).is_some() {
            self.order.retain(|c| c != cap);
        }
    }

    pub fn get(&self, cap: &Capability) -> Option<&[String]> {
        self.values.get(cap).map(|v| v.as_slice())
    }

    pub fn first_value(&self, cap: &Capability) -> Option<&str> {
        self.values
            .get(cap)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.order.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = Vec::new();
        for cap in &self.order {
            let values = &self.values[cap];
            if values.is_empty() {
                tokens.push(cap.as_str().to_string());
            } else {
                for v in values {
                    tokens.push(format!("{}={}", cap, v));
                }
            }
        }
        write!(f, "{}", tokens.join(" "))
    }
}
