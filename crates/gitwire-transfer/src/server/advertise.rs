use gitwire_core::{resolve_reference, RefName, RefStore};
use gitwire_protocol::{default_agent, AdvRefs, Capabilities, Capability};

use crate::error::{Error, Result};

/// Builds the advertisement for a repository. Fetch advertisements of an
/// empty repository fail; push advertisements of one are legal.
pub async fn advertise_references<S>(store: &S, for_push: bool) -> Result<AdvRefs>
where
    S: RefStore + ?Sized,
{
    let mut advrefs = AdvRefs::new();

    advrefs
        .capabilities
        .set_value(Capability::Agent, default_agent());
    advrefs.capabilities.set(Capability::OfsDelta);
    if for_push {
        advrefs.capabilities.set(Capability::DeleteRefs);
        advrefs.capabilities.set(Capability::ReportStatus);
    }

    for reference in store.references().await? {
        advrefs.add_reference(&reference);
    }

    // A symbolic HEAD was recorded as a symref above; the advertised HEAD
    // value is its fully resolved hash.
    if advrefs.head.is_none() {
        match resolve_reference(store, &RefName::head()).await {
            Ok(resolved) => advrefs.head = resolved.oid(),
            Err(gitwire_core::Error::RefNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if !for_push && advrefs.is_empty() {
        return Err(Error::EmptyRemoteRepository);
    }
    Ok(advrefs)
}

/// Verifies the peer only requested capabilities this side advertised.
pub fn check_supported_capabilities(
    advertised: &Capabilities,
    requested: &Capabilities,
) -> Result<()> {
    for cap in requested.iter() {
        if !advertised.supports(cap) {
            return Err(Error::UnsupportedCapability(cap.to_string()));
        }
    }
    Ok(())
}
