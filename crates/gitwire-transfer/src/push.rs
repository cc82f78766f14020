use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gitwire_protocol::sideband::SidebandKind;
use gitwire_protocol::{
    Capabilities, Capability, Command, Demuxer, PktLineReader, ReportStatus, UpdateRequests,
};

use crate::error::{Error, Result};
use crate::session::{with_cancel, PackSession};

/// A push: reference update commands, the packfile carrying the new objects,
/// and the options negotiated with the server.
#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub commands: Vec<Command>,
    /// Pack bytes for any create/update command. Deletes alone need none.
    pub packfile: Option<Bytes>,
    pub progress: Option<UnboundedSender<Bytes>>,
    pub options: Vec<(String, String)>,
    /// Ask for all-or-nothing reference updates, when the server offers it.
    pub atomic: bool,
}

fn build_update_requests(server_caps: &Capabilities, req: &PushRequest) -> UpdateRequests {
    let mut upreq = UpdateRequests::from_capabilities(server_caps);

    if req.progress.is_some() {
        if server_caps.supports(&Capability::SideBand64k) {
            upreq.capabilities.set(Capability::SideBand64k);
        } else if server_caps.supports(&Capability::SideBand) {
            upreq.capabilities.set(Capability::SideBand);
        }
    } else if server_caps.supports(&Capability::NoProgress) {
        upreq.capabilities.set(Capability::NoProgress);
    }

    if !req.options.is_empty() && server_caps.supports(&Capability::PushOptions) {
        upreq.capabilities.set(Capability::PushOptions);
        upreq.options = req.options.clone();
    }

    if req.atomic && server_caps.supports(&Capability::Atomic) {
        upreq.capabilities.set(Capability::Atomic);
    }

    upreq.commands = req.commands.clone();
    upreq
}

fn sideband_kind(caps: &Capabilities) -> Option<SidebandKind> {
    if caps.supports(&Capability::SideBand64k) {
        Some(SidebandKind::Sideband64k)
    } else if caps.supports(&Capability::SideBand) {
        Some(SidebandKind::Sideband)
    } else {
        None
    }
}

/// Drives a push against an established session: emits the update-requests
/// and packfile, half-closes the write side, and decodes the report-status
/// when that capability is in effect. The report carries per-reference
/// outcomes independently of the overall result.
pub async fn push(
    session: &mut PackSession,
    req: &PushRequest,
    cancel: &CancellationToken,
) -> Result<Option<ReportStatus>> {
    let advrefs = session.handshake(true, cancel).await?;
    let server_caps = advrefs.capabilities.clone();

    let upreq = build_update_requests(&server_caps, req);
    let negotiated = upreq.capabilities.clone();

    let (_, writer) = session.io();
    with_cancel(cancel, upreq.encode(writer)).await?;

    if upreq.needs_packfile() {
        if let Some(pack) = &req.packfile {
            debug!(bytes = pack.len(), "sending packfile");
            with_cancel(cancel, async {
                writer.get_mut().write_all(pack).await
            })
            .await?;
        }
    }
    with_cancel(cancel, writer.flush()).await?;
    writer.shutdown().await?;

    if !negotiated.supports(&Capability::ReportStatus) {
        return Ok(None);
    }

    let report = read_report(session, &negotiated, req.progress.clone(), cancel).await?;
    Ok(Some(report))
}

async fn read_report(
    session: &mut PackSession,
    negotiated: &Capabilities,
    progress: Option<tokio::sync::mpsc::UnboundedSender<Bytes>>,
    cancel: &CancellationToken,
) -> Result<ReportStatus> {
    let (reader, _) = session.io();

    match sideband_kind(negotiated) {
        Some(_) => {
            // The report-status packets arrive wrapped in sideband data
            // frames; reassemble them first, then parse.
            let mut demuxer = Demuxer::new(PktLineReader::new(reader.get_mut()), progress);
            let mut buf = BytesMut::new();
            loop {
                match with_cancel(cancel, demuxer.read_chunk()).await? {
                    Some(chunk) => buf.extend_from_slice(&chunk),
                    None => break,
                }
            }
            let mut inner = PktLineReader::new(&buf[..]);
            Ok(ReportStatus::decode(&mut inner).await?)
        }
        None => Ok(with_cancel(cancel, ReportStatus::decode(reader)).await?),
    }
}
