use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gitwire_core::{ObjectStore, Oid, RefName, RefStore, Reference};
use gitwire_protocol::sideband::{Muxer, SidebandKind};
use gitwire_protocol::{
    Action, Capabilities, Capability, Command, CommandStatus, PktLineReader, PktLineWriter,
    ReportStatus, UpdateRequests,
};

use crate::error::Result;
use crate::server::advertise::{advertise_references, check_supported_capabilities};
use crate::session::{with_cancel, Connection};

const ERR_UPDATE_REFERENCE: &str = "failed to update ref";

fn sideband_kind(caps: &Capabilities) -> Option<SidebandKind> {
    if caps.supports(&Capability::SideBand64k) {
        Some(SidebandKind::Sideband64k)
    } else if caps.supports(&Capability::SideBand) {
        Some(SidebandKind::Sideband)
    } else {
        None
    }
}

/// Serves one `git-receive-pack` session: advertise, decode the reference
/// update request, ingest the packfile, apply the commands, and emit the
/// report-status. Packfile ingestion strictly precedes reference updates,
/// and an unpack error short-circuits them while still producing a report.
pub async fn serve_receive_pack<S>(
    storage: &S,
    conn: Connection,
    cancel: &CancellationToken,
) -> Result<Option<ReportStatus>>
where
    S: RefStore + ObjectStore + ?Sized,
{
    let (r, w) = conn.into_parts();
    let mut reader = PktLineReader::new(r);
    let mut writer = PktLineWriter::new(w);

    let advrefs = advertise_references(storage, true).await?;
    with_cancel(cancel, advrefs.encode(&mut writer)).await?;
    with_cancel(cancel, writer.flush()).await?;

    let req = with_cancel(cancel, UpdateRequests::decode(&mut reader)).await?;
    if req.commands.is_empty() {
        // The client had nothing to push and hung up after a lone flush.
        return Ok(None);
    }
    check_supported_capabilities(&advrefs.capabilities, &req.capabilities)?;

    let mut report = ReportStatus::new();
    let mut unpack_failed = false;

    if req.needs_packfile() {
        let pack = read_pack_body(&mut reader, cancel).await?;
        if let Err(e) = storage.write_pack(pack).await {
            warn!(error = %e, "pack ingestion failed");
            report.unpack_status = e.to_string();
            unpack_failed = true;
        }
    }

    if !unpack_failed {
        for cmd in &req.commands {
            let status = apply_command(storage, cmd).await;
            report.command_statuses.push(status);
        }
    }

    if req.capabilities.supports(&Capability::ReportStatus) {
        send_report(&mut writer, &req.capabilities, &report, cancel).await?;
    }
    writer.shutdown().await?;
    Ok(Some(report))
}

async fn read_pack_body(
    reader: &mut PktLineReader<impl tokio::io::AsyncRead + Unpin>,
    cancel: &CancellationToken,
) -> Result<Bytes> {
    let mut pack = BytesMut::new();
    let inner = reader.get_mut();
    loop {
        let mut chunk = [0u8; 8192];
        let n = with_cancel(cancel, async { inner.read(&mut chunk).await }).await?;
        if n == 0 {
            break;
        }
        pack.extend_from_slice(&chunk[..n]);
    }
    debug!(bytes = pack.len(), "packfile body received");
    Ok(pack.freeze())
}

/// Applies one command against the reference store. Existence rules per
/// action, then a compare-and-set keyed on the command's old value.
async fn apply_command<S>(storage: &S, cmd: &Command) -> CommandStatus
where
    S: RefStore + ?Sized,
{
    let exists = match storage.reference(&cmd.name).await {
        Ok(current) => current.is_some(),
        Err(e) => return CommandStatus::failed(cmd.name.clone(), e.to_string()),
    };

    let result = match cmd.action() {
        Action::Create => {
            if exists {
                return CommandStatus::failed(cmd.name.clone(), ERR_UPDATE_REFERENCE);
            }
            set_reference(storage, &cmd.name, cmd.new, None).await
        }
        Action::Update => {
            if !exists {
                return CommandStatus::failed(cmd.name.clone(), ERR_UPDATE_REFERENCE);
            }
            set_reference(storage, &cmd.name, cmd.new, Some(cmd.old)).await
        }
        Action::Delete => {
            if !exists {
                return CommandStatus::failed(cmd.name.clone(), ERR_UPDATE_REFERENCE);
            }
            match storage.remove(&cmd.name, Some(&cmd.old)).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(ERR_UPDATE_REFERENCE.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }
        Action::Invalid => Err("malformed command".to_string()),
    };

    match result {
        Ok(()) => CommandStatus::ok(cmd.name.clone()),
        Err(reason) => CommandStatus::failed(cmd.name.clone(), reason),
    }
}

async fn set_reference<S>(
    storage: &S,
    name: &RefName,
    new: Oid,
    old: Option<Oid>,
) -> std::result::Result<(), String>
where
    S: RefStore + ?Sized,
{
    let new_ref = Reference::hash(name.clone(), new);
    let old_ref = old.map(|oid| Reference::hash(name.clone(), oid));
    match storage.check_and_set(&new_ref, old_ref.as_ref()).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ERR_UPDATE_REFERENCE.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

async fn send_report(
    writer: &mut PktLineWriter<impl tokio::io::AsyncWrite + Unpin>,
    caps: &Capabilities,
    report: &ReportStatus,
    cancel: &CancellationToken,
) -> Result<()> {
    match sideband_kind(caps) {
        Some(kind) => {
            // Encode the report into its own pkt-line stream, then carry
            // those bytes as sideband data frames.
            let mut buf = Vec::new();
            {
                let mut inner = PktLineWriter::new(&mut buf);
                report.encode(&mut inner).await?;
            }
            let mut muxer = Muxer::new(writer, kind);
            with_cancel(cancel, muxer.write_data(&buf)).await?;
            with_cancel(cancel, writer.write_flush()).await?;
        }
        None => {
            with_cancel(cancel, report.encode(writer)).await?;
        }
    }
    with_cancel(cancel, writer.flush()).await?;
    Ok(())
}
