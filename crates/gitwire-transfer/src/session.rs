use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gitwire_protocol::{AdvRefs, Capability, PktLineReader, PktLineWriter};

use crate::error::{Error, Result};

/// The services spoken over a pack-transfer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
            Service::UploadArchive => "git-upload-archive",
        }
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A full-duplex byte channel to the peer. How it was established (pipe,
/// socket, tunnel) is the transport's concern.
pub struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl Connection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn from_stream(stream: impl AsyncRead + AsyncWrite + Send + Unpin + 'static) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    pub fn into_parts(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

/// Runs a protocol step, failing with `Error::Cancelled` the moment the
/// caller's token fires. The abandoned future drops any in-flight write.
pub(crate) async fn with_cancel<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    E: Into<Error>,
    F: Future<Output = std::result::Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

/// Client-side session state: the pkt-line channel plus the advertisement
/// received during the handshake. The session owns the connection until it is
/// dropped.
pub struct PackSession {
    reader: PktLineReader<BoxedReader>,
    writer: PktLineWriter<BoxedWriter>,
    advrefs: Option<AdvRefs>,
}

impl PackSession {
    pub fn new(conn: Connection) -> Self {
        let (reader, writer) = conn.into_parts();
        Self {
            reader: PktLineReader::new(reader),
            writer: PktLineWriter::new(writer),
            advrefs: None,
        }
    }

    /// Reads the advertisement, applies the client-side capability filter,
    /// and caches the result. Subsequent calls return the cached value.
    pub async fn handshake(
        &mut self,
        for_push: bool,
        cancel: &CancellationToken,
    ) -> Result<&AdvRefs> {
        if self.advrefs.is_none() {
            let mut advrefs = with_cancel(cancel, AdvRefs::decode(&mut self.reader)).await?;
            if !for_push && advrefs.is_empty() {
                return Err(Error::EmptyRemoteRepository);
            }
            advrefs.filter_unsupported();
            debug!(
                refs = advrefs.references.len(),
                caps = %advrefs.capabilities,
                "handshake complete"
            );
            self.advrefs = Some(advrefs);
        }
        Ok(self.advrefs.as_ref().expect("advertisement cached"))
    }

    pub fn advertised(&self) -> Result<&AdvRefs> {
        self.advrefs.as_ref().ok_or(Error::NotConnected)
    }

    pub fn supports(&self, cap: &Capability) -> bool {
        self.advrefs
            .as_ref()
            .map(|ar| ar.capabilities.supports(cap))
            .unwrap_or(false)
    }

    pub(crate) fn io(
        &mut self,
    ) -> (
        &mut PktLineReader<BoxedReader>,
        &mut PktLineWriter<BoxedWriter>,
    ) {
        (&mut self.reader, &mut self.writer)
    }
}
