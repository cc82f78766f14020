use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};

pub const CHANNEL_DATA: u8 = 1;
pub const CHANNEL_PROGRESS: u8 = 2;
pub const CHANNEL_ERROR: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Data,
    Progress,
    Error,
}

impl Channel {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            CHANNEL_DATA => Ok(Channel::Data),
            CHANNEL_PROGRESS => Ok(Channel::Progress),
            CHANNEL_ERROR => Ok(Channel::Error),
            other => Err(Error::UnknownChannel(other)),
        }
    }

    pub fn byte(&self) -> u8 {
        match self {
            Channel::Data => CHANNEL_DATA,
            Channel::Progress => CHANNEL_PROGRESS,
            Channel::Error => CHANNEL_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandKind {
    Sideband,
    Sideband64k,
}

impl SidebandKind {
    /// Maximum data bytes per frame, excluding the channel byte.
    pub fn max_data_len(&self) -> usize {
        match self {
            SidebandKind::Sideband => 999,
            SidebandKind::Sideband64k => 65515,
        }
    }
}

/// Splits a multiplexed packet stream back into its channels: data frames are
/// returned to the caller, progress frames go to the optional sink, an error
/// frame terminates the read.
pub struct Demuxer<R> {
    reader: PktLineReader<R>,
    progress: Option<UnboundedSender<Bytes>>,
}

impl<R: AsyncRead + Unpin> Demuxer<R> {
    pub fn new(reader: PktLineReader<R>, progress: Option<UnboundedSender<Bytes>>) -> Self {
        Self { reader, progress }
    }

    /// Next data chunk, or `None` once the stream reaches a flush packet or
    /// a clean EOF.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let pkt = match self.reader.read_pkt().await? {
                Some(pkt) => pkt,
                None => return Ok(None),
            };
            let payload = match pkt {
                PktLine::Flush => return Ok(None),
                PktLine::Data(d) => d,
                other => return Err(Error::UnexpectedPacket(format!("{:?}", other))),
            };
            if payload.is_empty() {
                return Err(Error::InvalidProtocol(
                    "sideband packet without channel byte".to_string(),
                ));
            }
            let body = payload.slice(1..);
            match Channel::from_byte(payload[0])? {
                Channel::Data => return Ok(Some(body)),
                Channel::Progress => {
                    if let Some(sink) = &self.progress {
                        let _ = sink.send(body);
                    }
                }
                Channel::Error => {
                    return Err(Error::Sideband(
                        String::from_utf8_lossy(&body).trim_end().to_string(),
                    ));
                }
            }
        }
    }
}

/// Frames outgoing bytes onto a sideband channel, splitting data into frames
/// no larger than the negotiated variant allows.
pub struct Muxer<'a, W> {
    writer: &'a mut PktLineWriter<W>,
    kind: SidebandKind,
}

impl<'a, W: AsyncWrite + Unpin> Muxer<'a, W> {
    pub fn new(writer: &'a mut PktLineWriter<W>, kind: SidebandKind) -> Self {
        Self { writer, kind }
    }

    async fn write_channel(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        for frame in data.chunks(self.kind.max_data_len()) {
            let mut payload = BytesMut::with_capacity(frame.len() + 1);
            payload.extend_from_slice(&[channel.byte()]);
            payload.extend_from_slice(frame);
            self.writer.write_data(payload.freeze()).await?;
        }
        Ok(())
    }

    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write_channel(Channel::Data, data).await
    }

    pub async fn write_progress(&mut self, msg: &[u8]) -> Result<()> {
        self.write_channel(Channel::Progress, msg).await
    }

    pub async fn write_error(&mut self, msg: &[u8]) -> Result<()> {
        self.write_channel(Channel::Error, msg).await
    }
}

/// The packfile leg of a session: demultiplexed when a sideband capability is
/// in effect, the raw byte stream otherwise.
pub enum PackStream<R> {
    Raw(R),
    Demuxed(Demuxer<R>),
}

impl<R: AsyncRead + Unpin> PackStream<R> {
    pub fn raw(reader: R) -> Self {
        PackStream::Raw(reader)
    }

    pub fn demuxed(
        kind: SidebandKind,
        reader: PktLineReader<R>,
        progress: Option<UnboundedSender<Bytes>>,
    ) -> Self {
        debug!(?kind, "demultiplexing packfile stream");
        PackStream::Demuxed(Demuxer::new(reader, progress))
    }

    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        match self {
            PackStream::Demuxed(demuxer) => demuxer.read_chunk().await,
            PackStream::Raw(reader) => {
                let mut buf = BytesMut::with_capacity(8192);
                let n = reader.read_buf(&mut buf).await?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(buf.freeze()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    async fn mux_frames(kind: SidebandKind, writes: &[(Channel, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            let mut muxer = Muxer::new(&mut writer, kind);
            for (channel, data) in writes {
                muxer.write_channel(*channel, data).await.unwrap();
            }
            writer.write_flush().await.unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_demux_data_and_progress() {
        let buf = mux_frames(
            SidebandKind::Sideband64k,
            &[
                (Channel::Progress, b"counting objects\n"),
                (Channel::Data, b"PACKDATA1"),
                (Channel::Progress, b"compressing\n"),
                (Channel::Data, b"PACKDATA2"),
            ],
        )
        .await;

        let (tx, mut rx) = unbounded_channel();
        let mut demuxer = Demuxer::new(PktLineReader::new(&buf[..]), Some(tx));

        let mut data = Vec::new();
        while let Some(chunk) = demuxer.read_chunk().await.unwrap() {
            data.extend_from_slice(&chunk);
        }
        assert_eq!(&data, b"PACKDATA1PACKDATA2");

        let mut progress = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            progress.push(msg);
        }
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].as_ref(), b"counting objects\n");
        assert_eq!(progress[1].as_ref(), b"compressing\n");
    }

    #[tokio::test]
    async fn test_demux_error_channel() {
        let buf = mux_frames(SidebandKind::Sideband, &[(Channel::Error, b"fatal: boom\n")]).await;

        let mut demuxer = Demuxer::new(PktLineReader::new(&buf[..]), None);
        let err = demuxer.read_chunk().await.unwrap_err();
        match err {
            Error::Sideband(msg) => assert_eq!(msg, "fatal: boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_demux_unknown_channel() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_data(vec![9u8, b'x']).await.unwrap();
            writer.write_flush().await.unwrap();
        }
        let mut demuxer = Demuxer::new(PktLineReader::new(&buf[..]), None);
        assert!(matches!(
            demuxer.read_chunk().await.unwrap_err(),
            Error::UnknownChannel(9)
        ));
    }

    #[tokio::test]
    async fn test_muxer_splits_oversize_data() {
        let big = vec![b'a'; 2500];
        let buf = mux_frames(SidebandKind::Sideband, &[(Channel::Data, &big)]).await;

        let mut reader = PktLineReader::new(&buf[..]);
        let mut frames = 0;
        let mut total = 0;
        loop {
            match reader.read_pkt().await.unwrap().unwrap() {
                PktLine::Flush => break,
                PktLine::Data(d) => {
                    assert_eq!(d[0], CHANNEL_DATA);
                    assert!(d.len() - 1 <= SidebandKind::Sideband.max_data_len());
                    frames += 1;
                    total += d.len() - 1;
                }
                other => panic!("unexpected packet: {:?}", other),
            }
        }
        assert_eq!(frames, 3);
        assert_eq!(total, 2500);
    }

    #[tokio::test]
    async fn test_demux_reconstruction_matches_raw() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let buf = mux_frames(SidebandKind::Sideband64k, &[(Channel::Data, &payload)]).await;
        let mut demuxed = Vec::new();
        let mut demuxer = Demuxer::new(PktLineReader::new(&buf[..]), None);
        while let Some(chunk) = demuxer.read_chunk().await.unwrap() {
            demuxed.extend_from_slice(&chunk);
        }

        let mut raw = Vec::new();
        let mut stream = PackStream::raw(&payload[..]);
        while let Some(chunk) = stream.read_chunk().await.unwrap() {
            raw.extend_from_slice(&chunk);
        }

        assert_eq!(demuxed, raw);
        assert_eq!(demuxed, payload);
    }
}
