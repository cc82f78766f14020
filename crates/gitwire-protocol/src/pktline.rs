use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const FLUSH_PKT: &[u8; 4] = b"0000";
pub const DELIM_PKT: &[u8; 4] = b"0001";
pub const RESPONSE_END_PKT: &[u8; 4] = b"0002";

pub const MAX_PACKET_LEN: usize = 65520;
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Bytes),
    Flush,
    Delim,
    ResponseEnd,
}

impl PktLine {
    pub fn data(data: impl Into<Bytes>) -> Self {
        PktLine::Data(data.into())
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, PktLine::Flush)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, PktLine::Data(_))
    }

    pub fn as_data(&self) -> Option<&Bytes> {
        match self {
            PktLine::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            PktLine::Flush => Ok(Bytes::from_static(FLUSH_PKT)),
            PktLine::Delim => Ok(Bytes::from_static(DELIM_PKT)),
            PktLine::ResponseEnd => Ok(Bytes::from_static(RESPONSE_END_PKT)),
            PktLine::Data(data) => {
                if data.len() > MAX_PAYLOAD_LEN {
                    return Err(Error::PayloadTooLarge {
                        size: data.len(),
                        limit: MAX_PAYLOAD_LEN,
                    });
                }
                let len = data.len() + 4;
                let mut buf = BytesMut::with_capacity(len);
                buf.put_slice(format!("{:04x}", len).as_bytes());
                buf.put_slice(data);
                Ok(buf.freeze())
            }
        }
    }
}

pub struct PktLineReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> PktLineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Access to the underlying stream, for the raw bytes that follow the
    /// pkt-line section (packfile bodies).
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads one packet. Returns `None` on a clean EOF at a packet boundary.
    pub async fn read_pkt(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if &len_buf == FLUSH_PKT {
            return Ok(Some(PktLine::Flush));
        }
        if &len_buf == DELIM_PKT {
            return Ok(Some(PktLine::Delim));
        }
        if &len_buf == RESPONSE_END_PKT {
            return Ok(Some(PktLine::ResponseEnd));
        }

        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| Error::InvalidLength(format!("{:?}", len_buf)))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| Error::InvalidLength(len_str.to_string()))?;

        if len < 4 {
            return Err(Error::InvalidLength(format!("length too small: {}", len)));
        }
        if len > MAX_PACKET_LEN {
            return Err(Error::InvalidLength(format!("length too large: {}", len)));
        }

        let mut data = vec![0u8; len - 4];
        self.reader
            .read_exact(&mut data)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEndOfStream,
                _ => e.into(),
            })?;

        Ok(Some(PktLine::Data(Bytes::from(data))))
    }

    /// Collects data payloads until the next flush packet. EOF before the
    /// flush is an error.
    pub async fn read_until_flush(&mut self) -> Result<Vec<Bytes>> {
        let mut payloads = Vec::new();
        loop {
            match self.read_pkt().await? {
                Some(PktLine::Flush) => return Ok(payloads),
                Some(PktLine::Data(d)) => payloads.push(d),
                Some(other) => {
                    return Err(Error::UnexpectedPacket(format!("{:?}", other)));
                }
                None => return Err(Error::UnexpectedEndOfStream),
            }
        }
    }
}

pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PktLineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub async fn write_pkt(&mut self, pkt: &PktLine) -> Result<()> {
        let encoded = pkt.encode()?;
        self.writer.write_all(&encoded).await?;
        Ok(())
    }

    pub async fn write_data(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.write_pkt(&PktLine::Data(data.into())).await
    }

    pub async fn write_flush(&mut self) -> Result<()> {
        self.write_pkt(&PktLine::Flush).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Half-closes the stream, signalling the end of the request.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_flush() {
        assert_eq!(PktLine::Flush.encode().unwrap().as_ref(), b"0000");
    }

    #[test]
    fn test_encode_delim() {
        assert_eq!(PktLine::Delim.encode().unwrap().as_ref(), b"0001");
    }

    #[test]
    fn test_encode_response_end() {
        assert_eq!(PktLine::ResponseEnd.encode().unwrap().as_ref(), b"0002");
    }

    #[test]
    fn test_encode_data() {
        let encoded = PktLine::data("hello").encode().unwrap();
        assert_eq!(&encoded[..4], b"0009");
        assert_eq!(&encoded[4..], b"hello");
    }

    #[test]
    fn test_encode_empty_data() {
        let encoded = PktLine::data("").encode().unwrap();
        assert_eq!(encoded.as_ref(), b"0004");
    }

    #[test]
    fn test_encode_max_payload() {
        let payload = vec![b'x'; MAX_PAYLOAD_LEN];
        let encoded = PktLine::data(payload).encode().unwrap();
        assert_eq!(encoded.len(), MAX_PACKET_LEN);
        assert_eq!(&encoded[..4], b"fff0");
    }

    #[test]
    fn test_encode_oversize_payload_fails() {
        let payload = vec![b'x'; MAX_PAYLOAD_LEN + 1];
        let err = PktLine::data(payload).encode().unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_read_data() {
        let mut reader = PktLineReader::new(&b"0009hello"[..]);
        let pkt = reader.read_pkt().await.unwrap().unwrap();
        assert_eq!(pkt, PktLine::data("hello"));
    }

    #[tokio::test]
    async fn test_read_distinguished() {
        let mut reader = PktLineReader::new(&b"000000010002"[..]);
        assert_eq!(reader.read_pkt().await.unwrap(), Some(PktLine::Flush));
        assert_eq!(reader.read_pkt().await.unwrap(), Some(PktLine::Delim));
        assert_eq!(reader.read_pkt().await.unwrap(), Some(PktLine::ResponseEnd));
        assert_eq!(reader.read_pkt().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_rejects_length_three() {
        let mut reader = PktLineReader::new(&b"0003"[..]);
        assert!(reader.read_pkt().await.is_err());
    }

    #[tokio::test]
    async fn test_read_rejects_oversize_length() {
        // fff1 = 65521, one past the largest legal packet.
        let mut reader = PktLineReader::new(&b"fff1"[..]);
        assert!(matches!(
            reader.read_pkt().await.unwrap_err(),
            Error::InvalidLength(_)
        ));
    }

    #[tokio::test]
    async fn test_read_rejects_non_hex_length() {
        let mut reader = PktLineReader::new(&b"zzzz"[..]);
        assert!(reader.read_pkt().await.is_err());
    }

    #[tokio::test]
    async fn test_read_rejects_truncated_payload() {
        let mut reader = PktLineReader::new(&b"0009hel"[..]);
        let err = reader.read_pkt().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn test_read_eof() {
        let mut reader = PktLineReader::new(&b""[..]);
        assert_eq!(reader.read_pkt().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let payloads: Vec<&[u8]> = vec![b"a", b"hello world\n", &[0u8, 1, 2, 255]];

        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            for p in &payloads {
                writer.write_data(p.to_vec()).await.unwrap();
            }
            writer.write_flush().await.unwrap();
        }

        let mut reader = PktLineReader::new(&buf[..]);
        let decoded = reader.read_until_flush().await.unwrap();
        assert_eq!(decoded.len(), payloads.len());
        for (d, p) in decoded.iter().zip(&payloads) {
            assert_eq!(d.as_ref(), *p);
        }
    }

    #[tokio::test]
    async fn test_read_until_flush_requires_flush() {
        let mut reader = PktLineReader::new(&b"0009hello"[..]);
        let err = reader.read_until_flush().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn test_writer_raw_access() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_data("head").await.unwrap();
            use tokio::io::AsyncWriteExt;
            writer.get_mut().write_all(b"RAWBYTES").await.unwrap();
        }
        assert_eq!(&buf, b"0008headRAWBYTES");
    }
}
