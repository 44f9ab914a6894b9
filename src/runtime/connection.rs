//! Connection to the editor host.
//!
//! The TCP stream is split once: the read half belongs to the dispatcher,
//! the write half sits behind a lock shared by everyone who sends frames.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Initial capacity of the line buffer.
const LINE_CAPACITY: usize = 4 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connect to the peer.
///
/// There is exactly one attempt; the caller treats failure as fatal.
pub async fn open(
    address: &str,
    keepalive: Option<Duration>,
) -> io::Result<(FrameReader, FrameWriter)> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;

    if let Some(time) = keepalive {
        SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(time))?;
        debug!(?time, "TCP keepalive enabled");
    }

    let (reader, writer) = stream.into_split();
    Ok(split(reader, writer))
}

/// Build a reader/writer pair from arbitrary stream halves.
pub fn split<R, W>(reader: R, writer: W) -> (FrameReader, FrameWriter)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let reader = FrameReader {
        inner: BufReader::new(Box::new(reader)),
        line: Vec::with_capacity(LINE_CAPACITY),
    };
    let writer = FrameWriter {
        inner: Arc::new(Mutex::new(Box::new(writer))),
    };
    (reader, writer)
}

/// Outcome of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One line, without its terminator.
    Line(String),
    /// A line that is not valid UTF-8, decoded lossily for logging.
    Malformed(String),
    /// The peer closed its side.
    Eof,
}

/// Line-oriented read cursor over the peer stream.
pub struct FrameReader {
    inner: BufReader<BoxedReader>,
    line: Vec<u8>,
}

impl FrameReader {
    /// Read the next newline-terminated line.
    ///
    /// Invalid UTF-8 is reported as [`ReadOutcome::Malformed`] rather than an
    /// error, so only transport failures surface as `Err`. No retry happens
    /// here.
    pub async fn read_line(&mut self) -> io::Result<ReadOutcome> {
        self.line.clear();

        let n = self.inner.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }
        trace!(bytes = n, "Read line");

        let end = self
            .line
            .iter()
            .rposition(|&b| b != b'\n' && b != b'\r')
            .map_or(0, |i| i + 1);
        let line = &self.line[..end];

        match std::str::from_utf8(line) {
            Ok(text) => Ok(ReadOutcome::Line(text.to_string())),
            Err(_) => Ok(ReadOutcome::Malformed(
                String::from_utf8_lossy(line).into_owned(),
            )),
        }
    }
}

/// Shared, cloneable write handle.
///
/// Each call to [`FrameWriter::write_frame`] holds the lock until the whole
/// frame is written and flushed, so concurrent writers never interleave.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl FrameWriter {
    /// Write `text` followed by a newline as one frame.
    pub async fn write_frame(&self, text: &str) -> io::Result<()> {
        let mut frame = BytesMut::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.extend_from_slice(b"\n");

        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;

        trace!(bytes = frame.len(), "Wrote frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, encode, Message, Payload};
    use tokio::io::{AsyncWriteExt, BufReader as PeerReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_lines_and_eof() {
        let (client, mut peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let (mut reader, _writer) = split(read, write);

        peer.write_all(b"[1,\"a\",{}]\r\n[2,\"b\",{}]\n").await.unwrap();
        drop(peer);

        assert_eq!(
            reader.read_line().await.unwrap(),
            ReadOutcome::Line("[1,\"a\",{}]".to_string())
        );
        assert_eq!(
            reader.read_line().await.unwrap(),
            ReadOutcome::Line("[2,\"b\",{}]".to_string())
        );
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Eof);
    }

    #[tokio::test]
    async fn test_unterminated_last_line() {
        let (client, mut peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let (mut reader, _writer) = split(read, write);

        peer.write_all(b"partial").await.unwrap();
        drop(peer);

        assert_eq!(
            reader.read_line().await.unwrap(),
            ReadOutcome::Line("partial".to_string())
        );
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Eof);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed() {
        let (client, mut peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let (mut reader, _writer) = split(read, write);

        peer.write_all(b"ok\xff\xfe\r\n[1,\"a\",{}]\n").await.unwrap();

        assert_eq!(
            reader.read_line().await.unwrap(),
            ReadOutcome::Malformed("ok\u{fffd}\u{fffd}".to_string())
        );
        assert_eq!(
            reader.read_line().await.unwrap(),
            ReadOutcome::Line("[1,\"a\",{}]".to_string())
        );
    }

    #[tokio::test]
    async fn test_concurrent_writes_do_not_interleave() {
        // Small pipe so every frame needs several partial writes.
        let (client, peer) = tokio::io::duplex(256);
        let (read, write) = tokio::io::split(client);
        let (_reader, writer) = split(read, write);

        const WRITERS: i64 = 16;
        let mut handles = Vec::new();
        for id in 0..WRITERS {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let code = format!("{id}").repeat(2048);
                let message = Message::new(id, "editor.eval.rust.result", Payload::result(code, None));
                writer.write_frame(&encode(&message).unwrap()).await.unwrap();
            }));
        }

        let mut lines = PeerReader::new(peer).lines();
        let mut seen = Vec::new();
        for _ in 0..WRITERS {
            let line = lines.next_line().await.unwrap().unwrap();
            let message = decode(&line).unwrap();
            let expected = format!("{}", message.id).repeat(2048);
            assert_eq!(message.payload.result.as_deref(), Some(expected.as_str()));
            seen.push(message.id);
        }

        for handle in handles {
            handle.await.unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..WRITERS).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_open_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let (connected, accepted) = tokio::join!(
            open(&address, Some(Duration::from_secs(30))),
            listener.accept()
        );
        let (mut reader, writer) = connected.unwrap();
        let (mut peer, _) = accepted.unwrap();

        writer.write_frame("[1,\"x\",{}]").await.unwrap();
        {
            let mut lines = PeerReader::new(&mut peer).lines();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "[1,\"x\",{}]");
        }

        peer.write_all(b"[2,\"y\",{}]\n").await.unwrap();
        assert_eq!(
            reader.read_line().await.unwrap(),
            ReadOutcome::Line("[2,\"y\",{}]".to_string())
        );
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(open(&address, None).await.is_err());
    }
}
