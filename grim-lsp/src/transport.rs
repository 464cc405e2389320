//! Content-Length framing over blocking byte streams.
//!
//! A message is `Content-Length: N\r\n` followed by any other headers, a
//! blank line, and exactly `N` body bytes. Header parsing is
//! case-insensitive and tolerates a missing carriage return.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("end of stream")]
    EndOfStream,
    #[error("read failed: {0}")]
    ReadFailure(String),
    #[error("write failed: {0}")]
    WriteFailure(String),
}

/// Read one framed message body.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|err| TransportError::ReadFailure(err.to_string()))?;
        if read == 0 {
            // a clean close between messages is end-of-stream; mid-header it
            // is a broken read
            return Err(if saw_header {
                TransportError::ReadFailure("stream closed inside message headers".to_string())
            } else {
                TransportError::EndOfStream
            });
        }

        let header = line.trim_end_matches(['\n', '\r']).trim();
        if header.is_empty() {
            break;
        }
        saw_header = true;

        if let Some((key, value)) = header.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse().map_err(|_| {
                    TransportError::ProtocolError(format!("invalid content length {:?}", value))
                })?;
                content_length = Some(parsed);
            }
        }
    }

    let len = content_length.ok_or(TransportError::MissingContentLength)?;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|err| TransportError::ReadFailure(err.to_string()))?;
    Ok(body)
}

/// Frame and write one message, flushing afterwards. The write loop keeps
/// going until every byte is delivered; a zero-byte write is a failure.
pub fn write_message<W: Write>(writer: &mut W, body: &[u8]) -> Result<(), TransportError> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    write_all(writer, header.as_bytes())?;
    write_all(writer, body)?;
    writer
        .flush()
        .map_err(|err| TransportError::WriteFailure(err.to_string()))
}

fn write_all<W: Write>(writer: &mut W, mut buf: &[u8]) -> Result<(), TransportError> {
    while !buf.is_empty() {
        match writer.write(buf) {
            Ok(0) => {
                return Err(TransportError::WriteFailure(
                    "wrote zero bytes".to_string(),
                ))
            }
            Ok(written) => buf = &buf[written..],
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(TransportError::WriteFailure(err.to_string())),
        }
    }
    Ok(())
}

/// The reading side of a transport. The client shares it between `poll()`
/// and its reader thread.
pub trait ReadHalf: Send {
    fn read_message(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// The writing side of a transport. A whole frame is written under one
/// lock, so concurrent requests never interleave.
pub trait WriteHalf: Send {
    fn write_message(&mut self, body: &[u8]) -> Result<(), TransportError>;
}

pub struct StdioReader {
    inner: BufReader<ChildStdout>,
}

impl ReadHalf for StdioReader {
    fn read_message(&mut self) -> Result<Vec<u8>, TransportError> {
        read_message(&mut self.inner)
    }
}

pub struct StdioWriter {
    inner: ChildStdin,
}

impl WriteHalf for StdioWriter {
    fn write_message(&mut self, body: &[u8]) -> Result<(), TransportError> {
        write_message(&mut self.inner, body)
    }
}

/// Take the piped stdio of a spawned language server as a transport pair.
pub fn split_child(child: &mut Child) -> Result<(StdioReader, StdioWriter), TransportError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::ReadFailure("child stdout not piped".to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::WriteFailure("child stdin not piped".to_string()))?;
    Ok((
        StdioReader {
            inner: BufReader::new(stdout),
        },
        StdioWriter { inner: stdin },
    ))
}

/// In-memory transport for tests: framed server messages are pushed into
/// the incoming queue, everything the client writes lands in an inspectable
/// buffer. An empty incoming queue reads as end-of-stream.
#[derive(Clone, Default)]
pub struct MockTransport {
    incoming: Arc<Mutex<VecDeque<u8>>>,
    outgoing: Arc<Mutex<Vec<u8>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message body, framed, for the client to read.
    pub fn push_server_message(&self, body: &[u8]) {
        let mut framed = Vec::with_capacity(body.len() + 32);
        write_message(&mut framed, body).expect("writing to a Vec cannot fail");
        self.incoming.lock().extend(framed);
    }

    /// Everything the client has written so far, raw frames included.
    pub fn written(&self) -> Vec<u8> {
        self.outgoing.lock().clone()
    }

    /// Framed message bodies the client has written, in order.
    pub fn written_bodies(&self) -> Vec<Vec<u8>> {
        let raw = self.written();
        let mut reader = BufReader::new(raw.as_slice());
        let mut bodies = Vec::new();
        while let Ok(body) = read_message(&mut reader) {
            bodies.push(body);
        }
        bodies
    }

    pub fn split(&self) -> (Box<dyn ReadHalf>, Box<dyn WriteHalf>) {
        (
            Box::new(MockReader {
                inner: BufReader::new(QueueReader {
                    queue: self.incoming.clone(),
                }),
            }),
            Box::new(MockWriter {
                sink: self.outgoing.clone(),
            }),
        )
    }
}

struct QueueReader {
    queue: Arc<Mutex<VecDeque<u8>>>,
}

impl Read for QueueReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut queue = self.queue.lock();
        let n = buf.len().min(queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().expect("length checked above");
        }
        Ok(n)
    }
}

struct MockReader {
    inner: BufReader<QueueReader>,
}

impl ReadHalf for MockReader {
    fn read_message(&mut self) -> Result<Vec<u8>, TransportError> {
        read_message(&mut self.inner)
    }
}

struct MockWriter {
    sink: Arc<Mutex<Vec<u8>>>,
}

impl WriteHalf for MockWriter {
    fn write_message(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let mut sink = self.sink.lock();
        write_message(&mut *sink, body)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A reader that hands out at most `chunk` bytes per read call, to
    /// exercise partial reads.
    struct ChunkedReader<'a> {
        data: &'a [u8],
        pos: usize,
        chunk: usize,
    }

    impl Read for ChunkedReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf
                .len()
                .min(self.chunk)
                .min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_round_trip_under_any_chunking() {
        let body = br#"{"jsonrpc":"2.0","method":"initialize","id":1}"#;
        let mut framed = Vec::new();
        write_message(&mut framed, body).unwrap();

        for chunk in 1..framed.len() + 1 {
            let mut reader = BufReader::new(ChunkedReader {
                data: &framed,
                pos: 0,
                chunk,
            });
            let read = read_message(&mut reader).unwrap();
            assert_eq!(read, body, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_header_is_case_insensitive_and_cr_optional() {
        let mut data = b"content-length: 2\n\nok".to_vec();
        let mut reader = BufReader::new(data.as_slice());
        assert_eq!(read_message(&mut reader).unwrap(), b"ok");

        data = b"CONTENT-LENGTH:  2 \r\nX-Other: ignored\r\n\r\nhi".to_vec();
        let mut reader = BufReader::new(data.as_slice());
        assert_eq!(read_message(&mut reader).unwrap(), b"hi");
    }

    #[test]
    fn test_missing_content_length() {
        let data = b"X-Other: 1\r\n\r\nbody";
        let mut reader = BufReader::new(data.as_slice());
        assert_eq!(
            read_message(&mut reader),
            Err(TransportError::MissingContentLength)
        );
    }

    #[test]
    fn test_unparsable_length_is_protocol_error() {
        let data = b"Content-Length: nope\r\n\r\n";
        let mut reader = BufReader::new(data.as_slice());
        assert!(matches!(
            read_message(&mut reader),
            Err(TransportError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_clean_eof_is_end_of_stream() {
        let mut reader = BufReader::new(&b""[..]);
        assert_eq!(read_message(&mut reader), Err(TransportError::EndOfStream));
    }

    #[test]
    fn test_eof_inside_headers_is_read_failure() {
        let data = b"Content-Length: 5\r\n";
        let mut reader = BufReader::new(data.as_slice());
        assert!(matches!(
            read_message(&mut reader),
            Err(TransportError::ReadFailure(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_read_failure() {
        let data = b"Content-Length: 10\r\n\r\nshort";
        let mut reader = BufReader::new(data.as_slice());
        assert!(matches!(
            read_message(&mut reader),
            Err(TransportError::ReadFailure(_))
        ));
    }

    #[test]
    fn test_write_message_frames() {
        let mut out = Vec::new();
        write_message(&mut out, b"{}").unwrap();
        assert_eq!(out, b"Content-Length: 2\r\n\r\n{}");
    }

    #[test]
    fn test_zero_byte_write_is_failure() {
        struct Stuck;
        impl Write for Stuck {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        assert!(matches!(
            write_message(&mut Stuck, b"{}"),
            Err(TransportError::WriteFailure(_))
        ));
    }

    #[test]
    fn test_mock_transport_round_trip() {
        let mock = MockTransport::new();
        let (mut reader, mut writer) = mock.split();

        mock.push_server_message(b"{\"id\":1}");
        assert_eq!(reader.read_message().unwrap(), b"{\"id\":1}");
        assert_eq!(reader.read_message(), Err(TransportError::EndOfStream));

        writer.write_message(b"{\"id\":2}").unwrap();
        assert_eq!(mock.written_bodies(), vec![b"{\"id\":2}".to_vec()]);
    }
}
