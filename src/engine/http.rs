// src/engine/http.rs

//! Minimal blocking HTTP/1.1 client for the engine API
//!
//! Every request opens its own connection and sends `Connection: close`, so a
//! response body is always the rest of the stream unless the engine frames it
//! with `Content-Length` or chunked transfer encoding. Request bodies can be
//! streamed from any reader using chunked encoding.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, Read, Write};

/// Chunk size used when pumping a streamed request body
const UPLOAD_CHUNK: usize = 32 * 1024;

/// Upper bound on an error body kept for the message
const ERROR_BODY_LIMIT: u64 = 64 * 1024;

/// Request payload
pub enum Body<'a> {
    Empty,
    /// JSON document sent with a `Content-Length`
    Json(Vec<u8>),
    /// Streamed with chunked transfer encoding
    Stream {
        content_type: &'a str,
        reader: &'a mut dyn Read,
    },
}

/// Write a request line, headers and body to `stream`
pub fn send_request<W: Write + ?Sized>(
    stream: &mut W,
    method: &str,
    path: &str,
    body: Body<'_>,
) -> Result<()> {
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: docker\r\nUser-Agent: fry/{}\r\nConnection: close\r\n",
        method,
        path,
        env!("CARGO_PKG_VERSION")
    );

    match body {
        Body::Empty => {
            head.push_str("Content-Length: 0\r\n\r\n");
            stream.write_all(head.as_bytes())?;
        }
        Body::Json(data) => {
            head.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                data.len()
            ));
            stream.write_all(head.as_bytes())?;
            stream.write_all(&data)?;
        }
        Body::Stream {
            content_type,
            reader,
        } => {
            head.push_str(&format!(
                "Content-Type: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
                content_type
            ));
            stream.write_all(head.as_bytes())?;
            write_chunked(stream, reader)?;
        }
    }

    stream.flush()?;
    Ok(())
}

/// Copy `reader` to `stream` as a chunked body, ending with the zero chunk
pub fn write_chunked<W: Write + ?Sized, R: Read + ?Sized>(
    stream: &mut W,
    reader: &mut R,
) -> Result<u64> {
    let mut buf = vec![0u8; UPLOAD_CHUNK];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        write!(stream, "{:x}\r\n", n)?;
        stream.write_all(&buf[..n])?;
        stream.write_all(b"\r\n")?;
        total += n as u64;
    }
    stream.write_all(b"0\r\n\r\n")?;
    Ok(total)
}

/// Parsed response head plus a reader over the framed body
pub struct Response<R> {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    body: BodyReader<R>,
}

impl<R: Read> Response<R> {
    /// Read the status line and headers from `stream`
    pub fn read_from(stream: R) -> Result<Self> {
        let mut reader = BufReader::new(stream);

        let mut status_line = String::new();
        if reader.read_line(&mut status_line)? == 0 {
            return Err(Error::engine("read response", "empty response from engine"));
        }
        let status = parse_status_line(&status_line)?;

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Err(Error::engine(
                    "read response",
                    "connection closed inside response headers",
                ));
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_lowercase(), value.trim().to_string()));
            }
        }

        let body = BodyReader::new(reader, &headers)?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// First header value with the given (lowercase) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The framed body
    pub fn body(&mut self) -> &mut BodyReader<R> {
        &mut self.body
    }

    pub fn text(mut self) -> Result<String> {
        let mut text = String::new();
        self.body.read_to_string(&mut text)?;
        Ok(text)
    }

    pub fn json<T: DeserializeOwned>(mut self) -> Result<T> {
        let mut data = Vec::new();
        self.body.read_to_end(&mut data)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Turn a non-2xx response into an engine error for `operation`
    ///
    /// The engine reports errors as `{"message": "..."}`; anything else is
    /// kept as text.
    pub fn into_error(self, operation: &str) -> Error {
        let status = self.status;
        let mut data = Vec::new();
        let _ = self.body.take(ERROR_BODY_LIMIT).read_to_end(&mut data);
        Error::Engine {
            operation: operation.to_string(),
            status: Some(status),
            message: error_message(&data),
        }
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    message: String,
}

fn error_message(data: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(data) {
        Ok(body) => body.message,
        Err(_) => String::from_utf8_lossy(data).trim().to_string(),
    }
}

fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(Error::engine(
            "read response",
            format!("unexpected status line: {:?}", line.trim_end()),
        ));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| {
            Error::engine(
                "read response",
                format!("invalid status line: {:?}", line.trim_end()),
            )
        })
}

/// Response body with its transfer framing removed
pub enum BodyReader<R> {
    Chunked(ChunkedReader<BufReader<R>>),
    Sized(io::Take<BufReader<R>>),
    /// Raw stream up to connection close (attach streams)
    UntilClose(BufReader<R>),
}

impl<R: Read> BodyReader<R> {
    fn new(reader: BufReader<R>, headers: &[(String, String)]) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        if find("transfer-encoding").is_some_and(|v| v.to_ascii_lowercase().contains("chunked")) {
            return Ok(Self::Chunked(ChunkedReader::new(reader)));
        }
        if let Some(length) = find("content-length") {
            let length: u64 = length.parse().map_err(|_| {
                Error::engine("read response", format!("invalid content-length {:?}", length))
            })?;
            return Ok(Self::Sized(reader.take(length)));
        }
        Ok(Self::UntilClose(reader))
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Chunked(reader) => reader.read(buf),
            Self::Sized(reader) => reader.read(buf),
            Self::UntilClose(reader) => reader.read(buf),
        }
    }
}

/// Decoder for `Transfer-Encoding: chunked`
pub struct ChunkedReader<R> {
    inner: R,
    /// Bytes left in the current chunk
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn read_size_line(&mut self) -> io::Result<u64> {
        let mut line = String::new();
        if self.inner.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before chunk size",
            ));
        }
        let size = line.trim_end().split(';').next().unwrap_or_default().trim();
        u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size {:?}", size),
            )
        })
    }

    fn expect_crlf(&mut self) -> io::Result<()> {
        let mut crlf = [0u8; 2];
        self.inner.read_exact(&mut crlf)?;
        if &crlf != b"\r\n" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing CRLF after chunk data",
            ));
        }
        Ok(())
    }

    fn skip_trailers(&mut self) -> io::Result<()> {
        loop {
            let mut line = String::new();
            if self.inner.read_line(&mut line)? == 0 || line.trim_end().is_empty() {
                return Ok(());
            }
        }
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            let size = self.read_size_line()?;
            if size == 0 {
                self.skip_trailers()?;
                self.done = true;
                return Ok(0);
            }
            self.remaining = size;
        }

        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a chunk",
            ));
        }
        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.expect_crlf()?;
        }
        Ok(n)
    }
}
