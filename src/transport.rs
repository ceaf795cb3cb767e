use std::env;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::Error;

/// The read side of a session's byte stream.
///
/// Reads are buffered: bytes received past the current reply stay in the buffer for the next
/// read. Only one read may be in progress at a time, which `&mut self` enforces.
pub struct Transport<R> {
    reader: BufReader<R>,
    max_bulk_size: usize,
}

/// Default limit on a single bulk string, the same as the server's `proto-max-bulk-len`.
pub const DEFAULT_MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

impl<R: AsyncRead + Unpin> Transport<R> {
    /// Wraps `reader`, taking the bulk string limit from `MAX_BULK_SIZE` when it is set.
    pub fn new(reader: R) -> Transport<R> {
        let max_bulk_size = env::var("MAX_BULK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BULK_SIZE);

        Transport::with_max_bulk_size(reader, max_bulk_size)
    }

    pub fn with_max_bulk_size(reader: R, max_bulk_size: usize) -> Transport<R> {
        Transport {
            // Allocate the buffer with 4kb of capacity.
            reader: BufReader::with_capacity(4096, reader),
            max_bulk_size,
        }
    }

    /// Largest bulk string, in bytes, the decoder accepts.
    pub fn max_bulk_size(&self) -> usize {
        self.max_bulk_size
    }

    /// Reads a single byte. Returns `ConnectionClosed` if the stream ended.
    pub async fn read_byte(&mut self) -> Result<u8, Error> {
        match self.reader.read_u8().await {
            Ok(byte) => Ok(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads until `delimiter` and returns the bytes before it. The delimiter is consumed.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes, Error> {
        let last = match delimiter.last() {
            Some(last) => *last,
            None => return Ok(Bytes::new()),
        };

        let mut line = Vec::new();
        loop {
            let n = self.reader.read_until(last, &mut line).await?;
            if n == 0 {
                return Err(Error::Protocol(
                    "stream ended before the end of the line".to_string(),
                ));
            }
            if line.ends_with(delimiter) {
                line.truncate(line.len() - delimiter.len());
                return Ok(Bytes::from(line));
            }
        }
    }

    /// Reads exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes, Error> {
        let mut buf = BytesMut::zeroed(n);
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(buf.freeze()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::Protocol(
                format!("stream ended before {} declared bytes were read", n),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits until bytes are buffered or the stream ends, without consuming anything. Returns
    /// `false` at end of stream.
    ///
    /// Cancel safe: bytes received while waiting stay buffered.
    pub async fn wait_readable(&mut self) -> Result<bool, Error> {
        let buf = self.reader.fill_buf().await?;
        Ok(!buf.is_empty())
    }
}
