//! Incremental decoding of replies from a [`Transport`].
//!
//! Nested arrays are decoded with an explicit stack of cursors, so arbitrarily deep or long
//! arrays never grow the call stack.

use std::str;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::frame::{DataType, Frame, CRLF};
use crate::transport::Transport;
use crate::Error;

/// Upper bound on pre-allocated array capacity. Longer arrays still decode, they just grow.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// An array still waiting for some of its elements.
struct Cursor {
    remaining: usize,
    items: Vec<Frame>,
}

/// What reading a single tag produced.
enum Step {
    Complete(Frame),
    OpenArray(usize),
}

/// Reads one complete reply from the stream.
pub async fn read_frame<R>(transport: &mut Transport<R>) -> Result<Frame, Error>
where
    R: AsyncRead + Unpin,
{
    let mut stack: Vec<Cursor> = Vec::new();

    'read: loop {
        let mut frame = match read_step(transport, !stack.is_empty()).await? {
            Step::OpenArray(len) => {
                stack.push(Cursor {
                    remaining: len,
                    items: Vec::with_capacity(len.min(MAX_PREALLOCATED_ITEMS)),
                });
                continue;
            }
            Step::Complete(frame) => frame,
        };

        // Fold the finished frame into its parents, closing every array it completes.
        while let Some(mut cursor) = stack.pop() {
            cursor.items.push(frame);
            cursor.remaining -= 1;
            if cursor.remaining > 0 {
                stack.push(cursor);
                continue 'read;
            }
            frame = Frame::Array(cursor.items);
        }

        return Ok(frame);
    }
}

async fn read_step<R>(transport: &mut Transport<R>, nested: bool) -> Result<Step, Error>
where
    R: AsyncRead + Unpin,
{
    let tag = match transport.read_byte().await {
        Ok(tag) => tag,
        // The stream may only end between replies.
        Err(Error::ConnectionClosed) if nested => {
            return Err(Error::Protocol(
                "stream ended in the middle of an array".to_string(),
            ))
        }
        Err(e) => return Err(e),
    };

    match DataType::try_from(tag)? {
        DataType::SimpleString => {
            let line = read_line(transport).await?;
            Ok(Step::Complete(Frame::Simple(String::from_utf8(line.to_vec())?)))
        }
        DataType::SimpleError => {
            let line = read_line(transport).await?;
            Ok(Step::Complete(Frame::Error(String::from_utf8(line.to_vec())?)))
        }
        DataType::Integer => {
            let line = read_line(transport).await?;
            Ok(Step::Complete(Frame::Integer(parse_integer(&line)?)))
        }
        // $<length>\r\n<data>\r\n
        DataType::BulkString => {
            let line = read_line(transport).await?;
            let len = match parse_length(&line)? {
                None => return Ok(Step::Complete(Frame::Null)),
                Some(len) => len,
            };

            if len > transport.max_bulk_size() {
                return Err(Error::Protocol(format!(
                    "bulk length {} exceeds limit",
                    len
                )));
            }

            let data = transport.read_exact(len + CRLF.len()).await?;
            if &data[len..] != CRLF {
                return Err(Error::Protocol(format!(
                    "bulk payload does not match declared length {}",
                    len
                )));
            }

            Ok(Step::Complete(Frame::Bulk(data.slice(..len))))
        }
        // *<number-of-elements>\r\n<element-1>...<element-n>
        DataType::Array => {
            let line = read_line(transport).await?;
            match parse_length(&line)? {
                None => Ok(Step::Complete(Frame::NullArray)),
                Some(0) => Ok(Step::Complete(Frame::Array(vec![]))),
                Some(len) => Ok(Step::OpenArray(len)),
            }
        }
    }
}

async fn read_line<R>(transport: &mut Transport<R>) -> Result<Bytes, Error>
where
    R: AsyncRead + Unpin,
{
    transport.read_until(CRLF).await
}

fn parse_integer(line: &[u8]) -> Result<i64, Error> {
    str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::MalformedResponse(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

/// Parses a bulk or array length line. `-1` is the null marker.
fn parse_length(line: &[u8]) -> Result<Option<usize>, Error> {
    match parse_integer(line)? {
        -1 => Ok(None),
        len if len < 0 => Err(Error::MalformedResponse(format!("invalid length {}", len))),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| Error::Protocol(format!("length {} does not fit in memory", len))),
    }
}
