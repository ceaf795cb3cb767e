use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::commands::Command;
use crate::frame::CRLF;
use crate::Error;

/// Encodes commands as RESP arrays of bulk strings:
/// `*<argc>\r\n` followed by `$<len>\r\n<arg>\r\n` for the name words and every argument.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl CommandCodec {
    fn put_bulk(dst: &mut BytesMut, data: &[u8]) {
        let length = data.len().to_string();
        dst.reserve(1 + length.len() + CRLF.len() + data.len() + CRLF.len());
        dst.put_u8(b'$');
        dst.put_slice(length.as_bytes());
        dst.put_slice(CRLF);
        dst.put_slice(data);
        dst.put_slice(CRLF);
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = Error;

    fn encode(&mut self, cmd: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(b'*');
        dst.put_slice(cmd.element_count().to_string().as_bytes());
        dst.put_slice(CRLF);

        for word in cmd.name().words() {
            CommandCodec::put_bulk(dst, word.as_bytes());
        }
        for arg in cmd.args() {
            CommandCodec::put_bulk(dst, arg);
        }

        Ok(())
    }
}
