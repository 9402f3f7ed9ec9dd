use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Identifies RakNet offline (pre-connection) messages. It is embedded in every offline message
///  and checked before any further processing.
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated data: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("encapsulated payload length cannot be zero")]
    ZeroLengthPayload,
    #[error("offline message does not contain the RakNet magic")]
    InvalidMagic,
    #[error("unknown IP address version {0}")]
    UnknownAddressVersion(u8),
    #[error("invalid packet reliability {0}")]
    InvalidReliability(u8),
    #[error("unknown message id {0:#04x}")]
    UnknownMessageId(u8),
    #[error("unexpected frame header {0:#04x}")]
    UnexpectedFrameHeader(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Checked reads for RakNet's wire types: every read verifies the remaining length first and
///  fails with [CodecError::Truncated] instead of panicking like the plain [Buf] getters.
pub trait RakBuf: Buf {
    fn ensure_remaining(&self, needed: usize) -> CodecResult<()> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated { needed, remaining: self.remaining() });
        }
        Ok(())
    }

    fn read_u8(&mut self) -> CodecResult<u8> {
        self.ensure_remaining(1)?;
        Ok(self.get_u8())
    }

    fn read_bool(&mut self) -> CodecResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> CodecResult<u16> {
        self.ensure_remaining(2)?;
        Ok(self.get_u16())
    }

    fn read_u16_le(&mut self) -> CodecResult<u16> {
        self.ensure_remaining(2)?;
        Ok(self.get_u16_le())
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        self.ensure_remaining(4)?;
        Ok(self.get_u32())
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        self.ensure_remaining(8)?;
        Ok(self.get_u64())
    }

    fn read_i64(&mut self) -> CodecResult<i64> {
        self.ensure_remaining(8)?;
        Ok(self.get_i64())
    }

    /// 24-bit little-endian unsigned integer
    fn read_triad(&mut self) -> CodecResult<u32> {
        self.ensure_remaining(3)?;
        Ok(self.get_uint_le(3) as u32)
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<Bytes> {
        self.ensure_remaining(len)?;
        Ok(self.copy_to_bytes(len))
    }

    fn read_magic(&mut self) -> CodecResult<()> {
        self.ensure_remaining(MAGIC.len())?;
        let mut magic = [0u8; 16];
        self.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(CodecError::InvalidMagic);
        }
        Ok(())
    }

    /// u16 length prefix followed by the string's bytes. Invalid UTF-8 is replaced rather than
    ///  rejected since these strings are informational only.
    fn read_string(&mut self) -> CodecResult<String> {
        let len = self.read_u16()?;
        let raw = self.read_bytes(len.into())?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl<B: Buf + ?Sized> RakBuf for B {}

pub trait RakBufMut: BufMut {
    /// 24-bit little-endian unsigned integer - higher bits are silently truncated
    fn put_triad(&mut self, value: u32) {
        self.put_uint_le(u64::from(value & 0x00ff_ffff), 3);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_magic(&mut self) {
        self.put_slice(&MAGIC);
    }

    fn put_string(&mut self, value: &str) {
        let raw = value.as_bytes();
        let len = raw.len().min(u16::MAX.into());
        self.put_u16(len as u16);
        self.put_slice(&raw[..len]);
    }
}

impl<B: BufMut + ?Sized> RakBufMut for B {}
