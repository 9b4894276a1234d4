use crate::codec::Vector2;
use crate::error::{CodecError, CodecResult};

/// Growable output buffer with nested message framing.
///
/// `begin(tag)` reserves a two byte length slot followed by the tag;
/// `end()` backpatches the slot with the body length. Frames nest strictly
/// LIFO.
#[derive(Debug, Default, Clone)]
pub struct HazelWriter {
    buf: Vec<u8>,
    open: Vec<usize>,
}

impl HazelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of frames begun but not yet ended.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the buffer, failing if any frame is still open.
    pub fn finish(self) -> CodecResult<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(CodecError::UnbalancedFrame);
        }
        Ok(self.buf)
    }

    pub fn begin(&mut self, tag: u8) {
        self.open.push(self.buf.len());
        self.buf.extend_from_slice(&[0, 0, tag]);
    }

    pub fn end(&mut self) -> CodecResult<()> {
        let start = self.open.pop().ok_or(CodecError::UnbalancedFrame)?;
        let body_len = self.buf.len() - start - 3;
        let len = u16::try_from(body_len).map_err(|_| CodecError::FrameTooLarge(body_len))?;
        self.buf[start..start + 2].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Writes a whole frame, closing it even when `body` fails part way.
    pub fn message<F>(&mut self, tag: u8, body: F) -> CodecResult<()>
    where
        F: FnOnce(&mut Self) -> CodecResult<()>,
    {
        self.begin(tag);
        let result = body(self);
        self.end()?;
        result
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn i8(&mut self, value: i8) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn bool(&mut self, value: bool) {
        self.u8(u8::from(value));
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u16_be(&mut self, value: u16) {
        self.bytes(&value.to_be_bytes());
    }

    pub fn i16(&mut self, value: i16) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn i64(&mut self, value: i64) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn f32(&mut self, value: f32) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn upacked(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.u8(byte);
                return;
            }
            self.u8(byte | 0x80);
        }
    }

    pub fn packed(&mut self, value: i32) {
        self.upacked(value as u32);
    }

    pub fn string(&mut self, value: &str) {
        self.upacked(value.len() as u32);
        self.bytes(value.as_bytes());
    }

    pub fn vector2(&mut self, value: Vector2) {
        let (x, y) = value.quantize();
        self.u16(x);
        self.u16(y);
    }
}
