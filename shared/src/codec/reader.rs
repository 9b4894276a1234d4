use crate::codec::Vector2;
use crate::error::{CodecError, CodecResult};

/// Bounded cursor over a received byte slice.
///
/// Every read is bounds-checked; the cursor never moves past the end of the
/// slice and over-reads fail with [`CodecError::BufferUnderrun`].
#[derive(Debug, Clone)]
pub struct HazelReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HazelReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes exactly `len` bytes.
    pub fn bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CodecError::BufferUnderrun {
                requested: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Consumes everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> CodecResult<i8> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn bool(&mut self) -> CodecResult<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Big-endian u16, used only by the packet header nonce.
    pub fn u16_be(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> CodecResult<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Unsigned 7-bits-per-byte integer, low groups first.
    pub fn upacked(&mut self) -> CodecResult<u32> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    /// Signed variant; the sign travels in-band as the two's-complement bits.
    pub fn packed(&mut self) -> CodecResult<i32> {
        Ok(self.upacked()? as i32)
    }

    pub fn string(&mut self) -> CodecResult<String> {
        let len = self.upacked()? as usize;
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn vector2(&mut self) -> CodecResult<Vector2> {
        let x = self.u16()?;
        let y = self.u16()?;
        Ok(Vector2::from_quantized(x, y))
    }

    /// Reads one `(length, tag, body)` frame.
    ///
    /// The returned reader is bounded to the declared length. `self` has
    /// already advanced past the whole frame, whether or not the sub-reader
    /// is consumed.
    pub fn message(&mut self) -> CodecResult<(u8, HazelReader<'a>)> {
        let len = self.u16()? as usize;
        let tag = self.u8()?;
        let body = self.bytes(len)?;
        Ok((tag, HazelReader::new(body)))
    }

    /// Iterates the remaining frames until the buffer is exhausted.
    pub fn messages(&mut self) -> MessageIter<'_, 'a> {
        MessageIter { reader: self }
    }
}

pub struct MessageIter<'r, 'a> {
    reader: &'r mut HazelReader<'a>,
}

impl<'r, 'a> Iterator for MessageIter<'r, 'a> {
    type Item = CodecResult<(u8, HazelReader<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_empty() {
            return None;
        }
        let item = self.reader.message();
        if item.is_err() {
            // A broken frame poisons the rest of the stream.
            self.reader.rest();
        }
        Some(item)
    }
}
