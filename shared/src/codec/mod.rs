//! Hazel binary codec.
//!
//! All integers are little-endian except the packet-header nonce. Nested
//! messages are framed as `length: u16, tag: u8, body` and may nest to any
//! depth.

mod reader;
mod writer;

pub use reader::{HazelReader, MessageIter};
pub use writer::HazelWriter;

use serde::{Deserialize, Serialize};

/// Positions and velocities are quantized to a u16 per axis over this range.
pub const VECTOR_RANGE: (f32, f32) = (-50.0, 50.0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn from_quantized(x: u16, y: u16) -> Self {
        Self {
            x: lerp(f32::from(x) / 65535.0),
            y: lerp(f32::from(y) / 65535.0),
        }
    }

    pub fn quantize(&self) -> (u16, u16) {
        (
            (unlerp(self.x) * 65535.0).round() as u16,
            (unlerp(self.y) * 65535.0).round() as u16,
        )
    }
}

fn lerp(t: f32) -> f32 {
    let (min, max) = VECTOR_RANGE;
    min + (max - min) * t
}

fn unlerp(value: f32) -> f32 {
    let (min, max) = VECTOR_RANGE;
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vector_quantization_precision() {
        let v = Vector2::new(12.345, -7.5);
        let (qx, qy) = v.quantize();
        let back = Vector2::from_quantized(qx, qy);
        // One quantum is 100 / 65535 units.
        assert_approx_eq!(back.x, 12.345, 0.002);
        assert_approx_eq!(back.y, -7.5, 0.002);
    }

    #[test]
    fn test_vector_out_of_range_clamps() {
        let (qx, qy) = Vector2::new(80.0, -90.0).quantize();
        assert_eq!(qx, u16::MAX);
        assert_eq!(qy, 0);
    }

    #[test]
    fn test_vector_wire_bytes() {
        let mut writer = HazelWriter::new();
        writer.vector2(Vector2::ZERO);
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes.len(), 4);
        let mut reader = HazelReader::new(&bytes);
        let v = reader.vector2().unwrap();
        assert_approx_eq!(v.x, 0.0, 0.002);
        assert_approx_eq!(v.y, 0.0, 0.002);
    }
}
