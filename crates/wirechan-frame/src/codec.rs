//! Canonical wire encoding of primitive values.
//!
//! Every primitive kind has one fixed canonical width, independent of the
//! host, and is stored most-significant byte first. Encoding zero-extends a
//! narrower native value into its canonical slot; decoding may drop
//! high-order canonical bytes when the native type is narrower (for example
//! a pointer-sized handle on a 32-bit host).

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::CodecError;

/// Widest canonical encoding of any primitive kind.
pub const MAX_CANONICAL_WIDTH: usize = 8;

/// Length prefix marking a null string.
pub const NULL_LENGTH: i32 = -1;

/// Host byte order assumed by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    #[cfg(target_endian = "little")]
    pub const NATIVE: ByteOrder = ByteOrder::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: ByteOrder = ByteOrder::Big;
}

/// Kinds of primitive value the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Float32,
    Float64,
    /// Pointer-sized handle (`usize` natively).
    Handle,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 10] = [
        PrimitiveKind::Int8,
        PrimitiveKind::Uint8,
        PrimitiveKind::Int16,
        PrimitiveKind::Uint16,
        PrimitiveKind::Int32,
        PrimitiveKind::Uint32,
        PrimitiveKind::Int64,
        PrimitiveKind::Float32,
        PrimitiveKind::Float64,
        PrimitiveKind::Handle,
    ];

    /// Bytes this kind occupies on the wire.
    pub const fn canonical_width(self) -> usize {
        match self {
            PrimitiveKind::Int8 | PrimitiveKind::Uint8 => 1,
            PrimitiveKind::Int16 | PrimitiveKind::Uint16 => 2,
            PrimitiveKind::Int32 | PrimitiveKind::Uint32 | PrimitiveKind::Float32 => 4,
            PrimitiveKind::Int64 | PrimitiveKind::Float64 | PrimitiveKind::Handle => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::Uint8 => "uint8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::Uint16 => "uint16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Uint32 => "uint32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
            PrimitiveKind::Handle => "handle",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reverse `buf` in place.
pub fn flip_bytes(buf: &mut [u8]) {
    buf.reverse();
}

/// Convert native bytes to canonical form using the host byte order.
pub fn canonicalize(src: &[u8], dst: &mut [u8]) -> Result<(), CodecError> {
    canonicalize_with(ByteOrder::NATIVE, src, dst)
}

/// Convert native bytes laid out in `order` into the canonical slot `dst`.
///
/// `src` is zero-extended to `dst.len()`. A `src` wider than `dst` is
/// [`CodecError::Narrowing`]: the sender picked the wrong primitive width.
pub fn canonicalize_with(order: ByteOrder, src: &[u8], dst: &mut [u8]) -> Result<(), CodecError> {
    if src.len() > dst.len() {
        return Err(CodecError::Narrowing {
            from: src.len(),
            to: dst.len(),
        });
    }

    dst.fill(0);
    match order {
        ByteOrder::Little => {
            dst[..src.len()].copy_from_slice(src);
            flip_bytes(dst);
        }
        ByteOrder::Big => {
            let pad = dst.len() - src.len();
            dst[pad..].copy_from_slice(src);
        }
    }
    Ok(())
}

/// Convert canonical bytes to native form using the host byte order.
pub fn decanonicalize(src: &[u8], dst: &mut [u8]) -> Result<(), CodecError> {
    decanonicalize_with(ByteOrder::NATIVE, src, dst)
}

/// Convert the canonical bytes `src` into native bytes laid out in `order`.
///
/// When `src` is wider, its highest-order bytes are dropped. A `src`
/// narrower than `dst` is [`CodecError::Widening`].
pub fn decanonicalize_with(
    order: ByteOrder,
    src: &[u8],
    dst: &mut [u8],
) -> Result<(), CodecError> {
    if src.len() < dst.len() {
        return Err(CodecError::Widening {
            from: src.len(),
            to: dst.len(),
        });
    }

    dst.copy_from_slice(&src[src.len() - dst.len()..]);
    if order == ByteOrder::Little {
        flip_bytes(dst);
    }
    Ok(())
}

/// A value with a canonical wire form.
pub trait Primitive: Copy + Default + fmt::Display + Send + 'static {
    const KIND: PrimitiveKind;
    const CANONICAL_WIDTH: usize = Self::KIND.canonical_width();

    /// Encode as if running on a host with byte order `order`.
    fn encode_with(self, order: ByteOrder, dst: &mut [u8]) -> Result<(), CodecError>;

    /// Decode as if running on a host with byte order `order`.
    fn decode_with(order: ByteOrder, src: &[u8]) -> Result<Self, CodecError>;

    fn encode(self, dst: &mut [u8]) -> Result<(), CodecError> {
        self.encode_with(ByteOrder::NATIVE, dst)
    }

    fn decode(src: &[u8]) -> Result<Self, CodecError> {
        Self::decode_with(ByteOrder::NATIVE, src)
    }
}

macro_rules! impl_primitive {
    ($($ty:ty => $kind:ident),* $(,)?) => {$(
        impl Primitive for $ty {
            const KIND: PrimitiveKind = PrimitiveKind::$kind;

            fn encode_with(self, order: ByteOrder, dst: &mut [u8]) -> Result<(), CodecError> {
                let native = match order {
                    ByteOrder::Little => self.to_le_bytes(),
                    ByteOrder::Big => self.to_be_bytes(),
                };
                canonicalize_with(order, &native, dst)
            }

            fn decode_with(order: ByteOrder, src: &[u8]) -> Result<Self, CodecError> {
                let mut native = [0u8; std::mem::size_of::<$ty>()];
                decanonicalize_with(order, src, &mut native)?;
                Ok(match order {
                    ByteOrder::Little => <$ty>::from_le_bytes(native),
                    ByteOrder::Big => <$ty>::from_be_bytes(native),
                })
            }
        }
    )*};
}

impl_primitive! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    usize => Handle,
}

/// Append the canonical encoding of `value` to `dst`.
pub fn put_canonical<P: Primitive>(dst: &mut BytesMut, value: P) -> Result<(), CodecError> {
    let mut scratch = [0u8; MAX_CANONICAL_WIDTH];
    let wire = &mut scratch[..P::CANONICAL_WIDTH];
    value.encode(wire)?;
    dst.put_slice(wire);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: [ByteOrder; 2] = [ByteOrder::Little, ByteOrder::Big];

    fn roundtrip<P: Primitive + PartialEq + fmt::Debug>(values: &[P]) {
        for order in ORDERS {
            for &value in values {
                let mut wire = vec![0u8; P::CANONICAL_WIDTH];
                value.encode_with(order, &mut wire).unwrap();
                let decoded = P::decode_with(order, &wire).unwrap();
                assert_eq!(decoded, value, "{} on {:?} host", P::KIND, order);
            }
        }
    }

    #[test]
    fn canonical_widths_are_fixed() {
        let widths: Vec<usize> = PrimitiveKind::ALL
            .iter()
            .map(|k| k.canonical_width())
            .collect();
        assert_eq!(widths, vec![1, 1, 2, 2, 4, 4, 8, 4, 8, 8]);
        assert_eq!(<usize as Primitive>::CANONICAL_WIDTH, 8);
        assert_eq!(<f32 as Primitive>::CANONICAL_WIDTH, 4);
    }

    #[test]
    fn integers_roundtrip_on_both_host_orders() {
        roundtrip(&[i8::MIN, -1, 0, 1, i8::MAX]);
        roundtrip(&[0u8, 1, 0x7f, 0x80, u8::MAX]);
        roundtrip(&[i16::MIN, -2, 0, 0x1234, i16::MAX]);
        roundtrip(&[0u16, 0xbeef, u16::MAX]);
        roundtrip(&[i32::MIN, -1, 0, 4, 0x0102_0304, i32::MAX]);
        roundtrip(&[0u32, 0xdead_beef, u32::MAX]);
        roundtrip(&[i64::MIN, -1, 0, 0x0102_0304_0506_0708, i64::MAX]);
        roundtrip(&[0usize, 1, usize::MAX]);
    }

    #[test]
    fn floats_roundtrip_on_both_host_orders() {
        roundtrip(&[0.0f32, -0.0, 1.5, f32::MIN, f32::MAX, f32::INFINITY, f32::EPSILON]);
        roundtrip(&[0.0f64, -2.25, f64::MIN_POSITIVE, f64::MAX, f64::NEG_INFINITY]);

        for order in ORDERS {
            let mut wire = [0u8; 8];
            f64::NAN.encode_with(order, &mut wire).unwrap();
            assert!(f64::decode_with(order, &wire).unwrap().is_nan());
        }
    }

    #[test]
    fn canonical_form_is_big_endian_on_every_host() {
        for order in ORDERS {
            let mut wire = [0u8; 4];
            0x0102_0304i32.encode_with(order, &mut wire).unwrap();
            assert_eq!(wire, [1, 2, 3, 4]);

            let mut wire = [0u8; 2];
            (-2i16).encode_with(order, &mut wire).unwrap();
            assert_eq!(wire, [0xff, 0xfe]);
        }
    }

    #[test]
    fn canonicalize_zero_extends_narrow_source() {
        // A 4-byte handle from a 32-bit host fills the 8-byte canonical slot.
        let mut wire = [0xaau8; 8];
        canonicalize_with(ByteOrder::Little, &[0x04, 0x03, 0x02, 0x01], &mut wire).unwrap();
        assert_eq!(wire, [0, 0, 0, 0, 1, 2, 3, 4]);

        let mut wire = [0xaau8; 8];
        canonicalize_with(ByteOrder::Big, &[0x01, 0x02, 0x03, 0x04], &mut wire).unwrap();
        assert_eq!(wire, [0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn canonicalize_rejects_narrowing() {
        for order in ORDERS {
            let mut wire = [0u8; 2];
            let err = canonicalize_with(order, &[1, 2, 3, 4], &mut wire).unwrap_err();
            assert_eq!(err, CodecError::Narrowing { from: 4, to: 2 });
        }
    }

    #[test]
    fn decanonicalize_rejects_widening() {
        for order in ORDERS {
            let mut native = [0u8; 8];
            let err = decanonicalize_with(order, &[1, 2, 3, 4], &mut native).unwrap_err();
            assert_eq!(err, CodecError::Widening { from: 4, to: 8 });
        }
    }

    #[test]
    fn decanonicalize_narrowing_keeps_low_order_bytes() {
        let wire = [0x11, 0x22, 0x33, 0x44, 0xde, 0xad, 0xbe, 0xef];

        let mut native = [0u8; 4];
        decanonicalize_with(ByteOrder::Little, &wire, &mut native).unwrap();
        assert_eq!(u32::from_le_bytes(native), 0xdead_beef);

        let mut native = [0u8; 4];
        decanonicalize_with(ByteOrder::Big, &wire, &mut native).unwrap();
        assert_eq!(u32::from_be_bytes(native), 0xdead_beef);
    }

    #[test]
    fn primitive_decode_rejects_short_canonical_input() {
        let err = i32::decode(&[0, 1]).unwrap_err();
        assert_eq!(err, CodecError::Widening { from: 2, to: 4 });
    }

    #[test]
    fn flip_bytes_reverses_in_place() {
        let mut buf = [1u8, 2, 3];
        flip_bytes(&mut buf);
        assert_eq!(buf, [3, 2, 1]);
        flip_bytes(&mut []);
    }

    #[test]
    fn put_canonical_appends() {
        let mut wire = BytesMut::new();
        put_canonical(&mut wire, 4i32).unwrap();
        put_canonical(&mut wire, 7u8).unwrap();
        assert_eq!(wire.as_ref(), &[0, 0, 0, 4, 7]);
    }
}
