//! Byte encoding for embedding vectors.
//!
//! Vectors are stored as packed little-endian IEEE-754 binary32 values, so a
//! vector of dimension `d` occupies exactly `d * ELEMENT_WIDTH` bytes and
//! decodes back to the same bit patterns.

/// Width in bytes of a single encoded element.
pub const ELEMENT_WIDTH: usize = std::mem::size_of::<f32>();

/// Error type for vector decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("byte length {len} is not a multiple of {ELEMENT_WIDTH}")]
    LengthMismatch { len: usize },
    #[error("expected dimension {expected}, found {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Encode a vector into its packed byte representation.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * ELEMENT_WIDTH);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a packed byte sequence back into a vector.
///
/// When `dimension_hint` is given, the decoded length must match it.
pub fn decode(bytes: &[u8], dimension_hint: Option<usize>) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % ELEMENT_WIDTH != 0 {
        return Err(CodecError::LengthMismatch { len: bytes.len() });
    }

    let dimension = bytes.len() / ELEMENT_WIDTH;
    if let Some(expected) = dimension_hint {
        if expected != dimension {
            return Err(CodecError::DimensionMismatch {
                expected,
                actual: dimension,
            });
        }
    }

    Ok(bytes
        .chunks_exact(ELEMENT_WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Narrow wire-precision values (as returned by embedding APIs) to the store precision.
pub fn coerce(values: &[f64]) -> Vec<f32> {
    values.iter().map(|v| *v as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(v: &[f32]) -> Vec<u32> {
        v.iter().map(|x| x.to_bits()).collect()
    }

    #[test]
    fn test_encode_length() {
        let bytes = encode(&[1.0, 2.0, 3.0]);
        assert_eq!(bytes.len(), 3 * ELEMENT_WIDTH);
        assert!(encode(&[]).is_empty());
    }

    #[test]
    fn test_encode_is_little_endian() {
        assert_eq!(encode(&[1.0]), vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_round_trip_preserves_bits() {
        let vector = vec![
            0.0,
            -0.0,
            1.5,
            -3.25e-7,
            f32::MIN_POSITIVE,
            f32::from_bits(1), // subnormal
            f32::MAX,
            f32::INFINITY,
            f32::NEG_INFINITY,
            f32::from_bits(0x7fc0_1234), // NaN with payload
        ];

        let decoded = decode(&encode(&vector), None).unwrap();
        assert_eq!(bits(&decoded), bits(&vector));
    }

    #[test]
    fn test_decode_rejects_ragged_length() {
        let err = decode(&[0, 0, 128, 63, 1], None).unwrap_err();
        assert_eq!(err, CodecError::LengthMismatch { len: 5 });
    }

    #[test]
    fn test_decode_with_dimension_hint() {
        let bytes = encode(&[1.0, 2.0]);
        assert_eq!(decode(&bytes, Some(2)).unwrap(), vec![1.0, 2.0]);

        let err = decode(&bytes, Some(3)).unwrap_err();
        assert_eq!(
            err,
            CodecError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_coerce_narrows_to_f32() {
        let coerced = coerce(&[0.5, 0.1, -2.0]);
        assert_eq!(coerced, vec![0.5f32, 0.1f32, -2.0f32]);
    }
}
