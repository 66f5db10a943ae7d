// src/similarity.rs
// Pure vector math, embedding blob codec, content hashing, token estimation.
//
// The blob format is little-endian IEEE-754 f32 packed contiguously. This is
// a stable on-disk format shared with the embedding cache and the vector
// store; do not change it.

use crate::error::{MemoryError, Result};
use sha2::{Digest, Sha256};

/// Cosine similarity in [-1, 1]. Zero-norm vectors compare as 0.
///
/// Mismatched dimensions are an invariant violation: callers that tolerate
/// them (search over mixed-model rows) must check lengths first.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MemoryError::InvariantViolation(format!(
            "cosine: dimension mismatch ({} vs {})",
            a.len(),
            b.len()
        )));
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot_product / (norm_a * norm_b))
    }
}

/// Euclidean distance, >= 0
pub fn euclidean(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MemoryError::InvariantViolation(format!(
            "euclidean: dimension mismatch ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

/// Dot product
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MemoryError::InvariantViolation(format!(
            "dot: dimension mismatch ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Normalize to unit length. Zero-norm vectors pass through unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

/// Pack a vector as little-endian f32 bytes
pub fn serialize_embedding(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

/// Exact inverse of [`serialize_embedding`]
pub fn deserialize_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MemoryError::InvariantViolation(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// SHA-256 of the content, lowercase hex. Dedup key for the embedding cache.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rough token count: ceil(len / 4)
pub fn estimate_tokens(s: &str) -> u32 {
    s.len().div_ceil(4) as u32
}

/// 1 - cosine(predicted, actual)
pub fn prediction_error(predicted: &[f32], actual: &[f32]) -> Result<f32> {
    Ok(1.0 - cosine(predicted, actual)?)
}

/// Element-wise mean of a non-empty set of same-dimension vectors
pub fn average_embedding(vs: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = vs.first().ok_or_else(|| {
        MemoryError::InvariantViolation("average_embedding: empty input".to_string())
    })?;
    let dim = first.len();

    let mut acc = vec![0.0f32; dim];
    for v in vs {
        if v.len() != dim {
            return Err(MemoryError::InvariantViolation(format!(
                "average_embedding: dimension mismatch ({} vs {})",
                v.len(),
                dim
            )));
        }
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += x;
        }
    }

    let n = vs.len() as f32;
    for a in acc.iter_mut() {
        *a /= n;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_self_is_one() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let z = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine(&z, &v).unwrap(), 0.0);
        assert_eq!(cosine(&z, &z).unwrap(), 0.0);
    }

    #[test]
    fn cosine_negation_is_minus_one() {
        let v = vec![1.0, 2.0, -3.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine(&v, &neg).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![1.0, 0.5, 0.0];
        let b = vec![0.2, 0.9, 0.4];
        assert_eq!(cosine(&a, &b).unwrap(), cosine(&b, &a).unwrap());
    }

    #[test]
    fn cosine_dimension_mismatch_fails() {
        assert!(cosine(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn euclidean_basics() {
        assert_eq!(euclidean(&[0.0, 0.0], &[3.0, 4.0]).unwrap(), 5.0);
        assert_eq!(euclidean(&[1.0], &[1.0]).unwrap(), 0.0);
    }

    #[test]
    fn normalize_unit_length() {
        let n = normalize(&[3.0, 4.0]);
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_is_identity() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn embedding_blob_round_trips_bitwise() {
        let v = vec![0.0f32, -1.5, 3.25, f32::MIN_POSITIVE, 1e30];
        let bytes = serialize_embedding(&v);
        assert_eq!(bytes.len(), v.len() * 4);
        let back = deserialize_embedding(&bytes).unwrap();
        for (a, b) in v.iter().zip(back.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn embedding_blob_is_little_endian() {
        let bytes = serialize_embedding(&[1.0f32]);
        assert_eq!(bytes, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn deserialize_rejects_ragged_blob() {
        assert!(deserialize_embedding(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn content_hash_is_lowercase_hex_sha256() {
        // Known SHA-256 of the empty string
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn prediction_error_identical_is_zero() {
        let v = vec![1.0, 2.0];
        assert!(prediction_error(&v, &v).unwrap().abs() < 1e-6);
    }

    #[test]
    fn average_embedding_elementwise_mean() {
        let avg = average_embedding(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(avg, vec![2.0, 3.0]);
    }

    #[test]
    fn average_embedding_rejects_empty_and_ragged() {
        assert!(average_embedding(&[]).is_err());
        assert!(average_embedding(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
