//! Sealed blob file codec.
//!
//! A blob file is the marshaled private part immediately followed by the
//! marshaled public part. Each part is a TPM2B: a big-endian u16 size and
//! that many bytes, so the pair self-delimits with no separator.

use crate::device::{PrivateBlob, PublicBlob};
use crate::error::{Result, SealError};

/// Marshal one TPM2B.
fn marshal_tpm2b(bytes: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let size = u16::try_from(bytes.len())
        .map_err(|_| SealError::InvalidBlob(format!("part too large: {} bytes", bytes.len())))?;
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Unmarshal one TPM2B, returning the body and the bytes consumed.
fn unmarshal_tpm2b(buf: &[u8]) -> Result<(&[u8], usize)> {
    if buf.len() < 2 {
        return Err(SealError::InvalidBlob("truncated size prefix".into()));
    }
    let size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let body = buf
        .get(2..2 + size)
        .ok_or_else(|| SealError::InvalidBlob(format!("truncated body: want {} bytes", size)))?;
    Ok((body, 2 + size))
}

/// Encode a private/public pair into file bytes.
pub fn encode_blob(private: &PrivateBlob, public: &PublicBlob) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + private.0.len() + public.0.len());
    marshal_tpm2b(&private.0, &mut out)?;
    marshal_tpm2b(&public.0, &mut out)?;
    Ok(out)
}

/// Decode file bytes into a private/public pair.
pub fn decode_blob(data: &[u8]) -> Result<(PrivateBlob, PublicBlob)> {
    let mut offset = 0;
    let (private, consumed) = unmarshal_tpm2b(data)?;
    offset += consumed;
    let (public, consumed) = unmarshal_tpm2b(&data[offset..])?;
    offset += consumed;
    if offset != data.len() {
        return Err(SealError::InvalidBlob(format!(
            "{} trailing bytes",
            data.len() - offset
        )));
    }
    Ok((PrivateBlob(private.to_vec()), PublicBlob(public.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout() {
        let bytes = encode_blob(&PrivateBlob(vec![0xaa; 3]), &PublicBlob(vec![0xbb; 2])).unwrap();
        assert_eq!(bytes, vec![0, 3, 0xaa, 0xaa, 0xaa, 0, 2, 0xbb, 0xbb]);
    }

    #[test]
    fn test_empty_parts() {
        let bytes = encode_blob(&PrivateBlob(vec![]), &PublicBlob(vec![])).unwrap();
        let (private, public) = decode_blob(&bytes).unwrap();
        assert!(private.0.is_empty());
        assert!(public.0.is_empty());
    }

    #[test]
    fn test_oversized_part_rejected() {
        let big = PrivateBlob(vec![0; u16::MAX as usize + 1]);
        assert!(encode_blob(&big, &PublicBlob(vec![])).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_blob(&PrivateBlob(vec![1]), &PublicBlob(vec![2])).unwrap();
        bytes.push(0);
        assert!(matches!(decode_blob(&bytes), Err(SealError::InvalidBlob(_))));
    }

    proptest! {
        #[test]
        fn prop_any_truncation_fails(
            private in proptest::collection::vec(any::<u8>(), 0..64),
            public in proptest::collection::vec(any::<u8>(), 0..64),
            cut in 0usize..256,
        ) {
            let bytes = encode_blob(&PrivateBlob(private.clone()), &PublicBlob(public.clone())).unwrap();
            let (p, q) = decode_blob(&bytes).unwrap();
            prop_assert_eq!(p.0, private);
            prop_assert_eq!(q.0, public);

            let cut = cut % bytes.len();
            prop_assert!(decode_blob(&bytes[..cut]).is_err());
        }
    }
}
