use bytes::Bytes;

/// Decoded texture payload ready for upload, plus the size the memory cache
/// accounts for it with.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub bytes: Bytes,
    pub size_in_bytes: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("malformed texture payload: {0}")]
    Malformed(String),
}

/// Turns raw retrieved bytes into texture data. A failed decode counts as a
/// failed attempt for the tile, same as a failed retrieval.
pub trait TextureDecoder: Send + Sync {
    fn decode(&self, bytes: Bytes) -> Result<TextureData, DecodeError>;
}

/// Pass-through decoder: the retrieved bytes are the texture payload. Rejects
/// empty payloads, which servers produce for missing tiles often enough that
/// treating them as valid would poison the cache.
pub struct RawTextureDecoder;

impl TextureDecoder for RawTextureDecoder {
    fn decode(&self, bytes: Bytes) -> Result<TextureData, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let size_in_bytes = bytes.len() as u64;
        Ok(TextureData {
            bytes,
            size_in_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_decoder_passes_bytes_through() {
        let data = RawTextureDecoder
            .decode(Bytes::from_static(b"\x89PNG\r\n"))
            .unwrap();
        assert_eq!(data.size_in_bytes, 6);
        assert_eq!(&data.bytes[..4], b"\x89PNG");
    }

    #[test]
    fn test_raw_decoder_rejects_empty() {
        assert!(matches!(
            RawTextureDecoder.decode(Bytes::new()),
            Err(DecodeError::Empty)
        ));
    }
}
