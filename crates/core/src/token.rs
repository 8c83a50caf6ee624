//! Consistency token encoding
//!
//! A consistency token is an opaque value carrying `(zone_id, revision)`
//! plus a server-side MAC. Clients treat it as a cursor; servers refuse
//! tokens whose MAC does not verify. Presenting a token on a read
//! guarantees results at least as fresh as that token's revision.

use crate::error::{NexusError, Result};
use crate::types::ZoneId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Decoded consistency token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyToken {
    /// Zone the revision belongs to
    pub zone_id: ZoneId,
    /// Revision the issuing write observed
    pub revision: u64,
}

impl ConsistencyToken {
    /// Create a token for a zone revision
    pub fn new(zone_id: ZoneId, revision: u64) -> Self {
        Self { zone_id, revision }
    }
}

/// Signs and verifies consistency tokens with an HMAC-SHA256 key
///
/// The key is held by the server; tokens round-trip through clients as
/// opaque base64url strings.
#[derive(Clone)]
pub struct TokenCodec {
    key: Vec<u8>,
}

impl TokenCodec {
    /// Create a codec with the given server key
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Encode a token: base64url(payload || tag)
    pub fn encode(&self, token: &ConsistencyToken) -> Result<String> {
        let payload = bincode::serialize(token)?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| NexusError::InvalidToken(e.to_string()))?;
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let mut buf = Vec::with_capacity(payload.len() + tag.len() + 4);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&tag);
        Ok(URL_SAFE_NO_PAD.encode(buf))
    }

    /// Decode and verify a token; rejects bad MACs and malformed input
    pub fn decode(&self, encoded: &str) -> Result<ConsistencyToken> {
        let buf = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| NexusError::InvalidToken(format!("bad base64: {e}")))?;
        if buf.len() < 4 {
            return Err(NexusError::InvalidToken("truncated token".to_string()));
        }
        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let rest = &buf[4..];
        if rest.len() < payload_len {
            return Err(NexusError::InvalidToken("truncated payload".to_string()));
        }
        let (payload, tag) = rest.split_at(payload_len);

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| NexusError::InvalidToken(e.to_string()))?;
        mac.update(payload);
        mac.verify_slice(tag)
            .map_err(|_| NexusError::InvalidToken("MAC verification failed".to_string()))?;

        let token: ConsistencyToken = bincode::deserialize(payload)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-server-key".to_vec())
    }

    #[test]
    fn test_token_roundtrip() {
        let token = ConsistencyToken::new(ZoneId::new("zone-a"), 42);
        let encoded = codec().encode(&token).unwrap();
        let decoded = codec().decode(&encoded).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_token_is_opaque() {
        let token = ConsistencyToken::new(ZoneId::new("zone-a"), 42);
        let encoded = codec().encode(&token).unwrap();
        // base64url alphabet only
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let token = ConsistencyToken::new(ZoneId::new("zone-a"), 42);
        let encoded = codec().encode(&token).unwrap();
        let mut buf = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(buf);
        let err = codec().decode(&tampered).unwrap_err();
        assert!(matches!(err, NexusError::InvalidToken(_)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = ConsistencyToken::new(ZoneId::new("zone-a"), 7);
        let encoded = codec().encode(&token).unwrap();
        let other = TokenCodec::new(b"different-key".to_vec());
        assert!(other.decode(&encoded).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(codec().decode("not!!valid@@base64").is_err());
        assert!(codec().decode("").is_err());
        assert!(codec().decode("AAAA").is_err());
    }
}
