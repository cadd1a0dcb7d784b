//! Opaque continuation tokens.
//!
//! A token wraps a backend-native cursor in an envelope that records which
//! backend and which compiled query produced it, plus an HMAC-SHA256 tag over
//! those fields keyed with the backend's token secret. Tokens are URL-safe
//! base64 (no padding) of the JSON envelope. A token handed to a different
//! backend, replayed against a different query, or altered in transit is
//! rejected with [`SearchError::InvalidContinuationToken`].

use std::fmt;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::SearchError;

type HmacSha256 = Hmac<Sha256>;

/// Envelope format version.
const TOKEN_VERSION: u8 = 2;

/// Length of generated secrets, in bytes.
const GENERATED_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    v: u8,
    backend: String,
    query: String,
    cursor: Value,
    tag: String,
}

/// Fingerprint of a compiled native query, used to bind tokens to it.
pub fn query_fingerprint(native_query: &str) -> String {
    hex::encode(Sha256::digest(native_query.as_bytes()))
}

/// Signs and verifies continuation tokens.
///
/// Every process serving the same store must share the secret, otherwise a
/// token issued by one is rejected by the others.
#[derive(Clone)]
pub struct TokenSigner {
    key: Arc<[u8]>,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// A signer keyed with `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: Arc::from(secret.as_ref()),
        }
    }

    /// A signer keyed with fresh random bytes from the OS.
    pub fn random() -> Self {
        let mut key = [0u8; GENERATED_SECRET_LEN];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Uses a configured secret, or a random one when none is set.
    pub fn from_config(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => Self::new(secret),
            None => Self::random(),
        }
    }

    fn mac(&self, v: u8, backend: &str, query: &str, cursor: &Value) -> Result<HmacSha256, SearchError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SearchError::invalid_token(format!("unusable token secret: {}", e)))?;
        mac.update(&[v]);
        mac.update(backend.as_bytes());
        mac.update(&[0]);
        mac.update(query.as_bytes());
        mac.update(&[0]);
        mac.update(cursor.to_string().as_bytes());
        Ok(mac)
    }

    /// Wraps a native cursor into an opaque token.
    pub fn encode<C: Serialize>(
        &self,
        backend: &str,
        fingerprint: &str,
        cursor: &C,
    ) -> Result<String, SearchError> {
        let cursor = serde_json::to_value(cursor)
            .map_err(|e| SearchError::invalid_token(format!("cursor not serializable: {}", e)))?;
        let tag = self
            .mac(TOKEN_VERSION, backend, fingerprint, &cursor)?
            .finalize()
            .into_bytes();
        let envelope = Envelope {
            v: TOKEN_VERSION,
            backend: backend.to_string(),
            query: fingerprint.to_string(),
            cursor,
            tag: hex::encode(tag),
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|e| SearchError::invalid_token(format!("envelope not serializable: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Validates a token against the backend and query fingerprint and
    /// returns the native cursor it carries.
    pub fn decode<C: DeserializeOwned>(
        &self,
        token: &str,
        backend: &str,
        fingerprint: &str,
    ) -> Result<C, SearchError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| SearchError::invalid_token("not valid base64"))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|_| SearchError::invalid_token("malformed envelope"))?;

        if envelope.v != TOKEN_VERSION {
            return Err(SearchError::invalid_token(format!(
                "unsupported version {}",
                envelope.v
            )));
        }
        let tag = hex::decode(&envelope.tag)
            .map_err(|_| SearchError::invalid_token("signature mismatch"))?;
        self.mac(envelope.v, &envelope.backend, &envelope.query, &envelope.cursor)?
            .verify_slice(&tag)
            .map_err(|_| SearchError::invalid_token("signature mismatch"))?;

        if envelope.backend != backend {
            return Err(SearchError::invalid_token(format!(
                "issued by backend '{}'",
                envelope.backend
            )));
        }
        if envelope.query != fingerprint {
            return Err(SearchError::invalid_token("issued for a different query"));
        }

        serde_json::from_value(envelope.cursor)
            .map_err(|_| SearchError::invalid_token("malformed cursor"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        next_partition_key: String,
        next_row_key: String,
    }

    fn cursor() -> Cursor {
        Cursor {
            next_partition_key: "Observation".to_string(),
            next_row_key: "obs-42".to_string(),
        }
    }

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret")
    }

    fn envelope_of(token: &str) -> Value {
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(token).unwrap()).unwrap()
    }

    fn token_of(envelope: &Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(envelope).unwrap())
    }

    #[test]
    fn test_round_trip() {
        let fp = query_fingerprint("PartitionKey eq 'Observation'");
        let token = signer().encode("table-store", &fp, &cursor()).unwrap();

        assert!(!token.contains('='));
        let decoded: Cursor = signer().decode(&token, "table-store", &fp).unwrap();
        assert_eq!(decoded, cursor());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = signer()
            .decode::<Cursor>("not-valid-base64!!!", "sqlite", "x")
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidContinuationToken { .. }));

        let token = URL_SAFE_NO_PAD.encode(b"{\"hello\":1}");
        assert!(signer().decode::<Cursor>(&token, "sqlite", "x").is_err());
    }

    #[test]
    fn test_rejects_tampered_cursor() {
        let fp = query_fingerprint("q");
        let token = signer()
            .encode("sqlite", &fp, &json!({"last_surrogate_id": 10}))
            .unwrap();

        let mut envelope = envelope_of(&token);
        envelope["cursor"]["last_surrogate_id"] = json!(2);

        let err = signer().decode::<Value>(&token_of(&envelope), "sqlite", &fp).unwrap_err();
        assert_eq!(err, SearchError::invalid_token("signature mismatch"));
    }

    #[test]
    fn test_rejects_cursor_with_recomputed_hash() {
        let fp = query_fingerprint("q");
        let token = signer()
            .encode("table-store", &fp, &cursor())
            .unwrap();

        // Rewind the cursor and re-derive an unkeyed hash over the visible fields.
        let mut envelope = envelope_of(&token);
        envelope["cursor"]["next_row_key"] = json!("obs-0");
        let mut hasher = Sha256::new();
        hasher.update([TOKEN_VERSION]);
        hasher.update(b"table-store");
        hasher.update([0]);
        hasher.update(fp.as_bytes());
        hasher.update([0]);
        hasher.update(envelope["cursor"].to_string().as_bytes());
        envelope["tag"] = json!(hex::encode(hasher.finalize()));

        let err = signer()
            .decode::<Cursor>(&token_of(&envelope), "table-store", &fp)
            .unwrap_err();
        assert_eq!(err, SearchError::invalid_token("signature mismatch"));
    }

    #[test]
    fn test_rejects_token_from_other_secret() {
        let fp = query_fingerprint("q");
        let token = TokenSigner::new("other-secret")
            .encode("sqlite", &fp, &json!({"last_surrogate_id": 10}))
            .unwrap();
        assert!(signer().decode::<Value>(&token, "sqlite", &fp).is_err());

        let random = TokenSigner::random();
        let token = random.encode("sqlite", &fp, &json!(1)).unwrap();
        assert_eq!(random.decode::<Value>(&token, "sqlite", &fp).unwrap(), json!(1));
        assert!(TokenSigner::random().decode::<Value>(&token, "sqlite", &fp).is_err());
    }

    #[test]
    fn test_configured_secret_is_shared() {
        let fp = query_fingerprint("q");
        let token = TokenSigner::from_config(Some("shared"))
            .encode("sqlite", &fp, &json!(7))
            .unwrap();
        let decoded: Value = TokenSigner::from_config(Some("shared"))
            .decode(&token, "sqlite", &fp)
            .unwrap();
        assert_eq!(decoded, json!(7));
        assert!(
            TokenSigner::from_config(None)
                .decode::<Value>(&token, "sqlite", &fp)
                .is_err()
        );
    }

    #[test]
    fn test_rejects_flipped_byte() {
        let fp = query_fingerprint("q");
        let token = signer()
            .encode("sqlite", &fp, &json!({"last_surrogate_id": 10}))
            .unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0x01;
        let forged = URL_SAFE_NO_PAD.encode(bytes);

        assert!(signer().decode::<Value>(&forged, "sqlite", &fp).is_err());
    }

    #[test]
    fn test_rejects_foreign_backend_and_query() {
        let fp = query_fingerprint("q1");
        let token = signer().encode("sqlite", &fp, &json!(5)).unwrap();

        assert!(signer().decode::<Value>(&token, "table-store", &fp).is_err());
        assert!(
            signer()
                .decode::<Value>(&token, "sqlite", &query_fingerprint("q2"))
                .is_err()
        );
        assert_eq!(signer().decode::<Value>(&token, "sqlite", &fp).unwrap(), json!(5));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(query_fingerprint("abc"), query_fingerprint("abc"));
        assert_ne!(query_fingerprint("abc"), query_fingerprint("abd"));
        assert_eq!(query_fingerprint("abc").len(), 64);
    }

    #[test]
    fn test_debug_hides_secret() {
        assert!(!format!("{:?}", signer()).contains("test-secret"));
    }
}
