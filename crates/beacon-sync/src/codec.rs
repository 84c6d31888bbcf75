//! # Payload Codec
//!
//! Every request body is JSON-serialized, passed through a [`PayloadEncoder`]
//! and wrapped as `{"payload": "<encoded>"}`.
//!
//! ```text
//! body (JSON bytes) ──► encoder.encode() ──► {"payload": "..."}
//!
//!   Base64Encoder   base64(body)
//!   AesGcmEncoder   base64(nonce[12] ‖ AES-256-GCM(body))
//! ```

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::CollectorSettings;
use crate::error::{TelemetryError, TelemetryResult};

const NONCE_LEN: usize = 12;

/// Turns serialized request bodies into the string carried in the envelope.
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, body: &[u8]) -> TelemetryResult<String>;

    /// Inverse of [`encode`](Self::encode).
    fn decode(&self, payload: &str) -> TelemetryResult<Vec<u8>>;
}

/// Which encoder the collector expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    #[default]
    Base64,
    AesGcm,
}

impl std::str::FromStr for PayloadEncoding {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base64" | "plain" => Ok(PayloadEncoding::Base64),
            "aes_gcm" | "aes-gcm" | "aes" => Ok(PayloadEncoding::AesGcm),
            other => Err(TelemetryError::InvalidConfig(format!(
                "Unknown payload encoding: '{}'. Valid options: base64, aes_gcm",
                other
            ))),
        }
    }
}

/// Builds the encoder selected in the collector settings.
pub fn encoder_for(settings: &CollectorSettings) -> TelemetryResult<Arc<dyn PayloadEncoder>> {
    match settings.encoding {
        PayloadEncoding::Base64 => Ok(Arc::new(Base64Encoder)),
        PayloadEncoding::AesGcm => {
            let key = settings.encryption_key.as_deref().ok_or_else(|| {
                TelemetryError::InvalidConfig("encryption_key is required for aes_gcm".into())
            })?;
            Ok(Arc::new(AesGcmEncoder::from_base64_key(key)?))
        }
    }
}

// =============================================================================
// Base64
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl PayloadEncoder for Base64Encoder {
    fn encode(&self, body: &[u8]) -> TelemetryResult<String> {
        Ok(STANDARD.encode(body))
    }

    fn decode(&self, payload: &str) -> TelemetryResult<Vec<u8>> {
        STANDARD
            .decode(payload)
            .map_err(|e| TelemetryError::Encoding(e.to_string()))
    }
}

// =============================================================================
// AES-256-GCM
// =============================================================================

/// Authenticated encryption with a fresh random nonce per payload.
#[derive(Clone)]
pub struct AesGcmEncoder {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncoder").finish_non_exhaustive()
    }
}

impl AesGcmEncoder {
    pub fn new(key: &[u8]) -> TelemetryResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            TelemetryError::InvalidConfig(format!(
                "encryption key must be 32 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(AesGcmEncoder { cipher })
    }

    pub fn from_base64_key(key: &str) -> TelemetryResult<Self> {
        let raw = STANDARD
            .decode(key.trim())
            .map_err(|e| TelemetryError::InvalidConfig(format!("encryption key: {e}")))?;
        Self::new(&raw)
    }

    /// A random key, base64 encoded, suitable for `encryption_key`.
    pub fn generate_key_base64() -> String {
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }
}

impl PayloadEncoder for AesGcmEncoder {
    fn encode(&self, body: &[u8]) -> TelemetryResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, body)
            .map_err(|_| TelemetryError::Encoding("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decode(&self, payload: &str) -> TelemetryResult<Vec<u8>> {
        let sealed = STANDARD
            .decode(payload)
            .map_err(|e| TelemetryError::Encoding(e.to_string()))?;

        if sealed.len() < NONCE_LEN {
            return Err(TelemetryError::Encoding("payload shorter than nonce".into()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| TelemetryError::Encoding("decryption failed".into()))
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Wire wrapper around every request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: String,
}

impl Envelope {
    pub fn seal<T: Serialize>(encoder: &dyn PayloadEncoder, body: &T) -> TelemetryResult<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(Envelope {
            payload: encoder.encode(&bytes)?,
        })
    }

    pub fn open<T: serde::de::DeserializeOwned>(
        &self,
        encoder: &dyn PayloadEncoder,
    ) -> TelemetryResult<T> {
        let bytes = encoder.decode(&self.payload)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
