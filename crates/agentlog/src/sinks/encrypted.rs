use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, OsRng};
use chacha20poly1305::{AeadCore, KeyInit, XChaCha20Poly1305, XNonce};
use thiserror::Error;

use crate::config::EncryptedFileSinkConfig;
use crate::errors::{SinkError, SinkResult};
use crate::record::LogRecord;
use crate::sinks::file::RotatingWriter;
use crate::sinks::LogSink;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("unknown key reference '{0}'")]
    UnknownReference(String),

    #[error("key material for '{reference}' is invalid: {reason}")]
    InvalidKey { reference: String, reason: String },
}

/// External collaborator supplying symmetric key material. The façade only
/// defines the contract; hosts wire in their own secret store.
pub trait KeyProvider: Send + Sync {
    fn get_key(&self, key_reference: &str) -> Result<Vec<u8>, KeyError>;
}

/// In-memory provider. The empty default is the null-object stand-in: every
/// lookup fails, so encrypted sinks are skipped cleanly unless the host
/// injects real keys.
#[derive(Default)]
pub struct StaticKeyProvider {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, reference: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        self.keys.insert(reference.into(), key.to_vec());
        self
    }
}

impl KeyProvider for StaticKeyProvider {
    fn get_key(&self, key_reference: &str) -> Result<Vec<u8>, KeyError> {
        self.keys
            .get(key_reference)
            .cloned()
            .ok_or_else(|| KeyError::UnknownReference(key_reference.to_string()))
    }
}

/// File sink whose records are sealed with XChaCha20-Poly1305 before they
/// touch disk. Rotation and retention behave exactly like the plain file
/// sink; only the line content differs: `base64(nonce || ciphertext)`.
pub struct EncryptedFileSink {
    writer: RotatingWriter,
    cipher: XChaCha20Poly1305,
}

impl EncryptedFileSink {
    pub fn new(
        logger_name: &str,
        config: &EncryptedFileSinkConfig,
        provider: &dyn KeyProvider,
    ) -> SinkResult<Self> {
        let key = provider
            .get_key(&config.key_reference)
            .map_err(|err| SinkError::construction("encrypted_file", err.to_string()))?;
        if key.len() != KEY_LEN {
            return Err(SinkError::construction(
                "encrypted_file",
                format!("key must be {KEY_LEN} bytes, got {}", key.len()),
            ));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|err| SinkError::construction("encrypted_file", err.to_string()))?;
        Ok(Self {
            writer: RotatingWriter::new(logger_name, &config.file)?,
            cipher,
        })
    }

    pub fn current_path(&self) -> std::path::PathBuf {
        self.writer.current_path()
    }

    fn seal(&self, plaintext: &[u8]) -> SinkResult<String> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|_| {
            SinkError::dispatch(
                "encrypted_file",
                std::io::Error::new(std::io::ErrorKind::Other, "encryption failed"),
            )
        })?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }
}

impl LogSink for EncryptedFileSink {
    fn name(&self) -> &'static str {
        "encrypted_file"
    }

    fn emit(&self, record: &LogRecord) -> SinkResult<()> {
        let line = record.to_json_line()?;
        let sealed = self.seal(line.as_bytes())?;
        self.writer.write_line(&sealed)
    }

    fn flush(&self) -> SinkResult<()> {
        self.writer.flush()
    }

    fn close(&self) -> SinkResult<()> {
        self.writer.close()
    }
}

/// Opens one sealed line back into the original JSON. Operational tooling
/// for reading encrypted logs offline; also what the tests use to check
/// file content.
pub fn decrypt_line(key: &[u8; KEY_LEN], line: &str) -> Result<String, KeyError> {
    let sealed = BASE64.decode(line.trim()).map_err(|err| KeyError::InvalidKey {
        reference: String::new(),
        reason: format!("base64: {err}"),
    })?;
    if sealed.len() <= NONCE_LEN {
        return Err(KeyError::InvalidKey {
            reference: String::new(),
            reason: "line too short".to_string(),
        });
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|err| KeyError::InvalidKey {
        reference: String::new(),
        reason: err.to_string(),
    })?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| KeyError::InvalidKey {
            reference: String::new(),
            reason: "decryption failed".to_string(),
        })?;
    String::from_utf8(plaintext).map_err(|err| KeyError::InvalidKey {
        reference: String::new(),
        reason: err.to_string(),
    })
}
