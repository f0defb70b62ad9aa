use crate::models::Token;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Verification failures. These are the only two ways a signature check
/// can fail; nothing else escapes verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no signing secret registered for version {0}")]
    UnknownVersion(u32),

    #[error("signature does not match signed fields")]
    InvalidSignature,
}

/// HMAC-SHA256 signing and verification with versioned secrets.
///
/// The signed message is pipe-joined: version, subject identifiers, then
/// an integer Unix-seconds timestamp (expiry for tokens, issuance time
/// for identity payloads). Whole-second truncation is part of the wire
/// format and must not change. Signatures are URL-safe base64 without
/// padding.
///
/// Rotation: new payloads are signed with `current_version`; verification
/// resolves the secret from the version embedded in the payload, so old
/// unexpired tokens keep verifying against the secret that signed them.
#[derive(Debug)]
pub struct SignatureService {
    secrets: HashMap<u32, Vec<u8>>,
    current_version: u32,
}

impl SignatureService {
    pub fn new(secrets: HashMap<u32, Vec<u8>>, current_version: u32) -> Result<Self, SignatureError> {
        if !secrets.contains_key(&current_version) {
            return Err(SignatureError::UnknownVersion(current_version));
        }
        Ok(Self {
            secrets,
            current_version,
        })
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Sign token fields with the current version's secret.
    pub fn sign_token(
        &self,
        token_id: Uuid,
        prize_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<String, SignatureError> {
        self.sign_message(
            self.current_version,
            &token_message(self.current_version, token_id, prize_id, expires_at),
        )
    }

    /// Verify a token signature against the secret for the version the
    /// token was issued under.
    pub fn verify_token(
        &self,
        version: u32,
        token_id: Uuid,
        prize_id: Uuid,
        expires_at: DateTime<Utc>,
        signature: &str,
    ) -> Result<(), SignatureError> {
        self.verify(version, &token_message(version, token_id, prize_id, expires_at), signature)
    }

    /// Sign an identity payload with the current version's secret.
    pub fn sign_identity(&self, subject_id: Uuid, issued_at: i64) -> Result<String, SignatureError> {
        self.sign_message(
            self.current_version,
            &identity_message(self.current_version, subject_id, issued_at),
        )
    }

    pub fn verify_identity(
        &self,
        version: u32,
        subject_id: Uuid,
        issued_at: i64,
        signature: &str,
    ) -> Result<(), SignatureError> {
        self.verify(version, &identity_message(version, subject_id, issued_at), signature)
    }

    /// Build a fully signed token row. Issuance proper belongs to the
    /// batch subsystem; this exists so tests and tools can mint tokens
    /// that verify.
    pub fn issue_token(
        &self,
        prize_id: Uuid,
        batch_id: Uuid,
        valid_from: Option<DateTime<Utc>>,
        expires_at: DateTime<Utc>,
    ) -> Result<Token, SignatureError> {
        let id = Uuid::new_v4();
        let signature = self.sign_token(id, prize_id, expires_at)?;
        Ok(Token {
            id,
            prize_id,
            batch_id,
            signature,
            signature_version: self.current_version,
            expires_at,
            valid_from,
            redeemed_at: None,
            disabled: false,
        })
    }

    fn sign_message(&self, version: u32, message: &str) -> Result<String, SignatureError> {
        let secret = self
            .secrets
            .get(&version)
            .ok_or(SignatureError::UnknownVersion(version))?;

        let mut mac =
            HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());

        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, version: u32, message: &str, signature: &str) -> Result<(), SignatureError> {
        let expected = self.sign_message(version, message)?;

        // Length mismatch is an immediate reject, never compared.
        if expected.len() != signature.len() {
            return Err(SignatureError::InvalidSignature);
        }

        if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            Ok(())
        } else {
            Err(SignatureError::InvalidSignature)
        }
    }
}

fn token_message(version: u32, token_id: Uuid, prize_id: Uuid, expires_at: DateTime<Utc>) -> String {
    format!("{}|{}|{}|{}", version, token_id, prize_id, expires_at.timestamp())
}

fn identity_message(version: u32, subject_id: Uuid, issued_at: i64) -> String {
    format!("{}|{}|{}", version, subject_id, issued_at)
}
