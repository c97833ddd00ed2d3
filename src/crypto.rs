// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attribute value encryption.
//!
//! The Postgres gateway encrypts inside SQL with pgcrypto
//! (`pgp_sym_encrypt` / `pgp_sym_decrypt`) and only ever binds the key
//! material as a parameter. The [`KeyRing`] here owns that material and
//! also provides an in-process AES-256-GCM seal/open used by the in-memory
//! gateway, so no gateway keeps a plaintext value at rest.
//!
//! ## Key versions
//!
//! Version `n` is the `n`-th configured key (1-based). New writes always
//! use [`KeyRing::current_version`]; reads select the key by the version
//! recorded with the ciphertext, so adding a key never breaks old rows.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

/// Key version as stored alongside ciphertext.
pub type KeyVersion = i64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key ring is empty")]
    EmptyKeyRing,

    #[error("unknown key version {0}")]
    UnknownKeyVersion(KeyVersion),

    #[error("encryption failed")]
    SealFailed,

    #[error("wrong key or corrupt data")]
    OpenFailed,
}

/// Symmetric key material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(String);

impl EncryptionKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for binding as a SQL parameter.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn aead_key(&self) -> Result<LessSafeKey, CryptoError> {
        let material = digest(&SHA256, self.0.as_bytes());
        let unbound =
            UnboundKey::new(&AES_256_GCM, material.as_ref()).map_err(|_| CryptoError::SealFailed)?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

/// Ordered set of key generations; the last one is current.
#[derive(Clone, Debug)]
pub struct KeyRing {
    keys: Vec<EncryptionKey>,
}

impl KeyRing {
    pub fn new(keys: Vec<EncryptionKey>) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyKeyRing);
        }
        Ok(Self { keys })
    }

    /// Single-key ring at version 1.
    pub fn single(key: EncryptionKey) -> Self {
        Self { keys: vec![key] }
    }

    pub fn current_version(&self) -> KeyVersion {
        self.keys.len() as KeyVersion
    }

    pub fn current(&self) -> &EncryptionKey {
        // non-empty by construction
        &self.keys[self.keys.len() - 1]
    }

    pub fn get(&self, version: KeyVersion) -> Result<&EncryptionKey, CryptoError> {
        usize::try_from(version)
            .ok()
            .and_then(|v| v.checked_sub(1))
            .and_then(|idx| self.keys.get(idx))
            .ok_or(CryptoError::UnknownKeyVersion(version))
    }

    /// All secrets in version order, bound as a Postgres `text[]` so SQL can
    /// pick the decryption key with `($n::text[])[key_version::int]`.
    pub fn secrets(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.expose().to_string()).collect()
    }

    /// Encrypt under the current key. Output is `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &str) -> Result<(Vec<u8>, KeyVersion), CryptoError> {
        let version = self.current_version();
        let key = self.current().aead_key()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(version.to_be_bytes()),
            &mut in_out,
        )
        .map_err(|_| CryptoError::SealFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok((sealed, version))
    }

    /// Decrypt a value sealed under `version`.
    pub fn open(&self, sealed: &[u8], version: KeyVersion) -> Result<String, CryptoError> {
        let key = self.get(version)?.aead_key()?;
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::OpenFailed);
        }
        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::OpenFailed)?;

        let mut in_out = body.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::from(version.to_be_bytes()), &mut in_out)
            .map_err(|_| CryptoError::OpenFailed)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::OpenFailed)
    }
}
