//! At-rest encryption for certificate material.
//!
//! PFX bytes and certificate passwords are sealed with AES-256-GCM under a
//! master key taken from the environment. The sealed layout is
//! `nonce (12 bytes) || ciphertext`; a fresh random nonce is drawn per
//! seal, so sealing the same plaintext twice yields different blobs.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;

use crate::constants;
use crate::error::{ServiceError, ServiceResult};

const NONCE_TAMANHO: usize = 12;
const CHAVE_TAMANHO: usize = 32;

/// 256-bit master key. Holds raw key bytes; intentionally no `Debug`.
#[derive(Clone)]
pub struct ChaveMestra([u8; CHAVE_TAMANHO]);

impl ChaveMestra {
    pub fn from_bytes(bytes: [u8; CHAVE_TAMANHO]) -> Self {
        Self(bytes)
    }

    /// Load the key from `DFEHUB_MASTER_KEY` (base64 of 32 raw bytes).
    pub fn from_env() -> ServiceResult<Self> {
        let valor = std::env::var(constants::ENV_MASTER_KEY).map_err(|_| {
            ServiceError::internal_server_error(format!(
                "{} environment variable is not set",
                constants::ENV_MASTER_KEY
            ))
            .with_tag("segredo")
        })?;
        let bytes = BASE64.decode(valor.trim()).map_err(|err| {
            ServiceError::internal_server_error(format!(
                "{} is not valid base64: {}",
                constants::ENV_MASTER_KEY,
                err
            ))
            .with_tag("segredo")
        })?;
        let bytes: [u8; CHAVE_TAMANHO] = bytes.try_into().map_err(|_| {
            ServiceError::internal_server_error(format!(
                "{} must decode to exactly {} bytes",
                constants::ENV_MASTER_KEY,
                CHAVE_TAMANHO
            ))
            .with_tag("segredo")
        })?;
        Ok(Self(bytes))
    }

    fn cipher(&self) -> ServiceResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|err| {
            ServiceError::internal_server_error(format!("Failed to build cipher: {}", err))
                .with_tag("segredo")
        })
    }
}

/// Seal plaintext under the master key.
pub fn selar(chave: &ChaveMestra, plano: &[u8]) -> ServiceResult<Vec<u8>> {
    let cipher = chave.cipher()?;
    let mut nonce_bytes = [0u8; NONCE_TAMANHO];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cifrado = cipher.encrypt(nonce, plano).map_err(|_| {
        ServiceError::internal_server_error("Failed to seal secret material").with_tag("segredo")
    })?;

    let mut selado = Vec::with_capacity(NONCE_TAMANHO + cifrado.len());
    selado.extend_from_slice(&nonce_bytes);
    selado.extend_from_slice(&cifrado);
    Ok(selado)
}

/// Open a sealed blob produced by [`selar`].
pub fn abrir(chave: &ChaveMestra, selado: &[u8]) -> ServiceResult<Vec<u8>> {
    if selado.len() <= NONCE_TAMANHO {
        return Err(
            ServiceError::bad_request("Sealed blob is too short to contain a nonce")
                .with_tag("segredo"),
        );
    }
    let (nonce_bytes, cifrado) = selado.split_at(NONCE_TAMANHO);
    let cipher = chave.cipher()?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), cifrado)
        .map_err(|_| {
            // the GCM tag check failed: wrong key or tampered blob
            ServiceError::bad_request("Sealed blob failed authentication").with_tag("segredo")
        })
}

/// Open a sealed blob and interpret it as UTF-8 (certificate passwords).
pub fn abrir_texto(chave: &ChaveMestra, selado: &[u8]) -> ServiceResult<String> {
    let bytes = abrir(chave, selado)?;
    String::from_utf8(bytes).map_err(|_| {
        ServiceError::bad_request("Sealed text is not valid UTF-8").with_tag("segredo")
    })
}
