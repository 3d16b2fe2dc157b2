use crate::crypto::provider::CryptoProvider;
use crate::crypto::STANDARD_SUITE_ID;
use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand_core::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// OAEP overhead for SHA-256: 2 * hLen + 2
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;
const AES_128_KEY_LENGTH: usize = 16;
const GCM_NONCE_LENGTH: usize = 12;

/// Concrete implementation of `CryptoProvider` for the standard suite:
/// RSA-OAEP/SHA-256, AES-128-GCM and PBKDF2-HMAC-SHA256.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSuiteProvider;

impl CryptoProvider for StandardSuiteProvider {
    type AsymmetricPublicKey = RsaPublicKey;
    type AsymmetricPrivateKey = RsaPrivateKey;

    fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
        OsRng.try_fill_bytes(buf)?;
        Ok(())
    }

    fn generate_asymmetric_keys(
        modulus_bits: usize,
    ) -> Result<(Self::AsymmetricPrivateKey, Self::AsymmetricPublicKey), CryptoError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, modulus_bits)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok((private_key, public_key))
    }

    fn public_key_from_private(private_key: &Self::AsymmetricPrivateKey) -> Self::AsymmetricPublicKey {
        RsaPublicKey::from(private_key)
    }

    fn public_key_to_spki(public_key: &Self::AsymmetricPublicKey) -> Result<Vec<u8>, CryptoError> {
        let document = public_key.to_public_key_der()?;
        Ok(document.as_bytes().to_vec())
    }

    fn public_key_from_spki(der: &[u8]) -> Result<Self::AsymmetricPublicKey, CryptoError> {
        // Проверяет OID rsaEncryption и корректность DER
        Ok(RsaPublicKey::from_public_key_der(der)?)
    }

    fn modulus_bits(public_key: &Self::AsymmetricPublicKey) -> usize {
        public_key.size() * 8
    }

    fn ciphertext_len(private_key: &Self::AsymmetricPrivateKey) -> usize {
        private_key.size()
    }

    fn max_asymmetric_plaintext(public_key: &Self::AsymmetricPublicKey) -> usize {
        public_key.size().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    fn asymmetric_encrypt(
        public_key: &Self::AsymmetricPublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let limit = Self::max_asymmetric_plaintext(public_key);
        if plaintext.len() > limit {
            return Err(CryptoError::InvalidInputError(format!(
                "OAEP payload of {} bytes exceeds the {} byte ceiling for this key",
                plaintext.len(),
                limit
            )));
        }

        public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::InvalidInputError(format!("OAEP encryption failed: {}", e)))
    }

    fn asymmetric_decrypt(
        private_key: &Self::AsymmetricPrivateKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let plaintext = private_key
            .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| CryptoError::IntegrityError)?;
        Ok(Zeroizing::new(plaintext))
    }

    fn aead_encrypt(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = aes_128_gcm(key)?;
        let nonce_ref = gcm_nonce(nonce)?;

        cipher
            .encrypt(nonce_ref, plaintext)
            .map_err(|_| CryptoError::InvalidInputError("AEAD encryption failed".to_string()))
    }

    fn aead_decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = aes_128_gcm(key)?;
        let nonce_ref = gcm_nonce(nonce)?;

        let plaintext = cipher.decrypt(nonce_ref, ciphertext)?;
        Ok(plaintext)
    }

    fn pbkdf2_derive(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
        pbkdf2_hmac::<Sha256>(password, salt, iterations, out);
    }

    fn suite_id() -> u16 {
        STANDARD_SUITE_ID
    }
}

fn aes_128_gcm(key: &[u8]) -> Result<Aes128Gcm, CryptoError> {
    if key.len() != AES_128_KEY_LENGTH {
        return Err(CryptoError::InvalidInputError(format!(
            "AES-128 key must be {} bytes, got {}",
            AES_128_KEY_LENGTH,
            key.len()
        )));
    }
    Aes128Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidInputError("Invalid AES key".to_string()))
}

fn gcm_nonce(nonce: &[u8]) -> Result<&Nonce<aes_gcm::aead::consts::U12>, CryptoError> {
    if nonce.len() != GCM_NONCE_LENGTH {
        return Err(CryptoError::InvalidInputError(format!(
            "GCM nonce must be {} bytes, got {}",
            GCM_NONCE_LENGTH,
            nonce.len()
        )));
    }
    Ok(Nonce::from_slice(nonce))
}
