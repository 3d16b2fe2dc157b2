//! Defines the CryptoProvider trait for crypto-agility.
//!
//! This is the "cryptographic primitive provider" the rest of the crate consumes:
//! secure randomness, asymmetric encrypt/decrypt with OAEP padding, symmetric
//! authenticated encryption and password-based key derivation.

use crate::error::CryptoError;
use core::fmt::Debug;
use zeroize::Zeroizing;

/// Trait that formalizes all cryptographic operations for a specific cipher suite.
/// Higher layers are generic over it so another suite can be swapped in without
/// touching the transfer state machine.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Public half of the identity key pair. Freely shareable.
    type AsymmetricPublicKey: Debug + Clone + Send + Sync + 'static;
    /// Private half of the identity key pair. Never serialized by this crate.
    type AsymmetricPrivateKey: Send + Sync + 'static;

    /// Fills `buf` from the operating system CSPRNG.
    fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError>;

    /// Generates a new asymmetric key pair with the given modulus size.
    fn generate_asymmetric_keys(
        modulus_bits: usize,
    ) -> Result<(Self::AsymmetricPrivateKey, Self::AsymmetricPublicKey), CryptoError>;

    /// Derives the public key from a private key.
    fn public_key_from_private(private_key: &Self::AsymmetricPrivateKey) -> Self::AsymmetricPublicKey;

    /// Encodes a public key as SubjectPublicKeyInfo DER.
    fn public_key_to_spki(public_key: &Self::AsymmetricPublicKey) -> Result<Vec<u8>, CryptoError>;

    /// Decodes a SubjectPublicKeyInfo DER public key.
    fn public_key_from_spki(der: &[u8]) -> Result<Self::AsymmetricPublicKey, CryptoError>;

    /// Modulus size of a public key in bits.
    fn modulus_bits(public_key: &Self::AsymmetricPublicKey) -> usize;

    /// Exact ciphertext length produced for this private key's public half.
    fn ciphertext_len(private_key: &Self::AsymmetricPrivateKey) -> usize;

    /// Largest plaintext the asymmetric scheme can encrypt under this key.
    fn max_asymmetric_plaintext(public_key: &Self::AsymmetricPublicKey) -> usize;

    /// Encrypts a small payload (a raw symmetric key) under a public key.
    fn asymmetric_encrypt(
        public_key: &Self::AsymmetricPublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypts a payload produced by `asymmetric_encrypt`.
    fn asymmetric_decrypt(
        private_key: &Self::AsymmetricPrivateKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Performs AEAD encryption.
    /// `key`: The symmetric encryption key.
    /// `nonce`: The unique nonce for this encryption.
    /// `plaintext`: The data to encrypt.
    /// Returns ciphertext with the authentication tag appended.
    fn aead_encrypt(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Performs AEAD decryption.
    /// `key`: The symmetric encryption key.
    /// `nonce`: The nonce used for encryption.
    /// `ciphertext`: The encrypted data with the tag appended.
    fn aead_decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Derives `out.len()` bytes from a password with PBKDF2.
    fn pbkdf2_derive(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]);

    /// Returns the SuiteID associated with this CryptoProvider.
    fn suite_id() -> u16;
}
