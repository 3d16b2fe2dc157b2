// Аутентифицированное шифрование чанков и ключевых блобов
// AES-128-GCM, формат: iv(12) || ciphertext || tag(16)

use crate::config::{GCM_TAG_LENGTH, NONCE_LENGTH};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_key::SessionKey;
use crate::crypto::suites::standard::StandardSuiteProvider;
use crate::error::CryptoError;
use std::fmt;
use std::marker::PhantomData;

/// Минимальная длина блоба: nonce + пустой ciphertext + tag
pub const MIN_SEALED_LENGTH: usize = NONCE_LENGTH + GCM_TAG_LENGTH;

/// Симметричное шифрование с аутентификацией и свежим nonce на каждый вызов
pub struct AuthenticatedCipher<P: CryptoProvider = StandardSuiteProvider> {
    _provider: PhantomData<fn() -> P>,
}

impl AuthenticatedCipher<StandardSuiteProvider> {
    pub fn new() -> Self {
        Self::with_provider()
    }
}

impl<P: CryptoProvider> AuthenticatedCipher<P> {
    pub fn with_provider() -> Self {
        Self {
            _provider: PhantomData,
        }
    }

    /// Зашифровать payload сессионным ключом
    ///
    /// Каждый вызов расходует одно значение из бюджета nonce ключа.
    ///
    /// # Returns
    /// `nonce || ciphertext || tag`
    pub fn encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        key.reserve_nonce()?;
        self.seal(key.export_raw(), plaintext)
    }

    /// Расшифровать блоб, созданный [`Self::encrypt`]
    ///
    /// `IntegrityError` при несовпадении тега или если блоб короче 28 байт.
    pub fn decrypt(&self, key: &SessionKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.open(key.export_raw(), sealed)
    }

    /// Шифрование сырым ключом. Бюджет nonce здесь не учитывается:
    /// используется только для одноразовых ключей, выведенных из пароля.
    pub(crate) fn seal(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        P::fill_random(&mut nonce)?;

        let ciphertext = P::aead_encrypt(key, &nonce, plaintext)?;

        // Комбинируем nonce + ciphertext
        let mut result = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub(crate) fn open(&self, key: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < MIN_SEALED_LENGTH {
            return Err(CryptoError::IntegrityError);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        P::aead_decrypt(key, nonce, ciphertext)
    }
}

impl<P: CryptoProvider> Default for AuthenticatedCipher<P> {
    fn default() -> Self {
        Self::with_provider()
    }
}

impl<P: CryptoProvider> Clone for AuthenticatedCipher<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: CryptoProvider> Copy for AuthenticatedCipher<P> {}

impl<P: CryptoProvider> fmt::Debug for AuthenticatedCipher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedCipher")
            .field("suite_id", &P::suite_id())
            .finish()
    }
}
