// Защита сессионного ключа паролем
// PBKDF2-HMAC-SHA256 для деривации ключа + AES-128-GCM для шифрования
//
// Формат блоба: salt(16) || iv(12) || ciphertext || tag(16)

use crate::config::{CryptoConfig, GCM_TAG_LENGTH, NONCE_LENGTH, SALT_LENGTH, SESSION_KEY_LENGTH};
use crate::crypto::cipher::AuthenticatedCipher;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_key::SessionKey;
use crate::crypto::suites::standard::StandardSuiteProvider;
use crate::error::CryptoError;
use std::fmt;
use zeroize::Zeroizing;

/// Минимальная длина wrapped-by-password блоба
pub const MIN_PASSWORD_BLOB_LENGTH: usize = SALT_LENGTH + NONCE_LENGTH + GCM_TAG_LENGTH;

/// Деривация ключа из пароля и wrap/unwrap сессионного ключа
pub struct PasswordKeyDerivation<P: CryptoProvider = StandardSuiteProvider> {
    iterations: u32,
    cipher: AuthenticatedCipher<P>,
}

impl PasswordKeyDerivation<StandardSuiteProvider> {
    pub fn new(iterations: u32) -> Self {
        Self::with_provider(iterations)
    }
}

impl<P: CryptoProvider> PasswordKeyDerivation<P> {
    pub fn with_provider(iterations: u32) -> Self {
        Self {
            iterations,
            cipher: AuthenticatedCipher::with_provider(),
        }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::with_provider(config.pbkdf2_iterations)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Деривировать 128-битный ключ из пароля
    ///
    /// # Arguments
    /// * `password` - Пользовательский пароль (UTF-8)
    /// * `salt` - Соль, ровно 16 байт
    pub fn derive_key(
        &self,
        password: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; SESSION_KEY_LENGTH]>, CryptoError> {
        if salt.len() != SALT_LENGTH {
            return Err(CryptoError::InvalidInputError(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_LENGTH,
                salt.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; SESSION_KEY_LENGTH]);
        P::pbkdf2_derive(password.as_bytes(), salt, self.iterations, &mut *key);

        Ok(key)
    }

    /// Генерировать случайную соль
    pub fn generate_salt() -> Result<[u8; SALT_LENGTH], CryptoError> {
        let mut salt = [0u8; SALT_LENGTH];
        P::fill_random(&mut salt)?;
        Ok(salt)
    }

    /// Зашифровать сессионный ключ паролем
    ///
    /// Каждый вызов берёт свежие соль и iv.
    pub fn wrap_key(&self, session_key: &SessionKey, password: &str) -> Result<Vec<u8>, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::InvalidInputError(
                "Password cannot be empty".to_string(),
            ));
        }

        let salt = Self::generate_salt()?;
        let derived = self.derive_key(password, &salt)?;
        let sealed = self.cipher.seal(&*derived, session_key.export_raw())?;

        // Комбинируем salt + (iv || ciphertext || tag)
        let mut result = Vec::with_capacity(SALT_LENGTH + sealed.len());
        result.extend_from_slice(&salt);
        result.extend_from_slice(&sealed);
        Ok(result)
    }

    /// Расшифровать сессионный ключ паролем
    ///
    /// Неверный пароль и повреждённый блоб неразличимы: оба `IntegrityError`.
    pub fn unwrap_key(&self, blob: &[u8], password: &str) -> Result<SessionKey, CryptoError> {
        if blob.len() < MIN_PASSWORD_BLOB_LENGTH {
            return Err(CryptoError::IntegrityError);
        }

        let (salt, sealed) = blob.split_at(SALT_LENGTH);
        let derived = self.derive_key(password, salt)?;
        let raw = Zeroizing::new(self.cipher.open(&*derived, sealed)?);

        SessionKey::from_bytes(&raw)
    }
}

impl<P: CryptoProvider> Clone for PasswordKeyDerivation<P> {
    fn clone(&self) -> Self {
        Self::with_provider(self.iterations)
    }
}

impl<P: CryptoProvider> fmt::Debug for PasswordKeyDerivation<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordKeyDerivation")
            .field("iterations", &self.iterations)
            .finish()
    }
}
