//! Сессионные ключи и их обмен
//!
//! На каждую пару (файл, пир) генерируется свежий AES-128 ключ. Получателю
//! он передаётся в одном из двух видов:
//!
//! - `WrappedKey::ByPublicKey` - RSA-OAEP шифротекст сырых 16 байт ключа,
//!   длина равна размеру модуля получателя;
//! - `WrappedKey::ByPassword` - `salt(16) || iv(12) || ciphertext || tag(16)`.
//!
//! Сам блоб не описывает свой вид, поэтому на проводе рядом с ним
//! всегда едет [`KeyProtection`].

use crate::config::{CryptoConfig, MAX_ENCRYPTIONS_PER_KEY, SESSION_KEY_LENGTH};
use crate::crypto::keys::{AsymmetricKeyPair, PeerPublicKey};
use crate::crypto::password::PasswordKeyDerivation;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::suites::standard::StandardSuiteProvider;
use crate::error::CryptoError;
use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Сырой 128-битный ключ одной передачи
///
/// Принадлежит ровно одной записи передачи, не клонируется,
/// обнуляется при drop.
pub struct SessionKey {
    bytes: Zeroizing<[u8; SESSION_KEY_LENGTH]>,
    /// Сколько шифрований уже сделано этим ключом (бюджет nonce)
    encryptions: AtomicU64,
}

impl SessionKey {
    pub fn generate<P: CryptoProvider>() -> std::result::Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_LENGTH]);
        P::fill_random(&mut *bytes)?;
        Ok(Self {
            bytes,
            encryptions: AtomicU64::new(0),
        })
    }

    /// Импортировать сырые байты ключа
    ///
    /// `KeyFormatError`, если длина не 16 байт.
    pub fn from_bytes(raw: &[u8]) -> std::result::Result<Self, CryptoError> {
        if raw.len() != SESSION_KEY_LENGTH {
            return Err(CryptoError::KeyFormatError(format!(
                "Session key must be {} bytes, got {}",
                SESSION_KEY_LENGTH,
                raw.len()
            )));
        }

        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_LENGTH]);
        bytes.copy_from_slice(raw);
        Ok(Self {
            bytes,
            encryptions: AtomicU64::new(0),
        })
    }

    /// Сырые байты ключа (ключ extractable для wrap)
    pub fn export_raw(&self) -> &[u8] {
        &self.bytes[..]
    }

    pub fn encryptions(&self) -> u64 {
        self.encryptions.load(Ordering::Relaxed)
    }

    /// Зарезервировать одно шифрование из бюджета
    pub(crate) fn reserve_nonce(&self) -> std::result::Result<(), CryptoError> {
        self.encryptions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < MAX_ENCRYPTIONS_PER_KEY).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| CryptoError::NonceBudgetExhausted(MAX_ENCRYPTIONS_PER_KEY))
    }

    #[cfg(test)]
    pub(crate) fn set_encryptions(&self, used: u64) {
        self.encryptions.store(used, Ordering::Release);
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"<redacted>")
            .field("encryptions", &self.encryptions())
            .finish()
    }
}

/// Способ защиты сессионного ключа (едет в offer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyProtection {
    PublicKey,
    Password,
}

/// Обёрнутый сессионный ключ
#[derive(Clone, PartialEq, Eq)]
pub enum WrappedKey {
    ByPublicKey(Vec<u8>),
    ByPassword(Vec<u8>),
}

impl WrappedKey {
    pub fn from_parts(protection: KeyProtection, blob: Vec<u8>) -> Self {
        match protection {
            KeyProtection::PublicKey => WrappedKey::ByPublicKey(blob),
            KeyProtection::Password => WrappedKey::ByPassword(blob),
        }
    }

    pub fn protection(&self) -> KeyProtection {
        match self {
            WrappedKey::ByPublicKey(_) => KeyProtection::PublicKey,
            WrappedKey::ByPassword(_) => KeyProtection::Password,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WrappedKey::ByPublicKey(blob) | WrappedKey::ByPassword(blob) => blob,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WrappedKey::ByPublicKey(blob) | WrappedKey::ByPassword(blob) => blob,
        }
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Только вид и длина, без содержимого
        f.debug_struct("WrappedKey")
            .field("protection", &self.protection())
            .field("len", &self.as_bytes().len())
            .finish()
    }
}

/// Генерация и wrap/unwrap сессионных ключей
pub struct KeyExchange<P: CryptoProvider = StandardSuiteProvider> {
    password: PasswordKeyDerivation<P>,
}

impl KeyExchange<StandardSuiteProvider> {
    pub fn new(config: &CryptoConfig) -> Self {
        Self::with_provider(config)
    }
}

impl<P: CryptoProvider> KeyExchange<P> {
    pub fn with_provider(config: &CryptoConfig) -> Self {
        Self {
            password: PasswordKeyDerivation::from_config(config),
        }
    }

    pub fn password_derivation(&self) -> &PasswordKeyDerivation<P> {
        &self.password
    }

    /// Свежий AES-128 ключ для одной передачи
    pub fn generate_session_key(&self) -> std::result::Result<SessionKey, CryptoError> {
        SessionKey::generate::<P>()
    }

    /// Зашифровать сессионный ключ публичным ключом получателя (RSA-OAEP)
    pub fn wrap_key_with_public_key(
        &self,
        public_key: &PeerPublicKey<P>,
        session_key: &SessionKey,
    ) -> std::result::Result<WrappedKey, CryptoError> {
        let blob = P::asymmetric_encrypt(public_key.inner(), session_key.export_raw())?;

        debug!(
            target: "crypto::session_key",
            modulus_bits = public_key.modulus_bits(),
            blob_len = blob.len(),
            "Session key wrapped with public key"
        );

        Ok(WrappedKey::ByPublicKey(blob))
    }

    /// Расшифровать сессионный ключ своим приватным ключом
    ///
    /// `KeyFormatError` если длина блоба не равна размеру модуля или
    /// восстановленный ключ не 16 байт, `IntegrityError` если OAEP не сошёлся.
    pub fn unwrap_key_with_private_key(
        &self,
        identity: &AsymmetricKeyPair<P>,
        blob: &[u8],
    ) -> std::result::Result<SessionKey, CryptoError> {
        let expected = P::ciphertext_len(identity.private_key());
        if blob.len() != expected {
            return Err(CryptoError::KeyFormatError(format!(
                "Wrapped key must be {} bytes for this identity, got {}",
                expected,
                blob.len()
            )));
        }

        let raw = P::asymmetric_decrypt(identity.private_key(), blob)?;
        SessionKey::from_bytes(&raw)
    }

    /// Зашифровать сессионный ключ паролем
    pub fn wrap_key_with_password(
        &self,
        session_key: &SessionKey,
        password: &str,
    ) -> std::result::Result<WrappedKey, CryptoError> {
        let blob = self.password.wrap_key(session_key, password)?;

        debug!(
            target: "crypto::session_key",
            iterations = self.password.iterations(),
            blob_len = blob.len(),
            "Session key wrapped with password"
        );

        Ok(WrappedKey::ByPassword(blob))
    }

    pub fn unwrap_key_with_password(
        &self,
        blob: &[u8],
        password: &str,
    ) -> std::result::Result<SessionKey, CryptoError> {
        self.password.unwrap_key(blob, password)
    }

    /// Unwrap любого вида: путь выбирается по варианту `WrappedKey`
    pub fn unwrap(
        &self,
        identity: &AsymmetricKeyPair<P>,
        wrapped: &WrappedKey,
        password: Option<&str>,
    ) -> std::result::Result<SessionKey, CryptoError> {
        let result = match (wrapped, password) {
            (WrappedKey::ByPublicKey(blob), _) => self.unwrap_key_with_private_key(identity, blob),
            (WrappedKey::ByPassword(blob), Some(password)) => {
                self.unwrap_key_with_password(blob, password)
            }
            (WrappedKey::ByPassword(_), None) => Err(CryptoError::InvalidInputError(
                "Password required to unwrap this key".to_string(),
            )),
        };

        if let Err(e) = &result {
            warn!(
                target: "crypto::session_key",
                protection = ?wrapped.protection(),
                error = %e,
                "Session key unwrap failed"
            );
        }

        result
    }

    /// То же, что [`Self::unwrap`], но в blocking пуле tokio:
    /// RSA decrypt и PBKDF2 слишком тяжёлые для async потока.
    pub async fn unwrap_blocking(
        &self,
        identity: Arc<AsymmetricKeyPair<P>>,
        wrapped: WrappedKey,
        password: Option<Zeroizing<String>>,
    ) -> Result<SessionKey> {
        let exchange = self.clone();
        let key = tokio::task::spawn_blocking(move || {
            exchange.unwrap(&identity, &wrapped, password.as_deref().map(String::as_str))
        })
        .await??;
        Ok(key)
    }

    /// Сгенерировать и обернуть ключ для одного получателя в blocking пуле
    pub async fn mint_wrapped_blocking(
        &self,
        recipient: PeerPublicKey<P>,
        password: Option<Zeroizing<String>>,
    ) -> Result<(SessionKey, WrappedKey)> {
        let exchange = self.clone();
        let minted = tokio::task::spawn_blocking(move || {
            let session_key = exchange.generate_session_key()?;
            let wrapped = match password.as_deref() {
                Some(password) => exchange.wrap_key_with_password(&session_key, password)?,
                None => exchange.wrap_key_with_public_key(&recipient, &session_key)?,
            };
            Ok::<_, CryptoError>((session_key, wrapped))
        })
        .await??;
        Ok(minted)
    }
}

impl<P: CryptoProvider> Clone for KeyExchange<P> {
    fn clone(&self) -> Self {
        Self {
            password: self.password.clone(),
        }
    }
}

impl<P: CryptoProvider> fmt::Debug for KeyExchange<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchange")
            .field("suite_id", &P::suite_id())
            .field("pbkdf2_iterations", &self.password.iterations())
            .finish()
    }
}
