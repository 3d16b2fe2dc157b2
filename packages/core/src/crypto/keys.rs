// Управление ключами
// Identity ключи RSA-OAEP, импорт/экспорт публичных ключей в SPKI (base64)

use crate::config::{CryptoConfig, MIN_IMPORT_MODULUS_BITS};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::suites::standard::StandardSuiteProvider;
use crate::error::CryptoError;
use crate::utils::b64;
use crate::utils::error::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Пара ключей для шифрования сессионных ключей
///
/// Приватная часть никогда не сериализуется и не попадает в `Debug`.
pub struct AsymmetricKeyPair<P: CryptoProvider = StandardSuiteProvider> {
    private_key: P::AsymmetricPrivateKey,
    public_key: P::AsymmetricPublicKey,
}

impl<P: CryptoProvider> AsymmetricKeyPair<P> {
    /// Сгенерировать новую пару
    ///
    /// Блокирующая операция (сотни миллисекунд для 2048 бит), из async кода
    /// вызывать через [`KeyManager::generate`].
    pub fn generate(modulus_bits: usize) -> std::result::Result<Self, CryptoError> {
        if modulus_bits < MIN_IMPORT_MODULUS_BITS {
            return Err(CryptoError::KeyGenerationError(format!(
                "Modulus of {} bits is below the {} bit minimum",
                modulus_bits, MIN_IMPORT_MODULUS_BITS
            )));
        }

        let (private_key, public_key) = P::generate_asymmetric_keys(modulus_bits)?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Собрать пару из существующего приватного ключа
    pub fn from_private_key(private_key: P::AsymmetricPrivateKey) -> Self {
        let public_key = P::public_key_from_private(&private_key);
        Self {
            private_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> PeerPublicKey<P> {
        PeerPublicKey {
            inner: self.public_key.clone(),
        }
    }

    pub(crate) fn private_key(&self) -> &P::AsymmetricPrivateKey {
        &self.private_key
    }

    pub fn modulus_bits(&self) -> usize {
        P::modulus_bits(&self.public_key)
    }

    /// Экспортировать публичную часть (base64 от SPKI DER)
    pub fn export_public_key(&self) -> std::result::Result<String, CryptoError> {
        self.public_key().to_base64()
    }
}

impl<P: CryptoProvider> fmt::Debug for AsymmetricKeyPair<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricKeyPair")
            .field("modulus_bits", &self.modulus_bits())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Публичный ключ пира, годный только для шифрования
pub struct PeerPublicKey<P: CryptoProvider = StandardSuiteProvider> {
    inner: P::AsymmetricPublicKey,
}

impl<P: CryptoProvider> PeerPublicKey<P> {
    pub fn from_inner(inner: P::AsymmetricPublicKey) -> Self {
        Self { inner }
    }

    /// Импортировать ключ из base64 SPKI
    ///
    /// `KeyFormatError` при битом base64/DER, чужом алгоритме или модуле
    /// меньше 1024 бит.
    pub fn from_base64(encoded: &str) -> std::result::Result<Self, CryptoError> {
        let der = b64::decode(encoded)?;
        Self::from_spki(&der)
    }

    pub fn from_spki(der: &[u8]) -> std::result::Result<Self, CryptoError> {
        let inner = P::public_key_from_spki(der)?;

        let bits = P::modulus_bits(&inner);
        if bits < MIN_IMPORT_MODULUS_BITS {
            return Err(CryptoError::KeyFormatError(format!(
                "Modulus of {} bits is below the {} bit minimum",
                bits, MIN_IMPORT_MODULUS_BITS
            )));
        }

        Ok(Self { inner })
    }

    pub fn to_spki(&self) -> std::result::Result<Vec<u8>, CryptoError> {
        P::public_key_to_spki(&self.inner)
    }

    pub fn to_base64(&self) -> std::result::Result<String, CryptoError> {
        Ok(b64::encode(&self.to_spki()?))
    }

    pub fn modulus_bits(&self) -> usize {
        P::modulus_bits(&self.inner)
    }

    pub fn inner(&self) -> &P::AsymmetricPublicKey {
        &self.inner
    }
}

impl<P: CryptoProvider> Clone for PeerPublicKey<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: CryptoProvider> fmt::Debug for PeerPublicKey<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerPublicKey")
            .field("modulus_bits", &self.modulus_bits())
            .finish()
    }
}

/// Пир, которому можно отправлять файлы
#[derive(Debug)]
pub struct PeerIdentity<P: CryptoProvider = StandardSuiteProvider> {
    pub peer_id: String,
    pub display_name: String,
    pub public_key: PeerPublicKey<P>,
}

impl<P: CryptoProvider> PeerIdentity<P> {
    pub fn new(peer_id: impl Into<String>, display_name: impl Into<String>, public_key: PeerPublicKey<P>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
            public_key,
        }
    }

    /// Пир из ключа, полученного out-of-band в base64
    pub fn from_base64(
        peer_id: impl Into<String>,
        display_name: impl Into<String>,
        encoded_public_key: &str,
    ) -> std::result::Result<Self, CryptoError> {
        let public_key = PeerPublicKey::from_base64(encoded_public_key)?;
        Ok(Self::new(peer_id, display_name, public_key))
    }
}

impl<P: CryptoProvider> Clone for PeerIdentity<P> {
    fn clone(&self) -> Self {
        Self {
            peer_id: self.peer_id.clone(),
            display_name: self.display_name.clone(),
            public_key: self.public_key.clone(),
        }
    }
}

/// Менеджер identity ключа процесса
///
/// После генерации пара только читается, поэтому делится через `Arc`
/// между параллельными unwrap.
pub struct KeyManager<P: CryptoProvider = StandardSuiteProvider> {
    identity: Arc<AsymmetricKeyPair<P>>,
}

impl<P: CryptoProvider> KeyManager<P> {
    /// Сгенерировать identity ключ в blocking пуле tokio
    pub async fn generate(config: &CryptoConfig) -> Result<Self> {
        let modulus_bits = config.rsa_modulus_bits;

        debug!(
            target: "crypto::keys",
            modulus_bits,
            "Generating identity key pair"
        );

        let pair =
            tokio::task::spawn_blocking(move || AsymmetricKeyPair::<P>::generate(modulus_bits))
                .await??;

        info!(
            target: "crypto::keys",
            modulus_bits = pair.modulus_bits(),
            "Identity key pair generated"
        );

        Ok(Self::from_key_pair(pair))
    }

    pub fn from_key_pair(pair: AsymmetricKeyPair<P>) -> Self {
        Self {
            identity: Arc::new(pair),
        }
    }

    pub fn from_shared(identity: Arc<AsymmetricKeyPair<P>>) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> Arc<AsymmetricKeyPair<P>> {
        Arc::clone(&self.identity)
    }

    pub fn public_key(&self) -> PeerPublicKey<P> {
        self.identity.public_key()
    }

    /// Base64 SPKI для передачи пирам out-of-band
    pub fn export_public_key(&self) -> std::result::Result<String, CryptoError> {
        self.identity.export_public_key()
    }

    /// Наша собственная карточка пира
    pub fn local_identity(&self, peer_id: impl Into<String>, display_name: impl Into<String>) -> PeerIdentity<P> {
        PeerIdentity::new(peer_id, display_name, self.public_key())
    }
}

impl<P: CryptoProvider> Clone for KeyManager<P> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
        }
    }
}

impl<P: CryptoProvider> fmt::Debug for KeyManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("identity", &self.identity)
            .finish()
    }
}
