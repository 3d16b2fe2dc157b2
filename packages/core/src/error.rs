// Ошибки криптографического слоя
//
// Сообщения об ошибках никогда не содержат ключевой материал,
// пароли или шифротекст - только длины и названия операций.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Источник энтропии или алгоритм недоступен
    #[error("Failed to generate keys: {0}")]
    KeyGenerationError(String),

    /// Неверная кодировка ключа или неподдерживаемые параметры алгоритма
    #[error("Invalid key format: {0}")]
    KeyFormatError(String),

    /// Тег аутентификации не прошёл проверку.
    /// Покрывает и повреждение данных, и неверный пароль - намеренно неразличимо.
    #[error("Integrity check failed")]
    IntegrityError,

    #[error("Invalid input: {0}")]
    InvalidInputError(String),

    /// Ключ исчерпал лимит шифрований со случайным 96-битным nonce
    #[error("Nonce budget exhausted after {0} encryptions under one key")]
    NonceBudgetExhausted(u64),
}

impl From<aes_gcm::Error> for CryptoError {
    fn from(_: aes_gcm::Error) -> Self {
        // aes_gcm::Error намеренно непрозрачен
        CryptoError::IntegrityError
    }
}

impl From<rand::Error> for CryptoError {
    fn from(err: rand::Error) -> Self {
        CryptoError::KeyGenerationError(err.to_string()) // General RNG error
    }
}

impl From<rsa::pkcs8::spki::Error> for CryptoError {
    fn from(err: rsa::pkcs8::spki::Error) -> Self {
        CryptoError::KeyFormatError(err.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::KeyFormatError(format!("Base64 decode failed: {}", err))
    }
}

impl From<rsa::Error> for CryptoError {
    fn from(err: rsa::Error) -> Self {
        CryptoError::KeyGenerationError(err.to_string())
    }
}
