//! Централизованная конфигурация для ZeroHub Core
//!
//! Все константы и настройки передаются явно: в [`crate::crypto::session_key::KeyExchange`]
//! и [`crate::transfer::TransferEngine`] при создании. Глобального синглтона нет,
//! хранение настроек - ответственность внешнего слоя.

use crate::utils::error::{Result, ShareError};

// Compile-time константы форматов (wire-level, менять нельзя)

/// Длина соли PBKDF2 (в байтах)
pub const SALT_LENGTH: usize = 16;

/// Длина nonce для AES-GCM (в байтах)
pub const NONCE_LENGTH: usize = 12;

/// Размер GCM authentication tag (в байтах)
pub const GCM_TAG_LENGTH: usize = 16;

/// Длина сессионного ключа AES-128 (в байтах)
pub const SESSION_KEY_LENGTH: usize = 16;

/// Минимальный модуль RSA, который принимаем при импорте чужих ключей
pub const MIN_IMPORT_MODULUS_BITS: usize = 1024;

/// Лимит шифрований на один ключ со случайным 96-битным nonce (NIST SP 800-38D)
pub const MAX_ENCRYPTIONS_PER_KEY: u64 = 1 << 32;

/// Основная структура конфигурации
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub crypto: CryptoConfig,
    pub transfer: TransferConfig,
}

/// Криптографические параметры
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoConfig {
    /// PBKDF2: количество итераций для деривации ключа из пароля
    pub pbkdf2_iterations: u32,

    /// Размер модуля RSA для новых identity ключей (в битах)
    pub rsa_modulus_bits: usize,
}

/// Параметры передачи файлов (со стороны получателя и отправителя)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Принимать входящие файлы без подтверждения пользователя
    pub auto_accept: bool,

    /// Потолок размера для автоматического приёма (в байтах)
    pub auto_accept_max_size: u64,

    /// Максимальный заявленный размер, который получатель вообще примет (в байтах)
    pub max_accept_size: u64,

    /// Размер чанка открытого текста при отправке (в байтах)
    pub chunk_size: usize,

    /// Самый большой чанк, который примем из чужого offer (в байтах).
    /// Вместе с `reorder_window` ограничивает память буфера получателя.
    pub max_chunk_size: u32,

    /// Сколько чанков вперёд можно буферизовать при out-of-order доставке
    pub reorder_window: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 100_000,
            rsa_modulus_bits: 2048,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            auto_accept: true,
            auto_accept_max_size: 100 * 1024 * 1024, // 100 MiB
            max_accept_size: 2 * 1024 * 1024 * 1024, // 2 GiB
            chunk_size: 64 * 1024,
            max_chunk_size: 1024 * 1024, // 1 MiB
            reorder_window: 64,
        }
    }
}

impl Config {
    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Some(parsed) = env_value("PBKDF2_ITERATIONS") {
            config.crypto.pbkdf2_iterations = parsed;
        }

        if let Some(parsed) = env_value("RSA_MODULUS_BITS") {
            config.crypto.rsa_modulus_bits = parsed;
        }

        if let Some(parsed) = env_value("TRANSFER_CHUNK_SIZE") {
            config.transfer.chunk_size = parsed;
        }

        if let Some(parsed) = env_value("TRANSFER_MAX_CHUNK_SIZE") {
            config.transfer.max_chunk_size = parsed;
        }

        if let Some(parsed) = env_value("TRANSFER_MAX_ACCEPT_SIZE") {
            config.transfer.max_accept_size = parsed;
        }

        if let Some(parsed) = env_value("TRANSFER_AUTO_ACCEPT") {
            config.transfer.auto_accept = parsed;
        }

        if let Some(parsed) = env_value("TRANSFER_AUTO_ACCEPT_MAX_SIZE") {
            config.transfer.auto_accept_max_size = parsed;
        }

        if let Some(parsed) = env_value("TRANSFER_REORDER_WINDOW") {
            config.transfer.reorder_window = parsed;
        }

        config
    }

    /// Проверить согласованность значений
    ///
    /// # Errors
    ///
    /// Возвращает `ConfigError`, если значение делает передачу невозможной
    pub fn validate(&self) -> Result<()> {
        if self.crypto.pbkdf2_iterations == 0 {
            return Err(ShareError::ConfigError(
                "PBKDF2 iteration count must be positive".to_string(),
            ));
        }
        if self.crypto.rsa_modulus_bits < MIN_IMPORT_MODULUS_BITS {
            return Err(ShareError::ConfigError(format!(
                "RSA modulus must be at least {} bits",
                MIN_IMPORT_MODULUS_BITS
            )));
        }
        if self.transfer.chunk_size == 0 || u32::try_from(self.transfer.chunk_size).is_err() {
            return Err(ShareError::ConfigError(
                "Chunk size must be positive and fit in 32 bits".to_string(),
            ));
        }
        if self.transfer.chunk_size > self.transfer.max_chunk_size as usize {
            return Err(ShareError::ConfigError(format!(
                "Chunk size {} exceeds the accepted maximum {}",
                self.transfer.chunk_size, self.transfer.max_chunk_size
            )));
        }
        if self.transfer.reorder_window == 0 {
            return Err(ShareError::ConfigError(
                "Reorder window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.crypto.pbkdf2_iterations, 100_000);
        assert_eq!(config.crypto.rsa_modulus_bits, 2048);
        assert!(config.transfer.auto_accept);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wire_constants() {
        assert_eq!(SALT_LENGTH, 16);
        assert_eq!(NONCE_LENGTH, 12);
        assert_eq!(GCM_TAG_LENGTH, 16);
        assert_eq!(SESSION_KEY_LENGTH, 16);
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.reorder_window = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.chunk_size = 2 * 1024 * 1024;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.crypto.rsa_modulus_bits = 512;
        assert!(config.validate().is_err());
    }
}
