//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransferEngine (transfer)                 │
//! │  - Одна запись = один (файл, пир)                           │
//! │  - Шифрует/расшифровывает чанки                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 KeyExchange (session_key)                   │
//! │  - Свежий AES-128 ключ на каждую передачу                   │
//! │  - Wrap публичным ключом или паролем                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        ▼                     ▼                     ▼
//! ┌──────────────┐  ┌─────────────────────┐  ┌──────────────────┐
//! │ KeyManager   │  │ AuthenticatedCipher │  │ PasswordKey      │
//! │ (keys)       │  │ (cipher)            │  │ Derivation       │
//! │ RSA-OAEP     │  │ iv||ct||tag         │  │ (password)       │
//! └──────────────┘  └─────────────────────┘  └──────────────────┘
//!        │                     │                     │
//!        └─────────────────────┼─────────────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CryptoProvider (Crypto-Agility)                │
//! │  - Asymmetric (RSA-OAEP SHA-256)                            │
//! │  - AEAD (AES-128-GCM)                                       │
//! │  - KDF (PBKDF2-HMAC-SHA256)                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! ### Core Traits
//! - [`provider`]: CryptoProvider trait для crypto-agility
//!
//! ### Implementations
//! - [`suites`]: Реализации CryptoProvider (Standard)
//!
//! ### Building blocks
//! - [`cipher`]: AuthenticatedCipher для чанков и wrap паролем
//! - [`password`]: PBKDF2 деривация и wrap/unwrap паролем
//! - [`keys`]: KeyManager для identity ключей, импорт/экспорт SPKI
//! - [`session_key`]: Сессионные ключи и KeyExchange

// ============================================================================
// Core Traits
// ============================================================================

/// CryptoProvider trait для crypto-agility
pub mod provider;

// ============================================================================
// Implementations
// ============================================================================

/// Криптографические наборы
pub mod suites;

// ============================================================================
// Building blocks
// ============================================================================

pub mod cipher;

pub mod keys;

pub mod password;

pub mod session_key;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;

pub type SuiteID = u16;

/// Suite ID for the standard suite
pub const STANDARD_SUITE_ID: SuiteID = 1;
