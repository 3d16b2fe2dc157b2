//! Криптографические наборы (Crypto Suites)
//!
//! Этот модуль содержит реализации CryptoProvider trait.
//!
//! ## Доступные наборы
//!
//! ### Standard Suite (текущий)
//! - **Asymmetric**: RSA-OAEP, SHA-256 (по умолчанию 2048 бит)
//! - **AEAD**: AES-128-GCM, 96-битный nonce
//! - **KDF**: PBKDF2-HMAC-SHA256
//! - **Suite ID**: 1
//!
//! Совместим по форматам с WebCrypto: SPKI для публичных ключей,
//! `iv || ciphertext || tag` для AES-GCM.
//!
//! ## Выбор suite
//!
//! ```rust,ignore
//! use zerohub_core::crypto::suites::standard::StandardSuiteProvider;
//! use zerohub_core::crypto::provider::CryptoProvider;
//!
//! type MySuite = StandardSuiteProvider;
//!
//! let (private_key, public_key) = MySuite::generate_asymmetric_keys(2048)?;
//! ```

pub mod standard;
