// ZeroHub Share Core
// Rust engine for end-to-end encrypted peer-to-peer file transfer

#![warn(clippy::all)]

// Модули
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod transfer;
pub mod utils;

// Re-exports для удобства
pub use config::{Config, CryptoConfig, TransferConfig};
pub use crypto::cipher::AuthenticatedCipher;
pub use crypto::keys::{AsymmetricKeyPair, KeyManager, PeerIdentity, PeerPublicKey};
pub use crypto::password::PasswordKeyDerivation;
pub use crypto::session_key::{KeyExchange, KeyProtection, SessionKey, WrappedKey};
pub use crypto::suites::standard::StandardSuiteProvider;
pub use crypto::CryptoProvider;
pub use error::CryptoError;
pub use transfer::{
    Direction, FileMetadata, FileStatus, OutboundBlob, SendProtection, TransferEngine,
    TransferKey, TransferSnapshot,
};
pub use utils::error::{Result, ShareError};
