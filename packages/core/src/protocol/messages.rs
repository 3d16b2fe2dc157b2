// Типы сообщений протокола передачи
// Ходят между пирами поверх любого транспорта (WebRTC data channel, WebSocket)

use crate::crypto::session_key::KeyProtection;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Предложение файла получателю
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferData {
    /// UUID v4 идентификатор файла (общий для всех получателей)
    pub file_id: Uuid,
    pub name: String,
    /// Заявленный размер открытого текста в байтах
    pub size: u64,
    pub mime_type: Option<String>,
    /// Размер чанка открытого текста
    pub chunk_size: u32,
    /// Каким путём разворачивать wrapped_key
    pub protection: KeyProtection,
    /// Обёрнутый сессионный ключ этого получателя
    #[serde(with = "serde_bytes")]
    pub wrapped_key: Vec<u8>,
}

/// Ссылка на передачу без дополнительных данных
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRefData {
    pub file_id: Uuid,
}

/// Зашифрованный чанк: iv(12) || ciphertext || tag(16)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    pub file_id: Uuid,
    pub sequence_index: u64,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Отправитель закончил поток чанков
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteData {
    pub file_id: Uuid,
    pub chunk_count: u64,
    pub total_size: u64,
}

/// Отмена или аварийное завершение с любой стороны
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelData {
    pub file_id: Uuid,
    /// Причина ошибки; `None` - обычная отмена пользователем
    pub reason: Option<String>,
}

/// Сообщения протокола передачи (пир <-> пир)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum TransferMessage {
    Offer(OfferData),
    Accept(FileRefData),
    Reject(FileRefData),
    Chunk(ChunkData),
    Complete(CompleteData),
    Cancel(CancelData),
}

impl TransferMessage {
    pub fn file_id(&self) -> Uuid {
        match self {
            TransferMessage::Offer(data) => data.file_id,
            TransferMessage::Accept(data) | TransferMessage::Reject(data) => data.file_id,
            TransferMessage::Chunk(data) => data.file_id,
            TransferMessage::Complete(data) => data.file_id,
            TransferMessage::Cancel(data) => data.file_id,
        }
    }

    /// Короткое имя для логов
    pub fn kind(&self) -> &'static str {
        match self {
            TransferMessage::Offer(_) => "offer",
            TransferMessage::Accept(_) => "accept",
            TransferMessage::Reject(_) => "reject",
            TransferMessage::Chunk(_) => "chunk",
            TransferMessage::Complete(_) => "complete",
            TransferMessage::Cancel(_) => "cancel",
        }
    }
}

// Debug без ключевого материала и шифротекста

impl fmt::Debug for OfferData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfferData")
            .field("file_id", &self.file_id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("chunk_size", &self.chunk_size)
            .field("protection", &self.protection)
            .field("wrapped_key_len", &self.wrapped_key.len())
            .finish()
    }
}

impl fmt::Debug for ChunkData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkData")
            .field("file_id", &self.file_id)
            .field("sequence_index", &self.sequence_index)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}
