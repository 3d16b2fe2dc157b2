// Запись передачи одного файла одному пиру

use crate::crypto::session_key::{KeyProtection, SessionKey};
use crate::transfer::status::FileStatus;
use crate::utils::error::{Result, ShareError};
use crate::utils::time::current_timestamp_millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Метаданные файла, общие для всех получателей
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: Uuid,
    pub name: String,
    /// Размер открытого текста в байтах
    pub size: u64,
    pub mime_type: Option<String>,
}

impl FileMetadata {
    /// Новый файл со свежим UUID v4
    pub fn new(name: impl Into<String>, size: u64, mime_type: Option<String>) -> Self {
        Self {
            file_id: Uuid::new_v4(),
            name: name.into(),
            size,
            mime_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Снимок записи для UI
///
/// Только для чтения, без ключей и шифротекста.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub file_id: Uuid,
    pub peer_id: String,
    pub direction: Direction,
    pub metadata: FileMetadata,
    pub status: FileStatus,
    pub progress_percent: f64,
    pub bitrate_bytes_per_sec: f64,
    pub bytes_transferred: u64,
    /// Unix ms, сбрасывается при входе в Processing
    pub started_at: i64,
    pub error: Option<String>,
}

/// Состояние одной пары (файл, пир)
///
/// У каждой записи свой сессионный ключ; он удаляется (и обнуляется)
/// при переходе в терминальный статус.
#[derive(Debug)]
pub struct FileTransferRecord {
    metadata: FileMetadata,
    peer_id: String,
    direction: Direction,
    protection: KeyProtection,
    status: FileStatus,
    bytes_transferred: u64,
    progress_percent: f64,
    bitrate_bytes_per_sec: f64,
    start_time: Instant,
    started_at: i64,
    error: Option<String>,
    session_key: Option<SessionKey>,
}

impl FileTransferRecord {
    pub fn new(
        metadata: FileMetadata,
        peer_id: impl Into<String>,
        direction: Direction,
        protection: KeyProtection,
    ) -> Self {
        Self {
            metadata,
            peer_id: peer_id.into(),
            direction,
            protection,
            status: FileStatus::Pending,
            bytes_transferred: 0,
            progress_percent: 0.0,
            bitrate_bytes_per_sec: 0.0,
            start_time: Instant::now(),
            started_at: current_timestamp_millis(),
            error: None,
            session_key: None,
        }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn protection(&self) -> KeyProtection {
        self.protection
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    pub fn bitrate_bytes_per_sec(&self) -> f64 {
        self.bitrate_bytes_per_sec
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Ключ выдаётся записи ровно один раз
    pub fn set_session_key(&mut self, key: SessionKey) -> Result<()> {
        if self.session_key.is_some() || self.status.is_terminal() {
            return Err(ShareError::InternalError(
                "Session key already assigned to this transfer".to_string(),
            ));
        }
        self.session_key = Some(key);
        Ok(())
    }

    /// Запомнить ошибку без смены статуса (повторный ввод пароля)
    pub fn set_error_summary(&mut self, summary: Option<String>) {
        self.error = summary;
    }

    /// Перейти в новый статус
    ///
    /// `InvalidTransition` для всего, чего нет в таблице переходов.
    /// `Success` дополнительно требует 100% прогресса.
    pub fn transition(&mut self, next: FileStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ShareError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if next == FileStatus::Success && self.bytes_transferred != self.metadata.size {
            return Err(ShareError::IncompleteTransfer {
                received: self.bytes_transferred,
                declared: self.metadata.size,
            });
        }

        debug!(
            target: "transfer::record",
            file_id = %self.metadata.file_id,
            peer_id = %self.peer_id,
            from = ?self.status,
            to = ?next,
            "Status transition"
        );

        self.status = next;

        match next {
            FileStatus::Processing => {
                self.start_time = Instant::now();
                self.started_at = current_timestamp_millis();
                self.error = None;
                self.recompute();
            }
            FileStatus::Success => {
                self.recompute();
            }
            _ => {}
        }

        if next.is_terminal() {
            // Drop обнуляет ключ
            self.session_key = None;
        }

        Ok(())
    }

    /// Завершить запись ошибкой. Терминальные записи не трогает.
    pub fn fail(&mut self, err: &ShareError) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.error = Some(err.to_string());
        // Из любого нетерминального статуса в Error переход разрешён
        self.transition(FileStatus::Error).is_ok()
    }

    /// Отметить ещё `bytes` обработанных байт открытого текста
    pub fn record_progress(&mut self, bytes: u64) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(bytes);
        self.recompute();
    }

    fn recompute(&mut self) {
        let size = self.metadata.size;
        self.progress_percent = if size == 0 {
            // Пустой файл готов, как только началась обработка
            match self.status {
                FileStatus::Processing | FileStatus::Success => 100.0,
                _ => 0.0,
            }
        } else {
            (self.bytes_transferred as f64 / size as f64 * 100.0).min(100.0)
        };

        let elapsed = self.start_time.elapsed().max(Duration::from_millis(1));
        self.bitrate_bytes_per_sec = self.bytes_transferred as f64 / elapsed.as_secs_f64();
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            file_id: self.metadata.file_id,
            peer_id: self.peer_id.clone(),
            direction: self.direction,
            metadata: self.metadata.clone(),
            status: self.status,
            progress_percent: self.progress_percent,
            bitrate_bytes_per_sec: self.bitrate_bytes_per_sec,
            bytes_transferred: self.bytes_transferred,
            started_at: self.started_at,
            error: self.error.clone(),
        }
    }
}
