//! Реестр передач и точки входа для транспорта и UI
//!
//! # Поток сообщений
//!
//! ```text
//! Отправитель                                   Получатель
//!   send_file ── offer ─────────────────────────► deliver (Pending)
//!   (WaitingAccept)                               auto-accept или accept()
//!   deliver ◄─────────────────────────── accept ─ (Processing)
//!   (Processing)
//!   stream ──── chunk 0..n ─────────────────────► deliver (reorder, decrypt)
//!   (Success) ─ complete ───────────────────────► deliver (Success)
//! ```
//!
//! Каждая запись (файл, пир) живёт за своим async mutex; чанки одной записи
//! обрабатываются строго последовательно, разные записи - параллельно.

use crate::config::{Config, TransferConfig};
use crate::crypto::cipher::AuthenticatedCipher;
use crate::crypto::keys::KeyManager;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_key::KeyExchange;
use crate::crypto::suites::standard::StandardSuiteProvider;
use crate::protocol::messages::{CancelData, TransferMessage};
use crate::protocol::wire::{pack_message, unpack_message};
use crate::transfer::incoming::IncomingState;
use crate::transfer::outgoing::OutgoingState;
use crate::transfer::record::{FileTransferRecord, TransferSnapshot};
use crate::transfer::status::FileStatus;
use crate::utils::error::{Result, ShareError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Ключ записи: один файл, один пир
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferKey {
    pub file_id: Uuid,
    pub peer_id: String,
}

impl TransferKey {
    pub fn new(file_id: Uuid, peer_id: impl Into<String>) -> Self {
        Self {
            file_id,
            peer_id: peer_id.into(),
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file_id, self.peer_id)
    }
}

/// Исходящий блоб для транспорта
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundBlob {
    /// Кому доставить
    pub peer_id: String,
    /// MessagePack `TransferMessage`
    pub bytes: Vec<u8>,
}

impl fmt::Debug for OutboundBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundBlob")
            .field("peer_id", &self.peer_id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Сторона передачи со своим состоянием
#[derive(Debug)]
pub(crate) enum Side {
    Outgoing(OutgoingState),
    Incoming(IncomingState),
}

/// Запись вместе с состоянием стороны и каналом для UI
#[derive(Debug)]
pub(crate) struct Transfer {
    pub(crate) record: FileTransferRecord,
    pub(crate) side: Side,
    updates: watch::Sender<TransferSnapshot>,
}

impl Transfer {
    /// Разослать свежий снимок подписчикам
    pub(crate) fn publish(&self) {
        self.updates.send_replace(self.record.snapshot());
    }

    /// Перевести в Error и выбросить буферы. `false`, если запись уже завершена.
    pub(crate) fn fail(&mut self, err: &ShareError) -> bool {
        let failed = self.record.fail(err);
        if failed {
            self.discard();
            self.publish();
        }
        failed
    }

    /// Завершить запись ошибкой и подготовить `Cancel` с причиной для пира
    ///
    /// `None`, если запись уже была в терминальном статусе.
    pub(crate) fn abort(&mut self, err: &ShareError) -> Option<Notice> {
        if !self.fail(err) {
            return None;
        }

        let file_id = self.record.metadata().file_id;
        warn!(
            target: "transfer::engine",
            file_id = %file_id,
            peer_id = %self.record.peer_id(),
            error = %err,
            "Transfer failed"
        );

        Some(Notice::new(
            self.record.peer_id(),
            TransferMessage::Cancel(CancelData {
                file_id,
                reason: Some(err.to_string()),
            }),
        ))
    }

    pub(crate) fn discard(&mut self) {
        if let Side::Incoming(state) = &mut self.side {
            state.discard();
        }
    }

    pub(crate) fn incoming_mut(&mut self) -> Result<&mut IncomingState> {
        match &mut self.side {
            Side::Incoming(state) => Ok(state),
            Side::Outgoing(_) => Err(ShareError::InvalidRequest(
                "Transfer is outgoing".to_string(),
            )),
        }
    }

    pub(crate) fn outgoing(&self) -> Result<&OutgoingState> {
        match &self.side {
            Side::Outgoing(state) => Ok(state),
            Side::Incoming(_) => Err(ShareError::InvalidRequest(
                "Transfer is incoming".to_string(),
            )),
        }
    }
}

/// Сообщение пиру, которое уходит уже после освобождения замка записи
#[derive(Debug)]
pub(crate) struct Notice {
    peer_id: String,
    message: TransferMessage,
}

impl Notice {
    pub(crate) fn new(peer_id: impl Into<String>, message: TransferMessage) -> Self {
        Self {
            peer_id: peer_id.into(),
            message,
        }
    }
}

/// Ручка записи в реестре
#[derive(Debug, Clone)]
pub(crate) struct TransferHandle {
    pub(crate) transfer: Arc<Mutex<Transfer>>,
    /// Кооперативный флаг остановки, проверяется между чанками
    pub(crate) cancel: Arc<AtomicBool>,
    updates: watch::Receiver<TransferSnapshot>,
}

impl TransferHandle {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

pub(super) struct EngineInner<P: CryptoProvider> {
    pub(super) config: TransferConfig,
    pub(super) keys: KeyManager<P>,
    pub(super) key_exchange: KeyExchange<P>,
    pub(super) cipher: AuthenticatedCipher<P>,
    transfers: RwLock<HashMap<TransferKey, TransferHandle>>,
    outbound: mpsc::Sender<OutboundBlob>,
}

/// Движок передачи файлов
///
/// Клонируется дёшево, все клоны работают с одним реестром.
pub struct TransferEngine<P: CryptoProvider = StandardSuiteProvider> {
    pub(super) inner: Arc<EngineInner<P>>,
}

impl TransferEngine<StandardSuiteProvider> {
    pub fn new(
        config: Config,
        keys: KeyManager,
        outbound: mpsc::Sender<OutboundBlob>,
    ) -> Result<Self> {
        Self::with_provider(config, keys, outbound)
    }
}

impl<P: CryptoProvider> TransferEngine<P> {
    /// Собрать движок с явной конфигурацией
    ///
    /// Исходящие сообщения уходят в `outbound`; входящие передаются в
    /// [`Self::deliver`].
    pub fn with_provider(
        config: Config,
        keys: KeyManager<P>,
        outbound: mpsc::Sender<OutboundBlob>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                key_exchange: KeyExchange::with_provider(&config.crypto),
                config: config.transfer,
                keys,
                cipher: AuthenticatedCipher::with_provider(),
                transfers: RwLock::new(HashMap::new()),
                outbound,
            }),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.inner.config
    }

    pub fn key_manager(&self) -> &KeyManager<P> {
        &self.inner.keys
    }

    /// Обработать блоб, пришедший от транспорта
    ///
    /// # Errors
    ///
    /// - `SerializationError` для битого блоба
    /// - `NotFound` для сообщений о неизвестных передачах
    /// - ошибки конкретного шага (размер, целостность, порядок чанков)
    pub async fn deliver(&self, from_peer: &str, blob: &[u8]) -> Result<()> {
        let message = match unpack_message(blob) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    target: "transfer::engine",
                    peer_id = %from_peer,
                    blob_len = blob.len(),
                    error = %e,
                    "Dropping malformed blob"
                );
                return Err(e);
            }
        };

        trace!(
            target: "transfer::engine",
            peer_id = %from_peer,
            file_id = %message.file_id(),
            kind = message.kind(),
            "Message delivered"
        );

        match message {
            TransferMessage::Offer(offer) => self.on_offer(from_peer, offer).await,
            TransferMessage::Accept(data) => self.on_accept(from_peer, data.file_id).await,
            TransferMessage::Reject(data) => self.on_reject(from_peer, data.file_id).await,
            TransferMessage::Chunk(chunk) => self.on_chunk(from_peer, chunk).await,
            TransferMessage::Complete(data) => self.on_complete(from_peer, data).await,
            TransferMessage::Cancel(data) => self.on_cancel(from_peer, data).await,
        }
    }

    /// Отменить передачу
    ///
    /// Ставит флаг остановки и дожидается конца текущего чанка.
    /// `CancelledError`, если запись уже отменена.
    pub async fn cancel(&self, key: &TransferKey) -> Result<()> {
        let handle = self.handle(key).await?;

        {
            let mut transfer = handle.transfer.lock().await;
            match transfer.record.status() {
                FileStatus::Cancelled => return Err(ShareError::CancelledError),
                status if status.is_terminal() => {
                    return Err(ShareError::InvalidTransition {
                        from: status,
                        to: FileStatus::Cancelled,
                    })
                }
                _ => {}
            }

            handle.cancel.store(true, Ordering::Release);
            transfer.record.transition(FileStatus::Cancelled)?;
            transfer.discard();
            transfer.publish();
        }

        debug!(
            target: "transfer::engine",
            file_id = %key.file_id,
            peer_id = %key.peer_id,
            "Transfer cancelled locally"
        );

        self.send_notice(Notice::new(
            key.peer_id.as_str(),
            TransferMessage::Cancel(CancelData {
                file_id: key.file_id,
                reason: None,
            }),
        ))
        .await
    }

    /// Подписаться на снимки записи
    pub async fn subscribe(&self, key: &TransferKey) -> Result<watch::Receiver<TransferSnapshot>> {
        Ok(self.handle(key).await?.updates)
    }

    pub async fn snapshot(&self, key: &TransferKey) -> Result<TransferSnapshot> {
        let handle = self.handle(key).await?;
        let snapshot = handle.updates.borrow().clone();
        Ok(snapshot)
    }

    /// Снимки всех записей
    pub async fn snapshots(&self) -> Vec<TransferSnapshot> {
        let transfers = self.inner.transfers.read().await;
        transfers
            .values()
            .map(|handle| handle.updates.borrow().clone())
            .collect()
    }

    /// Удалить завершённую запись из реестра
    pub async fn forget(&self, key: &TransferKey) -> Result<()> {
        let handle = self.handle(key).await?;
        let status = handle.transfer.lock().await.record.status();
        if !status.is_terminal() {
            return Err(ShareError::InvalidRequest(format!(
                "Transfer {} is still {:?}",
                key, status
            )));
        }

        self.inner.transfers.write().await.remove(key);
        Ok(())
    }

    pub(crate) async fn register(
        &self,
        key: TransferKey,
        record: FileTransferRecord,
        side: Side,
    ) -> Result<TransferHandle> {
        let (tx, rx) = watch::channel(record.snapshot());
        let handle = TransferHandle {
            transfer: Arc::new(Mutex::new(Transfer {
                record,
                side,
                updates: tx,
            })),
            cancel: Arc::new(AtomicBool::new(false)),
            updates: rx,
        };

        let mut transfers = self.inner.transfers.write().await;
        if transfers.contains_key(&key) {
            return Err(ShareError::InvalidRequest(format!(
                "Transfer {} already registered",
                key
            )));
        }
        transfers.insert(key, handle.clone());
        Ok(handle)
    }

    pub(crate) async fn handle(&self, key: &TransferKey) -> Result<TransferHandle> {
        self.inner
            .transfers
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ShareError::NotFound(format!("Transfer {}", key)))
    }

    pub(crate) async fn send_message(&self, peer_id: &str, message: &TransferMessage) -> Result<()> {
        let bytes = pack_message(message)?;
        self.inner
            .outbound
            .send(OutboundBlob {
                peer_id: peer_id.to_string(),
                bytes,
            })
            .await
            .map_err(|_| ShareError::TransportError("Outbound channel closed".to_string()))
    }

    pub(crate) async fn send_notice(&self, notice: Notice) -> Result<()> {
        self.send_message(&notice.peer_id, &notice.message).await
    }

    /// Отправить подготовленный `Cancel` (замок записи уже отпущен) и вернуть ошибку
    pub(crate) async fn report_failure(&self, notice: Option<Notice>, err: ShareError) -> Result<()> {
        if let Some(notice) = notice {
            if let Err(send_err) = self.send_notice(notice).await {
                warn!(
                    target: "transfer::engine",
                    error = %send_err,
                    "Could not notify peer about failure"
                );
            }
        }
        Err(err)
    }

    /// Захватить запись, перевести в Error, отпустить и сообщить пиру
    pub(crate) async fn abort(&self, handle: &TransferHandle, err: ShareError) -> Result<()> {
        let notice = handle.transfer.lock().await.abort(&err);
        self.report_failure(notice, err).await
    }
}

impl<P: CryptoProvider> Clone for TransferEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: CryptoProvider> fmt::Debug for TransferEngine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEngine")
            .field("config", &self.inner.config)
            .field("keys", &self.inner.keys)
            .finish()
    }
}
