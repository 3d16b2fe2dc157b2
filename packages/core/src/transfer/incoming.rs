// Принимающая сторона: offer, accept/reject, чанки, complete, отмена пиром

use crate::crypto::cipher::{AuthenticatedCipher, MIN_SEALED_LENGTH};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_key::{KeyProtection, WrappedKey};
use crate::protocol::messages::{CancelData, ChunkData, CompleteData, FileRefData, OfferData, TransferMessage};
use crate::transfer::engine::{Side, Transfer, TransferEngine, TransferHandle, TransferKey};
use crate::transfer::record::{Direction, FileMetadata, FileTransferRecord};
use crate::transfer::reorder::ReorderBuffer;
use crate::transfer::status::FileStatus;
use crate::utils::error::{Result, ShareError};
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace, warn};
use zeroize::{Zeroize, Zeroizing};

/// Состояние получателя: ключ до unwrap, буфер порядка, собранный файл
#[derive(Debug)]
pub(crate) struct IncomingState {
    wrapped_key: Option<WrappedKey>,
    /// Потолок длины одного зашифрованного чанка из offer
    max_sealed_len: u64,
    reorder: ReorderBuffer<Vec<u8>>,
    plaintext: Vec<u8>,
    chunks_decrypted: u64,
    announced: Option<CompleteData>,
}

impl IncomingState {
    pub(crate) fn new(wrapped_key: WrappedKey, chunk_size: u32, reorder_window: u32) -> Self {
        Self {
            wrapped_key: Some(wrapped_key),
            max_sealed_len: u64::from(chunk_size) + MIN_SEALED_LENGTH as u64,
            reorder: ReorderBuffer::new(reorder_window),
            plaintext: Vec::new(),
            chunks_decrypted: 0,
            announced: None,
        }
    }

    /// Принять зашифрованный чанк и расшифровать всё, что готово по порядку
    pub(crate) fn accept_chunk<P: CryptoProvider>(
        &mut self,
        record: &mut FileTransferRecord,
        cipher: &AuthenticatedCipher<P>,
        sequence_index: u64,
        ciphertext: Vec<u8>,
    ) -> Result<()> {
        // Окно держит не больше window * max_sealed_len байт
        let sealed_len = ciphertext.len() as u64;
        if sealed_len > self.max_sealed_len {
            return Err(ShareError::SizeExceededError {
                declared: sealed_len,
                max: self.max_sealed_len,
            });
        }

        if let Some(done) = &self.announced {
            if sequence_index >= done.chunk_count {
                return Err(ShareError::SequenceError {
                    expected: self.reorder.next_expected(),
                    got: sequence_index,
                    window: self.reorder.window(),
                });
            }
        }

        let declared = record.metadata().size;
        for sealed in self.reorder.insert(sequence_index, ciphertext)? {
            let plaintext = {
                let key = record.session_key().ok_or_else(|| {
                    ShareError::InternalError("Session key missing while receiving".to_string())
                })?;
                Zeroizing::new(cipher.decrypt(key, &sealed)?)
            };

            let received = (self.plaintext.len() + plaintext.len()) as u64;
            if received > declared {
                return Err(ShareError::SizeExceededError {
                    declared: received,
                    max: declared,
                });
            }

            self.plaintext.extend_from_slice(&plaintext);
            self.chunks_decrypted += 1;
            record.record_progress(plaintext.len() as u64);
        }
        Ok(())
    }

    /// Отправитель объявил конец потока
    pub(crate) fn announce_complete(
        &mut self,
        record: &FileTransferRecord,
        done: CompleteData,
    ) -> Result<()> {
        let declared = record.metadata().size;
        if done.total_size > declared {
            return Err(ShareError::SizeExceededError {
                declared: done.total_size,
                max: declared,
            });
        }
        if done.total_size < declared {
            return Err(ShareError::IncompleteTransfer {
                received: done.total_size,
                declared,
            });
        }
        if self.chunks_decrypted > done.chunk_count {
            return Err(ShareError::SequenceError {
                expected: done.chunk_count,
                got: self.chunks_decrypted,
                window: self.reorder.window(),
            });
        }

        self.announced = Some(done);
        Ok(())
    }

    /// Перейти в Success, если все объявленные чанки расшифрованы
    pub(crate) fn try_finish(&mut self, record: &mut FileTransferRecord) -> Result<bool> {
        let Some(done) = &self.announced else {
            return Ok(false);
        };
        if self.chunks_decrypted < done.chunk_count {
            return Ok(false);
        }

        record.transition(FileStatus::Success)?;
        Ok(true)
    }

    /// Выбросить недообработанные чанки и частичный файл
    pub(crate) fn discard(&mut self) {
        self.reorder.clear();
        self.plaintext.zeroize();
        self.wrapped_key = None;
    }

    pub(crate) fn take_plaintext(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.plaintext)
    }
}

impl<P: CryptoProvider> TransferEngine<P> {
    pub(crate) async fn on_offer(&self, from_peer: &str, offer: OfferData) -> Result<()> {
        let key = TransferKey::new(offer.file_id, from_peer);
        let metadata = FileMetadata {
            file_id: offer.file_id,
            name: offer.name,
            size: offer.size,
            mime_type: offer.mime_type,
        };
        let config = &self.inner.config;
        let record = FileTransferRecord::new(metadata, from_peer, Direction::Incoming, offer.protection);
        let wrapped = WrappedKey::from_parts(offer.protection, offer.wrapped_key);
        let side = Side::Incoming(IncomingState::new(
            wrapped,
            offer.chunk_size,
            config.reorder_window,
        ));
        let handle = self.register(key.clone(), record, side).await?;

        info!(
            target: "transfer::incoming",
            file_id = %key.file_id,
            peer_id = %from_peer,
            size = offer.size,
            chunk_size = offer.chunk_size,
            protection = ?offer.protection,
            "Offer received"
        );

        if offer.size > config.max_accept_size {
            let err = ShareError::SizeExceededError {
                declared: offer.size,
                max: config.max_accept_size,
            };
            return self.abort(&handle, err).await;
        }
        if offer.chunk_size == 0 || offer.chunk_size > config.max_chunk_size {
            let err = ShareError::InvalidRequest(format!(
                "Offer chunk size {} outside 1..={}",
                offer.chunk_size, config.max_chunk_size
            ));
            return self.abort(&handle, err).await;
        }

        // Пароль всегда вводит пользователь
        let auto_accept = config.auto_accept
            && offer.protection == KeyProtection::PublicKey
            && offer.size <= config.auto_accept_max_size;

        if auto_accept {
            debug!(
                target: "transfer::incoming",
                file_id = %key.file_id,
                peer_id = %from_peer,
                "Auto-accepting offer"
            );
            self.accept_record(&handle, FileStatus::Pending, None).await
        } else {
            let mut transfer = handle.transfer.lock().await;
            transfer.record.transition(FileStatus::WaitingAccept)?;
            transfer.publish();
            Ok(())
        }
    }

    /// Принять ожидающий файл
    ///
    /// Для файлов под паролем `password` обязателен. Неверный пароль
    /// возвращает `IntegrityError` и оставляет запись в `WaitingAccept`
    /// с текстом ошибки, чтобы можно было попробовать снова.
    /// `CancelledError`, если передачу уже отменили.
    pub async fn accept(&self, key: &TransferKey, password: Option<&str>) -> Result<()> {
        let handle = self.handle(key).await?;
        self.accept_record(&handle, FileStatus::WaitingAccept, password).await
    }

    async fn accept_record(
        &self,
        handle: &TransferHandle,
        expected: FileStatus,
        password: Option<&str>,
    ) -> Result<()> {
        let mut transfer = handle.transfer.lock().await;
        transfer.incoming_mut()?;

        let status = transfer.record.status();
        if status == FileStatus::Cancelled {
            return Err(ShareError::CancelledError);
        }
        if status != expected {
            return Err(ShareError::InvalidTransition {
                from: status,
                to: FileStatus::Processing,
            });
        }

        let file_id = transfer.record.metadata().file_id;
        let peer_id = transfer.record.peer_id().to_string();

        let wrapped = transfer.incoming_mut()?.wrapped_key.clone().ok_or_else(|| {
            ShareError::InternalError("Wrapped key already consumed".to_string())
        })?;
        let protection = wrapped.protection();

        // RSA и PBKDF2 в blocking пуле; исходящий канал здесь не трогаем
        let unwrapped = self
            .inner
            .key_exchange
            .unwrap_blocking(
                self.inner.keys.identity(),
                wrapped,
                password.map(|p| Zeroizing::new(p.to_string())),
            )
            .await;

        let session_key = match unwrapped {
            Ok(session_key) => session_key,
            Err(err) if status == FileStatus::WaitingAccept && protection == KeyProtection::Password => {
                // Остаёмся в WaitingAccept, пользователь может ввести пароль заново
                transfer.record.set_error_summary(Some(err.to_string()));
                transfer.publish();
                return Err(err);
            }
            Err(err) => {
                let notice = transfer.abort(&err);
                drop(transfer);
                return self.report_failure(notice, err).await;
            }
        };

        transfer.incoming_mut()?.wrapped_key = None;
        transfer.record.set_session_key(session_key)?;
        transfer.record.transition(FileStatus::Processing)?;
        transfer.publish();
        drop(transfer);

        info!(
            target: "transfer::incoming",
            file_id = %file_id,
            peer_id = %peer_id,
            "Offer accepted"
        );

        let accept = TransferMessage::Accept(FileRefData { file_id });
        if let Err(err) = self.send_message(&peer_id, &accept).await {
            return self.abort(handle, err).await;
        }
        Ok(())
    }

    /// Отказаться от ожидающего файла
    pub async fn reject(&self, key: &TransferKey) -> Result<()> {
        let handle = self.handle(key).await?;

        {
            let mut transfer = handle.transfer.lock().await;
            transfer.incoming_mut()?;
            if transfer.record.status() == FileStatus::Cancelled {
                return Err(ShareError::CancelledError);
            }

            transfer.record.transition(FileStatus::Cancelled)?;
            handle.cancel.store(true, Ordering::Release);
            transfer.discard();
            transfer.publish();
        }

        info!(
            target: "transfer::incoming",
            file_id = %key.file_id,
            peer_id = %key.peer_id,
            "Offer rejected"
        );

        let reject = TransferMessage::Reject(FileRefData {
            file_id: key.file_id,
        });
        self.send_message(&key.peer_id, &reject).await
    }

    /// Забрать собранный файл после `Success`
    ///
    /// `None`, пока передача не завершилась успешно или если файл уже забрали.
    /// `CancelledError` для отменённой передачи.
    pub async fn take_received(&self, key: &TransferKey) -> Result<Option<Vec<u8>>> {
        let handle = self.handle(key).await?;
        let mut transfer = handle.transfer.lock().await;
        match transfer.record.status() {
            FileStatus::Success => {}
            FileStatus::Cancelled => return Err(ShareError::CancelledError),
            _ => return Ok(None),
        }

        let plaintext = transfer.incoming_mut()?.take_plaintext();
        if plaintext.is_empty() && transfer.record.metadata().size > 0 {
            return Ok(None);
        }
        Ok(Some(plaintext))
    }

    pub(crate) async fn on_chunk(&self, from_peer: &str, chunk: ChunkData) -> Result<()> {
        let key = TransferKey::new(chunk.file_id, from_peer);
        let handle = self.handle(&key).await?;
        let mut transfer = handle.transfer.lock().await;

        let status = transfer.record.status();
        if handle.is_cancelled() || status.is_terminal() {
            trace!(
                target: "transfer::incoming",
                file_id = %key.file_id,
                peer_id = %from_peer,
                sequence_index = chunk.sequence_index,
                "Dropping chunk for finished transfer"
            );
            return Ok(());
        }
        if status != FileStatus::Processing {
            return Err(ShareError::InvalidTransition {
                from: status,
                to: FileStatus::Processing,
            });
        }

        let result = {
            let Transfer { record, side, .. } = &mut *transfer;
            match side {
                Side::Incoming(state) => state
                    .accept_chunk(record, &self.inner.cipher, chunk.sequence_index, chunk.ciphertext)
                    .and_then(|_| state.try_finish(record)),
                Side::Outgoing(_) => {
                    return Err(ShareError::InvalidRequest(
                        "Chunk delivered to an outgoing transfer".to_string(),
                    ))
                }
            }
        };

        match result {
            Ok(finished) => {
                transfer.publish();
                trace!(
                    target: "transfer::incoming",
                    file_id = %key.file_id,
                    peer_id = %from_peer,
                    sequence_index = chunk.sequence_index,
                    progress = transfer.record.progress_percent(),
                    "Chunk received"
                );
                if finished {
                    log_received(&transfer);
                }
                Ok(())
            }
            Err(err) => {
                let notice = transfer.abort(&err);
                drop(transfer);
                self.report_failure(notice, err).await
            }
        }
    }

    pub(crate) async fn on_complete(&self, from_peer: &str, done: CompleteData) -> Result<()> {
        let key = TransferKey::new(done.file_id, from_peer);
        let handle = self.handle(&key).await?;
        let mut transfer = handle.transfer.lock().await;

        let status = transfer.record.status();
        if handle.is_cancelled() || status.is_terminal() {
            return Ok(());
        }
        if status != FileStatus::Processing {
            return Err(ShareError::InvalidTransition {
                from: status,
                to: FileStatus::Processing,
            });
        }

        let result = {
            let Transfer { record, side, .. } = &mut *transfer;
            match side {
                Side::Incoming(state) => state
                    .announce_complete(record, done)
                    .and_then(|_| state.try_finish(record)),
                Side::Outgoing(_) => {
                    return Err(ShareError::InvalidRequest(
                        "Complete delivered to an outgoing transfer".to_string(),
                    ))
                }
            }
        };

        match result {
            Ok(finished) => {
                transfer.publish();
                if finished {
                    log_received(&transfer);
                }
                Ok(())
            }
            Err(err) => {
                let notice = transfer.abort(&err);
                drop(transfer);
                self.report_failure(notice, err).await
            }
        }
    }

    /// Пир отменил передачу (с причиной - аварийно)
    pub(crate) async fn on_cancel(&self, from_peer: &str, data: CancelData) -> Result<()> {
        let key = TransferKey::new(data.file_id, from_peer);
        let handle = self.handle(&key).await?;

        let mut transfer = handle.transfer.lock().await;
        if transfer.record.status().is_terminal() {
            return Ok(());
        }
        handle.cancel.store(true, Ordering::Release);

        match data.reason {
            Some(reason) => {
                warn!(
                    target: "transfer::engine",
                    file_id = %key.file_id,
                    peer_id = %from_peer,
                    reason = %reason,
                    "Peer aborted transfer"
                );
                transfer.record.set_error_summary(Some(format!("Peer aborted: {}", reason)));
                transfer.record.transition(FileStatus::Error)?;
            }
            None => {
                info!(
                    target: "transfer::engine",
                    file_id = %key.file_id,
                    peer_id = %from_peer,
                    "Peer cancelled transfer"
                );
                transfer.record.transition(FileStatus::Cancelled)?;
            }
        }

        transfer.discard();
        transfer.publish();
        Ok(())
    }
}

fn log_received(transfer: &Transfer) {
    info!(
        target: "transfer::incoming",
        file_id = %transfer.record.metadata().file_id,
        peer_id = %transfer.record.peer_id(),
        size = transfer.record.bytes_transferred(),
        bitrate = transfer.record.bitrate_bytes_per_sec(),
        "File received"
    );
}
