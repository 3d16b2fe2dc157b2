// Отправляющая сторона: offer, поток чанков, complete

use crate::crypto::keys::PeerIdentity;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_key::KeyProtection;
use crate::protocol::messages::{ChunkData, CompleteData, OfferData, TransferMessage};
use crate::transfer::engine::{Side, Transfer, TransferEngine, TransferHandle, TransferKey};
use crate::transfer::record::{Direction, FileMetadata, FileTransferRecord};
use crate::transfer::status::FileStatus;
use crate::utils::error::{Result, ShareError};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Чем защищать сессионный ключ при отправке
#[derive(Clone)]
pub enum SendProtection {
    /// Публичным ключом каждого получателя
    PublicKey,
    /// Общим паролем, переданным получателям вне приложения
    Password(Zeroizing<String>),
}

impl SendProtection {
    pub fn password(password: impl Into<String>) -> Self {
        SendProtection::Password(Zeroizing::new(password.into()))
    }

    pub fn kind(&self) -> KeyProtection {
        match self {
            SendProtection::PublicKey => KeyProtection::PublicKey,
            SendProtection::Password(_) => KeyProtection::Password,
        }
    }

    fn secret(&self) -> Option<Zeroizing<String>> {
        match self {
            SendProtection::PublicKey => None,
            SendProtection::Password(password) => Some(password.clone()),
        }
    }
}

impl fmt::Debug for SendProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendProtection::PublicKey => f.write_str("PublicKey"),
            SendProtection::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Содержимое файла, общее для всех получателей
#[derive(Debug)]
pub(crate) struct OutgoingState {
    content: Arc<[u8]>,
    chunk_size: usize,
}

impl OutgoingState {
    pub(crate) fn new(content: Arc<[u8]>, chunk_size: usize) -> Self {
        Self {
            content,
            chunk_size: chunk_size.max(1),
        }
    }

    pub(crate) fn chunk_count(&self) -> u64 {
        self.content.len().div_ceil(self.chunk_size) as u64
    }

    pub(crate) fn chunk(&self, index: u64) -> &[u8] {
        let start = (index as usize).saturating_mul(self.chunk_size).min(self.content.len());
        let end = start.saturating_add(self.chunk_size).min(self.content.len());
        &self.content[start..end]
    }
}

impl<P: CryptoProvider> TransferEngine<P> {
    /// Отправить файл одному или нескольким пирам
    ///
    /// Для каждого получателя создаётся своя запись со своим сессионным
    /// ключом. Ошибка одного получателя переводит в `Error` только его
    /// запись; итог виден в снимках.
    ///
    /// # Returns
    /// Ключи созданных записей в порядке `recipients`
    pub async fn send_file(
        &self,
        recipients: &[PeerIdentity<P>],
        name: impl Into<String>,
        mime_type: Option<String>,
        content: impl Into<Arc<[u8]>>,
        protection: SendProtection,
    ) -> Result<Vec<TransferKey>> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = recipients.iter().find(|r| !seen.insert(r.peer_id.as_str())) {
            return Err(ShareError::InvalidRequest(format!(
                "Recipient {} listed twice",
                duplicate.peer_id
            )));
        }

        let content: Arc<[u8]> = content.into();
        let metadata = FileMetadata::new(name, content.len() as u64, mime_type);
        let chunk_size = self.inner.config.chunk_size;

        info!(
            target: "transfer::outgoing",
            file_id = %metadata.file_id,
            size = metadata.size,
            recipients = recipients.len(),
            protection = ?protection.kind(),
            "Sending file"
        );

        let mut keys = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let key = TransferKey::new(metadata.file_id, recipient.peer_id.as_str());
            let record = FileTransferRecord::new(
                metadata.clone(),
                recipient.peer_id.as_str(),
                Direction::Outgoing,
                protection.kind(),
            );
            let side = Side::Outgoing(OutgoingState::new(Arc::clone(&content), chunk_size));
            let handle = self.register(key.clone(), record, side).await?;

            if let Err(err) = self.offer(&handle, recipient, &protection).await {
                warn!(
                    target: "transfer::outgoing",
                    file_id = %key.file_id,
                    peer_id = %key.peer_id,
                    error = %err,
                    "Offer failed"
                );
                handle.transfer.lock().await.fail(&err);
            }

            keys.push(key);
        }

        Ok(keys)
    }

    async fn offer(
        &self,
        handle: &TransferHandle,
        recipient: &PeerIdentity<P>,
        protection: &SendProtection,
    ) -> Result<()> {
        let chunk_size = u32::try_from(self.inner.config.chunk_size)
            .map_err(|_| ShareError::ConfigError("Chunk size does not fit in 32 bits".to_string()))?;

        let offer = {
            let mut transfer = handle.transfer.lock().await;
            let (session_key, wrapped) = self
                .inner
                .key_exchange
                .mint_wrapped_blocking(recipient.public_key.clone(), protection.secret())
                .await?;
            transfer.record.set_session_key(session_key)?;

            // WaitingAccept до отправки: accept может прийти сразу за offer
            transfer.record.transition(FileStatus::WaitingAccept)?;
            transfer.publish();

            let metadata = transfer.record.metadata().clone();
            TransferMessage::Offer(OfferData {
                file_id: metadata.file_id,
                name: metadata.name,
                size: metadata.size,
                mime_type: metadata.mime_type,
                chunk_size,
                protection: wrapped.protection(),
                wrapped_key: wrapped.into_bytes(),
            })
        };
        self.send_message(&recipient.peer_id, &offer).await?;

        debug!(
            target: "transfer::outgoing",
            file_id = %offer.file_id(),
            peer_id = %recipient.peer_id,
            "Offer sent"
        );
        Ok(())
    }

    /// Получатель принял файл: запускаем поток чанков
    pub(crate) async fn on_accept(&self, from_peer: &str, file_id: Uuid) -> Result<()> {
        let key = TransferKey::new(file_id, from_peer);
        let handle = self.handle(&key).await?;

        {
            let mut transfer = handle.transfer.lock().await;
            transfer.outgoing()?;
            transfer.record.transition(FileStatus::Processing)?;
            transfer.publish();
        }

        info!(
            target: "transfer::outgoing",
            file_id = %file_id,
            peer_id = %from_peer,
            "Offer accepted, streaming"
        );

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.stream_chunks(handle).await {
                debug!(
                    target: "transfer::outgoing",
                    file_id = %key.file_id,
                    peer_id = %key.peer_id,
                    error = %err,
                    "Streaming stopped"
                );
            }
        });
        Ok(())
    }

    /// Получатель отказался
    pub(crate) async fn on_reject(&self, from_peer: &str, file_id: Uuid) -> Result<()> {
        let key = TransferKey::new(file_id, from_peer);
        let handle = self.handle(&key).await?;

        let mut transfer = handle.transfer.lock().await;
        transfer.outgoing()?;
        transfer.record.transition(FileStatus::Cancelled)?;
        handle.cancel.store(true, Ordering::Release);
        transfer.publish();

        info!(
            target: "transfer::outgoing",
            file_id = %file_id,
            peer_id = %from_peer,
            "Offer rejected"
        );
        Ok(())
    }

    /// Поток чанков. Замок записи держится только на время шифрования:
    /// отправка в исходящий канал идёт без него.
    ///
    /// `CancelledError`, если поток остановлен отменой.
    async fn stream_chunks(&self, handle: TransferHandle) -> Result<()> {
        let (chunk_count, peer_id) = {
            let transfer = handle.transfer.lock().await;
            (
                transfer.outgoing()?.chunk_count(),
                transfer.record.peer_id().to_string(),
            )
        };

        for index in 0..chunk_count {
            let (message, plaintext_len) = {
                let mut transfer = handle.transfer.lock().await;
                ensure_streaming(&handle, &transfer)?;
                match self.seal_chunk_locked(&transfer, index) {
                    Ok(sealed) => sealed,
                    Err(err) => {
                        let notice = transfer.abort(&err);
                        drop(transfer);
                        return self.report_failure(notice, err).await;
                    }
                }
            };

            if let Err(err) = self.send_message(&peer_id, &message).await {
                return self.abort(&handle, err).await;
            }

            {
                let mut transfer = handle.transfer.lock().await;
                // Пока ждали канал, запись могли отменить
                ensure_streaming(&handle, &transfer)?;
                transfer.record.record_progress(plaintext_len);
                transfer.publish();
            }

            trace!(
                target: "transfer::outgoing",
                file_id = %message.file_id(),
                peer_id = %peer_id,
                sequence_index = index,
                bytes = plaintext_len,
                "Chunk sent"
            );

            tokio::task::yield_now().await;
        }

        self.finish(&handle, &peer_id, chunk_count).await
    }

    fn seal_chunk_locked(&self, transfer: &Transfer, index: u64) -> Result<(TransferMessage, u64)> {
        let plaintext = transfer.outgoing()?.chunk(index);
        let key = transfer.record.session_key().ok_or_else(|| {
            ShareError::InternalError("Session key missing while streaming".to_string())
        })?;
        let ciphertext = self.inner.cipher.encrypt(key, plaintext)?;

        let message = TransferMessage::Chunk(ChunkData {
            file_id: transfer.record.metadata().file_id,
            sequence_index: index,
            ciphertext,
        });
        Ok((message, plaintext.len() as u64))
    }

    async fn finish(&self, handle: &TransferHandle, peer_id: &str, chunk_count: u64) -> Result<()> {
        let metadata = {
            let transfer = handle.transfer.lock().await;
            ensure_streaming(handle, &transfer)?;
            transfer.record.metadata().clone()
        };

        let message = TransferMessage::Complete(CompleteData {
            file_id: metadata.file_id,
            chunk_count,
            total_size: metadata.size,
        });
        if let Err(err) = self.send_message(peer_id, &message).await {
            return self.abort(handle, err).await;
        }

        let mut transfer = handle.transfer.lock().await;
        ensure_streaming(handle, &transfer)?;
        if let Err(err) = transfer.record.transition(FileStatus::Success) {
            let notice = transfer.abort(&err);
            drop(transfer);
            return self.report_failure(notice, err).await;
        }
        transfer.publish();

        info!(
            target: "transfer::outgoing",
            file_id = %metadata.file_id,
            peer_id = %peer_id,
            chunk_count,
            bitrate = transfer.record.bitrate_bytes_per_sec(),
            "File sent"
        );
        Ok(())
    }
}

/// Продолжать ли поток: отмена даёт `CancelledError`, остальные статусы - `InvalidTransition`
fn ensure_streaming(handle: &TransferHandle, transfer: &Transfer) -> Result<()> {
    let status = transfer.record.status();
    if handle.is_cancelled() || status == FileStatus::Cancelled {
        return Err(ShareError::CancelledError);
    }
    if status != FileStatus::Processing {
        return Err(ShareError::InvalidTransition {
            from: status,
            to: FileStatus::Processing,
        });
    }
    Ok(())
}
