//! Машина состояний передачи файлов
//!
//! - [`status`]: статусы и таблица переходов
//! - [`record`]: запись (файл, пир), прогресс, битрейт, снимки для UI
//! - [`reorder`]: буфер переупорядочивания чанков
//! - [`engine`]: реестр записей, доставка сообщений, отмена
//! - [`outgoing`] / [`incoming`]: логика отправителя и получателя

pub mod engine;
pub mod incoming;
pub mod outgoing;
pub mod record;
pub mod reorder;
pub mod status;

pub use engine::{OutboundBlob, TransferEngine, TransferKey};
pub use outgoing::SendProtection;
pub use record::{Direction, FileMetadata, FileTransferRecord, TransferSnapshot};
pub use status::FileStatus;
