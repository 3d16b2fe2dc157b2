// Статусы передачи и допустимые переходы

use serde::{Deserialize, Serialize};

/// Жизненный цикл одной записи (файл, пир)
///
/// ```text
/// Pending ──► WaitingAccept ──► Processing ──► Success
///    │              │               │
///    └──────────────┴───────────────┴──► Cancelled | Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Pending,
    WaitingAccept,
    Processing,
    Success,
    Cancelled,
    Error,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileStatus::Success | FileStatus::Cancelled | FileStatus::Error
        )
    }

    /// Разрешён ли переход `self -> next`
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;

        matches!(
            (self, next),
            (Pending, WaitingAccept | Processing | Cancelled | Error)
                | (WaitingAccept, Processing | Cancelled | Error)
                | (Processing, Success | Cancelled | Error)
        )
    }
}
