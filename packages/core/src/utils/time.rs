// Время

use chrono::Utc;

/// Текущий timestamp в миллисекундах (unix epoch)
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}
