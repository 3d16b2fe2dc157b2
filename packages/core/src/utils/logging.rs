// Логирование
//
// Библиотека только пишет события через `tracing`; подписчика ставит
// приложение. `init_logging` - удобный вариант для CLI и тестов.

use tracing_subscriber::{fmt, EnvFilter};

/// Установить fmt-подписчик с фильтром из `RUST_LOG` (или `default_filter`)
///
/// Повторные вызовы ничего не делают, поэтому тесты могут звать её свободно.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // try_init вернёт ошибку, если подписчик уже установлен
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init();
}
