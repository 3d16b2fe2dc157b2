// Протокол передачи файлов между пирами
//
// Транспорт доставляет непрозрачные блобы; здесь их формат.

pub mod messages;
pub mod wire;
