// Wire format (MessagePack сериализация)
// Используется для передачи сообщений между пирами

use crate::protocol::messages::TransferMessage;
use crate::utils::error::Result;
use rmp_serde::{Deserializer, Serializer};
use serde::{Deserialize, Serialize};

/// Упаковать TransferMessage в MessagePack
///
/// Структуры пишутся картами с именами полей, а не массивами.
pub fn pack_message(message: &TransferMessage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    message.serialize(&mut Serializer::new(&mut buffer).with_struct_map())?;
    Ok(buffer)
}

/// Распаковать MessagePack в TransferMessage
///
/// `SerializationError` на обрезанном или чужом блобе.
pub fn unpack_message(data: &[u8]) -> Result<TransferMessage> {
    let mut deserializer = Deserializer::new(data);
    Ok(TransferMessage::deserialize(&mut deserializer)?)
}
