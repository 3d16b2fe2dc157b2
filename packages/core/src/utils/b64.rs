// Base64 утилиты

use crate::error::CryptoError;
use base64::{engine::general_purpose, Engine};

pub fn encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

pub fn decode(data: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(general_purpose::STANDARD.decode(data.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode("not*base64"),
            Err(CryptoError::KeyFormatError(_))
        ));
    }

    #[test]
    fn test_decode_ignores_surrounding_whitespace() {
        assert_eq!(decode(" AQID\n").unwrap(), vec![1, 2, 3]);
    }
}
