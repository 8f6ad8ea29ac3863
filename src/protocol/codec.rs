//! JSON framing for wire messages

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Serialize a message into a frame
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Parse a frame back into a message
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, RoomId};
    use crate::Error;

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<ClientMessage>(b"{\"type\":\"teleport\"}").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_encode_is_stable() {
        let msg = ClientMessage::Leave {
            room_id: RoomId::new(),
        };
        assert_eq!(encode(&msg).unwrap(), encode(&msg).unwrap());
    }
}
