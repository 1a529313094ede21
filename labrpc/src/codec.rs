//! Message encoding shared by the network and its services.
//!
//! Every payload that crosses the simulated network, and every blob a peer
//! persists, is a prost message.

/// A wire message.
pub trait Message: prost::Message + Default {}
impl<T: prost::Message + Default> Message for T {}

pub type EncodeError = prost::EncodeError;
pub type DecodeError = prost::DecodeError;

/// Encodes the message, appending to `buf`.
pub fn encode<M: Message>(message: &M, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    buf.reserve(message.encoded_len());
    message.encode(buf)
}

/// Encodes the message into a fresh buffer.
pub fn encode_to_vec<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decodes a message from the buffer.
pub fn decode<M: Message>(buf: &[u8]) -> Result<M, DecodeError> {
    M::decode(buf)
}

#[cfg(test)]
mod tests {
    use prost_derive::Message;

    use super::*;

    #[derive(Clone, PartialEq, Message)]
    struct Probe {
        #[prost(uint64, tag = "1")]
        id: u64,
        #[prost(bytes, repeated, tag = "2")]
        payload: Vec<Vec<u8>>,
    }

    #[test]
    fn test_empty_buffer_decodes_to_default() {
        let probe: Probe = decode(&[]).unwrap();
        assert_eq!(probe, Probe::default());
    }

    #[test]
    fn test_encode_appends() {
        let probe = Probe {
            id: 42,
            payload: vec![vec![7; 3]; 2],
        };
        let mut buf = vec![0xff];
        encode(&probe, &mut buf).unwrap();
        assert_eq!(buf[0], 0xff);
        assert_eq!(&buf[1..], &encode_to_vec(&probe)[..]);
        assert_eq!(decode::<Probe>(&buf[1..]).unwrap(), probe);
    }

    #[test]
    fn test_garbage_is_rejected() {
        decode::<Probe>(&[0x0a, 0xff, 0xff]).unwrap_err();
    }
}
