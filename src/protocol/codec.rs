use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::message::Datagram;

/// Codec between raw datagram buffers and protocol datagrams.
///
/// UDP keeps message boundaries, so whatever sits in the buffer is exactly one
/// datagram and decoding always consumes all of it.
#[derive(Clone, Copy, Debug, Default)]
pub struct DatagramCodec;

impl DatagramCodec {
    /// Creates a new datagram codec
    pub fn new() -> Self {
        DatagramCodec
    }
}

impl Decoder for DatagramCodec {
    type Item = Datagram;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let payload = src.split();
        Ok(Some(Datagram::decode(&payload)))
    }
}

impl Encoder<Bytes> for DatagramCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Commands go out verbatim; the caller owns the trailing separator.
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_consumes_whole_datagram() {
        let mut codec = DatagramCodec::new();
        let mut buf = BytesMut::from(&b"#00001=00000\r#00002=-0001\r"[..]);

        let datagram = codec.decode(&mut buf).unwrap().expect("one datagram");
        assert_eq!(datagram.lines, vec!["#00001=00000", "#00002=-0001"]);
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_is_verbatim() {
        let mut codec = DatagramCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Bytes::from_static(b"GS2 1\r"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"GS2 1\r");
    }
}
