use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ber::{self, Packet};
use crate::Error;

/// Frames whole LDAP messages on the wire: the decoder waits until the
/// identifier octet, the complete length field, and the declared content are
/// buffered, then hands the bytes to the BER decoder. Malformed framing
/// fails the connection.
pub struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let first = src[1];
        let (content_len, header_len) = if first & 0x80 == 0 {
            (first as usize, 2)
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 8 {
                return Err(Error::Protocol(format!(
                    "unsupported length-of-length {count}"
                )));
            }
            if src.len() < 2 + count {
                return Ok(None);
            }
            (ber::decode_integer(&src[2..2 + count]) as usize, 2 + count)
        };

        let total = header_len + content_len;
        if src.len() < total {
            return Ok(None);
        }

        let (packet, _) = Packet::decode(&src[..total])?;
        src.advance(total);
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for LdapCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Error> {
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Class;

    #[test]
    fn test_decode_empty_buffer_waits() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_message_waits() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::from(&[0x30, 0x10, 0x02][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_partial_long_form_length_waits() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::from(&[0x30, 0x82][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_bare_long_form_indicator_fails() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::from(&[0x30, 0x80, 0x00][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_roundtrip_through_codec() {
        let packet = Packet::sequence(vec![
            Packet::integer(7),
            Packet::constructed(Class::Application, 2, Vec::new()),
        ]);

        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_consumes_one_message_at_a_time() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        codec.encode(Packet::integer(1), &mut buf).unwrap();
        codec.encode(Packet::integer(2), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().read_i64(), 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().read_i64(), 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
