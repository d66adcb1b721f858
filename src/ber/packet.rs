use crate::{Error, Result};

/// Class bits from the identifier octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Class {
    Universal = 0x00,
    Application = 0x40,
    Context = 0x80,
    Private = 0xc0,
}

impl Class {
    fn from_identifier(identifier: u8) -> Self {
        match identifier & 0xc0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::Context,
            _ => Class::Private,
        }
    }
}

/// Universal tag numbers used by the LDAP wire encoding.
pub mod tag {
    pub const BOOLEAN: u8 = 0x01;
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const ENUMERATED: u8 = 0x0a;
    pub const SEQUENCE: u8 = 0x10;
    pub const SET: u8 = 0x11;
}

const CONSTRUCTED_BIT: u8 = 0x20;
const TAG_NUMBER_MASK: u8 = 0x1f;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Primitive(Vec<u8>),
    Constructed(Vec<Packet>),
}

/// One BER tag-length-value node. Primitive nodes own their content bytes,
/// constructed nodes own an ordered list of children and no bytes of their
/// own. Tag numbers above 30 (multi-byte identifiers) are not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub class: Class,
    pub tag: u8,
    pub payload: Payload,
}

impl Packet {
    pub fn primitive(class: Class, tag: u8, data: Vec<u8>) -> Self {
        Packet {
            class,
            tag,
            payload: Payload::Primitive(data),
        }
    }

    pub fn constructed(class: Class, tag: u8, children: Vec<Packet>) -> Self {
        Packet {
            class,
            tag,
            payload: Payload::Constructed(children),
        }
    }

    pub fn sequence(children: Vec<Packet>) -> Self {
        Self::constructed(Class::Universal, tag::SEQUENCE, children)
    }

    pub fn set(children: Vec<Packet>) -> Self {
        Self::constructed(Class::Universal, tag::SET, children)
    }

    pub fn integer(value: i64) -> Self {
        let mut data = Vec::new();
        encode_integer(value, &mut data);
        Self::primitive(Class::Universal, tag::INTEGER, data)
    }

    pub fn enumerated(value: i64) -> Self {
        let mut data = Vec::new();
        encode_integer(value, &mut data);
        Self::primitive(Class::Universal, tag::ENUMERATED, data)
    }

    pub fn boolean(value: bool) -> Self {
        Self::primitive(
            Class::Universal,
            tag::BOOLEAN,
            vec![if value { 0xff } else { 0x00 }],
        )
    }

    pub fn octet_string(value: impl AsRef<[u8]>) -> Self {
        Self::primitive(Class::Universal, tag::OCTET_STRING, value.as_ref().to_vec())
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.payload, Payload::Constructed(_))
    }

    /// Child packets; empty for primitive nodes.
    pub fn children(&self) -> &[Packet] {
        match &self.payload {
            Payload::Constructed(children) => children,
            Payload::Primitive(_) => &[],
        }
    }

    /// Content bytes; empty for constructed nodes.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Primitive(data) => data,
            Payload::Constructed(_) => &[],
        }
    }

    pub fn read_u64(&self) -> u64 {
        decode_integer(self.data())
    }

    pub fn read_i64(&self) -> i64 {
        decode_integer_signed(self.data())
    }

    /// True iff the first content byte is nonzero; an empty payload is false.
    pub fn read_bool(&self) -> bool {
        self.data().first().is_some_and(|&b| b != 0)
    }

    pub fn read_string(&self) -> Result<String> {
        match &self.payload {
            Payload::Primitive(data) => String::from_utf8(data.clone())
                .map_err(|_| Error::Protocol("invalid UTF-8 in string value".to_string())),
            Payload::Constructed(_) => {
                Err(Error::Protocol("expected a primitive value".to_string()))
            }
        }
    }

    /// Parses one packet from the front of `buf`, returning it together with
    /// the number of bytes consumed. Constructed packets are decoded
    /// recursively; a child whose declared length runs past its parent fails.
    pub fn decode(buf: &[u8]) -> Result<(Packet, usize)> {
        if buf.len() < 2 {
            return Err(Error::Protocol("truncated BER packet".to_string()));
        }

        let identifier = buf[0];
        let class = Class::from_identifier(identifier);
        let constructed = identifier & CONSTRUCTED_BIT != 0;
        let tag = identifier & TAG_NUMBER_MASK;

        let (content_len, length_octets) = decode_length(&buf[1..])?;
        let mut pos = 1 + length_octets;
        if buf.len() - pos < content_len {
            return Err(Error::Protocol(format!(
                "declared length {} exceeds available {} bytes",
                content_len,
                buf.len() - pos
            )));
        }
        let end = pos + content_len;

        let payload = if constructed {
            let mut children = Vec::new();
            while pos < end {
                let (child, used) = Packet::decode(&buf[pos..end])?;
                pos += used;
                children.push(child);
            }
            Payload::Constructed(children)
        } else {
            Payload::Primitive(buf[pos..end].to_vec())
        };

        Ok((Packet { class, tag, payload }, end))
    }

    /// Appends the identifier octet, length field, and content to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut identifier = self.class as u8 | self.tag;
        if self.is_constructed() {
            identifier |= CONSTRUCTED_BIT;
        }
        out.push(identifier);

        match &self.payload {
            Payload::Primitive(data) => {
                encode_length(data.len(), out);
                out.extend_from_slice(data);
            }
            Payload::Constructed(children) => {
                let mut body = Vec::new();
                for child in children {
                    child.encode(&mut body);
                }
                encode_length(body.len(), out);
                out.extend_from_slice(&body);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Parses a BER length field, returning the content length and the number of
/// length octets. Long-form lengths carry 1..=8 size bytes; a bare long-form
/// indicator (`0x80`) is rejected.
pub(crate) fn decode_length(buf: &[u8]) -> Result<(usize, usize)> {
    let first = *buf
        .first()
        .ok_or_else(|| Error::Protocol("missing length octet".to_string()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let count = (first & 0x7f) as usize;
    if count == 0 || count > 8 {
        return Err(Error::Protocol(format!(
            "unsupported length-of-length {count}"
        )));
    }
    if buf.len() < 1 + count {
        return Err(Error::Protocol("truncated long-form length".to_string()));
    }
    Ok((decode_integer(&buf[1..1 + count]) as usize, 1 + count))
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len <= 127 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Serializes `value` as minimal two's-complement big-endian: the fewest
/// bytes whose leading bit still carries the sign.
pub fn encode_integer(value: i64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let sign_bit = bytes[start + 1] & 0x80;
        let redundant = (bytes[start] == 0x00 && sign_bit == 0)
            || (bytes[start] == 0xff && sign_bit != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    out.extend_from_slice(&bytes[start..]);
}

/// Big-endian unsigned accumulation over any well-formed length.
pub fn decode_integer(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Big-endian accumulation with sign extension from the first byte.
pub fn decode_integer_signed(bytes: &[u8]) -> i64 {
    let Some(&first) = bytes.first() else {
        return 0;
    };
    let mut acc: i64 = if first & 0x80 != 0 { -1 } else { 0 };
    for &b in bytes {
        acc = (acc << 8) | i64::from(b);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: &Packet) -> Packet {
        let bytes = packet.to_bytes();
        let (decoded, used) = Packet::decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        decoded
    }

    #[test]
    fn test_integer_encoding_is_minimal() {
        for value in [0i64, 1, 127, 128, 255, 256, 32767, 32768, -1, -128, -129, -32768] {
            let mut bytes = Vec::new();
            encode_integer(value, &mut bytes);
            assert_eq!(decode_integer_signed(&bytes), value);

            // Minimality: re-encoding the decoded value gives the same length.
            let mut again = Vec::new();
            encode_integer(decode_integer_signed(&bytes), &mut again);
            assert_eq!(bytes, again);

            // Sign bit of the first byte matches the sign of the value.
            let high_bit = bytes[0] & 0x80;
            if value >= 0 {
                assert_eq!(high_bit, 0, "value {value} encoded {bytes:?}");
            } else {
                assert_ne!(high_bit, 0, "value {value} encoded {bytes:?}");
            }
        }
    }

    #[test]
    fn test_integer_byte_patterns() {
        let mut bytes = Vec::new();
        encode_integer(0, &mut bytes);
        assert_eq!(bytes, vec![0x00]);

        bytes.clear();
        encode_integer(128, &mut bytes);
        assert_eq!(bytes, vec![0x00, 0x80]);

        bytes.clear();
        encode_integer(-1, &mut bytes);
        assert_eq!(bytes, vec![0xff]);
    }

    #[test]
    fn test_decode_integer_unsigned() {
        assert_eq!(decode_integer(&[0x01, 0x2c]), 300);
        assert_eq!(decode_integer(&[]), 0);
        assert_eq!(decode_integer(&[0xff]), 255);
    }

    #[test]
    fn test_length_short_form() {
        let mut out = Vec::new();
        encode_length(0x7f, &mut out);
        assert_eq!(out, vec![0x7f]);
        assert_eq!(decode_length(&out).unwrap(), (0x7f, 1));
    }

    #[test]
    fn test_length_long_form() {
        let mut out = Vec::new();
        encode_length(200, &mut out);
        assert_eq!(out, vec![0x81, 200]);
        assert_eq!(decode_length(&out).unwrap(), (200, 2));

        out.clear();
        encode_length(100_000, &mut out);
        assert_eq!(out, vec![0x83, 0x01, 0x86, 0xa0]);
        assert_eq!(decode_length(&out).unwrap(), (100_000, 4));
    }

    #[test]
    fn test_length_bare_long_form_indicator_fails() {
        assert!(decode_length(&[0x80]).is_err());
    }

    #[test]
    fn test_length_truncated_long_form_fails() {
        assert!(decode_length(&[0x82, 0x01]).is_err());
    }

    #[test]
    fn test_boolean_roundtrip() {
        assert!(roundtrip(&Packet::boolean(true)).read_bool());
        assert!(!roundtrip(&Packet::boolean(false)).read_bool());
    }

    #[test]
    fn test_boolean_empty_payload_is_false() {
        let packet = Packet::primitive(Class::Universal, tag::BOOLEAN, Vec::new());
        assert!(!packet.read_bool());
    }

    #[test]
    fn test_primitive_roundtrip() {
        let packet = Packet::octet_string("cn=admin,dc=example,dc=com");
        let decoded = roundtrip(&packet);
        assert_eq!(decoded, packet);
        assert_eq!(decoded.read_string().unwrap(), "cn=admin,dc=example,dc=com");
    }

    #[test]
    fn test_constructed_roundtrip() {
        let packet = Packet::sequence(vec![
            Packet::integer(1),
            Packet::constructed(
                Class::Application,
                0,
                vec![
                    Packet::integer(3),
                    Packet::octet_string("cn=a"),
                    Packet::primitive(Class::Context, 0, b"x".to_vec()),
                ],
            ),
        ]);
        assert_eq!(roundtrip(&packet), packet);

        // Re-encoding the decoded tree reproduces the original bytes.
        let bytes = packet.to_bytes();
        let (decoded, _) = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_large_payload_long_form_roundtrip() {
        let packet = Packet::octet_string(vec![0x41u8; 300]);
        let bytes = packet.to_bytes();
        assert_eq!(bytes[1], 0x82);
        assert_eq!(roundtrip(&packet), packet);
    }

    #[test]
    fn test_decode_declared_length_exceeds_buffer() {
        // SEQUENCE claiming 16 content bytes with only 2 present.
        let result = Packet::decode(&[0x30, 0x10, 0x02, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_child_overruns_parent() {
        // Parent SEQUENCE of 4 bytes holding a child that claims 9.
        let result = Packet::decode(&[0x30, 0x04, 0x04, 0x09, 0x61, 0x62]);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut bytes = Packet::integer(7).to_bytes();
        bytes.extend_from_slice(&[0xde, 0xad]);
        let (packet, used) = Packet::decode(&bytes).unwrap();
        assert_eq!(used, 3);
        assert_eq!(packet.read_i64(), 7);
    }
}
