pub mod packet;

pub use packet::{decode_integer, decode_integer_signed, encode_integer, tag, Class, Packet, Payload};
