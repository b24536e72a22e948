//! Incremental decoding of inbound MQTT control packets.
mod decode;
mod packet_parser;
mod reassembly;

pub use decode::{decode, peek_length, DecodeError};
pub(crate) use packet_parser::PacketParser;
pub use reassembly::{Packets, ReassemblyBuffer};
