//! MQTT control packet serializer
//!
//! # Design
//! Packets are encoded linearly into a caller-provided buffer with all integers in big-endian
//! byte order. The first bytes of the buffer are reserved for the MQTT fixed header, which is
//! written once the variable header and payload have been serialized and the remaining length
//! is known.
//!
//! # Limitations
//! Length prefixes of MQTT data types are not inferred. Strings must be wrapped in
//! [crate::types::Utf8String] to receive their prefix.
//!
//! Only the data types used by MQTT 3.1.1 packets are supported: integers, booleans, strings,
//! bytes, options, sequences, tuples, unit structs and structs. Everything else is rejected with
//! [Error::Custom].
use crate::message_types::{ControlPacket, MessageType};
use crate::varint::{VarintBuffer, MAX_VARINT_LENGTH};
use bit_field::BitField;
use serde::Serialize;
use varint_rs::VarintWriter;

/// The maximum size of the MQTT fixed header in bytes: the type/flags byte and the largest
/// remaining length encoding.
const MAX_FIXED_HEADER_SIZE: usize = 1 + MAX_VARINT_LENGTH;

/// The largest remaining length expressible by the fixed header.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Errors that result from the serialization process
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The provided memory buffer did not have enough space to serialize into.
    InsufficientMemory,

    /// A topic was empty or contained a NUL character.
    InvalidTopic,

    /// A packet identifier was missing, zero, or provided where none is permitted.
    InvalidPacketIdentifier,

    /// A custom serialization error occurred.
    Custom,
}

impl serde::ser::StdError for Error {}

impl serde::ser::Error for Error {
    fn custom<T: core::fmt::Display>(_msg: T) -> Self {
        crate::error!("{}", _msg);
        Error::Custom
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Error::Custom => "Custom serialization error",
                Error::InsufficientMemory => "Not enough space to encode the packet",
                Error::InvalidTopic => "Topic is empty or contains NUL",
                Error::InvalidPacketIdentifier => "Packet identifier does not match the QoS",
            }
        )
    }
}

/// A structure to serialize MQTT data into a buffer.
pub struct MqttSerializer<'a> {
    buf: &'a mut [u8],
    index: usize,
}

impl<'a> MqttSerializer<'a> {
    /// Construct a new serializer.
    ///
    /// # Args
    /// * `buf` - The location to serialize data into.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            index: MAX_FIXED_HEADER_SIZE,
        }
    }

    /// Encode an MQTT control packet into a buffer.
    ///
    /// # Args
    /// * `buf` - The buffer to encode data into.
    /// * `packet` - The packet to encode.
    ///
    /// # Returns
    /// The slice of `buf` holding the complete packet.
    pub fn to_buffer<T: Serialize + ControlPacket>(
        buf: &'a mut [u8],
        packet: &T,
    ) -> Result<&'a [u8], Error> {
        if buf.len() < MAX_FIXED_HEADER_SIZE {
            return Err(Error::InsufficientMemory);
        }

        let mut serializer = Self::new(buf);
        packet.serialize(&mut serializer)?;
        serializer.finalize(T::MESSAGE_TYPE, packet.fixed_header_flags())
    }

    /// Finalize the packet, prepending the MQTT fixed header.
    ///
    /// # Args
    /// * `typ` - The MQTT message type of the encoded packet.
    /// * `flags` - The MQTT flags associated with the packet.
    ///
    /// # Returns
    /// A slice representing the serialized packet.
    pub fn finalize(self, typ: MessageType, flags: u8) -> Result<&'a [u8], Error> {
        let len = self.index - MAX_FIXED_HEADER_SIZE;
        if len > MAX_REMAINING_LENGTH {
            return Err(Error::InsufficientMemory);
        }

        let mut buffer = VarintBuffer::new();
        buffer
            .write_u32_varint(len as u32)
            .map_err(|_| Error::InsufficientMemory)?;

        let offset = MAX_FIXED_HEADER_SIZE - buffer.data.len() - 1;
        self.buf[offset + 1..MAX_FIXED_HEADER_SIZE].copy_from_slice(&buffer.data);
        self.buf[offset] = *0u8.set_bits(4..8, typ as u8).set_bits(0..4, flags);

        Ok(&self.buf[offset..self.index])
    }

    /// Write data into the packet.
    ///
    /// # Args
    /// * `data` - The data to push to the current head of the packet.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        crate::trace!("Pushing {:?}", data);
        if self.buf.len() - self.index < data.len() {
            return Err(Error::InsufficientMemory);
        }

        self.buf[self.index..][..data.len()].copy_from_slice(data);
        self.index += data.len();

        Ok(())
    }

    /// Push a byte to the tail of the packet.
    pub fn push(&mut self, byte: u8) -> Result<(), Error> {
        self.push_bytes(&[byte])
    }
}

impl<'a> serde::Serializer for &mut MqttSerializer<'a> {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        self.push(v as u8)
    }

    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        self.push(v as u8)
    }

    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(&v.to_be_bytes())
    }

    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(&v.to_be_bytes())
    }

    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(&v.to_be_bytes())
    }

    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        self.push(v)
    }

    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(&v.to_be_bytes())
    }

    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(&v.to_be_bytes())
    }

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(&v.to_be_bytes())
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        self.push_bytes(v)
    }

    fn serialize_none(self) -> Result<(), Error> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), Error> {
        value.serialize(self)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), Error> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> {
        Ok(self)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        Ok(self)
    }

    fn serialize_char(self, _v: char) -> Result<Self::Ok, Self::Error> {
        Err(Error::Custom)
    }

    fn serialize_unit(self) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Err(Error::Custom)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(Error::Custom)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> {
        Err(Error::Custom)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(Error::Custom)
    }

    fn collect_str<T: ?Sized + core::fmt::Display>(self, _value: &T) -> Result<Self::Ok, Error> {
        Err(Error::Custom)
    }

    fn serialize_f32(self, _v: f32) -> Result<Self::Ok, Self::Error> {
        Err(Error::Custom)
    }

    fn serialize_f64(self, _v: f64) -> Result<Self::Ok, Self::Error> {
        Err(Error::Custom)
    }
}

impl<'a> serde::ser::SerializeStruct for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Error> {
        Ok(())
    }
}

impl<'a> serde::ser::SerializeSeq for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Error> {
        Ok(())
    }
}

impl<'a> serde::ser::SerializeTuple for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Error> {
        Ok(())
    }
}

impl<'a> serde::ser::SerializeTupleStruct for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn end(self) -> Result<(), Error> {
        Err(Error::Custom)
    }
}

impl<'a> serde::ser::SerializeTupleVariant for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn end(self) -> Result<(), Error> {
        Err(Error::Custom)
    }
}

impl<'a> serde::ser::SerializeMap for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, _key: &T) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn end(self) -> Result<(), Error> {
        Err(Error::Custom)
    }
}

impl<'a> serde::ser::SerializeStructVariant for &'a mut MqttSerializer<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        _value: &T,
    ) -> Result<(), Error> {
        Err(Error::Custom)
    }

    fn end(self) -> Result<(), Error> {
        Err(Error::Custom)
    }
}
