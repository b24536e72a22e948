//! Length-prefixed MQTT data types.
use serde::ser::SerializeStruct;

/// A UTF-8 encoded string, serialized with a two-byte big-endian length prefix.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Utf8String<'a>(pub &'a str);

impl<'a> serde::Serialize for Utf8String<'a> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.0.len() as u16;
        let mut item = serializer.serialize_struct("_Utf8String", 0)?;
        item.serialize_field("_len", &len)?;
        item.serialize_field("_string", self.0)?;
        item.end()
    }
}

/// Determine if a string is usable as an MQTT topic name.
///
/// # Note
/// Topic names must be non-empty, must not contain NUL characters, and must fit the two-byte
/// length prefix.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= u16::MAX as usize && !topic.contains('\0')
}
