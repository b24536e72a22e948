//! MQTT remaining-length variable byte integers.
use heapless::Vec;
use varint_rs::{VarintReader, VarintWriter};

/// The maximum number of bytes in an MQTT variable byte integer.
pub const MAX_VARINT_LENGTH: usize = 4;

/// Scratch space used to encode a remaining length before it is copied into the fixed header.
pub struct VarintBuffer {
    pub data: Vec<u8, MAX_VARINT_LENGTH>,
}

impl VarintBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl VarintWriter for VarintBuffer {
    type Error = ();

    fn write(&mut self, byte: u8) -> Result<(), ()> {
        self.data.push(byte).map_err(|_| ())
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum VarintError {
    /// The encoding continues past the end of the available data.
    Incomplete,

    /// The encoding continues past the fourth byte.
    Overlong,
}

/// Reads a variable byte integer from the head of a slice.
pub struct VarintSlice<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> VarintSlice<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    /// The number of bytes read so far.
    pub fn consumed(&self) -> usize {
        self.index
    }
}

impl<'a> VarintReader for VarintSlice<'a> {
    type Error = VarintError;

    fn read(&mut self) -> Result<u8, VarintError> {
        if self.index >= MAX_VARINT_LENGTH {
            return Err(VarintError::Overlong);
        }

        let byte = *self.data.get(self.index).ok_or(VarintError::Incomplete)?;
        self.index += 1;
        Ok(byte)
    }
}
