use crate::ProtocolError as Error;
use heapless::{String, Vec};

/// Cursor over the variable header and payload of a single control packet.
pub(crate) struct PacketParser<'a> {
    buffer: &'a [u8],
    index: usize,
}

impl<'a> PacketParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, index: 0 }
    }

    /// The number of bytes not yet parsed.
    pub fn len(&self) -> usize {
        self.buffer.len() - self.index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_borrowed(&mut self, count: usize) -> Result<&'a [u8], Error> {
        if count > self.len() {
            return Err(Error::MalformedPacket);
        }

        let data = &self.buffer[self.index..][..count];
        self.index += count;
        Ok(data)
    }

    /// Consume all remaining bytes.
    pub fn payload(&mut self) -> &'a [u8] {
        let data = &self.buffer[self.index..];
        self.index = self.buffer.len();
        data
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_borrowed(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let data = self.read_borrowed(2)?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    pub fn read_utf8_string(&mut self) -> Result<&'a str, Error> {
        let length = self.read_u16()? as usize;
        core::str::from_utf8(self.read_borrowed(length)?).map_err(|_| Error::MalformedPacket)
    }

    /// Read a length-prefixed string into owned storage.
    pub fn read_owned_string<const N: usize>(&mut self) -> Result<String<N>, Error> {
        let mut string = String::new();
        string
            .push_str(self.read_utf8_string()?)
            .map_err(|_| Error::MalformedPacket)?;
        Ok(string)
    }

    /// Read the remaining bytes into owned storage.
    pub fn read_owned_payload<const N: usize>(&mut self) -> Result<Vec<u8, N>, Error> {
        Vec::from_slice(self.payload()).map_err(|_| Error::PacketTooLarge)
    }
}
