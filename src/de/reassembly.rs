use super::decode::{decode, peek_length, DecodeError};
use crate::{packets::MqttPacket, ProtocolError};
use heapless::Vec;

/// Accumulates inbound socket data until complete control packets can be decoded.
///
/// # Note
/// After every exhausted [ReassemblyBuffer::try_decode_all], the buffer holds either nothing or
/// the prefix of exactly one incomplete packet.
pub struct ReassemblyBuffer<const N: usize> {
    data: Vec<u8, N>,

    // Bytes of an oversized packet that still have to be dropped from the stream.
    skip: usize,

    oversized: Option<usize>,
}

impl<const N: usize> Default for ReassemblyBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ReassemblyBuffer<N> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            skip: 0,
            oversized: None,
        }
    }

    /// The number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Discard all buffered data.
    pub fn clear(&mut self) {
        self.data.clear();
        self.skip = 0;
        self.oversized.take();
    }

    /// Append received bytes.
    ///
    /// # Note
    /// A packet that can never fit into the buffer is dropped as it streams in and reported as
    /// [DecodeError::PacketTooLarge] by the next decode attempt.
    ///
    /// # Returns
    /// [ProtocolError::BufferFull] if complete or partial packets that have not been decoded yet
    /// leave no room for `bytes`. Stream alignment is lost in that case and the buffer is cleared.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Result<(), ProtocolError> {
        loop {
            let skipped = self.skip.min(bytes.len());
            self.skip -= skipped;
            bytes = &bytes[skipped..];

            let count = (N - self.data.len()).min(bytes.len());
            self.data
                .extend_from_slice(&bytes[..count])
                .map_err(|_| ProtocolError::BufferFull)?;
            bytes = &bytes[count..];

            if bytes.is_empty() {
                return Ok(());
            }

            match peek_length(&self.data) {
                Ok(length) if length > N => {
                    crate::warn!("Dropping {} byte packet that exceeds the buffer", length);
                    self.skip = length - self.data.len();
                    self.data.clear();
                    self.oversized.replace(length);
                }
                _ => {
                    crate::error!("Reassembly buffer overflow, dropping {} bytes", self.len());
                    self.clear();
                    return Err(ProtocolError::BufferFull);
                }
            }
        }
    }

    fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        let remaining = self.data.len() - count;
        self.data.copy_within(count.., 0);
        self.data.truncate(remaining);
    }

    /// Attempt to decode the packet at the head of the buffer.
    ///
    /// # Returns
    /// `None` if the buffer does not contain a complete packet. Otherwise, the decoded packet or
    /// the reason it was discarded. Consumed bytes are removed from the buffer.
    pub fn decode_next(&mut self) -> Option<Result<MqttPacket, DecodeError>> {
        if let Some(length) = self.oversized.take() {
            return Some(Err(DecodeError::PacketTooLarge { length }));
        }

        match decode(&self.data) {
            Ok((packet, consumed)) => {
                self.consume(consumed);
                Some(Ok(packet))
            }
            Err(DecodeError::NeedMoreData) => None,
            Err(error) => {
                match error {
                    DecodeError::UnknownPacketType { consumed, .. }
                    | DecodeError::MalformedPacket { consumed } => self.consume(consumed),
                    DecodeError::PacketTooLarge { length } => self.consume(length),
                    _ => {
                        crate::error!("Malformed remaining length, stream alignment lost");
                        self.clear();
                    }
                }

                Some(Err(error))
            }
        }
    }

    /// Decode every complete packet currently buffered.
    ///
    /// The returned iterator stops once only an incomplete packet (or nothing) remains.
    pub fn try_decode_all(&mut self) -> Packets<'_, N> {
        Packets { buffer: self }
    }
}

/// Iterator over the complete packets of a [ReassemblyBuffer].
pub struct Packets<'a, const N: usize> {
    buffer: &'a mut ReassemblyBuffer<N>,
}

impl<'a, const N: usize> Iterator for Packets<'a, N> {
    type Item = Result<MqttPacket, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.decode_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const PINGRESP: [u8; 2] = [0xD0, 0x00];

    #[test]
    fn partial_packet_is_retained() {
        let mut buffer: ReassemblyBuffer<16> = ReassemblyBuffer::new();
        buffer.feed(&CONNACK[..3]).unwrap();
        assert!(buffer.try_decode_all().next().is_none());
        assert_eq!(buffer.len(), 3);

        buffer.feed(&CONNACK[3..]).unwrap();
        assert!(matches!(
            buffer.try_decode_all().next(),
            Some(Ok(MqttPacket::Connack(_)))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn coalesced_packets_are_split() {
        let mut buffer: ReassemblyBuffer<16> = ReassemblyBuffer::new();
        buffer.feed(&PINGRESP).unwrap();
        buffer.feed(&CONNACK).unwrap();
        buffer.feed(&PINGRESP[..1]).unwrap();

        let mut packets = buffer.try_decode_all();
        assert_eq!(packets.next(), Some(Ok(MqttPacket::Pingresp)));
        assert!(matches!(packets.next(), Some(Ok(MqttPacket::Connack(_)))));
        assert_eq!(packets.next(), None);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn unknown_packet_is_skipped() {
        let mut buffer: ReassemblyBuffer<16> = ReassemblyBuffer::new();
        buffer.feed(&[0x50, 0x02, 0x00, 0x01]).unwrap();
        buffer.feed(&PINGRESP).unwrap();

        let mut packets = buffer.try_decode_all();
        assert_eq!(
            packets.next(),
            Some(Err(DecodeError::UnknownPacketType {
                packet_type: 5,
                consumed: 4
            }))
        );
        assert_eq!(packets.next(), Some(Ok(MqttPacket::Pingresp)));
        assert_eq!(packets.next(), None);
    }

    #[test]
    fn oversized_packet_is_dropped_in_flight() {
        let mut buffer: ReassemblyBuffer<8> = ReassemblyBuffer::new();

        // PUBLISH with a remaining length of 10, followed by a PINGRESP.
        buffer.feed(&[0x30, 0x0A, 0x00, 0x01, 0x41, 1, 2, 3]).unwrap();
        buffer.feed(&[4, 5, 6, 7, 0xD0, 0x00]).unwrap();

        let mut packets = buffer.try_decode_all();
        assert_eq!(
            packets.next(),
            Some(Err(DecodeError::PacketTooLarge { length: 12 }))
        );
        assert_eq!(packets.next(), Some(Ok(MqttPacket::Pingresp)));
        assert_eq!(packets.next(), None);
    }

    #[test]
    fn overflow_clears_buffer() {
        let mut buffer: ReassemblyBuffer<4> = ReassemblyBuffer::new();
        buffer.feed(&PINGRESP).unwrap();
        buffer.feed(&PINGRESP).unwrap();
        assert_eq!(buffer.feed(&PINGRESP), Err(ProtocolError::BufferFull));
        assert!(buffer.is_empty());
    }
}
