//! MQTT 3.1.1 control packet decoding
//!
//! Decoding works on a byte span that starts at a packet boundary. The fixed header is examined
//! first; when the span does not yet hold the complete packet [DecodeError::NeedMoreData] is
//! returned and nothing is consumed. Every error that is detected after the fixed header has
//! been read reports how many bytes the packet occupied so the caller can skip it and keep the
//! stream aligned.
use super::PacketParser;
use crate::message_types::MessageType;
use crate::packets::{
    Connack, Connect, MqttPacket, Puback, Publish, Suback, Subscribe, PROTOCOL_LEVEL,
    PROTOCOL_NAME,
};
use crate::types::is_valid_topic;
use crate::varint::{VarintError, VarintSlice};
use crate::{ProtocolError, QoS};
use bit_field::BitField;
use core::convert::TryFrom;
use heapless::Vec;
use varint_rs::VarintReader;

/// Reasons a byte span could not be decoded into a packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The span holds only a prefix of the next packet. This is not an error: retain the data
    /// and try again once more bytes arrive.
    NeedMoreData,

    /// The packet type is not handled. The packet occupied `consumed` bytes.
    UnknownPacketType { packet_type: u8, consumed: usize },

    /// The packet was framed correctly but its contents are invalid. The packet occupied
    /// `consumed` bytes.
    MalformedPacket { consumed: usize },

    /// The remaining length field is longer than four bytes. Stream alignment is lost.
    MalformedLength,

    /// The packet is too large to be held. It occupies `length` bytes in total.
    PacketTooLarge { length: usize },
}

/// The framing information of a fixed header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct FixedHeader {
    pub header: u8,
    pub header_length: usize,
    pub remaining_length: usize,
}

impl FixedHeader {
    /// The total size of the packet.
    pub fn packet_length(&self) -> usize {
        self.header_length + self.remaining_length
    }
}

pub(crate) fn read_fixed_header(buf: &[u8]) -> Result<FixedHeader, DecodeError> {
    let header = *buf.first().ok_or(DecodeError::NeedMoreData)?;

    let mut reader = VarintSlice::new(&buf[1..]);
    let remaining_length = reader.read_u32_varint().map_err(|error| match error {
        VarintError::Incomplete => DecodeError::NeedMoreData,
        VarintError::Overlong => DecodeError::MalformedLength,
    })?;

    Ok(FixedHeader {
        header,
        header_length: 1 + reader.consumed(),
        remaining_length: remaining_length as usize,
    })
}

/// Determine the total length of the packet at the head of `buf`.
///
/// # Returns
/// The number of bytes the packet occupies, fixed header included. This only requires the
/// fixed header to be present.
pub fn peek_length(buf: &[u8]) -> Result<usize, DecodeError> {
    Ok(read_fixed_header(buf)?.packet_length())
}

/// Decode the control packet at the head of `buf`.
///
/// # Returns
/// The packet and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<(MqttPacket, usize), DecodeError> {
    let fixed_header = read_fixed_header(buf)?;
    let consumed = fixed_header.packet_length();
    if buf.len() < consumed {
        return Err(DecodeError::NeedMoreData);
    }

    let packet_type = fixed_header.header.get_bits(4..8);
    let flags = fixed_header.header.get_bits(0..4);
    let unknown = DecodeError::UnknownPacketType {
        packet_type,
        consumed,
    };

    let message_type = MessageType::try_from(packet_type).map_err(|_| unknown)?;
    let mut parser = PacketParser::new(&buf[fixed_header.header_length..consumed]);

    let packet = match message_type {
        MessageType::Connect => parse_connect(&mut parser, flags),
        MessageType::ConnAck => parse_connack(&mut parser, flags),
        MessageType::Publish => parse_publish(&mut parser, flags),
        MessageType::PubAck => parse_puback(&mut parser, flags),
        MessageType::Subscribe => parse_subscribe(&mut parser, flags),
        MessageType::SubAck => parse_suback(&mut parser, flags),
        MessageType::PingReq => expect_flags(flags, 0).map(|_| MqttPacket::Pingreq),
        MessageType::PingResp => expect_flags(flags, 0).map(|_| MqttPacket::Pingresp),
        MessageType::Disconnect => expect_flags(flags, 0).map(|_| MqttPacket::Disconnect),
        _ => return Err(unknown),
    };

    match packet {
        Ok(packet) if parser.is_empty() => Ok((packet, consumed)),
        Ok(_) => {
            crate::warn!("Discarding {:?} with trailing data", message_type);
            Err(DecodeError::MalformedPacket { consumed })
        }
        Err(ProtocolError::PacketTooLarge) => Err(DecodeError::PacketTooLarge { length: consumed }),
        Err(_) => {
            crate::warn!("Discarding malformed {:?}", message_type);
            Err(DecodeError::MalformedPacket { consumed })
        }
    }
}

fn expect_flags(flags: u8, expected: u8) -> Result<(), ProtocolError> {
    if flags != expected {
        return Err(ProtocolError::MalformedPacket);
    }

    Ok(())
}

fn parse_connect(parser: &mut PacketParser, flags: u8) -> Result<MqttPacket, ProtocolError> {
    expect_flags(flags, 0)?;

    if parser.read_utf8_string()? != PROTOCOL_NAME || parser.read_u8()? != PROTOCOL_LEVEL {
        return Err(ProtocolError::MalformedPacket);
    }

    // Only the clean session flag is modelled. Will, username and password are never sent.
    let connect_flags = parser.read_u8()?;
    if connect_flags & !0b0000_0010 != 0 {
        return Err(ProtocolError::MalformedPacket);
    }

    Ok(MqttPacket::Connect(Connect {
        keep_alive: parser.read_u16()?,
        client_id: parser.read_owned_string()?,
        clean_session: connect_flags.get_bit(1),
    }))
}

fn parse_connack(parser: &mut PacketParser, flags: u8) -> Result<MqttPacket, ProtocolError> {
    expect_flags(flags, 0)?;

    let acknowledge_flags = parser.read_u8()?;
    if acknowledge_flags & !0b1 != 0 {
        return Err(ProtocolError::MalformedPacket);
    }

    Ok(MqttPacket::Connack(Connack {
        session_present: acknowledge_flags.get_bit(0),
        return_code: parser.read_u8()?.into(),
    }))
}

fn parse_publish(parser: &mut PacketParser, flags: u8) -> Result<MqttPacket, ProtocolError> {
    let qos = QoS::try_from(flags.get_bits(1..=2)).map_err(|_| ProtocolError::MalformedPacket)?;

    let topic = parser.read_owned_string()?;
    if !is_valid_topic(&topic) {
        return Err(ProtocolError::MalformedPacket);
    }

    let packet_id = if qos > QoS::AtMostOnce {
        match parser.read_u16()? {
            0 => return Err(ProtocolError::MalformedPacket),
            id => Some(id),
        }
    } else {
        None
    };

    Ok(MqttPacket::Publish(Publish {
        topic,
        packet_id,
        qos,
        payload: parser.read_owned_payload()?,
        retain: flags.get_bit(0),
        dup: flags.get_bit(3),
    }))
}

fn parse_puback(parser: &mut PacketParser, flags: u8) -> Result<MqttPacket, ProtocolError> {
    expect_flags(flags, 0)?;

    Ok(MqttPacket::Puback(Puback {
        packet_id: parser.read_u16()?,
    }))
}

fn parse_subscribe(parser: &mut PacketParser, flags: u8) -> Result<MqttPacket, ProtocolError> {
    expect_flags(flags, 0b0010)?;

    let packet_id = parser.read_u16()?;
    let mut topics = Vec::new();
    while !parser.is_empty() {
        let topic = parser.read_owned_string()?;
        let options = parser.read_u8()?;
        if options & !0b11 != 0 {
            return Err(ProtocolError::MalformedPacket);
        }

        let qos = QoS::try_from(options).map_err(|_| ProtocolError::MalformedPacket)?;
        topics
            .push((topic, qos))
            .map_err(|_| ProtocolError::MalformedPacket)?;
    }

    if topics.is_empty() {
        return Err(ProtocolError::MalformedPacket);
    }

    Ok(MqttPacket::Subscribe(Subscribe { packet_id, topics }))
}

fn parse_suback(parser: &mut PacketParser, flags: u8) -> Result<MqttPacket, ProtocolError> {
    expect_flags(flags, 0)?;

    let packet_id = parser.read_u16()?;
    let mut granted_qos = Vec::new();
    for code in parser.payload() {
        granted_qos
            .push((*code).into())
            .map_err(|_| ProtocolError::MalformedPacket)?;
    }

    if granted_qos.is_empty() {
        return Err(ProtocolError::MalformedPacket);
    }

    Ok(MqttPacket::Suback(Suback {
        packet_id,
        granted_qos,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason_codes::{ConnectReturnCode, SubscribeReturnCode};

    #[test]
    fn deserialize_good_connack() {
        let serialized_connack: [u8; 4] = [
            0x20, 0x02, // Remaining length
            0x01, // Session present
            0x00, // Connection accepted
        ];

        let (packet, consumed) = decode(&serialized_connack).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(
            packet,
            MqttPacket::Connack(Connack {
                session_present: true,
                return_code: ConnectReturnCode::Accepted,
            })
        );
    }

    #[test]
    fn deserialize_refused_connack() {
        let (packet, _) = decode(&[0x20, 0x02, 0x00, 0x05]).unwrap();
        assert_eq!(
            packet,
            MqttPacket::Connack(Connack {
                session_present: false,
                return_code: ConnectReturnCode::NotAuthorized,
            })
        );

        let (packet, _) = decode(&[0x20, 0x02, 0x00, 0x42]).unwrap();
        assert_eq!(
            packet,
            MqttPacket::Connack(Connack {
                session_present: false,
                return_code: ConnectReturnCode::Unknown,
            })
        );
    }

    #[test]
    fn deserialize_good_publish() {
        let serialized_publish: [u8; 9] = [
            0x32, // Publish, QoS 1
            0x07, // Remaining length
            0x00, 0x01, 0x41, // Topic: A
            0x12, 0x34, // Packet identifier
            0x05, 0x10, // Payload
        ];

        let (packet, consumed) = decode(&serialized_publish).unwrap();
        assert_eq!(consumed, 9);
        match packet {
            MqttPacket::Publish(publish) => {
                assert_eq!(publish.topic.as_str(), "A");
                assert_eq!(publish.qos, QoS::AtLeastOnce);
                assert_eq!(publish.packet_id, Some(0x1234));
                assert_eq!(publish.payload.as_slice(), &[0x05, 0x10]);
                assert!(!publish.retain);
                assert!(!publish.dup);
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn deserialize_good_suback() {
        let serialized_suback: [u8; 6] = [
            0x90, // SubAck
            0x04, // Remaining length
            0x00, 0x05, // Identifier
            0x01, 0x80, // Granted QoS 1, failure
        ];

        let (packet, _) = decode(&serialized_suback).unwrap();
        match packet {
            MqttPacket::Suback(suback) => {
                assert_eq!(suback.packet_id, 5);
                assert_eq!(
                    suback.granted_qos.as_slice(),
                    &[SubscribeReturnCode::MaximumQoS1, SubscribeReturnCode::Failure]
                );
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn deserialize_good_ping_response() {
        assert_eq!(decode(&[0xd0, 0x00]), Ok((MqttPacket::Pingresp, 2)));
    }

    #[test]
    fn partial_packets_need_more_data() {
        assert_eq!(decode(&[]), Err(DecodeError::NeedMoreData));
        assert_eq!(decode(&[0x30]), Err(DecodeError::NeedMoreData));
        assert_eq!(decode(&[0x30, 0x80]), Err(DecodeError::NeedMoreData));
        assert_eq!(decode(&[0x30, 0x05, 0x00, 0x01]), Err(DecodeError::NeedMoreData));
    }

    #[test]
    fn unknown_packet_types_are_consumed() {
        // PUBREC with a packet identifier.
        assert_eq!(
            decode(&[0x50, 0x02, 0x00, 0x01, 0xd0, 0x00]),
            Err(DecodeError::UnknownPacketType {
                packet_type: 5,
                consumed: 4
            })
        );

        // Reserved packet type 0.
        assert_eq!(
            decode(&[0x00, 0x00]),
            Err(DecodeError::UnknownPacketType {
                packet_type: 0,
                consumed: 2
            })
        );
    }

    #[test]
    fn malformed_packets_are_consumed() {
        // PINGRESP with a body.
        assert_eq!(
            decode(&[0xd0, 0x01, 0x00]),
            Err(DecodeError::MalformedPacket { consumed: 3 })
        );

        // PUBLISH with QoS 3.
        assert_eq!(
            decode(&[0x36, 0x03, 0x00, 0x01, 0x41]),
            Err(DecodeError::MalformedPacket { consumed: 5 })
        );

        // SUBSCRIBE with reserved flags cleared.
        assert_eq!(
            decode(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x01, 0x41, 0x00]),
            Err(DecodeError::MalformedPacket { consumed: 8 })
        );
    }

    #[test]
    fn overlong_remaining_length() {
        assert_eq!(
            decode(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Err(DecodeError::MalformedLength)
        );
    }

    #[test]
    fn oversized_payload() {
        // PUBLISH to "A" with a remaining length of 598.
        let mut packet = [0u8; 601];
        packet[..6].copy_from_slice(&[0x30, 0xD6, 0x04, 0x00, 0x01, b'A']);

        assert_eq!(peek_length(&packet[..6]), Ok(601));
        assert_eq!(decode(&packet[..600]), Err(DecodeError::NeedMoreData));
        assert_eq!(
            decode(&packet),
            Err(DecodeError::PacketTooLarge { length: 601 })
        );
    }
}
