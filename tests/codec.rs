use esp_at_mqtt::{
    decode, Connack, Connect, ConnectReturnCode, DecodeError, MqttPacket, Puback, Publish, QoS,
    ReassemblyBuffer, Suback, Subscribe, SubscribeReturnCode,
};

fn encode(packet: &MqttPacket) -> Vec<u8> {
    let mut buffer = [0u8; 1024];
    packet.encode(&mut buffer).unwrap().to_vec()
}

fn publication() -> MqttPacket {
    let mut publish = Publish::new("sensors/temperature", b"21.5").unwrap();
    publish.qos = QoS::AtLeastOnce;
    publish.packet_id = Some(42);
    MqttPacket::Publish(publish)
}

#[test]
fn encoded_publication_decodes() {
    let packet = publication();
    let data = encode(&packet);

    assert_eq!(decode(&data), Ok((packet, data.len())));
}

#[test]
fn every_packet_type_decodes_to_itself() {
    let mut topics = heapless::Vec::new();
    topics
        .push((heapless::String::from("sensors/#"), QoS::AtLeastOnce))
        .unwrap();

    let mut granted_qos = heapless::Vec::new();
    granted_qos.push(SubscribeReturnCode::Failure).unwrap();

    let mut mixed_grants = heapless::Vec::new();
    mixed_grants.push(SubscribeReturnCode::MaximumQoS2).unwrap();
    mixed_grants.push(SubscribeReturnCode::MaximumQoS0).unwrap();

    let mut redelivery = Publish::new("alarms/door", b"open").unwrap();
    redelivery.dup = true;
    redelivery.retain = true;
    redelivery.qos = QoS::ExactlyOnce;
    redelivery.packet_id = Some(9);

    let packets = [
        MqttPacket::Connect(Connect {
            client_id: heapless::String::from("device1"),
            keep_alive: 60,
            clean_session: true,
        }),
        MqttPacket::Connack(Connack {
            session_present: true,
            return_code: ConnectReturnCode::ServerUnavailable,
        }),
        MqttPacket::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Unknown,
        }),
        MqttPacket::Publish(Publish::new("status", b"").unwrap()),
        publication(),
        MqttPacket::Publish(redelivery),
        MqttPacket::Puback(Puback { packet_id: 42 }),
        MqttPacket::Subscribe(Subscribe {
            packet_id: 3,
            topics,
        }),
        MqttPacket::Suback(Suback {
            packet_id: 3,
            granted_qos,
        }),
        MqttPacket::Suback(Suback {
            packet_id: 4,
            granted_qos: mixed_grants,
        }),
        MqttPacket::Pingreq,
        MqttPacket::Pingresp,
        MqttPacket::Disconnect,
    ];

    for packet in packets.iter() {
        let data = encode(packet);
        assert_eq!(decode(&data), Ok((packet.clone(), data.len())), "{}", packet.name());
    }
}

#[test]
fn byte_by_byte_arrival() {
    let packet = publication();
    let data = encode(&packet);

    let mut buffer: ReassemblyBuffer<256> = ReassemblyBuffer::new();
    for (index, byte) in data.iter().enumerate() {
        buffer.feed(&[*byte]).unwrap();
        let result = buffer.decode_next();

        if index + 1 < data.len() {
            assert_eq!(result, None);
        } else {
            assert_eq!(result, Some(Ok(packet.clone())));
        }
    }

    assert!(buffer.is_empty());
}

#[test]
fn coalesced_packets_are_decoded_in_order() {
    let connack = MqttPacket::Connack(Connack {
        session_present: false,
        return_code: ConnectReturnCode::Accepted,
    });
    let mut granted_qos = heapless::Vec::new();
    granted_qos.push(SubscribeReturnCode::MaximumQoS1).unwrap();
    let suback = MqttPacket::Suback(Suback {
        packet_id: 1,
        granted_qos,
    });

    let mut data = encode(&connack);
    data.extend(encode(&suback));
    data.extend(encode(&publication()));
    data.extend(encode(&MqttPacket::Pingresp));

    // Deliver the stream in uneven frames, as the module does.
    let mut buffer: ReassemblyBuffer<256> = ReassemblyBuffer::new();
    let mut received = Vec::new();
    for frame in data.chunks(7) {
        buffer.feed(frame).unwrap();
        received.extend(buffer.try_decode_all().map(Result::unwrap));
    }

    assert_eq!(
        received,
        [connack, suback, publication(), MqttPacket::Pingresp]
    );
}

#[test]
fn unsupported_packets_are_skipped() {
    let mut buffer: ReassemblyBuffer<64> = ReassemblyBuffer::new();

    // PUBREL, then a PINGRESP.
    buffer.feed(&[0x62, 0x02, 0x00, 0x01, 0xD0, 0x00]).unwrap();

    assert_eq!(
        buffer.decode_next(),
        Some(Err(DecodeError::UnknownPacketType {
            packet_type: 6,
            consumed: 4
        }))
    );
    assert_eq!(buffer.decode_next(), Some(Ok(MqttPacket::Pingresp)));
    assert_eq!(buffer.decode_next(), None);
}

#[test]
fn malformed_packets_are_discarded() {
    let mut buffer: ReassemblyBuffer<64> = ReassemblyBuffer::new();

    // CONNACK with a reserved acknowledge flag set.
    buffer.feed(&[0x20, 0x02, 0x02, 0x00]).unwrap();
    buffer.feed(&[0xD0, 0x00]).unwrap();

    assert_eq!(
        buffer.decode_next(),
        Some(Err(DecodeError::MalformedPacket { consumed: 4 }))
    );
    assert_eq!(buffer.decode_next(), Some(Ok(MqttPacket::Pingresp)));
}

#[test]
fn unknown_return_codes_are_preserved() {
    let (packet, _) = decode(&[0x20, 0x02, 0x00, 0x09]).unwrap();
    assert_eq!(
        packet,
        MqttPacket::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Unknown,
        })
    );
}
