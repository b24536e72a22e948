use crate::packets::{
    Connack, Connect, Disconnect, PingReq, PingResp, Puback, Publish, Suback, Subscribe,
};
use bit_field::BitField;
use num_enum::TryFromPrimitive;

/// MQTT 3.1.1 control packet types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

pub trait ControlPacket {
    const MESSAGE_TYPE: MessageType;
    fn fixed_header_flags(&self) -> u8 {
        0u8
    }
}

impl ControlPacket for Connect {
    const MESSAGE_TYPE: MessageType = MessageType::Connect;
}

impl ControlPacket for Connack {
    const MESSAGE_TYPE: MessageType = MessageType::ConnAck;
}

impl ControlPacket for Publish {
    const MESSAGE_TYPE: MessageType = MessageType::Publish;
    fn fixed_header_flags(&self) -> u8 {
        *0u8.set_bit(3, self.dup)
            .set_bits(1..=2, self.qos as u8)
            .set_bit(0, self.retain)
    }
}

impl ControlPacket for Puback {
    const MESSAGE_TYPE: MessageType = MessageType::PubAck;
}

impl ControlPacket for Subscribe {
    const MESSAGE_TYPE: MessageType = MessageType::Subscribe;
    fn fixed_header_flags(&self) -> u8 {
        0b0010
    }
}

impl ControlPacket for Suback {
    const MESSAGE_TYPE: MessageType = MessageType::SubAck;
}

impl ControlPacket for PingReq {
    const MESSAGE_TYPE: MessageType = MessageType::PingReq;
}

impl ControlPacket for PingResp {
    const MESSAGE_TYPE: MessageType = MessageType::PingResp;
}

impl ControlPacket for Disconnect {
    const MESSAGE_TYPE: MessageType = MessageType::Disconnect;
}
