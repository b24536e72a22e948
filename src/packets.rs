use crate::{
    design_parameters::{
        MAX_CLIENT_ID_LENGTH, MAX_PAYLOAD_SIZE, MAX_TOPICS_PER_SUBSCRIPTION, MAX_TOPIC_LENGTH,
    },
    reason_codes::{ConnectReturnCode, SubscribeReturnCode},
    ser::{Error, MqttSerializer},
    types::{is_valid_topic, Utf8String},
    QoS,
};
use bit_field::BitField;
use heapless::{String, Vec};
use serde::ser::SerializeStruct;
use serde::Serialize;

/// The protocol level of MQTT 3.1.1.
pub(crate) const PROTOCOL_LEVEL: u8 = 4;

/// The protocol name carried in every CONNECT.
pub(crate) const PROTOCOL_NAME: &str = "MQTT";

/// An MQTT CONNECT packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    /// The ID of the client that is connecting.
    pub client_id: String<MAX_CLIENT_ID_LENGTH>,

    /// Specifies the keep-alive interval of the connection in seconds.
    pub keep_alive: u16,

    /// Specified true if the broker should discard any previous session state.
    pub clean_session: bool,
}

impl serde::Serialize for Connect {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut flags: u8 = 0;
        flags.set_bit(1, self.clean_session);

        let mut item = serializer.serialize_struct("Connect", 0)?;
        item.serialize_field("protocol_name", &Utf8String(PROTOCOL_NAME))?;
        item.serialize_field("protocol_level", &PROTOCOL_LEVEL)?;
        item.serialize_field("flags", &flags)?;
        item.serialize_field("keep_alive", &self.keep_alive)?;
        item.serialize_field("client_id", &Utf8String(&self.client_id))?;
        item.end()
    }
}

/// An MQTT CONNACK packet, representing a connection acknowledgement from a broker.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Connack {
    /// Indicates true if session state is being maintained by the broker.
    pub session_present: bool,

    /// A status code indicating the success status of the connection.
    pub return_code: ConnectReturnCode,
}

impl serde::Serialize for Connack {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut item = serializer.serialize_struct("Connack", 0)?;
        item.serialize_field("flags", &(self.session_present as u8))?;
        item.serialize_field("return_code", &self.return_code)?;
        item.end()
    }
}

/// An MQTT PUBLISH packet, containing data to be sent or received.
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    /// The topic that the message was published on.
    pub topic: String<MAX_TOPIC_LENGTH>,

    /// The application message.
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,

    /// Specifies the quality-of-service of the transmission.
    pub qos: QoS,

    /// The packet identifier. Only present for QoS 1 and 2.
    pub packet_id: Option<u16>,

    /// Specifies whether or not the message should be retained on the broker.
    pub retain: bool,

    /// Specified true if this message is a duplicate of an earlier transmission.
    pub dup: bool,
}

impl Publish {
    /// Construct a QoS 0 publication.
    pub fn new(topic: &str, payload: &[u8]) -> Result<Self, Error> {
        let mut owned_topic = String::new();
        owned_topic
            .push_str(topic)
            .map_err(|_| Error::InsufficientMemory)?;

        Ok(Self {
            topic: owned_topic,
            payload: Vec::from_slice(payload).map_err(|_| Error::InsufficientMemory)?,
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: false,
            dup: false,
        })
    }
}

impl serde::Serialize for Publish {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut item = serializer.serialize_struct("Publish", 0)?;
        item.serialize_field("topic", &Utf8String(&self.topic))?;
        item.serialize_field("packet_identifier", &self.packet_id)?;
        item.serialize_field("payload", self.payload.as_slice())?;
        item.end()
    }
}

/// An MQTT PUBACK control packet
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Puback {
    /// The ID of the publication being acknowledged.
    pub packet_id: u16,
}

/// An MQTT SUBSCRIBE control packet
#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    /// Specifies the ID of this subscription request.
    pub packet_id: u16,

    /// Topic filters and their requested maximum QoS.
    pub topics: Vec<(String<MAX_TOPIC_LENGTH>, QoS), MAX_TOPICS_PER_SUBSCRIPTION>,
}

impl serde::Serialize for Subscribe {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut item = serializer.serialize_struct("Subscribe", 0)?;
        item.serialize_field("packet_identifier", &self.packet_id)?;
        for (topic, qos) in self.topics.iter() {
            item.serialize_field("topic", &Utf8String(topic))?;
            item.serialize_field("qos", &(*qos as u8))?;
        }
        item.end()
    }
}

/// An MQTT SUBACK control packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Suback {
    /// The identifier of the subscription request being acknowledged.
    pub packet_id: u16,

    /// One result per requested topic filter, in request order.
    pub granted_qos: Vec<SubscribeReturnCode, MAX_TOPICS_PER_SUBSCRIPTION>,
}

impl serde::Serialize for Suback {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut item = serializer.serialize_struct("Suback", 0)?;
        item.serialize_field("packet_identifier", &self.packet_id)?;
        for code in self.granted_qos.iter() {
            item.serialize_field("code", code)?;
        }
        item.end()
    }
}

/// An MQTT PINGREQ control packet
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct PingReq;

/// An MQTT PINGRESP control packet
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct PingResp;

/// An MQTT DISCONNECT control packet
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Disconnect;

/// Any MQTT 3.1.1 control packet handled by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum MqttPacket {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Puback),
    Subscribe(Subscribe),
    Suback(Suback),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl MqttPacket {
    /// Encode the packet into a buffer.
    ///
    /// # Args
    /// * `buf` - The buffer to encode data into.
    ///
    /// # Returns
    /// The slice of `buf` containing the complete packet, fixed header included.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a [u8], Error> {
        self.validate()?;

        match self {
            MqttPacket::Connect(connect) => MqttSerializer::to_buffer(buf, connect),
            MqttPacket::Connack(connack) => MqttSerializer::to_buffer(buf, connack),
            MqttPacket::Publish(publish) => MqttSerializer::to_buffer(buf, publish),
            MqttPacket::Puback(puback) => MqttSerializer::to_buffer(buf, puback),
            MqttPacket::Subscribe(subscribe) => MqttSerializer::to_buffer(buf, subscribe),
            MqttPacket::Suback(suback) => MqttSerializer::to_buffer(buf, suback),
            MqttPacket::Pingreq => MqttSerializer::to_buffer(buf, &PingReq),
            MqttPacket::Pingresp => MqttSerializer::to_buffer(buf, &PingResp),
            MqttPacket::Disconnect => MqttSerializer::to_buffer(buf, &Disconnect),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            MqttPacket::Publish(publish) => {
                if !is_valid_topic(&publish.topic) {
                    return Err(Error::InvalidTopic);
                }

                match (publish.qos, publish.packet_id) {
                    (QoS::AtMostOnce, None) => Ok(()),
                    (QoS::AtMostOnce, Some(_)) => Err(Error::InvalidPacketIdentifier),
                    (_, Some(id)) if id != 0 => Ok(()),
                    _ => Err(Error::InvalidPacketIdentifier),
                }
            }

            MqttPacket::Subscribe(subscribe) => {
                if subscribe.packet_id == 0 {
                    return Err(Error::InvalidPacketIdentifier);
                }

                if subscribe.topics.is_empty()
                    || subscribe.topics.iter().any(|(topic, _)| !is_valid_topic(topic))
                {
                    return Err(Error::InvalidTopic);
                }

                Ok(())
            }

            MqttPacket::Puback(Puback { packet_id }) | MqttPacket::Suback(Suback { packet_id, .. })
                if *packet_id == 0 =>
            {
                Err(Error::InvalidPacketIdentifier)
            }

            _ => Ok(()),
        }
    }

    /// A short name of the packet type, used for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            MqttPacket::Connect(_) => "CONNECT",
            MqttPacket::Connack(_) => "CONNACK",
            MqttPacket::Publish(_) => "PUBLISH",
            MqttPacket::Puback(_) => "PUBACK",
            MqttPacket::Subscribe(_) => "SUBSCRIBE",
            MqttPacket::Suback(_) => "SUBACK",
            MqttPacket::Pingreq => "PINGREQ",
            MqttPacket::Pingresp => "PINGRESP",
            MqttPacket::Disconnect => "DISCONNECT",
        }
    }
}
