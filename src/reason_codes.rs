use crate::QoS;
use num_enum::{FromPrimitive, IntoPrimitive};

/// MQTT 3.1.1 CONNACK return codes.
#[derive(PartialEq, Eq, Copy, Clone, Debug, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0x00,
    UnacceptableProtocolVersion = 0x01,
    IdentifierRejected = 0x02,
    ServerUnavailable = 0x03,
    BadUsernameOrPassword = 0x04,
    NotAuthorized = 0x05,

    /// The return code is not one of the documented MQTT return codes.
    #[num_enum(default)]
    Unknown = 0xFF,
}

impl ConnectReturnCode {
    /// Determine if the connection was accepted.
    pub fn is_accepted(&self) -> bool {
        *self == ConnectReturnCode::Accepted
    }
}

impl serde::Serialize for ConnectReturnCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8((*self).into())
    }
}

/// Per-topic results carried in a SUBACK.
#[derive(PartialEq, Eq, Copy, Clone, Debug, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SubscribeReturnCode {
    MaximumQoS0 = 0x00,
    MaximumQoS1 = 0x01,
    MaximumQoS2 = 0x02,

    #[num_enum(default)]
    Failure = 0x80,
}

impl SubscribeReturnCode {
    /// The QoS granted by the broker, if the subscription succeeded.
    pub fn granted(&self) -> Option<QoS> {
        match self {
            SubscribeReturnCode::MaximumQoS0 => Some(QoS::AtMostOnce),
            SubscribeReturnCode::MaximumQoS1 => Some(QoS::AtLeastOnce),
            SubscribeReturnCode::MaximumQoS2 => Some(QoS::ExactlyOnce),
            SubscribeReturnCode::Failure => None,
        }
    }
}

impl serde::Serialize for SubscribeReturnCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8((*self).into())
    }
}
