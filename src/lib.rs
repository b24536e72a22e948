#![no_std]
//! # ESP8266 AT-command MQTT bridge
//!
//! This crate provides a minimal MQTT 3.1.1 client for microcontrollers that reach the network
//! through an ESP8266 Wi-Fi module driven by its textual AT-command firmware. The host has no
//! TCP/IP stack of its own: joining a network, opening the broker socket, sending bytes and
//! receiving bytes are all AT command transactions over a single UART.
//!
//! # Design
//! The bridge is a single-threaded polling design. Every operation is bounded in time by the
//! provided [embedded_time::Clock]; no operation blocks indefinitely.
//!
//! * [at::AtEngine] issues AT commands and matches their responses byte-by-byte. Inbound socket
//! data announced by `+IPD` frames is routed into a [de::ReassemblyBuffer] as it is seen, even
//! while a command is waiting for its terminator.
//! * [link::Esp8266] sequences the engine through the Wi-Fi join and TCP open transactions and
//! owns the [link::LinkState].
//! * [MqttPacket] models the MQTT control packets, encoded with a serde-based serializer and
//! decoded incrementally from the reassembly buffer.
//! * [MqttSession] drives the MQTT connection on top of the link: CONNECT/CONNACK, packet
//! dispatch and keep-alive.
//!
//! Interrupt-driven UARTs should push received bytes through a [transport::RxProducer] and let
//! the polling loop drain them via [transport::QueuedTransport]. All protocol state is only ever
//! mutated from the polling loop.
//!
//! # Example
//! ```ignore
//! let config = Config::new("ssid", "password", "192.168.1.3")?
//!     .client_id("device1")?
//!     .keepalive_interval(60);
//!
//! let mut mqtt: MqttSession<_, _, 1024> = MqttSession::new(config, transport, clock);
//! mqtt.connect()?;
//!
//! loop {
//!     mqtt.poll(|publication| {
//!         log::info!("{}: {:?}", publication.topic, publication.payload);
//!     })?;
//! }
//! ```

pub mod at;
pub mod config;
pub mod de;
pub mod design_parameters;
pub mod link;
mod message_types;
pub mod mqtt_client;
pub mod packets;
mod reason_codes;
pub mod ser;
mod session_state;
pub mod transport;
pub mod types;
mod varint;

pub use at::{AtEngine, AtResult, AtTransaction};
pub use config::{Config, ConfigError, Timeouts};
pub use de::{decode, DecodeError, ReassemblyBuffer};
pub use embedded_nal;
pub use embedded_time;
pub use link::{Esp8266, LinkState};
pub use mqtt_client::{MqttSession, SessionStatus};
pub use packets::{Connack, Connect, MqttPacket, Puback, Publish, Suback, Subscribe};
pub use reason_codes::{ConnectReturnCode, SubscribeReturnCode};
pub use session_state::{KeepAliveError, SessionContext};
pub use transport::Transport;

use num_enum::TryFromPrimitive;

#[cfg(feature = "logging")]
pub(crate) use log::{debug, error, info, trace, warn};

/// Default port for MQTT connections without TLS.
pub const MQTT_INSECURE_DEFAULT_PORT: u16 = 1883;

/// The quality-of-service for an MQTT message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, TryFromPrimitive)]
#[repr(u8)]
pub enum QoS {
    /// A packet will be delivered at most once, but may not be delivered at all.
    AtMostOnce = 0,

    /// A packet will be delivered at least one time, but possibly more than once.
    AtLeastOnce = 1,

    /// A packet will be delivered exactly one time.
    ExactlyOnce = 2,
}

/// Errors that are specific to the MQTT protocol implementation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A packet arrived that is not permitted in the current session state.
    UnexpectedPacket,
    /// A received packet could not be parsed.
    MalformedPacket,
    /// A received packet does not fit into the receive buffer.
    PacketTooLarge,
    /// Inbound socket data overflowed the reassembly buffer and the stream lost alignment.
    BufferFull,
    /// An acknowledgement referenced a packet identifier that was not pending.
    BadIdentifier,
    /// The provided client ID exceeds the supported length.
    ProvidedClientIdTooLong,
}

/// Possible errors encountered while operating the bridge.
#[derive(Debug, PartialEq)]
pub enum Error<E> {
    /// The UART transport reported a failure.
    Transport(E),

    /// The module did not answer within the allotted time.
    Timeout,

    /// The module explicitly reported failure, optionally with a numeric error code.
    Module(Option<u32>),

    /// The link or session is not in a state that permits the operation.
    NotReady,

    /// The requested feature is not supported.
    Unsupported,

    /// The broker refused the MQTT connection.
    Refused(ConnectReturnCode),

    /// The MQTT protocol was violated.
    Protocol(ProtocolError),

    /// A control packet could not be serialized.
    Encode(ser::Error),

    /// The clock could not provide the current time.
    Clock(embedded_time::clock::Error),
}

impl<E> From<embedded_time::clock::Error> for Error<E> {
    fn from(clock: embedded_time::clock::Error) -> Self {
        Error::Clock(clock)
    }
}

impl<E> From<ProtocolError> for Error<E> {
    fn from(error: ProtocolError) -> Self {
        Error::Protocol(error)
    }
}

impl<E> From<ser::Error> for Error<E> {
    fn from(error: ser::Error) -> Self {
        Error::Encode(error)
    }
}

#[cfg(not(feature = "logging"))]
mod mqtt_log {
    macro_rules! log_trace {
        ($($arg:tt)*) => {{
            if false {
                let _ = core::format_args!($($arg)*);
            }
        }};
    }

    macro_rules! log_debug {
        ($($arg:tt)*) => {{
            if false {
                let _ = core::format_args!($($arg)*);
            }
        }};
    }

    macro_rules! log_info {
        ($($arg:tt)*) => {{
            if false {
                let _ = core::format_args!($($arg)*);
            }
        }};
    }

    macro_rules! log_warn {
        ($($arg:tt)*) => {{
            if false {
                let _ = core::format_args!($($arg)*);
            }
        }};
    }

    macro_rules! log_error {
        ($($arg:tt)*) => {{
            if false {
                let _ = core::format_args!($($arg)*);
            }
        }};
    }

    pub(crate) use {
        log_debug as debug, log_error as error, log_info as info, log_trace as trace,
        log_warn as warn,
    };
}

#[cfg(not(feature = "logging"))]
pub(crate) use mqtt_log::{debug, error, info, trace, warn};
