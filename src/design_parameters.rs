//! # Design Parameters
//! This module contains design constraints arbitrarily imposed on the library.

/// The maximum length of the Wi-Fi network name.
pub const MAX_SSID_LENGTH: usize = 32;

/// The maximum length of the Wi-Fi passphrase.
pub const MAX_PASSPHRASE_LENGTH: usize = 64;

/// The maximum length of the broker host name or address.
pub const MAX_HOST_LENGTH: usize = 64;

/// The maximum length of an MQTT client identifier. Brokers are only required to accept 23
/// characters.
pub const MAX_CLIENT_ID_LENGTH: usize = 23;

/// The maximum length of a topic name or topic filter.
pub const MAX_TOPIC_LENGTH: usize = 128;

/// The maximum size of a publication payload.
pub const MAX_PAYLOAD_SIZE: usize = 512;

/// The maximum size of a serialized outbound MQTT control packet.
pub const MAX_PACKET_SIZE: usize = 1024;

/// The maximum number of topics supported in a single subscription request.
pub const MAX_TOPICS_PER_SUBSCRIPTION: usize = 4;

/// The maximum number of subscriptions or publications awaiting acknowledgement.
pub const MAX_PENDING_ACKNOWLEDGEMENTS: usize = 8;

/// The number of bytes of a single AT response line that are retained for classification.
pub const MAX_AT_LINE_LENGTH: usize = 96;

/// The maximum size of the text collected for a single AT command response.
pub const MAX_AT_RESPONSE_LENGTH: usize = 256;

/// The maximum number of terminators that can be matched concurrently.
pub const MAX_AT_TERMINATORS: usize = 32;

/// The maximum length of an AT command line.
pub const MAX_AT_COMMAND_LENGTH: usize = 256;

/// The largest payload the ESP8266 accepts in a single `AT+CIPSEND`.
pub const MAX_SEND_CHUNK: usize = 2048;

/// The number of bytes pulled from the transport in a single read.
pub const READ_CHUNK_SIZE: usize = 64;
