use crate::design_parameters::{
    MAX_CLIENT_ID_LENGTH, MAX_HOST_LENGTH, MAX_PASSPHRASE_LENGTH, MAX_SSID_LENGTH,
};
use crate::MQTT_INSECURE_DEFAULT_PORT;
use core::str::FromStr;
use embedded_nal::IpAddr;
use embedded_time::duration::{Extensions, Milliseconds};
use heapless::String;

/// Errors produced while assembling a [Config].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The SSID exceeds 32 bytes.
    SsidTooLong,
    /// The passphrase exceeds 64 bytes.
    PassphraseTooLong,
    /// The broker host name exceeds the supported length.
    HostTooLong,
    /// The client ID exceeds the supported length.
    ClientIdTooLong,
}

/// Time budgets for the individual AT transactions.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Timeouts {
    /// Simple configuration commands.
    pub command: Milliseconds<u32>,

    /// Joining the Wi-Fi network. Association and DHCP regularly take several seconds.
    pub join: Milliseconds<u32>,

    /// Opening the TCP connection to the broker.
    pub open: Milliseconds<u32>,

    /// Each phase of transmitting socket data.
    pub send: Milliseconds<u32>,

    /// The pause between join attempts.
    pub backoff: Milliseconds<u32>,

    /// Waiting for the broker to answer CONNECT. The connection is closed when it expires.
    pub connack: Milliseconds<u32>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: 2_000.milliseconds(),
            join: 20_000.milliseconds(),
            open: 10_000.milliseconds(),
            send: 5_000.milliseconds(),
            backoff: 1_000.milliseconds(),
            connack: 10_000.milliseconds(),
        }
    }
}

/// Configuration specifying the network, broker and session parameters of the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) ssid: String<MAX_SSID_LENGTH>,
    pub(crate) password: String<MAX_PASSPHRASE_LENGTH>,
    pub(crate) host: String<MAX_HOST_LENGTH>,
    pub(crate) port: u16,
    pub(crate) client_id: String<MAX_CLIENT_ID_LENGTH>,
    pub(crate) keepalive_interval: u16,
    pub(crate) clean_session: bool,
    pub(crate) timeouts: Timeouts,
    pub(crate) join_attempts: u8,
}

impl Config {
    /// Construct configuration for the bridge.
    ///
    /// # Args
    /// * `ssid` - The name of the Wi-Fi network to join.
    /// * `password` - The passphrase of the Wi-Fi network. May be empty for open networks.
    /// * `host` - The broker host name or dotted IP address.
    pub fn new(ssid: &str, password: &str, host: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            ssid: String::from_str(ssid).map_err(|_| ConfigError::SsidTooLong)?,
            password: String::from_str(password).map_err(|_| ConfigError::PassphraseTooLong)?,
            host: String::from_str(host).map_err(|_| ConfigError::HostTooLong)?,
            port: MQTT_INSECURE_DEFAULT_PORT,
            client_id: String::new(),
            keepalive_interval: 60,
            clean_session: true,
            timeouts: Timeouts::default(),
            join_attempts: 3,
        })
    }

    /// Specify the TCP port of the broker.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Address the broker by IP instead of host name.
    pub fn broker_ip(mut self, ip: IpAddr) -> Self {
        use core::fmt::Write;

        let mut host = String::new();
        // An IPv6 address is at most 39 characters and always fits.
        write!(&mut host, "{}", ip).ok();
        self.host = host;
        self
    }

    /// Specify the MQTT client ID. If not assigned, the broker will assign one.
    pub fn client_id(mut self, id: &str) -> Result<Self, ConfigError> {
        self.client_id = String::from_str(id).map_err(|_| ConfigError::ClientIdTooLong)?;
        Ok(self)
    }

    /// Configure the MQTT keep-alive interval.
    ///
    /// # Args
    /// * `seconds` - The keep-alive interval in seconds. A ping is transmitted every half
    /// interval and the link is considered lost if no response arrives within a full interval.
    /// Zero disables keep-alive.
    pub fn keepalive_interval(mut self, seconds: u16) -> Self {
        self.keepalive_interval = seconds;
        self
    }

    /// Specify whether the broker should discard previous session state on connection.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Override the AT transaction time budgets.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Specify how often joining the Wi-Fi network is attempted before failure is reported.
    pub fn join_attempts(mut self, attempts: u8) -> Self {
        self.join_attempts = attempts.max(1);
        self
    }

    /// The broker host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_nal::Ipv4Addr;

    #[test]
    fn defaults() {
        let config = Config::new("net", "secret", "broker.local").unwrap();
        assert_eq!(config.port, 1883);
        assert_eq!(config.keepalive_interval, 60);
        assert_eq!(config.join_attempts, 3);
        assert!(config.clean_session);
        assert_eq!(config.timeouts.join, Milliseconds(20_000u32));
        assert_eq!(config.timeouts.connack, Milliseconds(10_000u32));
    }

    #[test]
    fn capacity_is_enforced() {
        let long = "0123456789012345678901234567890123456789";
        assert_eq!(
            Config::new(long, "", "host").unwrap_err(),
            ConfigError::SsidTooLong
        );
        assert_eq!(
            Config::new("net", "", "host")
                .unwrap()
                .client_id(long)
                .unwrap_err(),
            ConfigError::ClientIdTooLong
        );
    }

    #[test]
    fn broker_ip_replaces_host() {
        let config = Config::new("net", "", "host")
            .unwrap()
            .broker_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 3)));
        assert_eq!(config.host(), "192.168.1.3");
    }
}
