//! Wi-Fi and TCP socket management
//!
//! # Design
//! The link walks the module through `Disconnected -> WifiJoined -> SocketOpen`. Each step is a
//! single AT transaction. Any failed or timed out transaction returns the link to
//! `Disconnected`, and unsolicited `CLOSED` / `WIFI DISCONNECT` notices move it backwards as soon
//! as they are observed.
use crate::at::{AtEngine, AtResult, AtTransaction, OK};
use crate::config::Timeouts;
use crate::design_parameters::{MAX_AT_COMMAND_LENGTH, MAX_AT_RESPONSE_LENGTH, MAX_SEND_CHUNK};
use crate::{info, warn, Error, Transport};
use core::fmt::Write;
use embedded_time::Clock;
use heapless::{String, Vec};

/// How often the module is sent `AT` before it is considered absent.
const ATTENTION_ATTEMPTS: u8 = 3;

const PROMPT: &[u8] = b">";
const SEND_OK: &[u8] = b"SEND OK\r\n";
const ALREADY_CONNECTED: &[u8] = b"ALREADY CONNECTED\r\n";

/// The connectivity of the ESP8266.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    WifiJoined,
    SocketOpen,
}

/// Driver of a single-connection ESP8266 running the AT firmware.
pub struct Esp8266<T: Transport, C: Clock<T = u32>, const RX: usize> {
    engine: AtEngine<T, C, RX>,
    state: LinkState,
    timeouts: Timeouts,
    join_attempts: u8,
    initialized: bool,
}

impl<T, C, const RX: usize> Esp8266<T, C, RX>
where
    T: Transport,
    C: Clock<T = u32>,
{
    /// Construct the driver.
    ///
    /// # Args
    /// * `transport` - The UART connected to the module.
    /// * `clock` - The time source for all transaction timeouts.
    /// * `timeouts` - Time budgets of the individual transactions.
    /// * `join_attempts` - How often joining the network is attempted before failure is reported.
    pub fn new(transport: T, clock: C, timeouts: Timeouts, join_attempts: u8) -> Self {
        Self {
            engine: AtEngine::new(transport, clock),
            state: LinkState::Disconnected,
            timeouts,
            join_attempts: join_attempts.max(1),
            initialized: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Determine if [Esp8266::initialize] completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn engine(&mut self) -> &mut AtEngine<T, C, RX> {
        &mut self.engine
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            info!("Link state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Force the link into `Disconnected`, e.g. after the broker stopped responding.
    pub fn mark_disconnected(&mut self) {
        self.set_state(LinkState::Disconnected);
    }

    fn transact(
        &mut self,
        transaction: &AtTransaction,
    ) -> Result<Vec<u8, MAX_AT_RESPONSE_LENGTH>, Error<T::Error>> {
        match self.engine.execute(transaction)? {
            AtResult::Ok(response) => Ok(response),
            AtResult::Timeout => Err(Error::Timeout),
            AtResult::ModuleError(code) => Err(Error::Module(code)),
        }
    }

    fn apply_notices(&mut self) {
        let notices = self.engine.take_notices();
        if notices.wifi_disconnected {
            warn!("Module lost the Wi-Fi association");
            self.set_state(LinkState::Disconnected);
        } else if notices.socket_closed && self.state == LinkState::SocketOpen {
            warn!("Broker connection closed");
            self.set_state(LinkState::WifiJoined);
        }
    }

    /// Process pending module output and apply unsolicited notices.
    pub fn poll(&mut self) -> Result<LinkState, Error<T::Error>> {
        self.engine.poll()?;
        self.apply_notices();
        Ok(self.state)
    }

    /// Bring the module into a known configuration: echo off, station mode, single connection.
    pub fn initialize(&mut self) -> Result<(), Error<T::Error>> {
        let attention = AtTransaction::new(b"AT", self.timeouts.command);
        let mut attempt = 1;
        while let Err(error) = self.transact(&attention) {
            if attempt >= ATTENTION_ATTEMPTS {
                warn!("Module does not respond to AT");
                return Err(error);
            }
            attempt += 1;
        }

        let commands: [&[u8]; 3] = [b"ATE0", b"AT+CWMODE=1", b"AT+CIPMUX=0"];
        for command in commands.iter() {
            self.transact(&AtTransaction::new(command, self.timeouts.command))?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Join the network and open the broker connection, resuming from the current state.
    ///
    /// # Args
    /// * `ssid` - The network to join.
    /// * `password` - The network passphrase.
    /// * `host` - The broker host name or address.
    /// * `port` - The broker TCP port.
    ///
    /// # Returns
    /// The resulting link state. On failure the link is `Disconnected`.
    pub fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        host: &str,
        port: u16,
    ) -> Result<LinkState, Error<T::Error>> {
        let result = self.advance(ssid, password, host, port);
        if result.is_err() {
            self.set_state(LinkState::Disconnected);
        }
        result
    }

    fn advance(
        &mut self,
        ssid: &str,
        password: &str,
        host: &str,
        port: u16,
    ) -> Result<LinkState, Error<T::Error>> {
        self.poll()?;

        if self.state == LinkState::Disconnected {
            self.join(ssid, password)?;
        }

        if self.state == LinkState::WifiJoined {
            self.open(host, port)?;
        }

        Ok(self.state)
    }

    fn join(&mut self, ssid: &str, password: &str) -> Result<(), Error<T::Error>> {
        let mut command: String<MAX_AT_COMMAND_LENGTH> = String::new();
        command
            .push_str("AT+CWJAP=")
            .and_then(|_| push_quoted(&mut command, ssid))
            .and_then(|_| command.push(','))
            .and_then(|_| push_quoted(&mut command, password))
            .map_err(|_| Error::Unsupported)?;

        let transaction = AtTransaction::new(command.as_bytes(), self.timeouts.join);
        let mut attempt = 1;
        loop {
            match self.transact(&transaction) {
                Ok(_) => break,

                // The module rejected the credentials or could not find the network.
                Err(Error::Module(code)) => return Err(Error::Module(code)),

                Err(error) if attempt >= self.join_attempts => return Err(error),

                Err(_error) => {
                    warn!("Join attempt {} failed: {:?}", attempt, _error);
                    attempt += 1;
                    self.engine.wait(self.timeouts.backoff)?;
                }
            }
        }

        self.apply_notices();
        self.set_state(LinkState::WifiJoined);
        Ok(())
    }

    fn open(&mut self, host: &str, port: u16) -> Result<(), Error<T::Error>> {
        let mut command: String<MAX_AT_COMMAND_LENGTH> = String::new();
        command
            .push_str("AT+CIPSTART=\"TCP\",")
            .and_then(|_| push_quoted(&mut command, host))
            .and_then(|_| write!(&mut command, ",{}", port).map_err(|_| ()))
            .map_err(|_| Error::Unsupported)?;

        let terminators = [OK, ALREADY_CONNECTED];
        self.transact(
            &AtTransaction::new(command.as_bytes(), self.timeouts.open).terminators(&terminators),
        )?;

        self.apply_notices();
        self.set_state(LinkState::SocketOpen);
        Ok(())
    }

    /// Transmit data over the open TCP connection.
    ///
    /// # Note
    /// Payloads are sent in chunks of at most 2048 bytes, the limit of a single `AT+CIPSEND`.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error<T::Error>> {
        if self.state != LinkState::SocketOpen {
            return Err(Error::NotReady);
        }

        for chunk in data.chunks(MAX_SEND_CHUNK) {
            if let Err(error) = self.send_chunk(chunk) {
                warn!("Send failed: {:?}", error);
                self.set_state(LinkState::Disconnected);
                return Err(error);
            }
        }

        Ok(())
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), Error<T::Error>> {
        let mut command: String<24> = String::new();
        write!(&mut command, "AT+CIPSEND={}", chunk.len()).map_err(|_| Error::Unsupported)?;

        self.transact(
            &AtTransaction::new(command.as_bytes(), self.timeouts.send).terminators(&[PROMPT]),
        )?;

        self.engine.write_raw(chunk)?;

        match self.engine.await_response(&[SEND_OK], self.timeouts.send)? {
            AtResult::Ok(_) => Ok(()),
            AtResult::Timeout => Err(Error::Timeout),
            AtResult::ModuleError(code) => Err(Error::Module(code)),
        }
    }

    /// Close the TCP connection, keeping the Wi-Fi association.
    pub fn close(&mut self) -> Result<(), Error<T::Error>> {
        if self.state != LinkState::SocketOpen {
            return Ok(());
        }

        match self.transact(&AtTransaction::new(b"AT+CIPCLOSE", self.timeouts.command)) {
            Ok(_) => {
                self.set_state(LinkState::WifiJoined);
                self.apply_notices();
                Ok(())
            }
            Err(error) => {
                self.set_state(LinkState::Disconnected);
                Err(error)
            }
        }
    }
}

/// Append `value` as a quoted AT argument, escaping the characters the firmware treats as
/// delimiters.
fn push_quoted<const N: usize>(command: &mut String<N>, value: &str) -> Result<(), ()> {
    command.push('"')?;
    for c in value.chars() {
        if matches!(c, '"' | ',' | '\\') {
            command.push('\\')?;
        }
        command.push(c)?;
    }
    command.push('"')
}
