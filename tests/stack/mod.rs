#![allow(dead_code)]

use esp_at_mqtt::embedded_nal::nb;
use esp_at_mqtt::embedded_time::{clock, fraction::Fraction, Clock, Instant};
use esp_at_mqtt::{Config, MqttSession, Timeouts, Transport};
use esp_at_mqtt::embedded_time::duration::Milliseconds;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MockError;

#[derive(Default)]
struct MockState {
    written: Vec<u8>,
    writes: usize,
    commands: Vec<String>,
    payloads: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    rx: VecDeque<u8>,
    line: Vec<u8>,
    payload: Vec<u8>,
    payload_remaining: usize,
    fail_writes: bool,
}

impl MockState {
    fn respond(&mut self) {
        if let Some(reply) = self.replies.pop_front() {
            self.rx.extend(reply);
        }
    }

    fn accept(&mut self, byte: u8) {
        if self.payload_remaining > 0 {
            self.payload.push(byte);
            self.payload_remaining -= 1;
            if self.payload_remaining == 0 {
                let payload = std::mem::take(&mut self.payload);
                self.payloads.push(payload);
                self.respond();
            }
            return;
        }

        self.line.push(byte);
        if !self.line.ends_with(b"\r\n") {
            return;
        }

        let command = String::from_utf8_lossy(&self.line[..self.line.len() - 2]).into_owned();
        self.line.clear();

        if let Some(length) = command.strip_prefix("AT+CIPSEND=") {
            self.payload_remaining = length.parse().unwrap();
        }

        self.commands.push(command);
        self.respond();
    }
}

/// A scripted ESP8266. Every complete command line, and every complete `AT+CIPSEND` payload,
/// releases the next queued reply.
#[derive(Clone, Default)]
pub struct MockEsp {
    state: Rc<RefCell<MockState>>,
}

impl MockEsp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the module output released by the next command or payload. An empty reply models
    /// a module that stays silent.
    pub fn reply(&self, data: &[u8]) -> &Self {
        self.state.borrow_mut().replies.push_back(data.to_vec());
        self
    }

    /// Make bytes available to read immediately.
    pub fn inject(&self, data: &[u8]) {
        self.state.borrow_mut().rx.extend(data.iter().copied());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.state.borrow().payloads.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn writes(&self) -> usize {
        self.state.borrow().writes
    }

    pub fn pending_replies(&self) -> usize {
        self.state.borrow().replies.len()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }
}

impl Transport for MockEsp {
    type Error = MockError;

    fn write(&mut self, data: &[u8]) -> Result<(), MockError> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(MockError);
        }

        state.writes += 1;
        state.written.extend_from_slice(data);
        for byte in data {
            state.accept(*byte);
        }

        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, MockError> {
        let mut state = self.state.borrow_mut();
        if state.rx.is_empty() {
            return Err(nb::Error::WouldBlock);
        }

        let count = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..count)) {
            *slot = byte;
        }

        Ok(count)
    }
}

/// A millisecond clock that advances by one tick every time it is read.
#[derive(Clone, Default)]
pub struct MockClock {
    now: Rc<Cell<u32>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u32) {
        self.now.set(self.now.get() + millis);
    }

    pub fn millis(&self) -> u32 {
        self.now.get()
    }
}

impl Clock for MockClock {
    type T = u32;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        let now = self.now.get();
        self.now.set(now + 1);
        Ok(Instant::new(now))
    }
}

pub type Session = MqttSession<MockEsp, MockClock, 1024>;

pub fn short_timeouts() -> Timeouts {
    Timeouts {
        command: Milliseconds(100),
        join: Milliseconds(200),
        open: Milliseconds(200),
        send: Milliseconds(100),
        backoff: Milliseconds(10),
        connack: Milliseconds(500),
    }
}

pub fn config(keepalive: u16) -> Config {
    Config::new("lab", "secret", "192.168.1.3")
        .unwrap()
        .client_id("device1")
        .unwrap()
        .keepalive_interval(keepalive)
        .timeouts(short_timeouts())
}

pub const CONNACK_ACCEPTED: &[u8] = b"\r\n+IPD,4:\x20\x02\x00\x00";
pub const PINGRESP: &[u8] = b"\r\n+IPD,2:\xd0\x00";

/// Queue the module output for one `AT+CIPSEND` transaction.
pub fn script_send(esp: &MockEsp) {
    esp.reply(b"\r\nOK\r\n> ").reply(b"\r\nSEND OK\r\n");
}

/// Queue the module output for a complete `connect()`: initialization, join, open and the
/// CONNECT transmission followed by the CONNACK.
pub fn script_connect(esp: &MockEsp) {
    for _ in 0..4 {
        esp.reply(b"\r\nOK\r\n");
    }

    esp.reply(b"WIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n");
    esp.reply(b"CONNECT\r\n\r\nOK\r\n");
    esp.reply(b"\r\nOK\r\n> ");

    let mut sent = b"\r\nRecv 21 bytes\r\n\r\nSEND OK\r\n".to_vec();
    sent.extend_from_slice(CONNACK_ACCEPTED);
    esp.reply(&sent);
}

/// Bring a session to the established state.
pub fn established_session(keepalive: u16) -> (Session, MockEsp, MockClock) {
    established_session_with::<1024>(keepalive)
}

/// Bring a session with an `RX` byte reassembly buffer to the established state.
pub fn established_session_with<const RX: usize>(
    keepalive: u16,
) -> (MqttSession<MockEsp, MockClock, RX>, MockEsp, MockClock) {
    let esp = MockEsp::new();
    let clock = MockClock::new();
    let mut session = MqttSession::new(config(keepalive), esp.clone(), clock.clone());

    script_connect(&esp);
    session.connect().unwrap();
    session.poll(|_| {}).unwrap();
    assert!(session.is_connected());

    (session, esp, clock)
}

/// Extract the MQTT packets transmitted through `AT+CIPSEND`.
pub fn sent_packets(esp: &MockEsp) -> Vec<esp_at_mqtt::MqttPacket> {
    esp.payloads()
        .iter()
        .map(|payload| {
            let (packet, consumed) = esp_at_mqtt::decode(payload).unwrap();
            assert_eq!(consumed, payload.len());
            packet
        })
        .collect()
}
