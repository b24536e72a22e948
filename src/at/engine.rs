use super::scanner::{AtScanner, Notice, Step};
use crate::de::ReassemblyBuffer;
use crate::design_parameters::{MAX_AT_COMMAND_LENGTH, MAX_AT_RESPONSE_LENGTH, READ_CHUNK_SIZE};
use crate::{debug, trace, warn, Error, Transport};
use embedded_nal::nb;
use embedded_time::{duration::Milliseconds, Clock, Instant};
use heapless::Vec;

/// The terminator of most successful AT transactions.
pub const OK: &[u8] = b"OK\r\n";

/// A single AT command and the responses that complete it.
#[derive(Debug, Copy, Clone)]
pub struct AtTransaction<'a> {
    /// The command text, without line ending.
    pub command: &'a [u8],

    /// Byte sequences that complete the transaction successfully. They are matched at the start
    /// of a response line.
    pub expected_terminators: &'a [&'a [u8]],

    /// The maximum time to wait for a terminator.
    pub timeout: Milliseconds<u32>,
}

impl<'a> AtTransaction<'a> {
    /// Construct a transaction that completes on `OK`.
    pub fn new(command: &'a [u8], timeout: Milliseconds<u32>) -> Self {
        Self {
            command,
            expected_terminators: &[OK],
            timeout,
        }
    }

    /// Complete the transaction on any of `terminators` instead.
    pub fn terminators(mut self, terminators: &'a [&'a [u8]]) -> Self {
        self.expected_terminators = terminators;
        self
    }
}

/// The outcome of an AT transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtResult {
    /// A terminator was matched. Contains every response line received since the command was
    /// issued, excluding `+IPD` data and unsolicited notices.
    Ok(Vec<u8, MAX_AT_RESPONSE_LENGTH>),

    /// No terminator was matched in time.
    Timeout,

    /// The module reported failure, with its numeric error code if one was provided.
    ModuleError(Option<u32>),
}

/// Unsolicited notices observed since they were last taken.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Notices {
    /// The module reported `CLOSED` for the TCP socket.
    pub socket_closed: bool,

    /// The module reported `WIFI DISCONNECT`.
    pub wifi_disconnected: bool,
}

impl Notices {
    /// Check that no notice was observed.
    pub fn is_empty(&self) -> bool {
        !(self.socket_closed || self.wifi_disconnected)
    }
}

/// The AT command/response engine.
///
/// # Note
/// Inbound socket data framed by `+IPD` is routed into the reassembly buffer whenever it is
/// encountered, both while a transaction is waiting for its terminator and while polling.
pub struct AtEngine<T: Transport, C: Clock<T = u32>, const RX: usize> {
    transport: T,
    clock: C,
    scanner: AtScanner,
    inbound: ReassemblyBuffer<RX>,
    rx: [u8; READ_CHUNK_SIZE],
    rx_head: usize,
    rx_len: usize,
    notices: Notices,
    desync: bool,
}

impl<T, C, const RX: usize> AtEngine<T, C, RX>
where
    T: Transport,
    C: Clock<T = u32>,
{
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            scanner: AtScanner::new(),
            inbound: ReassemblyBuffer::new(),
            rx: [0; READ_CHUNK_SIZE],
            rx_head: 0,
            rx_len: 0,
            notices: Notices::default(),
            desync: false,
        }
    }

    /// Get the current time of the engine clock.
    pub fn now(&self) -> Result<Instant<C>, Error<T::Error>> {
        Ok(self.clock.try_now()?)
    }

    /// Inbound socket data that has not been decoded yet.
    pub fn inbound(&mut self) -> &mut ReassemblyBuffer<RX> {
        &mut self.inbound
    }

    /// Take the notices observed since the last call.
    pub fn take_notices(&mut self) -> Notices {
        core::mem::take(&mut self.notices)
    }

    /// Determine whether inbound data was lost since the last call.
    ///
    /// # Note
    /// Once inbound data overflows, all further socket data is discarded until this is called,
    /// so nothing misaligned reaches the reassembly buffer.
    pub fn take_desync(&mut self) -> bool {
        core::mem::replace(&mut self.desync, false)
    }

    /// Issue an AT command and wait for it to complete.
    ///
    /// # Note
    /// Pending input is drained before the command is written so that stale responses of an
    /// earlier transaction cannot complete this one.
    pub fn execute(&mut self, transaction: &AtTransaction) -> Result<AtResult, Error<T::Error>> {
        self.poll()?;

        let mut line: Vec<u8, MAX_AT_COMMAND_LENGTH> = Vec::new();
        line.extend_from_slice(transaction.command)
            .and_then(|_| line.extend_from_slice(b"\r\n"))
            .map_err(|_| {
                warn!("AT command exceeds {} bytes", MAX_AT_COMMAND_LENGTH);
                Error::Unsupported
            })?;

        debug!("AT> {}", command_name(transaction.command));
        self.write_raw(&line)?;

        self.await_response(transaction.expected_terminators, transaction.timeout)
    }

    /// Write bytes to the module without any framing.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), Error<T::Error>> {
        self.transport.write(data).map_err(Error::Transport)
    }

    /// Wait for one of `terminators` without issuing a command.
    pub fn await_response(
        &mut self,
        terminators: &[&[u8]],
        timeout: Milliseconds<u32>,
    ) -> Result<AtResult, Error<T::Error>> {
        let deadline = self.deadline(timeout)?;
        let mut response = Vec::new();

        loop {
            if let Some(byte) = self.next_byte()? {
                if let Some(result) = self.scan(byte, terminators, Some(&mut response)) {
                    return Ok(result);
                }
            }

            if self.clock.try_now()? > deadline {
                debug!("AT transaction timed out");
                return Ok(AtResult::Timeout);
            }
        }
    }

    /// Process all input that is currently available.
    pub fn poll(&mut self) -> Result<(), Error<T::Error>> {
        while let Some(byte) = self.next_byte()? {
            if let Some(AtResult::ModuleError(_code)) = self.scan(byte, &[], None) {
                debug!("Ignoring unsolicited failure: {:?}", _code);
            }
        }

        Ok(())
    }

    /// Keep processing input for `duration`.
    pub fn wait(&mut self, duration: Milliseconds<u32>) -> Result<(), Error<T::Error>> {
        let deadline = self.deadline(duration)?;
        loop {
            self.poll()?;
            if self.clock.try_now()? > deadline {
                return Ok(());
            }
        }
    }

    fn deadline(&self, timeout: Milliseconds<u32>) -> Result<Instant<C>, Error<T::Error>> {
        let now = self.clock.try_now()?;
        Ok(crate::session_state::deadline(now, timeout)?)
    }

    fn next_byte(&mut self) -> Result<Option<u8>, Error<T::Error>> {
        if self.rx_head >= self.rx_len {
            self.rx_head = 0;
            self.rx_len = match self.transport.read(&mut self.rx) {
                Ok(count) => count.min(READ_CHUNK_SIZE),
                Err(nb::Error::WouldBlock) => 0,
                Err(nb::Error::Other(error)) => return Err(Error::Transport(error)),
            };

            if self.rx_len == 0 {
                return Ok(None);
            }
        }

        let byte = self.rx[self.rx_head];
        self.rx_head += 1;
        Ok(Some(byte))
    }

    fn scan(
        &mut self,
        byte: u8,
        terminators: &[&[u8]],
        response: Option<&mut Vec<u8, MAX_AT_RESPONSE_LENGTH>>,
    ) -> Option<AtResult> {
        match self.scanner.feed(byte, terminators) {
            Step::Pending => None,

            Step::Data(byte) => {
                if !self.desync && self.inbound.feed(&[byte]).is_err() {
                    self.desync = true;
                }
                None
            }

            Step::Line => {
                trace!("AT< {:?}", self.scanner.line());
                if let Some(response) = response {
                    // Responses beyond the capacity are truncated.
                    response.extend_from_slice(self.scanner.line()).ok();
                    response.extend_from_slice(b"\r\n").ok();
                }
                None
            }

            Step::Matched(index) => {
                let mut response = response.map(core::mem::take).unwrap_or_default();
                if let Some(terminator) = terminators.get(index) {
                    response.extend_from_slice(terminator).ok();
                }
                Some(AtResult::Ok(response))
            }

            Step::Failed(code) => {
                debug!("AT module error: {:?}", code);
                Some(AtResult::ModuleError(code))
            }

            Step::Notice(notice) => {
                debug!("AT notice: {:?}", notice);
                match notice {
                    Notice::SocketClosed => self.notices.socket_closed = true,
                    Notice::WifiDisconnected => self.notices.wifi_disconnected = true,
                }
                None
            }
        }
    }
}

/// The part of a command that is safe to log. Arguments may carry credentials.
fn command_name(command: &[u8]) -> &str {
    let end = command
        .iter()
        .position(|byte| *byte == b'=')
        .unwrap_or(command.len());
    core::str::from_utf8(&command[..end]).unwrap_or("<binary>")
}
