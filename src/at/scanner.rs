//! Incremental AT response scanner
//!
//! # Design
//! The ESP8266 multiplexes three kinds of traffic onto one UART: response lines for the command
//! in flight, unsolicited notices, and inbound socket data framed as `+IPD,<len>:<data>`. The
//! scanner classifies the stream one byte at a time with a fixed amount of work per byte, so
//! it never re-searches previously received data.
//!
//! Terminators are only matched when anchored at the start of a line. This keeps `OK` from
//! matching the tail of `SEND OK`, and lets the `>` send prompt match without a line ending.
use crate::design_parameters::{MAX_AT_LINE_LENGTH, MAX_AT_TERMINATORS};
use heapless::Vec;

const IPD_PREFIX: &[u8] = b"+IPD,";

/// The largest declared `+IPD` length that is accepted. Larger values indicate a corrupted
/// header.
const MAX_IPD_LENGTH: usize = 8192;

/// Unsolicited state changes reported by the module.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The TCP connection was closed by the remote or the module.
    SocketClosed,
    /// The module lost its Wi-Fi association.
    WifiDisconnected,
}

/// The outcome of scanning a single byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// The byte was absorbed; nothing to report yet.
    Pending,

    /// A response line was completed and is available from [AtScanner::line].
    Line,

    /// The byte belongs to the payload of an `+IPD` frame.
    Data(u8),

    /// The current line matched the terminator at the provided index. The line is available
    /// from [AtScanner::line].
    Matched(usize),

    /// The module reported failure, optionally with a numeric error code.
    Failed(Option<u32>),

    /// The module reported an unsolicited state change.
    Notice(Notice),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Mode {
    Line,
    IpdLength { length: usize, digits: u8 },
    IpdData { remaining: usize },
}

/// Byte-wise classifier of the ESP8266 output stream.
pub(crate) struct AtScanner {
    mode: Mode,
    line: Vec<u8, MAX_AT_LINE_LENGTH>,
    column: usize,
    candidates: u32,
    error_code: Option<u32>,
}

impl AtScanner {
    pub fn new() -> Self {
        Self {
            mode: Mode::Line,
            line: Vec::new(),
            column: 0,
            candidates: u32::MAX,
            error_code: None,
        }
    }

    /// The text of the most recently completed or matched line, without its line ending.
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    fn start_line(&mut self) {
        self.line.clear();
        self.column = 0;
        self.candidates = u32::MAX;
    }

    /// Scan the next byte from the module.
    ///
    /// # Args
    /// * `byte` - The received byte.
    /// * `terminators` - Byte sequences that complete the command in flight.
    pub fn feed(&mut self, byte: u8, terminators: &[&[u8]]) -> Step {
        match self.mode {
            Mode::IpdData { remaining } => {
                if remaining <= 1 {
                    self.mode = Mode::Line;
                    self.start_line();
                } else {
                    self.mode = Mode::IpdData {
                        remaining: remaining - 1,
                    };
                }

                Step::Data(byte)
            }

            Mode::IpdLength { length, digits } => self.scan_ipd_length(byte, length, digits),

            Mode::Line => self.scan_line(byte, terminators),
        }
    }

    fn scan_ipd_length(&mut self, byte: u8, length: usize, digits: u8) -> Step {
        match byte {
            b'0'..=b'9' if digits < 5 => {
                self.mode = Mode::IpdLength {
                    length: length * 10 + (byte - b'0') as usize,
                    digits: digits + 1,
                };
            }

            // Multi-connection framing: `+IPD,<link id>,<len>:`. The value parsed so far was the
            // link identifier.
            b',' if digits > 0 => {
                self.mode = Mode::IpdLength {
                    length: 0,
                    digits: 0,
                };
            }

            b':' if digits > 0 && length > 0 && length <= MAX_IPD_LENGTH => {
                self.mode = Mode::IpdData { remaining: length };
            }

            _ => {
                crate::warn!("Discarding malformed +IPD header");
                self.mode = Mode::Line;
                self.start_line();
            }
        }

        Step::Pending
    }

    fn scan_line(&mut self, byte: u8, terminators: &[&[u8]]) -> Step {
        // The send prompt is followed by a space that does not start a line.
        if self.column == 0 && byte == b' ' {
            return Step::Pending;
        }

        // The previous line stays readable until the first byte of the next one arrives.
        if self.column == 0 {
            self.start_line();
        }

        let position = self.column;
        self.column += 1;

        // Advance all terminators that are still consistent with the line received so far.
        let mut matched = None;
        for (index, terminator) in terminators.iter().take(MAX_AT_TERMINATORS).enumerate() {
            let bit = 1u32 << index;
            if self.candidates & bit == 0 {
                continue;
            }

            if terminator.get(position) == Some(&byte) {
                if position + 1 == terminator.len() && matched.is_none() {
                    matched.replace(index);
                }
            } else {
                self.candidates &= !bit;
            }
        }

        if byte != b'\r' && byte != b'\n' {
            // Overlong lines are truncated. Only line prefixes are ever classified.
            self.line.push(byte).ok();
        }

        if let Some(index) = matched {
            self.error_code.take();
            self.column = 0;
            return Step::Matched(index);
        }

        if position + 1 == IPD_PREFIX.len() && self.line.as_slice() == IPD_PREFIX {
            self.mode = Mode::IpdLength {
                length: 0,
                digits: 0,
            };
            self.start_line();
            return Step::Pending;
        }

        if byte != b'\n' {
            return Step::Pending;
        }

        self.column = 0;
        self.classify()
    }

    fn classify(&mut self) -> Step {
        let line = self.line.as_slice();

        if line.is_empty() {
            Step::Pending
        } else if line == b"ERROR" || line == b"FAIL" || line == b"SEND FAIL" {
            Step::Failed(self.error_code.take())
        } else if let Some(code) = line.strip_prefix(b"ERR CODE:0x") {
            self.error_code = parse_hex(code);
            Step::Line
        } else if let Some(code) = line.strip_prefix(b"+CWJAP:") {
            self.error_code = parse_decimal(code);
            Step::Line
        } else if line == b"CLOSED" || is_link_closed(line) {
            Step::Notice(Notice::SocketClosed)
        } else if line == b"WIFI DISCONNECT" {
            Step::Notice(Notice::WifiDisconnected)
        } else {
            Step::Line
        }
    }
}

/// Multi-connection close notices are formatted as `<link id>,CLOSED`.
fn is_link_closed(line: &[u8]) -> bool {
    match line.iter().position(|byte| *byte == b',') {
        Some(index) => {
            index > 0
                && line[..index].iter().all(u8::is_ascii_digit)
                && &line[index + 1..] == b"CLOSED"
        }
        None => false,
    }
}

fn parse_hex(digits: &[u8]) -> Option<u32> {
    let text = core::str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}

fn parse_decimal(digits: &[u8]) -> Option<u32> {
    let text = core::str::from_utf8(digits).ok()?;
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(scanner: &mut AtScanner, data: &[u8], terminators: &[&[u8]]) -> Vec<Step, 64> {
        let mut steps = Vec::new();
        for byte in data {
            let step = scanner.feed(*byte, terminators);
            if step != Step::Pending {
                steps.push(step).unwrap();
            }
        }
        steps
    }

    #[test]
    fn matches_ok_terminator() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"\r\nOK\r\n", &[b"OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Matched(0)]);
    }

    #[test]
    fn terminators_are_anchored_at_line_start() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"SEND OK\r\n", &[b"OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Line]);

        let steps = scan(&mut scanner, b"SEND OK\r\n", &[b"OK\r\n", b"SEND OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Matched(1)]);
    }

    #[test]
    fn prompt_matches_without_line_ending() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"\r\nOK\r\n> ", &[b">"]);
        assert_eq!(steps.as_slice(), &[Step::Line, Step::Matched(0)]);
    }

    #[test]
    fn space_after_prompt_is_skipped() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"> SEND OK\r\n", &[b">", b"SEND OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Matched(0), Step::Matched(1)]);
    }

    #[test]
    fn ipd_payload_is_framed() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"\r\n+IPD,3:\r\nOK\r\n", &[b"OK\r\n"]);
        assert_eq!(
            steps.as_slice(),
            &[
                Step::Data(b'\r'),
                Step::Data(b'\n'),
                Step::Data(b'O'),
                Step::Line,
            ]
        );
        assert_eq!(scanner.line(), b"K");
    }

    #[test]
    fn ipd_with_link_identifier() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"+IPD,0,2:\x20\x02OK\r\n", &[b"OK\r\n"]);
        assert_eq!(
            steps.as_slice(),
            &[Step::Data(0x20), Step::Data(0x02), Step::Matched(0)]
        );
    }

    #[test]
    fn malformed_ipd_header_is_dropped() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"+IPD,x\r\nOK\r\n", &[b"OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Matched(0)]);
        assert_eq!(scanner.mode, Mode::Line);
    }

    #[test]
    fn error_codes_are_reported() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"ERR CODE:0x01090000\r\nERROR\r\n", &[b"OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Line, Step::Failed(Some(0x0109_0000))]);

        let steps = scan(&mut scanner, b"+CWJAP:3\r\n\r\nFAIL\r\n", &[b"OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Line, Step::Failed(Some(3))]);

        let steps = scan(&mut scanner, b"ERROR\r\n", &[b"OK\r\n"]);
        assert_eq!(steps.as_slice(), &[Step::Failed(None)]);
    }

    #[test]
    fn notices_are_recognized() {
        let mut scanner = AtScanner::new();
        let steps = scan(&mut scanner, b"CLOSED\r\n0,CLOSED\r\nWIFI DISCONNECT\r\n", &[]);
        assert_eq!(
            steps.as_slice(),
            &[
                Step::Notice(Notice::SocketClosed),
                Step::Notice(Notice::SocketClosed),
                Step::Notice(Notice::WifiDisconnected),
            ]
        );
    }
}
