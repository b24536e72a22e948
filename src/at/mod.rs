//! ESP8266 AT command layer
//!
//! # Design
//! Every network operation of the ESP8266 is an AT transaction: a command line written to the
//! UART followed by response lines that end in a terminator such as `OK` or `ERROR`. Inbound TCP
//! data shares the same byte stream and is announced by `+IPD` frames that may appear at any
//! point, including in the middle of another transaction's response.
//!
//! [AtEngine] owns the transport and a [crate::de::ReassemblyBuffer]. It writes commands and
//! classifies the returned bytes until a terminator is seen or the transaction times out, routing
//! all `+IPD` data into the reassembly buffer along the way.
mod engine;
mod scanner;

pub use engine::{AtEngine, AtResult, AtTransaction, Notices, OK};
pub use scanner::Notice;
