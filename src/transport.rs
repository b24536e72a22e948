//! UART transport boundary
//!
//! # Design
//! The ESP8266 is attached through a plain byte stream. The bridge only needs two primitives
//! from it: writing a buffer and reading whatever bytes are currently available without
//! blocking. Reads follow the `nb` convention: `WouldBlock` (or `Ok(0)`) means that no data is
//! available right now.
//!
//! Platforms that deliver received bytes from an interrupt should not let the interrupt touch
//! any protocol state. Instead, the interrupt handler owns an [RxProducer] and only appends raw
//! bytes to a lock-free single-producer/single-consumer queue. The polling loop owns the matching
//! [QueuedTransport], which drains that queue whenever the AT engine reads.
use embedded_nal::nb;
use heapless::spsc::{Consumer, Producer, Queue};

/// The byte-level interface to the ESP8266 UART.
pub trait Transport {
    /// The error reported by the underlying UART driver.
    type Error: core::fmt::Debug;

    /// Write all of `data` to the UART.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Read available bytes into `buf` without blocking.
    ///
    /// # Returns
    /// The number of bytes placed into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error>;
}

/// The transmit half of a UART used together with an interrupt-fed receive queue.
pub trait UartWrite {
    /// The error reported by the underlying UART driver.
    type Error: core::fmt::Debug;

    /// Write all of `data` to the UART.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// The interrupt-side handle of the receive queue.
///
/// This is the only thing a receive callback should touch.
pub struct RxProducer<'a, const N: usize> {
    producer: Producer<'a, u8, N>,
    dropped: usize,
}

impl<'a, const N: usize> RxProducer<'a, N> {
    /// Append bytes received by the UART.
    ///
    /// # Note
    /// Bytes that do not fit into the queue are discarded and counted.
    pub fn on_receive(&mut self, data: &[u8]) {
        for byte in data {
            if self.producer.enqueue(*byte).is_err() {
                self.dropped = self.dropped.saturating_add(1);
            }
        }
    }

    /// The number of received bytes that were discarded because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// A [Transport] assembled from a UART writer and an interrupt-fed receive queue.
pub struct QueuedTransport<'a, W: UartWrite, const N: usize> {
    writer: W,
    consumer: Consumer<'a, u8, N>,
}

impl<'a, W: UartWrite, const N: usize> QueuedTransport<'a, W, N> {
    /// Split a receive queue into the interrupt-side producer and the polling-side transport.
    ///
    /// # Args
    /// * `queue` - Storage for received bytes. Typically a `static` owned by the application.
    /// * `writer` - The transmit half of the UART.
    pub fn split(queue: &'a mut Queue<u8, N>, writer: W) -> (RxProducer<'a, N>, Self) {
        let (producer, consumer) = queue.split();
        (
            RxProducer {
                producer,
                dropped: 0,
            },
            Self { writer, consumer },
        )
    }
}

impl<'a, W: UartWrite, const N: usize> Transport for QueuedTransport<'a, W, N> {
    type Error = W::Error;

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.writer.write_all(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
        let mut count = 0;
        while count < buf.len() {
            match self.consumer.dequeue() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }

        if count == 0 {
            return Err(nb::Error::WouldBlock);
        }

        Ok(count)
    }
}
