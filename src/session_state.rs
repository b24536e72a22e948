//! Timers and identifiers of a single MQTT session.
use crate::design_parameters::MAX_PENDING_ACKNOWLEDGEMENTS;
use crate::ProtocolError;
use embedded_time::{clock, duration::Milliseconds, Clock, Instant};
use heapless::Vec;

/// Failures of the keep-alive schedule.
#[derive(Debug, PartialEq, Eq)]
pub enum KeepAliveError {
    /// An outstanding PINGREQ was not answered within the keep-alive interval.
    Expired,

    /// The keep-alive interval exceeds the range of the clock.
    Clock(clock::Error),
}

/// Compute `now + duration`, failing instead of wrapping when the duration exceeds the range of
/// the clock.
pub(crate) fn deadline<C: Clock<T = u32>>(
    now: Instant<C>,
    duration: Milliseconds<u32>,
) -> Result<Instant<C>, clock::Error> {
    now.checked_add(duration).ok_or(clock::Error::Unspecified)
}

pub struct SessionContext<C: Clock> {
    keep_alive_interval: Milliseconds<u32>,

    /// The time the last PINGREQ was sent, or the time the session was established.
    last_ping_sent_at: Option<Instant<C>>,

    /// Set while a PINGREQ is outstanding.
    ping_deadline: Option<Instant<C>>,

    /// Set while a CONNECT is waiting for its CONNACK.
    connack_deadline: Option<Instant<C>>,

    last_ping_response_at: Option<Instant<C>>,
    next_packet_id: u16,
    pending_subscriptions: Vec<u16, MAX_PENDING_ACKNOWLEDGEMENTS>,
    pending_publications: Vec<u16, MAX_PENDING_ACKNOWLEDGEMENTS>,
}

impl<C: Clock<T = u32>> SessionContext<C> {
    pub fn new(keep_alive_seconds: u16) -> Self {
        Self {
            keep_alive_interval: Milliseconds(keep_alive_seconds as u32 * 1000),
            last_ping_sent_at: None,
            ping_deadline: None,
            connack_deadline: None,
            last_ping_response_at: None,
            next_packet_id: 1,
            pending_subscriptions: Vec::new(),
            pending_publications: Vec::new(),
        }
    }

    /// Forget all session state. Called whenever the session returns to idle.
    pub fn reset(&mut self) {
        self.last_ping_sent_at = None;
        self.ping_deadline = None;
        self.connack_deadline = None;
        self.last_ping_response_at = None;
        self.next_packet_id = 1;
        self.pending_subscriptions.clear();
        self.pending_publications.clear();
    }

    pub fn keep_alive_interval(&self) -> Milliseconds<u32> {
        self.keep_alive_interval
    }

    /// Verify that the keep-alive interval can be scheduled on the clock at all.
    pub fn check_keep_alive(&self, now: Instant<C>) -> Result<(), clock::Error> {
        deadline(now, self.keep_alive_interval).map(|_| ())
    }

    /// Start waiting for the CONNACK of a CONNECT sent at `now`.
    pub fn register_connect_sent(
        &mut self,
        now: Instant<C>,
        timeout: Milliseconds<u32>,
    ) -> Result<(), clock::Error> {
        self.connack_deadline.replace(deadline(now, timeout)?);
        Ok(())
    }

    /// Determine if the CONNACK wait started by [SessionContext::register_connect_sent] has
    /// expired.
    pub fn connack_expired(&self, now: Instant<C>) -> bool {
        matches!(self.connack_deadline, Some(deadline) if now > deadline)
    }

    /// Start the keep-alive schedule of a freshly established session.
    pub fn register_connection(&mut self, now: Instant<C>) {
        self.last_ping_sent_at.replace(now);
        self.last_ping_response_at.replace(now);
        self.ping_deadline = None;
        self.connack_deadline = None;
    }

    pub fn register_ping_sent(&mut self, now: Instant<C>) -> Result<(), clock::Error> {
        self.last_ping_sent_at.replace(now);
        self.ping_deadline.replace(deadline(now, self.keep_alive_interval)?);
        Ok(())
    }

    pub fn register_ping_response(&mut self, now: Instant<C>) {
        self.ping_deadline = None;
        self.last_ping_response_at.replace(now);
    }

    /// The last time the broker proved to be alive.
    pub fn last_ping_response_at(&self) -> Option<Instant<C>> {
        self.last_ping_response_at
    }

    /// Check the keep-alive timers.
    ///
    /// # Returns
    /// `Ok(true)` if a PINGREQ is due. [KeepAliveError::Expired] if an outstanding PINGREQ was
    /// not answered within the keep-alive interval.
    pub fn handle_ping(&mut self, now: Instant<C>) -> Result<bool, KeepAliveError> {
        if self.keep_alive_interval.0 == 0 {
            return Ok(false);
        }

        if let Some(deadline) = self.ping_deadline {
            return if now > deadline {
                Err(KeepAliveError::Expired)
            } else {
                Ok(false)
            };
        }

        let last = match self.last_ping_sent_at {
            Some(last) => last,
            None => return Ok(false),
        };

        let due = deadline(last, Milliseconds(self.keep_alive_interval.0 / 2))
            .map_err(KeepAliveError::Clock)?;
        Ok(now > due)
    }

    /// Allocate the next packet identifier. Identifiers are never zero.
    pub fn next_packet_identifier(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = match id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }

    pub fn register_subscription(&mut self, packet_id: u16) -> Result<(), ()> {
        self.pending_subscriptions.push(packet_id).map_err(|_| ())
    }

    pub fn register_publication(&mut self, packet_id: u16) -> Result<(), ()> {
        self.pending_publications.push(packet_id).map_err(|_| ())
    }

    pub fn subscriptions_pending(&self) -> bool {
        !self.pending_subscriptions.is_empty()
    }

    pub fn publications_pending(&self) -> usize {
        self.pending_publications.len()
    }

    pub fn handle_suback(&mut self, packet_id: u16) -> Result<(), ProtocolError> {
        remove_identifier(&mut self.pending_subscriptions, packet_id)
    }

    pub fn handle_puback(&mut self, packet_id: u16) -> Result<(), ProtocolError> {
        remove_identifier(&mut self.pending_publications, packet_id)
    }
}

fn remove_identifier(
    pending: &mut Vec<u16, MAX_PENDING_ACKNOWLEDGEMENTS>,
    packet_id: u16,
) -> Result<(), ProtocolError> {
    let index = pending
        .iter()
        .position(|id| *id == packet_id)
        .ok_or(ProtocolError::BadIdentifier)?;
    pending.swap_remove(index);
    Ok(())
}
