use crate::{
    config::Config,
    de::DecodeError,
    design_parameters::MAX_PACKET_SIZE,
    link::{Esp8266, LinkState},
    packets::{Connack, Connect, MqttPacket, Puback, Publish, Subscribe},
    reason_codes::SubscribeReturnCode,
    ser,
    session_state::{KeepAliveError, SessionContext},
    Error, ProtocolError, QoS, Transport, {debug, error, info, warn},
};

use core::str::FromStr;
use embedded_time::Clock;
use heapless::{String, Vec};

mod sm {
    use smlang::statemachine;

    statemachine! {
        transitions: {
            *Idle + SentConnect = AwaitingConnack,
            AwaitingConnack + ReceivedConnack = Established,
            AwaitingConnack + Reset = Idle,
            Established + Reset = Idle,
        }
    }

    pub struct Context;

    impl StateMachineContext for Context {}
}

use sm::{Context, Events, StateMachine, States};

/// The progress of the MQTT session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No MQTT session exists.
    Idle,
    /// CONNECT was sent and the broker has not answered yet.
    AwaitingConnack,
    /// The broker accepted the session.
    Established,
}

/// An MQTT 3.1.1 client session running over an ESP8266 link.
///
/// # Note
/// `RX` is the capacity of the buffer that reassembles inbound packets. It bounds the largest
/// packet that can be received, and the amount of data that may arrive between two polls.
pub struct MqttSession<T: Transport, C: Clock<T = u32>, const RX: usize> {
    link: Esp8266<T, C, RX>,
    config: Config,
    context: SessionContext<C>,
    state: StateMachine<Context>,
}

impl<T, C, const RX: usize> MqttSession<T, C, RX>
where
    T: Transport,
    C: Clock<T = u32>,
{
    /// Construct a new MQTT session.
    ///
    /// # Args
    /// * `config` - Network, broker and session parameters.
    /// * `transport` - The UART connected to the ESP8266.
    /// * `clock` - The clock used for all timeouts and the keep-alive schedule.
    pub fn new(config: Config, transport: T, clock: C) -> Self {
        Self {
            link: Esp8266::new(transport, clock, config.timeouts, config.join_attempts),
            context: SessionContext::new(config.keepalive_interval),
            state: StateMachine::new(Context),
            config,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.state.state() {
            States::Idle => SessionStatus::Idle,
            States::AwaitingConnack => SessionStatus::AwaitingConnack,
            States::Established => SessionStatus::Established,
        }
    }

    /// Determine if the broker has accepted the session.
    pub fn is_connected(&self) -> bool {
        self.state.state() == &States::Established
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn link(&self) -> &Esp8266<T, C, RX> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Esp8266<T, C, RX> {
        &mut self.link
    }

    /// Determine if any subscriptions are waiting for their SUBACK.
    pub fn subscriptions_pending(&self) -> bool {
        self.context.subscriptions_pending()
    }

    /// The number of QoS 1 publications that have not been acknowledged yet.
    pub fn pending_publications(&self) -> usize {
        self.context.publications_pending()
    }

    /// Bring up the module, the Wi-Fi link and the broker connection, then send CONNECT.
    ///
    /// # Note
    /// The session is established once the CONNACK has been processed by [MqttSession::poll].
    pub fn connect(&mut self) -> Result<(), Error<T::Error>> {
        if self.status() != SessionStatus::Idle {
            return Ok(());
        }

        if !self.link.is_initialized() {
            self.link.initialize()?;
        }

        self.link.connect(
            &self.config.ssid,
            &self.config.password,
            &self.config.host,
            self.config.port,
        )?;

        let client_id = self.config.client_id.clone();
        self.start(&client_id)
    }

    /// Send CONNECT over an open link.
    ///
    /// # Args
    /// * `client_id` - The client identifier to present to the broker.
    pub fn start(&mut self, client_id: &str) -> Result<(), Error<T::Error>> {
        if self.status() != SessionStatus::Idle || self.link.state() != LinkState::SocketOpen {
            return Err(Error::NotReady);
        }

        let packet = MqttPacket::Connect(Connect {
            client_id: String::from_str(client_id)
                .map_err(|_| ProtocolError::ProvidedClientIdTooLong)?,
            keep_alive: self.config.keepalive_interval,
            clean_session: self.config.clean_session,
        });

        // Data left over from an earlier connection must not be taken for the CONNACK.
        self.context.reset();
        self.link.engine().inbound().clear();

        let now = self.link.engine().now()?;
        self.context.check_keep_alive(now)?;

        self.send_packet(&packet)?;
        info!("Sent CONNECT as `{}`", client_id);
        self.context.register_connect_sent(now, self.config.timeouts.connack)?;
        self.state.process_event(Events::SentConnect).ok();
        Ok(())
    }

    /// Service the session: process module output, dispatch received packets and maintain the
    /// keep-alive schedule.
    ///
    /// # Args
    /// * `f` - Called with every received publication.
    pub fn poll<F>(&mut self, mut f: F) -> Result<(), Error<T::Error>>
    where
        F: FnMut(&Publish),
    {
        let link_state = self.link.poll()?;

        if self.status() == SessionStatus::Idle {
            self.link.engine().take_desync();
            self.link.engine().inbound().clear();
            return Ok(());
        }

        if link_state != LinkState::SocketOpen {
            warn!("Link lost, resetting the session");
            self.reset();
            return Ok(());
        }

        if self.link.engine().take_desync() {
            error!("Inbound data was lost, closing the connection");
            self.abort();
            return Err(Error::Protocol(ProtocolError::BufferFull));
        }

        while let Some(result) = self.link.engine().inbound().decode_next() {
            match result {
                Ok(packet) => self.handle_packet(packet, &mut f)?,
                Err(DecodeError::MalformedLength) => {
                    self.abort();
                    return Err(Error::Protocol(ProtocolError::MalformedPacket));
                }
                Err(_error) => warn!("Discarding inbound packet: {:?}", _error),
            }

            if self.status() == SessionStatus::Idle {
                return Ok(());
            }

            // Replies to the packet may have pulled in more socket data than fits.
            if self.link.engine().take_desync() {
                error!("Inbound data was lost, closing the connection");
                self.abort();
                return Err(Error::Protocol(ProtocolError::BufferFull));
            }
        }

        self.handle_timers()
    }

    /// Subscribe to a topic filter.
    ///
    /// # Returns
    /// The packet identifier of the SUBSCRIBE.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Error<T::Error>> {
        if !self.is_connected() {
            return Err(Error::NotReady);
        }

        if qos == QoS::ExactlyOnce {
            return Err(Error::Unsupported);
        }

        let filter = String::from_str(topic).map_err(|_| ser::Error::InvalidTopic)?;
        let mut topics = Vec::new();
        topics.push((filter, qos)).map_err(|_| Error::Unsupported)?;

        let packet_id = self.context.next_packet_identifier();
        self.context
            .register_subscription(packet_id)
            .map_err(|_| Error::Unsupported)?;

        self.send_packet(&MqttPacket::Subscribe(Subscribe { packet_id, topics }))?;
        info!("Subscribing to `{}`: {}", topic, packet_id);
        Ok(packet_id)
    }

    /// Publish a message.
    ///
    /// # Note
    /// QoS 2 is not supported. QoS 1 publications are tracked until their PUBACK arrives but are
    /// not retransmitted.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error<T::Error>> {
        if !self.is_connected() {
            return Err(Error::NotReady);
        }

        let mut publish = Publish::new(topic, payload)?;
        publish.retain = retain;
        publish.qos = qos;

        match qos {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => {
                let packet_id = self.context.next_packet_identifier();
                self.context
                    .register_publication(packet_id)
                    .map_err(|_| Error::Unsupported)?;
                publish.packet_id.replace(packet_id);
            }
            QoS::ExactlyOnce => return Err(Error::Unsupported),
        }

        debug!("Publishing to `{}`: {:?}", topic, payload);
        self.send_packet(&MqttPacket::Publish(publish))
    }

    /// End the session: send DISCONNECT and close the TCP connection.
    pub fn disconnect(&mut self) -> Result<(), Error<T::Error>> {
        if self.status() == SessionStatus::Idle {
            return Ok(());
        }

        let sent = self.send_packet(&MqttPacket::Disconnect);
        self.reset();
        self.link.engine().inbound().clear();
        let closed = self.link.close();
        info!("Disconnected from broker");

        sent.and(closed)
    }

    fn send_packet(&mut self, packet: &MqttPacket) -> Result<(), Error<T::Error>> {
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let data = packet.encode(&mut buffer)?;
        debug!("Sending {} ({} bytes)", packet.name(), data.len());
        self.link.send(data)
    }

    fn reset(&mut self) {
        self.state.process_event(Events::Reset).ok();
        self.context.reset();
    }

    /// Reset the session and drop the TCP connection so the next session starts on a clean
    /// stream.
    fn abort(&mut self) {
        self.reset();
        self.link.engine().inbound().clear();
        if let Err(_error) = self.link.close() {
            warn!("Failed to close the connection: {:?}", _error);
        }
    }

    fn violation(&mut self, _packet: &MqttPacket) -> Result<(), Error<T::Error>> {
        warn!(
            "Protocol violation: {} while {:?}",
            _packet.name(),
            self.status()
        );
        self.abort();
        Err(Error::Protocol(ProtocolError::UnexpectedPacket))
    }

    fn handle_packet<F>(&mut self, packet: MqttPacket, f: &mut F) -> Result<(), Error<T::Error>>
    where
        F: FnMut(&Publish),
    {
        debug!("Received {}", packet.name());

        if self.status() == SessionStatus::AwaitingConnack {
            return match packet {
                MqttPacket::Connack(connack) => self.handle_connack(connack),
                other => self.violation(&other),
            };
        }

        match packet {
            MqttPacket::Publish(publish) => {
                match (publish.qos, publish.packet_id) {
                    (QoS::AtLeastOnce, Some(packet_id)) => {
                        self.send_packet(&MqttPacket::Puback(Puback { packet_id }))?;
                    }
                    (QoS::ExactlyOnce, _) => {
                        warn!("QoS 2 publication on `{}` is not acknowledged", publish.topic);
                    }
                    _ => {}
                }

                f(&publish);
            }

            MqttPacket::Pingresp => {
                let now = self.link.engine().now()?;
                self.context.register_ping_response(now);
            }

            MqttPacket::Suback(suback) => {
                if self.context.handle_suback(suback.packet_id).is_err() {
                    warn!("Got SUBACK for unknown identifier {}", suback.packet_id);
                } else if suback.granted_qos.contains(&SubscribeReturnCode::Failure) {
                    warn!("Broker rejected subscription {}", suback.packet_id);
                }
            }

            MqttPacket::Puback(puback) => {
                if self.context.handle_puback(puback.packet_id).is_err() {
                    warn!("Got PUBACK for unknown identifier {}", puback.packet_id);
                }
            }

            _other => info!("Ignoring {}", _other.name()),
        }

        Ok(())
    }

    fn handle_connack(&mut self, connack: Connack) -> Result<(), Error<T::Error>> {
        if !connack.return_code.is_accepted() {
            error!("Broker refused the connection: {:?}", connack.return_code);
            self.abort();
            return Err(Error::Refused(connack.return_code));
        }

        let now = self.link.engine().now()?;
        self.context.register_connection(now);
        self.state.process_event(Events::ReceivedConnack).ok();
        info!(
            "Session established (session present: {})",
            connack.session_present
        );
        Ok(())
    }

    fn handle_timers(&mut self) -> Result<(), Error<T::Error>> {
        let now = self.link.engine().now()?;

        match self.status() {
            SessionStatus::AwaitingConnack => {
                if self.context.connack_expired(now) {
                    error!("No CONNACK received, closing the connection");
                    self.abort();
                    return Err(Error::Timeout);
                }
            }

            SessionStatus::Established => {
                // The response deadline starts before the PINGREQ is written.
                match self.context.handle_ping(now) {
                    Err(KeepAliveError::Expired) => {
                        error!("No PINGRESP within the keep-alive interval, link lost");
                        self.link.mark_disconnected();
                        self.reset();
                    }

                    Err(KeepAliveError::Clock(error)) => return Err(Error::Clock(error)),

                    Ok(true) => {
                        self.context.register_ping_sent(now)?;
                        self.send_packet(&MqttPacket::Pingreq)?;
                    }

                    Ok(false) => {}
                }
            }

            SessionStatus::Idle => {}
        }

        Ok(())
    }
}
