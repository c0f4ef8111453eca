//! Pure event routing for rumqttc event loop output
//!
//! Classifies raw `rumqttc` events into the handful of outcomes the
//! transport reports to its session.

use bytes::Bytes;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                if connack.code == ConnectReturnCode::Success {
                    EventRoute::ConnectionAcknowledged
                } else {
                    EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                }
            }
            Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
                retain: publish.retain,
            },
            Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
            Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
                granted: suback
                    .return_codes
                    .iter()
                    .map(|code| matches!(code, SubscribeReasonCode::Success(_)))
                    .collect(),
            },
            Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(granted: &[bool]) -> Result<(), String> {
        if granted.iter().all(|ok| *ok) {
            Ok(())
        } else {
            Err(format!("broker rejected subscription filters: {granted:?}"))
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Broker answered CONNECT with a failure code
    ConnectionRefused(String),
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Our DISCONNECT packet went out
    DisconnectSent,
    /// Subscription confirmed, one flag per requested filter
    SubscriptionConfirmed { packet_id: u16, granted: Vec<bool> },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
