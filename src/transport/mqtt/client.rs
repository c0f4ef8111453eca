//! Impure I/O operations for the rumqttc transport
//!
//! Each connection attempt owns one `rumqttc` event loop running on its own
//! task. The task reports the connection outcome through the session's
//! [`EventSink`] and stops after the first disconnect; reconnection is the
//! session manager's decision, not the event loop's.

use super::connection::{configure_mqtt_options, to_rumqttc_qos};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{
    ConnectOptions, EventSink, QoS, Transport, TransportError, TransportEvent, TransportHandle,
};
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Outstanding request capacity of each rumqttc client
const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// How long a closing connection may keep polling to flush its DISCONNECT
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Transport backed by `rumqttc`
#[derive(Debug, Clone)]
pub struct MqttTransport {
    request_capacity: usize,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }

    /// Override the outstanding request capacity
    pub fn with_request_capacity(mut self, request_capacity: usize) -> Self {
        self.request_capacity = request_capacity.max(1);
        self
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MqttTransport {
    type Handle = MqttHandle;

    fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Self::Handle, TransportError> {
        let mqtt_options = configure_mqtt_options(options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.request_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            broker = %options.url(),
            client_id = %options.client_id,
            generation = events.generation(),
            "Opening MQTT connection"
        );

        let connect_timeout = options.connect_timeout;
        let task = tokio::spawn(async move {
            run_event_loop(event_loop, events, connect_timeout, shutdown_rx).await;
        });

        Ok(MqttHandle {
            client,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to one rumqttc connection
pub struct MqttHandle {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MqttHandle {
    /// Whether the event loop task has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl TransportHandle for MqttHandle {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, to_rumqttc_qos(qos), retain, payload.to_vec())
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, to_rumqttc_qos(qos))
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn close(&self) -> Result<(), TransportError> {
        let result = self
            .client
            .try_disconnect()
            .map_err(|e| TransportError::CloseFailed(Box::new(e)));
        // The event loop stops on its own once DISCONNECT is flushed or the grace expires
        let _ = self.shutdown_tx.send(true);
        result
    }
}

impl Drop for MqttHandle {
    fn drop(&mut self) {
        // The detached task winds down by itself within CLOSE_GRACE
        if !*self.shutdown_tx.borrow() {
            let _ = self.client.try_disconnect();
            let _ = self.shutdown_tx.send(true);
        }
    }
}

/// Why a poll produced no event
#[derive(Debug)]
enum PollFailure {
    TimedOut,
    Connection(ConnectionError),
}

/// Poll the event loop, giving up at `deadline` when one is set
async fn poll_until(
    event_loop: &mut EventLoop,
    deadline: Option<Instant>,
) -> Result<Event, PollFailure> {
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, event_loop.poll()).await {
            Ok(result) => result.map_err(PollFailure::Connection),
            Err(_) => Err(PollFailure::TimedOut),
        },
        None => event_loop.poll().await.map_err(PollFailure::Connection),
    }
}

/// Drive one connection until it disconnects, fails or is closed
async fn run_event_loop(
    mut event_loop: EventLoop,
    events: EventSink,
    connect_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let generation = events.generation();
    let mut connected = false;
    let mut closing = false;
    let mut deadline = Some(Instant::now() + connect_timeout);

    loop {
        let polled = tokio::select! {
            changed = shutdown_rx.changed(), if !closing => {
                closing = true;
                if changed.is_err() || !connected {
                    // Nothing to flush before ConnAck
                    events.emit(TransportEvent::Disconnected {
                        reason: "closed by client".to_string(),
                    });
                    break;
                }
                deadline = Some(Instant::now() + CLOSE_GRACE);
                continue;
            }
            polled = poll_until(&mut event_loop, deadline) => polled,
        };

        let keep_running = match polled {
            Ok(event) => handle_event(&event, &events, &mut connected, &mut deadline, closing),
            Err(PollFailure::TimedOut) if closing => {
                debug!(generation, "Close grace period expired");
                events.emit(TransportEvent::Disconnected {
                    reason: "closed by client".to_string(),
                });
                false
            }
            Err(PollFailure::TimedOut) => {
                warn!(generation, timeout = ?connect_timeout, "MQTT connect timed out");
                events.emit(TransportEvent::Error(TransportError::ConnectTimeout(
                    connect_timeout,
                )));
                events.emit(TransportEvent::Disconnected {
                    reason: "connect timeout".to_string(),
                });
                false
            }
            Err(PollFailure::Connection(e)) => {
                let reason = if closing {
                    "closed by client".to_string()
                } else {
                    e.to_string()
                };
                if !closing {
                    error!(generation, error = %e, "MQTT event loop error");
                    let transport_error = if connected {
                        TransportError::ConnectionLost(e.to_string())
                    } else {
                        TransportError::ConnectFailed(Box::new(e))
                    };
                    events.emit(TransportEvent::Error(transport_error));
                }
                events.emit(TransportEvent::Disconnected { reason });
                false
            }
        };

        if !keep_running || events.is_closed() {
            break;
        }
    }

    debug!(generation, "MQTT event loop stopped");
}

/// Apply one routed event; returns false when the connection is over
fn handle_event(
    event: &Event,
    events: &EventSink,
    connected: &mut bool,
    deadline: &mut Option<Instant>,
    closing: bool,
) -> bool {
    match MessageHandler::route_mqtt_event(event) {
        EventRoute::ConnectionAcknowledged => {
            *connected = true;
            if !closing {
                *deadline = None;
            }
            events.emit(TransportEvent::Connected)
        }
        EventRoute::ConnectionRefused(code) => {
            events.emit(TransportEvent::Error(TransportError::ConnectionRefused(
                code.clone(),
            )));
            events.emit(TransportEvent::Disconnected {
                reason: format!("connection refused: {code}"),
            });
            false
        }
        EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } => {
            trace!(topic = %topic, retain, bytes = payload.len(), "MQTT message received");
            events.emit(TransportEvent::Message { topic, payload })
        }
        EventRoute::Disconnected => {
            info!("MQTT broker disconnected client");
            events.emit(TransportEvent::Disconnected {
                reason: "broker disconnected".to_string(),
            });
            false
        }
        EventRoute::DisconnectSent => {
            events.emit(TransportEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
            false
        }
        EventRoute::SubscriptionConfirmed { packet_id, granted } => {
            if let Err(reason) = MessageHandler::validate_subscription_success(&granted) {
                warn!(packet_id, %reason, "Subscription rejected");
                return events.emit(TransportEvent::Error(TransportError::SubscribeFailed {
                    topic: format!("packet {packet_id}"),
                    reason,
                }));
            }
            debug!(packet_id, "Subscription confirmed");
            true
        }
        EventRoute::InfrastructureEvent(description) => {
            trace!(target: "mqtt_transport", "MQTT event: {}", description);
            true
        }
        EventRoute::OutgoingEvent => true,
    }
}
