//! Session manager: connection lifecycle, reconnect scheduling and buffered send
//!
//! All session state lives behind one mutex. Transport events arrive on a
//! single queue and are applied one at a time by a driver task, so the
//! invariants below hold no matter which thread the transport runs on:
//!
//! - `Open` means the active handle's generation reported `Connected`
//! - the outbound buffer is only drained while holding the lock
//! - an explicit close suppresses reconnects until the next `open`
//!
//! Callbacks run after the lock is released. Status and event broadcasts
//! are sent while it is held so observers see transitions in order.

use crate::error::{SessionError, SessionResult};
use crate::transport::{
    ConnectOptions, EventSink, QoS, TaggedEvent, Transport, TransportError, TransportEvent,
    TransportHandle,
};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

use super::events::{Callbacks, Notification, SessionEvent};
use super::reconnect::{ReconnectDecision, ReconnectPolicy};
use super::state::{
    DropReason, FlushPolicy, OutboundBuffer, OutboundMessage, PublishOptions, SendOutcome,
    SessionOptions, SessionStats, SessionStatus, Subscription,
};

/// Capacity of the `SessionEvent` broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `shutdown` waits for the transport to confirm the disconnect
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Owns one logical MQTT session on top of a [`Transport`]
///
/// Must be created inside a Tokio runtime.
pub struct SessionManager<T: Transport> {
    shared: Arc<Shared<T>>,
    driver: JoinHandle<()>,
}

struct Shared<T: Transport> {
    me: Weak<Shared<T>>,
    transport: T,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    state: Mutex<Session<T::Handle>>,
    callbacks: RwLock<Callbacks>,
    status_tx: watch::Sender<SessionStatus>,
    event_tx: broadcast::Sender<SessionEvent>,
}

struct Session<H> {
    options: SessionOptions,
    status: SessionStatus,
    explicitly_closed: bool,
    retry_count: u32,
    outbound: OutboundBuffer,
    link: Option<Link<H>>,
    generation: u64,
    pending_retry: Option<PendingRetry>,
    retry_epoch: u64,
    subscriptions: Vec<Subscription>,
    stats: SessionStats,
}

/// The connection attempt the session currently listens to
///
/// `handle` is None when the transport refused to even start the attempt.
struct Link<H> {
    generation: u64,
    handle: Option<H>,
    close_requested: bool,
}

struct PendingRetry {
    epoch: u64,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

fn link_handle<H>(link: &Option<Link<H>>) -> Option<&H> {
    link.as_ref().and_then(|link| link.handle.as_ref())
}

impl<T: Transport> SessionManager<T> {
    /// Create a closed session and spawn its event driver
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SessionStatus::Closed);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client_id = options.connect.client_id.clone();

        let session = Session {
            outbound: OutboundBuffer::new(options.buffer_capacity),
            subscriptions: options.subscriptions.clone(),
            options,
            status: SessionStatus::Closed,
            explicitly_closed: false,
            retry_count: 0,
            link: None,
            generation: 0,
            pending_retry: None,
            retry_epoch: 0,
            stats: SessionStats::default(),
        };

        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            transport,
            events_tx,
            state: Mutex::new(session),
            callbacks: RwLock::new(Callbacks::default()),
            status_tx,
            event_tx,
        });

        let driver = tokio::spawn(
            drive(Arc::downgrade(&shared), events_rx)
                .instrument(crate::session_span!(client_id = %client_id)),
        );

        Self { shared, driver }
    }

    /// Create a session and open it when `connect_immediately` is set
    pub fn start(transport: T, options: SessionOptions) -> Self {
        let connect_immediately = options.connect_immediately;
        let manager = Self::new(transport, options);
        if connect_immediately {
            manager.open();
        }
        manager
    }

    /// (Re)open the session
    ///
    /// Closes any existing connection, cancels a scheduled retry, resets the
    /// retry count and starts a fresh connect. Status is `Connecting` when
    /// this returns.
    pub fn open(&self) {
        self.shared.open(None);
    }

    /// Replace the connection parameters, then open
    pub fn open_with(&self, connect: ConnectOptions) {
        self.shared.open(Some(connect));
    }

    /// Close the session and stop reconnecting until the next `open`
    pub fn close(&self) {
        self.shared.close();
    }

    /// Publish with the default QoS; returns true only if delivered now
    ///
    /// While the session is not open the message is buffered when
    /// `buffer_if_unavailable` is set and dropped otherwise.
    pub fn send(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        buffer_if_unavailable: bool,
    ) -> bool {
        let options = PublishOptions {
            buffer_if_unavailable,
            ..PublishOptions::default()
        };
        self.send_with(topic, payload, options).is_delivered()
    }

    /// Publish with explicit options
    pub fn send_with(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> SendOutcome {
        self.shared.send(topic.into(), payload.into(), options)
    }

    /// Deliver buffered messages now; returns how many went out
    pub fn flush_buffer(&self) -> usize {
        self.shared.flush()
    }

    /// Keep `topic` subscribed, including across reconnects
    pub fn subscribe(&self, topic: impl Into<String>, qos: QoS) {
        self.shared.subscribe(topic.into(), qos);
    }

    pub fn unsubscribe(&self, topic: &str) {
        self.shared.unsubscribe(topic);
    }

    pub fn on_connected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks_mut().connected.push(Arc::new(callback));
    }

    pub fn on_disconnected(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.shared
            .callbacks_mut()
            .disconnected
            .push(Arc::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.shared.callbacks_mut().error.push(Arc::new(callback));
    }

    pub fn on_message(&self, callback: impl Fn(&str, &Bytes) + Send + Sync + 'static) {
        self.shared.callbacks_mut().message.push(Arc::new(callback));
    }

    /// Called once the retry budget is spent
    pub fn on_reconnect_failed(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.shared
            .callbacks_mut()
            .reconnect_failed
            .push(Arc::new(callback));
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().status
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Receiver of every session event emitted from now on
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.lock().retry_count
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.lock().outbound.len()
    }

    /// Buffered messages in delivery order
    pub fn buffered(&self) -> Vec<OutboundMessage> {
        self.shared.lock().outbound.snapshot()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.lock().stats.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.lock().subscriptions.clone()
    }

    pub fn connect_options(&self) -> ConnectOptions {
        self.shared.lock().options.connect.clone()
    }

    /// Wait until the session reaches `status`
    pub async fn wait_for_status(
        &self,
        status: SessionStatus,
        timeout: Duration,
    ) -> SessionResult<()> {
        let mut rx = self.watch_status();
        let reached = tokio::time::timeout(timeout, async {
            rx.wait_for(|current| *current == status).await.is_ok()
        })
        .await
        .map_err(|_| SessionError::Timeout(timeout))?;

        if reached {
            Ok(())
        } else {
            Err(SessionError::Transport(TransportError::NotConnected))
        }
    }

    /// Close the session and wait briefly for the transport to disconnect
    pub async fn shutdown(self) {
        let had_link = self.shared.lock().link.is_some();
        let mut events = self.events();
        self.close();

        if had_link {
            let confirmed = tokio::time::timeout(SHUTDOWN_GRACE, async {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::Disconnected { .. }) => break,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
            .await;

            if confirmed.is_err() {
                warn!("Transport did not confirm disconnect within {:?}", SHUTDOWN_GRACE);
            }
        }

        info!("MQTT session shut down");
    }
}

impl<T: Transport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.lock();
            let session = &mut *guard;
            session.explicitly_closed = true;
            Shared::<T>::cancel_retry(session);
            if let Some(link) = session.link.take() {
                Shared::<T>::release_link(link);
            }
        }
        self.driver.abort();
    }
}

/// Apply transport events one at a time until the session goes away
async fn drive<T: Transport>(
    shared: Weak<Shared<T>>,
    mut events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
) {
    while let Some(tagged) = events_rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_transport_event(tagged);
    }
    debug!("Session event driver stopped");
}

/// Sleep for `delay` unless cancelled first; true when the delay elapsed
async fn interruptible_sleep(mut cancel_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        // Any signal, or the sender going away, cancels
        _ = cancel_rx.changed() => false,
    }
}

impl<T: Transport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Session<T::Handle>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Callbacks> {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke callbacks; must be called without the session lock
    fn notify(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for notification in &notifications {
            callbacks.dispatch(notification);
        }
    }

    fn publish_event(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    fn set_status(&self, session: &mut Session<T::Handle>, to: SessionStatus) {
        let from = session.status;
        if from == to {
            return;
        }
        session.status = to;
        ReconnectPolicy::log_transition(from, to, session.retry_count);
        self.status_tx.send_replace(to);
        self.publish_event(SessionEvent::StatusChanged { from, to });
    }

    fn report_error(&self, error: SessionError, notifications: &mut Vec<Notification>) {
        let error = Arc::new(error);
        self.publish_event(SessionEvent::Error(error.clone()));
        notifications.push(Notification::Error(error));
    }

    fn open(&self, connect: Option<ConnectOptions>) {
        let mut guard = self.lock();
        let session = &mut *guard;

        Self::cancel_retry(session);
        if let Some(link) = session.link.take() {
            Self::release_link(link);
        }
        if let Some(connect) = connect {
            session.options.connect = connect;
        }
        session.explicitly_closed = false;
        session.retry_count = 0;

        info!(
            broker = %session.options.connect.url(),
            client_id = %session.options.connect.client_id,
            "Opening MQTT session"
        );
        self.start_connect(session);
    }

    fn close(&self) {
        let mut guard = self.lock();
        let session = &mut *guard;

        session.explicitly_closed = true;
        Self::cancel_retry(session);

        if let Some(link) = session.link.as_mut() {
            if !link.close_requested {
                link.close_requested = true;
                info!(generation = link.generation, "Closing MQTT session");
                if let Some(handle) = &link.handle {
                    if let Err(e) = handle.close() {
                        warn!(error = %e, "Transport close request failed");
                    }
                }
            }
        }

        self.set_status(session, SessionStatus::Closed);
    }

    /// Start a new connection attempt, replacing the current link
    fn start_connect(&self, session: &mut Session<T::Handle>) {
        session.generation += 1;
        let generation = session.generation;

        if let Some(old) = session.link.take() {
            Self::release_link(old);
        }
        self.set_status(session, SessionStatus::Connecting);

        let sink = EventSink::new(generation, self.events_tx.clone());
        match self.transport.connect(&session.options.connect, sink) {
            Ok(handle) => {
                debug!(generation, "Connect attempt started");
                session.link = Some(Link {
                    generation,
                    handle: Some(handle),
                    close_requested: false,
                });
            }
            Err(e) => {
                // Route through the queue so it is handled like any failed attempt
                warn!(generation, error = %e, "Transport refused to start connect attempt");
                session.link = Some(Link {
                    generation,
                    handle: None,
                    close_requested: false,
                });
                let _ = self.events_tx.send(TaggedEvent {
                    generation,
                    event: TransportEvent::Error(e),
                });
                let _ = self.events_tx.send(TaggedEvent {
                    generation,
                    event: TransportEvent::Disconnected {
                        reason: "connect attempt failed".to_string(),
                    },
                });
            }
        }
    }

    /// Close a link's handle unless that was already requested, then drop it
    fn release_link(link: Link<T::Handle>) {
        if let Some(handle) = link.handle {
            if !link.close_requested {
                if let Err(e) = handle.close() {
                    debug!(generation = link.generation, error = %e, "Closing replaced handle failed");
                }
            }
        }
    }

    fn cancel_retry(session: &mut Session<T::Handle>) {
        session.retry_epoch += 1;
        if let Some(pending) = session.pending_retry.take() {
            let _ = pending.cancel_tx.send(true);
            pending.task.abort();
            debug!(epoch = pending.epoch, "Cancelled scheduled reconnect");
        }
    }

    fn arm_retry(&self, session: &mut Session<T::Handle>, attempt: u32, delay: Duration) {
        Self::cancel_retry(session);
        let epoch = session.retry_epoch;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = self.me.clone();

        let task = tokio::spawn(
            async move {
                if !interruptible_sleep(cancel_rx, delay).await {
                    return;
                }
                if let Some(shared) = shared.upgrade() {
                    shared.fire_retry(epoch, attempt);
                }
            }
            .in_current_span(),
        );

        session.pending_retry = Some(PendingRetry {
            epoch,
            cancel_tx,
            task,
        });
    }

    fn fire_retry(&self, epoch: u64, attempt: u32) {
        let mut guard = self.lock();
        let session = &mut *guard;

        // A close or open after scheduling bumps the epoch
        if session.retry_epoch != epoch || session.explicitly_closed {
            debug!(attempt, "Scheduled reconnect no longer wanted");
            return;
        }

        session.pending_retry = None;
        session.stats.reconnect_attempts += 1;
        info!(attempt, "Attempting reconnect");
        self.start_connect(session);
    }

    fn handle_transport_event(&self, tagged: TaggedEvent) {
        let mut notifications = Vec::new();
        {
            let mut guard = self.lock();
            let session = &mut *guard;

            let current = session.link.as_ref().map(|link| link.generation);
            if current != Some(tagged.generation) {
                trace!(
                    generation = tagged.generation,
                    ?current,
                    "Ignoring event from replaced connection"
                );
                return;
            }

            match tagged.event {
                TransportEvent::Connected => self.on_connected(session, &mut notifications),
                TransportEvent::Disconnected { reason } => {
                    self.on_disconnected(session, reason, &mut notifications)
                }
                TransportEvent::Error(e) => {
                    let error = if session.status == SessionStatus::Connecting {
                        SessionError::TransportConnect(e)
                    } else {
                        SessionError::Transport(e)
                    };
                    warn!(error = %error, "MQTT transport error");
                    self.report_error(error, &mut notifications);
                }
                TransportEvent::Message { topic, payload } => {
                    session.stats.messages_received += 1;
                    session.stats.touch();
                    trace!(topic = %topic, bytes = payload.len(), "Message received");
                    self.publish_event(SessionEvent::Message {
                        topic: topic.clone(),
                        payload: payload.clone(),
                    });
                    notifications.push(Notification::Message { topic, payload });
                }
            }
        }
        self.notify(notifications);
    }

    fn on_connected(&self, session: &mut Session<T::Handle>, notifications: &mut Vec<Notification>) {
        let usable = session
            .link
            .as_ref()
            .is_some_and(|link| link.handle.is_some() && !link.close_requested);
        if !usable {
            debug!("Ignoring connect acknowledgement for a closing connection");
            return;
        }

        session.stats.connects += 1;
        session.stats.touch();
        self.set_status(session, SessionStatus::Open);
        session.retry_count = 0;

        let mut failures = Vec::new();
        if let Some(handle) = link_handle(&session.link) {
            for subscription in &session.subscriptions {
                debug!(topic = %subscription.topic, qos = ?subscription.qos, "Subscribing");
                if let Err(e) = handle.subscribe(&subscription.topic, subscription.qos) {
                    failures.push(e);
                }
            }
        }

        self.publish_event(SessionEvent::Connected);
        notifications.push(Notification::Connected);

        for e in failures {
            warn!(error = %e, "Re-subscribing failed");
            self.report_error(SessionError::Transport(e), notifications);
        }

        if session.options.flush_policy == FlushPolicy::OnConnect {
            self.flush_outbound(session, notifications);
        }
    }

    fn on_disconnected(
        &self,
        session: &mut Session<T::Handle>,
        reason: String,
        notifications: &mut Vec<Notification>,
    ) {
        let was_open = session.status.is_open();
        session.link = None;
        session.stats.disconnects += 1;
        session.stats.touch();
        self.set_status(session, SessionStatus::Closed);

        info!(reason = %reason, "MQTT connection ended");
        self.publish_event(SessionEvent::Disconnected {
            reason: reason.clone(),
        });
        notifications.push(Notification::Disconnected(reason.clone()));

        if was_open && !session.explicitly_closed {
            self.report_error(SessionError::TransportDisconnect { reason }, notifications);
        }

        self.schedule_reconnect(session, notifications);
    }

    fn schedule_reconnect(
        &self,
        session: &mut Session<T::Handle>,
        notifications: &mut Vec<Notification>,
    ) {
        let decision = ReconnectPolicy::decide(
            session.retry_count,
            session.explicitly_closed,
            &session.options.reconnect,
        );

        match decision {
            ReconnectDecision::AbortExplicitlyClosed => {
                debug!("Session closed explicitly, not reconnecting");
            }
            ReconnectDecision::AbortDisabled => {
                debug!("Auto-reconnect disabled, not reconnecting");
            }
            ReconnectDecision::AbortBudgetExhausted { max_retries } => {
                session.retry_count = max_retries.saturating_add(1);
                error!(
                    max_retries,
                    "Reconnect budget exhausted, session paused until reopened"
                );
                self.publish_event(SessionEvent::ReconnectFailed { max_retries });
                notifications.push(Notification::ReconnectFailed(Arc::new(
                    SessionError::ReconnectBudgetExhausted { max_retries },
                )));
            }
            ReconnectDecision::Proceed { attempt, delay } => {
                session.retry_count = attempt;
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.arm_retry(session, attempt, delay);
                self.publish_event(SessionEvent::ReconnectScheduled { attempt, delay });
            }
        }
    }

    /// Deliver buffered messages in order; stops at the first failure
    ///
    /// Returns the number delivered and whether the buffer was fully drained.
    fn flush_outbound(
        &self,
        session: &mut Session<T::Handle>,
        notifications: &mut Vec<Notification>,
    ) -> (usize, bool) {
        if session.outbound.is_empty() {
            return (0, true);
        }
        let Some(handle) = link_handle(&session.link) else {
            return (0, false);
        };

        let result = session.outbound.drain_with(|message| {
            handle.publish(
                &message.topic,
                message.payload.clone(),
                message.qos,
                message.retain,
            )
        });

        let (delivered, failure) = match result {
            Ok(delivered) => (delivered, None),
            Err((delivered, e)) => (delivered, Some(e)),
        };

        session.stats.messages_sent += delivered as u64;
        if delivered > 0 {
            session.stats.touch();
            debug!(
                delivered,
                remaining = session.outbound.len(),
                "Flushed buffered messages"
            );
        }

        match failure {
            None => (delivered, true),
            Some(e) => {
                warn!(error = %e, remaining = session.outbound.len(), "Flush interrupted");
                self.report_error(SessionError::Transport(e), notifications);
                (delivered, false)
            }
        }
    }

    fn send(&self, topic: String, payload: Bytes, options: PublishOptions) -> SendOutcome {
        let mut notifications = Vec::new();
        let outcome = {
            let mut guard = self.lock();
            let session = &mut *guard;
            let message = OutboundMessage {
                topic,
                payload,
                qos: options.qos.unwrap_or(session.options.publish_qos),
                retain: options.retain,
            };
            self.send_locked(
                session,
                message,
                options.buffer_if_unavailable,
                &mut notifications,
            )
        };
        self.notify(notifications);
        outcome
    }

    fn send_locked(
        &self,
        session: &mut Session<T::Handle>,
        message: OutboundMessage,
        buffer_if_unavailable: bool,
        notifications: &mut Vec<Notification>,
    ) -> SendOutcome {
        if session.status.is_open() {
            let (_, drained) = self.flush_outbound(session, notifications);
            // Never overtake messages still waiting in the buffer
            if drained {
                if let Some(handle) = link_handle(&session.link) {
                    match handle.publish(
                        &message.topic,
                        message.payload.clone(),
                        message.qos,
                        message.retain,
                    ) {
                        Ok(()) => {
                            session.stats.messages_sent += 1;
                            session.stats.touch();
                            trace!(topic = %message.topic, "Message published");
                            return SendOutcome::Delivered;
                        }
                        Err(e) => {
                            warn!(error = %e, "Publish failed");
                            self.report_error(SessionError::Transport(e), notifications);
                        }
                    }
                }
            }
        }

        if !buffer_if_unavailable {
            session.stats.messages_dropped += 1;
            debug!(topic = %message.topic, status = %session.status, "Session unavailable, message dropped");
            return SendOutcome::Dropped(DropReason::Unavailable);
        }

        match session.outbound.push(message) {
            Ok(()) => {
                session.stats.messages_buffered += 1;
                debug!(buffered = session.outbound.len(), "Message buffered until session opens");
                SendOutcome::Buffered
            }
            Err(rejected) => {
                let reason = DropReason::BufferFull {
                    capacity: session.outbound.capacity().unwrap_or_default(),
                };
                session.stats.messages_dropped += 1;
                warn!(topic = %rejected.topic, "Outbound buffer full, message dropped");
                self.report_error(reason.into_error(rejected.topic), notifications);
                SendOutcome::Dropped(reason)
            }
        }
    }

    fn flush(&self) -> usize {
        let mut notifications = Vec::new();
        let delivered = {
            let mut guard = self.lock();
            let session = &mut *guard;
            if !session.status.is_open() {
                return 0;
            }
            self.flush_outbound(session, &mut notifications).0
        };
        self.notify(notifications);
        delivered
    }

    fn subscribe(&self, topic: String, qos: QoS) {
        let mut notifications = Vec::new();
        {
            let mut guard = self.lock();
            let session = &mut *guard;

            match session.subscriptions.iter_mut().find(|s| s.topic == topic) {
                Some(existing) => existing.qos = qos,
                None => session.subscriptions.push(Subscription::new(topic.clone(), qos)),
            }

            if session.status.is_open() {
                if let Some(handle) = link_handle(&session.link) {
                    if let Err(e) = handle.subscribe(&topic, qos) {
                        warn!(error = %e, "Subscribe failed");
                        self.report_error(SessionError::Transport(e), &mut notifications);
                    }
                }
            }
        }
        self.notify(notifications);
    }

    fn unsubscribe(&self, topic: &str) {
        let mut notifications = Vec::new();
        {
            let mut guard = self.lock();
            let session = &mut *guard;
            session.subscriptions.retain(|s| s.topic != topic);

            if session.status.is_open() {
                if let Some(handle) = link_handle(&session.link) {
                    if let Err(e) = handle.unsubscribe(topic) {
                        warn!(error = %e, "Unsubscribe failed");
                        self.report_error(SessionError::Transport(e), &mut notifications);
                    }
                }
            }
        }
        self.notify(notifications);
    }
}
