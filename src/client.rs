//! Connection state machine and cooperative dispatch loop.
//!
//! One logical task multiplexes socket events, named timers, and the
//! command-dispatch tick; handlers run to completion before the next
//! event is processed, so registry mutation needs no locking. Waiting
//! operations register a timer and let the loop drive completion or
//! expiry; callers never poll.
//!
//! The subscribe/unsubscribe/acknowledge operations live in
//! [`crate::subscriber`], publishing in [`crate::publisher`]; both are
//! `impl Client` blocks over the state owned here.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use prost::Message as _;
use tracing::{debug, error, info, warn};

use crate::buffer::FrameBuffer;
use crate::config::{Config, Session, DEFAULT_MAX_PAYLOAD};
use crate::engine;
use crate::error::{Error, Result};
use crate::events::{MessageReceived, ServerEvent, StanMessage};
use crate::inbox;
use crate::protocol::{self, ClientCommand, ConnectInfo, ServerInfo};
use crate::proto::{
    Ack, ConnectRequest, ConnectResponse, MsgProto, PubAck, SubscriptionResponse,
};
use crate::registry::{
    Binding, SubscriptionRegistry, PRIORITY_MESSAGE, PRIORITY_RESPONSE, PRIORITY_TEARDOWN,
};
use crate::subscription::{Subscription, SubscriptionOptions};
use crate::timer::{TimerRegistry, DISCONNECTION, HANDSHAKE, WAIT};
use crate::transport::{Transport, TransportEvent};

/// Outcome of a publish acknowledgment exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    Pending,
    Acked,
    Failed(String),
}

enum Step {
    Event(Option<TransportEvent>),
    Timer(String),
    Idle,
}

/// STAN client: transport, session state, subscriptions, and the loop
/// that drives them.
pub struct Client {
    config: Config,
    session: Option<Session>,
    transport: Option<Transport>,
    transport_events: Option<tokio::sync::mpsc::UnboundedReceiver<TransportEvent>>,
    buffer: FrameBuffer,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) timers: TimerRegistry,
    /// Raw wire-level unsubscribe goes out at most once per sid.
    pub(crate) unsubscribed: HashSet<String>,
    pub(crate) pending_acks: HashMap<String, AckOutcome>,
    max_payload: u64,
    stopped: bool,
    shutdown: bool,
    awaiting_first_pong: bool,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session: None,
            transport: None,
            transport_events: None,
            buffer: FrameBuffer::new(),
            registry: SubscriptionRegistry::new(),
            timers: TimerRegistry::new(),
            unsubscribed: HashSet::new(),
            pending_acks: HashMap::new(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            stopped: false,
            shutdown: false,
            awaiting_first_pong: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session parameters from the connect handshake.
    pub fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::Connection("streaming session not configured".to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(Transport::is_connected)
    }

    /// Look up an active subscription by sid.
    pub fn subscription(&self, sid: &str) -> Result<&Subscription> {
        self.registry.get(sid)
    }

    /// Open the transport and perform both handshakes: raw NATS
    /// (`CONNECT` + `PING`, resolved by the first `PONG`) and STAN
    /// discovery (resolved by the `ConnectResponse` that carries the
    /// per-session subjects).
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let address = self.config.address()?;
        let (transport, events) =
            Transport::connect(&address, self.config.connection_timeout()).await?;
        self.transport = Some(transport);
        self.transport_events = Some(events);
        self.shutdown = false;
        info!(address = %address, "transport connected");

        let connect_info = ConnectInfo {
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            verbose: self.config.verbose,
            pedantic: self.config.pedantic,
            protocol: self.config.protocol,
            user: self.config.user.clone(),
            pass: self.config.pass.clone(),
        };
        let payload = serde_json::to_string(&connect_info)
            .map_err(|e| Error::Connection(format!("invalid CONNECT payload: {e}")))?;

        self.write_command(ClientCommand::Connect, &[&payload], None)
            .await?;
        self.awaiting_first_pong = true;
        self.write_command(ClientCommand::Ping, &[], None).await?;

        self.run_timer(HANDSHAKE, self.config.connection_timeout)
            .await?;
        if self.awaiting_first_pong {
            self.close_transport().await;
            return Err(Error::Connection(
                "no PONG received within connect timeout".to_string(),
            ));
        }

        self.discover().await
    }

    /// STAN discovery: a heartbeat subscription plus the two-phase
    /// `ConnectRequest`/`ConnectResponse` exchange on the cluster
    /// discovery subject.
    async fn discover(&mut self) -> Result<()> {
        let discover = inbox::discover_subject(&self.config.cluster_id);

        let mut heartbeat = Subscription::new(discover.clone(), SubscriptionOptions::default());
        let sid = inbox::new_sid();
        heartbeat.assign_sid(sid.clone());
        let heartbeat_inbox = heartbeat.inbox().to_string();
        self.registry.store(heartbeat);
        self.registry.bind(&sid, PRIORITY_MESSAGE, Binding::Heartbeat);
        self.write_command(ClientCommand::Sub, &[&heartbeat_inbox, &sid], None)
            .await?;

        let request = ConnectRequest {
            client_id: self.config.client_id.clone(),
            heartbeat_inbox,
        };
        self.begin_response_exchange(
            Binding::ConnectResponse,
            &request.encode_to_vec(),
            &discover,
            None,
            None,
            self.config.connection_timeout,
        )
        .await?;

        self.drive(false).await?;

        match self.session {
            Some(_) => Ok(()),
            None => {
                self.close_transport().await;
                Err(Error::Connection(
                    "no streaming discovery response".to_string(),
                ))
            }
        }
    }

    /// Close the STAN session (`CloseRequest` exchange) and tear the
    /// transport down.
    pub async fn close(&mut self) -> Result<()> {
        if self.is_connected() && self.session.is_some() {
            let response_sid = self.begin_session_close().await?;
            self.drive(false).await?;
            self.registry.remove(&response_sid);
        }

        self.close_transport().await;
        self.session = None;
        Ok(())
    }

    /// Drive the loop: bounded when a timeout is given, otherwise until
    /// externally stopped.
    pub async fn run(&mut self, timeout: Option<u64>) -> Result<()> {
        match timeout {
            Some(secs) => self.run_timer(WAIT, secs).await,
            None => self.drive(true).await,
        }
    }

    /// Break out of a `run(None)` loop after the current event.
    pub fn stop_waiting(&mut self) {
        self.stopped = true;
    }

    /// Cancel every timer and stop the loop.
    pub fn stop_all(&mut self) {
        self.timers.stop_all();
        self.stopped = true;
    }

    /// Start a named timer and drive the loop until every outstanding
    /// timer has resolved or fired.
    pub(crate) async fn run_timer(&mut self, name: &str, secs: u64) -> Result<()> {
        self.timers.start(name, Duration::from_secs(secs));
        self.drive(false).await
    }

    /// The cooperative loop. Runs while at least one timer is
    /// outstanding, or (with `until_stopped`) until something calls
    /// `stop_waiting`/`stop_all` or the transport goes away.
    pub(crate) async fn drive(&mut self, until_stopped: bool) -> Result<()> {
        self.stopped = false;

        loop {
            if self.stopped {
                return Ok(());
            }

            // Drain buffered commands in capped batches, re-checking the
            // stop conditions between batches.
            if self.process_buffer().await? > 0 {
                continue;
            }

            let deadline = self.timers.next_deadline();
            if deadline.is_none() && !until_stopped {
                return Ok(());
            }

            let step = match (self.transport_events.as_mut(), deadline) {
                (Some(events), Some((name, at))) => {
                    tokio::select! {
                        event = events.recv() => Step::Event(event),
                        _ = tokio::time::sleep_until(at) => Step::Timer(name),
                    }
                }
                (Some(events), None) => Step::Event(events.recv().await),
                (None, Some((name, at))) => {
                    tokio::time::sleep_until(at).await;
                    Step::Timer(name)
                }
                (None, None) => Step::Idle,
            };

            match step {
                Step::Timer(name) => self.fire_timer(&name),
                Step::Event(Some(event)) => self.handle_transport_event(event).await?,
                Step::Event(None) => {
                    // Sender gone: the transport was dropped wholesale.
                    self.transport_events = None;
                    self.timers.stop_all();
                    return Ok(());
                }
                Step::Idle => return Ok(()),
            }
        }
    }

    /// Give-up semantics: the timer is removed and any response
    /// exchange keyed by it is cleared; nothing is retried.
    fn fire_timer(&mut self, name: &str) {
        self.timers.stop(name);

        if self.registry.is_known(name) && !self.registry.is_primary(name) {
            warn!(sid = %name, "response wait elapsed, giving up");
            self.registry.remove(name);
        } else {
            debug!(timer = %name, "timer elapsed");
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Data(bytes) => {
                if self.config.debug {
                    debug!(data = %String::from_utf8_lossy(&bytes), ">>>>");
                }
                // Dispatch happens at the top of the loop, in batches.
                self.buffer.append(&bytes);
                Ok(())
            }
            TransportEvent::End => {
                info!("transport ended by remote");
                self.graceful_shutdown().await
            }
            TransportEvent::Error(reason) => {
                error!(reason = %reason, "transport error");
                self.close_transport().await;
                self.timers.stop_all();
                Err(Error::Connection(reason))
            }
            TransportEvent::Closed => {
                self.timers.stop_all();
                self.stopped = true;
                Ok(())
            }
        }
    }

    /// Command-dispatch tick: drain the buffer up to the safety cap.
    /// Returns how many commands were handled.
    async fn process_buffer(&mut self) -> Result<usize> {
        let mut handled = 0;
        while handled < engine::MAX_COMMANDS_PER_TICK && !self.stopped {
            match engine::next_event(&mut self.buffer, &self.registry)? {
                Some(event) => {
                    self.handle_server_event(event).await?;
                    handled += 1;
                }
                None => break,
            }
        }
        Ok(handled)
    }

    async fn handle_server_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::Info(line) => {
                let info = ServerInfo::parse(&line)?;
                if info.max_payload > 0 {
                    self.max_payload = info.max_payload;
                }
                Ok(())
            }
            ServerEvent::Ping => self.write_command(ClientCommand::Pong, &[], None).await,
            ServerEvent::Pong => {
                if self.awaiting_first_pong {
                    self.awaiting_first_pong = false;
                    self.timers.stop(HANDSHAKE);
                }
                Ok(())
            }
            ServerEvent::Ok => Ok(()),
            ServerEvent::Error(reason) => {
                // Any server error ends the session; no reconnect here.
                error!(reason = %reason, "server reported error");
                self.close_transport().await;
                self.timers.stop_all();
                Err(Error::Nats(reason))
            }
            ServerEvent::Message(message) => self.dispatch_message(message).await,
            ServerEvent::UndefinedMessage(message) => {
                warn!(sid = %message.sid, subject = %message.subject, "undefined message received");
                Ok(())
            }
        }
    }

    /// Run every binding for the message's sid in priority order.
    ///
    /// Bindings are detached for the duration of the dispatch so they
    /// can mutate the registry; teardown during dispatch wins over
    /// re-attachment.
    async fn dispatch_message(&mut self, message: MessageReceived) -> Result<()> {
        let mut bindings = self.registry.take_bindings(&message.sid);

        let mut outcome = Ok(());
        for (_, binding) in bindings.iter_mut() {
            if let Err(e) = self.run_binding(binding, &message).await {
                outcome = Err(e);
                break;
            }
        }

        self.registry.restore_bindings(&message.sid, bindings);
        outcome
    }

    async fn run_binding(&mut self, binding: &mut Binding, message: &MessageReceived) -> Result<()> {
        match binding {
            Binding::Deliver(handler) => self.deliver(handler, message).await,
            Binding::SubscriptionResponse { target_sid } => {
                let response = SubscriptionResponse::decode(&message.payload[..])
                    .map_err(|e| Error::Stream(format!("invalid subscription response: {e}")))?;
                if !response.error.is_empty() {
                    return Err(Error::Nats(response.error));
                }
                let target = target_sid.clone();
                self.registry.get_mut(&target)?.set_ack_inbox(response.ack_inbox);
                debug!(sid = %target, "subscription acknowledged");
                Ok(())
            }
            Binding::ConnectResponse => {
                let response = ConnectResponse::decode(&message.payload[..])
                    .map_err(|e| Error::Stream(format!("invalid connect response: {e}")))?;
                if !response.error.is_empty() {
                    return Err(Error::Nats(response.error));
                }
                self.session = Some(Session::from(&response));
                info!("streaming session configured");
                Ok(())
            }
            Binding::UnsubscribeResponse { target_sid } => {
                let target = target_sid.clone();
                self.timers.stop(&target);
                self.registry.remove(&target);
                debug!(sid = %target, "subscription removed");
                Ok(())
            }
            Binding::CloseResponse => {
                let response = crate::proto::CloseResponse::decode(&message.payload[..])
                    .map_err(|e| Error::Stream(format!("invalid close response: {e}")))?;
                self.timers.stop(DISCONNECTION);
                self.session = None;
                self.close_transport().await;
                match response.error.is_empty() {
                    true => Ok(()),
                    false => Err(Error::Nats(response.error)),
                }
            }
            Binding::PublishAck { guid } => {
                let ack = PubAck::decode(&message.payload[..])
                    .map_err(|e| Error::Stream(format!("invalid publish ack: {e}")))?;
                let outcome = match ack.error.is_empty() {
                    true => AckOutcome::Acked,
                    false => AckOutcome::Failed(ack.error),
                };
                self.pending_acks.insert(guid.clone(), outcome);
                self.timers.stop(guid);
                Ok(())
            }
            Binding::Heartbeat => match &message.reply_to {
                Some(reply) => self.publish_raw(reply, b"", None).await,
                None => Ok(()),
            },
            Binding::Teardown => {
                self.timers.stop(&message.sid);
                self.registry.remove(&message.sid);
                Ok(())
            }
        }
    }

    /// Decode a delivery, hand it to the application handler, and
    /// acknowledge on success.
    async fn deliver(
        &mut self,
        handler: &mut crate::events::MessageHandler,
        message: &MessageReceived,
    ) -> Result<()> {
        let proto = MsgProto::decode(&message.payload[..])
            .map_err(|e| Error::Subscription(format!("invalid message payload: {e}")))?;

        self.registry.get_mut(&message.sid)?.increment_received();

        let stan_message = StanMessage {
            sid: message.sid.clone(),
            subject: proto.subject,
            sequence: proto.sequence,
            data: proto.data,
            timestamp: proto.timestamp,
            redelivered: proto.redelivered,
        };

        match handler(&stan_message) {
            Ok(()) => {
                self.acknowledge(&message.sid, stan_message.sequence)
                    .await?
            }
            Err(e) => {
                // Unacknowledged: the server redelivers after ack-wait.
                warn!(sid = %message.sid, sequence = stan_message.sequence, error = %e,
                    "handler failed, message left unacknowledged");
            }
        }

        if self
            .registry
            .get(&message.sid)
            .map(Subscription::limit_reached)
            .unwrap_or(false)
        {
            let sid = message.sid.clone();
            info!(sid = %sid, "message limit reached");
            self.begin_unsubscribe_exchange(&sid).await?;
            self.timers.stop(&sid);
            self.stop_waiting();
        }

        Ok(())
    }

    /// Acknowledge a delivered message: publish an `Ack` to the
    /// subscription's ack inbox and advance `processed`.
    ///
    /// Only valid once the subscribe response has populated the ack
    /// inbox.
    pub async fn acknowledge(&mut self, sid: &str, sequence: u64) -> Result<()> {
        let (ack_inbox, subject) = {
            let subscription = self.registry.get(sid)?;
            let ack_inbox = subscription.ack_inbox().ok_or_else(|| {
                Error::Subscription("acknowledge before subscribe response".to_string())
            })?;
            (ack_inbox.to_string(), subscription.subject().to_string())
        };

        let ack = Ack { subject, sequence };
        self.publish_raw(&ack_inbox, &ack.encode_to_vec(), None)
            .await?;
        self.registry.get_mut(sid)?.increment_processed();
        Ok(())
    }

    /// The two-phase ephemeral-inbox pattern every control operation
    /// uses: open a one-shot wire subscription on a fresh inbox, bind
    /// the response and teardown handlers, publish the request with the
    /// inbox as reply-to, and bound the wait with a timer.
    ///
    /// Returns the response sid. The timer is named after it unless an
    /// explicit name is given.
    pub(crate) async fn begin_response_exchange(
        &mut self,
        binding: Binding,
        payload: &[u8],
        publish_to: &str,
        alias_target: Option<&str>,
        timer_name: Option<&str>,
        timeout_secs: u64,
    ) -> Result<String> {
        let response_inbox = inbox::new_inbox();
        let response_sid = inbox::new_sid();

        if let Some(target) = alias_target {
            self.registry.store_alias(&response_sid, target);
        }
        self.registry.bind(&response_sid, PRIORITY_RESPONSE, binding);
        self.registry
            .bind(&response_sid, PRIORITY_TEARDOWN, Binding::Teardown);

        self.write_command(ClientCommand::Sub, &[&response_inbox, &response_sid], None)
            .await?;
        // The response is one-shot.
        self.write_command(ClientCommand::Unsub, &[&response_sid, "1"], None)
            .await?;
        self.publish_raw(publish_to, payload, Some(&response_inbox))
            .await?;

        let timer = timer_name.unwrap_or(&response_sid);
        self.timers.start(timer, Duration::from_secs(timeout_secs));

        Ok(response_sid)
    }

    /// Begin the `CloseRequest` exchange without driving the loop.
    /// Returns the response sid for later cleanup.
    pub(crate) async fn begin_session_close(&mut self) -> Result<String> {
        let close_requests = self.session()?.close_requests.clone();
        let request = crate::proto::CloseRequest {
            client_id: self.config.client_id.clone(),
        };
        self.begin_response_exchange(
            Binding::CloseResponse,
            &request.encode_to_vec(),
            &close_requests,
            None,
            Some(DISCONNECTION),
            self.config.write_timeout,
        )
        .await
    }

    /// Transport ended: best-effort unsubscribe-all and session close
    /// on the (possibly half-open) write path, then teardown. The
    /// remote has stopped sending, so responses can never arrive and
    /// there is nothing to wait for. Idempotent via the shutdown latch.
    async fn graceful_shutdown(&mut self) -> Result<()> {
        if !self.shutdown {
            self.shutdown = true;

            for sid in self.registry.sids() {
                if let Err(e) = self.begin_unsubscribe_exchange(&sid).await {
                    warn!(error = %e, "unsubscribe-all cut short");
                    break;
                }
            }
            if self.session.is_some() {
                if let Err(e) = self.begin_session_close().await {
                    warn!(error = %e, "session close request failed");
                }
            }
            info!("unsubscribed and closed after transport end");
        }

        self.close_transport().await;
        self.session = None;
        self.registry.clear();
        self.stop_all();
        Ok(())
    }

    pub(crate) async fn close_transport(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close().await;
        }
    }

    /// Format and write one outbound command frame.
    pub(crate) async fn write_command(
        &mut self,
        command: ClientCommand,
        params: &[&str],
        payload: Option<&[u8]>,
    ) -> Result<()> {
        let frame = protocol::format_command(command, params, payload);
        if self.config.debug {
            debug!(frame = %String::from_utf8_lossy(&frame), "<<<<");
        }

        let max_payload = self.max_payload as usize;
        let write_timeout = self.config.write_timeout();
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;
        transport.write(&frame, max_payload, write_timeout).await
    }

    /// `PUB <subject> [reply-to] <nbytes>` with the payload line.
    pub(crate) async fn publish_raw(
        &mut self,
        subject: &str,
        payload: &[u8],
        reply_to: Option<&str>,
    ) -> Result<()> {
        let mut params = vec![subject];
        if let Some(reply) = reply_to {
            params.push(reply);
        }
        self.write_command(ClientCommand::Pub, &params, Some(payload))
            .await
    }
}
