//! Subscription lifecycle operations.
//!
//! Per-subscription state machine: `Created → AwaitingSubscribeAck →
//! Active → (AwaitingUnsubscribeAck | AwaitingCloseAck) → Removed`.
//! Every control operation runs the two-phase ephemeral-inbox pattern
//! from [`crate::client`]; the request records themselves are built by
//! the small constructors at the bottom, which validate options before
//! any network I/O happens.

use prost::Message as _;
use tracing::debug;

use crate::client::Client;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::MessageHandler;
use crate::inbox;
use crate::proto::{StartPosition, SubscriptionRequest, UnsubscribeRequest};
use crate::protocol::ClientCommand;
use crate::registry::{Binding, PRIORITY_MESSAGE};
use crate::subscription::Subscription;

impl Client {
    /// Register a subscription and drive the loop through its delivery
    /// window.
    ///
    /// Opens the subscription's own wire inbox, issues the wire-level
    /// auto-unsubscribe when a message limit is set, runs the STAN
    /// subscribe exchange, and then waits: for `timeout` seconds when
    /// the subscription sets one, otherwise until something stops the
    /// loop (reaching the message limit does). The handler runs for
    /// each delivery, at higher priority than any response handler.
    ///
    /// Returns the assigned sid once the subscribe response has
    /// populated the ack inbox; anything less is an error, never a
    /// silent partial success.
    pub async fn subscribe(
        &mut self,
        mut subscription: Subscription,
        handler: MessageHandler,
    ) -> Result<String> {
        // Invalid option combinations fail before any network write.
        let request = build_subscription_request(self.config(), &subscription)?;
        let sub_requests = self.session()?.sub_requests.clone();

        let sid = inbox::new_sid();
        subscription.assign_sid(sid.clone());
        let sub_inbox = subscription.inbox().to_string();
        let timeout = subscription.options().timeout;
        let message_limit = subscription.options().message_limit;
        let ack_wait = subscription.options().ack_wait;
        self.registry.store(subscription);
        self.registry
            .bind(&sid, PRIORITY_MESSAGE, Binding::Deliver(handler));

        self.write_command(ClientCommand::Sub, &[&sub_inbox, &sid], None)
            .await?;
        if let Some(limit) = message_limit {
            // This is the one raw unsubscribe this sid gets.
            self.unsubscribed.insert(sid.clone());
            self.write_command(ClientCommand::Unsub, &[&sid, &limit.to_string()], None)
                .await?;
        }

        self.begin_response_exchange(
            Binding::SubscriptionResponse {
                target_sid: sid.clone(),
            },
            &request.encode_to_vec(),
            &sub_requests,
            Some(&sid),
            None,
            ack_wait,
        )
        .await?;

        match timeout {
            0 => self.run(None).await?,
            secs => self.run_timer(&sid, secs).await?,
        }

        match self.registry.get(&sid) {
            Ok(subscription) if subscription.ack_inbox().is_some() => Ok(sid),
            Ok(_) => {
                self.registry.remove(&sid);
                Err(Error::Connection(
                    "no subscription response within ack window".to_string(),
                ))
            }
            // Already torn down (message limit reached and removed).
            Err(_) => Ok(sid),
        }
    }

    /// Tear a subscription down.
    ///
    /// Idempotent: the raw `UNSUB` goes out at most once per sid, and a
    /// second call is a no-op. When the STAN handshake completed, the
    /// unsubscribe (or durable-preserving close) exchange runs and the
    /// entry is purged on its response or on timeout; past the ack
    /// window the operation is send-and-forget.
    pub async fn unsubscribe(&mut self, sid: &str) -> Result<()> {
        if !self.registry.is_known(sid) {
            return Ok(());
        }

        let exchanged = self.begin_unsubscribe_exchange(sid).await?;
        if exchanged {
            self.drive_timers().await?;
        }

        self.timers.stop(sid);
        self.registry.remove(sid);
        Ok(())
    }

    /// Drive the unsubscribe state machine for every active
    /// subscription; used during graceful shutdown.
    pub async fn unsubscribe_all(&mut self) -> Result<()> {
        let sids = self.registry.sids();
        debug!(count = sids.len(), "unsubscribing all");

        let mut any = false;
        for sid in &sids {
            any |= self.begin_unsubscribe_exchange(sid).await?;
        }
        if any {
            self.drive_timers().await?;
        }

        for sid in &sids {
            self.timers.stop(sid);
            self.registry.remove(sid);
        }
        Ok(())
    }

    /// Send the wire-level and STAN-level unsubscribe without driving
    /// the loop. Returns whether a response exchange was started.
    pub(crate) async fn begin_unsubscribe_exchange(&mut self, sid: &str) -> Result<bool> {
        if self.unsubscribed.insert(sid.to_string()) {
            self.write_command(ClientCommand::Unsub, &[sid], None)
                .await?;
        }

        // Without an ack inbox the handshake never completed; there is
        // no STAN-level subscription to close.
        let Ok(subscription) = self.registry.get(sid) else {
            return Ok(false);
        };
        if subscription.ack_inbox().is_none() {
            return Ok(false);
        }

        let request = build_unsubscribe_request(self.config(), subscription);
        let ack_wait = subscription.options().ack_wait;
        let session = self.session()?;
        let publish_to = match subscription.options().unsubscribe_preferred {
            true => session.unsub_requests.clone(),
            false => session.sub_close_requests.clone(),
        };

        self.begin_response_exchange(
            Binding::UnsubscribeResponse {
                target_sid: sid.to_string(),
            },
            &request.encode_to_vec(),
            &publish_to,
            Some(sid),
            None,
            ack_wait,
        )
        .await?;
        Ok(true)
    }

    async fn drive_timers(&mut self) -> Result<()> {
        self.drive(false).await
    }
}

/// Build the `SubscriptionRequest` for a subscription, validating the
/// start-position contract: `SequenceStart` requires a start sequence,
/// `TimeDeltaStart` a time delta.
pub(crate) fn build_subscription_request(
    config: &Config,
    subscription: &Subscription,
) -> Result<SubscriptionRequest> {
    let options = subscription.options();

    let start_sequence = match options.start_position {
        StartPosition::SequenceStart => options.start_sequence.ok_or_else(|| {
            Error::Subscription("start_sequence is required for SequenceStart".to_string())
        })?,
        _ => 0,
    };

    let start_time_delta = match options.start_position {
        StartPosition::TimeDeltaStart => {
            let delta = options.time_delta_start.ok_or_else(|| {
                Error::Subscription("time_delta_start is required for TimeDeltaStart".to_string())
            })?;
            delta.as_nanos() as i64
        }
        _ => 0,
    };

    Ok(SubscriptionRequest {
        client_id: config.client_id.clone(),
        subject: subscription.subject().to_string(),
        q_group: options.group.clone().unwrap_or_default(),
        inbox: subscription.inbox().to_string(),
        max_in_flight: options.max_in_flight,
        ack_wait_in_secs: options.ack_wait as i32,
        durable_name: options.durable_name.clone().unwrap_or_default(),
        start_position: options.start_position as i32,
        start_sequence,
        start_time_delta,
    })
}

/// Build the `UnsubscribeRequest`/close record for a subscription. The
/// durable name only travels for `NewOnly` subscriptions.
pub(crate) fn build_unsubscribe_request(
    config: &Config,
    subscription: &Subscription,
) -> UnsubscribeRequest {
    let options = subscription.options();

    let durable_name = match options.start_position {
        StartPosition::NewOnly => options.durable_name.clone().unwrap_or_default(),
        _ => String::new(),
    };

    UnsubscribeRequest {
        client_id: config.client_id.clone(),
        subject: subscription.subject().to_string(),
        inbox: subscription.ack_inbox().unwrap_or_default().to_string(),
        durable_name,
    }
}
