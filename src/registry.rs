//! Process-wide map from correlation id to subscription and handler
//! bindings.
//!
//! Constructed once per session and owned by the client, not a global:
//! every component resolves a wire sid through this service. A response
//! inbox's sid is an alias for the subscription it answers, so both
//! resolve to the same `Subscription`. All mutation happens on the
//! dispatch loop; no locking discipline is required.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::events::MessageHandler;
use crate::subscription::Subscription;

/// Priority of the delivery handler; runs before response/teardown
/// bindings so delivery counting happens deterministically.
pub(crate) const PRIORITY_MESSAGE: i32 = 100;
/// Priority of one-shot response bindings.
pub(crate) const PRIORITY_RESPONSE: i32 = 0;
/// Teardown runs after the response binding it cleans up for.
pub(crate) const PRIORITY_TEARDOWN: i32 = -10;

/// One registered handler for a sid's inbound messages.
pub(crate) enum Binding {
    /// Decode the delivery and hand it to the application handler.
    Deliver(MessageHandler),
    /// One-shot subscribe response for the subscription stored under
    /// `target_sid`.
    SubscriptionResponse { target_sid: String },
    /// One-shot discovery response of the connect handshake.
    ConnectResponse,
    /// One-shot unsubscribe/close response for `target_sid`.
    UnsubscribeResponse { target_sid: String },
    /// One-shot session close response.
    CloseResponse,
    /// Publish acknowledgment correlated by guid.
    PublishAck { guid: String },
    /// Reply to a server heartbeat on the message's declared inbox.
    Heartbeat,
    /// Purge this sid's registry entry and timer after the response
    /// binding has run.
    Teardown,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Binding::Deliver(_) => "Deliver",
            Binding::SubscriptionResponse { .. } => "SubscriptionResponse",
            Binding::ConnectResponse => "ConnectResponse",
            Binding::UnsubscribeResponse { .. } => "UnsubscribeResponse",
            Binding::CloseResponse => "CloseResponse",
            Binding::PublishAck { .. } => "PublishAck",
            Binding::Heartbeat => "Heartbeat",
            Binding::Teardown => "Teardown",
        };
        f.write_str(name)
    }
}

/// sid → subscription + ordered handler bindings.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
    aliases: HashMap<String, String>,
    bindings: HashMap<String, Vec<(i32, Binding)>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscription under its assigned sid.
    pub(crate) fn store(&mut self, subscription: Subscription) {
        let sid = subscription
            .sid()
            .expect("subscription stored before sid assignment")
            .to_string();
        self.subscriptions.insert(sid, subscription);
    }

    /// Register `sid` as a second key for the subscription stored under
    /// `target_sid` (the response-inbox pattern).
    pub(crate) fn store_alias(&mut self, sid: &str, target_sid: &str) {
        self.aliases.insert(sid.to_string(), target_sid.to_string());
    }

    /// Bind a handler for `sid` at the given priority; higher runs first.
    pub(crate) fn bind(&mut self, sid: &str, priority: i32, binding: Binding) {
        let bindings = self.bindings.entry(sid.to_string()).or_default();
        bindings.push((priority, binding));
        bindings.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
    }

    /// Whether this sid keys a stored subscription (as opposed to a
    /// response alias or a bindings-only entry).
    pub(crate) fn is_primary(&self, sid: &str) -> bool {
        self.subscriptions.contains_key(sid)
    }

    /// Whether a `MSG` for this sid has anywhere to go.
    pub fn is_known(&self, sid: &str) -> bool {
        self.subscriptions.contains_key(sid)
            || self.aliases.contains_key(sid)
            || self.bindings.contains_key(sid)
    }

    pub fn get(&self, sid: &str) -> Result<&Subscription> {
        self.resolve(sid)
            .and_then(|primary| self.subscriptions.get(primary))
            .ok_or_else(|| Error::SubscriptionNotFound(sid.to_string()))
    }

    pub(crate) fn get_mut(&mut self, sid: &str) -> Result<&mut Subscription> {
        let primary = self
            .resolve(sid)
            .ok_or_else(|| Error::SubscriptionNotFound(sid.to_string()))?
            .to_string();
        self.subscriptions
            .get_mut(&primary)
            .ok_or(Error::SubscriptionNotFound(primary))
    }

    /// Detach the binding list for a sid so handlers can run without
    /// holding the registry; pair with [`restore_bindings`].
    pub(crate) fn take_bindings(&mut self, sid: &str) -> Vec<(i32, Binding)> {
        self.bindings.remove(sid).unwrap_or_default()
    }

    /// Re-attach bindings after dispatch, unless the entry was removed
    /// mid-dispatch (teardown wins).
    pub(crate) fn restore_bindings(&mut self, sid: &str, bindings: Vec<(i32, Binding)>) {
        if bindings.is_empty() || self.removed(sid) {
            return;
        }
        self.bindings.insert(sid.to_string(), bindings);
    }

    /// Purge a sid: its subscription (when primary), any aliases to it,
    /// and every handler binding.
    pub(crate) fn remove(&mut self, sid: &str) {
        self.bindings.remove(sid);

        if self.aliases.remove(sid).is_some() {
            return;
        }

        if self.subscriptions.remove(sid).is_some() {
            let orphaned: Vec<String> = self
                .aliases
                .iter()
                .filter(|(_, target)| target.as_str() == sid)
                .map(|(alias, _)| alias.clone())
                .collect();
            for alias in orphaned {
                self.aliases.remove(&alias);
                self.bindings.remove(&alias);
            }
        }
    }

    /// Active primary sids, for shutdown iteration.
    pub fn sids(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Drop everything; used when the connection shuts down.
    pub(crate) fn clear(&mut self) {
        self.subscriptions.clear();
        self.aliases.clear();
        self.bindings.clear();
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn resolve<'a>(&'a self, sid: &'a str) -> Option<&'a str> {
        if self.subscriptions.contains_key(sid) {
            return Some(sid);
        }
        self.aliases.get(sid).map(String::as_str)
    }

    fn removed(&self, sid: &str) -> bool {
        !self.is_known(sid)
    }
}
