//! Subscription value object.
//!
//! Captures one logical subscription's configuration and mutable
//! session counters. Identity (`subject`, `sid`, `inbox`) is fixed at
//! creation/registration time; `ack_inbox` is populated exactly once
//! when the subscribe response arrives, and `acknowledge` is only valid
//! after that.

use std::time::Duration;

use crate::inbox;
use crate::proto::StartPosition;

/// Delivery-policy options supplied by the caller before `subscribe`.
#[derive(Clone, Debug)]
pub struct SubscriptionOptions {
    pub start_position: StartPosition,
    /// Required iff `start_position` is `SequenceStart`.
    pub start_sequence: Option<u64>,
    /// Required iff `start_position` is `TimeDeltaStart`.
    pub time_delta_start: Option<Duration>,
    /// Queue-group name for load-balanced delivery.
    pub group: Option<String>,
    /// Ties redelivery state across reconnects when set.
    pub durable_name: Option<String>,
    pub max_in_flight: i32,
    /// Seconds the server waits for an ack before redelivering.
    pub ack_wait: u64,
    /// Cap on delivered messages; triggers auto-unsubscribe at the
    /// wire level and teardown when reached.
    pub message_limit: Option<u64>,
    /// Choose unsubscribe over durable-preserving close on teardown.
    pub unsubscribe_preferred: bool,
    /// Seconds to keep the loop alive waiting on this subscription;
    /// 0 means run until externally stopped.
    pub timeout: u64,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            start_position: StartPosition::NewOnly,
            start_sequence: None,
            time_delta_start: None,
            group: None,
            durable_name: None,
            max_in_flight: 1024,
            ack_wait: 30,
            message_limit: None,
            unsubscribe_preferred: true,
            timeout: 0,
        }
    }
}

/// One logical subscription and its session state.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    inbox: String,
    sid: Option<String>,
    options: SubscriptionOptions,
    ack_inbox: Option<String>,
    received: u64,
    processed: u64,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, options: SubscriptionOptions) -> Self {
        Self {
            subject: subject.into(),
            inbox: inbox::new_inbox(),
            sid: None,
            options,
            ack_inbox: None,
            received: 0,
            processed: 0,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Ephemeral reply subject deliveries arrive on.
    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    /// Correlation id; assigned when `subscribe` begins.
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    /// Subject acknowledgments are published to; set once the
    /// subscribe response has been received.
    pub fn ack_inbox(&self) -> Option<&str> {
        self.ack_inbox.as_deref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub(crate) fn assign_sid(&mut self, sid: String) {
        self.sid = Some(sid);
    }

    pub(crate) fn set_ack_inbox(&mut self, ack_inbox: String) {
        self.ack_inbox = Some(ack_inbox);
    }

    pub(crate) fn increment_received(&mut self) -> u64 {
        self.received += 1;
        self.received
    }

    /// Invariant: `processed` never overtakes `received`; an ack without
    /// a delivery is a bug on the caller side.
    pub(crate) fn increment_processed(&mut self) -> u64 {
        debug_assert!(self.processed < self.received);
        self.processed += 1;
        self.processed
    }

    /// True once the delivered-message cap has been reached.
    pub fn limit_reached(&self) -> bool {
        self.options
            .message_limit
            .is_some_and(|limit| self.received >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_defaults() {
        let options = SubscriptionOptions::default();
        assert_eq!(options.max_in_flight, 1024);
        assert_eq!(options.ack_wait, 30);
        assert_eq!(options.start_position, StartPosition::NewOnly);
        assert!(options.unsubscribe_preferred);
        assert_eq!(options.timeout, 0);
    }

    #[test]
    fn test_new_subscription_has_fresh_inbox_and_no_sid() {
        let subscription = Subscription::new("orders.created", SubscriptionOptions::default());
        assert!(subscription.inbox().starts_with("_INBOX."));
        assert_eq!(subscription.sid(), None);
        assert_eq!(subscription.ack_inbox(), None);
    }

    #[test]
    fn test_counters_keep_processed_below_received() {
        let mut subscription = Subscription::new("orders", SubscriptionOptions::default());

        assert_eq!(subscription.increment_received(), 1);
        assert_eq!(subscription.increment_processed(), 1);
        subscription.increment_received();
        subscription.increment_received();
        subscription.increment_processed();

        assert!(subscription.processed() <= subscription.received());
        assert_eq!(subscription.received(), 3);
        assert_eq!(subscription.processed(), 2);
    }

    #[test]
    fn test_limit_reached() {
        let mut subscription = Subscription::new(
            "orders",
            SubscriptionOptions {
                message_limit: Some(2),
                ..Default::default()
            },
        );

        assert!(!subscription.limit_reached());
        subscription.increment_received();
        assert!(!subscription.limit_reached());
        subscription.increment_received();
        assert!(subscription.limit_reached());
    }

    #[test]
    fn test_no_limit_never_reached() {
        let mut subscription = Subscription::new("orders", SubscriptionOptions::default());
        subscription.increment_received();
        assert!(!subscription.limit_reached());
    }
}
