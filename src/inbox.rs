//! Ephemeral reply subjects and correlation identifiers.
//!
//! Inboxes are client-generated unique subjects used as one-shot or
//! session-scoped reply addresses; sids correlate a raw `SUB` with the
//! `MSG`/`UNSUB` commands for that subscription.

use uuid::Uuid;

/// Default prefix for ephemeral reply subjects.
pub const INBOX_PREFIX: &str = "_INBOX.";

/// Prefix for out-of-band publish-acknowledgment inboxes.
pub const ACKS_PREFIX: &str = "_STAN.acks.";

/// Prefix of the cluster discovery subject.
pub const DISCOVER_PREFIX: &str = "_STAN.discover";

/// A fresh `_INBOX.`-prefixed reply subject.
pub fn new_inbox() -> String {
    new_inbox_with_prefix(INBOX_PREFIX)
}

/// A fresh reply subject under an explicit prefix.
pub fn new_inbox_with_prefix(prefix: &str) -> String {
    format!("{prefix}{}", unique_token())
}

/// The discovery subject for a cluster.
pub fn discover_subject(cluster_id: &str) -> String {
    format!("{DISCOVER_PREFIX}.{cluster_id}")
}

/// A fresh subscription correlation id.
pub fn new_sid() -> String {
    unique_token()
}

/// A fresh publish guid.
pub fn new_guid() -> String {
    unique_token()
}

// 16 lowercase hex characters, unique per process lifetime.
fn unique_token() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..8])
}
