//! Publish with acknowledgment correlation.
//!
//! Mirrors the subscribe pattern: one inbox under the `_STAN.acks.`
//! prefix for out-of-band ack delivery, one one-shot response inbox for
//! the publish acknowledgment itself, and a guid-named timer bounding
//! the whole exchange.

use prost::Message as _;
use tracing::debug;

use crate::client::{AckOutcome, Client};
use crate::error::{Error, Result};
use crate::inbox;
use crate::proto::PubMsg;
use crate::protocol::ClientCommand;
use crate::registry::{Binding, PRIORITY_RESPONSE};

impl Client {
    /// Publish `payload` on a STAN subject and wait for the server's
    /// acknowledgment, bounded by the write timeout.
    ///
    /// The message goes to `<pub_prefix>.<subject>` with a fresh guid;
    /// the guid is returned once the `PubAck` arrives. A `PubAck`
    /// carrying an error surfaces as [`Error::Nats`]; an expired
    /// timer as [`Error::Connection`].
    pub async fn publish(&mut self, subject: &str, payload: &[u8]) -> Result<String> {
        let session = self.session()?;
        let stan_subject = format!("{}.{subject}", session.pub_prefix);

        let guid = inbox::new_guid();
        let request = PubMsg {
            client_id: self.config().client_id.clone(),
            guid: guid.clone(),
            subject: subject.to_string(),
            data: payload.to_vec(),
        };

        // Out-of-band ack stream, session-scoped.
        let acks_inbox = inbox::new_inbox_with_prefix(inbox::ACKS_PREFIX);
        let acks_sid = inbox::new_sid();
        self.registry.bind(
            &acks_sid,
            PRIORITY_RESPONSE,
            Binding::PublishAck { guid: guid.clone() },
        );
        self.write_command(ClientCommand::Sub, &[&acks_inbox, &acks_sid], None)
            .await?;

        // One-shot response inbox carrying the PubAck itself.
        let write_timeout = self.config().write_timeout;
        self.pending_acks.insert(guid.clone(), AckOutcome::Pending);
        let response_sid = self
            .begin_response_exchange(
                Binding::PublishAck { guid: guid.clone() },
                &request.encode_to_vec(),
                &stan_subject,
                None,
                Some(&guid),
                write_timeout,
            )
            .await?;

        let outcome = self.drive(false).await;

        // The ack stream is per-publish here; tear it down either way.
        self.registry.remove(&acks_sid);
        self.registry.remove(&response_sid);
        if self.is_connected() {
            self.write_command(ClientCommand::Unsub, &[&acks_sid], None)
                .await?;
        }
        outcome?;

        match self.pending_acks.remove(&guid) {
            Some(AckOutcome::Acked) => {
                debug!(guid = %guid, subject = %subject, "publish acknowledged");
                Ok(guid)
            }
            Some(AckOutcome::Failed(reason)) => Err(Error::Nats(reason)),
            _ => Err(Error::Connection(format!(
                "publish {guid} not acknowledged within {write_timeout}s"
            ))),
        }
    }
}
