//! NATS Streaming (STAN) client over the core NATS text protocol.
//!
//! Opens a byte-stream transport, frames and parses the NATS protocol,
//! performs the STAN discovery handshake, and manages the
//! subscribe/publish/acknowledge/unsubscribe lifecycle with
//! request-response correlation over ephemeral inbox subjects.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use natstream::{Client, Config, Subscription, SubscriptionOptions};
//!
//! async fn example() -> natstream::Result<()> {
//!     let mut client = Client::new(Config {
//!         dsn: "nats://localhost:4222".to_string(),
//!         client_id: "client-1".to_string(),
//!         cluster_id: "test-cluster".to_string(),
//!         ..Default::default()
//!     });
//!     client.connect().await?;
//!
//!     let subscription = Subscription::new(
//!         "orders.created",
//!         SubscriptionOptions { timeout: 30, ..Default::default() },
//!     );
//!     client.subscribe(subscription, Box::new(|message| {
//!         println!("seq {}: {} bytes", message.sequence, message.data.len());
//!         Ok(())
//!     }))
//!     .await?;
//!
//!     let guid = client.publish("orders.created", br#"{"id":"1"}"#).await?;
//!     println!("published {guid}");
//!     client.close().await
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod inbox;
pub mod proto;
pub mod protocol;
pub mod registry;
pub mod subscription;
pub mod transport;

mod engine;
mod publisher;
mod subscriber;
mod timer;

pub use buffer::FrameBuffer;
pub use client::Client;
pub use config::{Config, Session};
pub use error::{Error, Result};
pub use events::{MessageHandler, MessageReceived, ServerEvent, StanMessage};
pub use proto::StartPosition;
pub use registry::SubscriptionRegistry;
pub use subscription::{Subscription, SubscriptionOptions};
pub use transport::{Transport, TransportEvent};
