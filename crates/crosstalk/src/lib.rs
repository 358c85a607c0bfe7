// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client SDK for the Crosstalk synchronization server.
//!
//! This crate provides a client for reading and writing cross-team query
//! threads and for receiving update events in real time. Updates arrive
//! over an SSE push channel with an automatic polling fallback, so a
//! subscriber keeps receiving events while the push connection is down.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use crosstalk::{Channel, CrosstalkClient, NewMessage, SenderRole, Team, UpdateEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CrosstalkClient::builder()
//!         .base_url("http://localhost:8385")
//!         .channel(Channel::Team(Team::Credit))
//!         .build()?;
//!
//!     // Subscribe to updates; the transport starts on the first
//!     // registration and stops when the last one is removed.
//!     let handle = client
//!         .subscribe(
//!             Channel::Team(Team::Credit),
//!             Arc::new(|event: &UpdateEvent| {
//!                 println!("update: {}", event.kind());
//!             }),
//!         )
//!         .await;
//!
//!     // Post into a thread by any known variation of its identifier.
//!     client
//!         .post_message(
//!             "85",
//!             &NewMessage {
//!                 content: "Documents uploaded".to_string(),
//!                 sender: "Credit1".to_string(),
//!                 sender_role: SenderRole::Officer,
//!                 team: Team::Credit,
//!                 declared_thread_id: None,
//!                 timestamp: None,
//!             },
//!         )
//!         .await?;
//!
//!     let messages = client.messages("HPR85").await?;
//!     println!("{} messages", messages.len());
//!
//!     client.unsubscribe(handle).await;
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod router;
mod transport;

pub use client::{CrosstalkClient, CrosstalkClientBuilder, NewMessage};
pub use error::{ClientError, Result};
pub use router::{EventCallback, NotificationRouter, SubscriptionHandle};
pub use transport::{DualTransport, TransportConfig, TransportState};

// Re-export core types for convenience
pub use crosstalk_core::event::{MessageSummary, QueryUpdate, UpdateAction, UpdateEvent};
pub use crosstalk_core::model::{Channel, MarkedFor, Message, SenderRole, Team, Thread};
