//! Client SDK for relay servers.
//!
//! The centerpiece is [`ReconnectingStreamClient`], which runs a stream to
//! completion across dropped connections by resuming durable runs from the
//! last event it received.
//!
//! # Example
//!
//! ```no_run
//! use relay_client::{ReconnectConfig, RelayClient, Result, StreamObserver};
//! use relay_types::StreamRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Printer;
//!
//! impl StreamObserver for Printer {
//!     fn on_text_delta(&mut self, text: &str) {
//!         print!("{text}");
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let client = RelayClient::builder()
//!     .base_url("http://localhost:8080")
//!     .build()?;
//!
//! let outcome = client
//!     .reconnecting(ReconnectConfig::default())
//!     .stream(
//!         &StreamRequest::new("Tell me a story"),
//!         &mut Printer,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("\n[{} reconnects]", outcome.reconnects);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod reconnect;
pub mod transport;

pub use client::{ClientBuilder, HealthStatus, RelayClient};
pub use error::{Error, Result};
pub use reconnect::{
    ConversationHistory, FinishSummary, InMemoryHistory, ReconnectConfig,
    ReconnectingStreamClient, StreamMetadata, StreamObserver, StreamOutcome, backoff_delay,
};
pub use transport::{HttpTransport, ReceivedEvent, StreamTransport, TransportStream};
