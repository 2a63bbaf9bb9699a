//! Client side of the Parley gateway: a reconnecting real-time transport
//! that routes inbound frames to handlers by their `type` field.
//!
//! ```no_run
//! # async fn demo() -> Result<(), parley_client::TransportError> {
//! use parley_client::{Transport, TransportConfig, gateway_url};
//!
//! let transport = Transport::websocket(
//!     gateway_url("http://localhost:3000", "<jwt>"),
//!     TransportConfig::default(),
//! );
//! let _typing = transport.subscribe("TypingStart", |frame| {
//!     println!("{:?}", frame.data());
//! });
//! transport.on_state_change(|state| println!("gateway {state}"));
//! transport.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod connector;
pub mod error;
pub mod frame;
pub mod registry;
pub mod state;
pub mod transport;

pub use backoff::Backoff;
pub use connector::{Connector, Socket, WsConnector, gateway_url};
pub use error::TransportError;
pub use frame::{Envelope, FrameError};
pub use registry::{HandlerRegistry, Subscription};
pub use state::ConnectionState;
pub use transport::{Transport, TransportConfig};
