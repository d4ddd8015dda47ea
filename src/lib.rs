//! Stellarbus client core
//!
//! A publish/subscribe and request/reply messaging client with
//! schema-validated messages. The middleware wire protocol stays
//! behind the [`Transport`] trait; this crate owns connection
//! lifecycle, subscription matching, request/reply correlation, and
//! message validation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stellarbus::{Config, Connection, Field, LoopbackHub, Message, Kind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = LoopbackHub::new();
//!     let conn = Connection::new(Config::new(), Arc::new(hub.endpoint()))?;
//!
//!     conn.connect().await?;
//!     conn.subscribe("MSN1.SAT1.MSG.HB.>")?;
//!
//!     let mut msg = Message::new("MSN1.SAT1.MSG.HB.GCSPUB", Kind::Publish)?;
//!     msg.add_field(Field::new("COUNTER", 1u16)?);
//!     conn.publish(&msg).await?;
//!
//!     if let Some(hb) = conn.receive(1000).await? {
//!         println!("received: {}", hb.to_xml());
//!     }
//!
//!     conn.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod codec;
mod config;
mod config_file;
mod connection;
mod correlator;
mod error;
mod factory;
mod field;
mod heartbeat;
mod message;
mod schema;
mod subject;
mod subscription;
mod transport;

pub use config::{options, Config};
pub use config_file::{ConfigFile, SubscriptionEntry};
pub use connection::{Connection, ConnectionEvent, ConnectionState, EventCallback};
pub use correlator::{
    ReplyCallback, DEFAULT_REPUBLISH_MS, MIN_REPUBLISH_MS, REPUBLISH_NEVER, WAIT_FOREVER,
};
pub use error::{BusError, Result, StatusClass, StatusCode};
pub use factory::MessageFactory;
pub use field::{Field, FieldType, FieldValue};
pub use heartbeat::HeartbeatGenerator;
pub use message::{FieldIterator, FieldSelector, Kind, Message, ResponseStatus};
pub use schema::{
    FieldMode, FieldTemplate, MessageValidator, SchemaTemplate, Specification,
    CURRENT_SPEC_VERSION, MAX_SCHEMA_LEVEL,
};
pub use subject::{validate_subject, SubjectPattern};
pub use subscription::{MessageCallback, SubscriptionInfo};
pub use transport::{LoopbackHub, LoopbackTransport, Transport, WireMessage};
