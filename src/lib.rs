//! # courierq
//!
//! A Celery-wire-compatible task queue client and worker over AMQP-style
//! brokers.
//!
//! ## Features
//!
//! - **Wire compatibility**: speaks the Celery message protocol, so Rust
//!   clients and workers interoperate with the Python ecosystem
//! - **Pluggable transports**: AMQP (RabbitMQ via lapin) and an in-process
//!   memory transport; third-party transports register by URI scheme
//! - **Awaitable results**: submissions hand back an [`client::AsyncResult`]
//!   correlated to a per-client reply queue
//! - **Explicit task registry**: tasks and their argument shapes are
//!   registered up front, dispatch never reflects
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courierq::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> CourierResult<()> {
//!     let registry = Arc::new(
//!         TaskRegistry::builder()
//!             .method("tasks.Calc", "sum", &[ArgKind::Int, ArgKind::Int], |args| async move {
//!                 let a = args[0].as_i64().unwrap_or(0);
//!                 let b = args[1].as_i64().unwrap_or(0);
//!                 Ok(Some(json!(a + b)))
//!             })
//!             .build(),
//!     );
//!
//!     let pool = WorkerPool::start(
//!         WorkerConfig::new("amqp://localhost//"),
//!         registry,
//!     )
//!     .await?;
//!
//!     let client = Client::new(
//!         ClientConfig::new("amqp://localhost//").with_backend("rpc://localhost//"),
//!     )?;
//!     let result = client.submit("tasks.Calc#sum", vec![json!(1), json!(2)]).await?;
//!     println!("1 + 2 = {}", result.get().await?);
//!
//!     pool.join().await;
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod utils;
pub mod worker;

pub mod prelude {
    pub use crate::client::{AsyncResult, Client};
    pub use crate::config::{ClientConfig, WorkerConfig};
    pub use crate::error::{CourierError, CourierResult, TaskFailure};
    pub use crate::registry::{ArgKind, TaskRegistry};
    pub use crate::transport::{BackendRegistry, BrokerRegistry};
    pub use crate::worker::WorkerPool;
    pub use async_trait::async_trait;
}

pub use crate::client::{AsyncResult, Client};
pub use crate::config::{ClientConfig, WorkerConfig};
pub use crate::error::{CourierError, CourierResult, TaskFailure};
pub use crate::registry::{ArgKind, TaskRegistry};
pub use crate::transport::{Backend, BackendRegistry, Broker, BrokerRegistry};
pub use crate::worker::WorkerPool;
pub use async_trait::async_trait;
