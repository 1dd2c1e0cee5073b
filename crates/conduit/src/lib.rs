//! # Conduit
//!
//! An Enterprise Integration Patterns messaging framework for Rust.
//!
//! ## Overview
//!
//! Applications talk to each other through messages sent over named
//! channels. Plain services are wired in as endpoints, gateways turn method
//! calls into request/reply exchanges, and interceptors add cross-cutting
//! behavior selected by pointcut.
//!
//! ```text
//! ┌─────────┐     ┌─────────┐     ┌──────────────────┐     ┌─────────┐
//! │ Gateway │────▶│ Channel │────▶│ Consumer         │────▶│ Handler │──▶ output channel
//! └─────────┘     └─────────┘     │ (event / polling)│     └─────────┘
//!                                 └──────────────────┘
//! ```
//!
//! - **Core** (`conduit-core`): messages, channels, handlers, endpoints,
//!   gateways, interceptors and the configuration assembling them
//! - **Runtime** (`conduit-runtime`): file/env configuration, logging and a
//!   runtime driving polling consumers until shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conduit::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut configuration = MessagingSystemConfiguration::new();
//!     configuration
//!         .register_message_channel(SimpleMessageChannelBuilder::create_queue_channel("orders"))?
//!         .register_message_handler(
//!             ServiceActivatorBuilder::create("orderService", "place")
//!                 .with_endpoint_id("orderConsumer")
//!                 .with_input_channel_name("orders"),
//!         )?;
//!
//!     let references = InMemoryReferenceSearchService::new()
//!         .with::<dyn ServiceEndpoint>("orderService", Arc::new(OrderService));
//!
//!     MessagingRuntime::builder()
//!         .build(configuration, Arc::new(references))
//!         .await?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use conduit_core as core;
pub use conduit_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use conduit::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use conduit_runtime::{ConduitConfig, ConfigLoader, MessagingRuntime, RuntimeError};

    // Everything needed to describe and build a messaging system
    pub use conduit_core::prelude::*;
}
