//! Assembly of a messaging system.
//!
//! A [`MessagingSystemConfiguration`] collects channels, handlers, gateways,
//! inbound adapters and interceptors, either registered directly or
//! contributed by [`Module`]s. Building it resolves interceptors for every
//! endpoint, creates the channels and returns a [`ConfiguredMessagingSystem`].
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_core::prelude::*;
//!
//! let mut configuration = MessagingSystemConfiguration::new();
//! configuration
//!     .register_message_handler(
//!         ServiceActivatorBuilder::create("calculator", "multiply")
//!             .with_input_channel_name("calculate"),
//!     )?
//!     .register_gateway(GatewayBuilder::create(
//!         "calculatorGateway",
//!         "CalculatorGateway",
//!         "calculate",
//!         "calculate",
//!     ))?;
//!
//! let system = configuration.build_messaging_system(references).await?;
//! let product: Option<i64> = system
//!     .get_gateway_by_name("calculatorGateway")?
//!     .invoke_for("calculate", vec![json!(21)])
//!     .await?;
//! ```

pub mod annotation;
pub mod configuration;
pub mod module;
pub mod system;

pub use annotation::{
    AnnotationModuleRetrievingService, AnnotationRegistration, AnnotationRegistrationService,
    GatewayModule, InMemoryAnnotationRegistrationService, PollerModule, ServiceActivatorModule,
};
pub use configuration::MessagingSystemConfiguration;
pub use module::{ExtensionObject, InMemoryModuleMessaging, Module, ModuleRetrievingService};
pub use system::ConfiguredMessagingSystem;
