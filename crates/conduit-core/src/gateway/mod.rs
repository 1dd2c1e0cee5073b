//! Gateways: method calls turned into request messages.
//!
//! A [`GatewayBuilder`] describes one method of a gateway interface. Built
//! gateways sharing a reference name are grouped into a [`GatewayProxy`],
//! which callers use as the entry point into the messaging system.
//!
//! A call runs through these steps:
//!
//! 1. The arguments are converted into a message by the configured
//!    [`GatewayParameterConverter`]s.
//! 2. Before interceptors run, then around interceptors wrap the send.
//! 3. The message is sent on the request channel with the error channel (or
//!    the reply channel) as its error-channel header.
//! 4. The reply is taken from a one-shot inline channel, received from the
//!    reply channel, or awaited there with a timeout.
//! 5. After interceptors run on the reply.
//!
//! Transactions configured on the gateway wrap all of it.

pub mod builder;
pub mod converter;
pub mod proxy;
mod send_receive;
pub mod transaction;

pub use builder::{DEFAULT_REPLY_TIMEOUT_MS, GatewayBuilder};
pub use converter::{GatewayParameterConverter, HeaderExpression};
pub use proxy::{Gateway, GatewayProxy};
pub use transaction::{Transaction, TransactionFactory};
