use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Instrument, debug_span};

use super::converter::MethodCallToMessageConverter;
use super::transaction::{TransactionFactory, TransactionScope};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::MessageProcessor;
use crate::introspection::InterfaceToCall;
use crate::message::Message;

/// A built gateway: one method of a gateway interface.
pub struct Gateway {
    reference_name: String,
    interface: InterfaceToCall,
    converter: MethodCallToMessageConverter,
    processor: Arc<dyn MessageProcessor>,
    transactions: Vec<Arc<dyn TransactionFactory>>,
}

impl Gateway {
    pub(crate) fn new(
        reference_name: String,
        interface: InterfaceToCall,
        converter: MethodCallToMessageConverter,
        processor: Arc<dyn MessageProcessor>,
        transactions: Vec<Arc<dyn TransactionFactory>>,
    ) -> Self {
        Self {
            reference_name,
            interface,
            converter,
            processor,
            transactions,
        }
    }

    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn method_name(&self) -> &str {
        &self.interface.method_name
    }

    pub fn interface(&self) -> &InterfaceToCall {
        &self.interface
    }

    /// Converts `arguments` into a request, sends it and returns the reply.
    ///
    /// Configured transactions are committed when the call succeeds and
    /// rolled back when it fails.
    pub async fn execute(&self, arguments: Vec<Value>) -> MessagingResult<Option<Message>> {
        let span = debug_span!(
            "gateway",
            reference = %self.reference_name,
            method = %self.interface.method_name
        );
        async move {
            let scope = TransactionScope::begin(&self.transactions).await?;
            match self.call(&arguments).await {
                Ok(reply) => {
                    scope.commit().await?;
                    Ok(reply)
                }
                Err(e) => {
                    scope.rollback().await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn call(&self, arguments: &[Value]) -> MessagingResult<Option<Message>> {
        let request = self.converter.convert(arguments)?.build()?;
        self.processor.process(request).await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("reference_name", &self.reference_name)
            .field("interface", &self.interface.to_string())
            .finish()
    }
}

/// Before interceptors, the intercepted send and receive, then after
/// interceptors applied to the reply.
pub(crate) struct GatewayPipeline {
    pub(crate) before: Vec<Arc<dyn MessageProcessor>>,
    pub(crate) core: Arc<dyn MessageProcessor>,
    pub(crate) after: Vec<Arc<dyn MessageProcessor>>,
}

#[async_trait]
impl MessageProcessor for GatewayPipeline {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let mut request = message;
        for interceptor in &self.before {
            match interceptor.process(request).await? {
                Some(next) => request = next,
                None => return Ok(None),
            }
        }
        let Some(mut reply) = self.core.process(request).await? else {
            return Ok(None);
        };
        for interceptor in &self.after {
            match interceptor.process(reply).await? {
                Some(next) => reply = next,
                None => return Ok(None),
            }
        }
        Ok(Some(reply))
    }
}

/// All gateways registered under one reference name, dispatched by method.
///
/// # Example
///
/// ```rust,ignore
/// let orders = system.get_gateway_by_name("orderGateway")?;
/// let total: Option<i64> = orders.invoke_for("place", vec![json!({"sku": "A-1"})]).await?;
/// ```
#[derive(Clone)]
pub struct GatewayProxy {
    reference_name: String,
    gateways: BTreeMap<String, Arc<Gateway>>,
}

impl GatewayProxy {
    pub fn new(reference_name: impl Into<String>) -> Self {
        Self {
            reference_name: reference_name.into(),
            gateways: BTreeMap::new(),
        }
    }

    /// Adds a method. A method may be registered once per reference name.
    pub fn add(&mut self, gateway: Gateway) -> MessagingResult<()> {
        if gateway.reference_name() != self.reference_name {
            return Err(MessagingError::configuration(format!(
                "gateway {} belongs to '{}', not '{}'",
                gateway.interface(),
                gateway.reference_name(),
                self.reference_name
            )));
        }
        let method = gateway.method_name().to_string();
        if self.gateways.contains_key(&method) {
            return Err(MessagingError::configuration(format!(
                "gateway '{}' has method '{method}' registered twice",
                self.reference_name
            )));
        }
        self.gateways.insert(method, Arc::new(gateway));
        Ok(())
    }

    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.gateways.keys().map(String::as_str)
    }

    pub fn gateway(&self, method: &str) -> Option<&Arc<Gateway>> {
        self.gateways.get(method)
    }

    /// Calls `method` and returns the reply message, if any.
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> MessagingResult<Option<Message>> {
        let gateway = self.gateway(method).ok_or_else(|| {
            MessagingError::GatewayNotFound(format!("{}::{method}", self.reference_name))
        })?;
        gateway.execute(arguments).await
    }

    /// Calls `method` and deserializes the reply payload.
    pub async fn invoke_for<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> MessagingResult<Option<T>> {
        self.invoke(method, arguments)
            .await?
            .map(|reply| reply.payload_as::<T>())
            .transpose()
    }
}

impl std::fmt::Debug for GatewayProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayProxy")
            .field("reference_name", &self.reference_name)
            .field("methods", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}
