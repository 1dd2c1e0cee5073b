use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use super::parameter::ParameterConverterBuilder;
use super::service::{BoundMethod, MethodCall, MethodReturn, ServiceEndpoint, ServiceReference};
use super::{BuildContext, EndpointSettings, MessageHandlerBuilder, MessageProcessor};
use crate::channel::ChannelResolver;
use crate::error::{MessagingError, MessagingResult};
use crate::introspection::{InterfaceParameter, InterfaceToCall, MethodSignatureResolver, ReturnType};
use crate::message::Message;

type RouteFn = Arc<dyn Fn(&Message) -> MessagingResult<Vec<String>> + Send + Sync>;

#[derive(Clone)]
enum Routing {
    HeaderValue {
        header_name: String,
        mapping: BTreeMap<String, String>,
    },
    RecipientList(Vec<String>),
    Closure(RouteFn),
    Method(MethodCall),
}

/// Endpoint sending each message on to one or more channels chosen per message.
///
/// When no channel is chosen the message goes to the default channel if one
/// is set, otherwise routing fails unless resolution is optional.
#[derive(Clone)]
pub struct RouterBuilder {
    settings: EndpointSettings,
    routing: Routing,
    resolution_required: bool,
    default_channel_name: Option<String>,
}

impl RouterBuilder {
    /// Routes on the value of `header_name`, looked up in `mapping`.
    pub fn create_header_value_router<I, K, V>(header_name: impl Into<String>, mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from(Routing::HeaderValue {
            header_name: header_name.into(),
            mapping: mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Sends every message to all `channels`.
    pub fn create_recipient_list_router<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(Routing::RecipientList(
            channels.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn create_with_closure<F>(route: F) -> Self
    where
        F: Fn(&Message) -> MessagingResult<Vec<String>> + Send + Sync + 'static,
    {
        Self::from(Routing::Closure(Arc::new(route)))
    }

    /// Routes to the channel name (or array of names) returned by the
    /// referenced service method.
    pub fn create(reference_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self::from(Routing::Method(MethodCall::new(
            ServiceReference::Name(reference_name.into()),
            method_name,
        )))
    }

    pub fn create_with_direct_object(
        service: Arc<dyn ServiceEndpoint>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::from(Routing::Method(MethodCall::new(
            ServiceReference::Instance(service),
            method_name,
        )))
    }

    fn from(routing: Routing) -> Self {
        Self {
            settings: EndpointSettings::default(),
            routing,
            resolution_required: true,
            default_channel_name: None,
        }
    }

    pub fn with_resolution_required(mut self, resolution_required: bool) -> Self {
        self.resolution_required = resolution_required;
        self
    }

    pub fn with_default_resolution_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel_name = Some(channel.into());
        self
    }

    pub fn with_method_parameter_converters(
        mut self,
        converters: Vec<ParameterConverterBuilder>,
    ) -> Self {
        if let Routing::Method(method) = &mut self.routing {
            method.converters = converters;
        }
        self
    }
}

impl MessageHandlerBuilder for RouterBuilder {
    fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut EndpointSettings {
        &mut self.settings
    }

    fn intercepted_interface(
        &self,
        signatures: &dyn MethodSignatureResolver,
    ) -> MessagingResult<InterfaceToCall> {
        Ok(match &self.routing {
            Routing::Method(method) => method.signature(signatures),
            _ => InterfaceToCall::create("conduit::Router", "route")
                .with_parameter(InterfaceParameter::value("payload"))
                .with_return_type(ReturnType::Value),
        })
    }

    fn required_reference_names(&self) -> Vec<String> {
        let mut names = match &self.routing {
            Routing::Method(method) => method.service.required_reference_names(),
            _ => Vec::new(),
        };
        names.extend(
            self.settings
                .around_interceptors
                .iter()
                .flat_map(|i| i.required_reference_names()),
        );
        names
    }

    fn build_processor(&self, context: &BuildContext) -> MessagingResult<Arc<dyn MessageProcessor>> {
        let routing = match &self.routing {
            Routing::HeaderValue {
                header_name,
                mapping,
            } => BoundRouting::HeaderValue {
                header_name: header_name.clone(),
                mapping: mapping.clone(),
            },
            Routing::RecipientList(channels) => BoundRouting::RecipientList(channels.clone()),
            Routing::Closure(route) => BoundRouting::Closure(Arc::clone(route)),
            Routing::Method(method) => BoundRouting::Method(method.bind(context)?),
        };
        Ok(Arc::new(RouterProcessor {
            name: self.endpoint_id().unwrap_or("router").to_string(),
            routing,
            channels: Arc::clone(&context.channels),
            resolution_required: self.resolution_required,
            default_channel_name: self.default_channel_name.clone(),
        }))
    }
}

enum BoundRouting {
    HeaderValue {
        header_name: String,
        mapping: BTreeMap<String, String>,
    },
    RecipientList(Vec<String>),
    Closure(RouteFn),
    Method(BoundMethod),
}

struct RouterProcessor {
    name: String,
    routing: BoundRouting,
    channels: Arc<dyn ChannelResolver>,
    resolution_required: bool,
    default_channel_name: Option<String>,
}

impl RouterProcessor {
    async fn route(&self, message: &Message) -> MessagingResult<Vec<String>> {
        match &self.routing {
            BoundRouting::HeaderValue {
                header_name,
                mapping,
            } => Ok(message
                .headers()
                .get_value(header_name)
                .map(header_key)
                .and_then(|key| mapping.get(&key).cloned())
                .into_iter()
                .collect()),
            BoundRouting::RecipientList(channels) => Ok(channels.clone()),
            BoundRouting::Closure(route) => route(message),
            BoundRouting::Method(method) => match method.call(message).await? {
                MethodReturn::Nothing => Ok(Vec::new()),
                MethodReturn::Value(value) => channel_names(value),
                MethodReturn::Message(reply) => channel_names(reply.payload().clone()),
            },
        }
    }
}

fn header_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn channel_names(value: Value) -> MessagingResult<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(name) => Ok(vec![name]),
        Value::Array(names) => names
            .into_iter()
            .map(|name| match name {
                Value::String(name) => Ok(name),
                other => Err(MessagingError::invalid_argument(format!(
                    "router returned {other}, expected a channel name"
                ))),
            })
            .collect(),
        other => Err(MessagingError::invalid_argument(format!(
            "router returned {other}, expected a channel name"
        ))),
    }
}

#[async_trait]
impl MessageProcessor for RouterProcessor {
    async fn process(&self, message: Message) -> MessagingResult<Option<Message>> {
        let mut destinations = self.route(&message).await?;
        if destinations.is_empty() {
            if let Some(default) = &self.default_channel_name {
                destinations.push(default.clone());
            } else if self.resolution_required {
                return Err(MessagingError::handler(format!(
                    "router '{}' resolved no channel for message {}",
                    self.name,
                    message.id()
                )));
            } else {
                debug!(router = %self.name, message_id = %message.id(), "No route, dropping message");
                return Ok(None);
            }
        }

        for name in destinations {
            let channel = self.channels.resolve(&name)?;
            trace!(router = %self.name, channel = %name, "Routing message");
            channel.send(message.clone()).await?;
        }
        Ok(None)
    }
}
