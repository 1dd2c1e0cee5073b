use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{Instrument, debug, debug_span, info};
use uuid::Uuid;

use super::module::ModuleRetrievingService;
use super::system::ConfiguredMessagingSystem;
use crate::channel::interceptor::order_by_importance;
use crate::channel::{
    ChannelInterceptorBuilder, ChannelRef, ChannelResolver, InMemoryChannelResolver,
    InterceptedPollableChannel, InterceptedSubscribableChannel, MessageChannelBuilder,
    SimpleMessageChannelBuilder,
};
use crate::endpoint::{
    EventDrivenConsumerBuilder, InboundChannelAdapterBuilder, MessageHandlerConsumerBuilder,
    PollingConsumerBuilder, PollingMetadata,
};
use crate::error::{MessagingError, MessagingResult};
use crate::gateway::{DEFAULT_REPLY_TIMEOUT_MS, GatewayBuilder, GatewayProxy};
use crate::handler::{
    BuildContext, ChainMessageHandlerBuilder, EndpointSettings, MessageHandlerBuilder,
};
use crate::interceptor::{
    AroundInterceptorReference, EndpointDescriptor, InterceptorRegistry, MethodInterceptor,
    ResolvedInterceptors,
};
use crate::introspection::{InMemoryMethodSignatureResolver, MethodSignatureResolver};
use crate::reference::ReferenceSearchService;

/// Collects everything a messaging system is made of and builds it once.
///
/// Registrations are validated as they come in; wiring that needs live
/// objects (references, channels) is checked by
/// [`build_messaging_system`](Self::build_messaging_system), which consumes
/// the configuration.
///
/// # Example
///
/// ```rust,ignore
/// let mut configuration = MessagingSystemConfiguration::new();
/// configuration
///     .register_message_channel(SimpleMessageChannelBuilder::create_queue_channel("orders"))?
///     .register_message_handler(
///         ServiceActivatorBuilder::create("orderService", "place")
///             .with_input_channel_name("orders"),
///     )?
///     .register_gateway(GatewayBuilder::create("orderGateway", "OrderGateway", "place", "orders"))?;
///
/// let system = configuration.build_messaging_system(Arc::new(references)).await?;
/// ```
pub struct MessagingSystemConfiguration {
    channel_builders: BTreeMap<String, Box<dyn MessageChannelBuilder>>,
    channel_interceptors: Vec<ChannelInterceptorBuilder>,
    handlers: Vec<Box<dyn MessageHandlerBuilder>>,
    interceptors: InterceptorRegistry,
    gateways: Vec<GatewayBuilder>,
    consumers: Vec<InboundChannelAdapterBuilder>,
    polling_metadata: HashMap<String, PollingMetadata>,
    consumer_factories: Vec<Arc<dyn MessageHandlerConsumerBuilder>>,
    endpoint_ids: HashSet<String>,
    required_references: BTreeSet<String>,
    signatures: Arc<dyn MethodSignatureResolver>,
    default_reply_timeout_ms: Option<i64>,
    default_polling_metadata: PollingMetadata,
}

impl Default for MessagingSystemConfiguration {
    fn default() -> Self {
        Self::with_signatures(Arc::new(InMemoryMethodSignatureResolver::new()))
    }
}

impl MessagingSystemConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty configuration resolving method signatures through `signatures`.
    pub fn with_signatures(signatures: Arc<dyn MethodSignatureResolver>) -> Self {
        Self {
            channel_builders: BTreeMap::new(),
            channel_interceptors: Vec::new(),
            handlers: Vec::new(),
            interceptors: InterceptorRegistry::new(),
            gateways: Vec::new(),
            consumers: Vec::new(),
            polling_metadata: HashMap::new(),
            consumer_factories: vec![
                Arc::new(EventDrivenConsumerBuilder),
                Arc::new(PollingConsumerBuilder),
            ],
            endpoint_ids: HashSet::new(),
            required_references: BTreeSet::new(),
            signatures,
            default_reply_timeout_ms: None,
            default_polling_metadata: PollingMetadata::default(),
        }
    }

    /// Creates a configuration and lets every module register into it.
    ///
    /// Each module receives the extension objects it reports it can handle.
    pub fn prepare(
        modules: &dyn ModuleRetrievingService,
        signatures: Arc<dyn MethodSignatureResolver>,
    ) -> MessagingResult<Self> {
        let mut configuration = Self::with_signatures(signatures);
        let extensions = modules.find_all_extension_objects();
        let modules = modules.find_all_modules();

        for module in &modules {
            configuration.require_references(module.required_reference_names());
        }
        for module in &modules {
            let handled: Vec<_> = extensions
                .iter()
                .filter(|extension| module.can_handle(extension))
                .cloned()
                .collect();
            debug!(
                module = %module.name(),
                extension_objects = handled.len(),
                "Preparing module"
            );
            module.prepare(&mut configuration, &handled)?;
        }
        Ok(configuration)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a channel. Channel names are unique.
    pub fn register_message_channel(
        &mut self,
        builder: impl MessageChannelBuilder + 'static,
    ) -> MessagingResult<&mut Self> {
        let name = builder.channel_name().to_string();
        if self.channel_builders.contains_key(&name) {
            return Err(MessagingError::configuration(format!(
                "channel '{name}' is already registered"
            )));
        }
        self.require_references(builder.required_reference_names());
        debug!(channel = %name, pollable = builder.is_pollable(), "Registered channel");
        self.channel_builders.insert(name, Box::new(builder));
        Ok(self)
    }

    /// Registers a handler endpoint. It needs an input channel; an endpoint
    /// id is generated when it has none.
    pub fn register_message_handler(
        &mut self,
        builder: impl MessageHandlerBuilder + 'static,
    ) -> MessagingResult<&mut Self> {
        let mut builder: Box<dyn MessageHandlerBuilder> = Box::new(builder);
        let Some(input_channel) = builder.input_channel_name().map(str::to_string) else {
            return Err(MessagingError::configuration(format!(
                "message handler '{}' has no input channel",
                builder.endpoint_id().unwrap_or("anonymous")
            )));
        };
        let endpoint_id = match builder.endpoint_id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                builder.settings_mut().endpoint_id = Some(id.clone());
                id
            }
        };
        self.claim_endpoint_id(&endpoint_id)?;
        self.require_references(builder.required_reference_names());
        debug!(endpoint_id = %endpoint_id, channel = %input_channel, "Registered message handler");
        self.handlers.push(builder);
        Ok(self)
    }

    pub fn register_channel_interceptor(
        &mut self,
        interceptor: ChannelInterceptorBuilder,
    ) -> MessagingResult<&mut Self> {
        self.require_references(interceptor.required_reference_names());
        debug!(pattern = %interceptor.channel_pattern(), "Registered channel interceptor");
        self.channel_interceptors.push(interceptor);
        Ok(self)
    }

    pub fn register_before_method_interceptor(
        &mut self,
        interceptor: MethodInterceptor,
    ) -> MessagingResult<&mut Self> {
        self.require_references(interceptor.required_reference_names());
        debug!(interceptor = %interceptor.name(), "Registered before interceptor");
        self.interceptors.add_before(interceptor);
        Ok(self)
    }

    pub fn register_after_method_interceptor(
        &mut self,
        interceptor: MethodInterceptor,
    ) -> MessagingResult<&mut Self> {
        self.require_references(interceptor.required_reference_names());
        debug!(interceptor = %interceptor.name(), "Registered after interceptor");
        self.interceptors.add_after(interceptor);
        Ok(self)
    }

    pub fn register_around_method_interceptor(
        &mut self,
        interceptor: AroundInterceptorReference,
    ) -> MessagingResult<&mut Self> {
        self.require_references(interceptor.required_reference_names());
        debug!(interceptor = %interceptor.name(), "Registered around interceptor");
        self.interceptors.add_around(interceptor);
        Ok(self)
    }

    pub fn register_gateway(&mut self, gateway: GatewayBuilder) -> MessagingResult<&mut Self> {
        self.require_references(gateway.required_reference_names());
        debug!(gateway = %gateway, "Registered gateway");
        self.gateways.push(gateway);
        Ok(self)
    }

    /// Registers an inbound channel adapter, run as a separately running consumer.
    pub fn register_consumer(
        &mut self,
        consumer: InboundChannelAdapterBuilder,
    ) -> MessagingResult<&mut Self> {
        self.claim_endpoint_id(consumer.endpoint_id())?;
        self.require_references(consumer.required_reference_names());
        debug!(
            endpoint_id = %consumer.endpoint_id(),
            channel = %consumer.request_channel_name(),
            "Registered inbound channel adapter"
        );
        self.consumers.push(consumer);
        Ok(self)
    }

    /// Sets how the endpoint named by `metadata.endpoint_id` polls.
    pub fn register_polling_metadata(
        &mut self,
        metadata: PollingMetadata,
    ) -> MessagingResult<&mut Self> {
        metadata.validate()?;
        debug!(endpoint_id = %metadata.endpoint_id, "Registered polling metadata");
        self.polling_metadata
            .insert(metadata.endpoint_id.clone(), metadata);
        Ok(self)
    }

    /// Adds a consumer factory, consulted before the ones already registered.
    pub fn register_consumer_factory(
        &mut self,
        factory: Arc<dyn MessageHandlerConsumerBuilder>,
    ) -> MessagingResult<&mut Self> {
        self.consumer_factories.insert(0, factory);
        Ok(self)
    }

    /// Marks references that must resolve for the system to build.
    pub fn require_references<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_references
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Reply timeout for gateways that do not set one.
    pub fn with_default_reply_timeout_ms(&mut self, timeout_ms: i64) -> &mut Self {
        self.default_reply_timeout_ms = Some(timeout_ms);
        self
    }

    /// Polling settings for endpoints without registered metadata.
    pub fn with_default_polling_metadata(&mut self, metadata: PollingMetadata) -> &mut Self {
        self.default_polling_metadata = metadata;
        self
    }

    pub fn required_reference_names(&self) -> impl Iterator<Item = &str> {
        self.required_references.iter().map(String::as_str)
    }

    pub fn registered_gateways(&self) -> &[GatewayBuilder] {
        &self.gateways
    }

    pub fn registered_channel_names(&self) -> impl Iterator<Item = &str> {
        self.channel_builders.keys().map(String::as_str)
    }

    pub fn polling_metadata(&self, endpoint_id: &str) -> Option<&PollingMetadata> {
        self.polling_metadata.get(endpoint_id)
    }

    fn claim_endpoint_id(&mut self, endpoint_id: &str) -> MessagingResult<()> {
        if !self.endpoint_ids.insert(endpoint_id.to_string()) {
            return Err(MessagingError::configuration(format!(
                "endpoint id '{endpoint_id}' is used twice"
            )));
        }
        Ok(())
    }

    fn metadata_for(&self, endpoint_id: &str) -> PollingMetadata {
        self.polling_metadata
            .get(endpoint_id)
            .cloned()
            .unwrap_or_else(|| PollingMetadata {
                endpoint_id: endpoint_id.to_string(),
                ..self.default_polling_metadata.clone()
            })
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Builds the running system. Event-driven consumers are subscribed
    /// before this returns; separately running ones are only created.
    ///
    /// Any error aborts the build; no partial system is returned.
    pub async fn build_messaging_system(
        self,
        references: Arc<dyn ReferenceSearchService>,
    ) -> MessagingResult<ConfiguredMessagingSystem> {
        self.build(references)
            .instrument(debug_span!("build_messaging_system"))
            .await
    }

    async fn build(
        mut self,
        references: Arc<dyn ReferenceSearchService>,
    ) -> MessagingResult<ConfiguredMessagingSystem> {
        if let Some(missing) = self
            .required_references
            .iter()
            .find(|name| !references.has(name))
        {
            return Err(MessagingError::ReferenceNotFound(missing.clone()));
        }

        self.configure_default_channels();
        self.configure_interceptors()?;
        self.apply_gateway_defaults();

        let channels = Arc::new(self.build_channels(references.as_ref())?);
        let context = BuildContext::new(
            references,
            Arc::clone(&channels) as Arc<dyn ChannelResolver>,
            Arc::clone(&self.signatures),
        );

        let mut gateways: BTreeMap<String, GatewayProxy> = BTreeMap::new();
        for builder in &self.gateways {
            let gateway = builder.build(&context)?;
            gateways
                .entry(builder.reference_name().to_string())
                .or_insert_with(|| GatewayProxy::new(builder.reference_name()))
                .add(gateway)?;
        }

        let mut system = ConfiguredMessagingSystem::new(channels, gateways);

        for handler in &self.handlers {
            let channel_name = handler.input_channel_name().unwrap_or_default();
            let channel = context.channels.resolve(channel_name)?;
            let factory = self
                .consumer_factories
                .iter()
                .find(|factory| factory.is_supporting(handler.as_ref(), &channel))
                .ok_or_else(|| {
                    MessagingError::configuration(format!(
                        "no consumer factory supports endpoint '{}' on channel '{channel_name}'",
                        handler.endpoint_id().unwrap_or("anonymous")
                    ))
                })?;
            let metadata = self.metadata_for(handler.endpoint_id().unwrap_or_default());
            let consumer = factory.build(&context, &channel, handler.as_ref(), &metadata)?;
            system.add_consumer(consumer).await?;
        }

        for adapter in &self.consumers {
            let metadata = self.metadata_for(adapter.endpoint_id());
            system.add_consumer(adapter.build(&context, &metadata)?).await?;
        }

        info!(
            channels = system.channel_names().len(),
            gateways = system.gateway_list().len(),
            separately_running = system.list_of_separately_running_consumers().len(),
            "Messaging system built"
        );
        Ok(system)
    }

    /// Registers a direct channel for every handler input channel nobody declared.
    fn configure_default_channels(&mut self) {
        let missing: BTreeSet<String> = self
            .handlers
            .iter()
            .filter_map(|handler| handler.input_channel_name())
            .filter(|name| !self.channel_builders.contains_key(*name))
            .map(str::to_string)
            .collect();
        for name in missing {
            debug!(channel = %name, "Creating default direct channel");
            self.channel_builders.insert(
                name.clone(),
                Box::new(SimpleMessageChannelBuilder::create_direct_message_channel(
                    name,
                )),
            );
        }
    }

    /// Attaches the matching method interceptors to every handler, gateway
    /// and inbound channel adapter.
    fn configure_interceptors(&mut self) -> MessagingResult<()> {
        let registry = std::mem::take(&mut self.interceptors);
        let signatures = Arc::clone(&self.signatures);

        let handlers = std::mem::take(&mut self.handlers);
        for mut handler in handlers {
            let interface = handler.intercepted_interface(signatures.as_ref())?;
            let resolved = registry.resolve(
                &EndpointDescriptor::new(&interface, handler.endpoint_annotations()),
                handler.required_interceptor_names(),
            )?;
            log_resolved(&interface.to_string(), &resolved);

            let ResolvedInterceptors {
                before,
                around,
                after,
            } = resolved;
            for interceptor in around {
                handler.add_around_interceptor(interceptor);
            }
            if before.is_empty() && after.is_empty() {
                self.handlers.push(handler);
            } else {
                self.handlers
                    .push(Box::new(wrap_in_chain(handler, &before, &after)));
            }
        }

        for gateway in &mut self.gateways {
            let interface = gateway.intercepted_interface(signatures.as_ref());
            let resolved = registry.resolve(
                &EndpointDescriptor::new(&interface, gateway.endpoint_annotations()),
                gateway.required_interceptor_names(),
            )?;
            log_resolved(&interface.to_string(), &resolved);
            resolved.before.into_iter().for_each(|i| gateway.add_before_interceptor(i));
            resolved.around.into_iter().for_each(|i| gateway.add_around_interceptor(i));
            resolved.after.into_iter().for_each(|i| gateway.add_after_interceptor(i));
        }

        for adapter in &mut self.consumers {
            let interface = adapter.intercepted_interface(signatures.as_ref());
            let resolved = registry.resolve(
                &EndpointDescriptor::new(&interface, adapter.endpoint_annotations()),
                adapter.required_interceptor_names(),
            )?;
            log_resolved(&interface.to_string(), &resolved);
            resolved.before.into_iter().for_each(|i| adapter.add_before_interceptor(i));
            resolved.around.into_iter().for_each(|i| adapter.add_around_interceptor(i));
            resolved.after.into_iter().for_each(|i| adapter.add_after_interceptor(i));
        }
        Ok(())
    }

    fn apply_gateway_defaults(&mut self) {
        let Some(timeout) = self.default_reply_timeout_ms else {
            return;
        };
        self.gateways = std::mem::take(&mut self.gateways)
            .into_iter()
            .map(|gateway| {
                if gateway.reply_timeout_ms() == DEFAULT_REPLY_TIMEOUT_MS {
                    gateway.with_reply_millisecond_timeout(timeout)
                } else {
                    gateway
                }
            })
            .collect();
    }

    /// Builds every channel, wrapped in the interceptors whose pattern matches its name.
    fn build_channels(
        &self,
        references: &dyn ReferenceSearchService,
    ) -> MessagingResult<InMemoryChannelResolver> {
        let resolver = InMemoryChannelResolver::new();
        for (name, builder) in &self.channel_builders {
            let channel = builder.build(references)?;
            let interceptors = order_by_importance(
                self.channel_interceptors
                    .iter()
                    .filter(|interceptor| interceptor.relates_to(name))
                    .map(|interceptor| Ok((interceptor.importance(), interceptor.build(references)?)))
                    .collect::<MessagingResult<Vec<_>>>()?,
            );
            let channel = if interceptors.is_empty() {
                channel
            } else {
                debug!(channel = %name, interceptors = interceptors.len(), "Intercepting channel");
                match channel {
                    ChannelRef::Subscribable(inner) => ChannelRef::Subscribable(
                        InterceptedSubscribableChannel::create(inner, interceptors),
                    ),
                    ChannelRef::Pollable(inner) => ChannelRef::Pollable(
                        InterceptedPollableChannel::create(inner, interceptors),
                    ),
                }
            };
            resolver.register(name.clone(), channel)?;
        }
        Ok(resolver)
    }
}

impl std::fmt::Debug for MessagingSystemConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingSystemConfiguration")
            .field("channels", &self.channel_builders.keys().collect::<Vec<_>>())
            .field("handlers", &self.handlers.len())
            .field("gateways", &self.gateways.len())
            .field("consumers", &self.consumers.len())
            .field("required_references", &self.required_references)
            .finish()
    }
}

fn log_resolved(target: &str, resolved: &ResolvedInterceptors) {
    if !resolved.is_empty() {
        debug!(
            target_method = %target,
            before = resolved.before.len(),
            around = resolved.around.len(),
            after = resolved.after.len(),
            "Resolved interceptors"
        );
    }
}

/// Runs `before` stages, the handler, then `after` stages as one endpoint
/// taking over the handler's identity and wiring.
fn wrap_in_chain(
    mut handler: Box<dyn MessageHandlerBuilder>,
    before: &[MethodInterceptor],
    after: &[MethodInterceptor],
) -> ChainMessageHandlerBuilder {
    let settings = std::mem::take(handler.settings_mut());
    handler.settings_mut().around_interceptors = settings.around_interceptors;
    handler.settings_mut().endpoint_annotations = settings.endpoint_annotations.clone();

    let mut chain = ChainMessageHandlerBuilder::create();
    *chain.settings_mut() = EndpointSettings {
        endpoint_id: settings.endpoint_id,
        input_channel_name: settings.input_channel_name,
        output_channel_name: settings.output_channel_name,
        endpoint_annotations: settings.endpoint_annotations,
        ..EndpointSettings::default()
    };
    for interceptor in before {
        chain = chain.chain_shared(interceptor.stage());
    }
    chain = chain.chain_shared(Arc::from(handler));
    for interceptor in after {
        chain = chain.chain_shared(interceptor.stage());
    }
    chain
}
