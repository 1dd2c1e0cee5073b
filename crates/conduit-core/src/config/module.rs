use std::any::Any;
use std::sync::Arc;

use super::MessagingSystemConfiguration;
use crate::error::MessagingResult;

/// An object a module may pick up while preparing, e.g. a user supplied
/// builder or settings record.
pub type ExtensionObject = Arc<dyn Any + Send + Sync>;

/// A unit of configuration registering channels, endpoints, gateways or
/// interceptors into a [`MessagingSystemConfiguration`].
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn required_reference_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `extension` is meant for this module.
    fn can_handle(&self, _extension: &ExtensionObject) -> bool {
        false
    }

    /// Registers everything the module contributes. `extension_objects`
    /// holds the extensions this module can handle.
    fn prepare(
        &self,
        configuration: &mut MessagingSystemConfiguration,
        extension_objects: &[ExtensionObject],
    ) -> MessagingResult<()>;
}

/// Yields the modules and extension objects a configuration is prepared from.
pub trait ModuleRetrievingService {
    fn find_all_modules(&self) -> Vec<Arc<dyn Module>>;

    fn find_all_extension_objects(&self) -> Vec<ExtensionObject> {
        Vec::new()
    }
}

/// A [`ModuleRetrievingService`] holding explicitly given modules.
#[derive(Default, Clone)]
pub struct InMemoryModuleMessaging {
    modules: Vec<Arc<dyn Module>>,
    extension_objects: Vec<ExtensionObject>,
}

impl InMemoryModuleMessaging {
    pub fn create_empty() -> Self {
        Self::default()
    }

    pub fn create_with(modules: Vec<Arc<dyn Module>>, extension_objects: Vec<ExtensionObject>) -> Self {
        Self {
            modules,
            extension_objects,
        }
    }

    pub fn with_module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    pub fn with_extension_object<T: Any + Send + Sync>(mut self, extension: T) -> Self {
        self.extension_objects.push(Arc::new(extension));
        self
    }
}

impl ModuleRetrievingService for InMemoryModuleMessaging {
    fn find_all_modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules.clone()
    }

    fn find_all_extension_objects(&self) -> Vec<ExtensionObject> {
        self.extension_objects.clone()
    }
}
