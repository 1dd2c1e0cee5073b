//! Named references to live objects.
//!
//! Endpoints never construct their collaborators; they name them and the
//! [`ReferenceSearchService`] resolves the names once, while the messaging
//! system is being built.
//!
//! References are stored type-erased. A service registered as `Arc<T>` (where
//! `T` is usually a trait object) is stored as `Arc<Arc<T>>` behind
//! `dyn Any`, and [`ReferenceSearchServiceExt::get_typed`] downcasts it back.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MessagingError, MessagingResult};

/// A type-erased shared reference.
pub type ReferenceArc = Arc<dyn Any + Send + Sync>;

/// Resolves reference names to live objects.
pub trait ReferenceSearchService: Send + Sync {
    /// Returns the object registered under `name`.
    fn get(&self, name: &str) -> MessagingResult<ReferenceArc>;

    /// Returns `true` if `name` can be resolved.
    fn has(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }
}

/// Typed access on top of [`ReferenceSearchService`].
pub trait ReferenceSearchServiceExt {
    /// Resolves `name` and downcasts it to `Arc<T>`.
    fn get_typed<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> MessagingResult<Arc<T>>;
}

impl<S: ReferenceSearchService + ?Sized> ReferenceSearchServiceExt for S {
    fn get_typed<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> MessagingResult<Arc<T>> {
        let reference = self.get(name)?;
        reference.downcast_ref::<Arc<T>>().cloned().ok_or_else(|| {
            MessagingError::ReferenceNotFound(format!(
                "{name} (registered with a different type than {})",
                std::any::type_name::<T>()
            ))
        })
    }
}

/// A [`ReferenceSearchService`] backed by a map.
#[derive(Default, Clone)]
pub struct InMemoryReferenceSearchService {
    references: HashMap<String, ReferenceArc>,
}

impl InMemoryReferenceSearchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`, replacing any previous registration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let mut references = InMemoryReferenceSearchService::new();
    /// references.register::<dyn ServiceEndpoint>("calculator", Arc::new(Calculator));
    /// ```
    pub fn register<T: ?Sized + Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        service: Arc<T>,
    ) -> &mut Self {
        self.references.insert(name.into(), Arc::new(service));
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with<T: ?Sized + Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        service: Arc<T>,
    ) -> Self {
        self.register(name, service);
        self
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

impl ReferenceSearchService for InMemoryReferenceSearchService {
    fn get(&self, name: &str) -> MessagingResult<ReferenceArc> {
        self.references
            .get(name)
            .cloned()
            .ok_or_else(|| MessagingError::ReferenceNotFound(name.to_string()))
    }

    fn has(&self, name: &str) -> bool {
        self.references.contains_key(name)
    }
}
