//! Typed dependency injection.
//!
//! A [`Tag`] is a zero-sized marker type that names a service; its associated
//! [`Tag::Service`] is the type of the implementation. A [`Context`] maps tags
//! to implementations and is threaded through the interpreter: effects read it
//! with [`Effect::service`](crate::Effect::service) and extend it for a region
//! with [`Effect::provide_service`](crate::Effect::provide_service).
//!
//! ```ignore
//! struct Random;
//! impl Tag for Random {
//!     type Service = Arc<dyn Fn() -> f64 + Send + Sync>;
//! }
//!
//! let program = Effect::<_, Never>::service::<Random>().map(|next| next());
//! let fixed = program.provide_service::<Random>(Arc::new(|| 0.5));
//! ```
//!
//! A context is immutable once built. Adding or removing an entry produces a
//! new context and shares unchanged entries with the old one.

pub mod layer;
pub mod scope;

pub use layer::Layer;
pub use scope::Scope;

use crate::types::{erase, AnyValue, Value};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Names a service that effects can depend on.
///
/// Tag identity is the implementing type, so two tags with the same service
/// type are still distinct.
pub trait Tag: 'static {
    /// The implementation stored under this tag.
    type Service: Value;

    /// Human-readable name used in diagnostics.
    fn name() -> &'static str {
        type_name::<Self>()
    }
}

/// Erased identity of a [`Tag`].
#[derive(Clone, Copy)]
pub(crate) struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub(crate) fn of<T: Tag>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::name(),
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// An immutable map from tags to service implementations.
#[derive(Clone, Default)]
pub struct Context {
    services: Arc<HashMap<ServiceKey, AnyValue>>,
}

impl Context {
    /// The context with no services.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A context holding a single service.
    #[must_use]
    pub fn make<T: Tag>(service: T::Service) -> Self {
        Self::empty().add::<T>(service)
    }

    /// Adds `service` under `T`, replacing any previous binding.
    #[must_use]
    pub fn add<T: Tag>(mut self, service: T::Service) -> Self {
        Arc::make_mut(&mut self.services).insert(ServiceKey::of::<T>(), erase(service));
        self
    }

    /// Returns a clone of the service bound to `T`.
    #[must_use]
    pub fn get<T: Tag>(&self) -> Option<T::Service> {
        self.services
            .get(&ServiceKey::of::<T>())
            .and_then(|value| value.downcast_ref::<T::Service>())
            .cloned()
    }

    /// Returns true if `T` is bound.
    #[must_use]
    pub fn contains<T: Tag>(&self) -> bool {
        self.services.contains_key(&ServiceKey::of::<T>())
    }

    /// Removes the binding for `T`, if any.
    #[must_use]
    pub fn remove<T: Tag>(mut self) -> Self {
        if self.contains::<T>() {
            Arc::make_mut(&mut self.services).remove(&ServiceKey::of::<T>());
        }
        self
    }

    /// Combines two contexts. Bindings in `other` win.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other.clone();
        }
        let services = Arc::make_mut(&mut self.services);
        for (key, value) in other.services.iter() {
            services.insert(*key, Arc::clone(value));
        }
        self
    }

    /// Number of bound services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no service is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of the bound tags, sorted.
    #[must_use]
    pub fn tag_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.keys().map(ServiceKey::name).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn get_raw(&self, key: &ServiceKey) -> Option<AnyValue> {
        self.services.get(key).map(Arc::clone)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tag_names()).finish()
    }
}
