//! Reading and providing services.

use super::node::{succeed_node, with_fiber_node, Node};
use super::Effect;
use crate::combinator::bracket::scoped_node;
use crate::context::{Context, Layer, ServiceKey, Tag};
use crate::types::{erase, Value};
use std::sync::Arc;

impl<A: Value, E: Value> Effect<A, E> {
    /// Reads the service bound to `T`.
    ///
    /// A missing binding is a defect naming the tag.
    pub fn service<T: Tag<Service = A>>() -> Self {
        Self::from_node(Arc::new(Node::Access(ServiceKey::of::<T>())))
    }

    /// Reads the service bound to `T` and maps it.
    pub fn service_with<T: Tag>(f: impl Fn(T::Service) -> A + Send + Sync + 'static) -> Self {
        Effect::<T::Service, E>::service::<T>().map(f)
    }

    /// Reads the service bound to `T` and continues with an effect built from
    /// it.
    pub fn service_with_effect<T: Tag>(
        f: impl Fn(T::Service) -> Self + Send + Sync + 'static,
    ) -> Self {
        Effect::<T::Service, E>::service::<T>().flat_map(f)
    }

    /// Runs this effect with the services in `context` added to the current
    /// environment. Bindings in `context` shadow outer ones.
    pub fn provide(self, context: Context) -> Self {
        Self::from_node(Arc::new(Node::Provide(self.node, context)))
    }

    /// Runs this effect with `service` bound to `T`.
    pub fn provide_service<T: Tag>(self, service: T::Service) -> Self {
        self.provide(Context::make::<T>(service))
    }

    /// Builds `layer`, runs this effect with its services, then releases the
    /// layer's resources in reverse order of acquisition.
    pub fn provide_layer(self, layer: Layer<E>) -> Self {
        let body = self.into_node();
        let built = layer.build().into_node();
        Self::from_node(scoped_node(super::node::flat_map_node(built, move |context| {
            let context: Context = crate::types::unerase(context);
            Arc::new(Node::Provide(Arc::clone(&body), context))
        })))
    }
}

impl<S: Value, E: Value> Effect<Option<S>, E> {
    /// Reads the service bound to `T`, or `None` if it is not bound.
    pub fn service_option<T: Tag<Service = S>>() -> Self {
        Self::from_node(with_fiber_node(|view| {
            succeed_node(erase(view.env.get::<T>()))
        }))
    }
}
