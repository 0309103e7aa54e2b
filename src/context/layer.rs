//! Layers: recipes that build a [`Context`] of services.
//!
//! A layer is an effect producing a context. Building one may acquire scoped
//! resources, which live until the scope that built the layer closes.
//! [`Effect::provide_layer`](crate::Effect::provide_layer) opens that scope
//! around the effect being provided.
//!
//! Layers are rebuilt every time they are provided; nothing is memoized.

use super::{Context, Scope, Tag};
use crate::effect::Effect;
use crate::tracing_compat::debug;
use crate::types::{Never, Value};
use std::fmt;

/// A recipe for a [`Context`] that may fail with `E`.
pub struct Layer<E = Never> {
    effect: Effect<Context, E>,
}

impl<E: Value> Layer<E> {
    fn from_effect(effect: Effect<Context, E>) -> Self {
        Self { effect }
    }

    /// A layer that binds `service` to `T`.
    pub fn succeed<T: Tag>(service: T::Service) -> Self {
        Self::from_effect(Effect::succeed(Context::make::<T>(service)))
    }

    /// A layer whose service is computed by `effect`.
    ///
    /// Resources acquired while computing the service are released as soon as
    /// it has been built. Use [`Layer::scoped`] to keep them alive.
    pub fn effect<T: Tag>(effect: Effect<T::Service, E>) -> Self {
        Self::from_effect(effect.scoped().map(Context::make::<T>))
    }

    /// A layer whose service is computed by `effect` in the building scope.
    ///
    /// Releases registered by `effect` run when that scope closes.
    pub fn scoped<T: Tag>(effect: Effect<T::Service, E>) -> Self {
        Self::from_effect(effect.map(Context::make::<T>))
    }

    /// A layer that provides an existing context.
    pub fn context(context: Context) -> Self {
        Self::from_effect(Effect::succeed(context))
    }

    /// A layer that always fails with `error`.
    pub fn fail(error: E) -> Self {
        Self::from_effect(Effect::fail(error))
    }

    /// Builds both layers, left first, and combines their services.
    ///
    /// On a tag present in both, `other` wins.
    pub fn merge(self, other: Self) -> Self {
        Self::from_effect(
            self.effect
                .zip(other.effect)
                .map(|(left, right)| left.merge(&right)),
        )
    }

    /// Builds `dependency` first and makes its services available while this
    /// layer is built. Only this layer's services are output.
    pub fn provide(self, dependency: Self) -> Self {
        let main = self.effect;
        Self::from_effect(
            dependency
                .effect
                .flat_map(move |deps| main.clone().provide(deps)),
        )
    }

    /// Like [`provide`](Self::provide), but outputs the services of both
    /// layers.
    pub fn provide_merge(self, dependency: Self) -> Self {
        let main = self.effect;
        Self::from_effect(dependency.effect.flat_map(move |deps| {
            let base = deps.clone();
            main.clone().provide(deps).map(move |built| base.clone().merge(&built))
        }))
    }

    /// Recovers from a build failure with a layer computed from the error.
    pub fn catch_all<E2: Value>(self, f: impl Fn(E) -> Layer<E2> + Send + Sync + 'static) -> Layer<E2> {
        Layer::from_effect(self.effect.catch_all(move |error| f(error).effect))
    }

    /// Uses `that` if this layer fails to build.
    pub fn or_else<E2: Value>(self, that: Layer<E2>) -> Layer<E2> {
        let fallback = that.effect;
        Layer::from_effect(self.effect.catch_all(move |_| {
            debug!("layer failed to build, using fallback");
            fallback.clone()
        }))
    }

    /// Transforms the build error.
    pub fn map_error<E2: Value>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Layer<E2> {
        Layer::from_effect(self.effect.map_error(f))
    }

    /// Runs `f` with the built context, keeping it.
    pub fn tap<X: Value>(
        self,
        f: impl Fn(&Context) -> Effect<X, E> + Send + Sync + 'static,
    ) -> Self {
        Self::from_effect(self.effect.tap(f))
    }

    /// The effect that builds this layer.
    ///
    /// It must run inside a scope (see [`Effect::scoped`]); without one it
    /// dies with a missing `Scope` service.
    pub fn build(self) -> Effect<Context, E> {
        let effect = self.effect;
        Effect::<Scope, E>::service::<Scope>().zip_right(effect)
    }

    /// Builds the layer and keeps its services alive until interrupted.
    pub fn launch(self) -> Effect<Never, E> {
        self.build()
            .zip_right(Effect::<Never, E>::never())
            .scoped()
    }
}

impl<E> Clone for Layer<E> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
        }
    }
}

impl<E> fmt::Debug for Layer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer").finish_non_exhaustive()
    }
}
