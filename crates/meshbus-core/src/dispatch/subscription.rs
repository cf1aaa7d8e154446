//! Subscription definitions and the shared election gate.
//!
//! A [`Subscription`] couples a stored definition, its compiled filter, and
//! the single-slot election gate shared by every dispatcher bound to it.
//! Dispatchers reference the subscription; they never mutate it.

use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::dispatch::filter::{FilterCompileError, FilterDef, SubscriptionFilter};
use crate::types::SubscriptionRef;

/// Per-subscription delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Read-ahead override; falls back to the dispatcher default when unset.
    pub read_ahead: Option<usize>,
    /// Ephemeral subscriptions start at the latest event and keep no durable
    /// offset.
    pub ephemeral: bool,
}

/// A stored subscription definition.
#[derive(Debug, Clone)]
pub struct SubscriptionDef {
    /// Subscription identifier.
    pub id: Uuid,
    /// Namespace the subscription is scoped to.
    pub namespace: String,
    /// Subscription name; with the namespace, the durable offset identity.
    pub name: String,
    /// Match filters.
    pub filter: FilterDef,
    /// Delivery options.
    pub options: SubscriptionOptions,
}

impl SubscriptionDef {
    /// Creates a definition with default filter and options.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            name: name.into(),
            filter: FilterDef::default(),
            options: SubscriptionOptions::default(),
        }
    }
}

/// A live subscription: definition, compiled filter, and the election gate
/// shared by all dispatchers bound to it.
///
/// The gate is a one-permit semaphore — a single-slot hand-off. Exactly one
/// dispatcher holds the permit (and therefore polls) at any instant; the
/// permit returns to the gate when that dispatcher closes, admitting the next
/// contender.
pub struct Subscription {
    /// The stored definition.
    pub def: SubscriptionDef,
    /// Compiled match filter.
    pub filter: SubscriptionFilter,
    pub(crate) election: Arc<Semaphore>,
}

impl Subscription {
    /// Builds a live subscription, compiling its filters.
    ///
    /// # Errors
    ///
    /// Returns [`FilterCompileError`] when a filter regex is invalid.
    pub fn new(def: SubscriptionDef) -> Result<Self, FilterCompileError> {
        let filter = SubscriptionFilter::compile(&def.filter)?;
        Ok(Self {
            def,
            filter,
            election: Arc::new(Semaphore::new(1)),
        })
    }

    /// Returns the reference stamped onto deliveries for this subscription.
    #[must_use]
    pub fn subscription_ref(&self) -> SubscriptionRef {
        SubscriptionRef {
            id: self.def.id,
            namespace: self.def.namespace.clone(),
            name: self.def.name.clone(),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("def", &self.def)
            .field("available_permits", &self.election.available_permits())
            .finish()
    }
}
