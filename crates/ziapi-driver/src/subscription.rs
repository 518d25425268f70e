//! Client-side subscription registry
//!
//! The registry is published through `ArcSwap`: the caller thread replaces
//! it on subscribe/unsubscribe, the IO thread reads a snapshot per event.

use arc_swap::ArcSwap;
use std::sync::Arc;
use ziapi_protocol::SubscriptionSet;

/// Ordered subscribe/unsubscribe rules of one session
pub type SubscriptionRegistry = SubscriptionSet;

/// Shared registry handle
pub type SharedRegistry = Arc<ArcSwap<SubscriptionRegistry>>;

/// Apply `f` to a copy of the registry and publish the result.
pub fn update<R>(shared: &SharedRegistry, f: impl FnOnce(&mut SubscriptionRegistry) -> R) -> R {
    let mut next = SubscriptionRegistry::clone(&shared.load());
    let result = f(&mut next);
    shared.store(Arc::new(next));
    result
}
