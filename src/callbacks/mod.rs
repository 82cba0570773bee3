//! # Callbacks Module
//!
//! Ordered, identifier-addressable callback chains for the three dispatch phases:
//!
//! - `prepare_dispatch` - re-establishes process-wide invariants (run before every
//!   request in reload mode, once per process otherwise)
//! - `before_dispatch` - runs in registration order before routing
//! - `after_dispatch` - runs in reverse registration order after every dispatch,
//!   including failed ones
//!
//! Registering with an identifier that is already present replaces the existing
//! entry at its original position, so code that is reloaded can re-register its
//! hooks idempotently.
//!
//! Chains are built at bootstrap and read on every dispatch. The dispatcher takes a
//! snapshot of a chain before running it, so a unit may re-register callbacks
//! without deadlocking.

mod chain;

pub use chain::{Callback, CallbackChain, CallbackUnit, Direction, Phase, Registration};

use crate::error::DispatchError;

/// The three phase chains of a dispatcher pool.
pub struct CallbackRegistry<C> {
    prepare: CallbackChain<C>,
    before: CallbackChain<C>,
    after: CallbackChain<C>,
}

impl<C> Default for CallbackRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CallbackRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prepare: CallbackChain::new(Phase::PrepareDispatch),
            before: CallbackChain::new(Phase::BeforeDispatch),
            after: CallbackChain::new(Phase::AfterDispatch),
        }
    }

    #[must_use]
    pub fn chain(&self, phase: Phase) -> &CallbackChain<C> {
        match phase {
            Phase::PrepareDispatch => &self.prepare,
            Phase::BeforeDispatch => &self.before,
            Phase::AfterDispatch => &self.after,
        }
    }

    fn chain_mut(&mut self, phase: Phase) -> &mut CallbackChain<C> {
        match phase {
            Phase::PrepareDispatch => &mut self.prepare,
            Phase::BeforeDispatch => &mut self.before,
            Phase::AfterDispatch => &mut self.after,
        }
    }

    /// Append `unit` to `phase`, or replace the entry with the same identifier in place.
    pub fn register(
        &mut self,
        phase: Phase,
        identifier: Option<&str>,
        unit: CallbackUnit<C>,
    ) -> Registration {
        self.chain_mut(phase)
            .replace_or_append(Callback::new(phase, identifier, unit))
    }

    /// Run `phase` in `direction`. The first failure is returned to the caller.
    pub fn run(&self, phase: Phase, direction: Direction, scope: &C) -> Result<(), DispatchError> {
        self.chain(phase).run(direction, scope)
    }

    /// Copy of one chain, so it can run without holding a lock on the registry.
    #[must_use]
    pub fn snapshot(&self, phase: Phase) -> CallbackChain<C> {
        self.chain(phase).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Mutex<Vec<&'static str>>;

    fn push(tag: &'static str) -> CallbackUnit<Log> {
        Arc::new(move |log: &Log| -> anyhow::Result<()> {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn test_phases_are_independent_chains() {
        let mut registry: CallbackRegistry<Log> = CallbackRegistry::new();
        registry.register(Phase::BeforeDispatch, Some("shared"), push("before"));
        let outcome = registry.register(Phase::AfterDispatch, Some("shared"), push("after"));
        assert_eq!(outcome, Registration::Appended);
        assert_eq!(registry.chain(Phase::BeforeDispatch).len(), 1);
        assert_eq!(registry.chain(Phase::AfterDispatch).len(), 1);
        assert!(registry.chain(Phase::PrepareDispatch).is_empty());
    }

    #[test]
    fn test_default_directions() {
        let mut registry: CallbackRegistry<Log> = CallbackRegistry::new();
        for tag in ["a", "b", "c"] {
            registry.register(Phase::AfterDispatch, None, push(tag));
            registry.register(Phase::PrepareDispatch, None, push(tag));
        }
        let log = Log::default();
        registry
            .run(Phase::PrepareDispatch, Phase::PrepareDispatch.default_direction(), &log)
            .unwrap();
        registry
            .run(Phase::AfterDispatch, Phase::AfterDispatch.default_direction(), &log)
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "c", "b", "a"]);
    }

    #[test]
    fn test_snapshot_is_detached_from_registry() {
        let mut registry: CallbackRegistry<Log> = CallbackRegistry::new();
        registry.register(Phase::BeforeDispatch, None, push("one"));
        let snapshot = registry.snapshot(Phase::BeforeDispatch);
        registry.register(Phase::BeforeDispatch, None, push("two"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.chain(Phase::BeforeDispatch).len(), 2);
    }
}
