use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DispatchError;

/// Lifecycle phase a callback is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PrepareDispatch,
    BeforeDispatch,
    AfterDispatch,
}

impl Phase {
    /// Teardown mirrors setup: after-dispatch runs LIFO, everything else in registration order.
    #[must_use]
    pub fn default_direction(self) -> Direction {
        match self {
            Phase::AfterDispatch => Direction::Reverse,
            Phase::PrepareDispatch | Phase::BeforeDispatch => Direction::Forward,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PrepareDispatch => "prepare_dispatch",
            Phase::BeforeDispatch => "before_dispatch",
            Phase::AfterDispatch => "after_dispatch",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// What `replace_or_append` did with a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Appended,
    Replaced,
}

/// Executable unit of a callback. `C` is the scope handed to every unit.
pub type CallbackUnit<C> = Arc<dyn Fn(&C) -> anyhow::Result<()> + Send + Sync>;

/// A unit attached to a phase, optionally addressable by identifier.
pub struct Callback<C> {
    phase: Phase,
    identifier: Option<String>,
    unit: CallbackUnit<C>,
}

impl<C> Clone for Callback<C> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            identifier: self.identifier.clone(),
            unit: Arc::clone(&self.unit),
        }
    }
}

impl<C> fmt::Debug for Callback<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("phase", &self.phase)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl<C> Callback<C> {
    /// Empty identifiers are treated as absent.
    pub fn new(phase: Phase, identifier: Option<&str>, unit: CallbackUnit<C>) -> Self {
        Self {
            phase,
            identifier: identifier.filter(|id| !id.is_empty()).map(str::to_string),
            unit,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn call(&self, scope: &C) -> anyhow::Result<()> {
        (self.unit)(scope)
    }

    fn label(&self, position: usize) -> String {
        match &self.identifier {
            Some(id) => id.clone(),
            None => format!("#{position}"),
        }
    }
}

/// Ordered callbacks for one phase.
///
/// Entries keep registration order. Identified entries are also indexed by
/// identifier so that re-registering replaces the entry in place.
pub struct CallbackChain<C> {
    phase: Phase,
    entries: Vec<Callback<C>>,
    index: HashMap<String, usize>,
}

impl<C> Clone for CallbackChain<C> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            entries: self.entries.clone(),
            index: self.index.clone(),
        }
    }
}

impl<C> fmt::Debug for CallbackChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackChain")
            .field("phase", &self.phase)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<C> CallbackChain<C> {
    #[must_use]
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifiers in execution-independent registration order (`None` for anonymous entries).
    #[must_use]
    pub fn identifiers(&self) -> Vec<Option<&str>> {
        self.entries.iter().map(Callback::identifier).collect()
    }

    /// Replace the entry sharing `callback`'s identifier at its current position, or append.
    pub fn replace_or_append(&mut self, callback: Callback<C>) -> Registration {
        if let Some(id) = callback.identifier() {
            if let Some(&position) = self.index.get(id) {
                debug!(phase = %self.phase, identifier = %id, position, "Callback replaced");
                self.entries[position] = callback;
                return Registration::Replaced;
            }
            self.index.insert(id.to_string(), self.entries.len());
        }
        self.entries.push(callback);
        Registration::Appended
    }

    fn ordered(&self, direction: Direction) -> Box<dyn Iterator<Item = (usize, &Callback<C>)> + '_> {
        match direction {
            Direction::Forward => Box::new(self.entries.iter().enumerate()),
            Direction::Reverse => Box::new(self.entries.iter().enumerate().rev()),
        }
    }

    /// Run every unit in `direction`, stopping at the first failure.
    ///
    /// Failures are returned, never swallowed; panics are not caught here.
    pub fn run(&self, direction: Direction, scope: &C) -> Result<(), DispatchError> {
        for (position, callback) in self.ordered(direction) {
            callback
                .call(scope)
                .map_err(|error| DispatchError::Callback {
                    phase: self.phase,
                    identifier: callback.label(position),
                    error,
                })?;
        }
        Ok(())
    }

    /// Run every unit in `direction`, continuing past failures and panics.
    ///
    /// Used for teardown, where one broken unit must not skip the others.
    pub fn run_all(&self, direction: Direction, scope: &C) -> Vec<DispatchError> {
        let mut failures = Vec::new();
        for (position, callback) in self.ordered(direction) {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback.call(scope)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => DispatchError::Callback {
                    phase: self.phase,
                    identifier: callback.label(position),
                    error,
                },
                Err(payload) => DispatchError::from_panic("callback", payload),
            };
            warn!(
                phase = %self.phase,
                identifier = %callback.label(position),
                error = %failure,
                "Callback failed"
            );
            failures.push(failure);
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Log = Mutex<Vec<String>>;

    fn recorder(tag: &'static str) -> CallbackUnit<Log> {
        Arc::new(move |log: &Log| -> anyhow::Result<()> {
            log.lock().unwrap().push(tag.to_string());
            Ok(())
        })
    }

    fn chain_of(ids: &[(Option<&str>, &'static str)]) -> CallbackChain<Log> {
        let mut chain = CallbackChain::new(Phase::BeforeDispatch);
        for (id, tag) in ids {
            chain.replace_or_append(Callback::new(Phase::BeforeDispatch, *id, recorder(tag)));
        }
        chain
    }

    #[test]
    fn test_replace_keeps_position_and_length() {
        let mut chain = chain_of(&[(Some("a"), "a1"), (None, "anon"), (Some("b"), "b1")]);
        let outcome =
            chain.replace_or_append(Callback::new(Phase::BeforeDispatch, Some("a"), recorder("a2")));
        assert_eq!(outcome, Registration::Replaced);
        assert_eq!(chain.len(), 3);

        let log = Log::default();
        chain.run(Direction::Forward, &log).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a2", "anon", "b1"]);
    }

    #[test]
    fn test_anonymous_and_empty_identifiers_always_append() {
        let mut chain = chain_of(&[(None, "x")]);
        chain.replace_or_append(Callback::new(Phase::BeforeDispatch, None, recorder("y")));
        chain.replace_or_append(Callback::new(Phase::BeforeDispatch, Some(""), recorder("z")));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.identifiers(), vec![None, None, None]);
    }

    #[test]
    fn test_reverse_run_is_lifo() {
        let chain = chain_of(&[(None, "1"), (None, "2"), (None, "3")]);
        let log = Log::default();
        chain.run(Direction::Reverse, &log).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["3", "2", "1"]);
    }

    #[test]
    fn test_run_stops_at_first_failure() {
        let mut chain = chain_of(&[(None, "first")]);
        chain.replace_or_append(Callback::new(
            Phase::BeforeDispatch,
            Some("explode"),
            Arc::new(|_: &Log| -> anyhow::Result<()> { anyhow::bail!("nope") }),
        ));
        chain.replace_or_append(Callback::new(Phase::BeforeDispatch, None, recorder("never")));

        let log = Log::default();
        let err = chain.run(Direction::Forward, &log).unwrap_err();
        assert_eq!(
            err.to_string(),
            "before_dispatch callback `explode` failed: nope"
        );
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_run_all_continues_past_failures() {
        let mut chain = CallbackChain::new(Phase::AfterDispatch);
        chain.replace_or_append(Callback::new(Phase::AfterDispatch, None, recorder("a")));
        chain.replace_or_append(Callback::new(
            Phase::AfterDispatch,
            None,
            Arc::new(|_: &Log| -> anyhow::Result<()> { anyhow::bail!("broken") }),
        ));
        chain.replace_or_append(Callback::new(Phase::AfterDispatch, None, recorder("c")));

        let log = Log::default();
        let failures = chain.run_all(Direction::Reverse, &log);
        assert_eq!(failures.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["c", "a"]);
    }

    #[test]
    fn test_empty_chain_runs_cleanly() {
        let chain: CallbackChain<Log> = CallbackChain::new(Phase::AfterDispatch);
        let log = Log::default();
        assert!(chain.run(Direction::Reverse, &log).is_ok());
        assert!(chain.run_all(Direction::Reverse, &log).is_empty());
    }
}
