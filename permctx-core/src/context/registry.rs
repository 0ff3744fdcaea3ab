// Context Calculator Registry
//
// Append-only list of calculators that derive platform contexts for a subject.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{ContextSet, MutableContextSet, SERVER_KEY};
use crate::{Error, Result};

/// Derives the contexts a subject currently satisfies (world, server, ...).
///
/// `S` is the platform's subject type. Implementations receive a fresh
/// accumulator and return it with their pairs added.
pub trait ContextCalculator<S: ?Sized>: Send + Sync {
    fn give_applicable_context(
        &self,
        subject: &S,
        accumulator: MutableContextSet,
    ) -> Result<MutableContextSet>;
}

impl<S, F> ContextCalculator<S> for F
where
    S: ?Sized,
    F: Fn(&S, MutableContextSet) -> Result<MutableContextSet> + Send + Sync,
{
    fn give_applicable_context(
        &self,
        subject: &S,
        accumulator: MutableContextSet,
    ) -> Result<MutableContextSet> {
        self(subject, accumulator)
    }
}

/// Contributes `server=<name>` for every subject.
#[derive(Debug, Clone)]
pub struct ServerCalculator {
    server: String,
}

impl ServerCalculator {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }
}

impl<S: ?Sized> ContextCalculator<S> for ServerCalculator {
    fn give_applicable_context(
        &self,
        _subject: &S,
        mut accumulator: MutableContextSet,
    ) -> Result<MutableContextSet> {
        accumulator.add(SERVER_KEY, &self.server)?;
        Ok(accumulator)
    }
}

/// Registry of context calculators.
///
/// Registration only appends. Calculation snapshots the list and runs every
/// calculator without holding the lock, so many resolution tasks can call it
/// at once.
pub struct ContextCalculatorRegistry<S: ?Sized> {
    calculators: RwLock<Vec<Arc<dyn ContextCalculator<S>>>>,
}

impl<S: ?Sized> ContextCalculatorRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            calculators: RwLock::new(Vec::new()),
        }
    }

    /// Append a calculator. Calculators run in registration order.
    pub fn register(&self, calculator: Arc<dyn ContextCalculator<S>>) {
        let mut calculators = self.calculators.write();
        calculators.push(calculator);
        tracing::debug!(count = calculators.len(), "Context calculator registered");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calculators.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calculators.read().is_empty()
    }

    /// Run every calculator for `subject` and merge their output.
    ///
    /// Each calculator gets its own empty accumulator; a calculator cannot see
    /// or undo what another one contributed.
    pub fn calculate(&self, subject: &S) -> Result<ContextSet> {
        let calculators = self.calculators.read().clone();

        let mut merged = MutableContextSet::new();
        for (index, calculator) in calculators.iter().enumerate() {
            let contributed = calculator
                .give_applicable_context(subject, MutableContextSet::new())
                .map_err(|e| {
                    tracing::warn!(calculator = index, error = %e, "Context calculator failed");
                    match e {
                        Error::ContextCalculation(_) => e,
                        other => Error::ContextCalculation(other.to_string()),
                    }
                })?;
            merged.merge(contributed);
        }

        Ok(merged.freeze())
    }
}

impl<S: ?Sized> Default for ContextCalculatorRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> std::fmt::Debug for ContextCalculatorRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCalculatorRegistry")
            .field("calculators", &self.len())
            .finish()
    }
}
