//! Advisory purity records for call targets.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::effect::EffectSet;

/// Records, per call target, whether its declared required-effects set is
/// empty. Populated on closure creation; consumers (e.g. a parallelizing
/// caller) query by target name to decide whether concurrent invocation is
/// safe. Purely advisory: the analyzer never parallelizes anything itself.
#[derive(Debug, Default)]
pub struct PurityAnalyzer {
    pure_targets: Mutex<AHashMap<Arc<str>, bool>>,
}

impl PurityAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, target: &Arc<str>, effects: &EffectSet) {
        self.pure_targets.lock().insert(Arc::clone(target), effects.is_empty());
    }

    /// Whether the named target is pure. `None` when no closure for that
    /// target has been created yet.
    #[must_use]
    pub fn is_pure(&self, target: &str) -> Option<bool> {
        self.pure_targets.lock().get(target).copied()
    }
}
