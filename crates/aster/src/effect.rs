//! Effect-based permission system gating side-effecting operations.
//!
//! Every function declares the effects its body needs (`IO`, `Async`, `CPU`,
//! `Net`, or any custom name). The runtime context holds an immutable set of
//! currently-permitted effect names: it is seeded with the entry function's
//! declared effects, replaced with the callee's declared effects for the
//! duration of each closure call, and inherited by worker threads from the
//! permission set captured at the `start` site.
//!
//! Checks happen *before* the gated operation runs: `start`, `await`, and
//! `wait` require `Async`, and each builtin may declare required effects.
//!
//! # Usage
//!
//! ```
//! use aster::effect::{Effect, EffectSet};
//!
//! let permitted = EffectSet::new(vec![Effect::Io, Effect::Async]);
//!
//! assert!(permitted.check(&Effect::Async).is_ok());
//! assert!(permitted.check(&Effect::Net).is_err());
//! ```

use std::fmt;

use ahash::AHashSet;

use crate::error::{RunError, RunResult};

/// A single named effect.
///
/// The four reserved names get dedicated variants; any other name is carried
/// verbatim as [`Effect::Custom`] and treated uniformly by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Input/output: writing through the print writer, host I/O builtins.
    Io,
    /// Asynchrony: `start`, `await`, `wait`, and workflow step execution.
    Async,
    /// CPU-intensive work, declared by builtins that want scheduling hints.
    Cpu,
    /// Network access, declared by host builtins.
    Net,
    /// Custom effect identified by its name.
    Custom(String),
}

impl Effect {
    /// Parses an effect name, mapping the reserved names to their variants.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "IO" => Self::Io,
            "Async" => Self::Async,
            "CPU" => Self::Cpu,
            "Net" => Self::Net,
            other => Self::Custom(other.to_owned()),
        }
    }

    /// The effect's declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Io => "IO",
            Self::Async => "Async",
            Self::Cpu => "CPU",
            Self::Net => "Net",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable set of permitted effects.
///
/// The set cannot be escalated during execution: calling a closure *replaces*
/// the active set with the callee's declared effects rather than adding to
/// it, and the caller's set is restored on return. An empty set
/// (`EffectSet::none()`) permits pure computation only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectSet {
    effects: AHashSet<Effect>,
}

impl EffectSet {
    /// Creates a permission set with the given effects.
    #[must_use]
    pub fn new(effects: Vec<Effect>) -> Self {
        Self {
            effects: effects.into_iter().collect(),
        }
    }

    /// Creates the empty set: pure computation, no gated operations.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds a set from declared effect names.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            effects: names.into_iter().map(Effect::parse).collect(),
        }
    }

    /// Returns a copy of this set with `effect` added.
    ///
    /// Used by the loader when silently appending `Async` to functions whose
    /// bodies transitively contain a `workflow` node.
    #[must_use]
    pub fn with(mut self, effect: Effect) -> Self {
        self.effects.insert(effect);
        self
    }

    /// Returns `true` if `effect` is permitted.
    #[must_use]
    pub fn contains(&self, effect: &Effect) -> bool {
        self.effects.contains(effect)
    }

    /// Checks that `effect` is permitted, producing the `EffectViolation`
    /// error otherwise.
    pub fn check(&self, effect: &Effect) -> RunResult<()> {
        if self.effects.contains(effect) {
            Ok(())
        } else {
            Err(RunError::effect_violation(effect.name()))
        }
    }

    /// Returns `true` if no effects are declared (the pure profile).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Iterates over the contained effects in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter()
    }
}

impl fmt::Display for EffectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.effects.is_empty() {
            return f.write_str("EffectSet(none)");
        }
        // Sort for a stable rendering; the set itself is unordered.
        let mut names: Vec<&str> = self.effects.iter().map(Effect::name).collect();
        names.sort_unstable();
        write!(f, "EffectSet({})", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_round_trip() {
        for name in ["IO", "Async", "CPU", "Net", "Gpu"] {
            assert_eq!(Effect::parse(name).name(), name);
        }
    }

    #[test]
    fn check_reports_missing_effect() {
        let set = EffectSet::from_names(["IO"]);
        let err = set.check(&Effect::Async).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EffectViolation);
        assert!(err.message().contains("Async"));
    }

    #[test]
    fn custom_effects_are_uniform() {
        let set = EffectSet::from_names(["Gpu"]);
        assert!(set.check(&Effect::Custom("Gpu".to_owned())).is_ok());
        assert!(set.check(&Effect::Io).is_err());
    }
}
