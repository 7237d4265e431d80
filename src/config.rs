//! Engine-wide tunables.
//!
//! Everything the core does is otherwise data-driven by the query and schema; these are
//! the few knobs a host legitimately needs to adjust per deployment.

/// Engine-wide tunables for pagination defaults and completion fan-out guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Applied to a list field when the query's `FilterOrderByOffsetLimit` carries no
    /// explicit `limit`. `None` means unbounded (the historical default).
    pub default_page_size: Option<usize>,

    /// Upper bound on `complete_all`'s fixpoint loop. The mapping graph is expected to be
    /// acyclic in the data-flow sense (see design notes), but a misbehaving backend that
    /// keeps returning fresh `Staged` placeholders must not hang a request forever.
    pub max_completion_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_page_size: None,
            max_completion_rounds: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded_pagination_with_bounded_rounds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_page_size, None);
        assert_eq!(cfg.max_completion_rounds, 25);
    }
}
