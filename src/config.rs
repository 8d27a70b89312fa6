// Copyright 2024 Cornell University
// released under MIT License

use crate::ir::EventMode;

/// How the scheduler picks among the choices of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Every choice of every state
    Exhaustive,
    /// At most `width` choices per state, drawn with a seeded generator.
    /// Reproducible for a fixed seed; dropping choices is reported as a
    /// width bound.
    Sampled { seed: u64, width: usize },
}

/// Exploration parameters of one run of `evaluate_queries`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Copies spawned when a `!P` is unfolded
    pub replication_bound: u32,
    /// Scheduler choices per trace
    pub max_depth: usize,
    /// Explored states per run (per worker when parallel)
    pub max_states: usize,
    /// Constructor nesting the attacker adds on top of known terms when
    /// synthesising input messages
    pub injection_depth: usize,
    /// Deepest term destructor saturation adds to attacker knowledge
    pub knowledge_depth: usize,
    /// Cancel exploration once every query is violated
    pub stop_at_first_violation: bool,
    /// Number of rayon workers; 1 explores on the calling thread
    pub workers: usize,
    /// Overrides the mode of every event node when set
    pub event_mode: Option<EventMode>,
    pub strategy: Strategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replication_bound: 2,
            max_depth: 64,
            max_states: 200_000,
            injection_depth: 1,
            knowledge_depth: 16,
            stop_at_first_violation: false,
            workers: 1,
            event_mode: None,
            strategy: Strategy::Exhaustive,
        }
    }
}

impl Config {
    pub fn with_replication_bound(mut self, bound: u32) -> Self {
        self.replication_bound = bound;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_states(mut self, states: usize) -> Self {
        self.max_states = states;
        self
    }

    pub fn with_injection_depth(mut self, depth: usize) -> Self {
        self.injection_depth = depth;
        self
    }

    pub fn with_knowledge_depth(mut self, depth: usize) -> Self {
        self.knowledge_depth = depth;
        self
    }

    pub fn with_stop_at_first_violation(mut self, stop: bool) -> Self {
        self.stop_at_first_violation = stop;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_event_mode(mut self, mode: EventMode) -> Self {
        self.event_mode = Some(mode);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.replication_bound, 2);
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.max_states, 200_000);
        assert_eq!(config.workers, 1);
        assert_eq!(config.event_mode, None);
        assert_eq!(config.strategy, Strategy::Exhaustive);
    }

    #[test]
    fn builders_chain() {
        let config = Config::default()
            .with_workers(0)
            .with_knowledge_depth(4)
            .with_event_mode(EventMode::Assume)
            .with_strategy(Strategy::Sampled { seed: 7, width: 2 });
        assert_eq!(config.workers, 1);
        assert_eq!(config.knowledge_depth, 4);
        assert_eq!(config.event_mode, Some(EventMode::Assume));
        assert_eq!(config.strategy, Strategy::Sampled { seed: 7, width: 2 });
    }
}
