// Copyright 2024 Cornell University
// released under MIT License

use std::time::Instant;

use log::{debug, info};

use crate::config::Config;
use crate::errors::{EngineError, EngineResult};
use crate::ir::*;
use crate::query::Verdict;
use crate::scheduler::{Scheduler, Stats};
use crate::serialize::serialize_verdict;
use crate::typecheck::{describe_queries, type_check};

/// A validated specification, ready to be explored
#[derive(Debug, Clone)]
pub struct Engine {
    spec: Specification,
}

impl Engine {
    pub fn spec(&self) -> &Specification {
        &self.spec
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVerdict {
    pub query: QueryId,
    pub name: String,
    pub verdict: Verdict,
}

/// Outcome of one call to `evaluate_queries`
#[derive(Debug, Clone)]
pub struct Report {
    /// One entry per query, in declaration order
    pub verdicts: Vec<QueryVerdict>,
    pub stats: Stats,
}

impl Report {
    pub fn verdict(&self, name: &str) -> Option<&Verdict> {
        self.verdicts
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.verdict)
    }

    pub fn all_hold(&self) -> bool {
        self.verdicts.iter().all(|v| v.verdict.holds())
    }

    /// Text rendering, one query per paragraph
    pub fn render(&self, spec: &Specification) -> String {
        self.verdicts
            .iter()
            .map(|v| format!("{}: {}", v.name, serialize_verdict(spec, &v.verdict)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Validates a specification. Every problem is reported at once.
pub fn load_specification(spec: Specification) -> EngineResult<Engine> {
    let errors = type_check(&spec);
    if !errors.is_empty() {
        return Err(EngineError::Specification(errors));
    }
    info!(
        "loaded specification: {} process definition(s), {} query(ies)",
        spec.defs().count(),
        spec.queries().count()
    );
    for query in describe_queries(&spec) {
        debug!("query {query}");
    }
    Ok(Engine { spec })
}

/// Explores the specification within the bounds of `config` and returns a
/// verdict per query
pub fn evaluate_queries(engine: &Engine, config: &Config) -> EngineResult<Report> {
    let spec = &engine.spec;
    info!(
        "exploring with replication bound {}, depth {}, {} worker(s)",
        config.replication_bound, config.max_depth, config.workers
    );
    let start = Instant::now();
    let scheduler = Scheduler::new(spec, config);
    let exploration = scheduler.explore()?;
    let stats = exploration.stats;
    info!(
        "explored {} state(s) and {} trace(s) in {:?} (max depth {}, {} deduplicated)",
        stats.states,
        stats.traces,
        start.elapsed(),
        stats.max_depth_reached,
        stats.deduplicated
    );

    let verdicts: Vec<QueryVerdict> = exploration
        .evaluator
        .finish()
        .into_iter()
        .map(|(query, verdict)| QueryVerdict {
            query,
            name: spec[query].name().to_string(),
            verdict,
        })
        .collect();
    for v in &verdicts {
        info!("{}: {}", v.name, serialize_verdict(spec, &v.verdict));
    }
    Ok(Report { verdicts, stats })
}
