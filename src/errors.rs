// Copyright 2024 Cornell University
// released under MIT License

use thiserror::Error;

/// Problems with a model, detected before any exploration starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecificationError {
    #[error("duplicate {kind} `{name}`")]
    Duplicate { kind: &'static str, name: String },

    #[error("undeclared {kind} `{name}`")]
    Undeclared { kind: &'static str, name: String },

    #[error("constructor `{name}` can not have rewrite rules")]
    RuleOnConstructor { name: String },

    #[error("destructor `{name}` has no rewrite rules")]
    DestructorWithoutRules { name: String },

    #[error("`{name}` expects {expected} argument(s) but {found} were given in {context}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("sort mismatch in {context}: expected `{expected}`, found `{found}`")]
    SortMismatch {
        expected: String,
        found: String,
        context: String,
    },

    #[error("variable `{name}` is used in {context} but not bound")]
    UnboundVariable { name: String, context: String },

    #[error("`{name}` is a destructor and can not be used as a pattern in {context}")]
    DestructorPattern { name: String, context: String },

    #[error("process `{name}` calls itself (recursion is only available through replication)")]
    RecursiveDefinition { name: String },

    #[error("query `{query}` mentions `{name}` which is neither ground nor bound by a restriction")]
    UnrestrictedQueryVariable { query: String, name: String },

    #[error("query `{query}`: {reason}")]
    MalformedQuery { query: String, reason: String },
}

impl SpecificationError {
    pub fn undeclared(kind: &'static str, name: &str) -> Self {
        SpecificationError::Undeclared {
            kind,
            name: name.to_string(),
        }
    }

    pub fn sort_mismatch(expected: &str, found: &str, context: String) -> Self {
        SpecificationError::SortMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
            context,
        }
    }
}

/// Engine defects. These should never be observed with a well-formed
/// specification and always abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("fresh name `{name}` was generated twice")]
    NameCollision { name: String },

    #[error("action `{action}` does not apply to process `{process}`")]
    ActionMismatch { action: String, process: String },

    #[error("instance index {index} is out of range ({len} live processes)")]
    MissingInstance { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid specification ({} error(s)): {}", .0.len(), summarize(.0))]
    Specification(Vec<SpecificationError>),

    #[error("internal invariant violated: {0}")]
    Internal(#[from] InvariantViolation),
}

fn summarize(errors: &[SpecificationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type EngineResult<T> = Result<T, EngineError>;
