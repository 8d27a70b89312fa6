// Copyright 2024 Cornell University
// released under MIT License

use std::io::{self, Write};

use crate::ir::*;
use crate::query::{Bound, Verdict};
use crate::term::{Name, Term};
use crate::trace::{Culprit, Step, Witness};

pub fn serialize_to_string(spec: &Specification) -> io::Result<String> {
    let mut out = Vec::new();
    serialize(&mut out, spec)?;
    String::from_utf8(out).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

pub fn serialize_name(spec: &Specification, name: &Name) -> String {
    match name {
        Name::Free(id) => spec[*id].name().to_string(),
        Name::Fresh(var, n) => format!("{}#{}", spec[*var].name(), n),
        Name::Attacker(sort) => format!("@{}", spec[*sort].name()),
    }
}

pub fn serialize_term(spec: &Specification, term: &Term) -> String {
    match term {
        Term::Name(name) => serialize_name(spec, name),
        Term::App(fun, args) => format!(
            "{}({})",
            spec[*fun].name(),
            join(args.iter().map(|a| serialize_term(spec, a)))
        ),
    }
}

pub fn serialize_expr(spec: &Specification, expr: ExprId) -> String {
    match &spec[expr] {
        Expr::Var(v) => spec[*v].name().to_string(),
        Expr::Free(id) => spec[*id].name().to_string(),
        Expr::App(fun, args) => format!(
            "{}({})",
            spec[*fun].name(),
            join(args.iter().map(|a| serialize_expr(spec, *a)))
        ),
    }
}

pub fn serialize_pattern(spec: &Specification, pattern: &Pattern) -> String {
    match pattern {
        Pattern::Bind(v) => format!("{}: {}", spec[*v].name(), spec[spec[*v].sort()].name()),
        Pattern::Equals(expr) => format!("={}", serialize_expr(spec, *expr)),
        Pattern::Data(fun, subs) => format!(
            "{}({})",
            spec[*fun].name(),
            join(subs.iter().map(|p| serialize_pattern(spec, p)))
        ),
    }
}

pub fn serialize_cond(spec: &Specification, cond: &Cond) -> String {
    match cond {
        Cond::Eq(a, b) => format!("{} = {}", serialize_expr(spec, *a), serialize_expr(spec, *b)),
        Cond::Neq(a, b) => format!("{} <> {}", serialize_expr(spec, *a), serialize_expr(spec, *b)),
        Cond::And(a, b) => format!(
            "({}) && ({})",
            serialize_cond(spec, a),
            serialize_cond(spec, b)
        ),
        Cond::Or(a, b) => format!(
            "({}) || ({})",
            serialize_cond(spec, a),
            serialize_cond(spec, b)
        ),
        Cond::Not(a) => format!("not({})", serialize_cond(spec, a)),
    }
}

fn serialize_event_stmt(spec: &Specification, stmt: &EventStmt) -> String {
    let call = format!(
        "event {}({})",
        spec[stmt.event].name(),
        join(stmt.args.iter().map(|a| serialize_expr(spec, *a)))
    );
    match (&stmt.guard, stmt.mode) {
        (None, _) => call,
        (Some(guard), EventMode::Assume) => {
            format!("{call} [assume {}]", serialize_cond(spec, guard))
        }
        (Some(guard), EventMode::Verify) => {
            format!("{call} [verify {}]", serialize_cond(spec, guard))
        }
    }
}

/// One-line summary of the node a process is about to execute
pub fn serialize_process_head(spec: &Specification, proc: ProcId) -> String {
    match &spec[proc] {
        Process::Stop => "0".to_string(),
        Process::Parallel(_, _) => "P | Q".to_string(),
        Process::Replicate(_) => "!P".to_string(),
        Process::Restrict(v, _) => {
            format!("new {}: {}", spec[*v].name(), spec[spec[*v].sort()].name())
        }
        Process::Output(c, m, _) => format!(
            "out({}, {})",
            serialize_expr(spec, *c),
            serialize_expr(spec, *m)
        ),
        Process::Input(c, p, _) => format!(
            "in({}, {})",
            serialize_expr(spec, *c),
            serialize_pattern(spec, p)
        ),
        Process::Let(p, t, _, _) => format!(
            "let {} = {} in",
            serialize_pattern(spec, p),
            serialize_expr(spec, *t)
        ),
        Process::If(cond, _, _) => format!("if {} then", serialize_cond(spec, cond)),
        Process::Event(stmt, _) => serialize_event_stmt(spec, stmt),
        Process::Call(def, args) => format!(
            "{}({})",
            spec[*def].name(),
            join(args.iter().map(|a| serialize_expr(spec, *a)))
        ),
    }
}

fn build_process(
    out: &mut impl Write,
    spec: &Specification,
    proc: ProcId,
    index: usize,
) -> io::Result<()> {
    let indent = "  ".repeat(index);
    let is_stop = |p: ProcId| spec[p] == Process::Stop;
    match &spec[proc] {
        Process::Stop | Process::Call(_, _) => {
            writeln!(out, "{indent}{}", serialize_process_head(spec, proc))?
        }
        Process::Parallel(p, q) => {
            writeln!(out, "{indent}(")?;
            build_process(out, spec, *p, index + 1)?;
            writeln!(out, "{indent}) | (")?;
            build_process(out, spec, *q, index + 1)?;
            writeln!(out, "{indent})")?;
        }
        Process::Replicate(p) => {
            writeln!(out, "{indent}!(")?;
            build_process(out, spec, *p, index + 1)?;
            writeln!(out, "{indent})")?;
        }
        Process::Restrict(_, cont)
        | Process::Output(_, _, cont)
        | Process::Input(_, _, cont)
        | Process::Event(_, cont) => {
            let head = serialize_process_head(spec, proc);
            if is_stop(*cont) {
                writeln!(out, "{indent}{head}")?;
            } else {
                writeln!(out, "{indent}{head};")?;
                build_process(out, spec, *cont, index)?;
            }
        }
        Process::Let(_, _, then, otherwise) | Process::If(_, then, otherwise) => {
            writeln!(out, "{indent}{}", serialize_process_head(spec, proc))?;
            build_process(out, spec, *then, index + 1)?;
            if !is_stop(*otherwise) {
                writeln!(out, "{indent}else")?;
                build_process(out, spec, *otherwise, index + 1)?;
            }
        }
    }
    Ok(())
}

fn serialize_event_pattern(spec: &Specification, pattern: &EventPattern, injective: bool) -> String {
    format!(
        "{}({}({}))",
        if injective { "inj-event" } else { "event" },
        spec[pattern.event].name(),
        join(pattern.args.iter().map(|a| serialize_expr(spec, *a)))
    )
}

pub fn serialize_query(spec: &Specification, query: &Query) -> String {
    match query {
        Query::Secrecy(secret) => format!("not attacker({})", serialize_expr(spec, *secret)),
        Query::Correspondence {
            hypothesis,
            required,
            injective,
        } => {
            let lhs = match hypothesis {
                Hypothesis::Event(p) => serialize_event_pattern(spec, p, *injective),
                Hypothesis::Attacker(t) => format!("attacker({})", serialize_expr(spec, *t)),
            };
            let rhs = required
                .iter()
                .map(|p| serialize_event_pattern(spec, p, *injective))
                .collect::<Vec<_>>()
                .join(" || ");
            format!("{lhs} ==> {rhs}")
        }
    }
}

/// Prints process definitions, the main process and the queries
pub fn serialize(out: &mut impl Write, spec: &Specification) -> io::Result<()> {
    for (_, def) in spec.defs() {
        let params = join(
            def.params()
                .iter()
                .map(|v| format!("{}: {}", spec[*v].name(), spec[spec[*v].sort()].name())),
        );
        writeln!(out, "let {}({}) =", def.name(), params)?;
        build_process(out, spec, def.body(), 1)?;
        writeln!(out)?;
    }
    writeln!(out, "process")?;
    build_process(out, spec, spec.main, 1)?;
    for (_, decl) in spec.queries() {
        writeln!(out, "query {}: {}", decl.name(), serialize_query(spec, decl.query()))?;
    }
    Ok(())
}

pub fn serialize_step(spec: &Specification, step: &Step) -> String {
    match step {
        Step::Output { channel, message } => format!(
            "out({}, {})",
            serialize_term(spec, channel),
            serialize_term(spec, message)
        ),
        Step::Input { channel, message } => format!(
            "in({}, {})",
            serialize_term(spec, channel),
            serialize_term(spec, message)
        ),
        Step::Comm { channel, message } => format!(
            "comm({}, {})",
            serialize_term(spec, channel),
            serialize_term(spec, message)
        ),
        Step::Event { event, args } => format!(
            "event {}({})",
            spec[*event].name(),
            join(args.iter().map(|a| serialize_term(spec, a)))
        ),
    }
}

pub fn serialize_witness(spec: &Specification, witness: &Witness) -> String {
    let mut lines: Vec<String> = witness
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{i}: {}", serialize_step(spec, step)))
        .collect();
    lines.push(match &witness.culprit {
        Culprit::Leaked(term) => format!("attacker knows {}", serialize_term(spec, term)),
        Culprit::Unmatched(occ) => format!(
            "event {}({}) at step {} has no matching earlier event",
            spec[occ.event].name(),
            join(occ.args.iter().map(|a| serialize_term(spec, a))),
            occ.position
        ),
        Culprit::Derived { term, position } => format!(
            "attacker knows {} after {} step(s) with no matching earlier event",
            serialize_term(spec, term),
            position
        ),
    });
    lines.join("\n")
}

fn serialize_bound(bound: Bound) -> &'static str {
    match bound {
        Bound::Steps => "step",
        Bound::States => "state",
        Bound::Width => "width",
        Bound::Injection => "injection",
        Bound::Replication => "replication",
        Bound::TermDepth => "term depth",
    }
}

pub fn serialize_verdict(spec: &Specification, verdict: &Verdict) -> String {
    match verdict {
        Verdict::Holds => "holds".to_string(),
        Verdict::Violated(witness) => {
            format!("violated\n{}", serialize_witness(spec, witness))
        }
        Verdict::InconclusiveAtBound(bound) => {
            format!("inconclusive ({} bound reached)", serialize_bound(*bound))
        }
    }
}
