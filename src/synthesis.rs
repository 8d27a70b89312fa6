// Copyright 2024 Cornell University
// released under MIT License

//! Goal-directed synthesis of attacker messages.
//!
//! Before an attacker input is scheduled, the receiving process is run
//! forward with the message left open. A `let` that can succeed or a test
//! that can pass adds equations on the open message, solved by syntactic
//! unification; the solved shape of the message at that point is a goal.
//! Goals are grounded with what the attacker knows, so a message that must
//! be nested several constructors deep to get past a check is found without
//! enumerating every term up to that depth.

use std::collections::BTreeMap;

use log::trace;

use crate::ir::*;
use crate::knowledge::{product, Knowledge};
use crate::term::{Bindings, Term};

/// Process nodes visited per input
const NODE_BUDGET: usize = 256;
/// Alternatives kept at any one point of the walk
const MAX_ALTERNATIVES: usize = 64;
const MAX_GOALS: usize = 64;
/// Ground messages built from one goal
const MAX_MESSAGES: usize = 64;

/// A message shape with holes the attacker still has to fill
#[derive(Debug, Clone, PartialEq, Eq)]
enum Open {
    Hole(u32),
    /// A name restricted after the input, so unknown to the attacker
    Rigid(VarId),
    Known(Term),
    /// Constructor application with at least one argument still open
    App(FunId, Vec<Open>),
}

fn close(fun: FunId, args: Vec<Open>) -> Open {
    if args.iter().all(|a| matches!(a, Open::Known(_))) {
        let terms = args
            .into_iter()
            .filter_map(|a| match a {
                Open::Known(t) => Some(t),
                _ => None,
            })
            .collect();
        Open::Known(Term::app(fun, terms))
    } else {
        Open::App(fun, args)
    }
}

/// Hole sorts and the solved part of the equations
#[derive(Debug, Clone, Default)]
struct Unifier {
    sorts: Vec<SortId>,
    bound: BTreeMap<u32, Open>,
}

impl Unifier {
    fn hole(&mut self, sort: SortId) -> Open {
        let hole = self.sorts.len() as u32;
        self.sorts.push(sort);
        Open::Hole(hole)
    }

    fn sort(&self, hole: u32) -> Option<SortId> {
        self.sorts.get(hole as usize).copied()
    }

    /// Follows bound holes until the head is a constructor, a name or a free hole
    fn shallow(&self, open: &Open) -> Open {
        let mut current = open.clone();
        while let Open::Hole(hole) = &current {
            match self.bound.get(hole) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }

    fn resolve(&self, open: &Open) -> Open {
        match self.shallow(open) {
            Open::App(fun, args) => close(fun, args.iter().map(|a| self.resolve(a)).collect()),
            other => other,
        }
    }

    fn occurs(&self, hole: u32, open: &Open) -> bool {
        match self.shallow(open) {
            Open::Hole(other) => other == hole,
            Open::Rigid(_) | Open::Known(_) => false,
            Open::App(_, args) => args.iter().any(|a| self.occurs(hole, a)),
        }
    }

    fn unify(mut self, a: &Open, b: &Open) -> Option<Self> {
        match (self.shallow(a), self.shallow(b)) {
            (Open::Hole(x), Open::Hole(y)) if x == y => Some(self),
            (Open::Hole(x), other) | (other, Open::Hole(x)) => {
                if self.occurs(x, &other) {
                    return None;
                }
                self.bound.insert(x, other);
                Some(self)
            }
            (Open::Rigid(x), Open::Rigid(y)) => (x == y).then_some(self),
            (Open::Known(t), Open::Known(u)) => (t == u).then_some(self),
            (Open::Known(Term::App(f, terms)), Open::App(g, opens))
            | (Open::App(g, opens), Open::Known(Term::App(f, terms))) => {
                if f != g || terms.len() != opens.len() {
                    return None;
                }
                terms
                    .iter()
                    .zip(&opens)
                    .try_fold(self, |u, (t, o)| u.unify(&Open::Known(t.clone()), o))
            }
            (Open::App(f, xs), Open::App(g, ys)) => {
                if f != g || xs.len() != ys.len() {
                    return None;
                }
                xs.iter().zip(&ys).try_fold(self, |u, (x, y)| u.unify(x, y))
            }
            _ => None,
        }
    }
}

type Env = BTreeMap<VarId, Open>;

/// Messages found for one input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Synthesis {
    /// Derivable messages that match the input pattern, in discovery order
    pub messages: Vec<Term>,
    /// A budget ran out, so some message shapes were not considered
    pub capped: bool,
}

/// Messages that lead the input `pattern` (continuing with `cont` under
/// `env`) past the checks that follow it
pub fn synthesize(
    spec: &Specification,
    knowledge: &Knowledge,
    event_mode: Option<EventMode>,
    pattern: &Pattern,
    env: &Bindings,
    cont: ProcId,
) -> Synthesis {
    let mut walker = Walker {
        spec,
        knowledge,
        event_mode,
        goals: Vec::new(),
        nodes: 0,
        capped: false,
    };
    let start: Env = env
        .iter()
        .map(|(v, t)| (*v, Open::Known(t.clone())))
        .collect();
    for (target, inner, u) in walker.bind(pattern, start, Unifier::default()) {
        walker.walk(cont, inner, u, &target);
    }

    let goals = std::mem::take(&mut walker.goals);
    let mut messages: Vec<Term> = Vec::new();
    for (goal, u) in &goals {
        for message in walker.ground(goal, u) {
            if !messages.contains(&message)
                && knowledge.derivable(spec, &message)
                && spec.match_pattern(pattern, &message, env.clone()).is_some()
            {
                messages.push(message);
            }
        }
    }
    if walker.capped {
        trace!(
            "input synthesis capped after {} node(s) and {} goal(s)",
            walker.nodes,
            goals.len()
        );
    }
    Synthesis {
        messages,
        capped: walker.capped,
    }
}

struct Walker<'a> {
    spec: &'a Specification,
    knowledge: &'a Knowledge,
    event_mode: Option<EventMode>,
    /// Solved message shapes with the unifier that knows their hole sorts
    goals: Vec<(Open, Unifier)>,
    nodes: usize,
    capped: bool,
}

impl<'a> Walker<'a> {
    fn limit<T>(&mut self, mut alternatives: Vec<T>) -> Vec<T> {
        if alternatives.len() > MAX_ALTERNATIVES {
            alternatives.truncate(MAX_ALTERNATIVES);
            self.capped = true;
        }
        alternatives
    }

    fn goal(&mut self, target: &Open, u: &Unifier) {
        let shape = u.resolve(target);
        if self.goals.iter().any(|(known, _)| *known == shape) {
            return;
        }
        if self.goals.len() >= MAX_GOALS {
            self.capped = true;
            return;
        }
        self.goals.push((shape, u.clone()));
    }

    fn walk(&mut self, proc: ProcId, mut env: Env, u: Unifier, target: &Open) {
        if self.nodes >= NODE_BUDGET {
            self.capped = true;
            return;
        }
        self.nodes += 1;
        let spec = self.spec;
        match &spec[proc] {
            Process::Stop => {}
            Process::Parallel(p, q) => {
                self.walk(*p, env.clone(), u.clone(), target);
                self.walk(*q, env, u, target);
            }
            Process::Replicate(body) => self.walk(*body, env, u, target),
            Process::Restrict(v, body) => {
                env.insert(*v, Open::Rigid(*v));
                self.walk(*body, env, u, target);
            }
            Process::Output(_, _, cont) => self.walk(*cont, env, u, target),
            Process::Input(_, pattern, cont) => {
                // later inputs stay open too
                for (_, inner, u) in self.bind(pattern, env, u) {
                    self.walk(*cont, inner, u, target);
                }
            }
            Process::Let(pattern, expr, then, otherwise) => {
                for (value, u1) in self.eval(*expr, &env, u.clone()) {
                    for (inner, u2) in self.match_value(pattern, &value, env.clone(), u1) {
                        self.goal(target, &u2);
                        self.walk(*then, inner, u2, target);
                    }
                }
                self.walk(*otherwise, env, u, target);
            }
            Process::If(cond, then, otherwise) => {
                for u1 in self.cond(cond, true, &env, u.clone()) {
                    self.goal(target, &u1);
                    self.walk(*then, env.clone(), u1, target);
                }
                for u1 in self.cond(cond, false, &env, u) {
                    self.walk(*otherwise, env.clone(), u1, target);
                }
            }
            Process::Event(stmt, cont) => {
                let verify = self.event_mode.unwrap_or(stmt.mode) == EventMode::Verify;
                match &stmt.guard {
                    Some(guard) if verify => {
                        for u1 in self.cond(guard, true, &env, u) {
                            self.goal(target, &u1);
                            self.walk(*cont, env.clone(), u1, target);
                        }
                    }
                    _ => self.walk(*cont, env, u, target),
                }
            }
            Process::Call(def, args) => {
                let def = &spec[*def];
                for (values, u1) in self.eval_all(args, &env, u) {
                    let inner = def.params().iter().copied().zip(values).collect();
                    self.walk(def.body(), inner, u1, target);
                }
            }
        }
    }

    /// Opens a pattern: its shape, the environment with its binders as
    /// fresh holes, and the unifier
    fn bind(
        &mut self,
        pattern: &Pattern,
        mut env: Env,
        mut u: Unifier,
    ) -> Vec<(Open, Env, Unifier)> {
        match pattern {
            Pattern::Bind(v) => {
                let hole = u.hole(self.spec[*v].sort());
                env.insert(*v, hole.clone());
                vec![(hole, env, u)]
            }
            Pattern::Equals(expr) => self
                .eval(*expr, &env, u)
                .into_iter()
                .map(|(value, u)| (value, env.clone(), u))
                .collect(),
            Pattern::Data(fun, subs) => {
                let mut partial = vec![(Vec::new(), env, u)];
                for sub in subs {
                    let mut next = Vec::new();
                    for (args, env, u) in partial {
                        for (shape, env, u) in self.bind(sub, env, u) {
                            let mut args = args.clone();
                            args.push(shape);
                            next.push((args, env, u));
                        }
                    }
                    partial = self.limit(next);
                }
                partial
                    .into_iter()
                    .map(|(args, env, u)| (close(*fun, args), env, u))
                    .collect()
            }
        }
    }

    fn match_value(
        &mut self,
        pattern: &Pattern,
        value: &Open,
        env: Env,
        u: Unifier,
    ) -> Vec<(Env, Unifier)> {
        self.bind(pattern, env, u)
            .into_iter()
            .filter_map(|(shape, env, u)| u.unify(&shape, value).map(|u| (env, u)))
            .collect()
    }

    fn eval(&mut self, expr: ExprId, env: &Env, u: Unifier) -> Vec<(Open, Unifier)> {
        let spec = self.spec;
        match &spec[expr] {
            Expr::Var(v) => env.get(v).map(|o| vec![(o.clone(), u)]).unwrap_or_default(),
            Expr::Free(id) => vec![(Open::Known(Term::free(*id)), u)],
            Expr::App(fun, args) => {
                let combos = self.eval_all(args, env, u);
                if spec[*fun].is_constructor() {
                    combos
                        .into_iter()
                        .map(|(args, u)| (close(*fun, args), u))
                        .collect()
                } else {
                    let mut out = Vec::new();
                    for (args, u) in combos {
                        out.extend(self.reduce(*fun, args, u));
                    }
                    self.limit(out)
                }
            }
        }
    }

    fn eval_all(
        &mut self,
        exprs: &[ExprId],
        env: &Env,
        u: Unifier,
    ) -> Vec<(Vec<Open>, Unifier)> {
        let mut partial = vec![(Vec::new(), u)];
        for expr in exprs {
            let mut next = Vec::new();
            for (values, u) in partial {
                for (value, u) in self.eval(*expr, env, u) {
                    let mut values = values.clone();
                    values.push(value);
                    next.push((values, u));
                }
            }
            partial = self.limit(next);
        }
        partial
    }

    /// A destructor over open arguments: one alternative per rule whose
    /// left-hand side unifies with them
    fn reduce(&mut self, fun: FunId, args: Vec<Open>, u: Unifier) -> Vec<(Open, Unifier)> {
        let spec = self.spec;
        let args: Vec<Open> = args.iter().map(|a| u.resolve(a)).collect();
        let ground: Option<Vec<Term>> = args
            .iter()
            .map(|a| match a {
                Open::Known(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        if let Some(terms) = ground {
            return match spec.reduce(fun, &terms) {
                Some(value) => vec![(Open::Known(value), u)],
                None => Vec::new(),
            };
        }

        let mut out = Vec::new();
        for rule in spec[fun].rules() {
            // nested destructors in a left-hand side are only matched on ground terms
            if rule.lhs.iter().any(|e| self.has_destructor(*e)) {
                self.capped = true;
                continue;
            }
            let mut renamed = u.clone();
            let mut rule_env = Env::new();
            for lhs in &rule.lhs {
                for v in spec.expr_vars(*lhs) {
                    if !rule_env.contains_key(&v) {
                        let hole = renamed.hole(spec[v].sort());
                        rule_env.insert(v, hole);
                    }
                }
            }
            let mut unified = Some(renamed);
            for (lhs, arg) in rule.lhs.iter().zip(&args) {
                unified = match (unified, self.open_expr(*lhs, &rule_env)) {
                    (Some(current), Some(shape)) => current.unify(&shape, arg),
                    _ => None,
                };
            }
            if let Some(u1) = unified {
                out.extend(self.eval(rule.rhs, &rule_env, u1));
            }
        }
        self.limit(out)
    }

    /// A destructor-free expression as a shape
    fn open_expr(&self, expr: ExprId, env: &Env) -> Option<Open> {
        match &self.spec[expr] {
            Expr::Var(v) => env.get(v).cloned(),
            Expr::Free(id) => Some(Open::Known(Term::free(*id))),
            Expr::App(fun, args) => {
                let args = args
                    .iter()
                    .map(|a| self.open_expr(*a, env))
                    .collect::<Option<Vec<_>>>()?;
                Some(close(*fun, args))
            }
        }
    }

    fn has_destructor(&self, expr: ExprId) -> bool {
        match &self.spec[expr] {
            Expr::App(fun, args) => {
                self.spec[*fun].is_destructor() || args.iter().any(|a| self.has_destructor(*a))
            }
            Expr::Var(_) | Expr::Free(_) => false,
        }
    }

    /// Unifiers under which `cond` evaluates to `positive`. Disequalities
    /// are not recorded; they only rule out shapes that are already equal.
    fn cond(&mut self, cond: &Cond, positive: bool, env: &Env, u: Unifier) -> Vec<Unifier> {
        let out = match cond {
            Cond::Eq(a, b) | Cond::Neq(a, b) => {
                let equal = matches!(cond, Cond::Eq(_, _)) == positive;
                let mut out = Vec::new();
                for (x, u1) in self.eval(*a, env, u) {
                    for (y, u2) in self.eval(*b, env, u1) {
                        if equal {
                            out.extend(u2.unify(&x, &y));
                        } else if u2.resolve(&x) != u2.resolve(&y) {
                            out.push(u2);
                        }
                    }
                }
                out
            }
            Cond::And(a, b) | Cond::Or(a, b) => {
                let both = matches!(cond, Cond::And(_, _)) == positive;
                if both {
                    let mut out = Vec::new();
                    for u1 in self.cond(a, positive, env, u) {
                        out.extend(self.cond(b, positive, env, u1));
                    }
                    out
                } else {
                    let mut out = self.cond(a, positive, env, u.clone());
                    out.extend(self.cond(b, positive, env, u));
                    out
                }
            }
            Cond::Not(inner) => self.cond(inner, !positive, env, u),
        };
        self.limit(out)
    }

    /// Ground messages of a goal: known terms that fit it, and attacker
    /// constructor applications over groundings of its arguments
    fn ground(&mut self, open: &Open, u: &Unifier) -> Vec<Term> {
        let spec = self.spec;
        let knowledge = self.knowledge;
        match u.shallow(open) {
            Open::Known(t) => {
                if knowledge.derivable(spec, &t) {
                    vec![t]
                } else {
                    Vec::new()
                }
            }
            Open::Rigid(_) => Vec::new(),
            Open::Hole(hole) => match u.sort(hole) {
                Some(sort) => knowledge.terms_of_sort(spec, sort, 0),
                None => Vec::new(),
            },
            Open::App(fun, args) => {
                let shape = Open::App(fun, args.clone());
                let mut out: Vec<Term> = knowledge
                    .iter()
                    .filter(|t| {
                        matches!(t, Term::App(head, _) if *head == fun)
                            && u.clone().unify(&Open::Known((*t).clone()), &shape).is_some()
                    })
                    .cloned()
                    .collect();
                if spec[fun].attacker_applicable() {
                    let per_arg: Vec<Vec<Term>> = args.iter().map(|a| self.ground(a, u)).collect();
                    let mut built = product(&per_arg);
                    if built.len() > MAX_MESSAGES {
                        built.truncate(MAX_MESSAGES);
                        self.capped = true;
                    }
                    out.extend(built.into_iter().map(|args| Term::app(fun, args)));
                }
                out
            }
        }
    }
}
