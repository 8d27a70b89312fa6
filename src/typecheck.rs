// Copyright 2024 Cornell University
// released under MIT License

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::SpecificationError;
use crate::ir::*;
use crate::serialize::{serialize_process_head, serialize_query};

type Scope = FxHashSet<VarId>;

struct Checker<'a> {
    spec: &'a Specification,
    errors: Vec<SpecificationError>,
}

/// Checks a specification before it is explored: declarations, rewrite
/// rules, sorts and arities, variable scoping, recursion and queries.
/// Returns every problem found (empty when the specification is fine).
pub fn type_check(spec: &Specification) -> Vec<SpecificationError> {
    let mut checker = Checker {
        spec,
        errors: Vec::new(),
    };
    for error in spec.declaration_errors() {
        checker.emit(error.clone());
    }
    // every later check indexes the arenas directly
    let dangling = spec.dangling_references();
    if !dangling.is_empty() {
        for error in dangling {
            checker.emit(error);
        }
        return checker.errors;
    }
    checker.check_theory();
    checker.check_recursion();
    for (_, def) in spec.defs() {
        let scope: Scope = def.params().iter().copied().collect();
        checker.check_process(def.body(), &scope);
    }
    checker.check_process(spec.main, &Scope::default());
    checker.check_queries();
    checker.errors
}

impl<'a> Checker<'a> {
    fn emit(&mut self, error: SpecificationError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    fn sort_name(&self, sort: SortId) -> &'a str {
        self.spec[sort].name()
    }

    fn expect_sort(&mut self, expected: SortId, found: SortId, context: &str) {
        if expected != found {
            let error = SpecificationError::sort_mismatch(
                self.sort_name(expected),
                self.sort_name(found),
                context.to_string(),
            );
            self.emit(error);
        }
    }

    fn check_args(
        &mut self,
        name: &str,
        expected: &[SortId],
        args: &[ExprId],
        scope: &Scope,
        context: &str,
    ) {
        if expected.len() != args.len() {
            self.emit(SpecificationError::ArityMismatch {
                name: name.to_string(),
                expected: expected.len(),
                found: args.len(),
                context: context.to_string(),
            });
        }
        for (arg, sort) in args.iter().zip(expected) {
            let found = self.check_expr(*arg, scope, context);
            self.expect_sort(*sort, found, context);
        }
    }

    fn check_expr(&mut self, expr: ExprId, scope: &Scope, context: &str) -> SortId {
        let spec = self.spec;
        match &spec[expr] {
            Expr::Var(v) => {
                if !scope.contains(v) {
                    self.emit(SpecificationError::UnboundVariable {
                        name: spec[*v].name().to_string(),
                        context: context.to_string(),
                    });
                }
                spec[*v].sort()
            }
            Expr::Free(id) => spec[*id].sort(),
            Expr::App(fun, args) => {
                let decl = &spec[*fun];
                self.check_args(decl.name(), decl.args(), args, scope, context);
                decl.result()
            }
        }
    }

    /// Checks a binding pattern and adds its binders to `scope`
    fn check_pattern(&mut self, pattern: &Pattern, scope: &mut Scope, context: &str) -> SortId {
        let spec = self.spec;
        match pattern {
            Pattern::Bind(v) => {
                scope.insert(*v);
                spec[*v].sort()
            }
            Pattern::Equals(expr) => self.check_expr(*expr, scope, context),
            Pattern::Data(fun, subs) => {
                let decl = &spec[*fun];
                if decl.is_destructor() {
                    self.emit(SpecificationError::DestructorPattern {
                        name: decl.name().to_string(),
                        context: context.to_string(),
                    });
                }
                if decl.arity() != subs.len() {
                    self.emit(SpecificationError::ArityMismatch {
                        name: decl.name().to_string(),
                        expected: decl.arity(),
                        found: subs.len(),
                        context: context.to_string(),
                    });
                }
                for (sub, sort) in subs.iter().zip(decl.args()) {
                    let found = self.check_pattern(sub, scope, context);
                    self.expect_sort(*sort, found, context);
                }
                decl.result()
            }
        }
    }

    fn check_cond(&mut self, cond: &Cond, scope: &Scope, context: &str) {
        match cond {
            Cond::Eq(a, b) | Cond::Neq(a, b) => {
                let left = self.check_expr(*a, scope, context);
                let right = self.check_expr(*b, scope, context);
                self.expect_sort(left, right, context);
            }
            Cond::And(a, b) | Cond::Or(a, b) => {
                self.check_cond(a, scope, context);
                self.check_cond(b, scope, context);
            }
            Cond::Not(a) => self.check_cond(a, scope, context),
        }
    }

    fn check_channel(&mut self, channel: ExprId, scope: &Scope, context: &str) {
        let found = self.check_expr(channel, scope, context);
        self.expect_sort(self.spec.channel_sort(), found, context);
    }

    fn check_process(&mut self, proc: ProcId, scope: &Scope) {
        let spec = self.spec;
        let context = serialize_process_head(spec, proc);
        match &spec[proc] {
            Process::Stop => {}
            Process::Parallel(p, q) => {
                self.check_process(*p, scope);
                self.check_process(*q, scope);
            }
            Process::Replicate(p) => self.check_process(*p, scope),
            Process::Restrict(v, p) => {
                let mut inner = scope.clone();
                inner.insert(*v);
                self.check_process(*p, &inner);
            }
            Process::Output(channel, message, p) => {
                self.check_channel(*channel, scope, &context);
                self.check_expr(*message, scope, &context);
                self.check_process(*p, scope);
            }
            Process::Input(channel, pattern, p) => {
                self.check_channel(*channel, scope, &context);
                let mut inner = scope.clone();
                self.check_pattern(pattern, &mut inner, &context);
                self.check_process(*p, &inner);
            }
            Process::Let(pattern, value, then, otherwise) => {
                let found = self.check_expr(*value, scope, &context);
                let mut inner = scope.clone();
                let expected = self.check_pattern(pattern, &mut inner, &context);
                self.expect_sort(expected, found, &context);
                self.check_process(*then, &inner);
                self.check_process(*otherwise, scope);
            }
            Process::If(cond, then, otherwise) => {
                self.check_cond(cond, scope, &context);
                self.check_process(*then, scope);
                self.check_process(*otherwise, scope);
            }
            Process::Event(stmt, p) => {
                let decl = &spec[stmt.event];
                self.check_args(decl.name(), decl.args(), &stmt.args, scope, &context);
                if let Some(guard) = &stmt.guard {
                    self.check_cond(guard, scope, &context);
                }
                self.check_process(*p, scope);
            }
            Process::Call(def, args) => {
                let def = &spec[*def];
                let sorts: Vec<SortId> = def.params().iter().map(|v| spec[*v].sort()).collect();
                self.check_args(def.name(), &sorts, args, scope, &context);
            }
        }
    }

    fn check_theory(&mut self) {
        let spec = self.spec;
        for (_, decl) in spec.destructors() {
            if decl.rules().is_empty() {
                self.emit(SpecificationError::DestructorWithoutRules {
                    name: decl.name().to_string(),
                });
            }
            let context = format!("rewrite rule of `{}`", decl.name());
            for rule in decl.rules() {
                // rule variables are bound by the left-hand side
                let scope: Scope = rule
                    .lhs
                    .iter()
                    .flat_map(|p| spec.expr_vars(*p))
                    .collect();
                self.check_args(decl.name(), decl.args(), &rule.lhs, &scope, &context);
                let found = self.check_expr(rule.rhs, &scope, &context);
                self.expect_sort(decl.result(), found, &context);
            }
        }
    }

    fn check_recursion(&mut self) {
        let spec = self.spec;
        let calls: FxHashMap<DefId, Vec<DefId>> = spec
            .defs()
            .map(|(id, def)| {
                let mut out = Vec::new();
                collect_calls(spec, def.body(), &mut out);
                (id, out)
            })
            .collect();
        let mut done: FxHashSet<DefId> = FxHashSet::default();
        for (id, _) in spec.defs() {
            let mut path = Vec::new();
            self.visit_calls(id, &calls, &mut path, &mut done);
        }
    }

    fn visit_calls(
        &mut self,
        def: DefId,
        calls: &FxHashMap<DefId, Vec<DefId>>,
        path: &mut Vec<DefId>,
        done: &mut FxHashSet<DefId>,
    ) {
        if done.contains(&def) {
            return;
        }
        if path.contains(&def) {
            self.emit(SpecificationError::RecursiveDefinition {
                name: self.spec[def].name().to_string(),
            });
            return;
        }
        path.push(def);
        for callee in calls.get(&def).into_iter().flatten() {
            self.visit_calls(*callee, calls, path, done);
        }
        path.pop();
        done.insert(def);
    }

    fn check_queries(&mut self) {
        let spec = self.spec;
        let restricted: Scope = spec.restricted_vars().into_iter().collect();
        for (_, decl) in spec.queries() {
            let context = format!("query `{}`", decl.name());
            let malformed = |reason: &str| SpecificationError::MalformedQuery {
                query: decl.name().to_string(),
                reason: reason.to_string(),
            };
            match decl.query() {
                Query::Secrecy(secret) => {
                    self.check_restricted(decl.name(), *secret, &restricted);
                    self.check_expr(*secret, &restricted, &context);
                }
                Query::Correspondence {
                    hypothesis,
                    required,
                    injective,
                } => {
                    if required.is_empty() {
                        self.emit(malformed("the conclusion names no event"));
                    }
                    // hypothesis variables are universal, conclusion-only
                    // variables existential
                    let mut scope = restricted.clone();
                    for pattern in required {
                        scope.extend(pattern.args.iter().flat_map(|a| spec.expr_vars(*a)));
                    }
                    match hypothesis {
                        Hypothesis::Event(pattern) => {
                            scope.extend(pattern.args.iter().flat_map(|a| spec.expr_vars(*a)));
                            self.check_event_pattern(pattern, &scope, &context);
                        }
                        Hypothesis::Attacker(term) => {
                            if *injective {
                                self.emit(malformed("an attacker fact can not be injective"));
                            }
                            self.check_restricted(decl.name(), *term, &restricted);
                            self.check_expr(*term, &restricted, &context);
                        }
                    }
                    for pattern in required {
                        self.check_event_pattern(pattern, &scope, &context);
                    }
                }
            }
        }
    }

    fn check_event_pattern(&mut self, pattern: &EventPattern, scope: &Scope, context: &str) {
        let decl = &self.spec[pattern.event];
        self.check_args(decl.name(), decl.args(), &pattern.args, scope, context);
    }

    /// Terms the attacker is asked about may only mention names bound by
    /// restrictions
    fn check_restricted(&mut self, query: &str, term: ExprId, restricted: &Scope) {
        for var in self.spec.expr_vars(term) {
            if !restricted.contains(&var) {
                self.emit(SpecificationError::UnrestrictedQueryVariable {
                    query: query.to_string(),
                    name: self.spec[var].name().to_string(),
                });
            }
        }
    }
}

fn collect_calls(spec: &Specification, proc: ProcId, out: &mut Vec<DefId>) {
    match &spec[proc] {
        Process::Stop => {}
        Process::Call(def, _) => out.push(*def),
        Process::Parallel(p, q) | Process::Let(_, _, p, q) | Process::If(_, p, q) => {
            collect_calls(spec, *p, out);
            collect_calls(spec, *q, out);
        }
        Process::Replicate(p)
        | Process::Restrict(_, p)
        | Process::Output(_, _, p)
        | Process::Input(_, _, p)
        | Process::Event(_, p) => collect_calls(spec, *p, out),
    }
}

/// Human-readable summary of the queries of a specification, for logs
pub fn describe_queries(spec: &Specification) -> Vec<String> {
    spec.queries()
        .map(|(_, decl)| format!("{}: {}", decl.name(), serialize_query(spec, decl.query())))
        .collect()
}
