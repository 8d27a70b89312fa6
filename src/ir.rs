// Copyright 2024 Cornell University
// released under MIT License

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use std::ops::Index;

use crate::errors::SpecificationError;

/// Name of the builtin sort every untyped message lives in
pub const BITSTRING: &str = "bitstring";
/// Name of the builtin sort of channels
pub const CHANNEL: &str = "channel";

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SortId(u32);
entity_impl!(SortId, "sort");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FunId(u32);
entity_impl!(FunId, "fun");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FreeId(u32);
entity_impl!(FreeId, "free");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct VarId(u32);
entity_impl!(VarId, "var");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct EventId(u32);
entity_impl!(EventId, "event");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DefId(u32);
entity_impl!(DefId, "def");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ExprId(u32);
entity_impl!(ExprId, "expr");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProcId(u32);
entity_impl!(ProcId, "proc");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct QueryId(u32);
entity_impl!(QueryId, "query");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDecl {
    name: String,
}

impl SortDecl {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// How the attacker may use a constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// The attacker can apply it, but not take it apart
    Public,
    /// The attacker can apply it and project its arguments (tuples)
    Data,
    /// Only honest processes can apply it
    Private,
}

/// A destructor rewrite rule `f(lhs_1, ..., lhs_n) = rhs`.
/// Variables in `lhs` are pattern variables; a variable occurring twice
/// forces the matched subterms to be equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub lhs: Vec<ExprId>,
    pub rhs: ExprId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunKind {
    Constructor(Visibility),
    Destructor(Vec<Rule>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunDecl {
    name: String,
    args: Vec<SortId>,
    result: SortId,
    kind: FunKind,
}

impl FunDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[SortId] {
        &self.args
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn result(&self) -> SortId {
        self.result
    }

    pub fn kind(&self) -> &FunKind {
        &self.kind
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, FunKind::Constructor(_))
    }

    pub fn is_destructor(&self) -> bool {
        matches!(self.kind, FunKind::Destructor(_))
    }

    /// Whether the attacker may apply this function symbol to terms it knows
    pub fn attacker_applicable(&self) -> bool {
        !matches!(self.kind, FunKind::Constructor(Visibility::Private))
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, FunKind::Constructor(Visibility::Data))
    }

    /// The rewrite rules of a destructor (empty for constructors)
    pub fn rules(&self) -> &[Rule] {
        match &self.kind {
            FunKind::Destructor(rules) => rules,
            FunKind::Constructor(_) => &[],
        }
    }
}

/// A free (global) name, e.g. a long-term key or a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeDecl {
    name: String,
    sort: SortId,
    public: bool,
}

impl FreeDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> SortId {
        self.sort
    }

    pub fn is_public(&self) -> bool {
        self.public
    }
}

/// Variables are declared once with a sort and may then be bound by
/// inputs, lets, restrictions, process parameters, rules or queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    name: String,
    sort: SortId,
}

impl VarDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> SortId {
        self.sort
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDecl {
    name: String,
    args: Vec<SortId>,
}

impl EventDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[SortId] {
        &self.args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDef {
    name: String,
    params: Vec<VarId>,
    body: ProcId,
}

impl ProcessDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[VarId] {
        &self.params
    }

    pub fn body(&self) -> ProcId {
        self.body
    }
}

/// Open terms as they appear in processes, rules and queries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Var(VarId),
    Free(FreeId),
    /// Constructor or destructor application, told apart by the `FunDecl`
    App(FunId, Vec<ExprId>),
}

/// Binding patterns of inputs and lets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Binds a (possibly shadowing) variable
    Bind(VarId),
    /// `=t`: only accepts messages equal to the value of `t`
    Equals(ExprId),
    /// Decomposes a constructor application
    Data(FunId, Vec<Pattern>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq(ExprId, ExprId),
    Neq(ExprId, ExprId),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Not(Box<Cond>),
}

/// Whether an event guard is checked before the event is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventMode {
    /// Record the event as soon as it is reached, ignoring the guard
    Assume,
    /// Evaluate the guard first; the branch stops if it does not hold
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventStmt {
    pub event: EventId,
    pub args: Vec<ExprId>,
    pub guard: Option<Cond>,
    pub mode: EventMode,
}

impl EventStmt {
    /// An unguarded event
    pub fn new(event: EventId, args: Vec<ExprId>) -> Self {
        Self {
            event,
            args,
            guard: None,
            mode: EventMode::Verify,
        }
    }

    pub fn guarded(event: EventId, args: Vec<ExprId>, guard: Cond, mode: EventMode) -> Self {
        Self {
            event,
            args,
            guard: Some(guard),
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Process {
    Stop,
    Parallel(ProcId, ProcId),
    Replicate(ProcId),
    /// `new x: sort; P`, the sort is the declared sort of the variable
    Restrict(VarId, ProcId),
    /// `out(channel, message); P`
    Output(ExprId, ExprId, ProcId),
    /// `in(channel, pattern); P`
    Input(ExprId, Pattern, ProcId),
    /// `let pattern = term in P else Q`
    Let(Pattern, ExprId, ProcId, ProcId),
    If(Cond, ProcId, ProcId),
    Event(EventStmt, ProcId),
    Call(DefId, Vec<ExprId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    pub event: EventId,
    pub args: Vec<ExprId>,
}

impl EventPattern {
    pub fn new(event: EventId, args: Vec<ExprId>) -> Self {
        Self { event, args }
    }
}

/// Left-hand side of a correspondence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hypothesis {
    Event(EventPattern),
    /// The attacker derives the given term
    Attacker(ExprId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Secrecy(ExprId),
    /// `hypothesis ==> required_1 || ... || required_n`
    Correspondence {
        hypothesis: Hypothesis,
        required: Vec<EventPattern>,
        injective: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDecl {
    name: String,
    query: Query,
}

impl QueryDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &Query {
        &self.query
    }
}

/// A complete protocol model: theory, names, events, processes and queries.
/// Built incrementally (the `add_*`, `e` and `p` methods), then handed to
/// `engine::load_specification` which validates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specification {
    sorts: PrimaryMap<SortId, SortDecl>,
    funs: PrimaryMap<FunId, FunDecl>,
    frees: PrimaryMap<FreeId, FreeDecl>,
    vars: PrimaryMap<VarId, VarDecl>,
    events: PrimaryMap<EventId, EventDecl>,
    defs: PrimaryMap<DefId, ProcessDef>,
    exprs: PrimaryMap<ExprId, Expr>,
    procs: PrimaryMap<ProcId, Process>,
    queries: PrimaryMap<QueryId, QueryDecl>,

    /// The top-level process composition
    pub main: ProcId,
    stop_id: ProcId,
    bitstring: SortId,
    channel: SortId,

    by_name_sort: FxHashMap<String, SortId>,
    by_name_fun: FxHashMap<String, FunId>,
    by_name_free: FxHashMap<String, FreeId>,
    by_name_event: FxHashMap<String, EventId>,
    by_name_def: FxHashMap<String, DefId>,
    by_name_query: FxHashMap<String, QueryId>,

    /// Problems found while declaring things, reported by the type checker
    declaration_errors: Vec<SpecificationError>,
}

impl Default for Specification {
    fn default() -> Self {
        Self::new()
    }
}

impl Specification {
    pub fn new() -> Self {
        let mut sorts = PrimaryMap::new();
        let bitstring = sorts.push(SortDecl {
            name: BITSTRING.to_string(),
        });
        let channel = sorts.push(SortDecl {
            name: CHANNEL.to_string(),
        });
        let mut by_name_sort = FxHashMap::default();
        by_name_sort.insert(BITSTRING.to_string(), bitstring);
        by_name_sort.insert(CHANNEL.to_string(), channel);

        let mut procs = PrimaryMap::new();
        let stop_id = procs.push(Process::Stop);

        Self {
            sorts,
            funs: PrimaryMap::new(),
            frees: PrimaryMap::new(),
            vars: PrimaryMap::new(),
            events: PrimaryMap::new(),
            defs: PrimaryMap::new(),
            exprs: PrimaryMap::new(),
            procs,
            queries: PrimaryMap::new(),
            main: stop_id,
            stop_id,
            bitstring,
            channel,
            by_name_sort,
            by_name_fun: FxHashMap::default(),
            by_name_free: FxHashMap::default(),
            by_name_event: FxHashMap::default(),
            by_name_def: FxHashMap::default(),
            by_name_query: FxHashMap::default(),
            declaration_errors: Vec::new(),
        }
    }

    pub fn bitstring(&self) -> SortId {
        self.bitstring
    }

    pub fn channel_sort(&self) -> SortId {
        self.channel
    }

    fn note_duplicate(&mut self, kind: &'static str, name: &str) {
        self.declaration_errors.push(SpecificationError::Duplicate {
            kind,
            name: name.to_string(),
        });
    }

    pub fn add_sort(&mut self, name: &str) -> SortId {
        if let Some(&id) = self.by_name_sort.get(name) {
            self.note_duplicate("sort", name);
            return id;
        }
        let id = self.sorts.push(SortDecl {
            name: name.to_string(),
        });
        self.by_name_sort.insert(name.to_string(), id);
        id
    }

    fn add_fun(&mut self, name: &str, args: &[SortId], result: SortId, kind: FunKind) -> FunId {
        if self.by_name_fun.contains_key(name) || self.by_name_free.contains_key(name) {
            self.note_duplicate("function", name);
        }
        let id = self.funs.push(FunDecl {
            name: name.to_string(),
            args: args.to_vec(),
            result,
            kind,
        });
        self.by_name_fun.entry(name.to_string()).or_insert(id);
        id
    }

    pub fn add_constructor(&mut self, name: &str, args: &[SortId], result: SortId) -> FunId {
        self.add_fun(name, args, result, FunKind::Constructor(Visibility::Public))
    }

    /// Adds a tuple-like constructor whose arguments the attacker may project
    pub fn add_data_constructor(&mut self, name: &str, args: &[SortId], result: SortId) -> FunId {
        self.add_fun(name, args, result, FunKind::Constructor(Visibility::Data))
    }

    pub fn add_private_constructor(
        &mut self,
        name: &str,
        args: &[SortId],
        result: SortId,
    ) -> FunId {
        self.add_fun(name, args, result, FunKind::Constructor(Visibility::Private))
    }

    /// Adds a destructor without rules; rules are attached with `add_rule`
    pub fn add_destructor(&mut self, name: &str, args: &[SortId], result: SortId) -> FunId {
        self.add_fun(name, args, result, FunKind::Destructor(Vec::new()))
    }

    pub fn add_rule(&mut self, fun: FunId, lhs: Vec<ExprId>, rhs: ExprId) {
        match &mut self.funs[fun].kind {
            FunKind::Destructor(rules) => rules.push(Rule { lhs, rhs }),
            FunKind::Constructor(_) => {
                let name = self.funs[fun].name.clone();
                self.declaration_errors
                    .push(SpecificationError::RuleOnConstructor { name });
            }
        }
    }

    pub fn add_free(&mut self, name: &str, sort: SortId, public: bool) -> FreeId {
        if self.by_name_free.contains_key(name) || self.by_name_fun.contains_key(name) {
            self.note_duplicate("free name", name);
        }
        let id = self.frees.push(FreeDecl {
            name: name.to_string(),
            sort,
            public,
        });
        self.by_name_free.entry(name.to_string()).or_insert(id);
        id
    }

    pub fn add_channel(&mut self, name: &str, public: bool) -> FreeId {
        self.add_free(name, self.channel, public)
    }

    pub fn add_var(&mut self, name: &str, sort: SortId) -> VarId {
        self.vars.push(VarDecl {
            name: name.to_string(),
            sort,
        })
    }

    pub fn add_event(&mut self, name: &str, args: &[SortId]) -> EventId {
        if let Some(&id) = self.by_name_event.get(name) {
            self.note_duplicate("event", name);
            return id;
        }
        let id = self.events.push(EventDecl {
            name: name.to_string(),
            args: args.to_vec(),
        });
        self.by_name_event.insert(name.to_string(), id);
        id
    }

    pub fn add_def(&mut self, name: &str, params: Vec<VarId>, body: ProcId) -> DefId {
        if self.by_name_def.contains_key(name) {
            self.note_duplicate("process", name);
        }
        let id = self.defs.push(ProcessDef {
            name: name.to_string(),
            params,
            body,
        });
        self.by_name_def.entry(name.to_string()).or_insert(id);
        id
    }

    pub fn add_query(&mut self, name: &str, query: Query) -> QueryId {
        if self.by_name_query.contains_key(name) {
            self.note_duplicate("query", name);
        }
        let id = self.queries.push(QueryDecl {
            name: name.to_string(),
            query,
        });
        self.by_name_query.entry(name.to_string()).or_insert(id);
        id
    }

    /// add a new expression to the specification
    pub fn e(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr)
    }

    /// add a new process node to the specification
    pub fn p(&mut self, process: Process) -> ProcId {
        self.procs.push(process)
    }

    pub fn var_expr(&mut self, var: VarId) -> ExprId {
        self.e(Expr::Var(var))
    }

    pub fn free_expr(&mut self, free: FreeId) -> ExprId {
        self.e(Expr::Free(free))
    }

    pub fn app(&mut self, fun: FunId, args: Vec<ExprId>) -> ExprId {
        self.e(Expr::App(fun, args))
    }

    pub fn proc_stop(&self) -> ProcId {
        self.stop_id
    }

    /// Folds a list of processes into nested `Parallel` nodes
    pub fn parallel(&mut self, processes: Vec<ProcId>) -> ProcId {
        let mut iter = processes.into_iter().rev();
        let Some(last) = iter.next() else {
            return self.stop_id;
        };
        iter.fold(last, |acc, p| self.p(Process::Parallel(p, acc)))
    }

    pub fn sort_id(&self, name: &str) -> Result<SortId, SpecificationError> {
        self.by_name_sort
            .get(name)
            .copied()
            .ok_or_else(|| SpecificationError::undeclared("sort", name))
    }

    pub fn fun_id(&self, name: &str) -> Result<FunId, SpecificationError> {
        self.by_name_fun
            .get(name)
            .copied()
            .ok_or_else(|| SpecificationError::undeclared("function", name))
    }

    pub fn free_id(&self, name: &str) -> Result<FreeId, SpecificationError> {
        self.by_name_free
            .get(name)
            .copied()
            .ok_or_else(|| SpecificationError::undeclared("free name", name))
    }

    pub fn event_id(&self, name: &str) -> Result<EventId, SpecificationError> {
        self.by_name_event
            .get(name)
            .copied()
            .ok_or_else(|| SpecificationError::undeclared("event", name))
    }

    pub fn def_id(&self, name: &str) -> Result<DefId, SpecificationError> {
        self.by_name_def
            .get(name)
            .copied()
            .ok_or_else(|| SpecificationError::undeclared("process", name))
    }

    pub fn query_id(&self, name: &str) -> Result<QueryId, SpecificationError> {
        self.by_name_query
            .get(name)
            .copied()
            .ok_or_else(|| SpecificationError::undeclared("query", name))
    }

    pub fn declaration_errors(&self) -> &[SpecificationError] {
        &self.declaration_errors
    }

    pub fn funs(&self) -> impl Iterator<Item = (FunId, &FunDecl)> {
        self.funs.iter()
    }

    /// All destructors, in declaration order
    pub fn destructors(&self) -> impl Iterator<Item = (FunId, &FunDecl)> {
        self.funs.iter().filter(|(_, decl)| decl.is_destructor())
    }

    pub fn frees(&self) -> impl Iterator<Item = (FreeId, &FreeDecl)> {
        self.frees.iter()
    }

    pub fn defs(&self) -> impl Iterator<Item = (DefId, &ProcessDef)> {
        self.defs.iter()
    }

    pub fn queries(&self) -> impl Iterator<Item = (QueryId, &QueryDecl)> {
        self.queries.iter()
    }

    /// Collects the variables of an expression in order of first occurrence
    pub fn expr_vars(&self, expr: ExprId) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_expr_vars(expr, &mut out);
        out
    }

    fn collect_expr_vars(&self, expr: ExprId, out: &mut Vec<VarId>) {
        match &self.exprs[expr] {
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Expr::Free(_) => {}
            Expr::App(_, args) => {
                for arg in args {
                    self.collect_expr_vars(*arg, out);
                }
            }
        }
    }

    /// Every variable bound by a `Restrict` node anywhere in the model
    pub fn restricted_vars(&self) -> Vec<VarId> {
        self.procs
            .values()
            .filter_map(|p| match p {
                Process::Restrict(v, _) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Ids used somewhere in the model without having been allocated by this
    /// specification. Node builders do not check the ids they are given, so
    /// this has to come back empty before anything indexes into the arenas.
    pub fn dangling_references(&self) -> Vec<SpecificationError> {
        let mut refs = References::default();
        if !self.procs.is_valid(self.main) {
            refs.note("process node", self.main);
        }
        for decl in self.funs.values() {
            for sort in decl.args.iter().chain(std::iter::once(&decl.result)) {
                refs.check(self.sorts.is_valid(*sort), "sort", sort);
            }
            for rule in decl.rules() {
                for expr in rule.lhs.iter().chain(std::iter::once(&rule.rhs)) {
                    self.check_expr_ids(*expr, &mut refs);
                }
            }
        }
        for decl in self.frees.values() {
            refs.check(self.sorts.is_valid(decl.sort), "sort", decl.sort);
        }
        for decl in self.vars.values() {
            refs.check(self.sorts.is_valid(decl.sort), "sort", decl.sort);
        }
        for decl in self.events.values() {
            for sort in &decl.args {
                refs.check(self.sorts.is_valid(*sort), "sort", sort);
            }
        }
        for def in self.defs.values() {
            for v in &def.params {
                refs.check(self.vars.is_valid(*v), "variable", v);
            }
            refs.check(self.procs.is_valid(def.body), "process node", def.body);
        }
        for expr in self.exprs.keys() {
            self.check_expr_ids(expr, &mut refs);
        }
        for proc in self.procs.values() {
            self.check_process_ids(proc, &mut refs);
        }
        for decl in self.queries.values() {
            match &decl.query {
                Query::Secrecy(expr) => self.check_expr_ids(*expr, &mut refs),
                Query::Correspondence {
                    hypothesis,
                    required,
                    ..
                } => {
                    match hypothesis {
                        Hypothesis::Event(pattern) => {
                            self.check_event_ids(pattern.event, &pattern.args, &mut refs)
                        }
                        Hypothesis::Attacker(expr) => self.check_expr_ids(*expr, &mut refs),
                    }
                    for pattern in required {
                        self.check_event_ids(pattern.event, &pattern.args, &mut refs);
                    }
                }
            }
        }
        refs.errors
    }

    /// Checks one expression node (children are checked as nodes of their own)
    fn check_expr_ids(&self, expr: ExprId, refs: &mut References) {
        let Some(node) = self.exprs.get(expr) else {
            refs.note("expression", expr);
            return;
        };
        match node {
            Expr::Var(v) => refs.check(self.vars.is_valid(*v), "variable", v),
            Expr::Free(f) => refs.check(self.frees.is_valid(*f), "free name", f),
            Expr::App(fun, args) => {
                refs.check(self.funs.is_valid(*fun), "function", fun);
                for arg in args {
                    refs.check(self.exprs.is_valid(*arg), "expression", arg);
                }
            }
        }
    }

    fn check_pattern_ids(&self, pattern: &Pattern, refs: &mut References) {
        match pattern {
            Pattern::Bind(v) => refs.check(self.vars.is_valid(*v), "variable", v),
            Pattern::Equals(expr) => self.check_expr_ids(*expr, refs),
            Pattern::Data(fun, args) => {
                refs.check(self.funs.is_valid(*fun), "function", fun);
                for arg in args {
                    self.check_pattern_ids(arg, refs);
                }
            }
        }
    }

    fn check_cond_ids(&self, cond: &Cond, refs: &mut References) {
        match cond {
            Cond::Eq(a, b) | Cond::Neq(a, b) => {
                self.check_expr_ids(*a, refs);
                self.check_expr_ids(*b, refs);
            }
            Cond::And(a, b) | Cond::Or(a, b) => {
                self.check_cond_ids(a, refs);
                self.check_cond_ids(b, refs);
            }
            Cond::Not(inner) => self.check_cond_ids(inner, refs),
        }
    }

    fn check_event_ids(&self, event: EventId, args: &[ExprId], refs: &mut References) {
        refs.check(self.events.is_valid(event), "event", event);
        for arg in args {
            self.check_expr_ids(*arg, refs);
        }
    }

    fn check_process_ids(&self, proc: &Process, refs: &mut References) {
        let next = |refs: &mut References, id: ProcId| {
            refs.check(self.procs.is_valid(id), "process node", id)
        };
        match proc {
            Process::Stop => {}
            Process::Parallel(a, b) => {
                next(refs, *a);
                next(refs, *b);
            }
            Process::Replicate(body) => next(refs, *body),
            Process::Restrict(v, body) => {
                refs.check(self.vars.is_valid(*v), "variable", v);
                next(refs, *body);
            }
            Process::Output(chan, msg, body) => {
                self.check_expr_ids(*chan, refs);
                self.check_expr_ids(*msg, refs);
                next(refs, *body);
            }
            Process::Input(chan, pattern, body) => {
                self.check_expr_ids(*chan, refs);
                self.check_pattern_ids(pattern, refs);
                next(refs, *body);
            }
            Process::Let(pattern, expr, then, otherwise) => {
                self.check_pattern_ids(pattern, refs);
                self.check_expr_ids(*expr, refs);
                next(refs, *then);
                next(refs, *otherwise);
            }
            Process::If(cond, then, otherwise) => {
                self.check_cond_ids(cond, refs);
                next(refs, *then);
                next(refs, *otherwise);
            }
            Process::Event(stmt, body) => {
                self.check_event_ids(stmt.event, &stmt.args, refs);
                if let Some(guard) = &stmt.guard {
                    self.check_cond_ids(guard, refs);
                }
                next(refs, *body);
            }
            Process::Call(def, args) => {
                refs.check(self.defs.is_valid(*def), "process", def);
                for arg in args {
                    self.check_expr_ids(*arg, refs);
                }
            }
        }
    }
}

/// Collects dangling ids, each reported once
#[derive(Default)]
struct References {
    errors: Vec<SpecificationError>,
}

impl References {
    fn check(&mut self, valid: bool, kind: &'static str, id: impl std::fmt::Display) {
        if !valid {
            self.note(kind, id);
        }
    }

    fn note(&mut self, kind: &'static str, id: impl std::fmt::Display) {
        let error = SpecificationError::undeclared(kind, &id.to_string());
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }
}

impl Index<SortId> for Specification {
    type Output = SortDecl;

    fn index(&self, index: SortId) -> &Self::Output {
        &self.sorts[index]
    }
}

impl Index<FunId> for Specification {
    type Output = FunDecl;

    fn index(&self, index: FunId) -> &Self::Output {
        &self.funs[index]
    }
}

impl Index<FreeId> for Specification {
    type Output = FreeDecl;

    fn index(&self, index: FreeId) -> &Self::Output {
        &self.frees[index]
    }
}

impl Index<VarId> for Specification {
    type Output = VarDecl;

    fn index(&self, index: VarId) -> &Self::Output {
        &self.vars[index]
    }
}

impl Index<EventId> for Specification {
    type Output = EventDecl;

    fn index(&self, index: EventId) -> &Self::Output {
        &self.events[index]
    }
}

impl Index<DefId> for Specification {
    type Output = ProcessDef;

    fn index(&self, index: DefId) -> &Self::Output {
        &self.defs[index]
    }
}

impl Index<ExprId> for Specification {
    type Output = Expr;

    fn index(&self, index: ExprId) -> &Self::Output {
        &self.exprs[index]
    }
}

impl Index<&ExprId> for Specification {
    type Output = Expr;

    fn index(&self, index: &ExprId) -> &Self::Output {
        &self.exprs[*index]
    }
}

impl Index<ProcId> for Specification {
    type Output = Process;

    fn index(&self, index: ProcId) -> &Self::Output {
        &self.procs[index]
    }
}

impl Index<QueryId> for Specification {
    type Output = QueryDecl;

    fn index(&self, index: QueryId) -> &Self::Output {
        &self.queries[index]
    }
}
