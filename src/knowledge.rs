// Copyright 2024 Cornell University
// released under MIT License

//! Dolev-Yao attacker knowledge.
//!
//! The stored set is closed under analysis: data projections and every
//! destructor rule whose premises the attacker can satisfy. Closure under
//! constructors is not materialised; `derivable` decides it on demand by
//! synthesis (a term is derivable if it is known, or if it is an
//! attacker-applicable constructor over derivable arguments).

use log::trace;
use rustc_hash::FxHashSet;

use crate::ir::*;
use crate::term::{Bindings, Name, Term};

#[derive(Debug, Clone)]
pub struct Knowledge {
    /// Analysis-closed set of known terms
    terms: FxHashSet<Term>,
    /// The same terms in insertion order, for deterministic iteration
    order: Vec<Term>,
    /// Terms deeper than this are not added by saturation
    max_depth: usize,
    /// Set once saturation had to drop a term because of `max_depth`
    truncated: bool,
}

impl Knowledge {
    /// Initial knowledge: every public free name
    pub fn new(spec: &Specification, max_depth: usize) -> Self {
        let mut knowledge = Self {
            terms: FxHashSet::default(),
            order: Vec::new(),
            max_depth,
            truncated: false,
        };
        let public: Vec<Term> = spec
            .frees()
            .filter(|(_, decl)| decl.is_public())
            .map(|(id, _)| Term::free(id))
            .collect();
        for term in public {
            knowledge.observe(spec, term);
        }
        knowledge
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Term> {
        self.order.iter()
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.terms.contains(term)
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Adds an observed term and saturates. Returns the terms that entered
    /// the stored set, in insertion order.
    pub fn observe(&mut self, spec: &Specification, term: Term) -> Vec<Term> {
        let added = self.saturate(spec, vec![term]);
        if !added.is_empty() {
            trace!("attacker learned {} term(s), now knows {}", added.len(), self.len());
        }
        added
    }

    pub fn derivable(&self, spec: &Specification, term: &Term) -> bool {
        if self.terms.contains(term) {
            return true;
        }
        match term {
            Term::Name(Name::Attacker(_)) => true,
            Term::Name(_) => false,
            Term::App(fun, args) => {
                let decl = &spec[*fun];
                decl.is_constructor()
                    && decl.attacker_applicable()
                    && args.iter().all(|a| self.derivable(spec, a))
            }
        }
    }

    fn insert(&mut self, term: Term) -> bool {
        if self.terms.insert(term.clone()) {
            self.order.push(term);
            true
        } else {
            false
        }
    }

    /// Saturation to fixpoint: only newly added terms seed further rounds
    fn saturate(&mut self, spec: &Specification, mut pending: Vec<Term>) -> Vec<Term> {
        let mut added = Vec::new();
        while let Some(term) = pending.pop() {
            if !self.insert(term.clone()) {
                continue;
            }
            added.push(term.clone());

            if let Term::App(fun, args) = &term {
                if spec[*fun].is_data() {
                    pending.extend(args.iter().filter(|a| !self.contains(a)).cloned());
                }
            }

            for (_, decl) in spec.destructors() {
                for rule in decl.rules() {
                    for (seed_pos, pattern) in rule.lhs.iter().enumerate() {
                        let Some(bindings) = spec.match_term(*pattern, &term, Bindings::new())
                        else {
                            continue;
                        };
                        for complete in self.complete(spec, &rule.lhs, seed_pos, 0, bindings) {
                            let Some(result) = spec.eval(rule.rhs, &complete) else {
                                continue;
                            };
                            if self.derivable(spec, &result) {
                                continue;
                            }
                            if result.depth() > self.max_depth {
                                self.truncated = true;
                                continue;
                            }
                            pending.push(result);
                        }
                    }
                }
            }
        }
        added
    }

    /// Fills the rule positions other than `seed_pos`, starting at `pos`.
    /// Ground positions must be derivable; positions with unbound variables
    /// are matched against known terms, the attacker's own name, and the
    /// argument the attacker can build itself with its names in the holes.
    fn complete(
        &self,
        spec: &Specification,
        lhs: &[ExprId],
        seed_pos: usize,
        pos: usize,
        bindings: Bindings,
    ) -> Vec<Bindings> {
        if pos == lhs.len() {
            return vec![bindings];
        }
        if pos == seed_pos {
            return self.complete(spec, lhs, seed_pos, pos + 1, bindings);
        }
        let pattern = lhs[pos];
        if spec.is_closed_under(pattern, &bindings) {
            return match spec.eval(pattern, &bindings) {
                Some(value) if self.derivable(spec, &value) => {
                    self.complete(spec, lhs, seed_pos, pos + 1, bindings)
                }
                _ => Vec::new(),
            };
        }
        let sort = spec.expr_sort(pattern);
        let attacker_name = Term::Name(Name::Attacker(sort));
        let built = self.attacker_instance(spec, pattern, &bindings);
        self.order
            .iter()
            .chain(std::iter::once(&attacker_name))
            .chain(built.iter())
            .filter_map(|known| spec.match_term(pattern, known, bindings.clone()))
            .flat_map(|b| self.complete(spec, lhs, seed_pos, pos + 1, b))
            .collect()
    }

    /// `pattern` with its unbound variables set to the attacker's names, if
    /// that is a compound term the attacker can derive
    fn attacker_instance(
        &self,
        spec: &Specification,
        pattern: ExprId,
        bindings: &Bindings,
    ) -> Option<Term> {
        if matches!(spec[pattern], Expr::Var(_)) {
            return None;
        }
        let mut filled = bindings.clone();
        for v in spec.expr_vars(pattern) {
            filled
                .entry(v)
                .or_insert_with(|| Term::Name(Name::Attacker(spec[v].sort())));
        }
        spec.eval(pattern, &filled)
            .filter(|term| self.derivable(spec, term))
    }

    /// Messages the attacker may send to an input with the given pattern:
    /// known terms, its own names, and attacker-applicable constructors
    /// stacked at most `depth` deep on top of those. The result is filtered
    /// by the pattern under `env`.
    pub fn candidates(
        &self,
        spec: &Specification,
        pattern: &Pattern,
        env: &Bindings,
        depth: usize,
    ) -> Vec<Term> {
        let mut seen = FxHashSet::default();
        self.generate(spec, pattern, env, depth)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .filter(|t| spec.match_pattern(pattern, t, env.clone()).is_some())
            .collect()
    }

    fn generate(
        &self,
        spec: &Specification,
        pattern: &Pattern,
        env: &Bindings,
        depth: usize,
    ) -> Vec<Term> {
        match pattern {
            Pattern::Bind(v) => self.terms_of_sort(spec, spec[*v].sort(), depth),
            Pattern::Equals(expr) => match spec.eval(*expr, env) {
                Some(value) if self.derivable(spec, &value) => vec![value],
                Some(_) => Vec::new(),
                // refers to a variable bound earlier in the same pattern
                None => self.terms_of_sort(spec, spec.expr_sort(*expr), depth),
            },
            Pattern::Data(fun, subs) => {
                let mut out: Vec<Term> = self
                    .order
                    .iter()
                    .filter(|t| matches!(t, Term::App(head, _) if head == fun))
                    .cloned()
                    .collect();
                if spec[*fun].attacker_applicable() {
                    let per_arg: Vec<Vec<Term>> = subs
                        .iter()
                        .map(|sub| self.generate(spec, sub, env, depth))
                        .collect();
                    out.extend(product(&per_arg).into_iter().map(|args| Term::app(*fun, args)));
                }
                out
            }
        }
    }

    /// Known terms of a sort, the attacker's own name of it, and attacker
    /// constructors stacked at most `depth` deep on top of those
    pub(crate) fn terms_of_sort(
        &self,
        spec: &Specification,
        sort: SortId,
        depth: usize,
    ) -> Vec<Term> {
        let mut out: Vec<Term> = self
            .order
            .iter()
            .filter(|t| spec.sort_of(t) == sort)
            .cloned()
            .collect();
        out.push(Term::Name(Name::Attacker(sort)));
        if depth > 0 {
            for (fun, decl) in spec.funs() {
                if !decl.is_constructor() || !decl.attacker_applicable() || decl.result() != sort
                {
                    continue;
                }
                let per_arg: Vec<Vec<Term>> = decl
                    .args()
                    .iter()
                    .map(|s| self.terms_of_sort(spec, *s, depth - 1))
                    .collect();
                out.extend(product(&per_arg).into_iter().map(|args| Term::app(fun, args)));
            }
        }
        out
    }
}

/// Cartesian product of argument candidates
pub(crate) fn product(per_arg: &[Vec<Term>]) -> Vec<Vec<Term>> {
    per_arg.iter().fold(vec![Vec::new()], |acc, options| {
        acc.iter()
            .flat_map(|prefix| {
                options.iter().map(move |o| {
                    let mut next = prefix.clone();
                    next.push(o.clone());
                    next
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::tests::crypto;

    #[test]
    fn public_names_are_known_initially() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let public = c.spec.add_free("pub", bs, true);
        let secret = c.spec.add_free("sec", bs, false);
        let k = Knowledge::new(&c.spec, 8);
        assert!(k.derivable(&c.spec, &Term::free(public)));
        assert!(!k.derivable(&c.spec, &Term::free(secret)));
        assert!(k.derivable(&c.spec, &Term::Name(Name::Attacker(bs))));
    }

    #[test]
    fn observe_is_monotone_and_decrypts_with_known_key() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let m = Term::free(c.spec.add_free("m0", bs, false));
        let key = Term::free(c.spec.add_free("k0", c.key, false));
        let n = Term::free(c.spec.add_free("n0", c.nonce, true));
        let ct = Term::app(c.enc, vec![m.clone(), key.clone(), n]);

        let mut k = Knowledge::new(&c.spec, 8);
        let before: Vec<Term> = k.iter().cloned().collect();
        k.observe(&c.spec, ct.clone());
        assert!(before.iter().all(|t| k.contains(t)));
        assert!(k.contains(&ct));
        assert!(!k.derivable(&c.spec, &m));

        // the key arrives later: the earlier ciphertext is opened
        k.observe(&c.spec, key);
        assert!(k.derivable(&c.spec, &m));
    }

    #[test]
    fn pairs_are_projected() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = Term::free(c.spec.add_free("a", bs, false));
        let b = Term::free(c.spec.add_free("b", bs, false));
        let mut k = Knowledge::new(&c.spec, 8);
        k.observe(&c.spec, Term::app(c.pair, vec![a.clone(), b.clone()]));
        assert!(k.contains(&a));
        assert!(k.contains(&b));
    }

    #[test]
    fn hashes_are_one_way() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = Term::free(c.spec.add_free("a", bs, false));
        let mut k = Knowledge::new(&c.spec, 8);
        let h = Term::app(c.hash, vec![a.clone()]);
        k.observe(&c.spec, h.clone());
        assert!(k.derivable(&c.spec, &h));
        assert!(!k.derivable(&c.spec, &a));
    }

    #[test]
    fn signatures_reveal_their_message() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let m = Term::free(c.spec.add_free("m0", bs, false));
        let sk = Term::free(c.spec.add_free("sk", c.key, false));
        let mut k = Knowledge::new(&c.spec, 8);
        k.observe(&c.spec, Term::app(c.pk, vec![sk.clone()]));
        assert!(!k.derivable(&c.spec, &m));
        k.observe(&c.spec, Term::app(c.sign, vec![m.clone(), sk.clone()]));
        assert!(k.derivable(&c.spec, &m));
        assert!(!k.derivable(&c.spec, &sk));
    }

    #[test]
    fn private_constructors_can_not_be_applied() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let mac = c.spec.add_private_constructor("mac", &[bs], bs);
        let a = Term::free(c.spec.add_free("a", bs, true));
        let k = Knowledge::new(&c.spec, 8);
        assert!(!k.derivable(&c.spec, &Term::app(mac, vec![a.clone()])));
        assert!(k.derivable(&c.spec, &Term::app(c.hash, vec![a])));
    }

    #[test]
    fn candidates_respect_pattern_and_depth() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = Term::free(c.spec.add_free("a", bs, true));
        let x = c.spec.add_var("x", bs);
        let k = Knowledge::new(&c.spec, 8);

        let flat = k.candidates(&c.spec, &Pattern::Bind(x), &Bindings::new(), 0);
        assert_eq!(flat, vec![a.clone(), Term::Name(Name::Attacker(bs))]);

        let deeper = k.candidates(&c.spec, &Pattern::Bind(x), &Bindings::new(), 1);
        assert!(deeper.contains(&Term::app(c.hash, vec![a.clone()])));
        assert!(deeper.contains(&Term::app(c.pair, vec![a.clone(), a.clone()])));
        assert!(deeper.len() > flat.len());

        let expected = c.spec.add_var("expected", bs);
        let expected_e = c.spec.var_expr(expected);
        let mut env = Bindings::new();
        env.insert(expected, a.clone());
        let only_a = k.candidates(&c.spec, &Pattern::Equals(expected_e), &env, 1);
        assert_eq!(only_a, vec![a]);
    }

    #[test]
    fn rule_arguments_the_attacker_can_build_are_used() {
        // unwrap(wrap(x), hash(y)) = x, and no hash was ever observed
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let wrap = c.spec.add_private_constructor("wrap", &[bs], bs);
        let unwrap = c.spec.add_destructor("unwrap", &[bs, bs], bs);
        let x = c.spec.add_var("x", bs);
        let y = c.spec.add_var("y", bs);
        let (x_e, y_e) = (c.spec.var_expr(x), c.spec.var_expr(y));
        let wrapped = c.spec.app(wrap, vec![x_e]);
        let hashed = c.spec.app(c.hash, vec![y_e]);
        c.spec.add_rule(unwrap, vec![wrapped, hashed], x_e);
        let s = Term::free(c.spec.add_free("s", bs, false));

        let mut k = Knowledge::new(&c.spec, 8);
        k.observe(&c.spec, Term::app(wrap, vec![s.clone()]));
        assert!(k.contains(&s));
        assert!(!k.contains(&Term::app(c.hash, vec![Term::Name(Name::Attacker(bs))])));
    }

    #[test]
    fn saturation_depth_is_capped() {
        // grow(wrap(x)) = wrap(wrap(x)) with a private `wrap` keeps producing
        // deeper terms; the cap stops it and is reported
        let mut spec = Specification::new();
        let bs = spec.bitstring();
        let wrap = spec.add_private_constructor("wrap", &[bs], bs);
        let grow = spec.add_destructor("grow", &[bs], bs);
        let x = spec.add_var("x", bs);
        let x_e = spec.var_expr(x);
        let w = spec.app(wrap, vec![x_e]);
        let ww = spec.app(wrap, vec![w]);
        spec.add_rule(grow, vec![w], ww);
        let a = spec.add_free("a", bs, false);

        let mut k = Knowledge::new(&spec, 4);
        k.observe(&spec, Term::app(wrap, vec![Term::free(a)]));
        assert!(k.is_truncated());
        assert!(k.iter().all(|t| t.depth() <= 4));
    }
}
