// Copyright 2024 Cornell University
// released under MIT License

//! Ground terms and the equational theory: constructor application,
//! destructor reduction and matching.
//!
//! Every failure in here (no rule applies, a pattern does not match, a
//! variable has the wrong sort) is reported as `None`. Callers prune the
//! branch they are exploring; nothing in this module is fatal.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ir::*;

/// Names that can occur in ground terms
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Name {
    Free(FreeId),
    /// The `n`-th name generated by the restriction that binds the variable
    Fresh(VarId, u32),
    /// The attacker's own name of the given sort
    Attacker(SortId),
}

/// Immutable ground term. Subterms are shared, so cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Name(Name),
    App(FunId, Arc<[Term]>),
}

impl Term {
    pub fn app(fun: FunId, args: Vec<Term>) -> Term {
        Term::App(fun, args.into())
    }

    pub fn free(id: FreeId) -> Term {
        Term::Name(Name::Free(id))
    }

    pub fn depth(&self) -> usize {
        match self {
            Term::Name(_) => 0,
            Term::App(_, args) => 1 + args.iter().map(Term::depth).max().unwrap_or(0),
        }
    }

    /// Whether `other` occurs in `self` (including `self == other`)
    pub fn contains(&self, other: &Term) -> bool {
        if self == other {
            return true;
        }
        match self {
            Term::Name(_) => false,
            Term::App(_, args) => args.iter().any(|a| a.contains(other)),
        }
    }
}

/// Variable assignment. Ordered so that process states can be compared
/// and hashed canonically.
pub type Bindings = BTreeMap<VarId, Term>;

impl Specification {
    pub fn sort_of(&self, term: &Term) -> SortId {
        match term {
            Term::Name(Name::Free(id)) => self[*id].sort(),
            Term::Name(Name::Fresh(var, _)) => self[*var].sort(),
            Term::Name(Name::Attacker(sort)) => *sort,
            Term::App(fun, _) => self[*fun].result(),
        }
    }

    /// Sort of an open expression, read off its head symbol
    pub fn expr_sort(&self, expr: ExprId) -> SortId {
        match &self[expr] {
            Expr::Var(v) => self[*v].sort(),
            Expr::Free(id) => self[*id].sort(),
            Expr::App(fun, _) => self[*fun].result(),
        }
    }

    /// Applies a constructor. Arguments are assumed to be sort-correct,
    /// which the type checker guarantees for everything built from the model.
    pub fn apply(&self, fun: FunId, args: Vec<Term>) -> Term {
        debug_assert!(self[fun].is_constructor(), "apply on a destructor");
        debug_assert_eq!(self[fun].arity(), args.len());
        Term::app(fun, args)
    }

    /// Reduces a destructor application with the first rule whose left-hand
    /// side matches. `None` when no rule applies.
    pub fn reduce(&self, fun: FunId, args: &[Term]) -> Option<Term> {
        let decl = &self[fun];
        if args.len() != decl.arity() {
            return None;
        }
        decl.rules().iter().find_map(|rule| {
            let bindings = rule
                .lhs
                .iter()
                .zip(args)
                .try_fold(Bindings::new(), |b, (pattern, arg)| {
                    self.match_term(*pattern, arg, b)
                })?;
            self.eval(rule.rhs, &bindings)
        })
    }

    /// Evaluates an open expression under `env`, reducing destructors on the
    /// way. Unbound variables and failing destructors yield `None`.
    pub fn eval(&self, expr: ExprId, env: &Bindings) -> Option<Term> {
        match &self[expr] {
            Expr::Var(v) => env.get(v).cloned(),
            Expr::Free(id) => Some(Term::free(*id)),
            Expr::App(fun, args) => {
                let args = args
                    .iter()
                    .map(|a| self.eval(*a, env))
                    .collect::<Option<Vec<_>>>()?;
                if self[*fun].is_constructor() {
                    Some(self.apply(*fun, args))
                } else {
                    self.reduce(*fun, &args)
                }
            }
        }
    }

    /// Whether every variable of `expr` is bound in `env`
    pub fn is_closed_under(&self, expr: ExprId, env: &Bindings) -> bool {
        match &self[expr] {
            Expr::Var(v) => env.contains_key(v),
            Expr::Free(_) => true,
            Expr::App(_, args) => args.iter().all(|a| self.is_closed_under(*a, env)),
        }
    }

    /// One-pass matching of a rule pattern against a ground term.
    /// A variable that is already bound must match an equal term; a nested
    /// destructor application is evaluated under the bindings collected so
    /// far and compared with the term.
    pub fn match_term(&self, pattern: ExprId, term: &Term, mut bindings: Bindings) -> Option<Bindings> {
        match &self[pattern] {
            Expr::Var(v) => match bindings.get(v) {
                Some(bound) => (bound == term).then_some(bindings),
                None => {
                    if self[*v].sort() != self.sort_of(term) {
                        return None;
                    }
                    bindings.insert(*v, term.clone());
                    Some(bindings)
                }
            },
            Expr::Free(id) => (*term == Term::free(*id)).then_some(bindings),
            Expr::App(fun, sub_patterns) if self[*fun].is_constructor() => match term {
                Term::App(head, args) if head == fun && args.len() == sub_patterns.len() => {
                    sub_patterns
                        .iter()
                        .zip(args.iter())
                        .try_fold(bindings, |b, (p, a)| self.match_term(*p, a, b))
                }
                _ => None,
            },
            Expr::App(_, _) => {
                let value = self.eval(pattern, &bindings)?;
                (value == *term).then_some(bindings)
            }
        }
    }

    /// Matches an input or let pattern. `Bind` always (re)binds, `=t`
    /// compares with the value of `t` under the bindings made so far.
    pub fn match_pattern(
        &self,
        pattern: &Pattern,
        term: &Term,
        mut bindings: Bindings,
    ) -> Option<Bindings> {
        match pattern {
            Pattern::Bind(v) => {
                if self[*v].sort() != self.sort_of(term) {
                    return None;
                }
                bindings.insert(*v, term.clone());
                Some(bindings)
            }
            Pattern::Equals(expr) => {
                let value = self.eval(*expr, &bindings)?;
                (value == *term).then_some(bindings)
            }
            Pattern::Data(fun, subs) => match term {
                Term::App(head, args) if head == fun && args.len() == subs.len() => subs
                    .iter()
                    .zip(args.iter())
                    .try_fold(bindings, |b, (p, a)| self.match_pattern(p, a, b)),
                _ => None,
            },
        }
    }

    /// Evaluates a condition. `None` when a destructor inside it fails.
    pub fn eval_cond(&self, cond: &Cond, env: &Bindings) -> Option<bool> {
        match cond {
            Cond::Eq(a, b) => Some(self.eval(*a, env)? == self.eval(*b, env)?),
            Cond::Neq(a, b) => Some(self.eval(*a, env)? != self.eval(*b, env)?),
            Cond::And(a, b) => Some(self.eval_cond(a, env)? && self.eval_cond(b, env)?),
            Cond::Or(a, b) => Some(self.eval_cond(a, env)? || self.eval_cond(b, env)?),
            Cond::Not(a) => Some(!self.eval_cond(a, env)?),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A small theory shared by the tests of several modules:
    /// randomized symmetric encryption, signatures, pairs and a hash.
    pub(crate) struct Crypto {
        pub spec: Specification,
        pub key: SortId,
        pub nonce: SortId,
        pub enc: FunId,
        pub dec: FunId,
        pub pk: FunId,
        pub sign: FunId,
        pub checksign: FunId,
        pub pair: FunId,
        pub hash: FunId,
    }

    pub(crate) fn crypto() -> Crypto {
        let mut spec = Specification::new();
        let bs = spec.bitstring();
        let key = spec.add_sort("key");
        let nonce = spec.add_sort("nonce");
        let enc = spec.add_constructor("enc", &[bs, key, nonce], bs);
        let dec = spec.add_destructor("dec", &[bs, key, nonce], bs);
        let pk = spec.add_constructor("pk", &[key], key);
        let sign = spec.add_constructor("sign", &[bs, key], bs);
        let checksign = spec.add_destructor("checksign", &[bs, key], bs);
        let pair = spec.add_data_constructor("pair", &[bs, bs], bs);
        let hash = spec.add_constructor("hash", &[bs], bs);

        let m = spec.add_var("m", bs);
        let k = spec.add_var("k", key);
        let n = spec.add_var("n", nonce);
        let (m_e, k_e, n_e) = (spec.var_expr(m), spec.var_expr(k), spec.var_expr(n));
        let enc_e = spec.app(enc, vec![m_e, k_e, n_e]);
        spec.add_rule(dec, vec![enc_e, k_e, n_e], m_e);

        let sig = spec.app(sign, vec![m_e, k_e]);
        let pk_e = spec.app(pk, vec![k_e]);
        spec.add_rule(checksign, vec![sig, pk_e], m_e);

        Crypto {
            spec,
            key,
            nonce,
            enc,
            dec,
            pk,
            sign,
            checksign,
            pair,
            hash,
        }
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let m = Term::free(c.spec.add_free("m0", bs, false));
        let k = Term::free(c.spec.add_free("k0", c.key, false));
        let k2 = Term::free(c.spec.add_free("k1", c.key, false));
        let n = Term::free(c.spec.add_free("n0", c.nonce, false));

        let ct = c.spec.apply(c.enc, vec![m.clone(), k.clone(), n.clone()]);
        assert_eq!(
            c.spec.reduce(c.dec, &[ct.clone(), k.clone(), n.clone()]),
            Some(m)
        );
        assert_eq!(c.spec.reduce(c.dec, &[ct, k2, n]), None);
    }

    #[test]
    fn checksign_needs_matching_public_key() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let m = Term::free(c.spec.add_free("m0", bs, true));
        let sk = Term::free(c.spec.add_free("sk", c.key, false));
        let other = Term::free(c.spec.add_free("other", c.key, false));

        let sig = c.spec.apply(c.sign, vec![m.clone(), sk.clone()]);
        let good = c.spec.apply(c.pk, vec![sk]);
        let bad = c.spec.apply(c.pk, vec![other]);
        assert_eq!(c.spec.reduce(c.checksign, &[sig.clone(), good]), Some(m));
        assert_eq!(c.spec.reduce(c.checksign, &[sig, bad]), None);
    }

    #[test]
    fn destructor_on_wrong_shape_fails() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let m = Term::free(c.spec.add_free("m0", bs, true));
        let k = Term::free(c.spec.add_free("k0", c.key, false));
        let n = Term::free(c.spec.add_free("n0", c.nonce, false));
        let h = c.spec.apply(c.hash, vec![m]);
        assert_eq!(c.spec.reduce(c.dec, &[h, k, n]), None);
    }

    #[test]
    fn nested_destructor_in_expression_prunes() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let m = c.spec.add_free("m0", bs, true);
        let k = c.spec.add_free("k0", c.key, false);
        let n = c.spec.add_free("n0", c.nonce, false);
        let (m_e, k_e, n_e) = (
            c.spec.free_expr(m),
            c.spec.free_expr(k),
            c.spec.free_expr(n),
        );
        let h = c.spec.app(c.hash, vec![m_e]);
        let bogus = c.spec.app(c.dec, vec![h, k_e, n_e]);
        let outer = c.spec.app(c.hash, vec![bogus]);
        assert_eq!(c.spec.eval(outer, &Bindings::new()), None);
    }

    #[test]
    fn match_term_is_sort_checked_and_non_linear() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = Term::free(c.spec.add_free("a", bs, true));
        let b = Term::free(c.spec.add_free("b", bs, true));
        let k = Term::free(c.spec.add_free("k0", c.key, false));

        let x = c.spec.add_var("x", bs);
        let x_e = c.spec.var_expr(x);
        let same = c.spec.app(c.pair, vec![x_e, x_e]);

        let aa = Term::app(c.pair, vec![a.clone(), a.clone()]);
        let ab = Term::app(c.pair, vec![a.clone(), b]);
        let bound = c.spec.match_term(same, &aa, Bindings::new()).unwrap();
        assert_eq!(bound.get(&x), Some(&a));
        assert_eq!(c.spec.match_term(same, &ab, Bindings::new()), None);
        // `x` is a bitstring, a key does not fit
        assert_eq!(c.spec.match_term(x_e, &k, Bindings::new()), None);
    }

    #[test]
    fn match_pattern_with_equality_constraint() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = Term::free(c.spec.add_free("a", bs, true));
        let b = Term::free(c.spec.add_free("b", bs, true));
        let y = c.spec.add_var("y", bs);
        let expected = c.spec.add_var("expected", bs);
        let expected_e = c.spec.var_expr(expected);
        let pattern = Pattern::Data(
            c.pair,
            vec![Pattern::Equals(expected_e), Pattern::Bind(y)],
        );

        let mut env = Bindings::new();
        env.insert(expected, a.clone());
        let msg = Term::app(c.pair, vec![a.clone(), b.clone()]);
        let out = c.spec.match_pattern(&pattern, &msg, env.clone()).unwrap();
        assert_eq!(out.get(&y), Some(&b));

        let wrong = Term::app(c.pair, vec![b.clone(), b]);
        assert_eq!(c.spec.match_pattern(&pattern, &wrong, env), None);
    }

    #[test]
    fn conditions_propagate_destructor_failure() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = c.spec.add_free("a", bs, true);
        let sk = c.spec.add_free("sk", c.key, false);
        let a_e = c.spec.free_expr(a);
        let sk_e = c.spec.free_expr(sk);
        let pk_e = c.spec.app(c.pk, vec![sk_e]);
        // checksign(a, pk(sk)) fails: `a` is not a signature
        let check = c.spec.app(c.checksign, vec![a_e, pk_e]);
        let env = Bindings::new();
        assert_eq!(c.spec.eval_cond(&Cond::Eq(check, a_e), &env), None);
        assert_eq!(c.spec.eval_cond(&Cond::Eq(a_e, a_e), &env), Some(true));
        assert_eq!(
            c.spec
                .eval_cond(&Cond::Not(Box::new(Cond::Neq(a_e, a_e))), &env),
            Some(true)
        );
    }

    #[test]
    fn term_depth_and_containment() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let a = Term::free(c.spec.add_free("a", bs, true));
        let h = Term::app(c.hash, vec![a.clone()]);
        let hh = Term::app(c.hash, vec![h.clone()]);
        assert_eq!(a.depth(), 0);
        assert_eq!(hh.depth(), 2);
        assert!(hh.contains(&a));
        assert!(!h.contains(&hh));
    }
}
