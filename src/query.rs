// Copyright 2024 Cornell University
// released under MIT License

//! Secrecy and correspondence checking over single traces, and the
//! aggregation of per-trace results into one verdict per query.

use std::collections::BTreeSet;

use cranelift_entity::SecondaryMap;

use crate::ir::*;
use crate::knowledge::Knowledge;
use crate::term::{Bindings, Term};
use crate::trace::{Culprit, EventOccurrence, Trace, Witness};

/// The limit that kept exploration from being complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bound {
    /// A trace reached `max_depth` scheduler choices
    Steps,
    /// The run reached `max_states` explored states
    States,
    /// The sampled strategy dropped choices
    Width,
    /// Goal-directed input synthesis ran out of budget, so some attacker
    /// messages were never tried
    Injection,
    /// A replicated process was unfolded into its bounded number of copies
    Replication,
    /// Attacker knowledge saturation dropped terms deeper than `knowledge_depth`
    TermDepth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Holds,
    Violated(Witness),
    InconclusiveAtBound(Bound),
}

impl Verdict {
    pub fn holds(&self) -> bool {
        matches!(self, Verdict::Holds)
    }

    pub fn is_violated(&self) -> bool {
        matches!(self, Verdict::Violated(_))
    }

    pub fn witness(&self) -> Option<&Witness> {
        match self {
            Verdict::Violated(w) => Some(w),
            _ => None,
        }
    }
}

/// Matches an event pattern against an occurrence, extending `bindings`
pub fn match_event(
    spec: &Specification,
    pattern: &EventPattern,
    occurrence: &EventOccurrence,
    bindings: Bindings,
) -> Option<Bindings> {
    if pattern.event != occurrence.event || pattern.args.len() != occurrence.args.len() {
        return None;
    }
    pattern
        .args
        .iter()
        .zip(occurrence.args.iter())
        .try_fold(bindings, |b, (p, a)| spec.match_term(*p, a, b))
}

/// All assignments of the restricted variables of `expr` to the names their
/// restrictions generated in this trace
fn fresh_instances(spec: &Specification, expr: ExprId, trace: &Trace) -> Vec<Bindings> {
    spec.expr_vars(expr)
        .into_iter()
        .fold(vec![Bindings::new()], |acc, var| {
            let names: Vec<&Term> = trace.fresh_of(var).collect();
            acc.iter()
                .flat_map(|env| {
                    names.iter().map(move |name| {
                        let mut env = env.clone();
                        env.insert(var, (*name).clone());
                        env
                    })
                })
                .collect()
        })
}

/// `secret` must not be derivable from `knowledge`, the final attacker
/// knowledge of `trace`
pub fn check_secrecy(
    spec: &Specification,
    secret: ExprId,
    trace: &Trace,
    knowledge: &Knowledge,
) -> Option<Witness> {
    fresh_instances(spec, secret, trace)
        .into_iter()
        .filter_map(|env| spec.eval(secret, &env))
        .filter(|term| knowledge.derivable(spec, term))
        .map(|term| {
            let position = trace
                .derivable_after(spec, &term, knowledge.max_depth())
                .unwrap_or(trace.len());
            Witness {
                steps: trace.prefix(position),
                culprit: Culprit::Leaked(term),
            }
        })
        .min_by_key(Witness::len)
}

/// Indices of the events of `trace` that satisfy one of the `required`
/// patterns under `bindings` and occur before `limit`
fn partners(
    spec: &Specification,
    required: &[EventPattern],
    trace: &Trace,
    bindings: &Bindings,
    limit: usize,
) -> Vec<usize> {
    trace
        .events()
        .iter()
        .enumerate()
        .filter(|(_, occ)| occ.position < limit)
        .filter(|(_, occ)| {
            required
                .iter()
                .any(|p| match_event(spec, p, occ, bindings.clone()).is_some())
        })
        .map(|(i, _)| i)
        .collect()
}

pub fn check_correspondence(
    spec: &Specification,
    hypothesis: &Hypothesis,
    required: &[EventPattern],
    injective: bool,
    trace: &Trace,
    knowledge: &Knowledge,
) -> Option<Witness> {
    match hypothesis {
        Hypothesis::Event(trigger) => {
            let triggers: Vec<(&EventOccurrence, Vec<usize>)> = trace
                .events()
                .iter()
                .filter_map(|occ| {
                    let bindings = match_event(spec, trigger, occ, Bindings::new())?;
                    Some((occ, partners(spec, required, trace, &bindings, occ.position + 1)))
                })
                .collect();
            let unmatched = if injective {
                let adjacency: Vec<Vec<usize>> = triggers.iter().map(|(_, p)| p.clone()).collect();
                first_unmatched(&adjacency, trace.events().len())
            } else {
                triggers.iter().position(|(_, p)| p.is_empty())
            };
            let occ = triggers[unmatched?].0;
            Some(Witness {
                steps: trace.prefix(occ.position + 1),
                culprit: Culprit::Unmatched(occ.clone()),
            })
        }
        Hypothesis::Attacker(expr) => fresh_instances(spec, *expr, trace)
            .into_iter()
            .filter_map(|env| Some((spec.eval(*expr, &env)?, env)))
            .filter(|(term, _)| knowledge.derivable(spec, term))
            .filter_map(|(term, env)| {
                let position = trace
                    .derivable_after(spec, &term, knowledge.max_depth())
                    .unwrap_or(trace.len());
                partners(spec, required, trace, &env, position)
                    .is_empty()
                    .then(|| Witness {
                        steps: trace.prefix(position),
                        culprit: Culprit::Derived { term, position },
                    })
            })
            .min_by_key(Witness::len),
    }
}

/// Pairs triggers (in trace order) with distinct partners by augmenting
/// paths. Returns the first trigger that can not be given one. Pairs may
/// cross: a later trigger can hold an earlier partner than an earlier one.
fn first_unmatched(adjacency: &[Vec<usize>], partners: usize) -> Option<usize> {
    let mut owner: Vec<Option<usize>> = vec![None; partners];
    for trigger in 0..adjacency.len() {
        let mut seen = vec![false; partners];
        if !augment(trigger, adjacency, &mut owner, &mut seen) {
            return Some(trigger);
        }
    }
    None
}

fn augment(
    trigger: usize,
    adjacency: &[Vec<usize>],
    owner: &mut [Option<usize>],
    seen: &mut [bool],
) -> bool {
    for &partner in &adjacency[trigger] {
        if seen[partner] {
            continue;
        }
        seen[partner] = true;
        let free = match owner[partner] {
            None => true,
            Some(other) => augment(other, adjacency, owner, seen),
        };
        if free {
            owner[partner] = Some(trigger);
            return true;
        }
    }
    false
}

pub fn check_query(
    spec: &Specification,
    query: &Query,
    trace: &Trace,
    knowledge: &Knowledge,
) -> Option<Witness> {
    match query {
        Query::Secrecy(secret) => check_secrecy(spec, *secret, trace, knowledge),
        Query::Correspondence {
            hypothesis,
            required,
            injective,
        } => check_correspondence(spec, hypothesis, required, *injective, trace, knowledge),
    }
}

#[derive(Debug, Clone, Default)]
struct Outcome {
    witness: Option<Witness>,
    bounds: BTreeSet<Bound>,
}

/// Accumulates the results of every explored trace
#[derive(Debug, Clone)]
pub struct QueryEvaluator<'a> {
    spec: &'a Specification,
    outcomes: SecondaryMap<QueryId, Outcome>,
}

impl<'a> QueryEvaluator<'a> {
    pub fn new(spec: &'a Specification) -> Self {
        Self {
            spec,
            outcomes: SecondaryMap::new(),
        }
    }

    /// Checks every query against a finished (completed, blocked or
    /// truncated) trace. `bounds` are the limits that shaped this trace.
    pub fn check_trace(&mut self, trace: &Trace, knowledge: &Knowledge, bounds: &[Bound]) {
        for (id, decl) in self.spec.queries() {
            let outcome = &mut self.outcomes[id];
            match check_query(self.spec, decl.query(), trace, knowledge) {
                Some(witness) => keep_shorter(&mut outcome.witness, witness),
                None => outcome.bounds.extend(bounds.iter().copied()),
            }
        }
    }

    /// Records a limit that affected the run as a whole
    pub fn note_bound(&mut self, bound: Bound) {
        for (id, _) in self.spec.queries() {
            self.outcomes[id].bounds.insert(bound);
        }
    }

    /// True once every query has a witness; false without queries
    pub fn all_violated(&self) -> bool {
        self.spec.queries().next().is_some()
            && self
                .spec
                .queries()
                .all(|(id, _)| self.outcomes[id].witness.is_some())
    }

    pub fn merge(&mut self, other: QueryEvaluator<'a>) {
        for (id, _) in self.spec.queries() {
            let theirs = other.outcomes[id].clone();
            let ours = &mut self.outcomes[id];
            if let Some(witness) = theirs.witness {
                keep_shorter(&mut ours.witness, witness);
            }
            ours.bounds.extend(theirs.bounds);
        }
    }

    pub fn finish(self) -> Vec<(QueryId, Verdict)> {
        self.spec
            .queries()
            .map(|(id, _)| {
                let outcome = &self.outcomes[id];
                let verdict = match (&outcome.witness, outcome.bounds.first()) {
                    (Some(witness), _) => Verdict::Violated(witness.clone()),
                    (None, Some(bound)) => Verdict::InconclusiveAtBound(*bound),
                    (None, None) => Verdict::Holds,
                };
                (id, verdict)
            })
            .collect()
    }
}

fn keep_shorter(slot: &mut Option<Witness>, witness: Witness) {
    match slot {
        Some(current) if current.len() <= witness.len() => {}
        _ => *slot = Some(witness),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::tests::crypto;
    use crate::term::Name;

    struct Events {
        spec: Specification,
        x: VarId,
        y: VarId,
        begin: EventId,
        end: EventId,
        a: Term,
        b: Term,
    }

    fn events() -> Events {
        let mut spec = Specification::new();
        let bs = spec.bitstring();
        let x = spec.add_var("x", bs);
        let y = spec.add_var("y", bs);
        let begin = spec.add_event("begin", &[bs]);
        let end = spec.add_event("end", &[bs]);
        let a = Term::free(spec.add_free("a", bs, true));
        let b = Term::free(spec.add_free("b", bs, true));
        Events {
            spec,
            x,
            y,
            begin,
            end,
            a,
            b,
        }
    }

    fn end_implies_begin(ev: &mut Events, injective: bool) -> Query {
        let x_e = ev.spec.var_expr(ev.x);
        Query::Correspondence {
            hypothesis: Hypothesis::Event(EventPattern::new(ev.end, vec![x_e])),
            required: vec![EventPattern::new(ev.begin, vec![x_e])],
            injective,
        }
    }

    #[test]
    fn shared_partner_is_enough_for_non_injective() {
        let mut ev = events();
        let mut trace = Trace::new();
        trace.record_event(ev.begin, vec![ev.a.clone()]);
        trace.record_event(ev.end, vec![ev.a.clone()]);
        trace.record_event(ev.end, vec![ev.a.clone()]);
        let k = Knowledge::new(&ev.spec, 8);

        let plain = end_implies_begin(&mut ev, false);
        assert_eq!(check_query(&ev.spec, &plain, &trace, &k), None);

        let injective = end_implies_begin(&mut ev, true);
        let witness = check_query(&ev.spec, &injective, &trace, &k).unwrap();
        assert_eq!(witness.len(), 3);
        match witness.culprit {
            Culprit::Unmatched(occ) => assert_eq!(occ.position, 2),
            other => panic!("unexpected culprit {other:?}"),
        }
    }

    #[test]
    fn injective_matching_reassigns_partners() {
        // end(a) may only pair with begin(a); a greedy choice for the
        // first end must not starve the second. The pairs cross, which is
        // still injective.
        let mut ev = events();
        let mut trace = Trace::new();
        trace.record_event(ev.begin, vec![ev.a.clone()]);
        trace.record_event(ev.begin, vec![ev.b.clone()]);
        trace.record_event(ev.end, vec![ev.b.clone()]);
        trace.record_event(ev.end, vec![ev.a.clone()]);
        let k = Knowledge::new(&ev.spec, 8);
        let injective = end_implies_begin(&mut ev, true);
        assert_eq!(check_query(&ev.spec, &injective, &trace, &k), None);

        // hand-built graph where the first trigger grabs the only partner
        // of the second one unless it is re-routed
        assert_eq!(first_unmatched(&[vec![0, 1], vec![0]], 2), None);
        assert_eq!(first_unmatched(&[vec![0], vec![0]], 1), Some(1));
    }

    #[test]
    fn late_partner_does_not_count() {
        let mut ev = events();
        let mut trace = Trace::new();
        trace.record_event(ev.end, vec![ev.a.clone()]);
        trace.record_event(ev.begin, vec![ev.a.clone()]);
        let k = Knowledge::new(&ev.spec, 8);
        let plain = end_implies_begin(&mut ev, false);
        let witness = check_query(&ev.spec, &plain, &trace, &k).unwrap();
        assert_eq!(witness.len(), 1);
    }

    #[test]
    fn arguments_must_agree() {
        let mut ev = events();
        let mut trace = Trace::new();
        trace.record_event(ev.begin, vec![ev.b.clone()]);
        trace.record_event(ev.end, vec![ev.a.clone()]);
        let k = Knowledge::new(&ev.spec, 8);
        let plain = end_implies_begin(&mut ev, false);
        assert!(check_query(&ev.spec, &plain, &trace, &k).is_some());
    }

    #[test]
    fn existential_and_disjunctive_conclusions() {
        let mut ev = events();
        let bs = ev.spec.bitstring();
        let other = ev.spec.add_event("other", &[bs, bs]);
        let x_e = ev.spec.var_expr(ev.x);
        let y_e = ev.spec.var_expr(ev.y);
        // end(x) ==> begin(x) || other(y, x), `y` existential
        let query = Query::Correspondence {
            hypothesis: Hypothesis::Event(EventPattern::new(ev.end, vec![x_e])),
            required: vec![
                EventPattern::new(ev.begin, vec![x_e]),
                EventPattern::new(other, vec![y_e, x_e]),
            ],
            injective: false,
        };
        let mut trace = Trace::new();
        trace.record_event(other, vec![ev.b.clone(), ev.a.clone()]);
        trace.record_event(ev.end, vec![ev.a.clone()]);
        let k = Knowledge::new(&ev.spec, 8);
        assert_eq!(check_query(&ev.spec, &query, &trace, &k), None);
    }

    #[test]
    fn secrecy_of_restricted_names_checks_every_instance() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = Term::free(c.spec.add_channel("net", true));
        let s = c.spec.add_var("s", bs);
        let s_e = c.spec.var_expr(s);
        let first = Term::Name(Name::Fresh(s, 1));
        let second = Term::Name(Name::Fresh(s, 2));

        let mut trace = Trace::new();
        trace.record_fresh(s, first);
        trace.record_fresh(s, second.clone());
        trace.record_input(net.clone(), net.clone());
        trace.record_output(net.clone(), second.clone());
        let mut k = Knowledge::new(&c.spec, 8);
        k.observe(&c.spec, second.clone());

        let witness = check_query(&c.spec, &Query::Secrecy(s_e), &trace, &k).unwrap();
        assert_eq!(witness.culprit, Culprit::Leaked(second));
        assert_eq!(witness.len(), 2);
    }

    #[test]
    fn attacker_hypothesis_needs_an_earlier_event() {
        let mut ev = events();
        let bs = ev.spec.bitstring();
        let net = Term::free(ev.spec.add_channel("net", true));
        let secret = ev.spec.add_free("secret", bs, false);
        let leaked = ev.spec.add_event("leaked", &[]);
        let secret_e = ev.spec.free_expr(secret);
        let query = Query::Correspondence {
            hypothesis: Hypothesis::Attacker(secret_e),
            required: vec![EventPattern::new(leaked, vec![])],
            injective: false,
        };

        let mut late = Trace::new();
        late.record_output(net.clone(), Term::free(secret));
        late.record_event(leaked, vec![]);
        let mut k = Knowledge::new(&ev.spec, 8);
        k.observe(&ev.spec, Term::free(secret));
        let witness = check_query(&ev.spec, &query, &late, &k).unwrap();
        assert_eq!(
            witness.culprit,
            Culprit::Derived {
                term: Term::free(secret),
                position: 1
            }
        );

        let mut early = Trace::new();
        early.record_event(leaked, vec![]);
        early.record_output(net, Term::free(secret));
        assert_eq!(check_query(&ev.spec, &query, &early, &k), None);
    }

    #[test]
    fn evaluator_aggregates_traces() {
        let mut ev = events();
        let query = end_implies_begin(&mut ev, false);
        let q = ev.spec.add_query("auth", query);
        let x_e = ev.spec.var_expr(ev.x);
        let secret = ev.spec.add_query("secret", Query::Secrecy(x_e));
        let k = Knowledge::new(&ev.spec, 8);

        let mut good = Trace::new();
        good.record_event(ev.begin, vec![ev.a.clone()]);
        good.record_event(ev.end, vec![ev.a.clone()]);

        let mut short = Trace::new();
        short.record_event(ev.end, vec![ev.a.clone()]);
        let mut long = Trace::new();
        long.record_event(ev.begin, vec![ev.b.clone()]);
        long.record_event(ev.end, vec![ev.a.clone()]);

        let mut left = QueryEvaluator::new(&ev.spec);
        left.check_trace(&good, &k, &[Bound::Steps]);
        left.check_trace(&long, &k, &[]);
        let mut right = QueryEvaluator::new(&ev.spec);
        right.check_trace(&short, &k, &[]);
        assert!(!right.all_violated());
        left.merge(right);

        let verdicts = left.finish();
        assert_eq!(verdicts[0].0, q);
        assert_eq!(verdicts[0].1.witness().map(Witness::len), Some(1));
        assert_eq!(verdicts[1].0, secret);
        assert_eq!(verdicts[1].1, Verdict::InconclusiveAtBound(Bound::Steps));
    }

    #[test]
    fn untouched_queries_hold() {
        let mut ev = events();
        let query = end_implies_begin(&mut ev, true);
        ev.spec.add_query("auth", query);
        let mut evaluator = QueryEvaluator::new(&ev.spec);
        evaluator.check_trace(&Trace::new(), &Knowledge::new(&ev.spec, 8), &[]);
        assert!(evaluator.finish()[0].1.holds());
    }
}
