// Copyright 2024 Cornell University
// released under MIT License

use crate::ir::*;
use crate::knowledge::Knowledge;
use crate::term::Term;

/// One fired action, as it appears in a trace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Output on a channel the attacker knows; the message is observed
    Output { channel: Term, message: Term },
    /// Message supplied by the attacker to an input on a known channel
    Input { channel: Term, message: Term },
    /// Synchronous hand-over on a private channel
    Comm { channel: Term, message: Term },
    Event { event: EventId, args: Vec<Term> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventOccurrence {
    pub event: EventId,
    pub args: Vec<Term>,
    /// Index of the step that emitted the event
    pub position: usize,
}

/// Everything recorded along one run. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Trace {
    steps: Vec<Step>,
    events: Vec<EventOccurrence>,
    /// Messages handed to the attacker, with the index of their step
    observed: Vec<(usize, Term)>,
    /// Names generated by restrictions, in generation order
    fresh: Vec<(VarId, Term)>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn events(&self) -> &[EventOccurrence] {
        &self.events
    }

    pub fn observed(&self) -> &[(usize, Term)] {
        &self.observed
    }

    pub fn fresh(&self) -> &[(VarId, Term)] {
        &self.fresh
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn record_output(&mut self, channel: Term, message: Term) {
        self.observed.push((self.steps.len(), message.clone()));
        self.steps.push(Step::Output { channel, message });
    }

    pub fn record_input(&mut self, channel: Term, message: Term) {
        self.steps.push(Step::Input { channel, message });
    }

    pub fn record_comm(&mut self, channel: Term, message: Term) {
        self.steps.push(Step::Comm { channel, message });
    }

    pub fn record_event(&mut self, event: EventId, args: Vec<Term>) {
        self.events.push(EventOccurrence {
            event,
            args: args.clone(),
            position: self.steps.len(),
        });
        self.steps.push(Step::Event { event, args });
    }

    /// Returns false if the name was already generated in this trace
    pub fn record_fresh(&mut self, var: VarId, name: Term) -> bool {
        if self.fresh.iter().any(|(_, n)| *n == name) {
            return false;
        }
        self.fresh.push((var, name));
        true
    }

    /// The names generated by the restriction of `var`
    pub fn fresh_of(&self, var: VarId) -> impl Iterator<Item = &Term> {
        self.fresh
            .iter()
            .filter(move |(v, _)| *v == var)
            .map(|(_, n)| n)
    }

    /// Replays the observed messages and returns the number of steps after
    /// which `term` became derivable (0 if the attacker knew it up front).
    pub fn derivable_after(
        &self,
        spec: &Specification,
        term: &Term,
        knowledge_depth: usize,
    ) -> Option<usize> {
        let mut knowledge = Knowledge::new(spec, knowledge_depth);
        if knowledge.derivable(spec, term) {
            return Some(0);
        }
        for (position, message) in &self.observed {
            knowledge.observe(spec, message.clone());
            if knowledge.derivable(spec, term) {
                return Some(position + 1);
            }
        }
        None
    }

    pub fn prefix(&self, len: usize) -> Vec<Step> {
        self.steps[..len.min(self.steps.len())].to_vec()
    }
}

/// Why a trace violates a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Culprit {
    /// The secret, as instantiated in this trace, became derivable
    Leaked(Term),
    /// A trigger occurrence with no (distinct, for injective queries)
    /// matching required occurrence at or before it
    Unmatched(EventOccurrence),
    /// The attacker derived the hypothesis term without a matching required
    /// event in the first `position` steps
    Derived { term: Term, position: usize },
}

/// A counterexample: the trace prefix up to the violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    pub steps: Vec<Step>,
    pub culprit: Culprit,
}

impl Witness {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::tests::crypto;

    #[test]
    fn positions_follow_steps() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = Term::free(c.spec.add_channel("net", true));
        let a = Term::free(c.spec.add_free("a", bs, false));
        let ev = c.spec.add_event("got", &[bs]);

        let mut trace = Trace::new();
        trace.record_input(net.clone(), a.clone());
        trace.record_event(ev, vec![a.clone()]);
        trace.record_output(net.clone(), a.clone());
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.events()[0].position, 1);
        assert_eq!(trace.observed(), &[(2, a)]);
        assert_eq!(trace.prefix(2).len(), 2);
        assert_eq!(trace.prefix(10).len(), 3);
    }

    #[test]
    fn fresh_names_are_unique() {
        let mut c = crypto();
        let k = c.spec.add_var("k", c.key);
        let mut trace = Trace::new();
        let name = Term::Name(crate::term::Name::Fresh(k, 1));
        assert!(trace.record_fresh(k, name.clone()));
        assert!(!trace.record_fresh(k, name.clone()));
        assert_eq!(trace.fresh_of(k).collect::<Vec<_>>(), vec![&name]);
    }

    #[test]
    fn derivability_is_replayed() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = Term::free(c.spec.add_channel("net", true));
        let m = Term::free(c.spec.add_free("m0", bs, false));
        let key = Term::free(c.spec.add_free("k0", c.key, false));
        let n = Term::free(c.spec.add_free("n0", c.nonce, true));
        let ct = Term::app(c.enc, vec![m.clone(), key.clone(), n]);

        let mut trace = Trace::new();
        trace.record_output(net.clone(), ct);
        trace.record_input(net.clone(), net.clone());
        trace.record_output(net.clone(), key);
        assert_eq!(trace.derivable_after(&c.spec, &m, 8), Some(3));
        assert_eq!(trace.derivable_after(&c.spec, &net, 8), Some(0));
    }
}
