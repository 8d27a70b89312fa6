// Copyright 2024 Cornell University
// released under MIT License

//! Exploration of the interleavings of a specification.
//!
//! Every state is normalised first: deterministic local reductions, outputs
//! on channels the attacker knows and events no query needs as a partner
//! fire eagerly, since running them earlier never hides a violation. What is
//! left are the scheduling points (attacker inputs, private hand-overs and
//! required events), which are explored depth first from an explicit stack
//! of frames.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::config::{Config, Strategy};
use crate::errors::InvariantViolation;
use crate::interpreter::{Action, Counter, Head, Instance, Interpreter, Stepped};
use crate::ir::*;
use crate::knowledge::Knowledge;
use crate::query::{Bound, QueryEvaluator};
use crate::serialize::{serialize_process_head, serialize_step, serialize_term};
use crate::term::{Bindings, Term};
use crate::trace::{EventOccurrence, Step, Trace};

/// One run in progress: the live processes, what the attacker knows and
/// what happened so far
#[derive(Debug, Clone)]
pub struct RunState {
    instances: Vec<Instance>,
    knowledge: Knowledge,
    trace: Trace,
    counter: Counter,
    /// Scheduler choices made so far
    depth: usize,
    /// Some `!P` was unfolded into its bounded number of copies
    replicated: bool,
    /// Input synthesis ran out of budget somewhere on the way here
    injection_capped: bool,
}

impl RunState {
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn key(&self) -> StateKey {
        StateKey {
            instances: self.instances.clone(),
            events: self.trace.events().to_vec(),
            observed: self.trace.observed().to_vec(),
            fresh: self.trace.fresh().to_vec(),
        }
    }

    /// Replaces the instance at `index` by its continuation
    fn replace(&mut self, index: usize, stepped: Stepped) -> Result<(), InvariantViolation> {
        self.instances.swap_remove(index);
        self.absorb(stepped)
    }

    fn absorb(&mut self, stepped: Stepped) -> Result<(), InvariantViolation> {
        if let Some((var, name)) = stepped.fresh {
            if !self.trace.record_fresh(var, name.clone()) {
                return Err(InvariantViolation::NameCollision {
                    name: format!("{name:?}"),
                });
            }
        }
        self.instances.extend(stepped.continuation);
        Ok(())
    }

    fn instance(&self, index: usize) -> Result<&Instance, InvariantViolation> {
        self.instances
            .get(index)
            .ok_or(InvariantViolation::MissingInstance {
                index,
                len: self.instances.len(),
            })
    }
}

/// Canonical identity of a state. Attacker knowledge is a function of the
/// observed messages and therefore not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    instances: Vec<Instance>,
    events: Vec<EventOccurrence>,
    observed: Vec<(usize, Term)>,
    fresh: Vec<(VarId, Term)>,
}

/// The scheduling decisions of a normalised state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Choices {
    pub list: Vec<Choice>,
    /// Some attacker input was offered fewer messages than it could receive
    pub capped: bool,
}

/// A scheduling decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Fire an attacker input or a required event of one instance
    Fire { index: usize, action: Action },
    /// Hand `message` from the output of `sender` to the input of
    /// `receiver` over a private channel
    Comm {
        sender: usize,
        receiver: usize,
        channel: Term,
        message: Term,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Distinct states entered
    pub states: usize,
    /// Traces handed to the query evaluator
    pub traces: usize,
    pub max_depth_reached: usize,
    /// Successor states skipped because they had been explored before
    pub deduplicated: usize,
}

impl Stats {
    fn merge(&mut self, other: Stats) {
        self.states += other.states;
        self.traces += other.traces;
        self.max_depth_reached = self.max_depth_reached.max(other.max_depth_reached);
        self.deduplicated += other.deduplicated;
    }
}

/// Result of exploring (part of) the state space
#[derive(Debug, Clone)]
pub struct Exploration<'a> {
    pub evaluator: QueryEvaluator<'a>,
    pub stats: Stats,
}

impl<'a> Exploration<'a> {
    fn merge(&mut self, other: Exploration<'a>) {
        self.evaluator.merge(other.evaluator);
        self.stats.merge(other.stats);
    }
}

/// A DFS stack entry: a state and the next of its choices to try
struct Frame {
    state: RunState,
    choices: Vec<Choice>,
    next: usize,
    /// At least one choice produced a successor
    progressed: bool,
}

/// Per-worker mutable exploration state
struct Worker<'a> {
    evaluator: QueryEvaluator<'a>,
    stats: Stats,
    visited: FxHashSet<StateKey>,
    rng: Option<(StdRng, usize)>,
    out_of_states: bool,
}

pub struct Scheduler<'a> {
    interp: Interpreter<'a>,
    config: &'a Config,
    /// Events that some correspondence needs as a partner. They stay
    /// scheduling points; every other event fires as soon as it is reached.
    required: FxHashSet<EventId>,
}

impl<'a> Scheduler<'a> {
    pub fn new(spec: &'a Specification, config: &'a Config) -> Self {
        let interp = Interpreter::new(
            spec,
            config.replication_bound,
            config.injection_depth,
            config.event_mode,
        );
        let required = spec
            .queries()
            .flat_map(|(_, decl)| match decl.query() {
                Query::Correspondence { required, .. } => {
                    required.iter().map(|p| p.event).collect::<Vec<_>>()
                }
                Query::Secrecy(_) => Vec::new(),
            })
            .collect();
        Self {
            interp,
            config,
            required,
        }
    }

    fn spec(&self) -> &'a Specification {
        self.interp.spec()
    }

    pub fn initial_state(&self) -> Result<RunState, InvariantViolation> {
        let spec = self.spec();
        let mut state = RunState {
            instances: vec![Instance::new(spec.main, Bindings::new())],
            knowledge: Knowledge::new(spec, self.config.knowledge_depth),
            trace: Trace::new(),
            counter: Counter::default(),
            depth: 0,
            replicated: false,
            injection_capped: false,
        };
        self.normalize(&mut state)?;
        Ok(state)
    }

    /// The step an instance takes without a scheduling decision, if any
    fn eager_action(&self, state: &mut RunState, head: Head) -> Option<Action> {
        let spec = self.spec();
        match head {
            Head::Silent => Some(Action::Silent),
            Head::Replicate(_) => {
                state.replicated = true;
                Some(Action::Unfold)
            }
            Head::Output { channel, message } if state.knowledge.derivable(spec, &channel) => {
                state.trace.record_output(channel.clone(), message.clone());
                state.knowledge.observe(spec, message.clone());
                Some(Action::Output { channel, message })
            }
            Head::Event { event, args } if !self.required.contains(&event) => {
                state.trace.record_event(event, args.clone());
                Some(Action::Event { event, args })
            }
            Head::Dead | Head::Output { .. } | Head::Input { .. } | Head::Event { .. } => None,
        }
    }

    /// Fires eager steps until only scheduling points are left, then
    /// orders the instances canonically
    pub fn normalize(&self, state: &mut RunState) -> Result<(), InvariantViolation> {
        loop {
            let mut progressed = false;
            let mut index = 0;
            while index < state.instances.len() {
                let head = self.interp.head(&state.instances[index]);
                if head == Head::Dead {
                    state.instances.swap_remove(index);
                    progressed = true;
                    continue;
                }
                let Some(action) = self.eager_action(state, head) else {
                    index += 1;
                    continue;
                };
                let inst = state.instances[index].clone();
                let stepped = self
                    .interp
                    .step(&inst, &action, &mut state.counter)?
                    .ok_or_else(|| InvariantViolation::ActionMismatch {
                        action: format!("{action:?}"),
                        process: serialize_process_head(self.spec(), inst.proc),
                    })?;
                state.replace(index, stepped)?;
                progressed = true;
            }
            // an output may have leaked a private channel, which turns
            // blocked outputs on it into eager ones
            if !progressed {
                break;
            }
        }
        state.instances.sort();
        Ok(())
    }

    /// The scheduling decisions available in a normalised state. Identical
    /// instances are interchangeable, so only the first of a run of equal
    /// instances is offered.
    pub fn choices(&self, state: &RunState) -> Choices {
        let spec = self.spec();
        let heads: Vec<Head> = state.instances.iter().map(|i| self.interp.head(i)).collect();
        let representative =
            |i: usize| i == 0 || state.instances[i - 1] != state.instances[i];

        let mut out = Vec::new();
        let mut capped = false;
        for (index, head) in heads.iter().enumerate() {
            if !representative(index) {
                continue;
            }
            match head {
                Head::Input { channel } if state.knowledge.derivable(spec, channel) => {
                    let offered = self
                        .interp
                        .input_messages(&state.instances[index], &state.knowledge);
                    capped |= offered.capped;
                    out.extend(offered.messages.into_iter().map(|message| Choice::Fire {
                        index,
                        action: Action::Input {
                            channel: channel.clone(),
                            message,
                        },
                    }));
                }
                Head::Input { channel } => {
                    for (sender, other) in heads.iter().enumerate() {
                        match other {
                            Head::Output { channel: c, message }
                                if c == channel && representative(sender) =>
                            {
                                out.push(Choice::Comm {
                                    sender,
                                    receiver: index,
                                    channel: channel.clone(),
                                    message: message.clone(),
                                })
                            }
                            _ => {}
                        }
                    }
                }
                Head::Event { event, args } => out.push(Choice::Fire {
                    index,
                    action: Action::Event {
                        event: *event,
                        args: args.clone(),
                    },
                }),
                _ => {}
            }
        }
        Choices { list: out, capped }
    }

    /// Applies a choice to a copy of `state`. `Ok(None)` when the chosen
    /// message is rejected by the receiving pattern.
    pub fn apply_choice(
        &self,
        state: &RunState,
        choice: &Choice,
    ) -> Result<Option<RunState>, InvariantViolation> {
        let mut next = state.clone();
        next.depth += 1;
        match choice {
            Choice::Fire { index, action } => {
                let inst = next.instance(*index)?.clone();
                let Some(stepped) = self.interp.step(&inst, action, &mut next.counter)? else {
                    return Ok(None);
                };
                match action {
                    Action::Input { channel, message } => {
                        next.trace.record_input(channel.clone(), message.clone())
                    }
                    Action::Event { event, args } => next.trace.record_event(*event, args.clone()),
                    _ => {}
                }
                next.replace(*index, stepped)?;
            }
            Choice::Comm {
                sender,
                receiver,
                channel,
                message,
            } => {
                let receiving = next.instance(*receiver)?.clone();
                let sending = next.instance(*sender)?.clone();
                let input = Action::Input {
                    channel: channel.clone(),
                    message: message.clone(),
                };
                let Some(received) = self.interp.step(&receiving, &input, &mut next.counter)?
                else {
                    return Ok(None);
                };
                let output = Action::Output {
                    channel: channel.clone(),
                    message: message.clone(),
                };
                let sent = self
                    .interp
                    .step(&sending, &output, &mut next.counter)?
                    .ok_or_else(|| InvariantViolation::ActionMismatch {
                        action: format!("{output:?}"),
                        process: serialize_process_head(self.spec(), sending.proc),
                    })?;
                next.trace.record_comm(channel.clone(), message.clone());
                next.instances.swap_remove((*sender).max(*receiver));
                next.instances.swap_remove((*sender).min(*receiver));
                next.absorb(received)?;
                next.absorb(sent)?;
            }
        }
        if let Some(step) = next.trace.steps().last() {
            debug!("[{}] {}", next.depth, describe(self.spec(), step));
        }
        self.normalize(&mut next)?;
        Ok(Some(next))
    }

    /// Explores every run from the initial state, on the calling thread or
    /// split across `workers` rayon threads
    pub fn explore(&self) -> Result<Exploration<'a>, InvariantViolation> {
        let stop = AtomicBool::new(false);
        let root = self.initial_state()?;
        let workers = self.config.workers.max(1);
        if workers == 1 {
            return self.run_worker(vec![root], &stop, 0);
        }
        if let Strategy::Sampled { .. } = self.config.strategy {
            debug!("sampled exploration runs on a single worker");
            return self.run_worker(vec![root], &stop, 0);
        }

        let frontier = self.split(root, workers * 4)?;
        let mut chunks: Vec<Vec<RunState>> = vec![Vec::new(); workers];
        for (i, state) in frontier.into_iter().enumerate() {
            chunks[i % workers].push(state);
        }
        info!(
            "exploring {} subtree(s) on {} workers",
            chunks.iter().map(Vec::len).sum::<usize>(),
            workers
        );

        let run = || {
            chunks
                .into_par_iter()
                .enumerate()
                .map(|(i, chunk)| self.run_worker(chunk, &stop, i as u64))
                .collect::<Vec<_>>()
        };
        let results = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                debug!("could not build a pool of {workers} threads ({e}), using the global pool");
                run()
            }
        };

        let mut merged: Option<Exploration<'a>> = None;
        for result in results {
            let part = result?;
            match &mut merged {
                Some(acc) => acc.merge(part),
                None => merged = Some(part),
            }
        }
        match merged {
            Some(exploration) => Ok(exploration),
            None => self.run_worker(Vec::new(), &stop, 0),
        }
    }

    /// Breadth-first expansion until the frontier has `target` states or
    /// nothing can be expanded any more. States without successors stay in
    /// the frontier so a worker evaluates them.
    fn split(&self, root: RunState, target: usize) -> Result<Vec<RunState>, InvariantViolation> {
        let mut frontier = vec![root];
        while frontier.len() < target {
            let mut next = Vec::new();
            let mut expanded = false;
            for mut state in frontier {
                if state.depth >= self.config.max_depth {
                    next.push(state);
                    continue;
                }
                let choices = self.choices(&state);
                state.injection_capped |= choices.capped;
                let mut children = Vec::new();
                for choice in &choices.list {
                    if let Some(child) = self.apply_choice(&state, choice)? {
                        children.push(child);
                    }
                }
                if children.is_empty() {
                    next.push(state);
                } else {
                    expanded = true;
                    next.extend(children);
                }
            }
            frontier = next;
            if !expanded {
                break;
            }
        }
        Ok(frontier)
    }

    fn run_worker(
        &self,
        roots: Vec<RunState>,
        stop: &AtomicBool,
        worker: u64,
    ) -> Result<Exploration<'a>, InvariantViolation> {
        let rng = match self.config.strategy {
            Strategy::Exhaustive => None,
            Strategy::Sampled { seed, width } => {
                Some((StdRng::seed_from_u64(seed.wrapping_add(worker)), width.max(1)))
            }
        };
        let mut w = Worker {
            evaluator: QueryEvaluator::new(self.spec()),
            stats: Stats::default(),
            visited: FxHashSet::default(),
            rng,
            out_of_states: false,
        };

        let mut stack: Vec<Frame> = Vec::new();
        for root in roots {
            if stop.load(Ordering::Relaxed) || w.out_of_states {
                break;
            }
            if let Some(frame) = self.enter(root, &mut w, stop) {
                stack.push(frame);
            }
            while let Some(frame) = stack.last_mut() {
                if stop.load(Ordering::Relaxed) || w.out_of_states {
                    break;
                }
                if frame.next == frame.choices.len() {
                    if let Some(done) = stack.pop() {
                        if !done.progressed {
                            self.finish_trace(&done.state, &[], &mut w, stop);
                        }
                    }
                    continue;
                }
                let choice = frame.choices[frame.next].clone();
                frame.next += 1;
                let Some(child) = self.apply_choice(&frame.state, &choice)? else {
                    continue;
                };
                frame.progressed = true;
                if let Some(child_frame) = self.enter(child, &mut w, stop) {
                    stack.push(child_frame);
                }
            }
            stack.clear();
        }

        Ok(Exploration {
            evaluator: w.evaluator,
            stats: w.stats,
        })
    }

    /// Registers a new state. Returns a frame if it has choices left to
    /// explore; finished traces are evaluated right away.
    fn enter(&self, mut state: RunState, w: &mut Worker<'a>, stop: &AtomicBool) -> Option<Frame> {
        if w.stats.states >= self.config.max_states {
            if !w.out_of_states {
                info!("reached the limit of {} states", self.config.max_states);
                w.evaluator.note_bound(Bound::States);
                w.out_of_states = true;
            }
            return None;
        }
        if !w.visited.insert(state.key()) {
            w.stats.deduplicated += 1;
            return None;
        }
        w.stats.states += 1;
        w.stats.max_depth_reached = w.stats.max_depth_reached.max(state.depth);

        let Choices {
            list: mut choices,
            capped,
        } = self.choices(&state);
        state.injection_capped |= capped;
        if choices.is_empty() {
            self.finish_trace(&state, &[], w, stop);
            return None;
        }
        if state.depth >= self.config.max_depth {
            self.finish_trace(&state, &[Bound::Steps], w, stop);
            return None;
        }
        if let Some((rng, width)) = &mut w.rng {
            if choices.len() > *width {
                choices.shuffle(rng);
                choices.truncate(*width);
                w.evaluator.note_bound(Bound::Width);
            }
        }
        Some(Frame {
            state,
            choices,
            next: 0,
            progressed: false,
        })
    }

    fn finish_trace(
        &self,
        state: &RunState,
        bounds: &[Bound],
        w: &mut Worker<'a>,
        stop: &AtomicBool,
    ) {
        let mut bounds = bounds.to_vec();
        if state.injection_capped {
            bounds.push(Bound::Injection);
        }
        if state.replicated {
            bounds.push(Bound::Replication);
        }
        if state.knowledge.is_truncated() {
            bounds.push(Bound::TermDepth);
        }
        debug!(
            "trace of {} step(s) finished, {} live process(es)",
            state.trace.len(),
            state.instances.len()
        );
        w.evaluator.check_trace(&state.trace, &state.knowledge, &bounds);
        w.stats.traces += 1;
        if self.config.stop_at_first_violation && w.evaluator.all_violated() {
            info!("every query is violated, stopping exploration");
            stop.store(true, Ordering::Relaxed);
        }
    }
}

fn describe(spec: &Specification, step: &Step) -> String {
    match step {
        Step::Input { message, .. } => format!(
            "{} (attacker supplies {})",
            serialize_step(spec, step),
            serialize_term(spec, message)
        ),
        _ => serialize_step(spec, step),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Verdict;
    use crate::term::tests::crypto;

    fn verdicts(spec: &Specification, config: &Config) -> (Vec<Verdict>, Stats) {
        let scheduler = Scheduler::new(spec, config);
        let exploration = scheduler.explore().unwrap();
        let verdicts = exploration
            .evaluator
            .finish()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        (verdicts, exploration.stats)
    }

    #[test]
    fn private_handover_keeps_secret() {
        // out(c, s) | in(c, x); out(net, hash(x))
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let chan = c.spec.add_channel("c", false);
        let net = c.spec.add_channel("net", true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let (chan_e, net_e, s_e, x_e) = (
            c.spec.free_expr(chan),
            c.spec.free_expr(net),
            c.spec.free_expr(s),
            c.spec.var_expr(x),
        );
        let h = c.spec.app(c.hash, vec![x_e]);
        let stop = c.spec.proc_stop();
        let sender = c.spec.p(Process::Output(chan_e, s_e, stop));
        let publish = c.spec.p(Process::Output(net_e, h, stop));
        let receiver = c.spec.p(Process::Input(chan_e, Pattern::Bind(x), publish));
        c.spec.main = c.spec.parallel(vec![sender, receiver]);
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default();
        let scheduler = Scheduler::new(&c.spec, &config);
        let root = scheduler.initial_state().unwrap();
        let choices = scheduler.choices(&root).list;
        assert!(matches!(choices.as_slice(), [Choice::Comm { .. }]));
        let next = scheduler.apply_choice(&root, &choices[0]).unwrap().unwrap();
        // the hash was published eagerly after the hand-over
        assert_eq!(next.trace().len(), 2);
        assert!(next.instances().is_empty());

        let (verdicts, stats) = verdicts(&c.spec, &config);
        assert_eq!(verdicts, vec![Verdict::Holds]);
        assert_eq!(stats.traces, 1);
    }

    #[test]
    fn public_output_is_observed_eagerly() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let s = c.spec.add_free("s", bs, false);
        let (net_e, s_e) = (c.spec.free_expr(net), c.spec.free_expr(s));
        let stop = c.spec.proc_stop();
        c.spec.main = c.spec.p(Process::Output(net_e, s_e, stop));
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default();
        let scheduler = Scheduler::new(&c.spec, &config);
        let root = scheduler.initial_state().unwrap();
        assert!(root.knowledge().contains(&Term::free(s)));
        let (verdicts, _) = verdicts(&c.spec, &config);
        assert_eq!(verdicts[0].witness().map(|w| w.len()), Some(1));
    }

    #[test]
    fn commuting_inputs_are_deduplicated() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let y = c.spec.add_var("y", c.key);
        let (net_e, s_e) = (c.spec.free_expr(net), c.spec.free_expr(s));
        let stop = c.spec.proc_stop();
        let left = c.spec.p(Process::Input(net_e, Pattern::Bind(x), stop));
        let right = c.spec.p(Process::Input(net_e, Pattern::Bind(y), stop));
        c.spec.main = c.spec.parallel(vec![left, right]);
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default().with_injection_depth(0);
        let (verdicts, stats) = verdicts(&c.spec, &config);
        assert_eq!(verdicts, vec![Verdict::Holds]);
        // both orders end in the same state
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.traces, 1);
        assert_eq!(stats.max_depth_reached, 2);
    }

    #[test]
    fn depth_limit_is_inconclusive() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let (net_e, s_e) = (c.spec.free_expr(net), c.spec.free_expr(s));
        let stop = c.spec.proc_stop();
        let second = c.spec.p(Process::Input(net_e, Pattern::Bind(x), stop));
        c.spec.main = c.spec.p(Process::Input(net_e, Pattern::Bind(x), second));
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default().with_max_depth(1).with_injection_depth(0);
        let (verdicts, _) = verdicts(&c.spec, &config);
        assert_eq!(verdicts, vec![Verdict::InconclusiveAtBound(Bound::Steps)]);
    }

    #[test]
    fn state_limit_is_inconclusive() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let (net_e, s_e) = (c.spec.free_expr(net), c.spec.free_expr(s));
        let stop = c.spec.proc_stop();
        c.spec.main = c.spec.p(Process::Input(net_e, Pattern::Bind(x), stop));
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default().with_max_states(1);
        let (verdicts, stats) = verdicts(&c.spec, &config);
        assert_eq!(stats.states, 1);
        assert_eq!(verdicts, vec![Verdict::InconclusiveAtBound(Bound::States)]);
    }

    #[test]
    fn capped_input_synthesis_is_inconclusive() {
        // in(net, x); if x = a then if x = a then ... (too long to walk)
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let a = c.spec.add_free("a", bs, true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let (net_e, a_e, s_e, x_e) = (
            c.spec.free_expr(net),
            c.spec.free_expr(a),
            c.spec.free_expr(s),
            c.spec.var_expr(x),
        );
        let stop = c.spec.proc_stop();
        let mut body = stop;
        for _ in 0..300 {
            body = c.spec.p(Process::If(Cond::Eq(x_e, a_e), body, stop));
        }
        c.spec.main = c.spec.p(Process::Input(net_e, Pattern::Bind(x), body));
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default().with_injection_depth(0);
        let scheduler = Scheduler::new(&c.spec, &config);
        let root = scheduler.initial_state().unwrap();
        assert!(scheduler.choices(&root).capped);
        let (verdicts, _) = verdicts(&c.spec, &config);
        assert_eq!(verdicts, vec![Verdict::InconclusiveAtBound(Bound::Injection)]);
    }

    #[test]
    fn sampling_reports_width() {
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let (net_e, s_e) = (c.spec.free_expr(net), c.spec.free_expr(s));
        let stop = c.spec.proc_stop();
        c.spec.main = c.spec.p(Process::Input(net_e, Pattern::Bind(x), stop));
        c.spec.add_query("s", Query::Secrecy(s_e));

        let config = Config::default().with_strategy(Strategy::Sampled { seed: 1, width: 1 });
        let (verdicts, stats) = verdicts(&c.spec, &config);
        assert_eq!(stats.traces, 1);
        assert_eq!(verdicts, vec![Verdict::InconclusiveAtBound(Bound::Width)]);
    }

    #[test]
    fn replication_unfolds_distinct_names() {
        // !(new k: key; out(net, pk(k)))
        let mut c = crypto();
        let net = c.spec.add_channel("net", true);
        let k = c.spec.add_var("k", c.key);
        let (net_e, k_e) = (c.spec.free_expr(net), c.spec.var_expr(k));
        let pk_e = c.spec.app(c.pk, vec![k_e]);
        let stop = c.spec.proc_stop();
        let out = c.spec.p(Process::Output(net_e, pk_e, stop));
        let body = c.spec.p(Process::Restrict(k, out));
        c.spec.main = c.spec.p(Process::Replicate(body));
        c.spec.add_query("k", Query::Secrecy(k_e));

        let config = Config::default().with_replication_bound(3);
        let scheduler = Scheduler::new(&c.spec, &config);
        let root = scheduler.initial_state().unwrap();
        assert_eq!(root.trace().fresh_of(k).count(), 3);
        assert_eq!(root.trace().observed().len(), 3);

        let (verdicts, _) = verdicts(&c.spec, &config);
        assert_eq!(verdicts, vec![Verdict::InconclusiveAtBound(Bound::Replication)]);
    }

    #[test]
    fn parallel_workers_agree_with_sequential() {
        // the attacker may answer a challenge with anything; a leak happens
        // only on one branch
        let mut c = crypto();
        let bs = c.spec.bitstring();
        let net = c.spec.add_channel("net", true);
        let a = c.spec.add_free("a", bs, true);
        let s = c.spec.add_free("s", bs, false);
        let x = c.spec.add_var("x", bs);
        let (net_e, a_e, s_e, x_e) = (
            c.spec.free_expr(net),
            c.spec.free_expr(a),
            c.spec.free_expr(s),
            c.spec.var_expr(x),
        );
        let h = c.spec.app(c.hash, vec![a_e]);
        let stop = c.spec.proc_stop();
        let leak = c.spec.p(Process::Output(net_e, s_e, stop));
        let check = c.spec.p(Process::If(Cond::Eq(x_e, h), leak, stop));
        let one = c.spec.p(Process::Input(net_e, Pattern::Bind(x), check));
        let two = c.spec.p(Process::Input(net_e, Pattern::Bind(x), check));
        c.spec.main = c.spec.parallel(vec![one, two]);
        c.spec.add_query("s", Query::Secrecy(s_e));

        let sequential = Config::default();
        let parallel = Config::default().with_workers(3);
        let (seq, seq_stats) = verdicts(&c.spec, &sequential);
        let (par, _) = verdicts(&c.spec, &parallel);
        assert!(seq[0].is_violated());
        assert_eq!(seq, par);
        assert!(seq_stats.deduplicated > 0);
    }
}
