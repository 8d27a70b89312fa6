// Copyright 2024 Cornell University
// released under MIT License

use log::debug;

use crate::errors::InvariantViolation;
use crate::ir::*;
use crate::knowledge::Knowledge;
use crate::serialize::{serialize_process_head, serialize_term};
use crate::synthesis::{synthesize, Synthesis};
use crate::term::{Bindings, Name, Term};

/// A live process: the node it is about to execute and its variable environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instance {
    pub proc: ProcId,
    pub env: Bindings,
}

impl Instance {
    pub fn new(proc: ProcId, env: Bindings) -> Self {
        Self { proc, env }
    }
}

/// What an instance can do next, before any input message is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// A deterministic local reduction (`new`, `let`, `if`, `|`, calls, `0`)
    Silent,
    /// A `!P` waiting to be unfolded by the scheduler
    Replicate(ProcId),
    /// Destructor failure or a failed guard: the branch ends here
    Dead,
    Output { channel: Term, message: Term },
    Input { channel: Term },
    Event { event: EventId, args: Vec<Term> },
}

/// One candidate next step of a single instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Silent,
    Unfold,
    Output { channel: Term, message: Term },
    Input { channel: Term, message: Term },
    Event { event: EventId, args: Vec<Term> },
}

/// Effect of applying an action to an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stepped {
    /// Instances replacing the one that stepped (none when it stopped)
    pub continuation: Vec<Instance>,
    /// Name generated by a restriction
    pub fresh: Option<(VarId, Term)>,
}

impl Stepped {
    fn to(continuation: Vec<Instance>) -> Self {
        Self {
            continuation,
            fresh: None,
        }
    }

    fn stop() -> Self {
        Self::to(Vec::new())
    }
}

/// Source of restriction names, unique within one run
pub trait FreshSupply {
    fn next_fresh(&mut self, var: VarId) -> Term;
}

/// Single-step semantics of the process calculus
pub struct Interpreter<'a> {
    spec: &'a Specification,
    replication_bound: u32,
    injection_depth: usize,
    event_mode: Option<EventMode>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        spec: &'a Specification,
        replication_bound: u32,
        injection_depth: usize,
        event_mode: Option<EventMode>,
    ) -> Self {
        Self {
            spec,
            replication_bound,
            injection_depth,
            event_mode,
        }
    }

    pub fn spec(&self) -> &'a Specification {
        self.spec
    }

    pub fn replication_bound(&self) -> u32 {
        self.replication_bound
    }

    fn effective_mode(&self, stmt: &EventStmt) -> EventMode {
        self.event_mode.unwrap_or(stmt.mode)
    }

    pub fn head(&self, inst: &Instance) -> Head {
        let spec = self.spec;
        match &spec[inst.proc] {
            Process::Stop
            | Process::Parallel(_, _)
            | Process::Restrict(_, _)
            | Process::Let(_, _, _, _)
            | Process::If(_, _, _)
            | Process::Call(_, _) => Head::Silent,
            Process::Replicate(body) => Head::Replicate(*body),
            Process::Output(channel, message, _) => {
                match (spec.eval(*channel, &inst.env), spec.eval(*message, &inst.env)) {
                    (Some(channel), Some(message)) => Head::Output { channel, message },
                    _ => Head::Dead,
                }
            }
            Process::Input(channel, _, _) => match spec.eval(*channel, &inst.env) {
                Some(channel) => Head::Input { channel },
                None => Head::Dead,
            },
            Process::Event(stmt, _) => {
                if self.effective_mode(stmt) == EventMode::Verify {
                    if let Some(guard) = &stmt.guard {
                        if spec.eval_cond(guard, &inst.env) != Some(true) {
                            return Head::Dead;
                        }
                    }
                }
                let args = stmt
                    .args
                    .iter()
                    .map(|a| spec.eval(*a, &inst.env))
                    .collect::<Option<Vec<_>>>();
                match args {
                    Some(args) => Head::Event {
                        event: stmt.event,
                        args,
                    },
                    None => Head::Dead,
                }
            }
        }
    }

    /// Candidate next steps of one instance. Inputs on channels the attacker
    /// knows are offered once per message the attacker can synthesise for
    /// the pattern; inputs on private channels need a peer output and are
    /// paired up by the scheduler, so they do not show up here.
    pub fn enabled_actions(&self, inst: &Instance, knowledge: &Knowledge) -> Vec<Action> {
        match self.head(inst) {
            Head::Silent => vec![Action::Silent],
            Head::Replicate(_) => vec![Action::Unfold],
            Head::Dead => Vec::new(),
            Head::Output { channel, message } => vec![Action::Output { channel, message }],
            Head::Event { event, args } => vec![Action::Event { event, args }],
            Head::Input { channel } => {
                if !knowledge.derivable(self.spec, &channel) {
                    return Vec::new();
                }
                self.input_messages(inst, knowledge)
                    .messages
                    .into_iter()
                    .map(|message| Action::Input {
                        channel: channel.clone(),
                        message,
                    })
                    .collect()
            }
        }
    }

    /// Messages the attacker offers to the input `inst` is blocked on: the
    /// generic candidates up to `injection_depth`, then the messages aimed
    /// at the checks that follow the input
    pub fn input_messages(&self, inst: &Instance, knowledge: &Knowledge) -> Synthesis {
        let Process::Input(_, pattern, cont) = &self.spec[inst.proc] else {
            return Synthesis::default();
        };
        let mut messages =
            knowledge.candidates(self.spec, pattern, &inst.env, self.injection_depth);
        let aimed = synthesize(
            self.spec,
            knowledge,
            self.event_mode,
            pattern,
            &inst.env,
            *cont,
        );
        for message in aimed.messages {
            if !messages.contains(&message) {
                messages.push(message);
            }
        }
        Synthesis {
            messages,
            capped: aimed.capped,
        }
    }

    /// Applies one action. `Ok(None)` means the action is not an alternative
    /// for this instance after all (an input message that does not match).
    pub fn step(
        &self,
        inst: &Instance,
        action: &Action,
        fresh: &mut impl FreshSupply,
    ) -> Result<Option<Stepped>, InvariantViolation> {
        let spec = self.spec;
        let env = &inst.env;
        let same_env = |p: ProcId| Instance::new(p, env.clone());

        let stepped = match (&spec[inst.proc], action) {
            (Process::Stop, Action::Silent) => Stepped::stop(),
            (Process::Parallel(p, q), Action::Silent) => {
                Stepped::to(vec![same_env(*p), same_env(*q)])
            }
            (Process::Restrict(var, p), Action::Silent) => {
                let name = fresh.next_fresh(*var);
                let mut env = env.clone();
                env.insert(*var, name.clone());
                Stepped {
                    continuation: vec![Instance::new(*p, env)],
                    fresh: Some((*var, name)),
                }
            }
            (Process::Let(pattern, expr, then, otherwise), Action::Silent) => {
                let bound = spec
                    .eval(*expr, env)
                    .and_then(|value| spec.match_pattern(pattern, &value, env.clone()));
                match bound {
                    Some(env) => Stepped::to(vec![Instance::new(*then, env)]),
                    None => Stepped::to(vec![same_env(*otherwise)]),
                }
            }
            (Process::If(cond, then, otherwise), Action::Silent) => {
                match spec.eval_cond(cond, env) {
                    Some(true) => Stepped::to(vec![same_env(*then)]),
                    Some(false) => Stepped::to(vec![same_env(*otherwise)]),
                    None => Stepped::stop(),
                }
            }
            (Process::Call(def, args), Action::Silent) => {
                let def = &spec[*def];
                let values = args
                    .iter()
                    .map(|a| spec.eval(*a, env))
                    .collect::<Option<Vec<_>>>();
                match values {
                    Some(values) => {
                        let env: Bindings = def.params().iter().copied().zip(values).collect();
                        Stepped::to(vec![Instance::new(def.body(), env)])
                    }
                    None => Stepped::stop(),
                }
            }
            (Process::Replicate(body), Action::Unfold) => {
                let copies = (0..self.replication_bound).map(|_| same_env(*body)).collect();
                Stepped::to(copies)
            }
            (Process::Output(_, _, cont), Action::Output { .. }) => {
                Stepped::to(vec![same_env(*cont)])
            }
            (Process::Input(_, pattern, cont), Action::Input { message, .. }) => {
                match spec.match_pattern(pattern, message, env.clone()) {
                    Some(env) => Stepped::to(vec![Instance::new(*cont, env)]),
                    None => {
                        debug!(
                            "  message {} rejected by `{}`",
                            serialize_term(spec, message),
                            serialize_process_head(spec, inst.proc)
                        );
                        return Ok(None);
                    }
                }
            }
            (Process::Event(_, cont), Action::Event { .. }) => Stepped::to(vec![same_env(*cont)]),
            (_, action) => {
                return Err(InvariantViolation::ActionMismatch {
                    action: format!("{action:?}"),
                    process: serialize_process_head(spec, inst.proc),
                })
            }
        };
        Ok(Some(stepped))
    }
}

/// Fresh names numbered by a per-run counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Counter(pub u32);

impl FreshSupply for Counter {
    fn next_fresh(&mut self, var: VarId) -> Term {
        self.0 += 1;
        Term::Name(Name::Fresh(var, self.0))
    }
}
