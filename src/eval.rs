//! An explicit-continuation machine for checked definitions.
//!
//! The machine never recurses on the Rust stack per evaluated node. Pending work lives in a heap
//! allocated frame stack, the environment is a flat map of live bindings, and the targets `loop`
//! may jump to form a persistent linked list captured alongside every frame.

use std::{mem, rc::Rc};

use indexmap::IndexMap;
use log::trace;
use loom_ty::Name;

use crate::{
    error::RuntimeError,
    expr::{Definition, Expr, Match, Pattern, Step, Unfold},
    value::{Cont, Env, Value},
};

/// Limits applied to a single evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalConfig {
    /// Abort with [`RuntimeError::StepLimit`] after this many machine steps.
    pub step_limit: Option<u64>,
}

impl EvalConfig {
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }
}

/// What a run cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    pub steps: u64,
    /// The deepest the frame stack got.
    pub peak_frames: usize,
}

enum Control {
    Eval(Rc<Expr>),
    Return(Value),
}

enum LoopTarget {
    Match(Rc<Match>),
    Unfold(Rc<Unfold>),
}

pub(crate) struct LoopEntry {
    label: Option<Name>,
    target: LoopTarget,
    parent: LoopScope,
}

/// The `begin`s and unfolds a `loop` can currently reach, innermost first.
pub(crate) type LoopScope = Option<Rc<LoopEntry>>;

fn find_target(scope: &LoopScope, label: Option<&Name>) -> Option<Rc<LoopEntry>> {
    let mut scope = scope.as_ref();
    while let Some(entry) = scope {
        if label.is_none() || entry.label.as_ref() == label {
            return Some(entry.clone());
        }
        scope = entry.parent.as_ref();
    }
    None
}

/// Work waiting for the value currently being computed.
enum Frame {
    Tuple {
        items: Rc<[Rc<Expr>]>,
        done: Vec<Value>,
    },
    Make {
        label: Name,
    },
    Scrutinee {
        node: Rc<Match>,
    },
    /// The argument of a `loop`, which becomes the next scrutinee of `entry`.
    Loop {
        entry: Rc<LoopEntry>,
    },
    Request {
        label: Name,
    },
    Bind {
        pattern: Pattern,
        body: Rc<Expr>,
    },
    Step {
        steps: Rc<[Step]>,
        index: usize,
        body: Rc<Expr>,
    },
    Args {
        name: Name,
        args: Rc<[Rc<Expr>]>,
        done: Vec<Value>,
    },
    /// Reinstate the caller's bindings once a call or a production returns.
    Restore {
        env: Env,
    },
    Dup,
    Discard,
}

struct Pending {
    frame: Frame,
    loops: LoopScope,
}

pub struct Machine<'p> {
    definitions: &'p IndexMap<Name, Definition>,
    config: &'p EvalConfig,
    env: Env,
    loops: LoopScope,
    stack: Vec<Pending>,
    trace: Trace,
}

/// Destructure `value` into `env` according to `pattern`.
pub fn bind(env: &mut Env, pattern: &Pattern, value: Value) -> Result<(), RuntimeError> {
    match (pattern, value) {
        (Pattern::Name(name), value) => {
            env.insert(name.clone(), value);
            Ok(())
        }
        (Pattern::Unit, Value::Unit) => Ok(()),
        (Pattern::Tuple(patterns), Value::Tuple(items)) => {
            if patterns.len() != items.len() {
                return Err(RuntimeError::Arity {
                    expected: patterns.len(),
                    found: items.len(),
                });
            }
            patterns
                .iter()
                .zip(items)
                .try_for_each(|(pattern, item)| bind(env, pattern, item))
        }
        (Pattern::Unit, value) => Err(RuntimeError::Shape {
            expected: "()",
            found: value.shape(),
        }),
        (Pattern::Tuple(_), value) => Err(RuntimeError::Shape {
            expected: "a tuple",
            found: value.shape(),
        }),
    }
}

impl<'p> Machine<'p> {
    pub fn new(definitions: &'p IndexMap<Name, Definition>, config: &'p EvalConfig) -> Self {
        Self {
            definitions,
            config,
            env: Env::new(),
            loops: None,
            stack: Vec::new(),
            trace: Trace::default(),
        }
    }

    pub fn trace(&self) -> Trace {
        self.trace
    }

    /// Run the definition `name` on `args` to completion.
    pub fn call(&mut self, name: &Name, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let floor = self.stack.len();
        let control = self.enter(name, args)?;
        self.run(floor, control)
    }

    /// Ask `cont` for the step `label` and run its handler to completion.
    pub fn request(&mut self, cont: Cont, label: &Name) -> Result<Value, RuntimeError> {
        let floor = self.stack.len();
        let control = self.produce(cont, label)?;
        self.run(floor, control)
    }

    fn push(&mut self, frame: Frame) {
        self.stack.push(Pending {
            frame,
            loops: self.loops.clone(),
        });
        self.trace.peak_frames = self.trace.peak_frames.max(self.stack.len());
    }

    /// Step until the frames above `floor` are all resumed.
    fn run(&mut self, floor: usize, mut control: Control) -> Result<Value, RuntimeError> {
        loop {
            self.trace.steps += 1;
            if let Some(limit) = self.config.step_limit {
                if self.trace.steps > limit {
                    return Err(RuntimeError::StepLimit(limit));
                }
            }
            control = match control {
                Control::Eval(expr) => self.eval(expr)?,
                Control::Return(value) => {
                    if self.stack.len() == floor {
                        return Ok(value);
                    }
                    let Some(Pending { frame, loops }) = self.stack.pop() else {
                        return Ok(value);
                    };
                    self.loops = loops;
                    self.resume(frame, value)?
                }
            };
        }
    }

    fn eval(&mut self, expr: Rc<Expr>) -> Result<Control, RuntimeError> {
        Ok(match &*expr {
            Expr::Var(name) => Control::Return(
                self.env
                    .shift_remove(name)
                    .ok_or_else(|| RuntimeError::NoSuchBinding(name.clone()))?,
            ),
            Expr::Unit => Control::Return(Value::Unit),
            Expr::Tuple(items) => match items.first() {
                None => Control::Return(Value::Tuple(Vec::new())),
                Some(first) => {
                    let first = first.clone();
                    self.push(Frame::Tuple {
                        items: items.clone(),
                        done: Vec::with_capacity(items.len()),
                    });
                    Control::Eval(first)
                }
            },
            Expr::Make { label, payload, .. } => {
                self.push(Frame::Make {
                    label: label.clone(),
                });
                Control::Eval(payload.clone())
            }
            Expr::Match(node) => {
                self.push(Frame::Scrutinee { node: node.clone() });
                Control::Eval(node.scrutinee.clone())
            }
            Expr::Loop { label, arg } => {
                let entry = find_target(&self.loops, label.as_ref())
                    .ok_or(RuntimeError::NoLoopTarget)?;
                let unfold = match &entry.target {
                    LoopTarget::Match(_) => None,
                    LoopTarget::Unfold(unfold) => Some(unfold.clone()),
                };
                match (unfold, arg) {
                    (None, Some(arg)) => {
                        let arg = arg.clone();
                        self.push(Frame::Loop { entry });
                        Control::Eval(arg)
                    }
                    (Some(unfold), None) => Control::Return(Value::Cont(Cont {
                        unfold,
                        state: mem::take(&mut self.env),
                    })),
                    _ => return Err(RuntimeError::NoLoopTarget),
                }
            }
            Expr::Unfold(node) => {
                trace!("unfold `{}` over {} binding(s)", node.ty, self.env.len());
                Control::Return(Value::Cont(Cont {
                    unfold: node.clone(),
                    state: mem::take(&mut self.env),
                }))
            }
            Expr::Request { subject, label } => {
                self.push(Frame::Request {
                    label: label.clone(),
                });
                Control::Eval(subject.clone())
            }
            Expr::Let {
                pattern,
                value,
                body,
                ..
            } => {
                self.push(Frame::Bind {
                    pattern: pattern.clone(),
                    body: body.clone(),
                });
                Control::Eval(value.clone())
            }
            Expr::Do { steps, body } => self.step(steps.clone(), 0, body.clone()),
            Expr::Call { name, args } => match args.first() {
                None => self.enter(name, Vec::new())?,
                Some(first) => {
                    let first = first.clone();
                    self.push(Frame::Args {
                        name: name.clone(),
                        args: args.clone(),
                        done: Vec::with_capacity(args.len()),
                    });
                    Control::Eval(first)
                }
            },
            Expr::Dup(value) => {
                self.push(Frame::Dup);
                Control::Eval(value.clone())
            }
            Expr::Discard(value) => {
                self.push(Frame::Discard);
                Control::Eval(value.clone())
            }
        })
    }

    fn resume(&mut self, frame: Frame, value: Value) -> Result<Control, RuntimeError> {
        Ok(match frame {
            Frame::Tuple { items, mut done } => {
                done.push(value);
                match items.get(done.len()) {
                    Some(next) => {
                        let next = next.clone();
                        self.push(Frame::Tuple { items, done });
                        Control::Eval(next)
                    }
                    None => Control::Return(Value::Tuple(done)),
                }
            }
            Frame::Make { label } => Control::Return(Value::variant(label, value)),
            Frame::Scrutinee { node } => {
                if let Some(begin) = &node.begin {
                    self.loops = Some(Rc::new(LoopEntry {
                        label: begin.label.clone(),
                        target: LoopTarget::Match(node.clone()),
                        parent: self.loops.take(),
                    }));
                }
                self.dispatch(&node, value)?
            }
            Frame::Loop { entry } => {
                let LoopTarget::Match(node) = &entry.target else {
                    return Err(RuntimeError::NoLoopTarget);
                };
                let node = node.clone();
                self.loops = Some(entry);
                self.dispatch(&node, value)?
            }
            Frame::Request { label } => match value {
                Value::Cont(cont) => self.produce(cont, &label)?,
                value => {
                    return Err(RuntimeError::Shape {
                        expected: "a continuation",
                        found: value.shape(),
                    })
                }
            },
            Frame::Bind { pattern, body } => {
                bind(&mut self.env, &pattern, value)?;
                Control::Eval(body)
            }
            Frame::Step { steps, index, body } => {
                match &steps[index] {
                    Step::Let { pattern, .. } => bind(&mut self.env, pattern, value)?,
                    Step::Run(_) if value.is_unit() => {}
                    Step::Run(_) => {
                        return Err(RuntimeError::Shape {
                            expected: "()",
                            found: value.shape(),
                        })
                    }
                }
                self.step(steps, index + 1, body)
            }
            Frame::Args {
                name,
                args,
                mut done,
            } => {
                done.push(value);
                match args.get(done.len()) {
                    Some(next) => {
                        let next = next.clone();
                        self.push(Frame::Args { name, args, done });
                        Control::Eval(next)
                    }
                    None => self.enter(&name, done)?,
                }
            }
            Frame::Restore { env } => {
                self.env = env;
                Control::Return(value)
            }
            Frame::Dup => {
                let copy = value.dup()?;
                Control::Return(Value::tuple([value, copy]))
            }
            Frame::Discard => {
                drop(value);
                Control::Return(Value::Unit)
            }
        })
    }

    /// Evaluate the step at `index`, or the body once every step has run.
    fn step(&mut self, steps: Rc<[Step]>, index: usize, body: Rc<Expr>) -> Control {
        let value = match steps.get(index) {
            None => return Control::Eval(body),
            Some(Step::Let { value, .. } | Step::Run(value)) => value.clone(),
        };
        self.push(Frame::Step { steps, index, body });
        Control::Eval(value)
    }

    /// Select the arm for `value` and bind its payload.
    fn dispatch(&mut self, node: &Match, value: Value) -> Result<Control, RuntimeError> {
        let (label, payload) = match value {
            Value::Variant(label, payload) => (label, payload.into_inner()),
            value => {
                return Err(RuntimeError::Shape {
                    expected: "a variant",
                    found: value.shape(),
                })
            }
        };
        let arm = node
            .arms
            .iter()
            .find(|arm| arm.label == label)
            .ok_or_else(|| RuntimeError::NoMatchingArm(label.clone()))?;
        trace!("dispatch `{}`", label);
        bind(&mut self.env, &arm.pattern, payload)?;
        Ok(Control::Eval(arm.body.clone()))
    }

    /// Run one handler of `cont` against its captured state.
    fn produce(&mut self, cont: Cont, label: &Name) -> Result<Control, RuntimeError> {
        let Cont { unfold, state } = cont;
        let handler = unfold
            .handler(label)
            .ok_or_else(|| RuntimeError::UnknownRequest {
                ty: unfold.ty.clone(),
                label: label.clone(),
            })?;
        trace!("request `{}` of `{}`", label, unfold.ty);
        let body = handler.body.clone();
        let env = mem::replace(&mut self.env, state);
        self.push(Frame::Restore { env });
        self.loops = Some(Rc::new(LoopEntry {
            label: unfold.label.clone(),
            target: LoopTarget::Unfold(unfold.clone()),
            parent: None,
        }));
        Ok(Control::Eval(body))
    }

    /// Bind `args` to the parameters of `name` in a fresh environment.
    fn enter(&mut self, name: &Name, args: Vec<Value>) -> Result<Control, RuntimeError> {
        let def = self
            .definitions
            .get(name)
            .ok_or_else(|| RuntimeError::NoSuchDef(name.clone()))?;
        if def.params.len() != args.len() {
            return Err(RuntimeError::ArgumentCount {
                name: name.clone(),
                expected: def.params.len(),
                found: args.len(),
            });
        }
        trace!("call `{}`", name);
        let env = mem::take(&mut self.env);
        self.push(Frame::Restore { env });
        self.loops = None;
        for (pattern, arg) in def.params.iter().zip(args) {
            bind(&mut self.env, pattern, arg)?;
        }
        Ok(Control::Eval(def.body.clone()))
    }
}
