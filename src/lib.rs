//! A checker and evaluator for a small linear calculus with inductive and coinductive data.
//!
//! Hosts build declarations and definitions with the constructors in [`expr`], register them with
//! a [`Program`], and then run them. Every definition is checked before it is stored: a program
//! only ever runs code that consumes each of its bindings exactly once.

pub mod check;
pub mod error;
pub mod eval;
pub mod expr;
pub mod print;
pub mod value;

use indexmap::IndexMap;
use log::debug;

pub use crate::{
    error::{
        CapabilityError, CheckError, Error, ExhaustivenessError, LinearityError, RuntimeError,
        ScopeError,
    },
    eval::{EvalConfig, Trace},
    expr::{Arm, Definition, Expr, Handler, Pattern, Signature, Step},
    value::{Cont, Env, Value},
};
pub use loom_ty::{Kind, Name, Ty, TypeDef, TypeEnv, TypeError, Variant};

/// The result of asking a continuation for one step.
#[derive(Debug, PartialEq)]
pub enum Unfolding {
    /// The payload of the step, with fresh continuations in place of `self`.
    Step(Value),
    /// The continuation was released.
    Closed,
}

/// Declared types, signatures and checked definitions.
#[derive(Default)]
pub struct Program {
    types: TypeEnv,
    signatures: IndexMap<Name, Signature>,
    definitions: IndexMap<Name, Definition>,
    config: EvalConfig,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EvalConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn types(&self) -> &TypeEnv {
        &self.types
    }

    pub fn declare_type(&mut self, def: TypeDef) -> Result<(), Error> {
        Ok(self.types.declare(def)?)
    }

    pub fn declare_resource(&mut self, name: impl Into<Name>) -> Result<(), Error> {
        Ok(self.types.declare_resource(name)?)
    }

    /// Fix the type of a definition before it is given. Definitions may call any declared name,
    /// including their own.
    pub fn declare(&mut self, name: impl Into<Name>, sig: Signature) -> Result<(), Error> {
        let name = name.into();
        if self.signatures.contains_key(&name) {
            return Err(Error::Redeclared(name));
        }
        for ty in sig.params.iter().chain(Some(&sig.ret)) {
            self.types.validate(ty)?;
        }
        self.signatures.insert(name, sig);
        Ok(())
    }

    /// Check `def` against its declared signature and store it. A rejected definition leaves the
    /// program unchanged.
    pub fn define(&mut self, def: Definition) -> Result<(), Error> {
        let rejected = |source: CheckError| Error::Check {
            name: def.name.clone(),
            source,
        };
        let sig = self
            .signatures
            .get(&def.name)
            .ok_or_else(|| rejected(ScopeError::Undeclared(def.name.clone()).into()))?;
        if self.definitions.contains_key(&def.name) {
            return Err(rejected(ScopeError::Redefinition(def.name.clone()).into()));
        }
        if let Err(err) = check::check_definition(&self.types, &self.signatures, sig, &def) {
            debug!("rejected `{}`: {}", def.name, err);
            return Err(rejected(err));
        }
        debug!("defined `{}`", def.name);
        self.definitions.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn eval(&self, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        self.eval_traced(name, args).map(|(value, _)| value)
    }

    /// Run a definition, also reporting how many steps it took and how deep its frame stack got.
    pub fn eval_traced(&self, name: &str, args: Vec<Value>) -> Result<(Value, Trace), Error> {
        let name = Name::from(name);
        let sig = self
            .signatures
            .get(&name)
            .filter(|_| self.definitions.contains_key(&name))
            .ok_or_else(|| RuntimeError::NoSuchDef(name.clone()))?;
        if sig.params.len() != args.len() {
            return Err(RuntimeError::ArgumentCount {
                name,
                expected: sig.params.len(),
                found: args.len(),
            }
            .into());
        }
        for (index, (arg, ty)) in args.iter().zip(&sig.params).enumerate() {
            if !self.conforms(arg, ty) {
                return Err(RuntimeError::ArgumentType {
                    name,
                    index,
                    ty: ty.clone(),
                }
                .into());
            }
        }

        let mut machine = eval::Machine::new(&self.definitions, &self.config);
        let value = machine.call(&name, args)?;
        let trace = machine.trace();
        debug!(
            "`{}` finished in {} steps, {} frames deep",
            name, trace.steps, trace.peak_frames
        );
        Ok((value, trace))
    }

    /// Ask a continuation for the step `label`. Release requests answer [`Unfolding::Closed`].
    pub fn request(&self, value: Value, label: &str) -> Result<Unfolding, Error> {
        let cont = match value {
            Value::Cont(cont) => cont,
            value => {
                return Err(RuntimeError::Shape {
                    expected: "a continuation",
                    found: value.shape(),
                }
                .into())
            }
        };
        let label = Name::from(label);
        let releases = self
            .types
            .data(cont.ty())
            .ok()
            .and_then(|def| def.lookup(&label))
            .map_or(false, |variant| !variant.payload.mentions_self());

        let mut machine = eval::Machine::new(&self.definitions, &self.config);
        let payload = machine.request(cont, &label)?;
        if releases {
            drop(payload);
            Ok(Unfolding::Closed)
        } else {
            Ok(Unfolding::Step(payload))
        }
    }

    /// Whether `value` inhabits `ty`, judged structurally.
    fn conforms(&self, value: &Value, ty: &Ty) -> bool {
        let mut work = vec![(value, ty.clone())];
        while let Some((value, ty)) = work.pop() {
            let fits = match (value, &ty) {
                (Value::Unit, Ty::Unit) => true,
                (Value::Tuple(items), Ty::Tuple(tys)) if items.len() == tys.len() => {
                    work.extend(items.iter().zip(tys.iter().cloned()));
                    true
                }
                (Value::Variant(label, payload), Ty::Named(..)) => {
                    match self.types.kind_of(&ty) {
                        Some(Kind::Inductive) => match self.types.payload(&ty, label) {
                            Ok(payload_ty) => {
                                work.push((&**payload, payload_ty));
                                true
                            }
                            Err(_) => false,
                        },
                        _ => false,
                    }
                }
                (Value::Cont(cont), Ty::Named(..)) => cont.ty() == &ty,
                (Value::Resource(resource), Ty::Named(name, args)) => {
                    args.is_empty() && &resource.ty == name && self.types.is_resource(name)
                }
                _ => false,
            };
            if !fits {
                return false;
            }
        }
        true
    }
}
