//! Static checking of definitions.
//!
//! The checker is an abstract interpretation of a definition's body. Instead of values it tracks,
//! for every binding in scope, its type and whether it has been consumed yet. Branches are checked
//! from the same starting state and must agree on what they consumed, so a binding ends up
//! consumed exactly once on every path. Coverage of matches and unfolds, the types flowing into
//! `loop`, and the capabilities needed by `dup` and `discard` are checked in the same pass.

use std::mem;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use loom_ty::{Kind, Name, Ty, TypeDef, TypeEnv, TypeError};

use crate::{
    error::{CapabilityError, CheckError, ExhaustivenessError, LinearityError, ScopeError},
    expr::{Definition, Expr, Match, Pattern, Signature, Step, Unfold},
};

#[derive(Clone, Debug)]
struct Binding {
    name: Name,
    ty: Ty,
    used: bool,
}

#[derive(Clone, Debug)]
enum Target {
    Match { scrutinee: Ty, result: Option<Ty> },
    Unfold { ty: Ty },
}

/// A `begin` (or unfold) that `loop` may return to, with the bindings every `loop` has to carry.
#[derive(Clone, Debug)]
struct LoopFrame {
    label: Option<Name>,
    target: Target,
    carried: Vec<(Name, Ty)>,
}

pub(crate) struct Checker<'a> {
    types: &'a TypeEnv,
    signatures: &'a IndexMap<Name, Signature>,
    bindings: Vec<Binding>,
    loops: Vec<LoopFrame>,
}

/// Check `def` against `sig`, resolving calls through `signatures`.
pub fn check_definition(
    types: &TypeEnv,
    signatures: &IndexMap<Name, Signature>,
    sig: &Signature,
    def: &Definition,
) -> Result<(), CheckError> {
    if sig.params.len() != def.params.len() {
        return Err(ScopeError::ArgumentCount {
            name: def.name.clone(),
            expected: sig.params.len(),
            found: def.params.len(),
        }
        .into());
    }
    for ty in sig.params.iter().chain(Some(&sig.ret)) {
        types.validate(ty)?;
    }

    let mut checker = Checker::new(types, signatures);
    for (pattern, ty) in def.params.iter().zip(&sig.params) {
        checker.bind(pattern, ty)?;
    }
    let ty = checker.infer(&def.body, Some(&sig.ret))?;
    expect(&sig.ret, &ty)?;
    checker.leave(0)?;
    debug!("checked `{}`", def.name);
    Ok(())
}

fn expect(expected: &Ty, found: &Ty) -> Result<(), TypeError> {
    if expected == found {
        Ok(())
    } else {
        Err(TypeError::Mismatch {
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

/// Arms or handlers must name every variant of `def` exactly once.
fn coverage<'l>(
    ty: &Ty,
    def: &TypeDef,
    labels: impl Iterator<Item = &'l Name>,
) -> Result<(), ExhaustivenessError> {
    let mut seen = IndexSet::new();
    for label in labels {
        if def.lookup(label).is_none() {
            return Err(ExhaustivenessError::Unknown {
                ty: ty.clone(),
                label: label.clone(),
            });
        }
        if !seen.insert(label) {
            return Err(ExhaustivenessError::Duplicate {
                ty: ty.clone(),
                label: label.clone(),
            });
        }
    }
    match def.variants.iter().find(|variant| !seen.contains(&variant.label)) {
        Some(variant) => Err(ExhaustivenessError::Missing {
            ty: ty.clone(),
            label: variant.label.clone(),
        }),
        None => Ok(()),
    }
}

impl<'a> Checker<'a> {
    pub(crate) fn new(types: &'a TypeEnv, signatures: &'a IndexMap<Name, Signature>) -> Self {
        Self {
            types,
            signatures,
            bindings: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn bind(&mut self, pattern: &Pattern, ty: &Ty) -> Result<(), CheckError> {
        match (pattern, ty) {
            (Pattern::Name(name), _) => {
                if self.bindings.iter().any(|b| &b.name == name && !b.used) {
                    return Err(LinearityError::Shadowed(name.clone()).into());
                }
                self.bindings.push(Binding {
                    name: name.clone(),
                    ty: ty.clone(),
                    used: false,
                });
                Ok(())
            }
            (Pattern::Unit, Ty::Unit) => Ok(()),
            (Pattern::Tuple(patterns), Ty::Tuple(items)) if patterns.len() == items.len() => {
                patterns
                    .iter()
                    .zip(items)
                    .try_for_each(|(pattern, ty)| self.bind(pattern, ty))
            }
            _ => Err(ScopeError::PatternMismatch(ty.clone()).into()),
        }
    }

    /// Close the scope opened at `base`, insisting everything bound in it was consumed.
    fn leave(&mut self, base: usize) -> Result<(), CheckError> {
        if let Some(binding) = self.bindings[base..].iter().find(|b| !b.used) {
            return Err(LinearityError::Unused(binding.name.clone()).into());
        }
        self.bindings.truncate(base);
        Ok(())
    }

    fn consume(&mut self, name: &Name) -> Result<Ty, CheckError> {
        let binding = self
            .bindings
            .iter_mut()
            .rev()
            .find(|b| &b.name == name)
            .ok_or_else(|| ScopeError::Unbound(name.clone()))?;
        if binding.used {
            return Err(LinearityError::Reused(name.clone()).into());
        }
        binding.used = true;
        Ok(binding.ty.clone())
    }

    fn live(&self) -> Vec<(Name, Ty)> {
        self.bindings
            .iter()
            .filter(|b| !b.used)
            .map(|b| (b.name.clone(), b.ty.clone()))
            .collect()
    }

    fn consume_all(&mut self) {
        for binding in &mut self.bindings {
            binding.used = true;
        }
    }

    /// At a `loop`, exactly the carried bindings may be live. They pass into the next iteration.
    fn carry(&mut self, carried: &[(Name, Ty)]) -> Result<(), CheckError> {
        let live = self.live();
        for (name, ty) in carried {
            match live.iter().find(|(live, _)| live == name) {
                Some((_, found)) => expect(ty, found)?,
                None => return Err(LinearityError::LoopMissing(name.clone()).into()),
            }
        }
        if let Some((name, _)) = live
            .iter()
            .find(|(name, _)| !carried.iter().any(|(carried, _)| carried == name))
        {
            return Err(LinearityError::LoopExtra(name.clone()).into());
        }
        self.consume_all();
        Ok(())
    }

    fn find_loop(&self, label: Option<&Name>) -> Result<LoopFrame, ScopeError> {
        self.loops
            .iter()
            .rev()
            .find(|frame| label.is_none() || frame.label.as_ref() == label)
            .cloned()
            .ok_or_else(|| ScopeError::NoLoopTarget(label.cloned()))
    }

    fn data(&self, ty: &Ty, kind: Kind) -> Result<&'a TypeDef, TypeError> {
        let def = self.types.data(ty)?;
        match (def.kind, kind) {
            (Kind::Inductive, Kind::Inductive) | (Kind::Coinductive, Kind::Coinductive) => Ok(def),
            (_, Kind::Inductive) => Err(TypeError::NotInductive(ty.clone())),
            (_, Kind::Coinductive) => Err(TypeError::NotCoinductive(ty.clone())),
        }
    }

    /// Synthesize the type of `expr`, consuming the bindings it uses.
    ///
    /// `expected` is a hint used where a type cannot be synthesized bottom-up (the result of a
    /// `loop`); callers still compare the returned type against it.
    pub(crate) fn infer(&mut self, expr: &Expr, expected: Option<&Ty>) -> Result<Ty, CheckError> {
        match expr {
            Expr::Var(name) => self.consume(name),
            Expr::Unit => Ok(Ty::Unit),
            Expr::Tuple(items) => {
                let hints = match expected {
                    Some(Ty::Tuple(hints)) if hints.len() == items.len() => Some(hints),
                    _ => None,
                };
                let mut tys = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    tys.push(self.infer(item, hints.map(|hints| &hints[idx]))?);
                }
                Ok(Ty::Tuple(tys))
            }
            Expr::Make { ty, label, payload } => {
                self.types.validate(ty)?;
                self.data(ty, Kind::Inductive)?;
                let payload_ty = self.types.payload(ty, label)?;
                let found = self.infer(payload, Some(&payload_ty))?;
                expect(&payload_ty, &found)?;
                Ok(ty.clone())
            }
            Expr::Match(node) => self.infer_match(node, expected),
            Expr::Loop { label, arg } => {
                let frame = self.find_loop(label.as_ref())?;
                match (frame.target, arg) {
                    (Target::Match { scrutinee, result }, Some(arg)) => {
                        let found = self.infer(arg, Some(&scrutinee))?;
                        expect(&scrutinee, &found)?;
                        self.carry(&frame.carried)?;
                        Ok(result.ok_or(ScopeError::AmbiguousLoop)?)
                    }
                    (Target::Unfold { ty }, None) => {
                        self.carry(&frame.carried)?;
                        Ok(ty)
                    }
                    _ => Err(ScopeError::LoopArgument.into()),
                }
            }
            Expr::Unfold(node) => self.infer_unfold(node),
            Expr::Request { subject, label } => {
                let ty = self.infer(subject, None)?;
                self.data(&ty, Kind::Coinductive)?;
                Ok(self.types.payload(&ty, label)?)
            }
            Expr::Let {
                pattern,
                ty,
                value,
                body,
            } => {
                let base = self.bindings.len();
                self.bind_step(pattern, ty.as_ref(), value)?;
                let result = self.infer(body, expected)?;
                self.leave(base)?;
                Ok(result)
            }
            Expr::Do { steps, body } => {
                let base = self.bindings.len();
                for step in steps.iter() {
                    match step {
                        Step::Let { pattern, ty, value } => {
                            self.bind_step(pattern, ty.as_ref(), value)?
                        }
                        Step::Run(value) => {
                            let found = self.infer(value, Some(&Ty::Unit))?;
                            expect(&Ty::Unit, &found)?;
                        }
                    }
                }
                let result = self.infer(body, expected)?;
                self.leave(base)?;
                Ok(result)
            }
            Expr::Call { name, args } => {
                let sig = self
                    .signatures
                    .get(name)
                    .ok_or_else(|| ScopeError::Undeclared(name.clone()))?;
                if sig.params.len() != args.len() {
                    return Err(ScopeError::ArgumentCount {
                        name: name.clone(),
                        expected: sig.params.len(),
                        found: args.len(),
                    }
                    .into());
                }
                for (arg, param) in args.iter().zip(&sig.params) {
                    let found = self.infer(arg, Some(param))?;
                    expect(param, &found)?;
                }
                Ok(sig.ret.clone())
            }
            Expr::Dup(value) => {
                let hint = match expected {
                    Some(Ty::Tuple(hints)) if hints.len() == 2 => Some(&hints[0]),
                    _ => None,
                };
                let ty = self.infer(value, hint)?;
                if let Some(component) = self.types.non_duplicable(&ty) {
                    return Err(CapabilityError::Duplicate(component).into());
                }
                Ok(Ty::Tuple(vec![ty.clone(), ty]))
            }
            Expr::Discard(value) => {
                let ty = self.infer(value, None)?;
                if let Some(component) = self.types.non_discardable(&ty) {
                    return Err(CapabilityError::Discard(component).into());
                }
                Ok(Ty::Unit)
            }
        }
    }

    fn bind_step(&mut self, pattern: &Pattern, ty: Option<&Ty>, value: &Expr) -> Result<(), CheckError> {
        if let Some(ty) = ty {
            self.types.validate(ty)?;
        }
        let found = self.infer(value, ty)?;
        if let Some(ty) = ty {
            expect(ty, &found)?;
        }
        self.bind(pattern, &found)
    }

    fn infer_match(&mut self, node: &Match, expected: Option<&Ty>) -> Result<Ty, CheckError> {
        let scrutinee = self.infer(&node.scrutinee, None)?;
        let def = self.data(&scrutinee, Kind::Inductive)?;
        coverage(&scrutinee, def, node.arms.iter().map(|arm| &arm.label))?;

        let mut result = expected.cloned();
        if let Some(begin) = &node.begin {
            self.loops.push(LoopFrame {
                label: begin.label.clone(),
                target: Target::Match {
                    scrutinee: scrutinee.clone(),
                    result: result.clone(),
                },
                carried: self.live(),
            });
        }

        let start = self.bindings.clone();
        let base = start.len();
        let mut outcomes = Vec::with_capacity(node.arms.len());
        for arm in &node.arms {
            self.bindings = start.clone();
            let payload = self.types.payload(&scrutinee, &arm.label)?;
            self.bind(&arm.pattern, &payload)?;
            let found = self.infer(&arm.body, result.as_ref())?;
            match &result {
                Some(result) => expect(result, &found)?,
                None => {
                    if let Some(LoopFrame {
                        target: Target::Match { result: slot, .. },
                        ..
                    }) = node.begin.as_ref().and(self.loops.last_mut())
                    {
                        *slot = Some(found.clone());
                    }
                    result = Some(found);
                }
            }
            self.leave(base)?;
            outcomes.push(mem::take(&mut self.bindings));
        }

        if node.begin.is_some() {
            self.loops.pop();
        }
        self.bindings = self.merge(start, outcomes)?;
        result.ok_or_else(|| ScopeError::AmbiguousLoop.into())
    }

    /// Every branch must leave each outer binding in the same state.
    fn merge(&self, start: Vec<Binding>, outcomes: Vec<Vec<Binding>>) -> Result<Vec<Binding>, CheckError> {
        let mut outcomes = outcomes.into_iter();
        let Some(first) = outcomes.next() else {
            return Ok(start);
        };
        for other in outcomes {
            for (a, b) in first.iter().zip(&other) {
                if a.used != b.used {
                    return Err(LinearityError::Divergent(a.name.clone()).into());
                }
            }
        }
        Ok(first)
    }

    fn infer_unfold(&mut self, node: &Unfold) -> Result<Ty, CheckError> {
        self.types.validate(&node.ty)?;
        let def = self.data(&node.ty, Kind::Coinductive)?;
        coverage(&node.ty, def, node.handlers.iter().map(|handler| &handler.label))?;

        let carried = self.live();
        self.consume_all();

        let captured: Vec<_> = carried
            .iter()
            .map(|(name, ty)| Binding {
                name: name.clone(),
                ty: ty.clone(),
                used: false,
            })
            .collect();
        let outer_bindings = mem::take(&mut self.bindings);
        let outer_loops = mem::replace(
            &mut self.loops,
            vec![LoopFrame {
                label: node.label.clone(),
                target: Target::Unfold {
                    ty: node.ty.clone(),
                },
                carried,
            }],
        );

        let checked = node.handlers.iter().try_for_each(|handler| {
            self.bindings = captured.clone();
            let payload = self.types.payload(&node.ty, &handler.label)?;
            let found = self.infer(&handler.body, Some(&payload))?;
            expect(&payload, &found)?;
            self.leave(0)
        });

        self.bindings = outer_bindings;
        self.loops = outer_loops;
        checked?;
        Ok(node.ty.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Arm, Handler};

    fn types() -> TypeEnv {
        let mut types = TypeEnv::new();
        types
            .declare(
                TypeDef::inductive("Nat")
                    .variant("zero", Ty::Unit)
                    .variant("add1", Ty::Self_),
            )
            .unwrap();
        types
            .declare(
                TypeDef::coinductive("Seq")
                    .variant("next", Ty::tuple([Ty::named("Nat"), Ty::Self_]))
                    .variant("close", Ty::Unit),
            )
            .unwrap();
        types
    }

    fn check(params: &[(&str, Ty)], ret: Ty, body: std::rc::Rc<Expr>) -> Result<(), CheckError> {
        let types = types();
        let sig = Signature::new(params.iter().map(|(_, ty)| ty.clone()), ret);
        let def = Definition::new("f", params.iter().map(|(name, _)| Pattern::name(*name)), body);
        check_definition(&types, &IndexMap::new(), &sig, &def)
    }

    fn zero() -> std::rc::Rc<Expr> {
        Expr::make(Ty::named("Nat"), "zero", Expr::unit())
    }

    #[test]
    fn unfold_state_is_carried_by_every_loop() {
        let nat = Ty::named("Nat");
        let seq = Ty::named("Seq");
        let holds = Expr::unfold(
            seq.clone(),
            [
                Handler::new("next", Expr::tuple([zero(), Expr::loop_unfold()])),
                Handler::new("close", Expr::discard(Expr::var("a"))),
            ],
        );
        assert_eq!(check(&[("a", nat.clone())], seq.clone(), holds), Ok(()));

        let leaks = Expr::unfold(
            seq.clone(),
            [
                Handler::new("next", Expr::tuple([Expr::var("a"), Expr::loop_unfold()])),
                Handler::new("close", Expr::discard(Expr::var("a"))),
            ],
        );
        assert_eq!(
            check(&[("a", nat)], seq, leaks),
            Err(LinearityError::LoopMissing("a".into()).into()),
        );
    }

    #[test]
    fn loop_result_needs_a_known_type() {
        let nat = Ty::named("Nat");
        let count = Expr::begin(
            Expr::var("n"),
            [
                Arm::new("add1", Pattern::name("k"), Expr::loop_(Expr::var("k"))),
                Arm::new("zero", Pattern::Unit, zero()),
            ],
        );
        let body = Expr::let_(Pattern::name("x"), count.clone(), Expr::var("x"));
        assert_eq!(
            check(&[("n", nat.clone())], nat.clone(), body),
            Err(ScopeError::AmbiguousLoop.into()),
        );

        let annotated =
            Expr::let_typed(Pattern::name("x"), nat.clone(), count.clone(), Expr::var("x"));
        assert_eq!(check(&[("n", nat.clone())], nat.clone(), annotated), Ok(()));

        let step = Expr::do_(
            [Step::let_typed(Pattern::name("x"), nat.clone(), count)],
            Expr::var("x"),
        );
        assert_eq!(check(&[("n", nat.clone())], nat, step), Ok(()));
    }

    #[test]
    fn requests_need_a_continuation() {
        let nat = Ty::named("Nat");
        let body = Expr::request(Expr::var("n"), "next");
        assert_eq!(
            check(&[("n", nat.clone())], Ty::Unit, body),
            Err(TypeError::NotCoinductive(nat).into()),
        );
    }
}
