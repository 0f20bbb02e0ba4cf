//! Type declarations for inductive and coinductive data.
//!
//! A [`TypeEnv`] only grows: once a declaration is accepted it is never changed or removed, so
//! everything downstream may treat the types it has looked up as fixed.

use std::fmt;

use arcstr::ArcStr;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use thiserror::Error;

pub type Name = ArcStr;

/// Which fixpoint a declaration denotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Least fixpoint: finite values, consumed by structural recursion.
    Inductive,
    /// Greatest fixpoint: values are produced one step at a time on request.
    Coinductive,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    /// The unit terminator.
    Unit,
    Tuple(Vec<Self>),
    /// A declared data or resource type applied to its type arguments.
    Named(Name, Vec<Self>),
    /// A type parameter, only meaningful inside its declaration.
    Param(Name),
    /// The type currently being declared.
    Self_,
}

impl Ty {
    pub fn named(name: impl Into<Name>) -> Self {
        Ty::Named(name.into(), Vec::new())
    }

    pub fn app(name: impl Into<Name>, args: impl IntoIterator<Item = Ty>) -> Self {
        Ty::Named(name.into(), args.into_iter().collect())
    }

    pub fn param(name: impl Into<Name>) -> Self {
        Ty::Param(name.into())
    }

    pub fn tuple(items: impl IntoIterator<Item = Ty>) -> Self {
        Ty::Tuple(items.into_iter().collect())
    }

    pub fn mentions_self(&self) -> bool {
        match self {
            Ty::Self_ => true,
            Ty::Unit | Ty::Param(_) => false,
            Ty::Tuple(items) | Ty::Named(_, items) => items.iter().any(Ty::mentions_self),
        }
    }

    /// Replace parameters with `args` and `self` with `this`.
    fn instantiate(&self, params: &[Name], args: &[Ty], this: &Ty) -> Ty {
        match self {
            Ty::Unit => Ty::Unit,
            Ty::Self_ => this.clone(),
            Ty::Param(name) => params
                .iter()
                .position(|param| param == name)
                .and_then(|idx| args.get(idx))
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Ty::Tuple(items) => Ty::Tuple(
                items
                    .iter()
                    .map(|item| item.instantiate(params, args, this))
                    .collect(),
            ),
            Ty::Named(name, items) => Ty::Named(
                name.clone(),
                items
                    .iter()
                    .map(|item| item.instantiate(params, args, this))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => write!(f, "()"),
            Ty::Self_ => write!(f, "self"),
            Ty::Param(name) => write!(f, "{}", name),
            Ty::Tuple(items) => {
                write!(f, "(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Ty::Named(name, args) if args.is_empty() => write!(f, "{}", name),
            Ty::Named(name, args) => {
                write!(f, "{}<", name)?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// One labelled alternative of a declared type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    pub label: Name,
    pub payload: Ty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: Name,
    pub params: Vec<Name>,
    pub kind: Kind,
    pub variants: Vec<Variant>,
}

impl TypeDef {
    pub fn new(name: impl Into<Name>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            kind,
            variants: Vec::new(),
        }
    }

    pub fn inductive(name: impl Into<Name>) -> Self {
        Self::new(name, Kind::Inductive)
    }

    pub fn coinductive(name: impl Into<Name>) -> Self {
        Self::new(name, Kind::Coinductive)
    }

    pub fn param(mut self, name: impl Into<Name>) -> Self {
        self.params.push(name.into());
        self
    }

    pub fn variant(mut self, label: impl Into<Name>, payload: Ty) -> Self {
        self.variants.push(Variant {
            label: label.into(),
            payload,
        });
        self
    }

    pub fn lookup(&self, label: &str) -> Option<&Variant> {
        self.variants.iter().find(|variant| &*variant.label == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("type `{0}` is already declared")]
    Redefined(Name),
    #[error("type `{ty}` declares parameter `{param}` more than once")]
    DuplicateParam { ty: Name, param: Name },
    #[error("type `{0}` declares no variants")]
    Empty(Name),
    #[error("type `{ty}` declares variant `{label}` more than once")]
    DuplicateVariant { ty: Name, label: Name },
    #[error("unknown type `{0}`")]
    UnknownType(Name),
    #[error("type `{ty}` takes {expected} type argument(s) but {found} were given")]
    ArityMismatch {
        ty: Name,
        expected: usize,
        found: usize,
    },
    #[error("unknown type parameter `{0}`")]
    UnknownParam(Name),
    #[error("`self` is not allowed in {0}")]
    MisplacedSelf(String),
    #[error("inductive type `{0}` has no variant without `self`, so no value of it is finite")]
    NoBaseCase(Name),
    #[error("variant `{label}` of coinductive type `{ty}` neither produces `self` nor releases with `()`")]
    Unproductive { ty: Name, label: Name },
    #[error("coinductive type `{0}` has no variant producing `self`")]
    NeverProduces(Name),
    #[error("`{0}` is not a data type")]
    NotData(Ty),
    #[error("`{0}` is not an inductive type")]
    NotInductive(Ty),
    #[error("`{0}` is not a coinductive type")]
    NotCoinductive(Ty),
    #[error("`{label}` is not a variant of `{ty}`")]
    UnknownVariant { ty: Ty, label: Name },
    #[error("expected `{expected}`, found `{found}`")]
    Mismatch { expected: Ty, found: Ty },
}

#[derive(Clone, Debug)]
enum Decl {
    Data(TypeDef),
    Resource,
}

/// Every type declared so far, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct TypeEnv {
    decls: IndexMap<Name, Decl>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a data type declaration.
    pub fn declare(&mut self, def: TypeDef) -> Result<(), TypeError> {
        if let Err(err) = self.validate_decl(&def) {
            debug!("rejected type `{}`: {}", def.name, err);
            return Err(err);
        }
        debug!("declared {:?} type `{}`", def.kind, def.name);
        self.decls.insert(def.name.clone(), Decl::Data(def));
        Ok(())
    }

    /// Register an opaque, host-provided resource type. Its values may be released but never
    /// duplicated.
    pub fn declare_resource(&mut self, name: impl Into<Name>) -> Result<(), TypeError> {
        let name = name.into();
        if self.decls.contains_key(&name) {
            return Err(TypeError::Redefined(name));
        }
        debug!("declared resource type `{}`", name);
        self.decls.insert(name, Decl::Resource);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeDef> {
        match self.decls.get(name)? {
            Decl::Data(def) => Some(def),
            Decl::Resource => None,
        }
    }

    pub fn is_resource(&self, name: &str) -> bool {
        matches!(self.decls.get(name), Some(Decl::Resource))
    }

    fn validate_decl(&self, def: &TypeDef) -> Result<(), TypeError> {
        if self.decls.contains_key(&def.name) {
            return Err(TypeError::Redefined(def.name.clone()));
        }
        let mut params = IndexSet::new();
        for param in &def.params {
            if !params.insert(param) {
                return Err(TypeError::DuplicateParam {
                    ty: def.name.clone(),
                    param: param.clone(),
                });
            }
        }
        if def.variants.is_empty() {
            return Err(TypeError::Empty(def.name.clone()));
        }

        let mut labels = IndexSet::new();
        for variant in &def.variants {
            if !labels.insert(&variant.label) {
                return Err(TypeError::DuplicateVariant {
                    ty: def.name.clone(),
                    label: variant.label.clone(),
                });
            }
            self.validate_in(&variant.payload, &def.params, Some(&def.name))?;
        }

        match def.kind {
            Kind::Inductive => {
                if def.variants.iter().all(|variant| variant.payload.mentions_self()) {
                    return Err(TypeError::NoBaseCase(def.name.clone()));
                }
            }
            Kind::Coinductive => {
                for variant in &def.variants {
                    if !variant.payload.mentions_self() && variant.payload != Ty::Unit {
                        return Err(TypeError::Unproductive {
                            ty: def.name.clone(),
                            label: variant.label.clone(),
                        });
                    }
                }
                if !def.variants.iter().any(|variant| variant.payload.mentions_self()) {
                    return Err(TypeError::NeverProduces(def.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Check a type used outside of any declaration, such as in a signature.
    pub fn validate(&self, ty: &Ty) -> Result<(), TypeError> {
        self.validate_in(ty, &[], None)
    }

    fn validate_in(&self, ty: &Ty, params: &[Name], within: Option<&Name>) -> Result<(), TypeError> {
        match ty {
            Ty::Unit => Ok(()),
            Ty::Self_ => match within {
                Some(_) => Ok(()),
                None => Err(TypeError::MisplacedSelf("a type outside its declaration".into())),
            },
            Ty::Param(name) if params.contains(name) => Ok(()),
            Ty::Param(name) => Err(TypeError::UnknownParam(name.clone())),
            Ty::Tuple(items) => items
                .iter()
                .try_for_each(|item| self.validate_in(item, params, within)),
            Ty::Named(name, args) => {
                let expected = match self.decls.get(name) {
                    Some(Decl::Data(def)) => def.params.len(),
                    Some(Decl::Resource) => 0,
                    None => return Err(TypeError::UnknownType(name.clone())),
                };
                if expected != args.len() {
                    return Err(TypeError::ArityMismatch {
                        ty: name.clone(),
                        expected,
                        found: args.len(),
                    });
                }
                args.iter()
                    .try_for_each(|arg| self.validate_in(arg, params, within))
            }
        }
    }

    /// The declaration behind a data type, or an error if `ty` is not one.
    pub fn data(&self, ty: &Ty) -> Result<&TypeDef, TypeError> {
        match ty {
            Ty::Named(name, _) => match self.decls.get(name) {
                Some(Decl::Data(def)) => Ok(def),
                Some(Decl::Resource) => Err(TypeError::NotData(ty.clone())),
                None => Err(TypeError::UnknownType(name.clone())),
            },
            _ => Err(TypeError::NotData(ty.clone())),
        }
    }

    pub fn kind_of(&self, ty: &Ty) -> Option<Kind> {
        self.data(ty).ok().map(|def| def.kind)
    }

    /// The payload type of `label` for the instantiated type `ty`, with `self` replaced by `ty`.
    pub fn payload(&self, ty: &Ty, label: &str) -> Result<Ty, TypeError> {
        let def = self.data(ty)?;
        let args = match ty {
            Ty::Named(_, args) => args.as_slice(),
            _ => &[],
        };
        let variant = def.lookup(label).ok_or_else(|| TypeError::UnknownVariant {
            ty: ty.clone(),
            label: label.into(),
        })?;
        Ok(variant.payload.instantiate(&def.params, args, ty))
    }

    /// A component of `ty` that makes it impossible to duplicate, if any.
    ///
    /// Coinductive components are not inspected: whether a continuation can be copied depends on
    /// the state it captured, which is only known at run time.
    pub fn non_duplicable(&self, ty: &Ty) -> Option<Ty> {
        self.find_component(ty, |env, ty| match ty {
            Ty::Named(name, _) => env.is_resource(name),
            _ => false,
        })
    }

    /// A component of `ty` that makes it impossible to discard, if any. Continuations must be
    /// released through their own request instead.
    pub fn non_discardable(&self, ty: &Ty) -> Option<Ty> {
        self.find_component(ty, |env, ty| env.kind_of(ty) == Some(Kind::Coinductive))
    }

    fn find_component(&self, ty: &Ty, hit: impl Fn(&Self, &Ty) -> bool) -> Option<Ty> {
        let mut seen = IndexSet::new();
        let mut work = vec![ty.clone()];
        while let Some(ty) = work.pop() {
            if hit(self, &ty) {
                return Some(ty);
            }
            match &ty {
                Ty::Unit | Ty::Param(_) | Ty::Self_ => {}
                Ty::Tuple(items) => work.extend(items.iter().cloned()),
                Ty::Named(_, args) => {
                    if !seen.insert(ty.clone()) {
                        continue;
                    }
                    work.extend(args.iter().cloned());
                    if let Ok(def) = self.data(&ty) {
                        if def.kind == Kind::Inductive {
                            for variant in &def.variants {
                                work.push(variant.payload.instantiate(&def.params, args, &ty));
                            }
                        }
                    }
                }
            }
        }
        None
    }
}
