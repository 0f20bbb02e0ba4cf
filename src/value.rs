use std::{fmt, mem, ops::Deref, rc::Rc};

use indexmap::IndexMap;
use loom_ty::{Name, Ty};

use crate::{error::CapabilityError, expr::Unfold};

/// Live bindings, each owned by exactly one name.
pub type Env = IndexMap<Name, Value>;

/// Represents a runtime value.
///
/// Values are not `Clone`: copying one is an explicit, fallible [`Value::dup`].
pub enum Value {
    Unit,
    Tuple(Vec<Self>),
    /// An inductive value: a variant label and its fully built payload.
    Variant(Name, Payload),
    /// A coinductive value that has not been asked for anything yet.
    Cont(Cont),
    Resource(Resource),
}

/// The boxed payload of a variant.
///
/// Dropping a payload tears the value down with an explicit work list, so even very deep values
/// are freed without recursion.
pub struct Payload(Box<Value>);

impl Payload {
    pub fn new(value: Value) -> Self {
        Payload(Box::new(value))
    }

    pub fn into_inner(mut self) -> Value {
        mem::replace(&mut *self.0, Value::Unit)
    }
}

impl Deref for Payload {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        let mut work = vec![mem::replace(&mut *self.0, Value::Unit)];
        while let Some(value) = work.pop() {
            match value {
                Value::Tuple(items) => work.extend(items),
                Value::Variant(_, payload) => work.push(payload.into_inner()),
                Value::Cont(cont) => work.extend(cont.state.into_values()),
                Value::Unit | Value::Resource(_) => {}
            }
        }
    }
}

/// A suspended coinductive value: captured state plus the rules producing its next step.
pub struct Cont {
    pub(crate) unfold: Rc<Unfold>,
    pub(crate) state: Env,
}

impl Cont {
    pub fn ty(&self) -> &Ty {
        &self.unfold.ty
    }

    pub fn state(&self) -> &Env {
        &self.state
    }
}

impl fmt::Debug for Cont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cont")
            .field("ty", self.ty())
            .field("state", &self.state)
            .finish()
    }
}

impl PartialEq for Cont {
    fn eq(&self, other: &Self) -> bool {
        let mut work = Vec::new();
        self.same_shape(other, &mut work) && all_equal(work)
    }
}

impl Cont {
    /// Compare the unfold rules and binding names, queueing the captured values for comparison.
    fn same_shape<'v>(&'v self, other: &'v Self, work: &mut Vec<(&'v Value, &'v Value)>) -> bool {
        if !Rc::ptr_eq(&self.unfold, &other.unfold) || self.state.len() != other.state.len() {
            return false;
        }
        for ((a_name, a), (b_name, b)) in self.state.iter().zip(&other.state) {
            if a_name != b_name {
                return false;
            }
            work.push((a, b));
        }
        true
    }
}

/// Structural equality with an explicit work list, so deep values compare without recursion.
fn all_equal<'v>(mut work: Vec<(&'v Value, &'v Value)>) -> bool {
    while let Some(pair) = work.pop() {
        match pair {
            (Value::Unit, Value::Unit) => {}
            (Value::Resource(a), Value::Resource(b)) if a == b => {}
            (Value::Tuple(a), Value::Tuple(b)) if a.len() == b.len() => {
                work.extend(a.iter().zip(b))
            }
            (Value::Variant(a, a_payload), Value::Variant(b, b_payload)) if a == b => {
                work.push((&**a_payload, &**b_payload))
            }
            (Value::Cont(a), Value::Cont(b)) => {
                if !a.same_shape(b, &mut work) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        all_equal(vec![(self, other)])
    }
}

/// Debug output is the printed form, which is produced without recursion.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An opaque handle owned by the host, e.g. a file or a socket.
#[derive(Debug, PartialEq, Eq)]
pub struct Resource {
    pub ty: Name,
    pub id: u64,
}

enum CopyTask<'v> {
    Visit(&'v Value),
    Tuple(usize),
    Variant(&'v Name),
    Cont(&'v Cont),
}

impl Value {
    pub fn variant(label: impl Into<Name>, payload: Value) -> Self {
        Value::Variant(label.into(), Payload::new(payload))
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn resource(ty: impl Into<Name>, id: u64) -> Self {
        Value::Resource(Resource { ty: ty.into(), id })
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_variant(&self) -> Option<(&Name, &Value)> {
        match self {
            Value::Variant(label, payload) => Some((label, &**payload)),
            _ => None,
        }
    }

    pub fn into_variant(self) -> Option<(Name, Value)> {
        match self {
            Value::Variant(label, payload) => Some((label, payload.into_inner())),
            _ => None,
        }
    }

    pub fn into_tuple(self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_pair(self) -> Option<(Value, Value)> {
        let mut items = self.into_tuple()?.into_iter();
        match (items.next(), items.next(), items.next()) {
            (Some(a), Some(b), None) => Some((a, b)),
            _ => None,
        }
    }

    /// A short description of the value's shape, for diagnostics.
    pub fn shape(&self) -> String {
        match self {
            Value::Unit => "()".into(),
            Value::Tuple(items) => format!("a {}-tuple", items.len()),
            Value::Variant(label, _) => format!("variant `{}`", label),
            Value::Cont(cont) => format!("a continuation of `{}`", cont.ty()),
            Value::Resource(resource) => format!("a `{}` resource", resource.ty),
        }
    }

    /// Make an independent deep copy of this value.
    ///
    /// Resources cannot be copied, and neither can a continuation whose captured state holds one.
    pub fn dup(&self) -> Result<Value, CapabilityError> {
        let mut work = vec![CopyTask::Visit(self)];
        let mut done = Vec::new();
        while let Some(task) = work.pop() {
            match task {
                CopyTask::Visit(value) => match value {
                    Value::Unit => done.push(Value::Unit),
                    Value::Resource(resource) => {
                        return Err(CapabilityError::Duplicate(Ty::named(resource.ty.clone())))
                    }
                    Value::Tuple(items) => {
                        work.push(CopyTask::Tuple(items.len()));
                        work.extend(items.iter().rev().map(CopyTask::Visit));
                    }
                    Value::Variant(label, payload) => {
                        work.push(CopyTask::Variant(label));
                        work.push(CopyTask::Visit(payload));
                    }
                    Value::Cont(cont) => {
                        work.push(CopyTask::Cont(cont));
                        work.extend(cont.state.values().rev().map(CopyTask::Visit));
                    }
                },
                CopyTask::Tuple(len) => {
                    let items = done.split_off(done.len() - len);
                    done.push(Value::Tuple(items));
                }
                CopyTask::Variant(label) => {
                    let Some(payload) = done.pop() else {
                        unreachable!("payload is copied before its variant")
                    };
                    done.push(Value::Variant(label.clone(), Payload::new(payload)));
                }
                CopyTask::Cont(cont) => {
                    let values = done.split_off(done.len() - cont.state.len());
                    let state = cont.state.keys().cloned().zip(values).collect();
                    done.push(Value::Cont(Cont {
                        unfold: cont.unfold.clone(),
                        state,
                    }));
                }
            }
        }
        let Some(copy) = done.pop() else {
            unreachable!("every visit produces a value")
        };
        Ok(copy)
    }
}
