//! Human-readable rendering of values and environments.
//!
//! Variants print as their label applied to their payload, `add1(add1(zero))`, with unit payloads
//! left out. Continuations show the type they unfold and the state they captured.

use std::fmt::{self, Write};

use crate::value::{Env, Value};

enum Piece<'v> {
    Value(&'v Value),
    Text(&'static str),
    Name(&'v str),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut work = vec![Piece::Value(self)];
        while let Some(piece) = work.pop() {
            let value = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Name(name) => {
                    f.write_str(name)?;
                    continue;
                }
                Piece::Value(value) => value,
            };
            match value {
                Value::Unit => f.write_str("()")?,
                Value::Resource(resource) => write!(f, "#{}:{}", resource.ty, resource.id)?,
                Value::Variant(label, payload) if payload.is_unit() => f.write_str(label)?,
                Value::Variant(label, payload) => {
                    write!(f, "{}(", label)?;
                    work.push(Piece::Text(")"));
                    work.push(Piece::Value(&**payload));
                }
                Value::Tuple(items) => {
                    f.write_char('(')?;
                    work.push(Piece::Text(")"));
                    for (idx, item) in items.iter().enumerate().rev() {
                        work.push(Piece::Value(item));
                        if idx > 0 {
                            work.push(Piece::Text(", "));
                        }
                    }
                }
                Value::Cont(cont) => {
                    write!(f, "<{}", cont.ty())?;
                    work.push(Piece::Text(">"));
                    for (idx, (name, value)) in cont.state().iter().enumerate().rev() {
                        work.push(Piece::Value(value));
                        work.push(Piece::Text(" = "));
                        work.push(Piece::Name(name.as_str()));
                        work.push(Piece::Text(if idx == 0 { ": " } else { ", " }));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Write one `name = value` line per binding, indented by `level`.
pub fn print_env(w: &mut impl Write, env: &Env, level: usize) -> fmt::Result {
    for (name, value) in env {
        for _ in 0..level {
            w.write_str("  ")?;
        }
        writeln!(w, "{} = {}", name, value)?;
    }
    Ok(())
}
