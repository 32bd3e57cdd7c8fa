use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::promise::Promise;
use crate::thenable::Thenable;
use crate::Deferred;

/// The payload domain carried through settle and notify calls.
///
/// Settle payloads, rejection reasons, progress reports and binding scopes
/// are all untyped in this model, so they travel as one dynamic enum. The
/// [`Promise`](Value::Promise) and [`Thenable`](Value::Thenable) variants are
/// the capability tags the resolution algorithm keys on: the first marks a
/// value produced by this crate, the second a foreign promise-like object.
/// Everything else is plain data and settles as-is.
#[derive(Clone)]
pub enum Value {
    /// Absent/empty payload. Also what `when` records for slots that never
    /// settled.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// String-keyed map; `when` progress reports use this shape.
    Map(BTreeMap<String, Value>),
    /// A machinery error used as a rejection reason.
    Error(Error),
    /// A promise minted by this crate. Settling with one of these adopts its
    /// eventual outcome instead of treating it as data.
    Promise(Promise),
    /// A foreign promise-like object, assimilated through its `then`.
    Thenable(Arc<dyn Thenable>),
}

impl Value {
    /// Dynamic-language truthiness: `false`, `0`, `0.0`, NaN, `""` and
    /// [`Null`](Value::Null) are falsy, everything else (including empty
    /// lists and maps) is truthy. `when` uses this to count plain items.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0 && !x.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Map lookup shorthand; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(xs) => f.debug_tuple("List").field(xs).finish(),
            Value::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Value::Error(e) => f.debug_tuple("Error").field(e).finish(),
            // Peeking inside would mean taking locks; keep Debug inert.
            Value::Promise(_) => f.write_str("Promise(..)"),
            Value::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Structural equality for data, identity equality for handles: two
/// [`Promise`](Value::Promise) values are equal when they observe the same
/// deferred, two [`Thenable`](Value::Thenable) values when they are the same
/// allocation.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a == b,
            (Value::Thenable(a), Value::Thenable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(xs: Vec<Value>) -> Self {
        Value::List(xs)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Value::Error(e)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

/// A deferred used as a payload stands for its own promise, so resolving one
/// deferred with another waits for the second.
impl From<Deferred> for Value {
    fn from(dfd: Deferred) -> Self {
        Value::Promise(dfd.promise())
    }
}

impl From<&Deferred> for Value {
    fn from(dfd: &Deferred) -> Self {
        Value::Promise(dfd.promise())
    }
}
