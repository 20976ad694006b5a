//! Runtime values.
//!
//! Containers use `Rc<RefCell<...>>` so aliasing behaves the way programs
//! expect (`a = b; a.append(1)` is visible through `b`). Determinism knobs
//! from the data model: dicts iterate in insertion order, sets iterate in a
//! total order over (type rank, value).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use serde_json::Value as Json;

use rlm_lang::ast;

use crate::control::{RuntimeExc, Unwind};
use crate::ctx::{ContextView, DocView, LineIter};
use crate::toolapi::ToolApi;

/// A user-defined function with its captured scope chain.
pub struct Func {
    pub name: String,
    pub params: Vec<ast::Param>,
    pub body: Vec<ast::Stmt>,
    pub closure: Vec<Rc<RefCell<std::collections::HashMap<String, Value>>>>,
}

impl std::fmt::Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Insertion-ordered mapping with program-level key equality.
///
/// Linear scan by design: step programs hold tens of keys, not millions,
/// and a scan keeps key equality identical to `==` in the language.
#[derive(Debug, Default)]
pub struct DictMap {
    pub entries: Vec<(Value, Value)>,
}

impl DictMap {
    pub fn get(&self, key: &Value) -> Result<Option<&Value>, RuntimeExc> {
        for (k, v) in &self.entries {
            if value_eq(k, key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), RuntimeExc> {
        if !is_hashable(&key) {
            return Err(RuntimeExc::new(
                "TypeError",
                format!("unhashable key type: {}", type_name(&key)),
            ));
        }
        for (k, v) in &mut self.entries {
            if value_eq(k, &key)? {
                *v = value;
                return Ok(());
            }
        }
        self.entries.push((key, value));
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, RuntimeExc> {
        for (i, (k, _)) in self.entries.iter().enumerate() {
            if value_eq(k, key)? {
                return Ok(Some(self.entries.remove(i).1));
            }
        }
        Ok(None)
    }
}

/// Set with deduplicated storage and sorted iteration.
#[derive(Debug, Default)]
pub struct SetVal {
    pub items: Vec<Value>,
}

impl SetVal {
    pub fn insert(&mut self, value: Value) -> Result<(), RuntimeExc> {
        if !is_hashable(&value) {
            return Err(RuntimeExc::new(
                "TypeError",
                format!("unhashable type: {}", type_name(&value)),
            ));
        }
        if !self.contains(&value)? {
            self.items.push(value);
        }
        Ok(())
    }

    pub fn contains(&self, value: &Value) -> Result<bool, RuntimeExc> {
        for item in &self.items {
            if value_eq(item, value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Elements in the canonical iteration order.
    #[must_use]
    pub fn sorted_items(&self) -> Vec<Value> {
        let mut items = self.items.clone();
        items.sort_by(total_order);
        items
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<DictMap>>),
    Set(Rc<RefCell<SetVal>>),
    /// Lazy integer range from `range()`.
    Range { start: i64, stop: i64, step: i64 },
    Func(Rc<Func>),
    Builtin(&'static str),
    /// Method bound to a receiver, e.g. `doc.slice` taken without calling.
    BoundMethod { recv: Box<Value>, name: Rc<str> },
    Ctx(Rc<ContextView>),
    Doc(Rc<DocView>),
    Tool(Rc<ToolApi>),
    /// Lazy line iterator from `DocView.iter_lines`.
    Lines(Rc<RefCell<LineIter>>),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(map: DictMap) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn set(set: SetVal) -> Self {
        Value::Set(Rc::new(RefCell::new(set)))
    }
}

#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::None => "NoneType",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "str",
        Value::List(_) => "list",
        Value::Tuple(_) => "tuple",
        Value::Dict(_) => "dict",
        Value::Set(_) => "set",
        Value::Range { .. } => "range",
        Value::Func(_) => "function",
        Value::Builtin(_) => "builtin",
        Value::BoundMethod { .. } => "method",
        Value::Ctx(_) => "context",
        Value::Doc(_) => "document",
        Value::Tool(_) => "tool",
        Value::Lines(_) => "line_iterator",
    }
}

#[must_use]
pub fn is_hashable(value: &Value) -> bool {
    match value {
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => true,
        Value::Tuple(items) => items.iter().all(is_hashable),
        _ => false,
    }
}

#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::List(items) => !items.borrow().is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Dict(map) => !map.borrow().entries.is_empty(),
        Value::Set(set) => !set.borrow().items.is_empty(),
        Value::Range { start, stop, step } => {
            (*step > 0 && start < stop) || (*step < 0 && start > stop)
        }
        _ => true,
    }
}

/// Numeric view used for cross-type comparison (`1 == 1.0`, `True == 1`).
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(i32::from(*b))),
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Program-level `==`.
pub fn value_eq(a: &Value, b: &Value) -> Result<bool, RuntimeExc> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return Ok(x == y);
    }
    match (a, b) {
        (Value::None, Value::None) => Ok(true),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            seq_eq(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.entries.len() != y.entries.len() {
                return Ok(false);
            }
            for (k, v) in &x.entries {
                match y.get(k)? {
                    Some(other) if value_eq(v, other)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.items.len() != y.items.len() {
                return Ok(false);
            }
            for item in &x.items {
                if !y.contains(item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> Result<bool, RuntimeExc> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b.iter()) {
        if !value_eq(x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Program-level ordering (`<`, `sorted`). Incomparable types fail the way
/// the source language fails them.
pub fn value_cmp(a: &Value, b: &Value) -> Result<Ordering, RuntimeExc> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).ok_or_else(|| {
            RuntimeExc::new("ValueError", "comparison with NaN is undefined")
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            seq_cmp(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
        _ => Err(RuntimeExc::new(
            "TypeError",
            format!(
                "'<' not supported between {} and {}",
                type_name(a),
                type_name(b)
            ),
        )),
    }
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Result<Ordering, RuntimeExc> {
    for (x, y) in a.iter().zip(b.iter()) {
        match value_cmp(x, y)? {
            Ordering::Equal => {}
            other => return Ok(other),
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Infallible total order for set iteration: type rank first, value within.
#[must_use]
pub fn total_order(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::None => 0,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => 1,
            Value::Str(_) => 2,
            Value::Tuple(_) => 3,
            _ => 4,
        }
    }
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        other => return other,
    }
    match (a, b) {
        (Value::None, Value::None) => Ordering::Equal,
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Tuple(x), Value::Tuple(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match total_order(l, r) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// `str()` of a value; what `print` renders.
#[must_use]
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        other => to_repr(other),
    }
}

/// `repr()` of a value; what containers render their elements as.
#[must_use]
pub fn to_repr(value: &Value) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('\'');
            for ch in s.chars() {
                match ch {
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    other => out.push(other),
                }
            }
            out.push('\'');
            out
        }
        Value::List(items) => {
            let items = items.borrow();
            let inner: Vec<String> = items.iter().map(to_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(to_repr).collect();
            if items.len() == 1 {
                format!("({},)", inner[0])
            } else {
                format!("({})", inner.join(", "))
            }
        }
        Value::Dict(map) => {
            let map = map.borrow();
            let inner: Vec<String> = map
                .entries
                .iter()
                .map(|(k, v)| format!("{}: {}", to_repr(k), to_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Set(set) => {
            let items = set.borrow().sorted_items();
            if items.is_empty() {
                return "set()".to_string();
            }
            let inner: Vec<String> = items.iter().map(to_repr).collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Range { start, stop, step } => {
            if *step == 1 {
                format!("range({start}, {stop})")
            } else {
                format!("range({start}, {stop}, {step})")
            }
        }
        Value::Func(f) => format!("<function {}>", f.name),
        Value::Builtin(name) => format!("<builtin {name}>"),
        Value::BoundMethod { name, .. } => format!("<method {name}>"),
        Value::Ctx(_) => "<context>".to_string(),
        Value::Doc(doc) => format!("<document {}>", doc.id()),
        Value::Tool(_) => "<tool>".to_string(),
        Value::Lines(_) => "<line_iterator>".to_string(),
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f == f.trunc() && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Convert program values to JSON for the state snapshot and tool args.
///
/// Mirrors the source language's JSON encoder: dict keys must be strings,
/// sets and functions do not serialize, non-finite floats do not serialize.
pub fn to_json(value: &Value) -> Result<Json, Unwind> {
    match value {
        Value::None => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(i) => Ok(Json::Number((*i).into())),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| {
                Unwind::value_error("non-finite float is not JSON-serializable")
            }),
        Value::Str(s) => Ok(Json::String(s.to_string())),
        Value::List(items) => items.borrow().iter().map(to_json).collect::<Result<Vec<_>, _>>().map(Json::Array),
        Value::Tuple(items) => items.iter().map(to_json).collect::<Result<Vec<_>, _>>().map(Json::Array),
        Value::Dict(map) => {
            let map = map.borrow();
            let mut out = serde_json::Map::new();
            for (k, v) in &map.entries {
                let Value::Str(key) = k else {
                    return Err(Unwind::type_error(format!(
                        "JSON object keys must be strings, got {}",
                        type_name(k)
                    )));
                };
                out.insert(key.to_string(), to_json(v)?);
            }
            Ok(Json::Object(out))
        }
        other => Err(Unwind::type_error(format!(
            "{} is not JSON-serializable",
            type_name(other)
        ))),
    }
}

/// Convert injected JSON (state, tool results) into program values.
#[must_use]
pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::str(s.as_str()),
        Json::Array(items) => Value::list(items.iter().map(from_json).collect()),
        Json::Object(map) => {
            let mut dict = DictMap::default();
            for (k, v) in map {
                // Keys arriving from JSON are strings; insertion cannot fail.
                let _ = dict.insert(Value::str(k.as_str()), from_json(v));
            }
            Value::dict(dict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DictMap, SetVal, Value, to_json, to_repr, total_order, truthy, value_cmp, value_eq};

    #[test]
    fn cross_type_numeric_equality() {
        assert!(value_eq(&Value::Int(1), &Value::Float(1.0)).expect("eq"));
        assert!(value_eq(&Value::Bool(true), &Value::Int(1)).expect("eq"));
        assert!(!value_eq(&Value::Int(1), &Value::str("1")).expect("eq"));
    }

    #[test]
    fn list_and_tuple_are_not_equal() {
        let list = Value::list(vec![Value::Int(1)]);
        let tuple = Value::tuple(vec![Value::Int(1)]);
        assert!(!value_eq(&list, &tuple).expect("eq"));
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let mut map = DictMap::default();
        map.insert(Value::str("b"), Value::Int(1)).expect("insert");
        map.insert(Value::str("a"), Value::Int(2)).expect("insert");
        map.insert(Value::str("b"), Value::Int(3)).expect("overwrite");
        let keys: Vec<String> = map
            .entries
            .iter()
            .map(|(k, _)| to_repr(k))
            .collect();
        assert_eq!(keys, vec!["'b'", "'a'"]);
    }

    #[test]
    fn set_iterates_sorted() {
        let mut set = SetVal::default();
        set.insert(Value::Int(3)).expect("insert");
        set.insert(Value::str("a")).expect("insert");
        set.insert(Value::Int(1)).expect("insert");
        set.insert(Value::Int(3)).expect("dedupe");
        let items = set.sorted_items();
        assert_eq!(items.len(), 3);
        assert_eq!(to_repr(&items[0]), "1");
        assert_eq!(to_repr(&items[1]), "3");
        assert_eq!(to_repr(&items[2]), "'a'");
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let mut map = DictMap::default();
        let err = map
            .insert(Value::list(vec![]), Value::Int(1))
            .expect_err("unhashable");
        assert_eq!(err.kind, "TypeError");
    }

    #[test]
    fn incomparable_types_fail_ordering() {
        let err = value_cmp(&Value::Int(1), &Value::str("a")).expect_err("incomparable");
        assert_eq!(err.kind, "TypeError");
        // ... but the set order never fails.
        assert_ne!(
            total_order(&Value::Int(1), &Value::str("a")),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&Value::None));
        assert!(!truthy(&Value::str("")));
        assert!(truthy(&Value::str("x")));
        assert!(!truthy(&Value::list(vec![])));
        assert!(!truthy(&Value::Range { start: 0, stop: 0, step: 1 }));
        assert!(truthy(&Value::Range { start: 0, stop: 2, step: 1 }));
    }

    #[test]
    fn repr_matches_source_language() {
        assert_eq!(to_repr(&Value::Bool(true)), "True");
        assert_eq!(to_repr(&Value::Float(2.0)), "2.0");
        assert_eq!(to_repr(&Value::str("a'b\n")), "'a\\'b\\n'");
        assert_eq!(
            to_repr(&Value::tuple(vec![Value::Int(1)])),
            "(1,)"
        );
    }

    #[test]
    fn json_round_trip_rejects_sets_and_non_string_keys() {
        assert!(to_json(&Value::set(SetVal::default())).is_err());
        let mut map = DictMap::default();
        map.insert(Value::Int(1), Value::Int(2)).expect("insert");
        assert!(to_json(&Value::dict(map)).is_err());
    }
}
