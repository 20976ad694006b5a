//! The builtin allowlist and methods on builtin value types.
//!
//! Exactly the names in `rlm_lang::ALLOWED_BUILTINS` exist; there is no
//! fallback to any host environment. Lazy sources (`range`, line iterators)
//! materialize through a hard element cap so a builtin can never be used to
//! allocate without bound.

use std::cmp::Ordering;

use rlm_lang::ALLOWED_BUILTINS;

use crate::control::{EvalResult, Unwind};
use crate::interp::Interp;
use crate::value::{
    DictMap, SetVal, Value, to_display, to_repr, truthy, type_name, value_cmp, value_eq,
};

/// Upper bound on elements a builtin will materialize from a lazy source.
const MAX_MATERIALIZE: usize = 1 << 20;

pub(crate) fn intern(name: &str) -> Option<&'static str> {
    ALLOWED_BUILTINS.iter().copied().find(|n| *n == name)
}

/// Leftover keyword-argument tracking for builtin and method calls.
pub(crate) struct Kwargs {
    items: Vec<(String, Value)>,
}

impl Kwargs {
    pub(crate) fn new(items: Vec<(String, Value)>) -> Self {
        Self { items }
    }

    pub(crate) fn take(&mut self, name: &str) -> Option<Value> {
        let index = self.items.iter().position(|(n, _)| n == name)?;
        Some(self.items.remove(index).1)
    }

    pub(crate) fn finish(&mut self) -> Result<(), Unwind> {
        match self.items.first() {
            Some((name, _)) => Err(Unwind::type_error(format!(
                "unexpected keyword argument '{name}'"
            ))),
            None => Ok(()),
        }
    }
}

pub(crate) fn expect_arity(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), Unwind> {
    if args.len() < min || args.len() > max {
        return Err(Unwind::type_error(format!(
            "{name}() takes {min}..={max} positional arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn as_int(value: &Value, what: &str) -> Result<i64, Unwind> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(Unwind::type_error(format!(
            "{what} must be an integer, got {}",
            type_name(other)
        ))),
    }
}

pub(crate) fn as_str(value: &Value, what: &str) -> Result<String, Unwind> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Unwind::type_error(format!(
            "{what} must be a string, got {}",
            type_name(other)
        ))),
    }
}

/// Drain an iterable into a vector, bounded by [`MAX_MATERIALIZE`].
fn collect(interp: &mut Interp, value: Value) -> Result<Vec<Value>, Unwind> {
    let mut state = interp.make_iter(value)?;
    let mut out = Vec::new();
    while let Some(item) = interp.iter_next(&mut state)? {
        if out.len() >= MAX_MATERIALIZE {
            return Err(Unwind::value_error("iterable too large to materialize"));
        }
        out.push(item);
    }
    Ok(out)
}

fn sort_values(items: &mut [Value]) -> Result<(), Unwind> {
    let mut failure = None;
    items.sort_by(|a, b| match value_cmp(a, b) {
        Ok(ordering) => ordering,
        Err(exc) => {
            failure.get_or_insert(exc);
            Ordering::Equal
        }
    });
    match failure {
        Some(exc) => Err(Unwind::Exc(exc)),
        None => Ok(()),
    }
}

pub(crate) fn call(
    interp: &mut Interp,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    let mut named = Kwargs::new(kwargs);
    match name {
        "print" => {
            let sep = match named.take("sep") {
                Some(v) => as_str(&v, "sep")?,
                None => " ".to_string(),
            };
            let end = match named.take("end") {
                Some(v) => as_str(&v, "end")?,
                None => "\n".to_string(),
            };
            named.finish()?;
            let rendered: Vec<String> = args.iter().map(to_display).collect();
            interp.write_stdout(&rendered.join(&sep))?;
            interp.write_stdout(&end)?;
            Ok(Value::None)
        }
        "len" => {
            expect_arity(name, &args, 1, 1)?;
            named.finish()?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count() as i64,
                Value::List(items) => items.borrow().len() as i64,
                Value::Tuple(items) => items.len() as i64,
                Value::Dict(map) => map.borrow().entries.len() as i64,
                Value::Set(set) => set.borrow().items.len() as i64,
                Value::Range { start, stop, step } => {
                    if *step > 0 && stop > start {
                        (stop - start + step - 1) / step
                    } else if *step < 0 && start > stop {
                        (start - stop - step - 1) / -step
                    } else {
                        0
                    }
                }
                other => {
                    return Err(Unwind::type_error(format!(
                        "object of type {} has no len()",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::Int(len))
        }
        "range" => {
            expect_arity(name, &args, 1, 3)?;
            named.finish()?;
            let (start, stop, step) = match args.len() {
                1 => (0, as_int(&args[0], "stop")?, 1),
                2 => (as_int(&args[0], "start")?, as_int(&args[1], "stop")?, 1),
                _ => (
                    as_int(&args[0], "start")?,
                    as_int(&args[1], "stop")?,
                    as_int(&args[2], "step")?,
                ),
            };
            if step == 0 {
                return Err(Unwind::value_error("range() step must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        "sorted" => {
            expect_arity(name, &args, 1, 1)?;
            let reverse = match named.take("reverse") {
                Some(v) => truthy(&v),
                None => false,
            };
            named.finish()?;
            let mut items = collect(interp, args[0].clone())?;
            sort_values(&mut items)?;
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        "min" | "max" => {
            named.finish()?;
            let candidates = if args.len() == 1 {
                collect(interp, args[0].clone())?
            } else {
                expect_arity(name, &args, 2, usize::MAX)?;
                args
            };
            if candidates.is_empty() {
                return Err(Unwind::value_error(format!("{name}() of an empty sequence")));
            }
            let mut best = candidates[0].clone();
            for candidate in &candidates[1..] {
                let ordering = value_cmp(candidate, &best).map_err(Unwind::Exc)?;
                let better = if name == "min" {
                    ordering.is_lt()
                } else {
                    ordering.is_gt()
                };
                if better {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        "sum" => {
            expect_arity(name, &args, 1, 2)?;
            named.finish()?;
            let items = collect(interp, args[0].clone())?;
            let mut acc = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in items {
                acc = interp.binary(rlm_lang::ast::BinOp::Add, acc, item)?;
            }
            Ok(acc)
        }
        "enumerate" => {
            expect_arity(name, &args, 1, 2)?;
            let start = match args.get(1) {
                Some(v) => as_int(v, "start")?,
                None => match named.take("start") {
                    Some(v) => as_int(&v, "start")?,
                    None => 0,
                },
            };
            named.finish()?;
            let items = collect(interp, args[0].clone())?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            named.finish()?;
            let mut columns = Vec::with_capacity(args.len());
            for arg in args {
                columns.push(collect(interp, arg)?);
            }
            let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut rows = Vec::with_capacity(shortest);
            for i in 0..shortest {
                rows.push(Value::tuple(
                    columns.iter().map(|col| col[i].clone()).collect(),
                ));
            }
            Ok(Value::list(rows))
        }
        "map" => {
            expect_arity(name, &args, 2, 2)?;
            named.finish()?;
            let func = args[0].clone();
            let items = collect(interp, args[1].clone())?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interp.call_value(func.clone(), vec![item], Vec::new())?);
            }
            Ok(Value::list(out))
        }
        "filter" => {
            expect_arity(name, &args, 2, 2)?;
            named.finish()?;
            let func = args[0].clone();
            let items = collect(interp, args[1].clone())?;
            let mut out = Vec::new();
            for item in items {
                let keep = match &func {
                    Value::None => truthy(&item),
                    _ => truthy(&interp.call_value(func.clone(), vec![item.clone()], Vec::new())?),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        "abs" => {
            expect_arity(name, &args, 1, 1)?;
            named.finish()?;
            match &args[0] {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| Unwind::value_error("integer overflow")),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                other => Err(Unwind::type_error(format!(
                    "bad operand type for abs(): {}",
                    type_name(other)
                ))),
            }
        }
        "int" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Int(i)) => Ok(Value::Int(*i)),
                Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
                Some(Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| {
                        Unwind::value_error(format!("invalid literal for int(): '{s}'"))
                    }),
                Some(other) => Err(Unwind::type_error(format!(
                    "int() argument must be a number or string, got {}",
                    type_name(other)
                ))),
            }
        }
        "float" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
                Some(Value::Bool(b)) => Ok(Value::Float(f64::from(i32::from(*b)))),
                Some(Value::Float(f)) => Ok(Value::Float(*f)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| {
                        Unwind::value_error(format!("could not convert string to float: '{s}'"))
                    }),
                Some(other) => Err(Unwind::type_error(format!(
                    "float() argument must be a number or string, got {}",
                    type_name(other)
                ))),
            }
        }
        "str" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            Ok(Value::str(
                args.first().map(to_display).unwrap_or_default(),
            ))
        }
        "bool" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            Ok(Value::Bool(args.first().is_some_and(truthy)))
        }
        "list" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            match args.into_iter().next() {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(collect(interp, value)?)),
            }
        }
        "tuple" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            match args.into_iter().next() {
                None => Ok(Value::tuple(Vec::new())),
                Some(value) => Ok(Value::tuple(collect(interp, value)?)),
            }
        }
        "set" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            let mut set = SetVal::default();
            if let Some(value) = args.into_iter().next() {
                for item in collect(interp, value)? {
                    set.insert(item).map_err(Unwind::Exc)?;
                }
            }
            Ok(Value::set(set))
        }
        "dict" => {
            expect_arity(name, &args, 0, 1)?;
            named.finish()?;
            let mut map = DictMap::default();
            match args.into_iter().next() {
                None => {}
                Some(Value::Dict(other)) => {
                    for (k, v) in &other.borrow().entries {
                        map.insert(k.clone(), v.clone()).map_err(Unwind::Exc)?;
                    }
                }
                Some(value) => {
                    for pair in collect(interp, value)? {
                        let items = match &pair {
                            Value::Tuple(items) if items.len() == 2 => items.as_ref().clone(),
                            Value::List(items) if items.borrow().len() == 2 => {
                                items.borrow().clone()
                            }
                            other => {
                                return Err(Unwind::type_error(format!(
                                    "dict() expects key/value pairs, got {}",
                                    type_name(other)
                                )));
                            }
                        };
                        map.insert(items[0].clone(), items[1].clone())
                            .map_err(Unwind::Exc)?;
                    }
                }
            }
            Ok(Value::dict(map))
        }
        "any" | "all" => {
            expect_arity(name, &args, 1, 1)?;
            named.finish()?;
            let items = collect(interp, args[0].clone())?;
            let result = if name == "any" {
                items.iter().any(truthy)
            } else {
                items.iter().all(truthy)
            };
            Ok(Value::Bool(result))
        }
        other => Err(Unwind::Internal(format!("unknown builtin '{other}'"))),
    }
}

// ----------------------------------------------------------------------
// Methods on builtin value types
// ----------------------------------------------------------------------

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "split", "splitlines", "join", "startswith",
    "endswith", "replace", "find", "count", "isdigit",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse",
];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "update", "pop"];
const SET_METHODS: &[&str] = &["add", "remove", "discard"];

pub(crate) fn is_str_method(name: &str) -> bool {
    STR_METHODS.contains(&name)
}

pub(crate) fn is_list_method(name: &str) -> bool {
    LIST_METHODS.contains(&name)
}

pub(crate) fn is_dict_method(name: &str) -> bool {
    DICT_METHODS.contains(&name)
}

pub(crate) fn is_set_method(name: &str) -> bool {
    SET_METHODS.contains(&name)
}

pub(crate) fn value_method(
    interp: &mut Interp,
    recv: Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    let mut named = Kwargs::new(kwargs);
    named.finish()?;
    match recv {
        Value::Str(s) => str_method(interp, &s, name, args),
        Value::List(items) => list_method(&items, name, args),
        Value::Dict(map) => dict_method(&map, name, args),
        Value::Set(set) => set_method(&set, name, args),
        Value::Tuple(items) => match name {
            "count" => {
                expect_arity(name, &args, 1, 1)?;
                let mut count = 0i64;
                for item in items.iter() {
                    if value_eq(item, &args[0]).map_err(Unwind::Exc)? {
                        count += 1;
                    }
                }
                Ok(Value::Int(count))
            }
            "index" => {
                expect_arity(name, &args, 1, 1)?;
                for (i, item) in items.iter().enumerate() {
                    if value_eq(item, &args[0]).map_err(Unwind::Exc)? {
                        return Ok(Value::Int(i as i64));
                    }
                }
                Err(Unwind::value_error("tuple.index(x): x not in tuple"))
            }
            _ => Err(Unwind::exc(
                "AttributeError",
                format!("'tuple' object has no attribute '{name}'"),
            )),
        },
        other => Err(Unwind::exc(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", type_name(&other)),
        )),
    }
}

fn str_method(interp: &mut Interp, recv: &str, name: &str, args: Vec<Value>) -> EvalResult {
    match name {
        "lower" => {
            expect_arity(name, &args, 0, 0)?;
            Ok(Value::str(recv.to_lowercase()))
        }
        "upper" => {
            expect_arity(name, &args, 0, 0)?;
            Ok(Value::str(recv.to_uppercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            expect_arity(name, &args, 0, 1)?;
            let out = match args.first() {
                None => match name {
                    "strip" => recv.trim(),
                    "lstrip" => recv.trim_start(),
                    _ => recv.trim_end(),
                }
                .to_string(),
                Some(chars) => {
                    let chars = as_str(chars, "chars")?;
                    let pattern: Vec<char> = chars.chars().collect();
                    match name {
                        "strip" => recv.trim_matches(|c| pattern.contains(&c)),
                        "lstrip" => recv.trim_start_matches(|c| pattern.contains(&c)),
                        _ => recv.trim_end_matches(|c| pattern.contains(&c)),
                    }
                    .to_string()
                }
            };
            Ok(Value::str(out))
        }
        "split" => {
            expect_arity(name, &args, 0, 2)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => recv
                    .split_whitespace()
                    .map(|p| Value::str(p.to_string()))
                    .collect(),
                Some(sep) => {
                    let sep = as_str(sep, "sep")?;
                    if sep.is_empty() {
                        return Err(Unwind::value_error("empty separator"));
                    }
                    match args.get(1) {
                        Some(limit) => {
                            let limit = as_int(limit, "maxsplit")?;
                            let limit = usize::try_from(limit.max(0)).unwrap_or(0);
                            recv.splitn(limit + 1, sep.as_str())
                                .map(|p| Value::str(p.to_string()))
                                .collect()
                        }
                        None => recv
                            .split(sep.as_str())
                            .map(|p| Value::str(p.to_string()))
                            .collect(),
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => {
            expect_arity(name, &args, 0, 0)?;
            let mut lines = Vec::new();
            let mut rest = recv;
            while !rest.is_empty() {
                let (line, tail) = match rest.find('\n') {
                    Some(i) => (&rest[..i], &rest[i + 1..]),
                    None => (rest, ""),
                };
                let line = line.strip_suffix('\r').unwrap_or(line);
                lines.push(Value::str(line.to_string()));
                rest = tail;
            }
            Ok(Value::list(lines))
        }
        "join" => {
            expect_arity(name, &args, 1, 1)?;
            let items = collect(interp, args[0].clone())?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(as_str(&item, "join element")?);
            }
            Ok(Value::str(parts.join(recv)))
        }
        "startswith" | "endswith" => {
            expect_arity(name, &args, 1, 1)?;
            let probe = as_str(&args[0], "prefix")?;
            let result = if name == "startswith" {
                recv.starts_with(&probe)
            } else {
                recv.ends_with(&probe)
            };
            Ok(Value::Bool(result))
        }
        "replace" => {
            expect_arity(name, &args, 2, 2)?;
            let from = as_str(&args[0], "old")?;
            let to = as_str(&args[1], "new")?;
            if from.is_empty() {
                return Err(Unwind::value_error("empty pattern in replace()"));
            }
            Ok(Value::str(recv.replace(&from, &to)))
        }
        "find" => {
            expect_arity(name, &args, 1, 1)?;
            let needle = as_str(&args[0], "sub")?;
            // Char offset, consistent with indexing and slicing on str.
            match recv.find(&needle) {
                Some(byte_at) => Ok(Value::Int(recv[..byte_at].chars().count() as i64)),
                None => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            expect_arity(name, &args, 1, 1)?;
            let needle = as_str(&args[0], "sub")?;
            if needle.is_empty() {
                return Ok(Value::Int(recv.chars().count() as i64 + 1));
            }
            Ok(Value::Int(recv.matches(&needle).count() as i64))
        }
        "isdigit" => {
            expect_arity(name, &args, 0, 0)?;
            Ok(Value::Bool(
                !recv.is_empty() && recv.chars().all(|c| c.is_ascii_digit()),
            ))
        }
        _ => Err(Unwind::exc(
            "AttributeError",
            format!("'str' object has no attribute '{name}'"),
        )),
    }
}

fn list_method(
    items: &std::rc::Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
) -> EvalResult {
    match name {
        "append" => {
            expect_arity(name, &args, 1, 1)?;
            items.borrow_mut().push(args.into_iter().next().unwrap_or(Value::None));
            Ok(Value::None)
        }
        "extend" => {
            expect_arity(name, &args, 1, 1)?;
            let extra: Vec<Value> = match &args[0] {
                Value::List(other) => other.borrow().clone(),
                Value::Tuple(other) => other.as_ref().clone(),
                other => {
                    return Err(Unwind::type_error(format!(
                        "extend() expects a sequence, got {}",
                        type_name(other)
                    )));
                }
            };
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            expect_arity(name, &args, 0, 1)?;
            let mut borrowed = items.borrow_mut();
            if borrowed.is_empty() {
                return Err(Unwind::index_error("pop from empty list"));
            }
            let index = match args.first() {
                Some(v) => {
                    let i = as_int(v, "index")?;
                    let len = borrowed.len() as i64;
                    let resolved = if i < 0 { len + i } else { i };
                    if resolved < 0 || resolved >= len {
                        return Err(Unwind::index_error("pop index out of range"));
                    }
                    resolved as usize
                }
                None => borrowed.len() - 1,
            };
            Ok(borrowed.remove(index))
        }
        "insert" => {
            expect_arity(name, &args, 2, 2)?;
            let mut borrowed = items.borrow_mut();
            let i = as_int(&args[0], "index")?;
            let at = i.clamp(0, borrowed.len() as i64) as usize;
            borrowed.insert(at, args[1].clone());
            Ok(Value::None)
        }
        "remove" => {
            expect_arity(name, &args, 1, 1)?;
            let mut borrowed = items.borrow_mut();
            for (i, item) in borrowed.iter().enumerate() {
                if value_eq(item, &args[0]).map_err(Unwind::Exc)? {
                    borrowed.remove(i);
                    return Ok(Value::None);
                }
            }
            Err(Unwind::value_error("list.remove(x): x not in list"))
        }
        "index" => {
            expect_arity(name, &args, 1, 1)?;
            let borrowed = items.borrow();
            for (i, item) in borrowed.iter().enumerate() {
                if value_eq(item, &args[0]).map_err(Unwind::Exc)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            Err(Unwind::value_error("list.index(x): x not in list"))
        }
        "count" => {
            expect_arity(name, &args, 1, 1)?;
            let borrowed = items.borrow();
            let mut count = 0i64;
            for item in borrowed.iter() {
                if value_eq(item, &args[0]).map_err(Unwind::Exc)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "sort" => {
            expect_arity(name, &args, 0, 0)?;
            let mut borrowed = items.borrow_mut();
            let mut scratch = borrowed.clone();
            sort_values(&mut scratch)?;
            *borrowed = scratch;
            Ok(Value::None)
        }
        "reverse" => {
            expect_arity(name, &args, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        _ => Err(Unwind::exc(
            "AttributeError",
            format!("'list' object has no attribute '{name}'"),
        )),
    }
}

fn dict_method(
    map: &std::rc::Rc<std::cell::RefCell<DictMap>>,
    name: &str,
    args: Vec<Value>,
) -> EvalResult {
    match name {
        "get" => {
            expect_arity(name, &args, 1, 2)?;
            let found = map.borrow().get(&args[0]).map_err(Unwind::Exc)?.cloned();
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            expect_arity(name, &args, 0, 0)?;
            Ok(Value::list(
                map.borrow().entries.iter().map(|(k, _)| k.clone()).collect(),
            ))
        }
        "values" => {
            expect_arity(name, &args, 0, 0)?;
            Ok(Value::list(
                map.borrow().entries.iter().map(|(_, v)| v.clone()).collect(),
            ))
        }
        "items" => {
            expect_arity(name, &args, 0, 0)?;
            Ok(Value::list(
                map.borrow()
                    .entries
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "update" => {
            expect_arity(name, &args, 1, 1)?;
            let Value::Dict(other) = &args[0] else {
                return Err(Unwind::type_error(format!(
                    "update() expects a dict, got {}",
                    type_name(&args[0])
                )));
            };
            let pairs: Vec<(Value, Value)> = other.borrow().entries.clone();
            let mut borrowed = map.borrow_mut();
            for (k, v) in pairs {
                borrowed.insert(k, v).map_err(Unwind::Exc)?;
            }
            Ok(Value::None)
        }
        "pop" => {
            expect_arity(name, &args, 1, 2)?;
            let removed = map.borrow_mut().remove(&args[0]).map_err(Unwind::Exc)?;
            match removed {
                Some(value) => Ok(value),
                None => match args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(Unwind::key_error(to_repr(&args[0]))),
                },
            }
        }
        _ => Err(Unwind::exc(
            "AttributeError",
            format!("'dict' object has no attribute '{name}'"),
        )),
    }
}

fn set_method(
    set: &std::rc::Rc<std::cell::RefCell<SetVal>>,
    name: &str,
    args: Vec<Value>,
) -> EvalResult {
    match name {
        "add" => {
            expect_arity(name, &args, 1, 1)?;
            set.borrow_mut()
                .insert(args.into_iter().next().unwrap_or(Value::None))
                .map_err(Unwind::Exc)?;
            Ok(Value::None)
        }
        "remove" | "discard" => {
            expect_arity(name, &args, 1, 1)?;
            let mut borrowed = set.borrow_mut();
            let mut found = None;
            for (i, item) in borrowed.items.iter().enumerate() {
                if value_eq(item, &args[0]).map_err(Unwind::Exc)? {
                    found = Some(i);
                    break;
                }
            }
            match found {
                Some(i) => {
                    borrowed.items.remove(i);
                    Ok(Value::None)
                }
                None if name == "discard" => Ok(Value::None),
                None => Err(Unwind::key_error(to_repr(&args[0]))),
            }
        }
        _ => Err(Unwind::exc(
            "AttributeError",
            format!("'set' object has no attribute '{name}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{is_dict_method, is_list_method, is_set_method, is_str_method};

    #[test]
    fn method_tables_cover_expected_names() {
        assert!(is_str_method("split"));
        assert!(!is_str_method("format_map"));
        assert!(is_list_method("append"));
        assert!(!is_list_method("clear"));
        assert!(is_dict_method("items"));
        assert!(is_set_method("add"));
    }
}
