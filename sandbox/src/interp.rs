//! Tree-walking interpreter for validated step programs.
//!
//! Runs single-threaded to completion or unwind. The wall-clock deadline is
//! probed at statement boundaries and loop back-edges, so a runaway program
//! unwinds at a safe point; caps on spans, tools, and stdout surface from
//! the capability that hit them. Dict iteration follows insertion order and
//! set iteration a total value order, which together with the absence of any
//! clock or RNG in the program's reach makes a step a pure function of its
//! inputs.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use rlm_lang::ast::{
    BinOp, BoolOp, CmpOp, CompFor, CompKind, Expr, Index, Module, Stmt, Target, UnaryOp,
};
use rlm_types::LimitKind;

use crate::builtins;
use crate::capture::Capture;
use crate::control::{EvalResult, ExecResult, RuntimeExc, Unwind};
use crate::ctx::LineIter;
use crate::value::{
    DictMap, Func, SetVal, Value, total_order, truthy, type_name, value_cmp, value_eq,
};

const MAX_CALL_DEPTH: u32 = 64;
const DEADLINE_PROBE_INTERVAL: u64 = 64;

type Scope = Rc<RefCell<HashMap<String, Value>>>;

pub struct Interp {
    scopes: Vec<Scope>,
    stdout: Rc<RefCell<Capture>>,
    deadline: Instant,
    ops: Cell<u64>,
    call_depth: Cell<u32>,
}

impl Interp {
    #[must_use]
    pub fn new(
        globals: HashMap<String, Value>,
        stdout: Rc<RefCell<Capture>>,
        deadline: Instant,
    ) -> Self {
        Self {
            scopes: vec![Rc::new(RefCell::new(globals))],
            stdout,
            deadline,
            ops: Cell::new(0),
            call_depth: Cell::new(0),
        }
    }

    pub fn run(&mut self, module: &Module) -> ExecResult {
        self.exec_block(&module.body)
    }

    /// Current binding of a global, read by the executor for the state
    /// snapshot after the program finishes.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.scopes[0].borrow().get(name).cloned()
    }

    pub(crate) fn write_stdout(&self, text: &str) -> ExecResult {
        if self.stdout.borrow_mut().write(text) {
            Ok(())
        } else {
            Err(Unwind::Limit(LimitKind::Stdout))
        }
    }

    /// Deadline probe; called on every statement and loop back-edge.
    fn tick(&self) -> ExecResult {
        let ops = self.ops.get().wrapping_add(1);
        self.ops.set(ops);
        if ops % DEADLINE_PROBE_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(Unwind::Limit(LimitKind::Time));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.borrow().get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Bind in the innermost scope. Assignment is local, as in the source
    /// language; reads fall back outward through the closure chain.
    fn set_local(&self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last() {
            scope.borrow_mut().insert(name.to_string(), value);
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt]) -> ExecResult {
        for stmt in stmts {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            Stmt::Assign { targets, value, .. } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
                Ok(())
            }
            Stmt::AugAssign {
                target, op, value, ..
            } => {
                let rhs = self.eval(value)?;
                let current = self.read_target(target)?;
                let updated = self
                    .binary(*op, current, rhs)
                    .map_err(|u| u.at(target.pos()))?;
                self.assign(target, updated)
            }
            Stmt::If { branches, orelse, .. } => {
                for (test, body) in branches {
                    if truthy(&self.eval(test)?) {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            Stmt::While { test, body, .. } => {
                loop {
                    self.tick()?;
                    if !truthy(&self.eval(test)?) {
                        break;
                    }
                    match self.exec_block(body) {
                        Ok(()) => {}
                        Err(Unwind::Break) => break,
                        Err(Unwind::Continue) => {}
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            Stmt::For {
                target, iter, body, ..
            } => {
                let iterable = self.eval(iter)?;
                let mut iter_state = self.make_iter(iterable).map_err(|u| u.at(stmt.pos()))?;
                loop {
                    self.tick()?;
                    let Some(item) = self.iter_next(&mut iter_state)? else {
                        break;
                    };
                    self.assign(target, item)?;
                    match self.exec_block(body) {
                        Ok(()) => {}
                        Err(Unwind::Break) => break,
                        Err(Unwind::Continue) => {}
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            Stmt::FuncDef {
                name, params, body, ..
            } => {
                let func = Func {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                    closure: self.scopes.clone(),
                };
                self.set_local(name, Value::Func(Rc::new(func)));
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                Err(Unwind::Return(value))
            }
            Stmt::Break { .. } => Err(Unwind::Break),
            Stmt::Continue { .. } => Err(Unwind::Continue),
            Stmt::Pass { .. } => Ok(()),
            Stmt::Try {
                body,
                handlers,
                finally,
                ..
            } => {
                let result = match self.exec_block(body) {
                    Err(Unwind::Exc(exc)) => {
                        let mut outcome = Err(Unwind::Exc(exc.clone()));
                        for handler in handlers {
                            if handler.names.iter().any(|n| n == exc.kind) {
                                if let Some(alias) = &handler.alias {
                                    self.set_local(alias, Value::str(exc.message.as_str()));
                                }
                                outcome = self.exec_block(&handler.body);
                                break;
                            }
                        }
                        outcome
                    }
                    other => other,
                };
                if finally.is_empty() {
                    result
                } else {
                    // An unwind raised by the finally block supersedes the
                    // body's outcome, matching source-language semantics.
                    match self.exec_block(finally) {
                        Ok(()) => result,
                        Err(unwind) => Err(unwind),
                    }
                }
            }
            Stmt::Banned { construct, .. } => Err(Unwind::Internal(format!(
                "banned construct '{construct}' reached the interpreter"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    fn assign(&mut self, target: &Target, value: Value) -> ExecResult {
        match target {
            Target::Name(name, _) => {
                self.set_local(name, value);
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
                pos,
            } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                self.subscript_set(&container, index, value)
                    .map_err(|u| u.at(*pos))
            }
            Target::Attribute { pos, .. } => Err(Unwind::Internal(format!(
                "attribute assignment reached the interpreter at {pos}"
            ))),
            Target::Tuple(items, pos) => {
                let values = self.unpack(&value, items.len()).map_err(|u| u.at(*pos))?;
                for (item, v) in items.iter().zip(values) {
                    self.assign(item, v)?;
                }
                Ok(())
            }
        }
    }

    fn unpack(&mut self, value: &Value, expected: usize) -> Result<Vec<Value>, Unwind> {
        let items: Vec<Value> = match value {
            Value::Tuple(items) => items.as_ref().clone(),
            Value::List(items) => items.borrow().clone(),
            other => {
                return Err(Unwind::type_error(format!(
                    "cannot unpack {}",
                    type_name(other)
                )));
            }
        };
        if items.len() != expected {
            return Err(Unwind::value_error(format!(
                "expected {expected} values to unpack, got {}",
                items.len()
            )));
        }
        Ok(items)
    }

    fn read_target(&mut self, target: &Target) -> EvalResult {
        match target {
            Target::Name(name, pos) => self.lookup(name).ok_or_else(|| {
                Unwind::exc("NameError", format!("name '{name}' is not defined")).at(*pos)
            }),
            Target::Subscript {
                value,
                index,
                pos,
            } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                self.subscript_get(&container, &index).map_err(|u| u.at(*pos))
            }
            Target::Attribute { pos, .. } | Target::Tuple(_, pos) => Err(Unwind::Internal(
                format!("unsupported augmented-assignment target at {pos}"),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::None(_) => Ok(Value::None),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::Int(i, _) => Ok(Value::Int(*i)),
            Expr::Float(f, _) => Ok(Value::Float(*f)),
            Expr::Str(s, _) => Ok(Value::str(s.as_str())),
            Expr::Name(name, pos) => self.eval_name(name, *pos),
            Expr::List(items, _) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::list(out))
            }
            Expr::Tuple(items, _) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::tuple(out))
            }
            Expr::Set(items, pos) => {
                let mut set = SetVal::default();
                for item in items {
                    let value = self.eval(item)?;
                    set.insert(value).map_err(|e| Unwind::Exc(e.at(*pos)))?;
                }
                Ok(Value::set(set))
            }
            Expr::Dict { items, pos } => {
                let mut map = DictMap::default();
                for (key, value) in items {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    map.insert(key, value).map_err(|e| Unwind::Exc(e.at(*pos)))?;
                }
                Ok(Value::dict(map))
            }
            Expr::Unary { op, operand, pos } => {
                let operand = self.eval(operand)?;
                self.unary(*op, operand).map_err(|u| u.at(*pos))
            }
            Expr::Binary {
                op, left, right, pos,
            } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right).map_err(|u| u.at(*pos))
            }
            Expr::BoolChain { op, values, .. } => {
                debug_assert!(!values.is_empty());
                let mut last = Value::None;
                for (i, item) in values.iter().enumerate() {
                    last = self.eval(item)?;
                    let is_last = i == values.len() - 1;
                    if !is_last {
                        match op {
                            BoolOp::And if !truthy(&last) => return Ok(last),
                            BoolOp::Or if truthy(&last) => return Ok(last),
                            _ => {}
                        }
                    }
                }
                Ok(last)
            }
            Expr::Compare { left, rest, pos } => {
                let mut current = self.eval(left)?;
                for (op, rhs) in rest {
                    let rhs = self.eval(rhs)?;
                    if !self.compare(*op, &current, &rhs).map_err(|u| u.at(*pos))? {
                        return Ok(Value::Bool(false));
                    }
                    current = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::Cond {
                test, body, orelse, ..
            } => {
                if truthy(&self.eval(test)?) {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call {
                func,
                args,
                kwargs,
                pos,
            } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(value)?));
                }
                // Method calls dispatch on the receiver without materializing
                // a bound-method value.
                if let Expr::Attribute { value, attr, .. } = func.as_ref() {
                    let recv = self.eval(value)?;
                    return self
                        .call_method(recv, attr, arg_values, kwarg_values)
                        .map_err(|u| u.at(*pos));
                }
                let callee = self.eval(func)?;
                self.call_value(callee, arg_values, kwarg_values)
                    .map_err(|u| u.at(*pos))
            }
            Expr::Attribute { value, attr, pos } => {
                let recv = self.eval(value)?;
                self.attribute(&recv, attr).map_err(|u| u.at(*pos))
            }
            Expr::Subscript { value, index, pos } => {
                let container = self.eval(value)?;
                match index.as_ref() {
                    Index::Item(item) => {
                        let index = self.eval(item)?;
                        self.subscript_get(&container, &index).map_err(|u| u.at(*pos))
                    }
                    Index::Slice { lower, upper } => {
                        let lower = match lower {
                            Some(e) => Some(self.expect_int(e)?),
                            None => None,
                        };
                        let upper = match upper {
                            Some(e) => Some(self.expect_int(e)?),
                            None => None,
                        };
                        self.slice_get(&container, lower, upper).map_err(|u| u.at(*pos))
                    }
                }
            }
            Expr::Comp {
                kind,
                key,
                value,
                fors,
                pos,
            } => self.comprehension(*kind, key, value.as_deref(), fors, *pos),
            Expr::Banned { construct, .. } => Err(Unwind::Internal(format!(
                "banned construct '{construct}' reached the interpreter"
            ))),
        }
    }

    fn eval_name(&mut self, name: &str, pos: rlm_lang::Pos) -> EvalResult {
        if let Some(value) = self.lookup(name) {
            return Ok(value);
        }
        if rlm_lang::ALLOWED_BUILTINS.contains(&name) {
            // Builtins are interned by name; the table lives in `builtins`.
            if let Some(interned) = builtins::intern(name) {
                return Ok(Value::Builtin(interned));
            }
        }
        Err(Unwind::exc("NameError", format!("name '{name}' is not defined")).at(pos))
    }

    fn expect_int(&mut self, expr: &Expr) -> Result<i64, Unwind> {
        match self.eval(expr)? {
            Value::Int(i) => Ok(i),
            other => Err(Unwind::type_error(format!(
                "slice bound must be an integer, got {}",
                type_name(&other)
            ))
            .at(expr.pos())),
        }
    }

    fn comprehension(
        &mut self,
        kind: CompKind,
        key: &Expr,
        value: Option<&Expr>,
        fors: &[CompFor],
        pos: rlm_lang::Pos,
    ) -> EvalResult {
        enum Acc {
            List(Vec<Value>),
            Set(SetVal),
            Dict(DictMap),
        }
        let mut acc = match kind {
            CompKind::List | CompKind::Generator => Acc::List(Vec::new()),
            CompKind::Set => Acc::Set(SetVal::default()),
            CompKind::Dict => Acc::Dict(DictMap::default()),
        };
        self.scopes.push(Rc::new(RefCell::new(HashMap::new())));
        let result = self.comp_rec(fors, key, value, &mut |_interp, k, v| match (&mut acc, v) {
            (Acc::List(items), _) => {
                items.push(k);
                Ok(())
            }
            (Acc::Set(set), _) => set.insert(k).map_err(|e| Unwind::Exc(e.at(pos))),
            (Acc::Dict(map), Some(v)) => map.insert(k, v).map_err(|e| Unwind::Exc(e.at(pos))),
            (Acc::Dict(_), None) => {
                Err(Unwind::Internal("dict comprehension without value".to_string()))
            }
        });
        self.scopes.pop();
        result?;
        Ok(match acc {
            Acc::List(items) => Value::list(items),
            Acc::Set(set) => Value::set(set),
            Acc::Dict(map) => Value::dict(map),
        })
    }

    fn comp_rec(
        &mut self,
        fors: &[CompFor],
        key: &Expr,
        value: Option<&Expr>,
        emit: &mut dyn FnMut(&mut Self, Value, Option<Value>) -> ExecResult,
    ) -> ExecResult {
        let Some((clause, rest)) = fors.split_first() else {
            let k = self.eval(key)?;
            let v = match value {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            };
            return emit(self, k, v);
        };
        let iterable = self.eval(&clause.iter)?;
        let mut iter_state = self.make_iter(iterable)?;
        'outer: loop {
            self.tick()?;
            let Some(item) = self.iter_next(&mut iter_state)? else {
                break;
            };
            self.assign(&clause.target, item)?;
            for test in &clause.ifs {
                if !truthy(&self.eval(test)?) {
                    continue 'outer;
                }
            }
            self.comp_rec(rest, key, value, emit)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Iteration protocol
    // ------------------------------------------------------------------

    pub(crate) fn make_iter(&mut self, value: Value) -> Result<IterState, Unwind> {
        match value {
            Value::List(items) => Ok(IterState::Seq {
                items: items.borrow().clone(),
                at: 0,
            }),
            Value::Tuple(items) => Ok(IterState::Seq {
                items: items.as_ref().clone(),
                at: 0,
            }),
            Value::Str(s) => Ok(IterState::Seq {
                items: s.chars().map(|c| Value::str(c.to_string())).collect(),
                at: 0,
            }),
            Value::Dict(map) => Ok(IterState::Seq {
                items: map.borrow().entries.iter().map(|(k, _)| k.clone()).collect(),
                at: 0,
            }),
            Value::Set(set) => {
                let mut items = set.borrow().items.clone();
                items.sort_by(total_order);
                Ok(IterState::Seq { items, at: 0 })
            }
            Value::Range { start, stop, step } => Ok(IterState::Range {
                cur: start,
                stop,
                step,
            }),
            Value::Lines(iter) => Ok(IterState::Lines(iter)),
            other => Err(Unwind::type_error(format!(
                "{} is not iterable",
                type_name(&other)
            ))),
        }
    }

    pub(crate) fn iter_next(&mut self, state: &mut IterState) -> Result<Option<Value>, Unwind> {
        match state {
            IterState::Seq { items, at } => {
                if *at < items.len() {
                    let value = items[*at].clone();
                    *at += 1;
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            IterState::Range { cur, stop, step } => {
                let done = (*step > 0 && *cur >= *stop) || (*step < 0 && *cur <= *stop);
                if done {
                    Ok(None)
                } else {
                    let value = Value::Int(*cur);
                    *cur += *step;
                    Ok(Some(value))
                }
            }
            IterState::Lines(iter) => match iter.borrow_mut().next_line()? {
                Some((start, text)) => Ok(Some(Value::tuple(vec![
                    Value::Int(start as i64),
                    Value::str(text),
                ]))),
                None => Ok(None),
            },
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        match callee {
            Value::Func(func) => self.call_func(&func, args, kwargs),
            Value::Builtin(name) => builtins::call(self, name, args, kwargs),
            Value::BoundMethod { recv, name } => self.call_method(*recv, &name, args, kwargs),
            other => Err(Unwind::type_error(format!(
                "{} is not callable",
                type_name(&other)
            ))),
        }
    }

    fn call_func(
        &mut self,
        func: &Rc<Func>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        if self.call_depth.get() >= MAX_CALL_DEPTH {
            return Err(Unwind::exc(
                "RecursionError",
                "maximum call depth exceeded",
            ));
        }
        let mut frame: HashMap<String, Value> = HashMap::new();
        if args.len() > func.params.len() {
            return Err(Unwind::type_error(format!(
                "{}() takes {} arguments, got {}",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        let mut args = args.into_iter();
        for param in &func.params {
            if let Some(value) = args.next() {
                frame.insert(param.name.clone(), value);
            }
        }
        for (name, value) in kwargs {
            if !func.params.iter().any(|p| p.name == name) {
                return Err(Unwind::type_error(format!(
                    "{}() got an unexpected keyword argument '{name}'",
                    func.name
                )));
            }
            if frame.contains_key(&name) {
                return Err(Unwind::type_error(format!(
                    "{}() got multiple values for argument '{name}'",
                    func.name
                )));
            }
            frame.insert(name, value);
        }
        for param in &func.params {
            if !frame.contains_key(&param.name) {
                match &param.default {
                    Some(default) => {
                        // Defaults are literals by policy; evaluating them
                        // here cannot observe or mutate anything.
                        let value = self.eval(default)?;
                        frame.insert(param.name.clone(), value);
                    }
                    None => {
                        return Err(Unwind::type_error(format!(
                            "{}() missing required argument '{}'",
                            func.name, param.name
                        )));
                    }
                }
            }
        }

        let saved = std::mem::replace(&mut self.scopes, func.closure.clone());
        self.scopes.push(Rc::new(RefCell::new(frame)));
        self.call_depth.set(self.call_depth.get() + 1);
        let result = self.exec_block(&func.body);
        self.call_depth.set(self.call_depth.get() - 1);
        self.scopes = saved;

        match result {
            Ok(()) => Ok(Value::None),
            Err(Unwind::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn call_method(
        &mut self,
        recv: Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        match &recv {
            Value::Ctx(view) => match name {
                "docs" => {
                    builtins::expect_arity(name, &args, 0, 0)?;
                    Ok(Value::list(
                        view.docs().iter().map(|d| Value::Doc(Rc::clone(d))).collect(),
                    ))
                }
                _ => Err(no_attr("context", name)),
            },
            Value::Doc(doc) => self.call_doc_method(doc.clone(), name, args, kwargs),
            Value::Tool(tool) => self.call_tool_method(&Rc::clone(tool), name, args, kwargs),
            _ => builtins::value_method(self, recv, name, args, kwargs),
        }
    }

    fn call_doc_method(
        &mut self,
        doc: Rc<crate::ctx::DocView>,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        let mut named = builtins::Kwargs::new(kwargs);
        match name {
            "slice" => {
                builtins::expect_arity(name, &args, 2, 2)?;
                named.finish()?;
                let start = builtins::as_int(&args[0], "start")?;
                let end = builtins::as_int(&args[1], "end")?;
                let text = doc.slice(start, end)?;
                Ok(Value::str(text))
            }
            "find" => {
                builtins::expect_arity(name, &args, 1, 2)?;
                let needle = builtins::as_str(&args[0], "needle")?;
                let start = match args.get(1) {
                    Some(v) => builtins::as_int(v, "start")?,
                    None => match named.take("start") {
                        Some(v) => builtins::as_int(&v, "start")?,
                        None => 0,
                    },
                };
                named.finish()?;
                let hit = doc.find(&needle, start)?;
                Ok(Value::Int(hit))
            }
            "iter_lines" => {
                builtins::expect_arity(name, &args, 0, 2)?;
                let start = match args.first() {
                    Some(v) => builtins::as_int(v, "start")?,
                    None => match named.take("start") {
                        Some(v) => builtins::as_int(&v, "start")?,
                        None => 0,
                    },
                };
                let end = match args.get(1) {
                    Some(Value::None) | None => match named.take("end") {
                        Some(Value::None) | None => None,
                        Some(v) => Some(builtins::as_int(&v, "end")?),
                    },
                    Some(v) => Some(builtins::as_int(v, "end")?),
                };
                named.finish()?;
                let iter: LineIter = doc.iter_lines(start, end)?;
                Ok(Value::Lines(Rc::new(RefCell::new(iter))))
            }
            _ => Err(no_attr("document", name)),
        }
    }

    fn call_tool_method(
        &mut self,
        tool: &Rc<crate::toolapi::ToolApi>,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        let mut named = builtins::Kwargs::new(kwargs);
        match name {
            "subcall" => {
                builtins::expect_arity(name, &args, 1, 3)?;
                let prompt = builtins::as_str(&args[0], "prompt")?;
                let model_hint = match args.get(1).cloned().or_else(|| named.take("model_hint")) {
                    Some(Value::None) | None => None,
                    Some(v) => Some(builtins::as_str(&v, "model_hint")?),
                };
                let max_tokens = match args.get(2).cloned().or_else(|| named.take("max_tokens")) {
                    Some(Value::None) | None => None,
                    Some(v) => Some(builtins::as_int(&v, "max_tokens")?),
                };
                named.finish()?;
                let handle = tool.subcall(&prompt, model_hint.as_deref(), max_tokens)?;
                Ok(Value::str(handle))
            }
            "search" => {
                builtins::expect_arity(name, &args, 1, 2)?;
                let query = builtins::as_str(&args[0], "query")?;
                let k = match args.get(1).cloned().or_else(|| named.take("k")) {
                    Some(v) => builtins::as_int(&v, "k")?,
                    None => 5,
                };
                named.finish()?;
                let handle = tool.search(&query, k)?;
                Ok(Value::str(handle))
            }
            "get" => {
                builtins::expect_arity(name, &args, 1, 1)?;
                named.finish()?;
                let handle = builtins::as_str(&args[0], "handle")?;
                Ok(match tool.get(&handle) {
                    Some(json) => crate::value::from_json(json),
                    None => Value::None,
                })
            }
            "FINAL" => {
                builtins::expect_arity(name, &args, 2, 2)?;
                named.finish()?;
                let answer = builtins::as_str(&args[0], "answer")?;
                let spans = match &args[1] {
                    Value::List(items) => {
                        let items = items.borrow();
                        let mut out = Vec::with_capacity(items.len());
                        for item in items.iter() {
                            out.push(crate::value::to_json(item)?);
                        }
                        out
                    }
                    other => {
                        return Err(Unwind::type_error(format!(
                            "FINAL spans must be a list, got {}",
                            type_name(other)
                        )));
                    }
                };
                tool.finalize(&answer, spans)?;
                // finalize always unwinds.
                Err(Unwind::Internal("FINAL returned".to_string()))
            }
            _ => Err(no_attr("tool", name)),
        }
    }

    fn attribute(&mut self, recv: &Value, attr: &str) -> EvalResult {
        match recv {
            Value::Doc(doc) => match attr {
                "id" => Ok(Value::str(doc.id().as_str())),
                "length" => Ok(Value::Int(doc.length() as i64)),
                "slice" | "find" | "iter_lines" => Ok(Value::BoundMethod {
                    recv: Box::new(recv.clone()),
                    name: attr.into(),
                }),
                _ => Err(no_attr("document", attr)),
            },
            Value::Ctx(_) => match attr {
                "docs" => Ok(Value::BoundMethod {
                    recv: Box::new(recv.clone()),
                    name: attr.into(),
                }),
                _ => Err(no_attr("context", attr)),
            },
            Value::Tool(_) => match attr {
                "subcall" | "search" | "get" | "FINAL" => Ok(Value::BoundMethod {
                    recv: Box::new(recv.clone()),
                    name: attr.into(),
                }),
                _ => Err(no_attr("tool", attr)),
            },
            Value::Str(_) if builtins::is_str_method(attr) => Ok(Value::BoundMethod {
                recv: Box::new(recv.clone()),
                name: attr.into(),
            }),
            Value::List(_) if builtins::is_list_method(attr) => Ok(Value::BoundMethod {
                recv: Box::new(recv.clone()),
                name: attr.into(),
            }),
            Value::Dict(_) if builtins::is_dict_method(attr) => Ok(Value::BoundMethod {
                recv: Box::new(recv.clone()),
                name: attr.into(),
            }),
            Value::Set(_) if builtins::is_set_method(attr) => Ok(Value::BoundMethod {
                recv: Box::new(recv.clone()),
                name: attr.into(),
            }),
            other => Err(no_attr(type_name(other), attr)),
        }
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn unary(&mut self, op: UnaryOp, operand: Value) -> EvalResult {
        match (op, operand) {
            (UnaryOp::Not, v) => Ok(Value::Bool(!truthy(&v))),
            (UnaryOp::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Unwind::value_error("integer overflow")),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(b))),
            (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
            (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
            (op, v) => Err(Unwind::type_error(format!(
                "bad operand type for unary {}: {}",
                match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    UnaryOp::Not => "not",
                },
                type_name(&v)
            ))),
        }
    }

    pub(crate) fn binary(&mut self, op: BinOp, left: Value, right: Value) -> EvalResult {
        use Value::{Float, Int, List, Str, Tuple};
        let type_mismatch = |l: &Value, r: &Value| {
            Unwind::type_error(format!(
                "unsupported operand types for {}: {} and {}",
                op.as_str(),
                type_name(l),
                type_name(r)
            ))
        };
        // Bools participate in arithmetic as ints.
        let left = match left {
            Value::Bool(b) => Int(i64::from(b)),
            other => other,
        };
        let right = match right {
            Value::Bool(b) => Int(i64::from(b)),
            other => other,
        };
        match (op, &left, &right) {
            (BinOp::Add, Int(a), Int(b)) => a
                .checked_add(*b)
                .map(Int)
                .ok_or_else(|| Unwind::value_error("integer overflow")),
            (BinOp::Sub, Int(a), Int(b)) => a
                .checked_sub(*b)
                .map(Int)
                .ok_or_else(|| Unwind::value_error("integer overflow")),
            (BinOp::Mul, Int(a), Int(b)) => a
                .checked_mul(*b)
                .map(Int)
                .ok_or_else(|| Unwind::value_error("integer overflow")),
            (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div, _, _)
                if matches!(&left, Int(_) | Float(_)) && matches!(&right, Int(_) | Float(_)) =>
            {
                let a = num_f64(&left);
                let b = num_f64(&right);
                match op {
                    BinOp::Add => Ok(Float(a + b)),
                    BinOp::Sub => Ok(Float(a - b)),
                    BinOp::Mul => Ok(Float(a * b)),
                    BinOp::Div => {
                        if b == 0.0 {
                            Err(Unwind::exc("ZeroDivisionError", "division by zero"))
                        } else {
                            Ok(Float(a / b))
                        }
                    }
                    _ => unreachable!(),
                }
            }
            (BinOp::FloorDiv, Int(a), Int(b)) => {
                if *b == 0 {
                    Err(Unwind::exc("ZeroDivisionError", "integer division by zero"))
                } else {
                    let q = a / b;
                    let adjust = (a % b != 0) && ((*a < 0) != (*b < 0));
                    Ok(Int(if adjust { q - 1 } else { q }))
                }
            }
            (BinOp::FloorDiv, _, _)
                if matches!(&left, Int(_) | Float(_)) && matches!(&right, Int(_) | Float(_)) =>
            {
                let b = num_f64(&right);
                if b == 0.0 {
                    Err(Unwind::exc("ZeroDivisionError", "float floor division by zero"))
                } else {
                    Ok(Float((num_f64(&left) / b).floor()))
                }
            }
            (BinOp::Mod, Int(a), Int(b)) => {
                if *b == 0 {
                    Err(Unwind::exc("ZeroDivisionError", "integer modulo by zero"))
                } else {
                    // Result carries the divisor's sign.
                    let r = a % b;
                    Ok(Int(if r != 0 && (r < 0) != (*b < 0) { r + b } else { r }))
                }
            }
            (BinOp::Mod, _, _)
                if matches!(&left, Int(_) | Float(_)) && matches!(&right, Int(_) | Float(_)) =>
            {
                let a = num_f64(&left);
                let b = num_f64(&right);
                if b == 0.0 {
                    Err(Unwind::exc("ZeroDivisionError", "float modulo by zero"))
                } else {
                    let r = a % b;
                    Ok(Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }))
                }
            }
            (BinOp::Pow, Int(a), Int(b)) => {
                if *b >= 0 {
                    let exp = u32::try_from(*b)
                        .map_err(|_| Unwind::value_error("exponent too large"))?;
                    a.checked_pow(exp)
                        .map(Int)
                        .ok_or_else(|| Unwind::value_error("integer overflow"))
                } else {
                    Ok(Float((*a as f64).powi(*b as i32)))
                }
            }
            (BinOp::Pow, _, _)
                if matches!(&left, Int(_) | Float(_)) && matches!(&right, Int(_) | Float(_)) =>
            {
                Ok(Float(num_f64(&left).powf(num_f64(&right))))
            }
            (BinOp::Add, Str(a), Str(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Ok(Value::str(out))
            }
            (BinOp::Add, List(a), List(b)) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                Ok(Value::list(out))
            }
            (BinOp::Add, Tuple(a), Tuple(b)) => {
                let mut out = a.as_ref().clone();
                out.extend(b.iter().cloned());
                Ok(Value::tuple(out))
            }
            (BinOp::Mul, Str(s), Int(n)) | (BinOp::Mul, Int(n), Str(s)) => {
                let n = usize::try_from((*n).max(0)).unwrap_or(0);
                if s.len().saturating_mul(n) > 1 << 24 {
                    return Err(Unwind::value_error("repeated string is too large"));
                }
                Ok(Value::str(s.repeat(n)))
            }
            (BinOp::Mul, List(items), Int(n)) | (BinOp::Mul, Int(n), List(items)) => {
                let n = usize::try_from((*n).max(0)).unwrap_or(0);
                let items = items.borrow();
                if items.len().saturating_mul(n) > 1 << 20 {
                    return Err(Unwind::value_error("repeated list is too large"));
                }
                let mut out = Vec::with_capacity(items.len() * n);
                for _ in 0..n {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            _ => Err(type_mismatch(&left, &right)),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, Unwind> {
        match op {
            CmpOp::Eq => value_eq(left, right).map_err(Unwind::Exc),
            CmpOp::NotEq => value_eq(left, right).map(|b| !b).map_err(Unwind::Exc),
            CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq => {
                let ordering = value_cmp(left, right).map_err(Unwind::Exc)?;
                Ok(match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::LtEq => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    CmpOp::GtEq => ordering.is_ge(),
                    _ => unreachable!(),
                })
            }
            CmpOp::In | CmpOp::NotIn => {
                let contains = self.contains(right, left)?;
                Ok(if op == CmpOp::In { contains } else { !contains })
            }
            CmpOp::Is | CmpOp::IsNot => {
                let same = identical(left, right);
                Ok(if op == CmpOp::Is { same } else { !same })
            }
        }
    }

    fn contains(&mut self, container: &Value, item: &Value) -> Result<bool, Unwind> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => Err(Unwind::type_error(format!(
                    "'in <str>' requires a string, got {}",
                    type_name(other)
                ))),
            },
            Value::List(items) => {
                for candidate in items.borrow().iter() {
                    if value_eq(candidate, item).map_err(Unwind::Exc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Tuple(items) => {
                for candidate in items.iter() {
                    if value_eq(candidate, item).map_err(Unwind::Exc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Dict(map) => map.borrow().get(item).map(|v| v.is_some()).map_err(Unwind::Exc),
            Value::Set(set) => set.borrow().contains(item).map_err(Unwind::Exc),
            Value::Range { start, stop, step } => match item {
                Value::Int(i) => {
                    let within = (*step > 0 && i >= start && i < stop)
                        || (*step < 0 && i <= start && i > stop);
                    Ok(within && (i - start) % step == 0)
                }
                _ => Ok(false),
            },
            other => Err(Unwind::type_error(format!(
                "argument of type {} is not a container",
                type_name(other)
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Subscripts
    // ------------------------------------------------------------------

    fn subscript_get(&mut self, container: &Value, index: &Value) -> EvalResult {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let i = seq_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = seq_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = seq_index(index, chars.len())?;
                Ok(Value::str(chars[i].to_string()))
            }
            Value::Dict(map) => match map.borrow().get(index).map_err(Unwind::Exc)? {
                Some(value) => Ok(value.clone()),
                None => Err(Unwind::key_error(crate::value::to_repr(index))),
            },
            other => Err(Unwind::type_error(format!(
                "{} is not subscriptable",
                type_name(other)
            ))),
        }
    }

    fn subscript_set(&mut self, container: &Value, index: Value, value: Value) -> ExecResult {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = seq_index(&index, items.len())?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(map) => {
                map.borrow_mut().insert(index, value).map_err(Unwind::Exc)?;
                Ok(())
            }
            other => Err(Unwind::type_error(format!(
                "{} does not support item assignment",
                type_name(other)
            ))),
        }
    }

    fn slice_get(&mut self, container: &Value, lower: Option<i64>, upper: Option<i64>) -> EvalResult {
        fn bounds(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
            let len = len as i64;
            let resolve = |bound: i64| -> i64 {
                if bound < 0 { (len + bound).max(0) } else { bound.min(len) }
            };
            let lo = resolve(lower.unwrap_or(0));
            let hi = resolve(upper.unwrap_or(len));
            (lo as usize, hi.max(lo) as usize)
        }
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let (lo, hi) = bounds(items.len(), lower, upper);
                Ok(Value::list(items[lo..hi].to_vec()))
            }
            Value::Tuple(items) => {
                let (lo, hi) = bounds(items.len(), lower, upper);
                Ok(Value::tuple(items[lo..hi].to_vec()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (lo, hi) = bounds(chars.len(), lower, upper);
                Ok(Value::str(chars[lo..hi].iter().collect::<String>()))
            }
            other => Err(Unwind::type_error(format!(
                "{} cannot be sliced",
                type_name(other)
            ))),
        }
    }
}

/// Iterator state for the `for` protocol.
pub(crate) enum IterState {
    Seq { items: Vec<Value>, at: usize },
    Range { cur: i64, stop: i64, step: i64 },
    Lines(Rc<RefCell<LineIter>>),
}

fn num_f64(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        _ => false,
    }
}

fn seq_index(index: &Value, len: usize) -> Result<usize, Unwind> {
    let Value::Int(i) = index else {
        return Err(Unwind::type_error(format!(
            "indices must be integers, got {}",
            type_name(index)
        )));
    };
    let len_i = len as i64;
    let resolved = if *i < 0 { len_i + i } else { *i };
    if resolved < 0 || resolved >= len_i {
        return Err(Unwind::index_error(format!("index {i} out of range")));
    }
    Ok(resolved as usize)
}

fn no_attr(type_name: &str, attr: &str) -> Unwind {
    Unwind::Exc(RuntimeExc::new(
        "AttributeError",
        format!("'{type_name}' object has no attribute '{attr}'"),
    ))
}

trait AtPos {
    fn at(self, pos: rlm_lang::Pos) -> Unwind;
}

impl AtPos for Unwind {
    /// Attach a position to a catchable exception; other unwinds pass
    /// through untouched.
    fn at(self, pos: rlm_lang::Pos) -> Unwind {
        match self {
            Unwind::Exc(exc) => Unwind::Exc(exc.at(pos)),
            other => other,
        }
    }
}
