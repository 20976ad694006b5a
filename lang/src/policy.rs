//! Static policy over parsed programs.
//!
//! The walk enforces the construct whitelist, the dunder ban, and the
//! free-name rule: every name a program reads must be an injected capability
//! (`ctx`, `tool`, `state`), a whitelisted builtin, or a name the program
//! bound earlier. The first violation wins and carries a stable code plus a
//! source position; a program that passes has no way to reach imports,
//! reflection, or dynamic evaluation at runtime.

use std::collections::HashSet;

use serde::Serialize;

use crate::ast::{CompFor, ExceptHandler, Expr, Index, Module, Param, Stmt, Target};
use crate::parser::{ParseError, parse};
use crate::token::Pos;

/// Builtins visible to programs. Everything else, `eval` and `__import__`
/// included, resolves to nothing.
pub const ALLOWED_BUILTINS: &[&str] = &[
    "len", "range", "sorted", "min", "max", "sum", "enumerate", "zip", "map", "filter", "abs",
    "int", "float", "str", "bool", "list", "dict", "set", "tuple", "any", "all", "print",
];

/// Exception types namable in `except` clauses.
pub const ALLOWED_EXCEPTIONS: &[&str] = &[
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "ZeroDivisionError",
    "StopIteration",
    "RangeError",
    "DocNotFound",
];

/// Names injected into every program frame by the executor.
const INJECTED: &[&str] = &["ctx", "tool", "state"];

/// Stable violation codes; these surface verbatim in step outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicyCode {
    SyntaxError,
    BannedConstruct,
    UnknownName,
    /// Any reference to a `__dunder__` name, as attribute or identifier.
    DunderAttribute,
}

impl PolicyCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyCode::SyntaxError => "SyntaxError",
            PolicyCode::BannedConstruct => "BannedConstruct",
            PolicyCode::UnknownName => "UnknownName",
            PolicyCode::DunderAttribute => "DunderAttribute",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyViolation {
    pub code: PolicyCode,
    /// The offending construct or name.
    pub construct: String,
    pub message: String,
    pub pos: Option<Pos>,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.code.as_str(), self.construct, self.message)?;
        if let Some(pos) = self.pos {
            write!(f, " at {pos}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PolicyViolation {}

impl PolicyViolation {
    fn banned(construct: impl Into<String>, message: impl Into<String>, pos: Pos) -> Self {
        Self {
            code: PolicyCode::BannedConstruct,
            construct: construct.into(),
            message: message.into(),
            pos: Some(pos),
        }
    }

    fn unknown_name(name: impl Into<String>, pos: Pos) -> Self {
        let name = name.into();
        Self {
            code: PolicyCode::UnknownName,
            message: format!("name '{name}' is not defined"),
            construct: name,
            pos: Some(pos),
        }
    }

    fn dunder(name: impl Into<String>, pos: Pos) -> Self {
        let name = name.into();
        Self {
            code: PolicyCode::DunderAttribute,
            message: format!("'{name}' references a reserved dunder name"),
            construct: name,
            pos: Some(pos),
        }
    }
}

/// The validator. Allowlists are fixed at construction and shared
/// process-wide; validation itself is stateless and reentrant.
#[derive(Debug, Clone)]
pub struct Policy {
    builtins: HashSet<&'static str>,
    exceptions: HashSet<&'static str>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            builtins: ALLOWED_BUILTINS.iter().copied().collect(),
            exceptions: ALLOWED_EXCEPTIONS.iter().copied().collect(),
        }
    }
}

impl Policy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    /// Parse and validate program text in one shot. Parse failures become
    /// `SyntaxError` violations.
    pub fn validate_source(&self, source: &str) -> Result<Module, PolicyViolation> {
        let module = parse(source).map_err(|err| {
            let pos = match &err {
                ParseError::Unexpected { pos, .. } => Some(*pos),
                ParseError::Lex(_) => None,
            };
            PolicyViolation {
                code: PolicyCode::SyntaxError,
                construct: "syntax".to_string(),
                message: err.to_string(),
                pos,
            }
        })?;
        self.validate(&module)?;
        Ok(module)
    }

    /// Walk a parsed module; the first violation wins.
    pub fn validate(&self, module: &Module) -> Result<(), PolicyViolation> {
        let mut walker = Walker {
            policy: self,
            scopes: vec![HashSet::new()],
            loop_depth: 0,
            func_depth: 0,
        };
        walker.block(&module.body)
    }
}

struct Walker<'a> {
    policy: &'a Policy,
    /// Innermost scope last. Name resolution searches all of them.
    scopes: Vec<HashSet<String>>,
    loop_depth: u32,
    func_depth: u32,
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

impl Walker<'_> {
    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn resolves(&self, name: &str) -> bool {
        INJECTED.contains(&name)
            || self.policy.builtins.contains(name)
            || self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), PolicyViolation> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), PolicyViolation> {
        match stmt {
            Stmt::Banned { construct, pos } => Err(PolicyViolation::banned(
                *construct,
                format!("'{construct}' is not allowed in step programs"),
                *pos,
            )),
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Assign { targets, value, .. } => {
                self.expr(value)?;
                for target in targets {
                    self.bind_target(target)?;
                }
                Ok(())
            }
            Stmt::AugAssign { target, value, .. } => {
                self.expr(value)?;
                // Augmented assignment reads the target before writing it.
                match target {
                    Target::Name(name, pos) => {
                        if !self.resolves(name) {
                            return Err(PolicyViolation::unknown_name(name, *pos));
                        }
                        Ok(())
                    }
                    _ => self.bind_target(target),
                }
            }
            Stmt::If { branches, orelse, .. } => {
                for (test, body) in branches {
                    self.expr(test)?;
                    self.block(body)?;
                }
                self.block(orelse)
            }
            Stmt::While { test, body, .. } => {
                self.expr(test)?;
                self.loop_depth += 1;
                let result = self.block(body);
                self.loop_depth -= 1;
                result
            }
            Stmt::For {
                target, iter, body, ..
            } => {
                self.expr(iter)?;
                self.bind_target(target)?;
                self.loop_depth += 1;
                let result = self.block(body);
                self.loop_depth -= 1;
                result
            }
            Stmt::FuncDef {
                name,
                params,
                body,
                pos,
            } => {
                if is_dunder(name) {
                    return Err(PolicyViolation::dunder(name, *pos));
                }
                for Param { default, pos, name } in params {
                    if let Some(default) = default {
                        if !default.is_literal() {
                            return Err(PolicyViolation::banned(
                                "non_literal_default",
                                format!("default for parameter '{name}' must be a literal"),
                                *pos,
                            ));
                        }
                    }
                }
                // Defined before the body so the function can recurse.
                self.define(name);
                self.scopes.push(params.iter().map(|p| p.name.clone()).collect());
                self.func_depth += 1;
                let result = self.block(body);
                self.func_depth -= 1;
                self.scopes.pop();
                result
            }
            Stmt::Return { value, pos } => {
                if self.func_depth == 0 {
                    return Err(PolicyViolation::banned(
                        "module_return",
                        "'return' outside of a function",
                        *pos,
                    ));
                }
                if let Some(value) = value {
                    self.expr(value)?;
                }
                Ok(())
            }
            Stmt::Break { pos } => {
                if self.loop_depth == 0 {
                    return Err(PolicyViolation::banned(
                        "break_outside_loop",
                        "'break' outside of a loop",
                        *pos,
                    ));
                }
                Ok(())
            }
            Stmt::Continue { pos } => {
                if self.loop_depth == 0 {
                    return Err(PolicyViolation::banned(
                        "continue_outside_loop",
                        "'continue' outside of a loop",
                        *pos,
                    ));
                }
                Ok(())
            }
            Stmt::Pass { .. } => Ok(()),
            Stmt::Try {
                body,
                handlers,
                finally,
                ..
            } => {
                self.block(body)?;
                for handler in handlers {
                    self.handler(handler)?;
                }
                self.block(finally)
            }
        }
    }

    fn handler(&mut self, handler: &ExceptHandler) -> Result<(), PolicyViolation> {
        if handler.names.is_empty() {
            return Err(PolicyViolation::banned(
                "bare_except",
                "'except:' must name exception types from the allowlist",
                handler.pos,
            ));
        }
        for name in &handler.names {
            if !self.policy.exceptions.contains(name.as_str()) {
                return Err(PolicyViolation::unknown_name(name, handler.pos));
            }
        }
        if let Some(alias) = &handler.alias {
            self.define(alias);
        }
        self.block(&handler.body)
    }

    fn bind_target(&mut self, target: &Target) -> Result<(), PolicyViolation> {
        match target {
            Target::Name(name, pos) => {
                if is_dunder(name) {
                    return Err(PolicyViolation::dunder(name, *pos));
                }
                self.define(name);
                Ok(())
            }
            Target::Attribute { pos, attr, .. } => Err(PolicyViolation::banned(
                "attribute_assignment",
                format!("cannot assign to attribute '{attr}'"),
                *pos,
            )),
            Target::Subscript { value, index, pos } => {
                self.expr(index)?;
                self.expr(value)?;
                // Only program-owned containers may be written through.
                match subscript_root(value) {
                    Some(root) if root == "state" || self.scopes.iter().any(|s| s.contains(root)) => {
                        Ok(())
                    }
                    Some(root) => Err(PolicyViolation::banned(
                        "foreign_subscript_assignment",
                        format!("cannot assign through subscript of '{root}'"),
                        *pos,
                    )),
                    None => Err(PolicyViolation::banned(
                        "subscript_assignment_target",
                        "subscript assignment must target a named local container",
                        *pos,
                    )),
                }
            }
            Target::Tuple(items, _) => {
                for item in items {
                    self.bind_target(item)?;
                }
                Ok(())
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), PolicyViolation> {
        match expr {
            Expr::Banned { construct, pos } => Err(PolicyViolation::banned(
                *construct,
                format!("'{construct}' is not allowed in step programs"),
                *pos,
            )),
            Expr::Name(name, pos) => {
                if is_dunder(name) {
                    return Err(PolicyViolation::dunder(name, *pos));
                }
                if self.resolves(name) {
                    Ok(())
                } else {
                    Err(PolicyViolation::unknown_name(name, *pos))
                }
            }
            Expr::Attribute { value, attr, pos } => {
                if is_dunder(attr) {
                    return Err(PolicyViolation::dunder(attr, *pos));
                }
                self.expr(value)
            }
            Expr::None(_)
            | Expr::Bool(..)
            | Expr::Int(..)
            | Expr::Float(..)
            | Expr::Str(..) => Ok(()),
            Expr::List(items, _) | Expr::Tuple(items, _) | Expr::Set(items, _) => {
                for item in items {
                    self.expr(item)?;
                }
                Ok(())
            }
            Expr::Dict { items, .. } => {
                for (key, value) in items {
                    self.expr(key)?;
                    self.expr(value)?;
                }
                Ok(())
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            Expr::BoolChain { values, .. } => {
                for value in values {
                    self.expr(value)?;
                }
                Ok(())
            }
            Expr::Compare { left, rest, .. } => {
                self.expr(left)?;
                for (_, right) in rest {
                    self.expr(right)?;
                }
                Ok(())
            }
            Expr::Cond {
                test, body, orelse, ..
            } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            Expr::Call { func, args, kwargs, .. } => {
                self.expr(func)?;
                for arg in args {
                    self.expr(arg)?;
                }
                for (_, value) in kwargs {
                    self.expr(value)?;
                }
                Ok(())
            }
            Expr::Subscript { value, index, .. } => {
                self.expr(value)?;
                match index.as_ref() {
                    Index::Item(item) => self.expr(item),
                    Index::Slice { lower, upper } => {
                        if let Some(lower) = lower {
                            self.expr(lower)?;
                        }
                        if let Some(upper) = upper {
                            self.expr(upper)?;
                        }
                        Ok(())
                    }
                }
            }
            Expr::Comp {
                key, value, fors, ..
            } => {
                self.scopes.push(HashSet::new());
                let result = (|| {
                    for CompFor { target, iter, ifs } in fors {
                        self.expr(iter)?;
                        self.bind_target(target)?;
                        for test in ifs {
                            self.expr(test)?;
                        }
                    }
                    self.expr(key)?;
                    if let Some(value) = value {
                        self.expr(value)?;
                    }
                    Ok(())
                })();
                self.scopes.pop();
                result
            }
        }
    }
}

/// The name at the root of a subscript-target chain, if there is one.
fn subscript_root(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Name(name, _) => Some(name),
        Expr::Subscript { value, .. } => subscript_root(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Policy, PolicyCode};

    fn reject(source: &str) -> (PolicyCode, String) {
        let violation = Policy::new()
            .validate_source(source)
            .expect_err("should be rejected");
        (violation.code, violation.construct)
    }

    fn accept(source: &str) {
        Policy::new().validate_source(source).expect("should pass");
    }

    #[test]
    fn import_is_banned() {
        let (code, construct) = reject("import os\n");
        assert_eq!(code, PolicyCode::BannedConstruct);
        assert_eq!(construct, "import");
    }

    #[test]
    fn from_import_is_banned() {
        let (code, construct) = reject("from os import path\n");
        assert_eq!(code, PolicyCode::BannedConstruct);
        assert_eq!(construct, "import");
    }

    #[test]
    fn dunder_attribute_is_banned() {
        let (code, construct) = reject("x = 1\ny = x.__class__\n");
        assert_eq!(code, PolicyCode::DunderAttribute);
        assert_eq!(construct, "__class__");
    }

    #[test]
    fn dunder_identifiers_are_banned() {
        let (code, construct) = reject("__state__ = 1\n");
        assert_eq!(code, PolicyCode::DunderAttribute);
        assert_eq!(construct, "__state__");
        let (code, _) = reject("def __init__():\n    return 1\n");
        assert_eq!(code, PolicyCode::DunderAttribute);
    }

    #[test]
    fn eval_like_names_do_not_resolve() {
        for name in ["eval", "exec", "__import__", "getattr", "open", "compile"] {
            let (code, _) = reject(&format!("x = {name}\n"));
            assert!(
                matches!(
                    code,
                    PolicyCode::UnknownName
                        | PolicyCode::BannedConstruct
                        | PolicyCode::DunderAttribute
                ),
                "{name} must not resolve"
            );
        }
    }

    #[test]
    fn class_async_yield_with_are_banned() {
        assert_eq!(reject("class A:\n    pass\n").1, "class");
        assert_eq!(reject("async def f():\n    pass\n").1, "async");
        assert_eq!(reject("def f():\n    yield 1\n").1, "yield");
        assert_eq!(reject("with open:\n    pass\n").1, "with");
    }

    #[test]
    fn decorator_is_banned() {
        assert_eq!(reject("@wrap\ndef f():\n    return 1\n").1, "decorator");
    }

    #[test]
    fn global_nonlocal_del_are_banned() {
        assert_eq!(reject("global x\n").1, "global");
        assert_eq!(reject("def f():\n    nonlocal x\n").1, "nonlocal");
        assert_eq!(reject("x = 1\ndel x\n").1, "del");
    }

    #[test]
    fn attribute_assignment_is_banned() {
        let (code, construct) = reject("x = 1\nx.y = 2\n");
        assert_eq!(code, PolicyCode::BannedConstruct);
        assert_eq!(construct, "attribute_assignment");
    }

    #[test]
    fn subscript_assignment_to_locals_and_state_is_allowed() {
        accept("d = {}\nd[\"k\"] = 1\n");
        accept("state[\"seen\"] = True\n");
    }

    #[test]
    fn subscript_assignment_through_capability_is_banned() {
        let (_, construct) = reject("ctx[0] = 1\n");
        assert_eq!(construct, "foreign_subscript_assignment");
    }

    #[test]
    fn unknown_free_name_is_rejected() {
        let (code, construct) = reject("x = y + 1\n");
        assert_eq!(code, PolicyCode::UnknownName);
        assert_eq!(construct, "y");
    }

    #[test]
    fn name_defined_earlier_resolves() {
        accept("y = 1\nx = y + 1\n");
    }

    #[test]
    fn builtins_and_capabilities_resolve() {
        accept("n = len(ctx.docs())\nprint(n)\nstate[\"n\"] = n\n");
    }

    #[test]
    fn bare_except_is_banned() {
        let (_, construct) = reject("try:\n    x = 1\nexcept:\n    x = 2\n");
        assert_eq!(construct, "bare_except");
    }

    #[test]
    fn unlisted_exception_type_is_rejected() {
        let (code, construct) = reject("try:\n    x = 1\nexcept OSError:\n    x = 2\n");
        assert_eq!(code, PolicyCode::UnknownName);
        assert_eq!(construct, "OSError");
    }

    #[test]
    fn listed_exception_with_alias_passes() {
        accept("try:\n    x = 1\nexcept ValueError as e:\n    x = str(e)\n");
    }

    #[test]
    fn syntax_error_has_its_own_code() {
        let violation = Policy::new()
            .validate_source("if x\n    pass\n")
            .expect_err("syntax");
        assert_eq!(violation.code, PolicyCode::SyntaxError);
    }

    #[test]
    fn function_recursion_and_params_resolve() {
        accept("def walk(n):\n    if n <= 0:\n        return 0\n    return walk(n - 1)\nr = walk(3)\n");
    }

    #[test]
    fn non_literal_default_is_banned() {
        let (_, construct) = reject("x = 1\ndef f(a=x):\n    return a\n");
        assert_eq!(construct, "non_literal_default");
    }

    #[test]
    fn comprehension_targets_scope_locally() {
        accept("squares = [i * i for i in range(4)]\n");
        // The comprehension variable does not leak.
        let (code, construct) = reject("squares = [i * i for i in range(4)]\nx = i\n");
        assert_eq!(code, PolicyCode::UnknownName);
        assert_eq!(construct, "i");
    }

    #[test]
    fn first_violation_wins() {
        let violation = Policy::new()
            .validate_source("import os\nx = unknown_thing\n")
            .expect_err("rejected");
        assert_eq!(violation.construct, "import");
    }
}
