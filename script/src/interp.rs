//! Tree-walking evaluator for controller scripts.
//!
//! Every statement and call consumes one unit of fuel. Running out of fuel,
//! exceeding the call depth or nesting evaluation too deeply is fatal: `try`/`catch`
//! in the script cannot observe it. Growing an array or a string past its cap
//! throws a catchable `RangeError`.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{
    ast::{
        BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, LogicalOp, ObjectProp, PropKey, Stmt,
        UnaryOp,
    },
    scope::{Assign, Env, Scope},
    value::{Function, FunctionKind, ObjectRef, PropertyMap, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Statements plus calls allowed per entry into the interpreter.
    pub fuel: u64,
    pub max_call_depth: usize,
    /// Statements and expressions being evaluated at once, across all calls.
    pub max_nesting: usize,
    /// Longest array a script may build, in elements.
    pub max_array_len: usize,
    /// Longest string a script may build, in bytes.
    pub max_string_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 1_000_000,
            max_call_depth: 48,
            max_nesting: 512,
            max_array_len: 1 << 20,
            max_string_len: 1 << 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    FuelExhausted { budget: u64 },
    CallDepthExceeded { limit: usize },
    NestingExceeded { limit: usize },
}

#[derive(Debug, Clone)]
pub enum Exception {
    /// A value thrown by the script (or by a builtin on its behalf).
    Thrown(Value),
    Fatal(Fatal),
}

#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Builtin methods looked up after own properties, per receiver type.
#[derive(Default)]
pub(crate) struct Methods {
    pub(crate) object: PropertyMap,
    pub(crate) array: PropertyMap,
    pub(crate) string: PropertyMap,
    pub(crate) number: PropertyMap,
    pub(crate) function: PropertyMap,
}

pub struct Interpreter {
    globals: Env,
    limits: Limits,
    fuel: u64,
    depth: usize,
    nesting: usize,
    pub(crate) rng: u64,
    pub(crate) label: Rc<str>,
    pub(crate) methods: Methods,
    pub(crate) error_protos: HashMap<&'static str, ObjectRef>,
}

impl Interpreter {
    /// An interpreter whose global scope holds only the sandbox builtins. `label`
    /// tags `console` output.
    pub fn new(label: &str, limits: Limits) -> Self {
        let mut interp = Self {
            globals: Scope::root(),
            limits,
            fuel: limits.fuel,
            depth: 0,
            nesting: 0,
            rng: 0x853c_49e6_748f_ea9b,
            label: label.into(),
            methods: Methods::default(),
            error_protos: HashMap::new(),
        };
        crate::builtins::install(&mut interp);
        interp
    }

    pub fn globals(&self) -> &Env {
        &self.globals
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Reset the fuel budget; called on each entry from the host.
    pub fn refuel(&mut self) {
        self.fuel = self.limits.fuel;
    }

    fn tick(&mut self) -> Result<(), Exception> {
        if self.fuel == 0 {
            return Err(Exception::Fatal(Fatal::FuelExhausted {
                budget: self.limits.fuel,
            }));
        }
        self.fuel -= 1;
        Ok(())
    }

    fn enter(&mut self) -> Result<(), Exception> {
        if self.nesting >= self.limits.max_nesting {
            return Err(Exception::Fatal(Fatal::NestingExceeded {
                limit: self.limits.max_nesting,
            }));
        }
        self.nesting += 1;
        Ok(())
    }

    /// Fails with a `RangeError` when an array would grow past `max_array_len`.
    pub fn check_array_len(&self, len: usize) -> Result<(), Exception> {
        if len > self.limits.max_array_len {
            return Err(self.throw("RangeError", "Invalid array length"));
        }
        Ok(())
    }

    /// Fails with a `RangeError` when a string would grow past `max_string_len`.
    pub fn check_string_len(&self, len: usize) -> Result<(), Exception> {
        if len > self.limits.max_string_len {
            return Err(self.throw("RangeError", "Invalid string length"));
        }
        Ok(())
    }

    /// `String(value)` bounded by `max_string_len`.
    pub fn display(&self, value: &Value) -> Result<String, Exception> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            Value::Array(_) => value
                .try_display(self.limits.max_string_len)
                .ok_or_else(|| self.throw("RangeError", "Invalid string length")),
            other => Ok(other.to_display()),
        }
    }

    /// Concatenation for `+`, template literals and `String.prototype.concat`.
    pub fn concat(&self, parts: &[&str]) -> Result<Value, Exception> {
        let len = parts
            .iter()
            .try_fold(0usize, |len, part| len.checked_add(part.len()))
            .unwrap_or(usize::MAX);
        self.check_string_len(len)?;
        Ok(Value::string(parts.concat()))
    }

    pub(crate) fn next_random(&mut self) -> f64 {
        self.rng = self
            .rng
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.rng >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Build an error object of the given builtin kind (`TypeError`, ...).
    pub fn error_value(&self, kind: &str, message: impl Into<String>) -> Value {
        let message: String = message.into();
        let proto = self.error_protos.get(kind).cloned();
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::string(kind));
        props.insert("message".into(), Value::string(message));
        Value::object_with_proto(props, proto)
    }

    pub fn throw(&self, kind: &str, message: impl Into<String>) -> Exception {
        Exception::Thrown(self.error_value(kind, message))
    }

    pub fn type_error(&self, message: impl Into<String>) -> Exception {
        self.throw("TypeError", message)
    }

    /// Human-readable form of a thrown value: `Name: message` for error objects.
    pub fn describe_thrown(value: &Value) -> String {
        if let Value::Object(obj) = value {
            let obj = obj.borrow();
            let name = obj.get("name").filter(|v| !v.is_nullish());
            let message = obj.get("message").filter(|v| !v.is_nullish());
            match (name, message) {
                (Some(name), Some(message)) => {
                    return format!("{}: {}", name.to_display(), message.to_display());
                }
                (None, Some(message)) => return message.to_display(),
                _ => {}
            }
        }
        value.to_display()
    }

    pub fn run_program(&mut self, program: &[Stmt], env: &Env) -> Result<(), Exception> {
        hoist_vars(program, env);
        match self.exec_block(program, env)? {
            Flow::Return(_) | Flow::Normal | Flow::Break | Flow::Continue => Ok(()),
        }
    }

    pub fn make_closure(&self, def: &Rc<FunctionDef>, env: &Env) -> Value {
        Value::Function(Rc::new(Function {
            name: def.name.as_deref().unwrap_or("").into(),
            kind: FunctionKind::Closure {
                def: Rc::clone(def),
                env: Rc::clone(env),
            },
            props: RefCell::new(PropertyMap::new()),
        }))
    }

    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> Result<Value, Exception> {
        match callee {
            Value::Function(f) => self.call_function(f, this, args),
            other => Err(self.type_error(format!("{} is not a function", other.to_display()))),
        }
    }

    pub fn call_function(
        &mut self,
        f: &Rc<Function>,
        this: Value,
        args: &[Value],
    ) -> Result<Value, Exception> {
        self.tick()?;
        if self.depth >= self.limits.max_call_depth {
            return Err(Exception::Fatal(Fatal::CallDepthExceeded {
                limit: self.limits.max_call_depth,
            }));
        }
        self.depth += 1;
        let result = self.invoke(f, this, args);
        self.depth -= 1;
        result
    }

    fn invoke(&mut self, f: &Rc<Function>, this: Value, args: &[Value]) -> Result<Value, Exception> {
        match &f.kind {
            FunctionKind::Native(native) => {
                let native = Rc::clone(native);
                native(self, &this, args)
            }
            FunctionKind::Bound {
                target,
                this: bound_this,
                args: bound_args,
            } => {
                let mut all = bound_args.clone();
                all.extend_from_slice(args);
                self.call_function(target, bound_this.clone(), &all)
            }
            FunctionKind::Closure { def, env } => {
                let scope = Scope::child(env, true);
                if !def.is_arrow {
                    scope.declare("this", this, false);
                    scope.declare("arguments", Value::array(args.to_vec()), true);
                    if let Some(name) = &def.name {
                        scope.declare(name, Value::Function(Rc::clone(f)), true);
                    }
                }
                for (i, param) in def.params.iter().enumerate() {
                    let value = if param.rest {
                        Value::array(args.get(i..).map(<[Value]>::to_vec).unwrap_or_default())
                    } else {
                        match (args.get(i), &param.default) {
                            (Some(v), _) if !matches!(v, Value::Undefined) => v.clone(),
                            (_, Some(default)) => self.eval(default, &scope)?,
                            _ => Value::Undefined,
                        }
                    };
                    scope.declare(&param.name, value, true);
                }
                match &def.body {
                    FunctionBody::Expr(expr) => self.eval(expr, &scope),
                    FunctionBody::Block(body) => {
                        hoist_vars(body, &scope);
                        match self.exec_block(body, &scope)? {
                            Flow::Return(value) => Ok(value),
                            _ => Ok(Value::Undefined),
                        }
                    }
                }
            }
        }
    }

    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> Result<Value, Exception> {
        let Value::Function(f) = callee else {
            return Err(self.type_error(format!("{} is not a constructor", callee.to_display())));
        };
        if f.is_arrow() {
            return Err(self.type_error(format!("{} is not a constructor", f.name)));
        }
        let proto = match self.function_property(f, "prototype") {
            Value::Object(proto) => Some(proto),
            _ => None,
        };
        let instance = Value::object_with_proto(PropertyMap::new(), proto);
        let result = self.call_function(f, instance.clone(), args)?;
        Ok(match result {
            Value::Object(_) | Value::Array(_) | Value::Function(_) => result,
            _ => instance,
        })
    }

    fn function_property(&self, f: &Rc<Function>, key: &str) -> Value {
        if let Some(value) = f.get(key) {
            return value;
        }
        match key {
            "name" => Value::String(Rc::clone(&f.name)),
            "length" => match &f.kind {
                FunctionKind::Closure { def, .. } => {
                    let required = def
                        .params
                        .iter()
                        .filter(|p| !p.rest && p.default.is_none())
                        .count();
                    Value::Number(required as f64)
                }
                _ => Value::Number(0.0),
            },
            "prototype" if matches!(&f.kind, FunctionKind::Closure { def, .. } if !def.is_arrow) => {
                let proto = Value::new_object();
                f.set("prototype", proto.clone());
                proto
            }
            _ => self
                .methods
                .function
                .get(key)
                .cloned()
                .unwrap_or(Value::Undefined),
        }
    }

    pub fn get_property(&mut self, target: &Value, key: &str) -> Result<Value, Exception> {
        Ok(match target {
            Value::Undefined | Value::Null => {
                return Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    target.to_display()
                )));
            }
            Value::Object(obj) => match obj.borrow().get(key) {
                Some(value) => value,
                None => self.methods.object.get(key).cloned().unwrap_or_default(),
            },
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                match array_index(key) {
                    Some(idx) => items.borrow().get(idx).cloned().unwrap_or_default(),
                    None => self.methods.array.get(key).cloned().unwrap_or_default(),
                }
            }
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                match array_index(key) {
                    Some(idx) => s
                        .chars()
                        .nth(idx)
                        .map(|c| Value::string(c.to_string()))
                        .unwrap_or_default(),
                    None => self.methods.string.get(key).cloned().unwrap_or_default(),
                }
            }
            Value::Number(_) => self.methods.number.get(key).cloned().unwrap_or_default(),
            Value::Function(f) => self.function_property(f, key),
            Value::Bool(_) => Value::Undefined,
        })
    }

    pub fn set_property(&mut self, target: &Value, key: &str, value: Value) -> Result<(), Exception> {
        match target {
            Value::Undefined | Value::Null => {
                return Err(self.type_error(format!(
                    "Cannot set properties of {} (setting '{key}')",
                    target.to_display()
                )));
            }
            Value::Object(obj) => {
                let mut obj = obj.borrow_mut();
                if !obj.frozen {
                    obj.props.insert(key.into(), value);
                }
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 || len > self.limits.max_array_len as f64 {
                        drop(items);
                        return Err(self.throw("RangeError", "Invalid array length"));
                    }
                    items.resize(len as usize, Value::Undefined);
                } else if let Some(idx) = array_index(key) {
                    if idx >= items.len() {
                        if idx >= self.limits.max_array_len {
                            drop(items);
                            return Err(self.throw("RangeError", "Invalid array length"));
                        }
                        items.resize(idx + 1, Value::Undefined);
                    }
                    items[idx] = value;
                }
            }
            Value::Function(f) => f.set(key, value),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        }
        Ok(())
    }

    pub(crate) fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> Result<Flow, Exception> {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt
                && let Some(name) = &def.name
            {
                env.declare(name, self.make_closure(def, env), true);
            }
        }
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow, Exception> {
        self.tick()?;
        self.enter()?;
        let flow = self.exec_inner(stmt, env);
        self.nesting -= 1;
        flow
    }

    fn exec_inner(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow, Exception> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
            }
            Stmt::Var { kind, decls } => {
                for (name, init) in decls {
                    let value = match init {
                        Some(init) => Some(self.eval(init, env)?),
                        None => None,
                    };
                    self.declare(*kind, name, value, env);
                }
            }
            Stmt::Function(_) | Stmt::Empty => {}
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, env)?.truthy() {
                    return self.exec(then, env);
                } else if let Some(otherwise) = otherwise {
                    return self.exec(otherwise, env);
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test, env)?.truthy() {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::DoWhile { body, test } => loop {
                match self.exec(body, env)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                if !self.eval(test, env)?.truthy() {
                    break;
                }
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = Scope::child(env, false);
                if let Some(init) = init {
                    self.exec(init, &scope)?;
                }
                loop {
                    if let Some(test) = test
                        && !self.eval(test, &scope)?.truthy()
                    {
                        break;
                    }
                    match self.exec(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &scope)?;
                    }
                }
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, env)?;
                let items = self.iterate(&iterable)?;
                return self.run_for_each(*kind, name, items, body, env);
            }
            Stmt::ForIn {
                kind,
                name,
                object,
                body,
            } => {
                let object = self.eval(object, env)?;
                let keys = own_keys(&object).into_iter().map(Value::String).collect();
                return self.run_for_each(*kind, name, keys, body, env);
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, env)?;
                let mut start = None;
                for (i, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test
                        && self.eval(test, env)?.strict_equals(&value)
                    {
                        start = Some(i);
                        break;
                    }
                }
                let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
                if let Some(start) = start {
                    let scope = Scope::child(env, false);
                    for case in &cases[start..] {
                        match self.exec_block(&case.body, &scope)? {
                            Flow::Normal => {}
                            Flow::Break => break,
                            flow => return Ok(flow),
                        }
                    }
                }
            }
            Stmt::Block(body) => {
                let scope = Scope::child(env, false);
                return self.exec_block(body, &scope);
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                return Err(Exception::Thrown(value));
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block, &Scope::child(env, false));
                if let (Err(Exception::Thrown(thrown)), Some(handler)) = (&result, handler) {
                    let scope = Scope::child(env, false);
                    if let Some(param) = param {
                        scope.declare(param, thrown.clone(), true);
                    }
                    result = self.exec_block(handler, &scope);
                }
                if let Err(Exception::Fatal(_)) = result {
                    return result;
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, &Scope::child(env, false))? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return result;
            }
        }
        Ok(Flow::Normal)
    }

    fn declare(&mut self, kind: DeclKind, name: &str, value: Option<Value>, env: &Env) {
        match kind {
            DeclKind::Var => {
                let scope = env.function_scope();
                match value {
                    Some(value) => scope.declare(name, value, true),
                    None if !scope.has_own(name) => scope.declare(name, Value::Undefined, true),
                    None => {}
                }
            }
            DeclKind::Let => env.declare(name, value.unwrap_or_default(), true),
            DeclKind::Const => env.declare(name, value.unwrap_or_default(), false),
        }
    }

    fn run_for_each(
        &mut self,
        kind: Option<DeclKind>,
        name: &str,
        items: Vec<Value>,
        body: &Stmt,
        env: &Env,
    ) -> Result<Flow, Exception> {
        for item in items {
            let scope = Scope::child(env, false);
            match kind {
                Some(kind) => self.declare(kind, name, Some(item), &scope),
                None => self.assign_ident(name, item, env)?,
            }
            match self.exec(body, &scope)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    pub(crate) fn iterate(&self, value: &Value) -> Result<Vec<Value>, Exception> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            other => Err(self.type_error(format!("{} is not iterable", other.to_display()))),
        }
    }

    fn assign_ident(&mut self, name: &str, value: Value, env: &Env) -> Result<(), Exception> {
        match env.assign(name, value.clone()) {
            Assign::Done => Ok(()),
            Assign::Undeclared => {
                self.globals.declare(name, value, true);
                Ok(())
            }
            Assign::Constant => Err(self.type_error("Assignment to constant variable.")),
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value, Exception> {
        self.enter()?;
        let value = self.eval_inner(expr, env);
        self.nesting -= 1;
        value
    }

    fn eval_inner(&mut self, expr: &Expr, env: &Env) -> Result<Value, Exception> {
        Ok(match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::String(Rc::clone(s)),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::Undefined => Value::Undefined,
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(expr) = exprs.get(i) {
                        let value = self.eval(expr, env)?;
                        out.push_str(&self.display(&value)?);
                        self.check_string_len(out.len())?;
                    }
                }
                Value::string(out)
            }
            Expr::This => env.lookup("this").unwrap_or_default(),
            Expr::Ident(name) => match env.lookup(name) {
                Some(value) => value,
                None => {
                    return Err(self.throw("ReferenceError", format!("{name} is not defined")));
                }
            },
            Expr::Array(items) => Value::array(self.eval_list(items, env)?),
            Expr::Object(props) => self.eval_object(props, env)?,
            Expr::Function(def) => self.make_closure(def, env),
            Expr::Spread(_) => return Err(self.throw("SyntaxError", "Unexpected spread")),
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => {
                self.eval_chain(expr, env)?.unwrap_or_default()
            }
            Expr::New { callee, args } => {
                let callee = self.eval(callee, env)?;
                let args = self.eval_list(args, env)?;
                self.construct(&callee, &args)?
            }
            Expr::Unary { op, expr } => self.eval_unary(*op, expr, env)?,
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval(target, env)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign_to(target, Value::Number(new), env)?;
                Value::Number(if *prefix { new } else { old })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, &left, &right)?
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    left
                } else {
                    self.eval(right, env)?
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(then, env)?
                } else {
                    self.eval(otherwise, env)?
                }
            }
            Expr::Assign { op, target, value } => {
                let value = match op {
                    None => self.eval(value, env)?,
                    Some(op) => {
                        let current = self.eval(target, env)?;
                        let rhs = self.eval(value, env)?;
                        self.binary(*op, &current, &rhs)?
                    }
                };
                self.assign_to(target, value.clone(), env)?;
                value
            }
        })
    }

    /// Member, index and call expressions. `None` means an optional link
    /// short-circuited the chain.
    fn eval_chain(&mut self, expr: &Expr, env: &Env) -> Result<Option<Value>, Exception> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(object) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                self.get_property(&object, property).map(Some)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let Some(object) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                let key = self.eval(index, env)?;
                self.get_index(&object, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let (this, function) = match &**callee {
                    Expr::Member {
                        object,
                        property,
                        optional: member_optional,
                    } => {
                        let Some(object) = self.eval_chain(object, env)? else {
                            return Ok(None);
                        };
                        if *member_optional && object.is_nullish() {
                            return Ok(None);
                        }
                        let function = self.get_property(&object, property)?;
                        (object, function)
                    }
                    Expr::Index {
                        object,
                        index,
                        optional: member_optional,
                    } => {
                        let Some(object) = self.eval_chain(object, env)? else {
                            return Ok(None);
                        };
                        if *member_optional && object.is_nullish() {
                            return Ok(None);
                        }
                        let key = self.eval(index, env)?;
                        let function = self.get_index(&object, &key)?;
                        (object, function)
                    }
                    other => match self.eval_chain(other, env)? {
                        Some(function) => (Value::Undefined, function),
                        None => return Ok(None),
                    },
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_list(args, env)?;
                match &function {
                    Value::Function(f) => self.call_function(f, this, &args).map(Some),
                    _ => Err(self.type_error(format!("{} is not a function", describe(callee)))),
                }
            }
            other => self.eval(other, env).map(Some),
        }
    }

    fn get_index(&mut self, object: &Value, key: &Value) -> Result<Value, Exception> {
        if let (Value::Array(items), Value::Number(n)) = (object, key)
            && *n >= 0.0
            && n.fract() == 0.0
        {
            return Ok(items.borrow().get(*n as usize).cloned().unwrap_or_default());
        }
        let key = key.to_property_key();
        self.get_property(object, &key)
    }

    fn eval_list(&mut self, items: &[Expr], env: &Env) -> Result<Vec<Value>, Exception> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Expr::Spread(inner) = item {
                let value = self.eval(inner, env)?;
                let spread = self.iterate(&value)?;
                self.check_array_len(out.len().saturating_add(spread.len()))?;
                out.extend(spread);
            } else {
                out.push(self.eval(item, env)?);
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, props: &[ObjectProp], env: &Env) -> Result<Value, Exception> {
        let mut map = PropertyMap::new();
        for prop in props {
            match prop {
                ObjectProp::KeyValue(key, value) => {
                    let key: Rc<str> = match key {
                        PropKey::Static(name) => name.as_str().into(),
                        PropKey::Computed(expr) => self.eval(expr, env)?.to_property_key(),
                    };
                    let value = self.eval(value, env)?;
                    map.insert(key, value);
                }
                ObjectProp::Spread(expr) => match self.eval(expr, env)? {
                    Value::Object(obj) => {
                        for (k, v) in obj.borrow().props.iter() {
                            map.insert(Rc::clone(k), v.clone());
                        }
                    }
                    Value::Array(items) => {
                        for (i, v) in items.borrow().iter().enumerate() {
                            map.insert(i.to_string().into(), v.clone());
                        }
                    }
                    _ => {}
                },
            }
        }
        Ok(Value::object(map))
    }

    fn eval_unary(&mut self, op: UnaryOp, expr: &Expr, env: &Env) -> Result<Value, Exception> {
        Ok(match op {
            UnaryOp::TypeOf => {
                if let Expr::Ident(name) = expr
                    && env.lookup(name).is_none()
                {
                    return Ok(Value::string("undefined"));
                }
                Value::string(self.eval(expr, env)?.type_of())
            }
            UnaryOp::Delete => {
                let (object, key) = match expr {
                    Expr::Member {
                        object, property, ..
                    } => (self.eval(object, env)?, Rc::from(property.as_str())),
                    Expr::Index { object, index, .. } => {
                        let object = self.eval(object, env)?;
                        (object, self.eval(index, env)?.to_property_key())
                    }
                    _ => return Ok(Value::Bool(true)),
                };
                match &object {
                    Value::Object(obj) => {
                        let mut obj = obj.borrow_mut();
                        if obj.frozen {
                            return Ok(Value::Bool(false));
                        }
                        obj.props.shift_remove(&key);
                    }
                    Value::Function(f) => {
                        f.props.borrow_mut().shift_remove(&key);
                    }
                    _ => {}
                }
                Value::Bool(true)
            }
            UnaryOp::Not => Value::Bool(!self.eval(expr, env)?.truthy()),
            UnaryOp::Neg => Value::Number(-self.eval(expr, env)?.to_number()),
            UnaryOp::Plus => Value::Number(self.eval(expr, env)?.to_number()),
            UnaryOp::Void => {
                self.eval(expr, env)?;
                Value::Undefined
            }
        })
    }

    fn assign_to(&mut self, target: &Expr, value: Value, env: &Env) -> Result<(), Exception> {
        match target {
            Expr::Ident(name) => self.assign_ident(name, value, env),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, env)?;
                self.set_property(&object, property, value)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?.to_property_key();
                self.set_property(&object, &key, value)
            }
            _ => Err(self.throw("SyntaxError", "Invalid assignment target")),
        }
    }

    fn to_primitive(&self, value: &Value) -> Result<Value, Exception> {
        Ok(match value {
            Value::Object(_) | Value::Array(_) | Value::Function(_) => {
                Value::string(self.display(value)?)
            }
            other => other.clone(),
        })
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Exception> {
        Ok(match op {
            BinaryOp::Add => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                    let (left, right) = (left.to_display(), right.to_display());
                    self.concat(&[&left, &right])?
                } else {
                    Value::Number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
            BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Mod => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                let ordering = match (&left, &right) {
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                let Some(ordering) = ordering else {
                    return Ok(Value::Bool(false));
                };
                Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Le => ordering.is_le(),
                    _ => ordering.is_ge(),
                })
            }
            BinaryOp::In => {
                let key = left.to_property_key();
                Value::Bool(match right {
                    Value::Object(obj) => obj.borrow().get(&key).is_some(),
                    Value::Array(items) => {
                        &*key == "length"
                            || array_index(&key).is_some_and(|i| i < items.borrow().len())
                    }
                    Value::Function(f) => f.get(&key).is_some(),
                    other => {
                        return Err(self.type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            other.to_display()
                        )));
                    }
                })
            }
            BinaryOp::InstanceOf => {
                let Value::Function(ctor) = right else {
                    return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
                };
                Value::Bool(self.instance_of(left, ctor))
            }
        })
    }

    fn instance_of(&self, value: &Value, ctor: &Rc<Function>) -> bool {
        match (value, &*ctor.name) {
            (Value::Array(_), "Array" | "Object") => return true,
            (Value::Object(_), "Object") => return true,
            (Value::Function(_), "Function" | "Object") => return true,
            _ => {}
        }
        let (Value::Object(obj), Some(Value::Object(target))) = (value, ctor.get("prototype"))
        else {
            return false;
        };
        let mut proto = obj.borrow().proto.clone();
        while let Some(current) = proto {
            if Rc::ptr_eq(&current, &target) {
                return true;
            }
            proto = current.borrow().proto.clone();
        }
        false
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.globals.clear();
    }
}


/// Canonical array index keys only: `"01"` is a plain property.
pub(crate) fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

pub(crate) fn own_keys(value: &Value) -> Vec<Rc<str>> {
    match value {
        Value::Object(obj) => obj.borrow().props.keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len())
            .map(|i| i.to_string().into())
            .collect(),
        Value::String(s) => (0..s.chars().count()).map(|i| i.to_string().into()).collect(),
        Value::Function(f) => f.props.borrow().keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Declare every `var` of a function body up front, so closures created before
/// the declaration statement see the binding.
fn hoist_vars(stmts: &[Stmt], env: &Env) {
    let scope = env.function_scope();
    let mut names = Vec::new();
    collect_var_names(stmts, &mut names);
    for name in names {
        if !scope.has_own(name) {
            scope.declare(name, Value::Undefined, true);
        }
    }
}

fn collect_var_names<'a>(stmts: &'a [Stmt], names: &mut Vec<&'a str>) {
    for stmt in stmts {
        collect_stmt_vars(stmt, names);
    }
}

fn collect_stmt_vars<'a>(stmt: &'a Stmt, names: &mut Vec<&'a str>) {
    match stmt {
        Stmt::Var {
            kind: DeclKind::Var,
            decls,
        } => names.extend(decls.iter().map(|(name, _)| name.as_str())),
        Stmt::If {
            then, otherwise, ..
        } => {
            collect_stmt_vars(then, names);
            if let Some(otherwise) = otherwise {
                collect_stmt_vars(otherwise, names);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_stmt_vars(body, names),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_stmt_vars(init, names);
            }
            collect_stmt_vars(body, names);
        }
        Stmt::ForOf {
            kind, name, body, ..
        }
        | Stmt::ForIn {
            kind, name, body, ..
        } => {
            if *kind == Some(DeclKind::Var) {
                names.push(name);
            }
            collect_stmt_vars(body, names);
        }
        Stmt::Switch { cases, .. } => {
            for case in cases {
                collect_var_names(&case.body, names);
            }
        }
        Stmt::Block(body) => collect_var_names(body, names),
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            collect_var_names(block, names);
            if let Some(handler) = handler {
                collect_var_names(handler, names);
            }
            if let Some(finalizer) = finalizer {
                collect_var_names(finalizer, names);
            }
        }
        _ => {}
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{property}", describe(object)),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run(src: &str) -> (Interpreter, Result<(), Exception>) {
        let mut interp = Interpreter::new("test", Limits::default());
        let program = parse_program(src).unwrap();
        let env = Rc::clone(interp.globals());
        let result = interp.run_program(&program, &env);
        (interp, result)
    }

    fn global(src: &str, name: &str) -> serde_json::Value {
        let (interp, result) = run(src);
        if let Err(Exception::Thrown(v)) = &result {
            panic!("script threw {}", Interpreter::describe_thrown(v));
        }
        assert!(result.is_ok(), "{result:?}");
        interp
            .globals()
            .lookup(name)
            .and_then(|v| v.to_json().unwrap())
            .unwrap_or(serde_json::Value::Null)
    }

    #[test]
    fn closures_capture_their_scope() {
        let src = "
            function counter() { var n = 0; return function () { n += 1; return n; }; }
            var c = counter(); c(); c();
            var result = c();
        ";
        assert_eq!(global(src, "result"), 3);
    }

    #[test]
    fn arrows_keep_lexical_this() {
        let src = "
            var obj = { v: 2, f: function () { return [1, 2].map(x => x * this.v); } };
            var result = obj.f();
        ";
        assert_eq!(global(src, "result"), serde_json::json!([2, 4]));
    }

    #[test]
    fn try_catch_finally_and_error_names() {
        let src = "
            var log = [];
            try { null.x; } catch (e) { log.push(e.name); } finally { log.push('done'); }
            try { throw new Error('boom'); } catch (e) { log.push(e.message, e instanceof Error); }
            var result = log;
        ";
        assert_eq!(
            global(src, "result"),
            serde_json::json!(["TypeError", "done", "boom", true])
        );
    }

    #[test]
    fn optional_chaining_short_circuits() {
        let src = "var a = null; var result = [a?.b.c, a?.f(), ({x: {y: 1}})?.x?.y];";
        assert_eq!(global(src, "result"), serde_json::json!([null, null, 1]));
    }

    #[test]
    fn switch_falls_through_until_break() {
        let src = "
            var out = '';
            switch (2) { case 1: out += 'a'; case 2: out += 'b'; case 3: out += 'c'; break; default: out += 'd'; }
            var result = out;
        ";
        assert_eq!(global(src, "result"), "bc");
    }

    #[test]
    fn prototypes_and_new() {
        let src = "
            function P(x) { this.x = x; }
            P.prototype.double = function () { return this.x * 2; };
            var p = new P(21);
            var result = [p.double(), p instanceof P];
        ";
        assert_eq!(global(src, "result"), serde_json::json!([42, true]));
    }

    #[test]
    fn infinite_loop_runs_out_of_fuel() {
        let mut interp = Interpreter::new(
            "test",
            Limits {
                fuel: 1_000,
                max_call_depth: 16,
                ..Limits::default()
            },
        );
        let program = parse_program("try { while (true) {} } catch (e) {}").unwrap();
        let env = Rc::clone(interp.globals());
        let err = interp.run_program(&program, &env).unwrap_err();
        assert!(matches!(
            err,
            Exception::Fatal(Fatal::FuelExhausted { budget: 1_000 })
        ));
    }

    #[test]
    fn unbounded_recursion_hits_the_depth_limit() {
        let (_, result) = run("function f() { return f(); } f();");
        let limit = Limits::default().max_call_depth;
        assert!(matches!(
            result,
            Err(Exception::Fatal(Fatal::CallDepthExceeded { limit: l })) if l == limit
        ));
    }

    #[test]
    fn const_cannot_be_reassigned() {
        let (_, result) = run("const a = 1; a = 2;");
        let Err(Exception::Thrown(value)) = result else {
            panic!("expected a thrown TypeError");
        };
        assert_eq!(
            Interpreter::describe_thrown(&value),
            "TypeError: Assignment to constant variable."
        );
    }
}
