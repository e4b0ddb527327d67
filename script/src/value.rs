use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::FunctionDef,
    interp::{Exception, Interpreter},
    scope::Env,
};

pub type PropertyMap = IndexMap<Rc<str>, Value>;
pub type ObjectRef = Rc<RefCell<Object>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type NativeFn = Rc<dyn Fn(&mut Interpreter, &Value, &[Value]) -> Result<Value, Exception>>;

/// A script value. Objects, arrays and functions are shared references; cloning a
/// `Value` never copies their contents.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
    Array(ArrayRef),
    Function(Rc<Function>),
}

#[derive(Default)]
pub struct Object {
    pub props: PropertyMap,
    pub proto: Option<ObjectRef>,
    pub frozen: bool,
}

impl Object {
    /// Own property, then the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.props.get(key) {
            return Some(value.clone());
        }
        let mut proto = self.proto.clone();
        while let Some(obj) = proto {
            let obj = obj.borrow();
            if let Some(value) = obj.props.get(key) {
                return Some(value.clone());
            }
            proto = obj.proto.clone();
        }
        None
    }
}

pub struct Function {
    pub name: Rc<str>,
    pub kind: FunctionKind,
    pub props: RefCell<PropertyMap>,
}

pub enum FunctionKind {
    Closure { def: Rc<FunctionDef>, env: Env },
    Native(NativeFn),
    Bound {
        target: Rc<Function>,
        this: Value,
        args: Vec<Value>,
    },
}

impl Function {
    pub fn is_arrow(&self) -> bool {
        matches!(&self.kind, FunctionKind::Closure { def, .. } if def.is_arrow)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.props.borrow_mut().insert(key.into(), value);
    }
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn new_object() -> Self {
        Value::object(PropertyMap::new())
    }

    pub fn object(props: PropertyMap) -> Self {
        Value::Object(Rc::new(RefCell::new(Object {
            props,
            proto: None,
            frozen: false,
        })))
    }

    pub fn object_with_proto(props: PropertyMap, proto: Option<ObjectRef>) -> Self {
        Value::Object(Rc::new(RefCell::new(Object {
            props,
            proto,
            frozen: false,
        })))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn native(
        name: &str,
        f: impl Fn(&mut Interpreter, &Value, &[Value]) -> Result<Value, Exception> + 'static,
    ) -> Self {
        Value::Function(Rc::new(Function {
            name: name.into(),
            kind: FunctionKind::Native(Rc::new(f)),
            props: RefCell::new(PropertyMap::new()),
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Own property of an object, element of an array, or property of a function.
    /// No prototype lookup and no builtin methods.
    pub fn get_own(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(obj) => obj.borrow().props.get(key).cloned(),
            Value::Array(items) => {
                let index = crate::interp::array_index(key)?;
                items.borrow().get(index).cloned()
            }
            Value::Function(f) => f.props.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Set an own property on an object, ignoring the frozen flag. Returns `false`
    /// for anything that is not an object.
    pub fn insert(&self, key: &str, value: Value) -> bool {
        match self {
            Value::Object(obj) => {
                obj.borrow_mut().props.insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) | Value::Function(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Array(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// String conversion as used by `+`, template literals and `String(x)`.
    ///
    /// Arrays already being printed print as `""`. Output stops short of
    /// [`CONVERSION_LIMIT`] bytes; the interpreter uses [`Value::try_display`] so
    /// scripts see a `RangeError` instead.
    pub fn to_display(&self) -> String {
        let mut out = String::new();
        // Past the limit, output stops after the last element that fit.
        let _ = self.write_display(&mut out, CONVERSION_LIMIT, &mut Vec::new());
        out
    }

    /// Like [`Value::to_display`], or `None` when the result would be longer than
    /// `max_len` bytes or nest deeper than [`MAX_CONVERSION_DEPTH`].
    pub fn try_display(&self, max_len: usize) -> Option<String> {
        let mut out = String::new();
        self.write_display(&mut out, max_len, &mut Vec::new())
            .ok()
            .map(|()| out)
    }

    fn write_display(
        &self,
        out: &mut String,
        max_len: usize,
        visiting: &mut Vec<*const ()>,
    ) -> Result<(), TooLarge> {
        let Value::Array(items) = self else {
            return match self {
                Value::String(s) => push_within(out, s, max_len),
                other => push_within(out, &other.scalar_display(), max_len),
            };
        };
        let ptr = Rc::as_ptr(items).cast::<()>();
        if visiting.contains(&ptr) {
            return Ok(());
        }
        if visiting.len() >= MAX_CONVERSION_DEPTH {
            return Err(TooLarge);
        }
        let Ok(items) = items.try_borrow() else {
            return Ok(());
        };
        visiting.push(ptr);
        let mut result = Ok(());
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                result = push_within(out, ",", max_len);
            }
            if result.is_ok() && !item.is_nullish() {
                result = item.write_display(out, max_len, visiting);
            }
            if result.is_err() {
                break;
            }
        }
        visiting.pop();
        result
    }

    fn scalar_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("function {}() {{ [native code] }}", f.name),
            Value::Array(_) => String::new(),
        }
    }

    pub fn to_property_key(&self) -> Rc<str> {
        match self {
            Value::String(s) => Rc::clone(s),
            other => other.to_display().into(),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (Rc::from(k.as_str()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON the way `JSON.stringify` does: functions and `undefined`
    /// members are skipped, non-finite numbers become `null`. Returns `None` for a
    /// top-level value with no JSON form and fails on cycles.
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, JsonError> {
        self.to_json_within(CONVERSION_LIMIT)
    }

    /// [`Value::to_json`] that also fails once the serialized form would take
    /// roughly more than `max_len` bytes.
    pub fn to_json_within(&self, max_len: usize) -> Result<Option<serde_json::Value>, JsonError> {
        let mut budget = max_len;
        self.to_json_inner(&mut Vec::new(), &mut budget)
    }

    fn to_json_inner(
        &self,
        stack: &mut Vec<*const ()>,
        budget: &mut usize,
    ) -> Result<Option<serde_json::Value>, JsonError> {
        let cost = match self {
            Value::String(s) => s.len() + 2,
            _ => 8,
        };
        *budget = budget.checked_sub(cost).ok_or(JsonError::TooLarge)?;
        Ok(Some(match self {
            Value::Undefined | Value::Function(_) => return Ok(None),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items).cast::<()>();
                enter(stack, ptr)?;
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.to_json_inner(stack, budget)?.unwrap_or(serde_json::Value::Null));
                }
                stack.pop();
                serde_json::Value::Array(out)
            }
            Value::Object(obj) => {
                let ptr = Rc::as_ptr(obj).cast::<()>();
                enter(stack, ptr)?;
                let mut out = serde_json::Map::new();
                for (key, value) in obj.borrow().props.iter() {
                    if let Some(json) = value.to_json_inner(stack, budget)? {
                        *budget = budget.checked_sub(key.len() + 3).ok_or(JsonError::TooLarge)?;
                        out.insert(key.to_string(), json);
                    }
                }
                stack.pop();
                serde_json::Value::Object(out)
            }
        }))
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            (Value::Object(_) | Value::Array(_), Value::Number(_) | Value::String(_)) => {
                Value::string(self.to_display()).loose_equals(other)
            }
            (Value::Number(_) | Value::String(_), Value::Object(_) | Value::Array(_)) => {
                self.loose_equals(&Value::string(other.to_display()))
            }
            _ => self.strict_equals(other),
        }
    }
}

/// Upper bound on what converting one script value for the host may produce.
pub const CONVERSION_LIMIT: usize = 1 << 26;

/// Arrays and objects nested deeper than this are not converted.
pub const MAX_CONVERSION_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonError {
    Cycle,
    TooLarge,
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::Cycle => f.write_str("converting circular structure to JSON"),
            JsonError::TooLarge => f.write_str("value is too large or too deeply nested for JSON"),
        }
    }
}

impl std::error::Error for JsonError {}

#[derive(Debug)]
struct TooLarge;

fn push_within(out: &mut String, s: &str, max_len: usize) -> Result<(), TooLarge> {
    if out.len().saturating_add(s.len()) > max_len {
        return Err(TooLarge);
    }
    out.push_str(s);
    Ok(())
}

fn enter(stack: &mut Vec<*const ()>, ptr: *const ()) -> Result<(), JsonError> {
    if stack.contains(&ptr) {
        return Err(JsonError::Cycle);
    }
    if stack.len() >= MAX_CONVERSION_DEPTH {
        return Err(JsonError::TooLarge);
    }
    stack.push(ptr);
    Ok(())
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match s {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust accepts these spellings; scripts do not.
        _ if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => s.parse().unwrap_or(f64::NAN),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => match items.try_borrow() {
                Ok(items) => write!(f, "[array; {}]", items.len()),
                Err(_) => f.write_str("[array]"),
            },
            Value::Object(obj) => match obj.try_borrow() {
                Ok(obj) => {
                    let keys: Vec<&str> = obj.props.keys().map(|k| &**k).collect();
                    write!(f, "{{object {keys:?}}}")
                }
                Err(_) => f.write_str("{object}"),
            },
            Value::Function(func) => write!(f, "[function {}]", func.name),
        }
    }
}
