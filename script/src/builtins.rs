//! The sandbox's global scope and the builtin methods of arrays, strings, numbers,
//! functions and plain objects. Nothing here reaches the host.

use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use crate::{
    interp::{Exception, Interpreter, own_keys},
    value::{Function, FunctionKind, JsonError, Object, PropertyMap, Value, number_to_string},
};

type NativeResult = Result<Value, Exception>;

const ERROR_KINDS: [&str; 4] = ["TypeError", "RangeError", "ReferenceError", "SyntaxError"];

pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn define(
    map: &mut PropertyMap,
    name: &str,
    f: impl Fn(&mut Interpreter, &Value, &[Value]) -> NativeResult + 'static,
) {
    map.insert(name.into(), Value::native(name, f));
}

fn namespace(build: impl FnOnce(&mut PropertyMap)) -> Value {
    let mut props = PropertyMap::new();
    build(&mut props);
    Value::object(props)
}

fn with_props(function: Value, build: impl FnOnce(&mut PropertyMap)) -> Value {
    if let Value::Function(f) = &function {
        build(&mut f.props.borrow_mut());
    }
    function
}

pub(crate) fn install(interp: &mut Interpreter) {
    install_errors(interp);
    install_methods(interp);

    let globals = Rc::clone(interp.globals());
    globals.declare("NaN", Value::Number(f64::NAN), false);
    globals.declare("Infinity", Value::Number(f64::INFINITY), false);
    globals.declare("Math", math(), true);
    globals.declare("JSON", json(), true);
    globals.declare("Object", object_ctor(), true);
    globals.declare("Array", array_ctor(), true);
    globals.declare(
        "String",
        Value::native("String", |interp, _, args| {
            Ok(Value::string(match args.first() {
                Some(v) => interp.display(v)?,
                None => String::new(),
            }))
        }),
        true,
    );
    globals.declare("Number", number_ctor(), true);
    globals.declare(
        "Boolean",
        Value::native("Boolean", |_, _, args| Ok(Value::Bool(arg(args, 0).truthy()))),
        true,
    );
    globals.declare("parseInt", Value::native("parseInt", parse_int), true);
    globals.declare("parseFloat", Value::native("parseFloat", parse_float), true);
    globals.declare(
        "isNaN",
        Value::native("isNaN", |_, _, args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))),
        true,
    );
    globals.declare(
        "isFinite",
        Value::native("isFinite", |_, _, args| {
            Ok(Value::Bool(arg(args, 0).to_number().is_finite()))
        }),
        true,
    );
    globals.declare("console", console(Rc::clone(&interp.label)), true);
}

fn install_errors(interp: &mut Interpreter) {
    let base = Rc::new(RefCell::new(Object::default()));
    base.borrow_mut().props.insert("name".into(), Value::string("Error"));
    base.borrow_mut().props.insert("message".into(), Value::string(""));
    interp.error_protos.insert("Error", Rc::clone(&base));
    for kind in ERROR_KINDS {
        let mut proto = Object {
            proto: Some(Rc::clone(&base)),
            ..Object::default()
        };
        proto.props.insert("name".into(), Value::string(kind));
        interp
            .error_protos
            .insert(kind, Rc::new(RefCell::new(proto)));
    }

    let globals = Rc::clone(interp.globals());
    for kind in std::iter::once("Error").chain(ERROR_KINDS) {
        let ctor = Value::native(kind, move |interp, _, args| {
            let message = match args.first() {
                Some(v) if !matches!(v, Value::Undefined) => v.to_display(),
                _ => String::new(),
            };
            Ok(interp.error_value(kind, message))
        });
        if let (Value::Function(f), Some(proto)) = (&ctor, interp.error_protos.get(kind)) {
            f.set("prototype", Value::Object(Rc::clone(proto)));
        }
        globals.declare(kind, ctor, true);
    }
}

fn math() -> Value {
    fn unary(map: &mut PropertyMap, name: &str, op: fn(f64) -> f64) {
        define(map, name, move |_, _, args| {
            Ok(Value::Number(op(arg(args, 0).to_number())))
        });
    }

    namespace(|m| {
        m.insert("PI".into(), Value::Number(std::f64::consts::PI));
        m.insert("E".into(), Value::Number(std::f64::consts::E));
        m.insert("LN2".into(), Value::Number(std::f64::consts::LN_2));
        m.insert("LN10".into(), Value::Number(std::f64::consts::LN_10));
        unary(m, "abs", f64::abs);
        unary(m, "floor", f64::floor);
        unary(m, "ceil", f64::ceil);
        unary(m, "round", |x| (x + 0.5).floor());
        unary(m, "trunc", f64::trunc);
        unary(m, "sign", |x| if x == 0.0 || x.is_nan() { x } else { x.signum() });
        unary(m, "sqrt", f64::sqrt);
        unary(m, "cbrt", f64::cbrt);
        unary(m, "log", f64::ln);
        unary(m, "log10", f64::log10);
        unary(m, "log2", f64::log2);
        unary(m, "exp", f64::exp);
        unary(m, "sin", f64::sin);
        unary(m, "cos", f64::cos);
        unary(m, "tan", f64::tan);
        unary(m, "asin", f64::asin);
        unary(m, "acos", f64::acos);
        unary(m, "atan", f64::atan);
        define(m, "atan2", |_, _, args| {
            Ok(Value::Number(
                arg(args, 0).to_number().atan2(arg(args, 1).to_number()),
            ))
        });
        define(m, "pow", |_, _, args| {
            Ok(Value::Number(
                arg(args, 0).to_number().powf(arg(args, 1).to_number()),
            ))
        });
        define(m, "min", |_, _, args| {
            Ok(Value::Number(args.iter().map(Value::to_number).fold(
                f64::INFINITY,
                |acc, x| if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.min(x) },
            )))
        });
        define(m, "max", |_, _, args| {
            Ok(Value::Number(args.iter().map(Value::to_number).fold(
                f64::NEG_INFINITY,
                |acc, x| if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.max(x) },
            )))
        });
        define(m, "random", |interp, _, _| Ok(Value::Number(interp.next_random())));
    })
}

fn json() -> Value {
    namespace(|m| {
        define(m, "stringify", |interp, _, args| {
            let json = match arg(args, 0).to_json_within(interp.limits().max_string_len) {
                Ok(Some(json)) => json,
                Ok(None) => return Ok(Value::Undefined),
                Err(JsonError::TooLarge) => return Err(interp.throw("RangeError", "Invalid string length")),
                Err(err) => return Err(interp.type_error(err.to_string())),
            };
            let indent = match arg(args, 2) {
                Value::Number(n) if n >= 1.0 => " ".repeat((n as usize).min(10)),
                Value::String(s) => s.chars().take(10).collect(),
                _ => String::new(),
            };
            let text = if indent.is_empty() {
                serde_json::to_string(&json)
            } else {
                let mut out = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
                let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
                serde::Serialize::serialize(&json, &mut ser)
                    .map(|()| String::from_utf8_lossy(&out).into_owned())
            };
            text.map(Value::string)
                .map_err(|err| interp.type_error(err.to_string()))
        });
        define(m, "parse", |interp, _, args| {
            let text = arg(args, 0).to_display();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|err| interp.throw("SyntaxError", format!("JSON.parse: {err}")))
        });
    })
}

fn object_ctor() -> Value {
    let ctor = Value::native("Object", |_, _, args| {
        Ok(match arg(args, 0) {
            v @ (Value::Object(_) | Value::Array(_) | Value::Function(_)) => v,
            _ => Value::new_object(),
        })
    });
    with_props(ctor, |m| {
        define(m, "keys", |_, _, args| {
            let keys = own_keys(&arg(args, 0));
            Ok(Value::array(keys.into_iter().map(Value::String).collect()))
        });
        define(m, "values", |interp, _, args| {
            let target = arg(args, 0);
            let mut out = Vec::new();
            for key in own_keys(&target) {
                out.push(interp.get_property(&target, &key)?);
            }
            Ok(Value::array(out))
        });
        define(m, "entries", |interp, _, args| {
            let target = arg(args, 0);
            let mut out = Vec::new();
            for key in own_keys(&target) {
                let value = interp.get_property(&target, &key)?;
                out.push(Value::array(vec![Value::String(key), value]));
            }
            Ok(Value::array(out))
        });
        define(m, "assign", |interp, _, args| {
            let target = arg(args, 0);
            if target.is_nullish() {
                return Err(interp.type_error("Cannot convert undefined or null to object"));
            }
            for source in args.iter().skip(1) {
                for key in own_keys(source) {
                    let value = interp.get_property(source, &key)?;
                    interp.set_property(&target, &key, value)?;
                }
            }
            Ok(target)
        });
        define(m, "freeze", |_, _, args| {
            let target = arg(args, 0);
            if let Value::Object(obj) = &target {
                obj.borrow_mut().frozen = true;
            }
            Ok(target)
        });
        define(m, "create", |interp, _, args| match arg(args, 0) {
            Value::Object(proto) => Ok(Value::object_with_proto(PropertyMap::new(), Some(proto))),
            Value::Null => Ok(Value::new_object()),
            _ => Err(interp.type_error("Object prototype may only be an Object or null")),
        });
        define(m, "fromEntries", |interp, _, args| {
            let mut props = PropertyMap::new();
            for entry in interp.iterate(&arg(args, 0))? {
                let key = interp.get_property(&entry, "0")?.to_property_key();
                let value = interp.get_property(&entry, "1")?;
                props.insert(key, value);
            }
            Ok(Value::object(props))
        });
    })
}

fn array_ctor() -> Value {
    let ctor = Value::native("Array", |interp, _, args| {
        Ok(match args {
            [Value::Number(n)] if *n >= 0.0 && n.fract() == 0.0 => {
                if *n > interp.limits().max_array_len as f64 {
                    return Err(interp.throw("RangeError", "Invalid array length"));
                }
                Value::array(vec![Value::Undefined; *n as usize])
            }
            _ => Value::array(args.to_vec()),
        })
    });
    with_props(ctor, |m| {
        define(m, "isArray", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
        });
        define(m, "of", |_, _, args| Ok(Value::array(args.to_vec())));
        define(m, "from", |interp, _, args| {
            let source = arg(args, 0);
            let items = match &source {
                Value::Array(_) | Value::String(_) => interp.iterate(&source)?,
                Value::Object(_) => {
                    let len = interp.get_property(&source, "length")?.to_number();
                    let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
                    interp.check_array_len(len)?;
                    let mut items = Vec::with_capacity(len);
                    for i in 0..len {
                        items.push(interp.get_property(&source, &i.to_string())?);
                    }
                    items
                }
                _ => Vec::new(),
            };
            let mapper = arg(args, 1);
            if matches!(mapper, Value::Function(_)) {
                let mut mapped = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    mapped.push(interp.call(&mapper, Value::Undefined, &[item, Value::Number(i as f64)])?);
                }
                return Ok(Value::array(mapped));
            }
            Ok(Value::array(items))
        });
    })
}

fn number_ctor() -> Value {
    let ctor = Value::native("Number", |_, _, args| {
        Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
    });
    with_props(ctor, |m| {
        m.insert("MAX_SAFE_INTEGER".into(), Value::Number(9_007_199_254_740_991.0));
        m.insert("MIN_SAFE_INTEGER".into(), Value::Number(-9_007_199_254_740_991.0));
        m.insert("EPSILON".into(), Value::Number(f64::EPSILON));
        m.insert("MAX_VALUE".into(), Value::Number(f64::MAX));
        define(m, "isFinite", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())))
        });
        define(m, "isInteger", |_, _, args| {
            Ok(Value::Bool(
                matches!(arg(args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0),
            ))
        });
        define(m, "isNaN", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan())))
        });
        define(m, "parseFloat", parse_float);
        define(m, "parseInt", parse_int);
    })
}

fn parse_int(_: &mut Interpreter, _: &Value, args: &[Value]) -> NativeResult {
    let text = arg(args, 0).to_display();
    let mut s = text.trim();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    let mut radix = match arg(args, 1) {
        Value::Undefined => 10,
        other => other.to_number() as u32,
    };
    if radix == 0 {
        radix = 10;
    }
    if (radix == 16 || !matches!(arg(args, 1), Value::Number(_)))
        && let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    {
        radix = 16;
        s = rest;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let mut value: Option<f64> = None;
    for c in s.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        value = Some(value.unwrap_or(0.0) * f64::from(radix) + f64::from(digit));
    }
    Ok(Value::Number(value.map_or(f64::NAN, |v| sign * v)))
}

fn parse_float(_: &mut Interpreter, _: &Value, args: &[Value]) -> NativeResult {
    let text = arg(args, 0).to_display();
    let s = text.trim_start();
    for (prefix, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if s.starts_with(prefix) {
            return Ok(Value::Number(value));
        }
    }
    // Longest prefix that parses as a float.
    let candidate: String = s
        .char_indices()
        .take_while(|&(i, c)| {
            c.is_ascii_digit()
                || c == '.'
                || c == 'e'
                || c == 'E'
                || ((c == '-' || c == '+') && (i == 0 || s[..i].ends_with(['e', 'E'])))
        })
        .map(|(_, c)| c)
        .collect();
    let value = (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
        .unwrap_or(f64::NAN);
    Ok(Value::Number(value))
}

fn console(label: Rc<str>) -> Value {
    fn render(args: &[Value]) -> String {
        args.iter()
            .map(|arg| match arg {
                Value::Object(_) | Value::Array(_) => match arg.to_json() {
                    Ok(Some(json)) => json.to_string(),
                    _ => arg.to_display(),
                },
                other => other.to_display(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    namespace(|m| {
        let l = Rc::clone(&label);
        define(m, "log", move |_, _, args| {
            tracing::info!(widget = %l, "{}", render(args));
            Ok(Value::Undefined)
        });
        let l = Rc::clone(&label);
        define(m, "info", move |_, _, args| {
            tracing::info!(widget = %l, "{}", render(args));
            Ok(Value::Undefined)
        });
        let l = Rc::clone(&label);
        define(m, "debug", move |_, _, args| {
            tracing::debug!(widget = %l, "{}", render(args));
            Ok(Value::Undefined)
        });
        let l = Rc::clone(&label);
        define(m, "warn", move |_, _, args| {
            tracing::warn!(widget = %l, "{}", render(args));
            Ok(Value::Undefined)
        });
        let l = label;
        define(m, "error", move |_, _, args| {
            tracing::error!(widget = %l, "{}", render(args));
            Ok(Value::Undefined)
        });
    })
}

fn install_methods(interp: &mut Interpreter) {
    let methods = &mut interp.methods;

    define(&mut methods.object, "hasOwnProperty", |_, this, args| {
        let key = arg(args, 0).to_property_key();
        Ok(Value::Bool(match this {
            Value::Object(obj) => obj.borrow().props.contains_key(&key),
            Value::Function(f) => f.props.borrow().contains_key(&key),
            _ => false,
        }))
    });
    define(&mut methods.object, "toString", |_, this, _| {
        Ok(Value::string(this.to_display()))
    });

    install_array_methods(&mut methods.array);
    install_string_methods(&mut methods.string);

    define(&mut methods.number, "toFixed", |interp, this, args| {
        let digits = arg(args, 0).to_number();
        let digits = if digits.is_nan() { 0.0 } else { digits };
        if !(0.0..=100.0).contains(&digits) {
            return Err(interp.throw("RangeError", "toFixed() digits argument must be between 0 and 100"));
        }
        let n = this.to_number();
        if !n.is_finite() {
            return Ok(Value::string(number_to_string(n)));
        }
        Ok(Value::string(format!("{:.*}", digits as usize, n)))
    });
    define(&mut methods.number, "toString", |interp, this, args| {
        let n = this.to_number();
        match arg(args, 0) {
            Value::Undefined => Ok(Value::string(number_to_string(n))),
            radix => {
                let radix = radix.to_number() as u32;
                if !(2..=36).contains(&radix) {
                    return Err(interp.throw("RangeError", "toString() radix must be between 2 and 36"));
                }
                Ok(Value::string(integer_to_radix(n, radix)))
            }
        }
    });

    define(&mut methods.function, "call", |interp, this, args| {
        interp.call(this, arg(args, 0), args.get(1..).unwrap_or_default())
    });
    define(&mut methods.function, "apply", |interp, this, args| {
        let list = match arg(args, 1) {
            Value::Array(items) => items.borrow().clone(),
            _ => Vec::new(),
        };
        interp.call(this, arg(args, 0), &list)
    });
    define(&mut methods.function, "bind", |interp, this, args| {
        let Value::Function(target) = this else {
            return Err(interp.type_error("Bind must be called on a function"));
        };
        Ok(Value::Function(Rc::new(Function {
            name: format!("bound {}", target.name).into(),
            kind: FunctionKind::Bound {
                target: Rc::clone(target),
                this: arg(args, 0),
                args: args.get(1..).unwrap_or_default().to_vec(),
            },
            props: RefCell::new(PropertyMap::new()),
        })))
    });
}

fn integer_to_radix(n: f64, radix: u32) -> String {
    if !n.is_finite() || n.fract() != 0.0 || radix == 10 {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let mut v = n.abs() as u64;
    if v == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while v > 0 {
        digits.push(std::char::from_digit((v % u64::from(radix)) as u32, radix).unwrap_or('0'));
        v /= u64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Resolve a relative start/end argument against `len`.
fn relative(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn this_array(interp: &Interpreter, this: &Value) -> Result<Rc<RefCell<Vec<Value>>>, Exception> {
    match this {
        Value::Array(items) => Ok(Rc::clone(items)),
        _ => Err(interp.type_error("receiver is not an array")),
    }
}

fn callback(interp: &Interpreter, args: &[Value], method: &str) -> Result<Value, Exception> {
    match arg(args, 0) {
        f @ Value::Function(_) => Ok(f),
        other => Err(interp.type_error(format!(
            "{} is not a function (in Array.prototype.{method})",
            other.to_display()
        ))),
    }
}

fn install_array_methods(m: &mut PropertyMap) {
    define(m, "push", |interp, this, args| {
        let items = this_array(interp, this)?;
        let mut items = items.borrow_mut();
        interp.check_array_len(items.len().saturating_add(args.len()))?;
        items.extend_from_slice(args);
        Ok(Value::Number(items.len() as f64))
    });
    define(m, "pop", |interp, this, _| {
        Ok(this_array(interp, this)?.borrow_mut().pop().unwrap_or_default())
    });
    define(m, "shift", |interp, this, _| {
        let items = this_array(interp, this)?;
        let mut items = items.borrow_mut();
        Ok(if items.is_empty() {
            Value::Undefined
        } else {
            items.remove(0)
        })
    });
    define(m, "unshift", |interp, this, args| {
        let items = this_array(interp, this)?;
        let mut items = items.borrow_mut();
        interp.check_array_len(items.len().saturating_add(args.len()))?;
        items.splice(0..0, args.iter().cloned());
        Ok(Value::Number(items.len() as f64))
    });
    define(m, "slice", |interp, this, args| {
        let items = this_array(interp, this)?;
        let items = items.borrow();
        let start = relative(&arg(args, 0), items.len(), 0);
        let end = relative(&arg(args, 1), items.len(), items.len());
        Ok(Value::array(items.get(start..end.max(start)).unwrap_or_default().to_vec()))
    });
    define(m, "splice", |interp, this, args| {
        let items = this_array(interp, this)?;
        let mut items = items.borrow_mut();
        let len = items.len();
        let start = relative(&arg(args, 0), len, 0);
        let count = match args.get(1) {
            None => len - start,
            Some(v) => (v.to_number().max(0.0) as usize).min(len - start),
        };
        interp.check_array_len((len - count).saturating_add(args.len().saturating_sub(2)))?;
        let removed: Vec<Value> = items
            .splice(start..start + count, args.iter().skip(2).cloned())
            .collect();
        Ok(Value::array(removed))
    });
    define(m, "concat", |interp, this, args| {
        let mut out = this_array(interp, this)?.borrow().clone();
        for extra in args {
            match extra {
                Value::Array(more) => {
                    let more = more.borrow();
                    interp.check_array_len(out.len().saturating_add(more.len()))?;
                    out.extend(more.iter().cloned());
                }
                other => {
                    interp.check_array_len(out.len() + 1)?;
                    out.push(other.clone());
                }
            }
        }
        Ok(Value::array(out))
    });
    define(m, "join", |interp, this, args| {
        let separator = match arg(args, 0) {
            Value::Undefined => ",".to_string(),
            other => interp.display(&other)?,
        };
        let items = this_array(interp, this)?.borrow().clone();
        let mut joined = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                joined.push_str(&separator);
            }
            if !item.is_nullish() {
                joined.push_str(&interp.display(item)?);
            }
            interp.check_string_len(joined.len())?;
        }
        Ok(Value::string(joined))
    });
    define(m, "indexOf", |interp, this, args| {
        let needle = arg(args, 0);
        let position = this_array(interp, this)?
            .borrow()
            .iter()
            .position(|v| v.strict_equals(&needle));
        Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
    });
    define(m, "lastIndexOf", |interp, this, args| {
        let needle = arg(args, 0);
        let position = this_array(interp, this)?
            .borrow()
            .iter()
            .rposition(|v| v.strict_equals(&needle));
        Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
    });
    define(m, "includes", |interp, this, args| {
        let needle = arg(args, 0);
        let found = this_array(interp, this)?.borrow().iter().any(|v| {
            v.strict_equals(&needle)
                || matches!((v, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
        });
        Ok(Value::Bool(found))
    });
    define(m, "reverse", |interp, this, _| {
        this_array(interp, this)?.borrow_mut().reverse();
        Ok(this.clone())
    });
    define(m, "flat", |interp, this, _| {
        let mut out = Vec::new();
        for item in this_array(interp, this)?.borrow().iter() {
            match item {
                Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                other => out.push(other.clone()),
            }
            interp.check_array_len(out.len())?;
        }
        Ok(Value::array(out))
    });

    // Callback methods iterate over a snapshot so the callback may mutate the array.
    define(m, "forEach", |interp, this, args| {
        let f = callback(interp, args, "forEach")?;
        let items = this_array(interp, this)?.borrow().clone();
        for (i, item) in items.into_iter().enumerate() {
            interp.call(&f, arg(args, 1), &[item, Value::Number(i as f64), this.clone()])?;
        }
        Ok(Value::Undefined)
    });
    define(m, "map", |interp, this, args| {
        let f = callback(interp, args, "map")?;
        let items = this_array(interp, this)?.borrow().clone();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            out.push(interp.call(&f, arg(args, 1), &[item, Value::Number(i as f64), this.clone()])?);
        }
        Ok(Value::array(out))
    });
    define(m, "filter", |interp, this, args| {
        let f = callback(interp, args, "filter")?;
        let items = this_array(interp, this)?.borrow().clone();
        let mut out = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let keep = interp
                .call(&f, arg(args, 1), &[item.clone(), Value::Number(i as f64), this.clone()])?
                .truthy();
            if keep {
                out.push(item);
            }
        }
        Ok(Value::array(out))
    });
    define(m, "find", |interp, this, args| {
        let f = callback(interp, args, "find")?;
        let items = this_array(interp, this)?.borrow().clone();
        for (i, item) in items.into_iter().enumerate() {
            if interp
                .call(&f, arg(args, 1), &[item.clone(), Value::Number(i as f64), this.clone()])?
                .truthy()
            {
                return Ok(item);
            }
        }
        Ok(Value::Undefined)
    });
    define(m, "findIndex", |interp, this, args| {
        let f = callback(interp, args, "findIndex")?;
        let items = this_array(interp, this)?.borrow().clone();
        for (i, item) in items.into_iter().enumerate() {
            if interp
                .call(&f, arg(args, 1), &[item, Value::Number(i as f64), this.clone()])?
                .truthy()
            {
                return Ok(Value::Number(i as f64));
            }
        }
        Ok(Value::Number(-1.0))
    });
    define(m, "some", |interp, this, args| {
        let f = callback(interp, args, "some")?;
        let items = this_array(interp, this)?.borrow().clone();
        for (i, item) in items.into_iter().enumerate() {
            if interp
                .call(&f, arg(args, 1), &[item, Value::Number(i as f64), this.clone()])?
                .truthy()
            {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    });
    define(m, "every", |interp, this, args| {
        let f = callback(interp, args, "every")?;
        let items = this_array(interp, this)?.borrow().clone();
        for (i, item) in items.into_iter().enumerate() {
            if !interp
                .call(&f, arg(args, 1), &[item, Value::Number(i as f64), this.clone()])?
                .truthy()
            {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    });
    define(m, "reduce", |interp, this, args| {
        let f = callback(interp, args, "reduce")?;
        let items = this_array(interp, this)?.borrow().clone();
        let mut iter = items.into_iter().enumerate();
        let mut acc = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match iter.next() {
                Some((_, first)) => first,
                None => {
                    return Err(interp.type_error("Reduce of empty array with no initial value"));
                }
            },
        };
        for (i, item) in iter {
            acc = interp.call(
                &f,
                Value::Undefined,
                &[acc, item, Value::Number(i as f64), this.clone()],
            )?;
        }
        Ok(acc)
    });
    define(m, "sort", |interp, this, args| {
        let items = this_array(interp, this)?;
        let snapshot = items.borrow().clone();
        let comparator = match arg(args, 0) {
            Value::Undefined => None,
            f @ Value::Function(_) => Some(f),
            _ => return Err(interp.type_error("The comparison function must be a function")),
        };
        let sorted = merge_sort(interp, snapshot, comparator.as_ref())?;
        *items.borrow_mut() = sorted;
        Ok(this.clone())
    });
}

fn compare(interp: &mut Interpreter, a: &Value, b: &Value, comparator: Option<&Value>) -> Result<Ordering, Exception> {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    Ok(match comparator {
        Some(f) => {
            let n = interp.call(f, Value::Undefined, &[a.clone(), b.clone()])?.to_number();
            n.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
        }
        None => a.to_display().cmp(&b.to_display()),
    })
}

/// Stable sort that propagates comparator exceptions.
fn merge_sort(
    interp: &mut Interpreter,
    mut items: Vec<Value>,
    comparator: Option<&Value>,
) -> Result<Vec<Value>, Exception> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, comparator)?;
    let right = merge_sort(interp, right, comparator)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if compare(interp, a, b, comparator)? == Ordering::Greater {
            out.extend(right.next());
        } else {
            out.extend(left.next());
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

fn this_string(this: &Value) -> String {
    this.to_display()
}

fn install_string_methods(m: &mut PropertyMap) {
    define(m, "toUpperCase", |_, this, _| Ok(Value::string(this_string(this).to_uppercase())));
    define(m, "toLowerCase", |_, this, _| Ok(Value::string(this_string(this).to_lowercase())));
    define(m, "trim", |_, this, _| Ok(Value::string(this_string(this).trim())));
    define(m, "trimStart", |_, this, _| Ok(Value::string(this_string(this).trim_start())));
    define(m, "trimEnd", |_, this, _| Ok(Value::string(this_string(this).trim_end())));
    define(m, "toString", |_, this, _| Ok(Value::string(this_string(this))));
    define(m, "indexOf", |_, this, args| {
        let s = this_string(this);
        let needle = arg(args, 0).to_display();
        Ok(Value::Number(
            s.find(&needle).map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ))
    });
    define(m, "lastIndexOf", |_, this, args| {
        let s = this_string(this);
        let needle = arg(args, 0).to_display();
        Ok(Value::Number(
            s.rfind(&needle).map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ))
    });
    define(m, "includes", |_, this, args| {
        Ok(Value::Bool(this_string(this).contains(&arg(args, 0).to_display())))
    });
    define(m, "startsWith", |_, this, args| {
        Ok(Value::Bool(this_string(this).starts_with(&arg(args, 0).to_display())))
    });
    define(m, "endsWith", |_, this, args| {
        Ok(Value::Bool(this_string(this).ends_with(&arg(args, 0).to_display())))
    });
    define(m, "charAt", |_, this, args| {
        let idx = arg(args, 0).to_number();
        let idx = if idx.is_nan() { 0.0 } else { idx };
        Ok(Value::string(if idx < 0.0 {
            String::new()
        } else {
            this_string(this)
                .chars()
                .nth(idx as usize)
                .map(String::from)
                .unwrap_or_default()
        }))
    });
    define(m, "charCodeAt", |_, this, args| {
        let idx = arg(args, 0).to_number();
        let idx = if idx.is_nan() { 0.0 } else { idx };
        let code = this_string(this)
            .encode_utf16()
            .nth(idx.max(0.0) as usize)
            .map_or(f64::NAN, f64::from);
        Ok(Value::Number(if idx < 0.0 { f64::NAN } else { code }))
    });
    define(m, "slice", |_, this, args| {
        let chars: Vec<char> = this_string(this).chars().collect();
        let start = relative(&arg(args, 0), chars.len(), 0);
        let end = relative(&arg(args, 1), chars.len(), chars.len());
        Ok(Value::string(
            chars.get(start..end.max(start)).unwrap_or_default().iter().collect::<String>(),
        ))
    });
    define(m, "substring", |_, this, args| {
        let chars: Vec<char> = this_string(this).chars().collect();
        let clamp = |v: &Value, default: usize| {
            if matches!(v, Value::Undefined) {
                return default;
            }
            let n = v.to_number();
            if n.is_nan() || n < 0.0 { 0 } else { (n as usize).min(chars.len()) }
        };
        let a = clamp(&arg(args, 0), 0);
        let b = clamp(&arg(args, 1), chars.len());
        let (start, end) = (a.min(b), a.max(b));
        Ok(Value::string(chars[start..end].iter().collect::<String>()))
    });
    define(m, "split", |_, this, args| {
        let s = this_string(this);
        let parts: Vec<Value> = match arg(args, 0) {
            Value::Undefined => vec![Value::string(s)],
            sep => {
                let sep = sep.to_display();
                if sep.is_empty() {
                    s.chars().map(|c| Value::string(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(Value::string).collect()
                }
            }
        };
        let parts = match arg(args, 1) {
            Value::Undefined => parts,
            limit => parts.into_iter().take(limit.to_number().max(0.0) as usize).collect(),
        };
        Ok(Value::array(parts))
    });
    define(m, "replace", |interp, this, args| replace(interp, this, args, false));
    define(m, "replaceAll", |interp, this, args| replace(interp, this, args, true));
    define(m, "padStart", |interp, this, args| pad(interp, this, args, true));
    define(m, "padEnd", |interp, this, args| pad(interp, this, args, false));
    define(m, "repeat", |interp, this, args| {
        let count = arg(args, 0).to_number();
        if count < 0.0 || !count.is_finite() {
            return Err(interp.throw("RangeError", "Invalid count value"));
        }
        let s = this_string(this);
        if s.is_empty() {
            return Ok(Value::string(""));
        }
        if count > interp.limits().max_string_len as f64 {
            return Err(interp.throw("RangeError", "Invalid string length"));
        }
        let count = count as usize;
        interp.check_string_len(s.len().saturating_mul(count))?;
        Ok(Value::string(s.repeat(count)))
    });
    define(m, "concat", |interp, this, args| {
        let mut s = this_string(this);
        for extra in args {
            s.push_str(&interp.display(extra)?);
            interp.check_string_len(s.len())?;
        }
        Ok(Value::string(s))
    });
}

fn replace(interp: &mut Interpreter, this: &Value, args: &[Value], all: bool) -> NativeResult {
    let s = this_string(this);
    let pattern = arg(args, 0).to_display();
    let replacement = arg(args, 1);
    let mut out = String::new();
    let mut rest = s.as_str();
    let mut consumed = 0;
    while let Some(found) = rest.find(&pattern) {
        out.push_str(&rest[..found]);
        let with = match &replacement {
            Value::Function(_) => interp
                .call(
                    &replacement,
                    Value::Undefined,
                    &[Value::string(pattern.as_str()), Value::Number((consumed + found) as f64)],
                )?
                .to_display(),
            other => other.to_display(),
        };
        out.push_str(&with);
        interp.check_string_len(out.len())?;
        let skip = found + pattern.len();
        if pattern.is_empty() {
            // Advance one character so an empty pattern cannot loop forever.
            match rest[skip..].chars().next() {
                Some(c) => {
                    out.push(c);
                    consumed += skip + c.len_utf8();
                    rest = &rest[skip + c.len_utf8()..];
                }
                None => {
                    rest = "";
                    break;
                }
            }
        } else {
            consumed += skip;
            rest = &rest[skip..];
        }
        if !all {
            break;
        }
    }
    out.push_str(rest);
    interp.check_string_len(out.len())?;
    Ok(Value::string(out))
}

fn pad(interp: &Interpreter, this: &Value, args: &[Value], start: bool) -> NativeResult {
    let s = this_string(this);
    let target = arg(args, 0).to_number();
    let filler = match arg(args, 1) {
        Value::Undefined => " ".to_string(),
        other => interp.display(&other)?,
    };
    let len = s.chars().count();
    if target.is_nan() || target <= len as f64 || filler.is_empty() {
        return Ok(Value::string(s));
    }
    if target > interp.limits().max_string_len as f64 {
        return Err(interp.throw("RangeError", "Invalid string length"));
    }
    let padding: String = filler.chars().cycle().take(target as usize - len).collect();
    interp.check_string_len(s.len() + padding.len())?;
    Ok(Value::string(if start {
        format!("{padding}{s}")
    } else {
        format!("{s}{padding}")
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{interp::Limits, parser::parse_program};

    fn eval(src: &str) -> serde_json::Value {
        let mut interp = Interpreter::new("test", Limits::default());
        let program = parse_program(&format!("var __result = {src};")).unwrap();
        let env = Rc::clone(interp.globals());
        if let Err(err) = interp.run_program(&program, &env) {
            panic!("{src}: {err:?}");
        }
        interp
            .globals()
            .lookup("__result")
            .and_then(|v| v.to_json().unwrap())
            .unwrap_or(serde_json::Value::Null)
    }

    #[test]
    fn math_and_number_helpers() {
        assert_eq!(eval("Math.max(1, 5, 3)"), 5);
        assert_eq!(eval("Math.round(2.5)"), 3);
        assert_eq!(eval("Math.round(-2.5)"), -2);
        assert_eq!(eval("(3.14159).toFixed(2)"), "3.14");
        assert_eq!(eval("parseInt('42px')"), 42);
        assert_eq!(eval("parseInt('ff', 16)"), 255);
        assert_eq!(eval("parseFloat('1.5e3 units')"), 1500);
        assert_eq!(eval("isNaN('abc')"), true);
        assert_eq!(eval("(255).toString(16)"), "ff");
    }

    #[test]
    fn array_methods() {
        assert_eq!(eval("[3, 1, 2].sort()"), json!([1, 2, 3]));
        assert_eq!(eval("[3, 10, 2].sort((a, b) => b - a)"), json!([10, 3, 2]));
        assert_eq!(eval("[1, 2, 3].map(x => x * 2).filter(x => x > 2)"), json!([4, 6]));
        assert_eq!(eval("[1, 2, 3].reduce((a, b) => a + b, 10)"), 16);
        assert_eq!(eval("[1, 2, 3, 4].slice(-2)"), json!([3, 4]));
        assert_eq!(eval("['a', null, 'c'].join('-')"), "a--c");
        assert_eq!(eval("[1, [2, 3]].flat().indexOf(3)"), 2);
    }

    #[test]
    fn splice_removes_and_inserts() {
        let src = "(function () { var a = [1, 2, 3, 4]; var r = a.splice(1, 2, 'x'); return [a, r]; })()";
        assert_eq!(eval(src), json!([[1, "x", 4], [2, 3]]));
    }

    #[test]
    fn string_methods() {
        assert_eq!(eval("'Hello'.toUpperCase()"), "HELLO");
        assert_eq!(eval("'a,b,c'.split(',')"), json!(["a", "b", "c"]));
        assert_eq!(eval("'5'.padStart(3, '0')"), "005");
        assert_eq!(eval("'a-b-c'.replace('-', '+')"), "a+b-c");
        assert_eq!(eval("'a-b-c'.replaceAll('-', '+')"), "a+b+c");
        assert_eq!(eval("'hello'.slice(1, -1)"), "ell");
        assert_eq!(eval("`${1 + 1} items`.length"), 7);
    }

    #[test]
    fn json_and_object_helpers() {
        assert_eq!(eval("JSON.stringify({a: [1, 'x'], f: function () {}})"), r#"{"a":[1,"x"]}"#);
        assert_eq!(eval("JSON.stringify({a: 1}, null, 2)"), "{\n  \"a\": 1\n}");
        assert_eq!(eval("JSON.parse('{\"k\": [true]}').k[0]"), true);
        assert_eq!(eval("Object.keys({b: 1, a: 2})"), json!(["b", "a"]));
        assert_eq!(eval("Object.assign({a: 1}, {b: 2})"), json!({"a": 1, "b": 2}));
        assert_eq!(eval("Array.isArray([]) && !Array.isArray({})"), true);
    }

    #[test]
    fn bind_and_call() {
        let src = "(function () { function f(a, b) { return this.k + a + b; } var g = f.bind({k: 1}, 2); return [g(3), f.call({k: 10}, 1, 1)]; })()";
        assert_eq!(eval(src), json!([6, 12]));
    }
}
