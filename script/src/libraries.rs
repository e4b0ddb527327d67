//! Host libraries that controllers expect on their context: a color helper
//! (`ctx.tinycolor`) and a date helper (`ctx.moment`). The DOM-query helper
//! (`$`/`jQuery`) and `cssjs` have no sandbox implementation.

use std::{cell::RefCell, rc::Rc};

use chrono::{DateTime, Datelike, Months, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    builtins::arg,
    interp::{Exception, Interpreter},
    value::{Object, ObjectRef, PropertyMap, Value},
};

/// Which optional libraries `inject_utilities` tries to install.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Libraries {
    pub tinycolor: bool,
    pub moment: bool,
    pub jquery: bool,
    pub cssjs: bool,
}

impl Default for Libraries {
    fn default() -> Self {
        Self {
            tinycolor: true,
            moment: true,
            jquery: false,
            cssjs: false,
        }
    }
}

/// Install the enabled libraries onto `ctx`. A library that is disabled or has no
/// implementation is logged and skipped.
pub fn inject_utilities(interp: &mut Interpreter, ctx: &Value, libraries: &Libraries) {
    let candidates: [(&str, bool, Option<fn() -> Value>); 5] = [
        ("tinycolor", libraries.tinycolor, Some(tinycolor)),
        ("moment", libraries.moment, Some(moment)),
        ("$", libraries.jquery, None),
        ("jQuery", libraries.jquery, None),
        ("cssjs", libraries.cssjs, None),
    ];
    for (name, enabled, build) in candidates {
        let Some(build) = build.filter(|_| enabled) else {
            tracing::warn!(widget = %interp.label, library = name, "library not available");
            continue;
        };
        if let Err(err) = interp.set_property(ctx, name, build()) {
            tracing::warn!(widget = %interp.label, library = name, ?err, "failed to install library");
        }
    }
}

fn method(
    proto: &ObjectRef,
    name: &str,
    f: impl Fn(&mut Interpreter, &Value, &[Value]) -> Result<Value, Exception> + 'static,
) {
    proto
        .borrow_mut()
        .props
        .insert(name.into(), Value::native(name, f));
}

fn number_prop(this: &Value, key: &str) -> f64 {
    match this {
        Value::Object(obj) => obj.borrow().props.get(key).map_or(f64::NAN, Value::to_number),
        _ => f64::NAN,
    }
}

fn set_number_prop(this: &Value, key: &str, value: f64) {
    if let Value::Object(obj) = this {
        obj.borrow_mut().props.insert(key.into(), Value::Number(value));
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

const NAMED_COLORS: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("lime", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("orange", [255, 165, 0]),
    ("purple", [128, 0, 128]),
    ("cyan", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("silver", [192, 192, 192]),
    ("navy", [0, 0, 128]),
    ("teal", [0, 128, 128]),
    ("maroon", [128, 0, 0]),
    ("olive", [128, 128, 0]),
];

impl Rgba {
    pub fn parse(input: &str) -> Option<Rgba> {
        let s = input.trim().to_ascii_lowercase();
        if s == "transparent" {
            return Some(Rgba { r: 0.0, g: 0.0, b: 0.0, a: 0.0 });
        }
        if let Some((_, [r, g, b])) = NAMED_COLORS.iter().find(|(name, _)| *name == s) {
            return Some(Rgba {
                r: f64::from(*r),
                g: f64::from(*g),
                b: f64::from(*b),
                a: 1.0,
            });
        }
        if let Some(hex) = s.strip_prefix('#') {
            return Self::parse_hex(hex);
        }
        let (body, has_alpha) = if let Some(body) = s.strip_prefix("rgba(") {
            (body, true)
        } else if let Some(body) = s.strip_prefix("rgb(") {
            (body, false)
        } else {
            return Self::parse_hex(&s);
        };
        let parts: Vec<f64> = body
            .strip_suffix(')')?
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match (parts.as_slice(), has_alpha) {
            ([r, g, b], false) => Some(Rgba { r: *r, g: *g, b: *b, a: 1.0 }.clamped()),
            ([r, g, b, a], true) => Some(Rgba { r: *r, g: *g, b: *b, a: *a }.clamped()),
            _ => None,
        }
    }

    fn parse_hex(hex: &str) -> Option<Rgba> {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(f64::from);
        let short = |i: usize| channel(&hex[i..=i].repeat(2));
        match hex.len() {
            3 => Some(Rgba { r: short(0)?, g: short(1)?, b: short(2)?, a: 1.0 }),
            6 | 8 => Some(Rgba {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
                a: if hex.len() == 8 { channel(&hex[6..8])? / 255.0 } else { 1.0 },
            }),
            _ => None,
        }
    }

    fn clamped(self) -> Rgba {
        Rgba {
            r: self.r.clamp(0.0, 255.0),
            g: self.g.clamp(0.0, 255.0),
            b: self.b.clamp(0.0, 255.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    pub fn to_hex(self) -> String {
        format!(
            "#{:02x}{:02x}{:02x}",
            self.r.round() as u8,
            self.g.round() as u8,
            self.b.round() as u8
        )
    }

    pub fn to_rgb_string(self) -> String {
        let (r, g, b) = (self.r.round(), self.g.round(), self.b.round());
        if self.a >= 1.0 {
            format!("rgb({r}, {g}, {b})")
        } else {
            format!("rgba({r}, {g}, {b}, {})", (self.a * 100.0).round() / 100.0)
        }
    }

    pub fn brightness(self) -> f64 {
        (self.r * 299.0 + self.g * 587.0 + self.b * 114.0) / 1000.0
    }

    fn to_hsl(self) -> (f64, f64, f64) {
        let (r, g, b) = (self.r / 255.0, self.g / 255.0, self.b / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        if max == min {
            return (0.0, 0.0, l);
        }
        let d = max - min;
        let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
        let h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        (h / 6.0, s, l)
    }

    fn from_hsl(h: f64, s: f64, l: f64, a: f64) -> Rgba {
        if s == 0.0 {
            return Rgba { r: l * 255.0, g: l * 255.0, b: l * 255.0, a };
        }
        let hue = |p: f64, q: f64, mut t: f64| {
            if t < 0.0 {
                t += 1.0;
            }
            if t > 1.0 {
                t -= 1.0;
            }
            if t < 1.0 / 6.0 {
                p + (q - p) * 6.0 * t
            } else if t < 0.5 {
                q
            } else if t < 2.0 / 3.0 {
                p + (q - p) * (2.0 / 3.0 - t) * 6.0
            } else {
                p
            }
        };
        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        Rgba {
            r: hue(p, q, h + 1.0 / 3.0) * 255.0,
            g: hue(p, q, h) * 255.0,
            b: hue(p, q, h - 1.0 / 3.0) * 255.0,
            a,
        }
    }

    /// Shift lightness by `amount` percent.
    pub fn lighten(self, amount: f64) -> Rgba {
        let (h, s, l) = self.to_hsl();
        Rgba::from_hsl(h, s, (l + amount / 100.0).clamp(0.0, 1.0), self.a)
    }
}

fn color_value(proto: &ObjectRef, color: Option<Rgba>) -> Value {
    let color = color.unwrap_or(Rgba { r: 0.0, g: 0.0, b: 0.0, a: 1.0 });
    let mut props = PropertyMap::new();
    props.insert("_r".into(), Value::Number(color.r));
    props.insert("_g".into(), Value::Number(color.g));
    props.insert("_b".into(), Value::Number(color.b));
    props.insert("_a".into(), Value::Number(color.a));
    Value::object_with_proto(props, Some(Rc::clone(proto)))
}

fn this_color(this: &Value) -> Rgba {
    Rgba {
        r: number_prop(this, "_r"),
        g: number_prop(this, "_g"),
        b: number_prop(this, "_b"),
        a: number_prop(this, "_a"),
    }
}

fn color_from_arg(value: &Value) -> Option<Rgba> {
    match value {
        Value::String(s) => Rgba::parse(s),
        Value::Object(obj) => {
            let obj = obj.borrow();
            if obj.props.contains_key("_r") {
                drop(obj);
                return Some(this_color(value));
            }
            let channel = |k: &str| obj.props.get(k).map(Value::to_number);
            Some(
                Rgba {
                    r: channel("r")?,
                    g: channel("g")?,
                    b: channel("b")?,
                    a: channel("a").unwrap_or(1.0),
                }
                .clamped(),
            )
        }
        _ => None,
    }
}

pub fn tinycolor() -> Value {
    let proto: ObjectRef = Rc::new(RefCell::new(Object::default()));

    method(&proto, "isValid", |_, this, _| {
        Ok(Value::Bool(match this {
            Value::Object(obj) => obj.borrow().props.get("_ok").is_some_and(Value::truthy),
            _ => false,
        }))
    });
    method(&proto, "toHexString", |_, this, _| Ok(Value::string(this_color(this).to_hex())));
    method(&proto, "toHex8String", |_, this, _| {
        let color = this_color(this);
        Ok(Value::string(format!(
            "{}{:02x}",
            color.to_hex(),
            (color.a * 255.0).round() as u8
        )))
    });
    method(&proto, "toRgbString", |_, this, _| {
        Ok(Value::string(this_color(this).to_rgb_string()))
    });
    method(&proto, "toString", |_, this, _| {
        let color = this_color(this);
        Ok(Value::string(if color.a >= 1.0 {
            color.to_hex()
        } else {
            color.to_rgb_string()
        }))
    });
    method(&proto, "toRgb", |_, this, _| {
        let color = this_color(this);
        let mut props = PropertyMap::new();
        props.insert("r".into(), Value::Number(color.r.round()));
        props.insert("g".into(), Value::Number(color.g.round()));
        props.insert("b".into(), Value::Number(color.b.round()));
        props.insert("a".into(), Value::Number(color.a));
        Ok(Value::object(props))
    });
    method(&proto, "getAlpha", |_, this, _| Ok(Value::Number(this_color(this).a)));
    method(&proto, "setAlpha", |_, this, args| {
        let alpha = arg(args, 0).to_number();
        let alpha = if alpha.is_nan() { 1.0 } else { alpha.clamp(0.0, 1.0) };
        set_number_prop(this, "_a", alpha);
        Ok(this.clone())
    });
    method(&proto, "getBrightness", |_, this, _| {
        Ok(Value::Number(this_color(this).brightness()))
    });
    method(&proto, "isDark", |_, this, _| {
        Ok(Value::Bool(this_color(this).brightness() < 128.0))
    });
    method(&proto, "isLight", |_, this, _| {
        Ok(Value::Bool(this_color(this).brightness() >= 128.0))
    });
    let shade = |sign: f64| {
        move |_: &mut Interpreter, this: &Value, args: &[Value]| -> Result<Value, Exception> {
            let amount = match arg(args, 0) {
                Value::Undefined => 10.0,
                v => v.to_number(),
            };
            let shaded = this_color(this).lighten(sign * amount);
            let mut result = PropertyMap::new();
            result.insert("_r".into(), Value::Number(shaded.r));
            result.insert("_g".into(), Value::Number(shaded.g));
            result.insert("_b".into(), Value::Number(shaded.b));
            result.insert("_a".into(), Value::Number(shaded.a));
            result.insert("_ok".into(), Value::Bool(true));
            let proto = match this {
                Value::Object(obj) => obj.borrow().proto.clone(),
                _ => None,
            };
            Ok(Value::object_with_proto(result, proto))
        }
    };
    method(&proto, "lighten", shade(1.0));
    method(&proto, "darken", shade(-1.0));

    let ctor_proto = Rc::clone(&proto);
    Value::native("tinycolor", move |_, _, args| {
        let parsed = color_from_arg(&arg(args, 0));
        let value = color_value(&ctor_proto, parsed);
        if let Value::Object(obj) = &value {
            obj.borrow_mut()
                .props
                .insert("_ok".into(), Value::Bool(parsed.is_some()));
        }
        Ok(value)
    })
}

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const FORMAT_TOKENS: &[&str] = &[
    "YYYY", "MMMM", "dddd", "MMM", "ddd", "SSS", "YY", "MM", "DD", "HH", "hh", "mm", "ss", "M",
    "D", "H", "h", "m", "s", "A", "a", "Z",
];

/// Render `dt` with a moment-style pattern. Text in `[...]` is copied verbatim.
pub fn format_datetime(dt: &DateTime<Utc>, pattern: &str) -> String {
    let mut out = String::new();
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(literal) = rest.strip_prefix('[')
            && let Some(end) = literal.find(']')
        {
            out.push_str(&literal[..end]);
            rest = &literal[end + 1..];
            continue;
        }
        let Some(token) = FORMAT_TOKENS.iter().find(|t| rest.starts_with(**t)) else {
            let mut chars = rest.chars();
            out.extend(chars.next());
            rest = chars.as_str();
            continue;
        };
        let hour12 = match dt.hour() % 12 {
            0 => 12,
            h => h,
        };
        let piece = match *token {
            "YYYY" => format!("{:04}", dt.year()),
            "YY" => format!("{:02}", dt.year().rem_euclid(100)),
            "MMMM" => MONTHS[dt.month0() as usize].to_string(),
            "MMM" => MONTHS[dt.month0() as usize][..3].to_string(),
            "MM" => format!("{:02}", dt.month()),
            "M" => dt.month().to_string(),
            "DD" => format!("{:02}", dt.day()),
            "D" => dt.day().to_string(),
            "dddd" => WEEKDAYS[dt.weekday().num_days_from_sunday() as usize].to_string(),
            "ddd" => WEEKDAYS[dt.weekday().num_days_from_sunday() as usize][..3].to_string(),
            "HH" => format!("{:02}", dt.hour()),
            "H" => dt.hour().to_string(),
            "hh" => format!("{hour12:02}"),
            "h" => hour12.to_string(),
            "mm" => format!("{:02}", dt.minute()),
            "m" => dt.minute().to_string(),
            "ss" => format!("{:02}", dt.second()),
            "s" => dt.second().to_string(),
            "SSS" => format!("{:03}", dt.timestamp_subsec_millis()),
            "A" => (if dt.hour() < 12 { "AM" } else { "PM" }).to_string(),
            "a" => (if dt.hour() < 12 { "am" } else { "pm" }).to_string(),
            _ => "+00:00".to_string(),
        };
        out.push_str(&piece);
        rest = &rest[token.len()..];
    }
    out
}

pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(input, pattern) {
            return Some(naive.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn moment_millis(this: &Value) -> Option<i64> {
    let ms = number_prop(this, "_ms");
    ms.is_finite().then_some(ms as i64)
}

fn moment_datetime(this: &Value) -> Option<DateTime<Utc>> {
    moment_millis(this).and_then(DateTime::from_timestamp_millis)
}

/// Add `amount` of `unit` to `dt`. Calendar units clamp to the end of the month.
fn shift(dt: DateTime<Utc>, amount: f64, unit: &str) -> Option<DateTime<Utc>> {
    let months = |n: f64| -> Option<DateTime<Utc>> {
        let n = n.trunc() as i64;
        let magnitude = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
        if n >= 0 {
            dt.checked_add_months(magnitude)
        } else {
            dt.checked_sub_months(magnitude)
        }
    };
    let millis = |factor: f64| dt.checked_add_signed(TimeDelta::milliseconds((amount * factor) as i64));
    match unit {
        "ms" | "millisecond" | "milliseconds" => millis(1.0),
        "s" | "second" | "seconds" => millis(1_000.0),
        "m" | "minute" | "minutes" => millis(60_000.0),
        "h" | "hour" | "hours" => millis(3_600_000.0),
        "d" | "day" | "days" => millis(86_400_000.0),
        "w" | "week" | "weeks" => millis(604_800_000.0),
        "M" | "month" | "months" => months(amount),
        "Q" | "quarter" | "quarters" => months(amount * 3.0),
        "y" | "year" | "years" => months(amount * 12.0),
        _ => None,
    }
}

fn unit_millis(unit: &str) -> Option<f64> {
    Some(match unit {
        "ms" | "millisecond" | "milliseconds" => 1.0,
        "s" | "second" | "seconds" => 1_000.0,
        "m" | "minute" | "minutes" => 60_000.0,
        "h" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        "w" | "week" | "weeks" => 604_800_000.0,
        _ => return None,
    })
}

fn moment_value(proto: &ObjectRef, dt: Option<DateTime<Utc>>) -> Value {
    let mut props = PropertyMap::new();
    props.insert(
        "_ms".into(),
        Value::Number(dt.map_or(f64::NAN, |dt| dt.timestamp_millis() as f64)),
    );
    Value::object_with_proto(props, Some(Rc::clone(proto)))
}

fn moment_from_args(args: &[Value]) -> Option<DateTime<Utc>> {
    match arg(args, 0) {
        Value::Undefined => Some(Utc::now()),
        Value::Number(ms) if ms.is_finite() => DateTime::from_timestamp_millis(ms as i64),
        Value::String(s) => parse_datetime(&s),
        value @ Value::Object(_) => moment_datetime(&value),
        _ => None,
    }
}

pub fn moment() -> Value {
    let proto: ObjectRef = Rc::new(RefCell::new(Object::default()));

    method(&proto, "isValid", |_, this, _| Ok(Value::Bool(moment_datetime(this).is_some())));
    method(&proto, "valueOf", |_, this, _| {
        Ok(Value::Number(moment_millis(this).map_or(f64::NAN, |ms| ms as f64)))
    });
    method(&proto, "unix", |_, this, _| {
        Ok(Value::Number(
            moment_millis(this).map_or(f64::NAN, |ms| ms.div_euclid(1_000) as f64),
        ))
    });
    method(&proto, "toISOString", |_, this, _| {
        Ok(match moment_datetime(this) {
            Some(dt) => Value::string(format_datetime(&dt, "YYYY-MM-DD[T]HH:mm:ss.SSS[Z]")),
            None => Value::Null,
        })
    });
    method(&proto, "format", |_, this, args| {
        let Some(dt) = moment_datetime(this) else {
            return Ok(Value::string("Invalid date"));
        };
        let pattern = match arg(args, 0) {
            Value::String(s) => s.to_string(),
            _ => "YYYY-MM-DDTHH:mm:ssZ".to_string(),
        };
        Ok(Value::string(format_datetime(&dt, &pattern)))
    });
    let adjust = |sign: f64| {
        move |_: &mut Interpreter, this: &Value, args: &[Value]| -> Result<Value, Exception> {
            let amount = arg(args, 0).to_number();
            let unit = match arg(args, 1) {
                Value::Undefined => "ms".to_string(),
                v => v.to_display(),
            };
            let shifted = moment_datetime(this).and_then(|dt| shift(dt, sign * amount, &unit));
            let ms = shifted.map_or(f64::NAN, |dt| dt.timestamp_millis() as f64);
            set_number_prop(this, "_ms", ms);
            Ok(this.clone())
        }
    };
    method(&proto, "add", adjust(1.0));
    method(&proto, "subtract", adjust(-1.0));
    method(&proto, "diff", |_, this, args| {
        let other = moment_from_args(args);
        let (Some(a), Some(b)) = (moment_datetime(this), other) else {
            return Ok(Value::Number(f64::NAN));
        };
        let delta = (a.timestamp_millis() - b.timestamp_millis()) as f64;
        let unit = match arg(args, 1) {
            Value::Undefined => "ms".to_string(),
            v => v.to_display(),
        };
        Ok(Value::Number(match unit_millis(&unit) {
            Some(factor) => (delta / factor).trunc(),
            None => f64::NAN,
        }))
    });
    method(&proto, "isBefore", |_, this, args| {
        Ok(Value::Bool(matches!(
            (moment_datetime(this), moment_from_args(args)),
            (Some(a), Some(b)) if a < b
        )))
    });
    method(&proto, "isAfter", |_, this, args| {
        Ok(Value::Bool(matches!(
            (moment_datetime(this), moment_from_args(args)),
            (Some(a), Some(b)) if a > b
        )))
    });
    method(&proto, "clone", |_, this, _| {
        let proto = match this {
            Value::Object(obj) => obj.borrow().proto.clone(),
            _ => None,
        };
        let mut props = PropertyMap::new();
        props.insert("_ms".into(), Value::Number(number_prop(this, "_ms")));
        Ok(Value::object_with_proto(props, proto))
    });
    for (name, get) in [
        ("year", (|dt: &DateTime<Utc>| f64::from(dt.year())) as fn(&DateTime<Utc>) -> f64),
        ("month", |dt| f64::from(dt.month0())),
        ("date", |dt| f64::from(dt.day())),
        ("day", |dt| f64::from(dt.weekday().num_days_from_sunday())),
        ("hours", |dt| f64::from(dt.hour())),
        ("minutes", |dt| f64::from(dt.minute())),
        ("seconds", |dt| f64::from(dt.second())),
    ] {
        method(&proto, name, move |_, this, _| {
            Ok(Value::Number(moment_datetime(this).map_or(f64::NAN, |dt| get(&dt))))
        });
    }

    let ctor_proto = Rc::clone(&proto);
    let ctor = Value::native("moment", move |_, _, args| {
        Ok(moment_value(&ctor_proto, moment_from_args(args)))
    });
    if let Value::Function(f) = &ctor {
        let utc_proto = Rc::clone(&proto);
        f.set(
            "utc",
            Value::native("utc", move |_, _, args| {
                Ok(moment_value(&utc_proto, moment_from_args(args)))
            }),
        );
        f.set(
            "isMoment",
            Value::native("isMoment", |_, _, args| {
                Ok(Value::Bool(matches!(
                    arg(args, 0),
                    Value::Object(obj) if obj.borrow().props.contains_key("_ms")
                )))
            }),
        );
    }
    ctor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_color_forms() {
        assert_eq!(Rgba::parse("#f00").map(Rgba::to_hex).as_deref(), Some("#ff0000"));
        assert_eq!(Rgba::parse("#336699").map(Rgba::to_hex).as_deref(), Some("#336699"));
        assert_eq!(
            Rgba::parse("rgba(10, 20, 30, 0.5)").map(Rgba::to_rgb_string).as_deref(),
            Some("rgba(10, 20, 30, 0.5)")
        );
        assert_eq!(Rgba::parse("Orange").map(Rgba::to_hex).as_deref(), Some("#ffa500"));
        assert!(Rgba::parse("not-a-color").is_none());
    }

    #[test]
    fn lighten_and_darken_move_lightness() {
        let gray = Rgba::parse("#808080").unwrap();
        assert_eq!(gray.lighten(20.0).to_hex(), "#b3b3b3");
        assert_eq!(gray.lighten(-20.0).to_hex(), "#4d4d4d");
        assert!(Rgba::parse("#000").unwrap().brightness() < 128.0);
    }

    #[test]
    fn formats_moment_patterns() {
        let dt = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(
            format_datetime(&dt, "YYYY-MM-DD HH:mm:ss.SSS"),
            "2023-11-14 22:13:20.123"
        );
        assert_eq!(format_datetime(&dt, "MMM D, h:mm A [at] ddd"), "Nov 14, 10:13 PM at Tue");
    }

    #[test]
    fn month_arithmetic_clamps() {
        let jan31 = parse_datetime("2024-01-31").unwrap();
        let feb = shift(jan31, 1.0, "month").unwrap();
        assert_eq!(format_datetime(&feb, "YYYY-MM-DD"), "2024-02-29");
        let back = shift(feb, -2.0, "d").unwrap();
        assert_eq!(format_datetime(&back, "YYYY-MM-DD"), "2024-02-27");
    }
}
