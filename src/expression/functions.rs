//! Built-in functions callable from expressions.
//!
//! The table is closed: configuration cannot add functions.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use sha2::Sha256;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use super::jsonpath;
use super::value::{display, type_name};
use crate::pipeline::EvalError;

type Builtin = fn(&[Value]) -> Result<Value, EvalError>;

const FUNCTIONS: &[(&str, Builtin)] = &[
    ("jsonpath", jsonpath_fn),
    ("fuzzy", fuzzy),
    ("format", format),
    ("len", len),
    ("upper", upper),
    ("hmacSha1", hmac_sha1),
    ("hmacSha256", hmac_sha256),
];

/// Call a built-in function by name
pub fn call(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let (_, function) = FUNCTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| EvalError::UnknownFunction {
            name: name.to_string(),
        })?;
    function(args)
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() == expected {
        Ok(())
    } else {
        let plural = if expected == 1 { "" } else { "s" };
        Err(EvalError::function(
            name,
            format!("expects exactly {} argument{}, got {}", expected, plural, args.len()),
        ))
    }
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, EvalError> {
    args[index].as_str().ok_or_else(|| {
        EvalError::function(
            name,
            format!(
                "expects string as argument {}, got {}",
                index + 1,
                type_name(&args[index])
            ),
        )
    })
}

/// `jsonpath(path, data)`: `data` may be a map, a list or a JSON string
fn jsonpath_fn(args: &[Value]) -> Result<Value, EvalError> {
    arity("jsonpath", args, 2)?;
    let path = string_arg("jsonpath", args, 0)?;
    let data = match &args[1] {
        Value::String(s) => serde_json::from_str(s).map_err(|e| {
            EvalError::function("jsonpath", format!("cannot convert to json: {}", e))
        })?,
        v @ (Value::Object(_) | Value::Array(_)) => v.clone(),
        other => {
            return Err(EvalError::function(
                "jsonpath",
                format!("cannot convert {} to json", type_name(other)),
            ));
        }
    };
    jsonpath::query(path, &data)
}

/// `fuzzy(needle, candidates)`: closest candidate containing the needle's
/// characters in order, ignoring case and accents; `""` when none does
fn fuzzy(args: &[Value]) -> Result<Value, EvalError> {
    arity("fuzzy", args, 2)?;
    let needle = fold(string_arg("fuzzy", args, 0)?);
    let candidates = args[1].as_array().ok_or_else(|| {
        EvalError::function(
            "fuzzy",
            format!("expects list of strings as argument 2, got {}", type_name(&args[1])),
        )
    })?;

    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        let target = candidate.as_str().ok_or_else(|| {
            EvalError::function("fuzzy", format!("element is not string: {}", candidate))
        })?;
        let folded = fold(target);
        if !is_subsequence(&needle, &folded) {
            continue;
        }
        let distance = levenshtein(&needle, &folded);
        if best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, target));
        }
    }
    Ok(Value::String(best.map(|(_, t)| t.to_string()).unwrap_or_default()))
}

fn fold(s: &str) -> Vec<char> {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_subsequence(needle: &[char], haystack: &[char]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|c| rest.any(|h| h == c))
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(ca != cb);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b.len()]
}

/// `format(fmt, args...)`: printf-style templating with Go verbs
fn format(args: &[Value]) -> Result<Value, EvalError> {
    let Some(first) = args.first() else {
        return Err(EvalError::function("format", "expects at least one argument"));
    };
    let template = first.as_str().ok_or_else(|| {
        EvalError::function("format", "expects string as first argument")
    })?;
    Ok(Value::String(printf(template, &args[1..])))
}

struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

fn printf(template: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec {
            left: false,
            zero: false,
            plus: false,
            width: None,
            precision: None,
        };
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        spec.width = digits(&mut chars);
        if spec.width.is_some_and(|w| w > MAX_WIDTH) {
            out.push_str("%!(BADWIDTH)");
            spec.width = None;
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let precision = digits(&mut chars).unwrap_or(0);
            if precision > MAX_WIDTH {
                out.push_str("%!(BADPREC)");
            } else {
                spec.precision = Some(precision);
            }
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };
        let numeric = arg.is_number();
        let text = render(verb, arg, &spec);
        out.push_str(&pad(text, &spec, numeric));
    }
    out
}

/// Widths and precisions above this are rejected
const MAX_WIDTH: usize = 1_000_000;

fn digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut n: Option<usize> = None;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = Some(n.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    n
}

fn render(verb: char, arg: &Value, spec: &Spec) -> String {
    let sign = |s: String, negative: bool| {
        if spec.plus && !negative { format!("+{}", s) } else { s }
    };
    match (verb, arg) {
        ('v', Value::Null) => "<nil>".to_string(),
        ('v', Value::Number(n)) => sign(n.to_string(), n.as_f64().is_some_and(|f| f < 0.0)),
        ('v', other) => display(other),
        ('s', Value::String(s)) => match spec.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.clone(),
        },
        ('d', Value::Number(n)) if n.as_i64().is_some() => {
            let i = n.as_i64().unwrap_or_default();
            sign(i.to_string(), i < 0)
        }
        ('f' | 'F', Value::Number(n)) => {
            let f = n.as_f64().unwrap_or_default();
            sign(format!("{:.*}", spec.precision.unwrap_or(6), f), f < 0.0)
        }
        ('e', Value::Number(n)) => {
            let f = n.as_f64().unwrap_or_default();
            sign(exponent(f, spec.precision.unwrap_or(6)), f < 0.0)
        }
        ('g', Value::Number(n)) => {
            let f = n.as_f64().unwrap_or_default();
            let text = match spec.precision {
                Some(p) => format!("{:.*}", p, f),
                None => f.to_string(),
            };
            sign(text, f < 0.0)
        }
        ('x', Value::Number(n)) if n.as_i64().is_some() => format!("{:x}", n.as_i64().unwrap_or_default()),
        ('X', Value::Number(n)) if n.as_i64().is_some() => format!("{:X}", n.as_i64().unwrap_or_default()),
        ('x', Value::String(s)) => hex::encode(s),
        ('X', Value::String(s)) => hex::encode_upper(s),
        ('q', Value::String(s)) => Value::String(s.clone()).to_string(),
        ('t', Value::Bool(b)) => b.to_string(),
        (verb, other) => format!("%!{}({}={})", verb, type_name(other), display(other)),
    }
}

/// Go-style scientific notation: `1.500000e+00`
fn exponent(f: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, f);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => text,
    }
}

fn pad(text: String, spec: &Spec, numeric: bool) -> String {
    let len = text.chars().count();
    let Some(width) = spec.width.filter(|w| *w > len) else {
        return text;
    };
    let fill = width - len;
    if spec.left {
        format!("{}{}", text, " ".repeat(fill))
    } else if spec.zero && numeric {
        match text.strip_prefix(['-', '+']) {
            Some(rest) => format!("{}{}{}", &text[..1], "0".repeat(fill), rest),
            None => format!("{}{}", "0".repeat(fill), text),
        }
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

/// `len(list)`
fn len(args: &[Value]) -> Result<Value, EvalError> {
    arity("len", args, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(Value::from(items.len())),
        other => Err(EvalError::function(
            "len",
            format!("expects list as argument, got {}", type_name(other)),
        )),
    }
}

/// `upper(string)`
fn upper(args: &[Value]) -> Result<Value, EvalError> {
    arity("upper", args, 1)?;
    Ok(Value::String(string_arg("upper", args, 0)?.to_uppercase()))
}

/// `hmacSha1(key, data)`: hex-encoded HMAC-SHA1
fn hmac_sha1(args: &[Value]) -> Result<Value, EvalError> {
    arity("hmacSha1", args, 2)?;
    let key = string_arg("hmacSha1", args, 0)?;
    let data = string_arg("hmacSha1", args, 1)?;
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| EvalError::function("hmacSha1", e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(Value::String(hex::encode(mac.finalize().into_bytes())))
}

/// `hmacSha256(key, data)`: hex-encoded HMAC-SHA256
fn hmac_sha256(args: &[Value]) -> Result<Value, EvalError> {
    arity("hmacSha256", args, 2)?;
    let key = string_arg("hmacSha256", args, 0)?;
    let data = string_arg("hmacSha256", args, 1)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| EvalError::function("hmacSha256", e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(Value::String(hex::encode(mac.finalize().into_bytes())))
}
