//! Values flowing through template evaluation.

use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::helpers::strings::e;

/// Either plain data (escaped when output with `{{ }}`) or markup
/// that is already safe HTML.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Data(Value),
    Html(String),
}

impl Val {
    pub fn null() -> Val {
        Val::Data(Value::Null)
    }

    pub fn string(s: impl Into<String>) -> Val {
        Val::Data(Value::String(s.into()))
    }

    pub fn html(s: impl Into<String>) -> Val {
        Val::Html(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Data(Value::Null))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Data(v) => is_truthy(v),
            Val::Html(s) => is_truthy_str(s),
        }
    }

    /// The text the value shows as, unescaped.
    pub fn display(&self) -> Cow<str> {
        match self {
            Val::Data(v) => display_value(v),
            Val::Html(s) => Cow::Borrowed(s),
        }
    }

    /// The text the value shows as in `{{ }}`.
    pub fn escaped(&self) -> Cow<str> {
        match self {
            Val::Data(v) => Cow::Owned(e(&display_value(v))),
            Val::Html(s) => Cow::Borrowed(s),
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            Val::Data(v) => v,
            Val::Html(s) => Value::String(s),
        }
    }

    pub fn as_data(&self) -> Cow<Value> {
        match self {
            Val::Data(v) => Cow::Borrowed(v),
            Val::Html(s) => Cow::Owned(Value::String(s.clone())),
        }
    }

    /// Loose equality: numbers by numeric value, everything else
    /// structurally (markup compares as its text).
    pub fn loose_eq(&self, other: &Val) -> bool {
        let a = self.as_data();
        let b = other.as_data();
        match (a.as_ref(), b.as_ref()) {
            (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
            (x, y) => x == y,
        }
    }
}

impl From<Value> for Val {
    fn from(v: Value) -> Self {
        Val::Data(v)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::string(s)
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::string(s)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Data(Value::Bool(b))
    }
}

fn is_truthy_str(s: &str) -> bool {
    !(s.is_empty() || s == "0")
}

pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) =>
            if let Some(i) = n.as_i64() {
                i != 0
            } else if let Some(u) = n.as_u64() {
                u != 0
            } else {
                n.as_f64().map(|f| f != 0.0).unwrap_or(false)
            },
        Value::String(s) => is_truthy_str(s),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn display_value(v: &Value) -> Cow<str> {
    match v {
        Value::Null => Cow::Borrowed(""),
        Value::Bool(true) => Cow::Borrowed("1"),
        Value::Bool(false) => Cow::Borrowed(""),
        Value::Number(n) => Cow::Owned(n.to_string()),
        Value::String(s) => Cow::Borrowed(s),
        Value::Array(_) | Value::Object(_) => Cow::Owned(v.to_string()),
    }
}

/// Follow `segments` into maps (by key) and lists (by index).
pub fn lookup_path<'v, S: AsRef<str>>(mut v: &'v Value, segments: &[S]) -> Option<&'v Value> {
    for segment in segments {
        let segment = segment.as_ref();
        v = match v {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None
        };
    }
    Some(v)
}

/// Variable frames, innermost last. Lookups search from the
/// innermost frame outwards, assignments go to the innermost one.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    frames: Vec<HashMap<String, Val>>,
}

impl Scope {
    pub fn new(data: Map<String, Value>) -> Scope {
        let mut scope = Scope::default();
        scope.push(data);
        scope
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Resolve a variable path; missing variables and fields are None.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<Val> {
        let (first, rest) = path.split_first()?;
        match self.get(first.as_ref())? {
            Val::Data(v) => lookup_path(v, rest).cloned().map(Val::Data),
            html @ Val::Html(_) => if rest.is_empty() { Some(html.clone()) } else { None },
        }
    }

    /// Assign to the innermost frame holding `name`, otherwise to the
    /// outermost one.
    pub fn set(&mut self, name: &str, value: Val) {
        if let Some(slot) = self.frames.iter_mut().rev().find_map(|f| f.get_mut(name)) {
            *slot = value;
        } else if let Some(frame) = self.frames.first_mut() {
            frame.insert(name.to_string(), value);
        } else {
            self.frames.push(HashMap::from([(name.to_string(), value)]));
        }
    }

    pub fn push(&mut self, frame: Map<String, Value>) {
        self.frames.push(frame.into_iter().map(|(k, v)| (k, Val::Data(v))).collect());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn t_truthiness() {
        for v in [json!(null), json!(false), json!(0), json!(0.0), json!(""),
                  json!("0"), json!([]), json!({})] {
            assert!(!is_truthy(&v), "{v:?}");
        }
        for v in [json!(true), json!(1), json!(-2), json!(0.5), json!(" "),
                  json!("00"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&v), "{v:?}");
        }
        assert!(!Val::html("").is_truthy());
    }

    #[test]
    fn t_display_and_escape() {
        assert_eq!(display_value(&json!(true)), "1");
        assert_eq!(display_value(&json!(false)), "");
        assert_eq!(display_value(&json!(30)), "30");
        assert_eq!(display_value(&json!(["a", 1])), r#"["a",1]"#);
        assert_eq!(Val::string("<b>").escaped(), "&lt;b&gt;");
        assert_eq!(Val::html("<b>").escaped(), "<b>");
    }

    #[test]
    fn t_lookup_path() {
        let v = json!({"items": ["Car", {"name": "Train"}], "n": 1});
        assert_eq!(lookup_path(&v, &["items", "0"]), Some(&json!("Car")));
        assert_eq!(lookup_path(&v, &["items", "1", "name"]), Some(&json!("Train")));
        assert_eq!(lookup_path(&v, &["items", "7"]), None);
        assert_eq!(lookup_path(&v, &["n", "x"]), None);
    }

    #[test]
    fn t_scope_shadowing() {
        let mut data = Map::new();
        data.insert("a".into(), json!(1));
        data.insert("user".into(), json!({"name": "Ann"}));
        let mut scope = Scope::new(data);
        let mut inner = Map::new();
        inner.insert("a".into(), json!(2));
        scope.push(inner);
        assert_eq!(scope.get("a"), Some(&Val::Data(json!(2))));
        scope.set("b", Val::html("<i>b</i>"));
        assert_eq!(scope.lookup(&["b"]), Some(Val::html("<i>b</i>")));
        assert_eq!(scope.lookup(&["b", "x"]), None);
        // the shadowing frame gets the assignment
        scope.set("a", Val::Data(json!(3)));
        scope.pop();
        assert_eq!(scope.get("a"), Some(&Val::Data(json!(1))));
        // new names survive the inner frame
        assert_eq!(scope.get("b"), Some(&Val::html("<i>b</i>")));
        assert_eq!(scope.lookup(&["user", "name"]), Some(Val::string("Ann")));
        assert_eq!(scope.lookup(&["nobody"]), None);
    }

    #[test]
    fn t_loose_eq() {
        assert!(Val::Data(json!(1)).loose_eq(&Val::Data(json!(1.0))));
        assert!(Val::html("x").loose_eq(&Val::string("x")));
        assert!(!Val::string("1").loose_eq(&Val::Data(json!(1))));
    }
}
