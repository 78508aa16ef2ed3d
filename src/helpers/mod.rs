//! Functions callable from templates.
//!
//! Every helper has the same signature; [`Args`] takes care of
//! argument conversion so that individual helpers read like plain
//! functions.

pub mod debug;
pub mod strings;
pub mod urls;

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde_json::{Map, Value};

use crate::session::SessionHandle;
use crate::template::error::TemplateError;
use crate::template::render::{type_name, RenderState, Renderer};
use crate::template::value::Val;

/// What a helper gets to work with besides its arguments.
pub struct HelperCx<'a> {
    pub renderer: &'a Renderer,
    pub state: &'a mut RenderState,
    /// Line of the calling template, for error messages.
    pub line: usize,
}

impl<'a> HelperCx<'a> {
    pub fn write(&mut self, s: &str) {
        self.state.output.write(s);
    }

    pub fn session(&self, helper: &'static str) -> Result<&SessionHandle, TemplateError> {
        self.state.env.session.as_ref().ok_or_else(
            || TemplateError::args(helper, "no session available"))
    }
}

pub type Helper = fn(&mut HelperCx<'_>, Vec<Val>) -> Result<Val, TemplateError>;

lazy_static! {
    static ref HELPERS: HashMap<&'static str, Helper> = {
        let mut m: HashMap<&'static str, Helper> = HashMap::new();
        strings::register(&mut m);
        urls::register(&mut m);
        debug::register(&mut m);
        register_layout(&mut m);
        register_session(&mut m);
        m
    };
}

pub fn lookup(name: &str) -> Option<Helper> {
    HELPERS.get(name).copied()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    HELPERS.keys().copied()
}

/// Positional helper arguments, consumed front to back.
pub struct Args {
    helper: &'static str,
    vals: std::vec::IntoIter<Val>,
    pos: usize,
}

impl Args {
    pub fn new(helper: &'static str, vals: Vec<Val>) -> Self {
        Args { helper, vals: vals.into_iter(), pos: 0 }
    }

    fn err(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::args(self.helper, message)
    }

    fn next(&mut self) -> Option<Val> {
        self.pos += 1;
        self.vals.next()
    }

    pub fn val(&mut self) -> Result<Val, TemplateError> {
        let pos = self.pos + 1;
        self.next().ok_or_else(|| self.err(format!("missing argument {pos}")))
    }

    pub fn opt_val(&mut self) -> Option<Val> {
        self.next()
    }

    /// Scalars convert to their display text; lists and maps are an
    /// error.
    pub fn string(&mut self) -> Result<String, TemplateError> {
        let v = self.val()?;
        self.to_string(v)
    }

    pub fn opt_string(&mut self, default: &str) -> Result<String, TemplateError> {
        match self.next() {
            None => Ok(default.to_string()),
            Some(v) => self.to_string(v),
        }
    }

    fn to_string(&self, v: Val) -> Result<String, TemplateError> {
        match v {
            Val::Html(s) => Ok(s),
            Val::Data(Value::String(s)) => Ok(s),
            Val::Data(v @ (Value::Array(_) | Value::Object(_))) =>
                Err(self.err(format!("argument {} must be a string, got {}",
                                     self.pos, type_name(&v)))),
            v => Ok(v.display().into_owned()),
        }
    }

    pub fn int(&mut self) -> Result<i64, TemplateError> {
        let v = self.val()?;
        self.to_int(v)
    }

    pub fn opt_int(&mut self, default: i64) -> Result<i64, TemplateError> {
        match self.next() {
            None => Ok(default),
            Some(v) => self.to_int(v),
        }
    }

    fn to_int(&self, v: Val) -> Result<i64, TemplateError> {
        let parsed = match v.as_data().as_ref() {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::Bool(b) => Some(*b as i64),
            Value::String(s) => s.trim().parse::<i64>().ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
            _ => None,
        };
        parsed.ok_or_else(|| self.err(format!("argument {} must be an integer, got {:?}",
                                              self.pos, v.display())))
    }

    pub fn opt_bool(&mut self, default: bool) -> bool {
        self.next().map(|v| v.is_truthy()).unwrap_or(default)
    }

    /// A map argument; missing or null gives an empty map.
    pub fn opt_map(&mut self) -> Result<Map<String, Value>, TemplateError> {
        match self.next().map(Val::into_data) {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(self.err(format!("argument {} must be a map, got {}",
                                                self.pos, type_name(&other)))),
        }
    }

    pub fn rest(self) -> Vec<Val> {
        self.vals.collect()
    }

    /// Fails if arguments are left over.
    pub fn finish(mut self) -> Result<(), TemplateError> {
        if self.vals.next().is_some() {
            Err(self.err(format!("too many arguments (expecting at most {})", self.pos)))
        } else {
            Ok(())
        }
    }
}

// ------------------------------------------------------------------
// Layout, component and partial helpers

fn register_layout(m: &mut HashMap<&'static str, Helper>) {
    m.insert("slot", slot);
    m.insert("component", component);
    m.insert("component_capture", component_capture);
    m.insert("partial", partial);
    m.insert("partial_capture", partial_capture);
}

fn slot(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("slot", args);
    let name = args.string()?;
    let default = args.opt_string("")?;
    args.finish()?;
    Ok(Val::html(cx.state.slots.slot(&name, &default)))
}

fn include(
    helper: &'static str,
    cx: &mut HelperCx,
    args: Vec<Val>,
    is_component: bool,
    capture: bool,
) -> Result<Val, TemplateError> {
    let mut args = Args::new(helper, args);
    let name = args.string()?;
    let data = args.opt_map()?;
    args.finish()?;
    let renderer = cx.renderer;
    let output = if is_component {
        renderer.component(cx.state, &name, data, capture)?
    } else {
        renderer.partial(cx.state, &name, data, capture)?
    };
    Ok(output.map(Val::html).unwrap_or_else(Val::null))
}

fn component(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    include("component", cx, args, true, false)
}

fn component_capture(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    include("component_capture", cx, args, true, true)
}

fn partial(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    include("partial", cx, args, false, false)
}

fn partial_capture(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    include("partial_capture", cx, args, false, true)
}

// ------------------------------------------------------------------
// Session backed helpers

fn register_session(m: &mut HashMap<&'static str, Helper>) {
    m.insert("csrf_token", csrf_token);
    m.insert("csrf_field", csrf_field);
    m.insert("validate_csrf", validate_csrf);
    m.insert("old", old);
    m.insert("flash", flash);
    m.insert("flash_get", flash_get);
}

fn csrf_token(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    Args::new("csrf_token", args).finish()?;
    Ok(Val::string(cx.session("csrf_token")?.csrf_token()))
}

fn csrf_field(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    Args::new("csrf_field", args).finish()?;
    Ok(Val::html(cx.session("csrf_field")?.csrf_field()))
}

fn validate_csrf(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("validate_csrf", args);
    let token = args.opt_val().filter(|v| !v.is_null()).map(|v| v.display().into_owned());
    args.finish()?;
    Ok(Val::from(cx.session("validate_csrf")?.validate_csrf(token.as_deref())))
}

fn old(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("old", args);
    let key = args.string()?;
    let default = args.opt_val().unwrap_or_else(Val::null);
    args.finish()?;
    Ok(cx.session("old")?.old(&key).map(Val::Data).unwrap_or(default))
}

fn flash(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("flash", args);
    let key = args.string()?;
    let value = args.val()?;
    args.finish()?;
    cx.session("flash")?.flash(&key, value.into_data());
    Ok(Val::null())
}

fn flash_get(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("flash_get", args);
    let key = args.string()?;
    let default = args.opt_val().unwrap_or_else(Val::null);
    args.finish()?;
    let keep = cx.state.env.keep_flashes;
    let session = cx.session("flash_get")?;
    let value = if keep { session.flash_peek(&key) } else { session.flash_get(&key) };
    Ok(value.map(Val::Data).unwrap_or(default))
}
