//! Debugging helpers: value dumps, timers and log messages.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Instant;

use kstring::KString;
use serde_json::{Number, Value};

use crate::helpers::strings::e;
use crate::helpers::{Args, Helper, HelperCx};
use crate::note;
use crate::template::error::TemplateError;
use crate::template::value::Val;

const DD_PRE_STYLE: &str = "background-color: #333; color: #eee; padding: 20px; \
                            margin: 10px; border-radius: 8px; border: 1px solid #555; \
                            overflow-x: auto; font-family: monospace; font-size: 14px; \
                            line-height: 1.5;";

fn float_str(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

fn number_str(n: &Number) -> (&'static str, String) {
    if n.is_f64() {
        ("float", float_str(n.as_f64().unwrap_or(0.0)))
    } else {
        ("int", n.to_string())
    }
}

/// Typed dump of a value, one item per line, nesting indented by two
/// spaces.
pub fn var_dump(out: &mut String, v: &Value, indent: usize) {
    let pad = " ".repeat(indent);
    match v {
        Value::Null => out.push_str("NULL\n"),
        Value::Bool(b) => { let _ = writeln!(out, "bool({b})"); }
        Value::Number(n) => {
            let (kind, s) = number_str(n);
            let _ = writeln!(out, "{kind}({s})");
        }
        Value::String(s) => { let _ = writeln!(out, "string({}) \"{s}\"", s.len()); }
        Value::Array(items) => {
            let _ = writeln!(out, "array({}) {{", items.len());
            for (i, item) in items.iter().enumerate() {
                let _ = writeln!(out, "{pad}  [{i}]=>");
                out.push_str(&pad);
                out.push_str("  ");
                var_dump(out, item, indent + 2);
            }
            let _ = writeln!(out, "{pad}}}");
        }
        Value::Object(map) => {
            let _ = writeln!(out, "array({}) {{", map.len());
            for (k, item) in map {
                let _ = writeln!(out, "{pad}  [\"{k}\"]=>");
                out.push_str(&pad);
                out.push_str("  ");
                var_dump(out, item, indent + 2);
            }
            let _ = writeln!(out, "{pad}}}");
        }
    }
}

/// Human readable dump: scalars as their text, lists and maps as
/// `Array ( [key] => value ... )` blocks.
pub fn print_r(out: &mut String, v: &Value, indent: usize) {
    let entries: Vec<(String, &Value)> = match v {
        Value::Array(items) => items.iter().enumerate()
            .map(|(i, item)| (i.to_string(), item))
            .collect(),
        Value::Object(map) => map.iter().map(|(k, item)| (k.clone(), item)).collect(),
        Value::Number(n) => {
            out.push_str(&number_str(n).1);
            return
        }
        scalar => {
            out.push_str(&Val::Data(scalar.clone()).display());
            return
        }
    };
    let pad = " ".repeat(indent);
    let _ = write!(out, "Array\n{pad}(\n");
    for (k, item) in entries {
        let _ = write!(out, "{pad}    [{k}] => ");
        print_r(out, item, indent + 8);
        out.push('\n');
    }
    let _ = writeln!(out, "{pad})");
}

fn dump_block(vals: &[Val]) -> String {
    let mut dump = String::new();
    for v in vals {
        var_dump(&mut dump, &v.as_data(), 0);
    }
    format!("<pre>{}</pre>", e(&dump))
}

fn dd_block(vals: &[Val]) -> String {
    let mut dump = String::new();
    for v in vals {
        let data = v.as_data();
        match data.as_ref() {
            Value::Array(_) | Value::Object(_) => print_r(&mut dump, &data, 0),
            other => var_dump(&mut dump, other, 0),
        }
        dump.push('\n');
    }
    format!("<pre style='{DD_PRE_STYLE}'><strong style='color: #FFD700;'>DEBUG DUMP:</strong>\
             <br><br>{}</pre>", e(&dump))
}

// ------------------------------------------------------------------
// Template bindings

pub fn register(m: &mut HashMap<&'static str, Helper>) {
    m.insert("dump_var", helper_dump);
    m.insert("dump", helper_dump);
    m.insert("dd", helper_dd);
    m.insert("debug_log", helper_debug_log);
    m.insert("time_start", helper_time_start);
    m.insert("time_end", helper_time_end);
}

fn helper_dump(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    cx.write(&dump_block(&args));
    Ok(Val::null())
}

/// Stops rendering: the response becomes everything output so far
/// followed by the dump.
fn helper_dd(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut output = cx.state.output.collect_all();
    output.push_str(&dd_block(&args));
    Err(TemplateError::Halt(output))
}

fn helper_debug_log(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("debug_log", args);
    let message = args.string()?;
    args.finish()?;
    note!("DEBUG", "{message}");
    Ok(Val::null())
}

fn helper_time_start(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("time_start", args);
    let key = args.string()?;
    args.finish()?;
    cx.state.timers.insert(KString::from_string(key), Instant::now());
    Ok(Val::null())
}

/// With `echo` (the default) writes the elapsed time, otherwise
/// returns it in milliseconds.
fn helper_time_end(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("time_end", args);
    let key = args.string()?;
    let echo = args.opt_bool(true);
    args.finish()?;
    let elapsed_ms = match cx.state.timers.remove(key.as_str()) {
        Some(start) => start.elapsed().as_secs_f64() * 1000.0,
        None => {
            if echo {
                cx.write(&e(&format!("Timer '{key}' was not started.")));
                return Ok(Val::null())
            }
            return Ok(Val::Data(Value::from(0.0)))
        }
    };
    if echo {
        cx.write(&e(&format!("Time for '{key}': {elapsed_ms:.2} ms")));
        Ok(Val::null())
    } else {
        Ok(Val::Data(Value::from(elapsed_ms)))
    }
}
