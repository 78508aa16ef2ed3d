//! String formatting helpers.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::helpers::{Args, Helper, HelperCx};
use crate::random_util::random_hex;
use crate::template::error::TemplateError;
use crate::template::value::Val;

/// HTML escape, including both quote characters.
pub fn e(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn separate_before_uppercase(s: &str, sep: char) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            out.push(sep);
        }
        out.push(c);
    }
    out.to_lowercase()
}

/// `fooBar` → `foo_bar`
pub fn str_snake(s: &str) -> String {
    separate_before_uppercase(s, '_')
}

/// `fooBar` → `foo-bar`
pub fn str_kebab(s: &str) -> String {
    separate_before_uppercase(s, '-')
}

/// `foo_bar-baz` → `FooBarBaz`
pub fn str_studly(s: &str) -> String {
    str_title(&s.replace(['-', '_'], " ")).replace(' ', "")
}

lazy_static! {
    static ref SLUG_INVALID: Regex = Regex::new(r"[^a-zA-Z0-9/_|+ -]").unwrap();
    static ref SLUG_SEPARATORS: Regex = Regex::new(r"[/_|+ -]+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref TAG: Regex = Regex::new(r"(?s)<!--.*?-->|<[^>]*>").unwrap();
    static ref LINE_BREAK: Regex = Regex::new(r"\r\n|\n\r|\n|\r").unwrap();
}

fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'å' | 'ā' | 'ą' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Å' | 'Ā' | 'Ą' => "A",
        'ä' | 'æ' => "ae",
        'Ä' | 'Æ' => "AE",
        'ç' | 'ć' | 'č' => "c",
        'Ç' | 'Ć' | 'Č' => "C",
        'ď' | 'đ' => "d",
        'Ď' | 'Đ' => "D",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ę' | 'Ě' => "E",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' => "I",
        'ł' => "l",
        'Ł' => "L",
        'ñ' | 'ń' | 'ň' => "n",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ò' | 'ó' | 'ô' | 'õ' | 'ø' | 'ō' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ø' | 'Ō' => "O",
        'ö' | 'œ' => "oe",
        'Ö' | 'Œ' => "OE",
        'ř' => "r",
        'Ř' => "R",
        'ś' | 'š' | 'ş' => "s",
        'Ś' | 'Š' | 'Ş' => "S",
        'ß' => "ss",
        'ť' | 'ţ' => "t",
        'Ť' | 'Ţ' => "T",
        'ù' | 'ú' | 'û' | 'ů' | 'ū' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ů' | 'Ū' => "U",
        'ü' => "ue",
        'Ü' => "UE",
        'ý' | 'ÿ' => "y",
        'Ý' | 'Ÿ' => "Y",
        'ź' | 'ż' | 'ž' => "z",
        'Ź' | 'Ż' | 'Ž' => "Z",
        _ => return None,
    })
}

/// URL friendly lowercase ASCII, words separated by `-`.
pub fn str_slug(s: &str) -> String {
    let mut ascii = String::with_capacity(s.len());
    for c in s.chars() {
        match transliterate(c) {
            Some(t) => ascii.push_str(t),
            None => ascii.push(c),
        }
    }
    let cleaned = SLUG_INVALID.replace_all(&ascii, "").to_lowercase();
    SLUG_SEPARATORS.replace_all(&cleaned, "-").trim_matches('-').to_string()
}

/// Random lowercase hex string; odd lengths are rounded down.
pub fn str_random(length: usize) -> String {
    random_hex(length / 2)
}

/// Cut to `limit` characters, appending `end` if anything was cut.
pub fn str_limit(s: &str, limit: usize, end: &str) -> String {
    if s.chars().count() <= limit {
        return s.to_string()
    }
    let mut out: String = s.chars().take(limit).collect();
    out.push_str(end);
    out
}

fn map_first_char(s: &str, f: impl FnOnce(char) -> String) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => {
            let mut out = f(c);
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

pub fn str_ucfirst(s: &str) -> String {
    map_first_char(s, |c| c.to_uppercase().collect())
}

pub fn str_lcfirst(s: &str) -> String {
    map_first_char(s, |c| c.to_lowercase().collect())
}

/// Uppercase the first letter of every whitespace separated word.
pub fn str_title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

pub fn str_no_space(s: &str) -> String {
    WHITESPACE.replace_all(s, "").into_owned()
}

fn padding(s: &str, length: usize, pad: &str) -> String {
    let have = s.chars().count();
    if length <= have || pad.is_empty() {
        return String::new()
    }
    pad.chars().cycle().take(length - have).collect()
}

pub fn str_pad_left(s: &str, length: usize, pad: &str) -> String {
    let mut out = padding(s, length, pad);
    out.push_str(s);
    out
}

pub fn str_pad_right(s: &str, length: usize, pad: &str) -> String {
    let mut out = s.to_string();
    out.push_str(&padding(s, length, pad));
    out
}

pub fn str_replace_first(search: &str, replace: &str, subject: &str) -> String {
    if search.is_empty() {
        return subject.to_string()
    }
    subject.replacen(search, replace, 1)
}

pub fn str_replace_last(search: &str, replace: &str, subject: &str) -> String {
    if search.is_empty() {
        return subject.to_string()
    }
    match subject.rfind(search) {
        Some(pos) => {
            let mut out = String::with_capacity(subject.len() + replace.len());
            out.push_str(&subject[..pos]);
            out.push_str(replace);
            out.push_str(&subject[pos + search.len()..]);
            out
        }
        None => subject.to_string(),
    }
}

pub fn str_strip_quotes(s: &str) -> String {
    s.replace(['"', '\''], "")
}

/// Backslash-escape quotes, backslashes and NUL, wrapped in double
/// quotes.
pub fn str_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' | '\'' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Insert `<br />` before every line break (which is kept).
pub fn str_nl2br(s: &str) -> String {
    LINE_BREAK.replace_all(s, "<br />$0").into_owned()
}

pub fn str_strip_tags(s: &str) -> String {
    TAG.replace_all(s, "").into_owned()
}

/// The first `words` whitespace separated words, plus `end` if there
/// were more.
pub fn str_words(s: &str, words: usize, end: &str) -> String {
    let parts: Vec<&str> = WHITESPACE.split(s).collect();
    if parts.len() <= words {
        return s.to_string()
    }
    let mut out = parts[..words].join(" ");
    out.push_str(end);
    out
}

pub fn str_reverse(s: &str) -> String {
    s.chars().rev().collect()
}

pub fn str_upper(s: &str) -> String {
    s.to_uppercase()
}

pub fn str_lower(s: &str) -> String {
    s.to_lowercase()
}

// ------------------------------------------------------------------
// Template bindings

fn non_negative(helper: &'static str, n: i64) -> Result<usize, TemplateError> {
    usize::try_from(n).map_err(
        |_| TemplateError::args(helper, format!("expecting a non-negative number, got {n}")))
}

/// Upper limit for the size of strings helpers generate.
pub const MAX_GENERATED_LEN: usize = 1 << 20;

/// `len` if it's within `MAX_GENERATED_LEN`; None means overflow.
fn bounded(helper: &'static str, len: Option<usize>) -> Result<usize, TemplateError> {
    match len {
        Some(len) if len <= MAX_GENERATED_LEN => Ok(len),
        _ => Err(TemplateError::args(
            helper, format!("result would exceed {MAX_GENERATED_LEN} bytes"))),
    }
}

/// Helpers taking one string and returning one.
macro_rules! register_unary {
    ($m:expr, $($name:ident),*) => {
        $(
            $m.insert(stringify!($name), |_cx, args| {
                let mut args = Args::new(stringify!($name), args);
                let s = args.string()?;
                args.finish()?;
                Ok(Val::string($name(&s)))
            });
        )*
    }
}

pub fn register(m: &mut HashMap<&'static str, Helper>) {
    register_unary!(m, str_snake, str_kebab, str_studly, str_slug, str_ucfirst,
                    str_lcfirst, str_title, str_no_space, str_strip_quotes,
                    str_quote, str_strip_tags, str_reverse, str_upper, str_lower);
    m.insert("e", helper_e);
    m.insert("str_nl2br", helper_nl2br);
    m.insert("str_random", helper_random);
    m.insert("str_limit", helper_limit);
    m.insert("str_words", helper_words);
    m.insert("str_repeat_str", helper_repeat);
    m.insert("str_pad_left", helper_pad_left);
    m.insert("str_pad_right", helper_pad_right);
    m.insert("str_replace_first", helper_replace_first);
    m.insert("str_replace_last", helper_replace_last);
}

fn helper_e(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("e", args);
    let v = args.opt_val().unwrap_or_else(Val::null);
    args.finish()?;
    Ok(Val::html(e(&v.display())))
}

/// Plain text is escaped first; markup is taken as is.
fn helper_nl2br(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("str_nl2br", args);
    let v = args.val()?;
    args.finish()?;
    Ok(Val::html(str_nl2br(&v.escaped())))
}

fn helper_random(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("str_random", args);
    let length = non_negative("str_random", args.opt_int(16)?)?;
    args.finish()?;
    let length = bounded("str_random", Some(length))?;
    Ok(Val::string(str_random(length)))
}

fn helper_limit(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("str_limit", args);
    let s = args.string()?;
    let limit = non_negative("str_limit", args.opt_int(100)?)?;
    let end = args.opt_string("...")?;
    args.finish()?;
    Ok(Val::string(str_limit(&s, limit, &end)))
}

fn helper_words(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("str_words", args);
    let s = args.string()?;
    let words = non_negative("str_words", args.opt_int(10)?)?;
    let end = args.opt_string("...")?;
    args.finish()?;
    Ok(Val::string(str_words(&s, words, &end)))
}

fn helper_repeat(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("str_repeat_str", args);
    let s = args.string()?;
    let times = non_negative("str_repeat_str", args.int()?)?;
    args.finish()?;
    bounded("str_repeat_str", s.len().checked_mul(times))?;
    Ok(Val::string(s.repeat(times)))
}

fn pad_args(helper: &'static str, args: Vec<Val>) -> Result<(String, usize, String), TemplateError> {
    let mut args = Args::new(helper, args);
    let s = args.string()?;
    let length = usize::try_from(args.int()?.max(0)).ok();
    let pad = args.opt_string(" ")?;
    args.finish()?;
    // in characters, up to 4 bytes each
    let length = bounded(helper, length.and_then(|l| l.checked_mul(4)))? / 4;
    Ok((s, length, pad))
}

fn helper_pad_left(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let (s, length, pad) = pad_args("str_pad_left", args)?;
    Ok(Val::string(str_pad_left(&s, length, &pad)))
}

fn helper_pad_right(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let (s, length, pad) = pad_args("str_pad_right", args)?;
    Ok(Val::string(str_pad_right(&s, length, &pad)))
}

fn replace_args(helper: &'static str, args: Vec<Val>) -> Result<[String; 3], TemplateError> {
    let mut args = Args::new(helper, args);
    let search = args.string()?;
    let replace = args.string()?;
    let subject = args.string()?;
    args.finish()?;
    Ok([search, replace, subject])
}

fn helper_replace_first(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let [search, replace, subject] = replace_args("str_replace_first", args)?;
    Ok(Val::string(str_replace_first(&search, &replace, &subject)))
}

fn helper_replace_last(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let [search, replace, subject] = replace_args("str_replace_last", args)?;
    Ok(Val::string(str_replace_last(&search, &replace, &subject)))
}
