//! URL and asset helpers.

use std::collections::HashMap;
use std::path::Path;

use crate::acontext::RequestInfo;
use crate::easy_fs::file_mtime_unix;
use crate::helpers::{Args, Helper, HelperCx};
use crate::http_response_status_codes::HttpResponseStatusCode;
use crate::template::error::TemplateError;
use crate::template::value::Val;

/// `path` under `base_url`, with exactly one slash between them.
pub fn url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Like `url`, plus `?v=<mtime>` if the file exists in `public_dir`.
pub fn asset(base_url: &str, public_dir: &Path, path: &str) -> String {
    let full = url(base_url, path);
    match file_mtime_unix(public_dir.join(path.trim_start_matches('/'))) {
        Some(mtime) => format!("{full}?v={mtime}"),
        None => full,
    }
}

pub fn is_current_url(request: &RequestInfo, base_url: &str, path: &str) -> bool {
    request.path().trim_end_matches('/') == url(base_url, path).trim_end_matches('/')
}

/// The 1-based `index`th non-empty segment of the request path.
pub fn segment(request: &RequestInfo, index: i64) -> Option<&str> {
    let index = usize::try_from(index).ok()?.checked_sub(1)?;
    request.path().split('/').filter(|s| !s.is_empty()).nth(index)
}

pub fn current_url(request: &RequestInfo) -> String {
    let scheme = if request.is_secure { "https" } else { "http" };
    format!("{scheme}://{}{}", request.host.as_deref().unwrap_or(""), request.uri)
}

// ------------------------------------------------------------------
// Template bindings

pub fn register(m: &mut HashMap<&'static str, Helper>) {
    m.insert("url", helper_url);
    m.insert("asset", helper_asset);
    m.insert("css", helper_css);
    m.insert("js", helper_js);
    m.insert("is_current_url", helper_is_current_url);
    m.insert("segment", helper_segment);
    m.insert("current_url", helper_current_url);
    m.insert("redirect", helper_redirect);
}

fn one_path(helper: &'static str, args: Vec<Val>) -> Result<String, TemplateError> {
    let mut args = Args::new(helper, args);
    let path = args.string()?;
    args.finish()?;
    Ok(path)
}

fn helper_url(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let path = one_path("url", args)?;
    Ok(Val::string(url(cx.renderer.base_url(), &path)))
}

fn asset_under(cx: &HelperCx, dir: &str, path: &str) -> Val {
    let path = format!("{dir}{}", path.trim_start_matches('/'));
    Val::string(asset(cx.renderer.base_url(), cx.renderer.public_dir(), &path))
}

fn helper_asset(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let path = one_path("asset", args)?;
    Ok(asset_under(cx, "", &path))
}

fn helper_css(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let path = one_path("css", args)?;
    Ok(asset_under(cx, "css/", &path))
}

fn helper_js(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let path = one_path("js", args)?;
    Ok(asset_under(cx, "js/", &path))
}

fn helper_is_current_url(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let path = one_path("is_current_url", args)?;
    Ok(Val::from(is_current_url(&cx.state.env.request, cx.renderer.base_url(), &path)))
}

fn helper_segment(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("segment", args);
    let index = args.int()?;
    args.finish()?;
    Ok(segment(&cx.state.env.request, index).map(Val::from).unwrap_or_else(Val::null))
}

fn helper_current_url(cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    Args::new("current_url", args).finish()?;
    Ok(Val::string(current_url(&cx.state.env.request)))
}

/// Stops rendering; the page is replaced by a redirect response.
fn helper_redirect(_cx: &mut HelperCx, args: Vec<Val>) -> Result<Val, TemplateError> {
    let mut args = Args::new("redirect", args);
    let location = args.string()?;
    let status = args.opt_int(302)?;
    args.finish()?;
    let status = u16::try_from(status).ok()
        .and_then(HttpResponseStatusCode::from_code)
        .filter(|s| s.is_redirect())
        .ok_or_else(|| TemplateError::args(
            "redirect", format!("{status} is not a redirect status")))?;
    Err(TemplateError::Redirect { location, status: status.code() })
}
