use std::fs::File;
use std::io::ErrorKind;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use std::{fmt::Debug, path::PathBuf, borrow::Cow};

use anyhow::{Result, Context, anyhow};
use httpdate::{fmt_http_date, parse_http_date};
use rouille::{Response, extension_to_mime, ResponseBody};

use crate::acontext::AContext;
use crate::http_request_method::HttpRequestMethodSimple;
use crate::http_response_status_codes::HttpResponseStatusCode;
use crate::{nowarn, warn};

// Can't just check `mtime > modsince` since mtime has a nsec value
// where modsince has 0 there. Only say "newer" when it's at least a
// second newer.
fn file_is_newer_than_snapshot_time(mtime: SystemTime, modsince: SystemTime) -> bool {
    match mtime.duration_since(modsince) {
        // older than the snapshot, e.g. restored from backup
        Err(_e) => false,
        Ok(secsnewer) => secsnewer >= Duration::from_secs(1),
    }
}

macro_rules! cow {
    ($a:expr, $b:expr) => {
        (Cow::from($a), Cow::from($b))
    }
}


/// Path segments with `.` and empty segments removed; None if there
/// are `..` segments, which are never served.
fn canonicalize_path<'s>(path: &'s str) -> Option<Vec<&'s str>> {
    let mut out = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." | "" => (),
            ".." => return None,
            _ => out.push(segment)
        }
    }
    Some(out)
}


pub trait Handler: Debug + Send + Sync {
    /// Returning Ok(None) means, the handler is refusing to handle
    /// the request. It is to be handled as 404 not found by the
    /// caller, unless there's another handler picking up the
    /// request. Err means, the handler has accepted to handle the
    /// request but failed to; this is answered with an internal
    /// server error.
    fn call(
        &self,
        context: &AContext,
        method: HttpRequestMethodSimple)
        -> Result<Option<Response>>;
}

// ------------------------------------------------------------------
/// Serve files from the local file system
#[derive(Debug)]
pub struct FileHandler {
    /// Path to base directory in local file system from which to
    /// serve the files.
    basepath: PathBuf,
}

impl FileHandler {
    pub fn new(basepath: impl Into<PathBuf>) -> FileHandler {
        FileHandler {
            basepath: basepath.into()
        }
    }
}

impl Handler for FileHandler {
    /// Returns None if the file does not exist, or for POST requests
    /// (which are for the application).
    fn call(
        &self,
        context: &AContext,
        method: HttpRequestMethodSimple)
        -> Result<Option<Response>>
    {
        if method.is_post() {
            return Ok(None)
        }
        let path = context.path();
        let canonpath = match canonicalize_path(&path) {
            Some(p) => p,
            None => {
                warn!("refusing path with '..' segments: {path:?}");
                return Ok(None)
            }
        };
        if canonpath.is_empty() {
            return Ok(None) // a directory, not a file
        }
        let full_path: PathBuf = self.basepath.join(canonpath.join("/"));

        let metadata =
            match full_path.metadata() {
                Ok(m) => m,
                Err(e) =>
                    match e.kind() {
                        ErrorKind::NotFound => return Ok(None),
                        _ => return Err(e).with_context(
                            || anyhow!("can't stat file: {:?}", full_path))
                    }
            };
        if !metadata.is_file() {
            nowarn!("not a file: {full_path:?}");
            return Ok(None)
        }

        let mimetype = full_path.extension()
            .and_then(|ext| ext.to_str())
            .map(extension_to_mime)
            .unwrap_or("text/plain");
        let fh = match File::open(&full_path) {
            Ok(fh) => fh,
            Err(e) =>
                match e.kind() {
                    ErrorKind::NotFound => return Ok(None),
                    _ => return Err(e).with_context(
                        || anyhow!("can't open file for reading: {:?}", full_path))
                },
        };
        let mtime: SystemTime = metadata.modified()?;
        // Allow caching for a tenth of the file's age.
        let max_age = mtime.elapsed().unwrap_or_default().as_secs() / 10;
        let expires = SystemTime::now().checked_add(Duration::from_secs(max_age))
            .ok_or_else(|| anyhow!("time overflow??"))?;
        let mtime_seconds = mtime.duration_since(UNIX_EPOCH)?.as_secs();
        let etag_quoted = format!("{:?}", mtime_seconds.to_string());

        let headers = vec![
            cow!("Content-type", mimetype),
            cow!("Last-Modified", fmt_http_date(mtime)),
            cow!("Cache-Control", format!("max-age={max_age}")),
            cow!("Expires", fmt_http_date(expires)),
            cow!("ETag", etag_quoted.clone()),
        ];
        let not_modified =
            if let Some(modsince_str) = context.header("If-Modified-Since") {
                let modsince = parse_http_date(modsince_str).with_context(
                    || anyhow!("parsing If-Modified-Since {:?}", modsince_str))?;
                !file_is_newer_than_snapshot_time(mtime, modsince)
            } else if let Some(nonematch_str) = context.header("If-None-Match") {
                nonematch_str == etag_quoted
            } else {
                false
            };
        let (status, data) =
            if not_modified {
                (HttpResponseStatusCode::NotModified304, ResponseBody::empty())
            } else if method == HttpRequestMethodSimple::HEAD {
                (HttpResponseStatusCode::OK200, ResponseBody::empty())
            } else {
                (HttpResponseStatusCode::OK200,
                 ResponseBody::from_reader_and_size(fh, metadata.len() as usize))
            };
        Ok(Some(Response {
            status_code: status.code(),
            headers,
            data,
            upgrade: None,
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use blake3::Hasher;
    use rouille::{Request, session::session};
    use crate::session::SessionStore;

    #[test]
    fn t_canonicalize_path() {
        assert_eq!(canonicalize_path(""), Some(vec![]));
        assert_eq!(canonicalize_path("/a/b"), Some(vec!["a", "b"]));
        assert_eq!(canonicalize_path("/./a/./b/."), Some(vec!["a", "b"]));
        assert_eq!(canonicalize_path("//foo//a/"), Some(vec!["foo", "a"]));
        assert_eq!(canonicalize_path("/a/../b"), None);
        assert_eq!(canonicalize_path("/../etc/passwd"), None);
    }

    fn call(
        handler: &FileHandler,
        method: &str,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Option<Response>> {
        let sessions = SessionStore::new(Hasher::new(), Duration::from_secs(60));
        let request = Request::fake_http(method, url, headers, vec![]);
        let mut result = None;
        let _ = session(&request, "sid", 60, |session| {
            let context = AContext::new(&request, "localhost", session, &sessions)
                .expect("known method");
            let simple = context.method().to_simple().expect("simple method");
            result = Some(handler.call(&context, simple));
            Response::text("")
        });
        result.expect("session closure ran")
    }

    #[test]
    fn t_file_handler() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("css"))?;
        std::fs::write(dir.path().join("css/style.css"), "body { color: red }")?;
        let handler = FileHandler::new(dir.path());

        let response = call(&handler, "GET", "/css/style.css", vec![])?
            .expect("file exists");
        assert_eq!(response.status_code, 200);
        assert!(response.headers.iter().any(
            |(k, v)| k == "Content-type" && v.starts_with("text/css")));
        let etag = response.headers.iter().find(|(k, _)| k == "ETag")
            .map(|(_, v)| v.to_string()).expect("has etag");

        let response = call(&handler, "GET", "/css/style.css",
                            vec![("If-None-Match".into(), etag)])?
            .expect("file exists");
        assert_eq!(response.status_code, 304);

        assert!(call(&handler, "GET", "/css/missing.css", vec![])?.is_none());
        assert!(call(&handler, "GET", "/css", vec![])?.is_none());
        assert!(call(&handler, "GET", "/", vec![])?.is_none());
        assert!(call(&handler, "POST", "/css/style.css", vec![])?.is_none());
        Ok(())
    }
}
