use std::{net::{SocketAddr, IpAddr}, io::Write, time::SystemTime, sync::Arc};

use anyhow::Result;
use rouille::{Request, HeadersIter, session::Session};

use crate::http_request_method::HttpRequestMethod;
use crate::session::{SessionHandle, SessionStore};


/// The request facts templates get to see, detached from the rouille
/// request so that renders don't borrow it.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Path plus query string, as requested.
    pub uri: String,
    pub host: Option<String>,
    pub is_secure: bool,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self::for_uri("/")
    }
}

impl RequestInfo {
    pub fn for_uri(uri: impl Into<String>) -> Self {
        RequestInfo {
            uri: uri.into(),
            host: None,
            is_secure: false,
        }
    }

    /// The path part of `uri` (query string stripped).
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or("")
    }
}


pub struct AContext<'r, 's> {
    // Fallback for host(): what this server listens on; ip:port or
    // domain:port or whatever is deemed suitable
    listen_addr: &'r str,
    now: SystemTime,
    method: HttpRequestMethod,
    request: &'r Request,
    session: &'r Session<'s>,
    sessions: &'r Arc<SessionStore>,
}

impl<'r, 's> AContext<'r, 's> {
    pub fn new(
        request: &'r Request, listen_addr: &'r str, session: &'r Session<'s>,
        sessions: &'r Arc<SessionStore>,
    ) -> Result<Self>
    {
        let method = HttpRequestMethod::from_str(request.method())?;
        Ok(AContext {
            listen_addr,
            now: SystemTime::now(),
            method,
            request,
            session,
            sessions,
        })
    }

    /// Like the request part in Apache style Combined Log Format
    pub fn request_line(&self) -> String {
        // `Request` does not appear to maintain the original request
        // line string, thus have to reconstruct it.
        format!("{} {}",
                self.request.method(),
                self.request.raw_url())
    }
    /// `foo` part in `?foo`
    pub fn query_string(&self) -> &str {
        self.request.raw_query_string()
    }
    pub fn user_agent(&self) -> Option<&str> {
        self.request.header("user-agent")
    }
    pub fn client_ip(&self) -> IpAddr {
        self.request.remote_addr().ip()
    }
    pub fn is_secure(&self) -> bool {
        self.request.is_secure()
    }
    pub fn method_str(&self) -> &str { self.request.method() }
    pub fn method(&self) -> HttpRequestMethod { self.method }
    pub fn host(&self) -> Option<&str> { self.request.header("host") }
    pub fn host_or_listen_addr(&self) -> &str {
        self.request.header("host").unwrap_or(self.listen_addr)
    }
    pub fn client_addr(&self) -> &SocketAddr { self.request.remote_addr() }
    /// Path without query string, percent-decoded.
    pub fn path(&self) -> String { self.request.url() }
    pub fn now(&self) -> &SystemTime { &self.now }
    pub fn referer(&self) -> Option<&str> {
        self.header("referer")
    }

    pub fn header(&self, key: &str) -> Option<&str> { self.request.header(key) }
    pub fn headers(&self) -> HeadersIter { self.request.headers() }

    pub fn request(&self) -> &Request { self.request }
    pub fn session_id(&self) -> &str { self.session.id() }

    pub fn session(&self) -> SessionHandle {
        self.sessions.handle(self.session_id())
    }

    pub fn request_info(&self) -> RequestInfo {
        RequestInfo {
            uri: self.request.raw_url().to_string(),
            host: Some(self.host_or_listen_addr().to_string()),
            is_secure: self.is_secure(),
        }
    }

    pub fn writeln(&self, outp: &mut impl Write) -> Result<()> {
        writeln!(outp, "{:?}: {:?} {:?} / {:?} ({:?})",
                 self.client_addr(), self.method_str(), self.host(),
                 self.path(), self.headers())?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use blake3::Hasher;
    use rouille::session::session;
    use rouille::Response;

    #[test]
    fn t_request_info() {
        let info = RequestInfo::for_uri("/about?x=1");
        assert_eq!(info.path(), "/about");
        assert_eq!(RequestInfo::default().path(), "/");
    }

    #[test]
    fn t_context_from_request() {
        let sessions = SessionStore::new(Hasher::new(), Duration::from_secs(60));
        let request = Request::fake_http(
            "GET", "/contact?a=b", vec![("Host".into(), "example.org".into())], vec![]);
        let _ = session(&request, "sid", 60, |session| {
            let context = AContext::new(&request, "127.0.0.1:3000", session, &sessions)
                .expect("GET is a known method");
            assert_eq!(context.request_line(), "GET /contact?a=b");
            assert_eq!(context.path(), "/contact");
            assert_eq!(context.query_string(), "a=b");
            let info = context.request_info();
            assert_eq!(info.uri, "/contact?a=b");
            assert_eq!(info.host.as_deref(), Some("example.org"));
            assert!(!info.is_secure);
            context.session().flash("k", "v".into());
            assert_eq!(context.session().flash_get("k"), Some("v".into()));
            Response::text("")
        });
        assert_eq!(sessions.len(), 1);
    }
}
