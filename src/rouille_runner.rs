use std::sync::{Arc, Mutex};

use rouille::session::session;
use rouille::{Server, Request, Response};

use crate::acontext::AContext;
use crate::apachelog::{log_combined, Logs};
use crate::handler::Handler;
use crate::http_response_status_codes::HttpResponseStatusCode;
use crate::session::{SessionStore, SESSION_COOKIE, SESSION_SECONDS};
use crate::webutils::errorpage_from_status;
use crate::warn;


/// Make a handler for Rouille's `Server`: the `handlers` are tried in
/// order, the first one returning a response wins; if none does, the
/// answer is 404.
pub fn server_handler(
    listen_addr: String,
    handlers: Vec<Arc<dyn Handler>>,
    sessions: Arc<SessionStore>,
    logs: Arc<Mutex<Logs>>,
) -> impl for<'r> Fn(&'r Request) -> Response
{
    move |request: &Request| -> Response {
        session(request, SESSION_COOKIE, SESSION_SECONDS, |session| {
            let context = match AContext::new(request, &listen_addr, session, &sessions) {
                Ok(context) => context,
                Err(e) => {
                    warn!("{e}");
                    return errorpage_from_status(HttpResponseStatusCode::NotImplemented501)
                }
            };
            log_combined(&context, &logs, || -> anyhow::Result<Response> {
                let method = match context.method().to_simple() {
                    Some(method) => method,
                    None => {
                        warn!("method {:?} not implemented", context.method_str());
                        return Ok(errorpage_from_status(
                            HttpResponseStatusCode::NotImplemented501))
                    }
                };
                for handler in &handlers {
                    if let Some(response) = handler.call(&context, method)? {
                        return Ok(response)
                    }
                }
                Ok(errorpage_from_status(HttpResponseStatusCode::NotFound404))
            })
        })
    }
}

/// Serve on `addr` until the process ends.
pub fn run_server(
    addr: String,
    handlers: Vec<Arc<dyn Handler>>,
    sessions: Arc<SessionStore>,
    logs: Arc<Mutex<Logs>>,
) -> anyhow::Result<()> {
    let handler = server_handler(addr.clone(), handlers, sessions, logs);
    let server = Server::new(addr.clone(), handler).map_err(
        |e| anyhow::anyhow!("can't listen on {addr:?}: {e}"))?;
    server.run();
    Ok(())
}
