//! The single entry point for pages: maps the request path to a
//! content template plus its data, renders it and turns render
//! failures into error responses.

use anyhow::Result;
use rouille::input::post::raw_urlencoded_post_input;
use rouille::{Response, ResponseBody};
use serde_json::{json, Map, Value};

use crate::acontext::AContext;
use crate::handler::Handler;
use crate::helpers::strings::e;
use crate::helpers::urls::url;
use crate::http_request_method::HttpRequestMethodSimple;
use crate::http_response_status_codes::HttpResponseStatusCode;
use crate::template::{RenderEnv, Renderer};
use crate::webutils::{errorpage_from_status, htmlresponse, redirect};
use crate::{note, warn};

/// A routed request: which template to render with what, and the
/// status to answer with.
#[derive(Debug)]
pub struct Page {
    pub status: HttpResponseStatusCode,
    pub template: &'static str,
    pub data: Map<String, Value>,
}

/// Variables every page gets.
pub fn base_data(app_name: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("appName".into(), json!(app_name));
    data.insert("username".into(), json!("GlobalUser"));
    data.insert("pageTitle".into(), json!("Default Page"));
    data
}

/// `route` is the request path without query string and without
/// surrounding slashes.
pub fn route_page(route: &str, app_name: &str) -> Page {
    let mut data = base_data(app_name);
    let mut set = |key: &str, value: Value| {
        data.insert(key.into(), value);
    };
    let (status, template) = match route {
        "" => {
            set("pageTitle", json!("Welcome Home"));
            set("welcomeMessage",
                json!("Hello from your dynamic home page using global helpers!"));
            set("items", json!(["Car", "Bicycle", "Motorcycle", "Train", "Airplane"]));
            (HttpResponseStatusCode::OK200, "home")
        }
        "about" => {
            set("pageTitle", json!("About Us"));
            set("aboutText",
                json!("We are a dedicated team demonstrating simple server-side \
                       templating with global helper functions."));
            (HttpResponseStatusCode::OK200, "about")
        }
        "contact" => {
            set("pageTitle", json!("Contact Us"));
            set("contactInfo", json!("Email: support@masoud4.com | Phone: +1 (555) 123-4567"));
            (HttpResponseStatusCode::OK200, "contact")
        }
        "debug-test" => {
            set("pageTitle", json!("Debug Test"));
            set("testVar", json!({
                "name": "John Doe",
                "age": 30,
                "email": "john@example.com",
            }));
            (HttpResponseStatusCode::OK200, "debug_test")
        }
        _ => {
            set("pageTitle", json!("Page Not Found"));
            set("errorMessage",
                json!("The page you are looking for does not exist on this server."));
            (HttpResponseStatusCode::NotFound404, "404")
        }
    };
    Page { status, template, data }
}

#[derive(Debug)]
pub struct FrontController {
    renderer: Renderer,
    app_name: String,
}

impl FrontController {
    pub fn new(renderer: Renderer, app_name: impl Into<String>) -> Self {
        FrontController {
            renderer,
            app_name: app_name.into(),
        }
    }

    pub fn renderer(&self) -> &Renderer { &self.renderer }

    /// Render `page`. Never fails: render errors become a 500 page,
    /// a `dd()` halt becomes the page, a `redirect()` a redirect.
    pub fn render(&self, page: Page, env: RenderEnv) -> Response {
        let Page { status, template, data } = page;
        match self.renderer.render_template(template, data, env) {
            Ok(html) => htmlresponse(status.code(), html),
            Err(err) => {
                if let Some(dump) = err.halted() {
                    return htmlresponse(status.code(), dump.to_string())
                }
                if let Some((location, code)) = err.redirected() {
                    let code = HttpResponseStatusCode::from_code(code)
                        .unwrap_or(HttpResponseStatusCode::Found302);
                    return redirect(location, code)
                }
                warn!("Templating Error: {err}");
                htmlresponse(
                    HttpResponseStatusCode::InternalServerError500.code(),
                    format!("<h1>Application Error</h1><p>Something went wrong: {}</p>",
                            e(&err.to_string())))
            }
        }
    }

    /// Handle a post of the contact form: the outcome is flashed into
    /// the session and the browser sent back to the form.
    fn submit_contact(&self, context: &AContext) -> Result<Response> {
        let input = match raw_urlencoded_post_input(context.request()) {
            Ok(input) => input,
            Err(err) => {
                warn!("invalid contact form post: {err}");
                return Ok(errorpage_from_status(HttpResponseStatusCode::BadRequest400))
            }
        };
        let mut token = None;
        let mut fields = Map::new();
        for (key, value) in input {
            if key == "_token" {
                token = Some(value);
            } else {
                fields.insert(key, Value::String(value));
            }
        }
        let field = |key: &str| -> String {
            fields.get(key).and_then(Value::as_str).unwrap_or("").trim().to_string()
        };
        let name = field("name");
        let message = field("message");

        let session = context.session();
        if !session.validate_csrf(token.as_deref()) {
            session.flash("error", json!("Your form has expired, please try again."));
            session.remember_old_input(fields);
        } else if name.is_empty() || message.is_empty() {
            session.flash("error", json!("Please fill in your name and a message."));
            session.remember_old_input(fields);
        } else {
            note!("CONTACT", "message from {name:?}, {} characters",
                  message.chars().count());
            session.flash("success", json!(format!(
                "Thank you, {name}, we will get back to you.")));
            session.remember_old_input(Map::new());
        }
        Ok(redirect(&url(self.renderer.base_url(), "contact"),
                    HttpResponseStatusCode::SeeOther303))
    }
}

impl Handler for FrontController {
    fn call(
        &self,
        context: &AContext,
        method: HttpRequestMethodSimple)
        -> Result<Option<Response>>
    {
        let path = context.path();
        let route = path.trim_matches('/');
        if method.is_post() {
            if route == "contact" {
                return Ok(Some(self.submit_contact(context)?))
            }
            return Ok(Some(errorpage_from_status(
                HttpResponseStatusCode::MethodNotAllowed405)))
        }
        let env = RenderEnv {
            request: context.request_info(),
            session: Some(context.session()),
            keep_flashes: method == HttpRequestMethodSimple::HEAD,
        };
        let mut response = self.render(route_page(route, &self.app_name), env);
        if method == HttpRequestMethodSimple::HEAD {
            response.data = ResponseBody::empty();
        }
        Ok(Some(response))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use blake3::Hasher;
    use rouille::{Request, session::session};
    use crate::config::DEFAULT_APP_NAME;
    use crate::session::SessionStore;

    fn shipped() -> FrontController {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        FrontController::new(
            Renderer::new(dir.join("templates"), dir.join("public"), "/"),
            DEFAULT_APP_NAME)
    }

    fn body(response: Response) -> String {
        let (mut reader, _) = response.data.into_reader_and_size();
        let mut s = String::new();
        reader.read_to_string(&mut s).unwrap();
        s
    }

    fn header<'r>(response: &'r Response, key: &str) -> Option<&'r str> {
        response.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_ref())
    }

    /// Run a request through `fc` within the session `sid`.
    fn call(
        fc: &FrontController,
        sessions: &Arc<SessionStore>,
        method: &str,
        url: &str,
        form: Option<&str>,
    ) -> Response {
        let mut headers = vec![("Cookie".to_string(), "sid=test-session".to_string())];
        if form.is_some() {
            headers.push(("Content-Type".into(), "application/x-www-form-urlencoded".into()));
        }
        let request = Request::fake_http(
            method, url, headers, form.unwrap_or("").as_bytes().to_vec());
        let mut result = None;
        let _ = session(&request, "sid", 60, |session| {
            let context = AContext::new(&request, "localhost", session, sessions).unwrap();
            let simple = context.method().to_simple().unwrap();
            result = Some(fc.call(&context, simple));
            Response::text("")
        });
        result.unwrap().unwrap().unwrap()
    }

    fn sessions() -> Arc<SessionStore> {
        SessionStore::new(Hasher::new(), Duration::from_secs(60))
    }

    #[test]
    fn t_routes() {
        let page = route_page("", "X");
        assert_eq!((page.status, page.template), (HttpResponseStatusCode::OK200, "home"));
        assert_eq!(page.data["pageTitle"], "Welcome Home");
        assert_eq!(page.data["items"][4], "Airplane");
        assert_eq!(page.data["appName"], "X");
        assert_eq!(route_page("about", "X").template, "about");
        assert_eq!(route_page("contact", "X").data["pageTitle"], "Contact Us");
        assert_eq!(route_page("debug-test", "X").data["testVar"]["age"], 30);
        let page = route_page("nope/deeper", "X");
        assert_eq!((page.status, page.template),
                   (HttpResponseStatusCode::NotFound404, "404"));
        assert_eq!(page.data["username"], "GlobalUser");
    }

    #[test]
    fn t_known_pages() {
        let fc = shipped();
        let sessions = sessions();
        for (url, title) in [("/", "Welcome Home"), ("/about", "About Us"),
                             ("/about/", "About Us"), ("/contact?x=1", "Contact Us")] {
            let response = call(&fc, &sessions, "GET", url, None);
            assert_eq!(response.status_code, 200, "{url}");
            let html = body(response);
            assert!(html.contains(&format!("<title>{title} | ")), "{url}: {html}");
            assert!(html.contains("Global Helpers App"), "{url}");
        }
        let html = body(call(&fc, &sessions, "GET", "/", None));
        assert!(html.contains("<li class=\"first\">Car</li>"), "{html}");
        assert!(html.contains("<li>Airplane</li>"), "{html}");
    }

    #[test]
    fn t_unknown_page() {
        let response = call(&shipped(), &sessions(), "GET", "/no/such/page", None);
        assert_eq!(response.status_code, 404);
        let html = body(response);
        assert!(html.contains("<title>Page Not Found | "));
        assert!(html.contains("does not exist on this server"));
    }

    #[test]
    fn t_head_has_no_body() {
        let response = call(&shipped(), &sessions(), "HEAD", "/about", None);
        assert_eq!(response.status_code, 200);
        assert_eq!(body(response), "");
    }

    #[test]
    fn t_head_keeps_flashes() {
        let fc = shipped();
        let sessions = sessions();
        sessions.handle("test-session").flash("success", json!("Saved it"));
        let response = call(&fc, &sessions, "HEAD", "/contact", None);
        assert_eq!(response.status_code, 200);
        let html = body(call(&fc, &sessions, "GET", "/contact", None));
        assert!(html.contains("Saved it"), "{html}");
        let html = body(call(&fc, &sessions, "GET", "/contact", None));
        assert!(!html.contains("Saved it"));
    }

    #[test]
    fn t_debug_halt() {
        let response = call(&shipped(), &sessions(), "GET", "/debug-test", None);
        assert_eq!(response.status_code, 200);
        let html = body(response);
        assert!(html.contains("DEBUG DUMP:"), "{html}");
        assert!(html.contains("[name] =&gt; John Doe"), "{html}");
        assert!(!html.contains("never shown"));
        // the layout is not rendered after a halt
        assert!(!html.contains("<footer>"));
    }

    #[test]
    fn t_contact_form() {
        let fc = shipped();
        let sessions = sessions();
        let token = sessions.handle("test-session").csrf_token();

        let html = body(call(&fc, &sessions, "GET", "/contact", None));
        assert!(html.contains(&format!("name=\"_token\" value=\"{token}\"")), "{html}");

        let response = call(&fc, &sessions, "POST", "/contact",
                            Some("_token=wrong&name=Ann&message=Hi"));
        assert_eq!(response.status_code, 303);
        assert_eq!(header(&response, "Location"), Some("/contact"));
        let html = body(call(&fc, &sessions, "GET", "/contact", None));
        assert!(html.contains("Your form has expired"), "{html}");
        assert!(html.contains("value=\"Ann\""), "{html}");
        // flashes are one-shot
        let html = body(call(&fc, &sessions, "GET", "/contact", None));
        assert!(!html.contains("Your form has expired"));

        let form = format!("_token={token}&name=Ann&message=Hi+there");
        let response = call(&fc, &sessions, "POST", "/contact", Some(&form));
        assert_eq!(response.status_code, 303);
        let html = body(call(&fc, &sessions, "GET", "/contact", None));
        assert!(html.contains("Thank you, Ann, we will get back to you."), "{html}");
        assert!(!html.contains("value=\"Ann\""));

        let response = call(&fc, &sessions, "POST", "/about", Some(&form));
        assert_eq!(response.status_code, 405);
    }

    fn site(template: &str) -> Result<(tempfile::TempDir, FrontController)> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("home.tpl"), template)?;
        let fc = FrontController::new(
            Renderer::new(dir.path(), dir.path(), "/"), "Test");
        Ok((dir, fc))
    }

    #[test]
    fn t_render_error_is_500() -> Result<()> {
        let (_dir, fc) = site("before {{ nope() }} after")?;
        let response = fc.render(route_page("", "Test"), RenderEnv::default());
        assert_eq!(response.status_code, 500);
        let html = body(response);
        assert!(html.starts_with("<h1>Application Error</h1><p>Something went wrong: \
                                  Error rendering template &apos;home.tpl&apos;"), "{html}");
        assert!(html.contains("unknown helper &quot;nope&quot;"), "{html}");
        Ok(())
    }

    #[test]
    fn t_missing_template_is_500() -> Result<()> {
        let (_dir, fc) = site("")?;
        let response = fc.render(route_page("about", "Test"), RenderEnv::default());
        assert_eq!(response.status_code, 500);
        assert!(body(response).contains("Template file not found"));
        Ok(())
    }

    #[test]
    fn t_template_redirect() -> Result<()> {
        let (_dir, fc) = site("{% redirect(\"/about\", 301) %}")?;
        let response = fc.render(route_page("", "Test"), RenderEnv::default());
        assert_eq!(response.status_code, 301);
        assert_eq!(header(&response, "Location"), Some("/about"));
        Ok(())
    }
}
