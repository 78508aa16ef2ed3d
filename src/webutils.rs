use std::borrow::Cow;

use rouille::{Response, ResponseBody};

use crate::helpers::strings::e;
use crate::http_response_status_codes::HttpResponseStatusCode;


pub fn errorpage_from_status(status: HttpResponseStatusCode) -> Response {
    let title = status.title();
    let explanation = e(status.desc());
    let resp = format!("<html><head><title>{title}</title></head><body><h1>{title}</h1>\
                        <p>{explanation}</p></body></html>\n");
    htmlresponse(status.code(), resp)
}

pub fn htmlresponse(status_code: u16, html: String) -> Response {
    Response {
        status_code,
        headers: vec![(Cow::from("Content-type"),
                       Cow::from("text/html; charset=utf-8"))],
        data: ResponseBody::from_string(html),
        upgrade: None,
    }
}

/// A redirect to `url` with the given (3xx) status.
pub fn redirect(url: &str, status: HttpResponseStatusCode) -> Response {
    Response {
        status_code: status.code(),
        headers: vec![(Cow::from("Location"), Cow::from(url.to_string()))],
        data: ResponseBody::empty(),
        upgrade: None,
    }
}
