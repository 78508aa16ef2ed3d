pub mod acontext;
pub mod apachelog;
pub mod config;
pub mod easy_fs;
pub mod frontcontroller;
pub mod handler;
pub mod helpers;
pub mod http_request_method;
pub mod http_response_status_codes;
pub mod random_util;
pub mod rouille_runner;
pub mod session;
pub mod template;
pub mod util;
pub mod warn;
pub mod webutils;
