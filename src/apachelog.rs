//! Write HTTP access log files in the Combined Log Format (extended
//! Common Log Format) for access logs (Apache style), as per
//! <https://httpd.apache.org/docs/2.4/logs.html>.

use std::mem::swap;
use std::panic;
use std::sync::{Arc, Mutex};
use std::{time::{Duration, SystemTime, Instant}, io::{stderr, BufWriter}};
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc, Datelike, Timelike};
use rouille::{Response, ResponseBody};

use crate::acontext::AContext;
use crate::easy_fs::open_log_output;
use crate::http_response_status_codes::HttpResponseStatusCode;
use crate::webutils::errorpage_from_status;
use crate::{try_result, warn};

static MONTHS: &[&str; 12] = &["Jan", "Feb", "Mar", "Apr", "May", "Jun",
                               "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

// "06/Dec/2023:02:02:47 +0000"
pub fn write_time(
    outp: &mut impl Write,
    time: SystemTime
) -> Result<()> {
    let dt: DateTime<Utc> = DateTime::from(time);
    write!(outp, "{:02}/{}/{:04}:{:02}:{:02}:{:02} +0000",
           dt.day(), MONTHS[dt.month0() as usize], dt.year(),
           dt.hour(), dt.minute(), dt.second())?;
    Ok(())
}

/// The body length, if known. `ResponseBody` has no accessor for it,
/// so the body is taken apart and put back together.
fn response_length(response: &mut Response) -> Option<usize> {
    let mut responsebody = ResponseBody::empty();
    swap(&mut responsebody, &mut response.data);
    let (data, length) = responsebody.into_reader_and_size();
    responsebody =
        if let Some(len) = length {
            ResponseBody::from_reader_and_size(data, len)
        } else {
            ResponseBody::from_reader(data)
        };
    swap(&mut responsebody, &mut response.data);
    length
}

// Apache:
// 44.212.94.18 - - [06/Dec/2023:02:38:18 +0100] "GET /resume/nontechnical.html HTTP/1.1" 200 2403 "-" "CCBot/2.0 (https://commoncrawl.org/faq/)"
// We also add the duration at the end.

/// Write to access.log
pub fn write_combined(
    outp: &mut impl Write,
    context: &AContext,
    duration: Duration,
    response: &mut Response, // temporarily swaps out ResponseBody and back
) -> Result<()> {
    // The time when the log entry is made, not when the request
    // started
    let now = SystemTime::now();
    let length = response_length(response).unwrap_or(0);
    write!(outp, "{} - - [", context.client_ip())?;
    write_time(outp, now)?;
    writeln!(outp, "] {:?} {} {length} {:?} {:?} {duration:?}",
             context.request_line(),
             response.status_code,
             context.referer().unwrap_or("-"),
             context.user_agent().unwrap_or("-")
    )?;
    outp.flush()?;
    Ok(())
}

/// Write to error.log
fn write_error(
    outp: &mut impl Write,
    context: &AContext,
    duration: Duration,
    err: anyhow::Error,
) -> Result<()> {
    let now = SystemTime::now();
    write!(outp, "[")?;
    write_time(outp, now)?;
    writeln!(outp, "] [error] [client {}] {:?} {duration:?}: {err:#}",
             context.client_ip(),
             context.request_line())?;
    outp.flush()?;
    Ok(())
}

/// Panic log to stderr. Panics on errors logging to stderr.
fn write_panic_stderr(
    context: &AContext,
    duration: Duration
) {
    try_result!{
        let mut outp = BufWriter::new(stderr().lock());
        // stderr is fed to a supervisor anyway, hence no timestamps.
        writeln!(&mut outp, "[panic] handling {:?} after {duration:?}",
                 context.request_line())?;
        outp.flush()?;
        Ok::<(), std::io::Error>(())
    }.expect("stderr always writable");
}


/// The log files to write to: access_log for responses, error_log
/// when the handler failed. The code calls flush once per entry.
pub struct Logs {
    pub access_log: Box<dyn Write + Send + Sync>,
    pub error_log: Box<dyn Write + Send + Sync>,
}

impl Logs {
    pub fn open_in_basedir(
        logbasedir: &str,
    ) -> Result<Arc<Mutex<Logs>>>
    {
        Ok(Arc::new(Mutex::new(Logs {
            access_log: open_log_output(format!("{logbasedir}/http_access.log"))?,
            error_log: open_log_output(format!("{logbasedir}/http_error.log"))?,
        })))
    }

    pub fn to_stderr() -> Arc<Mutex<Logs>> {
        Arc::new(Mutex::new(Logs {
            access_log: Box::new(stderr()),
            error_log: Box::new(stderr()),
        }))
    }
}


/// Run `handler`, logging its outcome: a response goes to the access
/// log, an error to the error log (and is answered with a 500
/// page). Panics are noted on stderr and then resumed.
pub fn log_combined<F>(
    context: &AContext,
    logs: &Mutex<Logs>,
    handler: F
) -> Response
where
    F: FnOnce() -> anyhow::Result<Response>,
{
    let start_instant = Instant::now();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(handler));
    let elapsed = start_instant.elapsed();

    match result {
        Ok(Ok(mut response)) => {
            let mut logs = logs.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = write_combined(&mut logs.access_log, context, elapsed, &mut response) {
                warn!("could not write to access log: {e:#}");
            }
            response
        }
        Ok(Err(err)) => {
            let mut logs = logs.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = write_error(&mut logs.error_log, context, elapsed, err) {
                warn!("could not write to error log: {e:#}");
            }
            errorpage_from_status(HttpResponseStatusCode::InternalServerError500)
        }
        Err(payload) => {
            write_panic_stderr(context, elapsed);
            // The panic handler will print the payload contents
            panic::resume_unwind(payload);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;
    use blake3::Hasher;
    use rouille::{Request, session::session};
    use crate::session::SessionStore;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn t_write_time() -> Result<()> {
        let mut out = Vec::new();
        write_time(&mut out, UNIX_EPOCH + Duration::from_secs(1701828167))?;
        assert_eq!(String::from_utf8(out)?, "06/Dec/2023:02:02:47 +0000");
        Ok(())
    }

    #[test]
    fn t_log_combined() {
        let access = SharedBuf::default();
        let error = SharedBuf::default();
        let logs = Mutex::new(Logs {
            access_log: Box::new(access.clone()),
            error_log: Box::new(error.clone()),
        });
        let sessions = SessionStore::new(Hasher::new(), Duration::from_secs(60));
        let request = Request::fake_http(
            "GET", "/about", vec![("User-Agent".into(), "tester".into())], vec![]);
        let _ = session(&request, "sid", 60, |session| {
            let context = AContext::new(&request, "localhost", session, &sessions).unwrap();
            let ok = log_combined(&context, &logs, || Ok(Response::text("hello")));
            assert_eq!(ok.status_code, 200);
            let failed = log_combined(&context, &logs, || Err(anyhow::anyhow!("boom")));
            assert_eq!(failed.status_code, 500);
            ok
        });
        let access = access.contents();
        assert!(access.contains("\"GET /about\" 200 5 \"-\" \"tester\""), "{access}");
        let error = error.contents();
        assert!(error.contains("[error]") && error.contains("boom"), "{error}");
    }
}
