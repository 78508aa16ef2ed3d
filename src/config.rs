//! Server configuration: command line options, falling back to
//! environment variables, falling back to defaults.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use blake3::Hasher;

use crate::random_util::os_random_hex;
use crate::util::{getenv, getenv_or, log_basedir};
use crate::warn;

pub const DEFAULT_APP_NAME: &str = " Global Helpers App";

#[derive(clap::Parser, Debug, Default)]
/// Serve the pages of a template directory.
pub struct Args {
    /// Address to listen on (env LISTEN_HTTP, default 127.0.0.1:3000)
    #[clap(long)]
    pub listen: Option<String>,

    /// Template root directory (env TEMPLATE_DIRECTORY, default
    /// "templates")
    #[clap(long)]
    pub templates: Option<PathBuf>,

    /// Directory with static files served as-is (env DOCUMENT_ROOT,
    /// default "public")
    #[clap(long)]
    pub public: Option<PathBuf>,

    /// Prefix for generated URLs (env BASE_URL, default "/")
    #[clap(long)]
    pub base_url: Option<String>,

    /// Directory for the access and error logs (env LOGDIR, default
    /// $HOME/log/<program name>)
    #[clap(long)]
    pub logdir: Option<String>,

    /// Write the access and error logs to stderr instead of files
    #[clap(long)]
    pub log_stderr: bool,

    /// Application name shown by the pages
    #[clap(long)]
    pub app_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub listen: String,
    pub templates: PathBuf,
    pub public: PathBuf,
    pub base_url: String,
    /// None means stderr.
    pub logdir: Option<String>,
    pub app_name: String,
}

impl SiteConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let listen = match args.listen {
            Some(v) => v,
            None => getenv_or("LISTEN_HTTP", Some("127.0.0.1:3000"))?,
        };
        let templates = match args.templates {
            Some(v) => v,
            None => getenv_or("TEMPLATE_DIRECTORY", Some("templates"))?.into(),
        };
        let public = match args.public {
            Some(v) => v,
            None => getenv_or("DOCUMENT_ROOT", Some("public"))?.into(),
        };
        let base_url = match args.base_url {
            Some(v) => v,
            None => getenv_or("BASE_URL", Some("/"))?,
        };
        let logdir =
            if args.log_stderr {
                None
            } else if let Some(dir) = args.logdir {
                Some(dir)
            } else if let Some(dir) = getenv("LOGDIR")? {
                Some(dir)
            } else {
                Some(log_basedir()?)
            };
        Ok(SiteConfig {
            listen,
            templates,
            public,
            base_url,
            logdir,
            app_name: args.app_name.unwrap_or_else(|| DEFAULT_APP_NAME.into()),
        })
    }
}

/// Hasher keyed with `SESSIONID_HASHER_SECRET`, or with a random
/// secret (sessions then don't survive restarts).
pub fn sessionid_hasher() -> Result<Hasher> {
    let secret = match getenv("SESSIONID_HASHER_SECRET")? {
        Some(s) => s,
        None => {
            warn!("SESSIONID_HASHER_SECRET is not set, using a random secret");
            os_random_hex(32).map_err(
                |e| anyhow!("can't get random bytes for the session secret: {e}"))?
        }
    };
    let mut h = Hasher::new();
    h.update(secret.as_bytes());
    Ok(h)
}


#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn t_command_line() -> Result<()> {
        let args = Args::try_parse_from(
            ["tplsite", "--listen", "0.0.0.0:8080", "--templates", "/srv/tpl",
             "--public", "/srv/www", "--base-url", "/app/", "--log-stderr",
             "--app-name", "Demo"])?;
        let config = SiteConfig::from_args(args)?;
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.templates, PathBuf::from("/srv/tpl"));
        assert_eq!(config.public, PathBuf::from("/srv/www"));
        assert_eq!(config.base_url, "/app/");
        assert_eq!(config.logdir, None);
        assert_eq!(config.app_name, "Demo");
        Ok(())
    }

    #[test]
    fn t_explicit_logdir() -> Result<()> {
        let args = Args::try_parse_from(["tplsite", "--logdir", "/tmp/logs"])?;
        let config = SiteConfig::from_args(args)?;
        assert_eq!(config.logdir.as_deref(), Some("/tmp/logs"));
        assert_eq!(config.app_name, DEFAULT_APP_NAME);
        Ok(())
    }

    #[test]
    fn t_unknown_option() {
        assert!(Args::try_parse_from(["tplsite", "--port", "80"]).is_err());
    }
}
