use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser as ClapParser;
use tplsite::apachelog::Logs;
use tplsite::config::{Args, SiteConfig, sessionid_hasher};
use tplsite::frontcontroller::FrontController;
use tplsite::handler::{FileHandler, Handler};
use tplsite::note;
use tplsite::rouille_runner::run_server;
use tplsite::session::{SessionStore, SESSION_SECONDS};
use tplsite::template::Renderer;


fn main() -> Result<()> {
    let config = SiteConfig::from_args(Args::parse())?;
    if !config.templates.is_dir() {
        bail!("template directory {:?} does not exist", config.templates);
    }

    let sessions = SessionStore::new(sessionid_hasher()?,
                                     Duration::from_secs(SESSION_SECONDS));
    let logs = match &config.logdir {
        Some(dir) => Logs::open_in_basedir(dir)?,
        None => Logs::to_stderr(),
    };
    let renderer = Renderer::new(&config.templates, &config.public, &*config.base_url);
    let handlers: Vec<Arc<dyn Handler>> = vec![
        // Static files win over pages of the same path.
        Arc::new(FileHandler::new(&config.public)),
        Arc::new(FrontController::new(renderer, &*config.app_name)),
    ];

    note!("START", "listening on http://{}/, templates in {:?}, logs {}",
          config.listen, config.templates,
          config.logdir.as_deref().unwrap_or("to stderr"));
    run_server(config.listen.clone(), handlers, sessions, logs)
}
