//! Service administration.

use actix::System;

use crate::{Result, config::Config, db, processing::BakeWorker};

/// Run the post-publication notifier and baking worker until interrupted.
pub fn start(cfg: &Config) -> Result<()> {
    let system = System::new("bindery");
    let pool = db::pool(cfg)?;

    BakeWorker::start(pool);

    system.run();

    Ok(())
}
