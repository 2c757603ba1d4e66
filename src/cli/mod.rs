use std::{env, mem};
use structopt::StructOpt;

use crate::{Result, config::Config};

mod bake;
mod contents;
mod publication;
mod server;

#[derive(StructOpt)]
#[structopt(raw(version = r#"env!("CARGO_PKG_VERSION")"#))]
struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Start the baking service
    #[structopt(name = "start")]
    Start,
    /// Manage content acceptance and permissions
    #[structopt(name = "contents")]
    Contents(contents::Opts),
    /// Manage publication batches
    #[structopt(name = "publication")]
    Publication(publication::Opts),
    /// Queue a published collection for another bake
    #[structopt(name = "bake")]
    Bake(bake::Opts),
}

pub fn main() -> Result<()> {
    let opts = Opts::from_args();
    let config = crate::config::load()?;

    setup_sentry(config);
    setup_logging(&config.logging)?;

    match opts.command {
        Command::Start => server::start(config),
        Command::Contents(opts) => contents::main(config, opts),
        Command::Publication(opts) => publication::main(config, opts),
        Command::Bake(opts) => bake::main(config, opts),
    }
}

fn setup_sentry(config: &Config) {
    if let Some(ref sentry) = config.sentry {
        env::set_var("RUST_BACKTRACE", "1");
        mem::forget(sentry::init((sentry.dsn.as_str(), sentry::ClientOptions {
            trim_backtraces: true,
            debug: cfg!(debug_assertions),
            release: Some(env!("CARGO_PKG_VERSION").into()),
            .. Default::default()
        })));
        sentry::integrations::panic::register_panic_handler();
    }
}

fn setup_logging(config: &crate::config::Logging) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(config.level);

    for (module, level) in &config.filters {
        builder.filter_module(&module, *level);
    }

    builder.try_init()?;
    Ok(())
}
