//! Forcing another bake of published collections.

use structopt::StructOpt;

use crate::{
    Result,
    config::Config,
    db,
    models::Ident,
    processing::request_rebake,
};

/// Queue a published collection for another bake
#[derive(StructOpt)]
pub struct Opts {
    /// Exact version to bake, as uuid@major.minor
    #[structopt(parse(try_from_str))]
    ident: Ident,
}

pub fn main(cfg: &Config, opts: Opts) -> Result<()> {
    let db = db::connect(cfg)?;
    let module = request_rebake(&db, &opts.ident)?;

    println!("Queued {} for baking", module.ident());

    Ok(())
}
