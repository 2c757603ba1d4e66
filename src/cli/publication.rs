//! Publication batch management.

use failure::format_err;
use std::{fs, path::PathBuf};
use structopt::StructOpt;

use crate::{
    Result,
    archive::Archive,
    config::Config,
    db,
    intake,
    models::Publication,
    validation::Validator,
};

/// Manage publication batches
#[derive(StructOpt)]
pub struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
pub enum Command {
    /// Submit an archive manifest as a new batch
    #[structopt(name = "submit")]
    Submit(SubmitOpts),
    /// Re-evaluate a batch's gates and advance it
    #[structopt(name = "poke")]
    Poke(BatchOpts),
    /// Show a batch's state and messages
    #[structopt(name = "status")]
    Status(BatchOpts),
    /// Accept or reject a batch waiting for moderation
    #[structopt(name = "moderate")]
    Moderate(ModerateOpts),
    /// List batches waiting for moderation
    #[structopt(name = "pending")]
    Pending,
}

#[derive(StructOpt)]
pub struct SubmitOpts {
    /// Path to the archive manifest
    #[structopt(parse(from_os_str))]
    file: PathBuf,
}

#[derive(StructOpt)]
pub struct BatchOpts {
    /// Batch id
    id: i32,
}

#[derive(StructOpt)]
pub struct ModerateOpts {
    /// Batch id
    id: i32,
    /// Accept the batch and vet its publisher
    #[structopt(long = "accept", conflicts_with = "reject")]
    accept: bool,
    /// Reject the batch
    #[structopt(long = "reject")]
    reject: bool,
}

pub fn main(cfg: &Config, opts: Opts) -> Result<()> {
    match opts.command {
        Command::Submit(opts) => submit(cfg, opts),
        Command::Poke(opts) => poke(cfg, opts),
        Command::Status(opts) => status(cfg, opts),
        Command::Moderate(opts) => moderate(cfg, opts),
        Command::Pending => pending(cfg),
    }
}

fn pending(cfg: &Config) -> Result<()> {
    let db = db::connect(cfg)?;

    for publication in Publication::all_waiting_moderation(&db)? {
        println!("{}\t{}\t{}",
            publication.id(),
            publication.publisher,
            publication.publication_message);
    }

    Ok(())
}

fn submit(cfg: &Config, opts: SubmitOpts) -> Result<()> {
    let db = db::connect(cfg)?;
    let raw = fs::read(&opts.file)?;
    let archive = Archive::from_manifest(&raw)?;
    let mut validator = Validator::new();

    let summary = intake::add_publication(&db, &mut validator, cfg, &archive)?;

    println!("Publication: {}", summary.publication_id);
    println!("State:       {}", summary.state);

    if !summary.mapping.is_empty() {
        println!("\nAssigned identities:");
        for (uuid, ident) in &summary.mapping {
            println!("  {} -> {}", uuid, ident);
        }
    }

    if !summary.messages.is_empty() {
        println!("\nMessages:");
        for message in &summary.messages {
            println!("  {}", message);
        }
    }

    Ok(())
}

fn poke(cfg: &Config, opts: BatchOpts) -> Result<()> {
    let db = db::connect(cfg)?;
    let mut publication = Publication::by_id(&db, opts.id)?;

    let state = publication.poke(&db)?;
    println!("State: {}", state);

    Ok(())
}

fn status(cfg: &Config, opts: BatchOpts) -> Result<()> {
    let db = db::connect(cfg)?;
    let publication = Publication::by_id(&db, opts.id)?;

    println!("State: {}", publication.state());

    for message in publication.state_messages() {
        println!("  {}", message);
    }

    Ok(())
}

fn moderate(cfg: &Config, opts: ModerateOpts) -> Result<()> {
    if opts.accept == opts.reject {
        return Err(format_err!(
            "Specify exactly one of --accept or --reject"));
    }

    let db = db::connect(cfg)?;
    let mut publication = Publication::by_id(&db, opts.id)?;

    let state = publication.moderate(&db, opts.accept)?;
    println!("State: {}", state);

    Ok(())
}
