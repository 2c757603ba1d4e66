//! Acceptance ledger and access control management.

use failure::format_err;
use structopt::StructOpt;
use uuid::Uuid;

use crate::{
    Result,
    config::Config,
    db::{self, types::{PermissionType, RoleType}},
    models::{Acl, Ledger},
};

/// Manage content acceptance and permissions
#[derive(StructOpt)]
pub struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
pub enum Command {
    /// Record a user's answer to a license request
    #[structopt(name = "license")]
    License(LicenseOpts),
    /// Record a user's answer to a role attribution request
    #[structopt(name = "role")]
    Role(RoleOpts),
    /// Withdraw a user's license request
    #[structopt(name = "remove-license")]
    RemoveLicense(UserOpts),
    /// Grant a user publish permission
    #[structopt(name = "grant")]
    Grant(UserOpts),
    /// Revoke a user's publish permission
    #[structopt(name = "revoke")]
    Revoke(UserOpts),
}

#[derive(StructOpt)]
pub struct LicenseOpts {
    /// Content uuid
    uuid: Uuid,
    /// User identifier
    user: String,
    /// Record an acceptance
    #[structopt(long = "accept", conflicts_with = "reject")]
    accept: bool,
    /// Record a refusal
    #[structopt(long = "reject")]
    reject: bool,
}

#[derive(StructOpt)]
pub struct RoleOpts {
    /// Content uuid
    uuid: Uuid,
    /// User identifier
    user: String,
    /// Role key (authors, publishers, ...)
    role: RoleType,
    /// Record an acceptance
    #[structopt(long = "accept", conflicts_with = "reject")]
    accept: bool,
    /// Record a refusal
    #[structopt(long = "reject")]
    reject: bool,
}

#[derive(StructOpt)]
pub struct UserOpts {
    /// Content uuid
    uuid: Uuid,
    /// User identifier
    user: String,
}

pub fn main(cfg: &Config, opts: Opts) -> Result<()> {
    match opts.command {
        Command::License(opts) => license(cfg, opts),
        Command::Role(opts) => role(cfg, opts),
        Command::RemoveLicense(opts) => remove_license(cfg, opts),
        Command::Grant(opts) => grant(cfg, opts),
        Command::Revoke(opts) => revoke(cfg, opts),
    }
}

fn license(cfg: &Config, opts: LicenseOpts) -> Result<()> {
    let accepted = answer(opts.accept, opts.reject)?;
    let db = db::connect(cfg)?;

    Ledger::accept_license(&db, opts.uuid, &opts.user, accepted)?;
    println!(
        "License {} by {} for {}",
        verdict(accepted), opts.user, opts.uuid,
    );

    Ok(())
}

fn role(cfg: &Config, opts: RoleOpts) -> Result<()> {
    let accepted = answer(opts.accept, opts.reject)?;
    let db = db::connect(cfg)?;

    Ledger::accept_role(&db, opts.uuid, &opts.user, opts.role, accepted)?;
    println!(
        "Role {} {} by {} for {}",
        opts.role, verdict(accepted), opts.user, opts.uuid,
    );

    Ok(())
}

fn remove_license(cfg: &Config, opts: UserOpts) -> Result<()> {
    let db = db::connect(cfg)?;

    Ledger::remove_license(&db, opts.uuid, &opts.user)?;
    println!("License request for {} on {} removed", opts.user, opts.uuid);

    Ok(())
}

fn grant(cfg: &Config, opts: UserOpts) -> Result<()> {
    let db = db::connect(cfg)?;

    Acl::grant(&db, opts.uuid, &opts.user, PermissionType::Publish)?;
    println!("Granted publish on {} to {}", opts.uuid, opts.user);

    Ok(())
}

fn revoke(cfg: &Config, opts: UserOpts) -> Result<()> {
    let db = db::connect(cfg)?;

    Acl::revoke(&db, opts.uuid, &opts.user, PermissionType::Publish)?;
    println!("Revoked publish on {} from {}", opts.uuid, opts.user);

    Ok(())
}

/// Resolve the answer flag pair into a single verdict.
fn answer(accept: bool, reject: bool) -> Result<bool> {
    if accept == reject {
        Err(format_err!("Specify exactly one of --accept or --reject"))
    } else {
        Ok(accept)
    }
}

fn verdict(accepted: bool) -> &'static str {
    if accepted { "accepted" } else { "refused" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_require_exactly_one_flag() {
        assert!(answer(false, false).is_err());
        assert!(answer(true, true).is_err());
        assert_eq!(answer(true, false).unwrap(), true);
        assert_eq!(answer(false, true).unwrap(), false);
    }
}
