// TEMPORARY, see diesel-rs/diesel#1787.
#![allow(proc_macro_derive_resolution_fallback)]

#[macro_use] extern crate diesel;
#[macro_use] extern crate failure;
#[macro_use] extern crate failure_derive;
#[macro_use] extern crate log;
#[macro_use] extern crate serde_derive;

#[cfg(not(debug_assertions))]
#[macro_use]
extern crate diesel_migrations;

pub use bindery_macros::PublicationCode;
pub use self::cli::main;

#[macro_use] mod macros;

pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod intake;
pub mod models;
pub mod processing;
pub mod publish;
pub mod utils;
pub mod validation;

pub type Result<T, E=failure::Error> = std::result::Result<T, E>;
