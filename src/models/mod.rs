//! Data and behaviours modelled as objects.

pub mod acceptance;
pub mod file;
pub mod ident;
pub mod module;
pub mod pending;
pub mod publication;
pub mod tree;

pub use self::{
    acceptance::{Acl, Ledger},
    file::File,
    ident::{Ident, ParseIdentError, Version},
    module::Module,
    pending::PendingDocument,
    publication::Publication,
    tree::{NodeSpec, Tree},
};
