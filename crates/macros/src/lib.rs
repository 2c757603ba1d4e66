//! Procedural macros for `bindery`.

extern crate proc_macro;

#[macro_use] extern crate quote;

use synstructure::decl_derive;

mod publication;

decl_derive!([PublicationCode, attributes(publication)] =>
    /// Derive `PublicationCode`, assigning each variant of a publication
    /// error its numeric wire code and type name.
    ///
    /// Every variant must carry a `#[publication(code = N)]` attribute, or
    /// have a `#[cause]` field to which both values are delegated.
    publication::derive_code
);
