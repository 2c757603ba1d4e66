//! Background processing of published collections.

pub mod bake;

pub use self::bake::{BakeWorker, Collator, RebakeError, request_rebake};
