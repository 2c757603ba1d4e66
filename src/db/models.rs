use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{
    schema::*,
    types::{ContentType, ModuleState, PermissionType, PublicationState, RoleType},
};

#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct Publication {
    /// ID of this publication batch.
    pub id: i32,
    /// Identifier of the user who submitted the batch.
    pub publisher: String,
    /// Message attached by the publisher, stored on every committed module.
    pub publication_message: String,
    /// Raw uploaded archive, kept for audit. Discarded when a moderator
    /// rejects the batch.
    pub epub: Option<Vec<u8>>,
    /// Current state, or `None` before the first poke.
    pub state: Option<PublicationState>,
    /// Ordered list of structured error and info records.
    pub state_messages: Option<Value>,
    /// Pre-publications are validated and gated on acceptance but never
    /// committed to the versioned store.
    pub is_pre_publication: bool,
    pub created: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "publications"]
pub struct NewPublication<'a> {
    pub publisher: &'a str,
    pub publication_message: &'a str,
    pub epub: Option<&'a [u8]>,
    pub is_pre_publication: bool,
}

#[derive(Associations, Clone, Debug, Identifiable, Queryable)]
#[belongs_to(Publication)]
pub struct PendingDocument {
    /// ID of this pending row, not of the content it will become.
    pub id: i32,
    pub publication_id: i32,
    /// Identity the content will be committed under.
    pub uuid: Uuid,
    pub major_version: i32,
    /// `None` for documents; binders carry an integer minor version.
    pub minor_version: Option<i32>,
    pub type_: ContentType,
    /// Derived at insertion time from the acceptance ledger, updated on poke.
    pub license_accepted: bool,
    pub roles_accepted: bool,
    pub metadata: Value,
    /// Document body. Binders store their tree inside `metadata` instead.
    pub content: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "pending_documents"]
pub struct NewPendingDocument<'a> {
    pub publication_id: i32,
    pub uuid: Uuid,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub type_: ContentType,
    pub license_accepted: bool,
    pub roles_accepted: bool,
    pub metadata: &'a Value,
    pub content: Option<&'a [u8]>,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct PendingResource {
    pub id: i32,
    pub data: Vec<u8>,
    /// BLAKE2 hash of `data`, used for deduplication in the file store.
    pub hash: Vec<u8>,
    pub media_type: String,
    pub filename: String,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "pending_resources"]
pub struct NewPendingResource<'a> {
    pub data: &'a [u8],
    pub hash: &'a [u8],
    pub media_type: &'a str,
    pub filename: &'a str,
}

#[derive(Clone, Copy, Debug, Insertable, Queryable)]
#[table_name = "pending_resource_associations"]
pub struct PendingResourceAssociation {
    pub document_id: i32,
    pub resource_id: i32,
}

/// A user's standing license acceptance for a content uuid.
///
/// Scoped to the uuid, not to any publication, so it survives
/// republications of the same content.
#[derive(Clone, Debug, Insertable, Queryable)]
#[table_name = "license_acceptances"]
pub struct LicenseAcceptance {
    pub uuid: Uuid,
    pub user_id: String,
    /// `None` means the user has been asked but has not responded.
    pub accepted: Option<bool>,
}

#[derive(Clone, Debug, Insertable, Queryable)]
#[table_name = "role_acceptances"]
pub struct RoleAcceptance {
    pub uuid: Uuid,
    pub user_id: String,
    pub role_type: RoleType,
    pub accepted: Option<bool>,
}

#[derive(Clone, Debug, Insertable, Queryable)]
#[table_name = "document_acl"]
pub struct AclEntry {
    pub uuid: Uuid,
    pub user_id: String,
    pub permission: PermissionType,
}

/// Registry row for a content identifier. Exists from the moment a uuid is
/// minted or pre-created, before any module for it is published.
#[derive(Clone, Copy, Debug, Insertable, Queryable)]
#[table_name = "document_controls"]
pub struct DocumentControl {
    pub uuid: Uuid,
    pub licenseid: Option<i32>,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct License {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub url: String,
    /// Licenses can be known for historical content yet closed to new
    /// publications.
    pub is_valid_for_publication: bool,
}

/// Entry in the controlled subject vocabulary.
#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct Subject {
    pub id: i32,
    pub name: String,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
#[primary_key(username)]
pub struct User {
    pub username: String,
    /// Set once a moderator has vetted this publisher.
    pub is_moderated: bool,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
#[primary_key(module_ident)]
pub struct Module {
    /// Surrogate key of this version row.
    pub module_ident: i32,
    pub uuid: Uuid,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub type_: ContentType,
    pub title: String,
    pub language: String,
    pub metadata: Value,
    pub publisher: String,
    pub publication_message: Option<String>,
    pub created: DateTime<Utc>,
    pub revised: DateTime<Utc>,
    pub state: ModuleState,
    /// Name of the baking ruleset last applied, binders only.
    pub recipe: Option<String>,
    pub baked: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "modules"]
pub struct NewModule<'a> {
    pub uuid: Uuid,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub type_: ContentType,
    pub title: &'a str,
    pub language: &'a str,
    pub metadata: &'a Value,
    pub publisher: &'a str,
    pub publication_message: Option<&'a str>,
    pub state: ModuleState,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "module_keywords"]
pub struct ModuleKeyword<'a> {
    pub module_ident: i32,
    pub keyword: &'a str,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct File {
    pub id: i32,
    pub media_type: String,
    /// Path in the content-addressed store holding this file's bytes.
    pub path: String,
    pub hash: Vec<u8>,
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "files"]
pub struct NewFile<'a> {
    pub media_type: &'a str,
    pub path: &'a str,
    pub hash: &'a [u8],
}

#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct ModuleFile {
    pub id: i32,
    pub module_ident: i32,
    pub file: i32,
    pub filename: String,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "module_files"]
pub struct NewModuleFile<'a> {
    pub module_ident: i32,
    pub file: i32,
    pub filename: &'a str,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
#[table_name = "trees"]
#[primary_key(nodeid)]
pub struct TreeNode {
    pub nodeid: i32,
    /// `None` for the root of a tree.
    pub parent: Option<i32>,
    /// Module this node references. Subcollection placeholders carry none.
    pub module: Option<i32>,
    pub title: Option<String>,
    /// Position among siblings, literal submission order.
    pub child_order: i32,
    /// Nodes flagged latest track the newest version of their module and
    /// are rewritten by republication. Unflagged nodes are version pins.
    pub latest: bool,
    pub is_collated: bool,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "trees"]
pub struct NewTreeNode<'a> {
    pub parent: Option<i32>,
    pub module: Option<i32>,
    pub title: Option<&'a str>,
    pub child_order: i32,
    pub latest: bool,
    pub is_collated: bool,
}

#[derive(Clone, Debug, Identifiable, Queryable)]
pub struct PostPublicationResult {
    pub id: i32,
    pub module_ident: i32,
    pub state: PublicationState,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "post_publication_results"]
pub struct NewPostPublicationResult<'a> {
    pub module_ident: i32,
    pub state: PublicationState,
    pub message: &'a str,
}
