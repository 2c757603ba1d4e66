//! Turning a parsed archive into a publication batch.
//!
//! Intake inserts the publication row, assigns identities, runs validation,
//! seeds the acceptance ledger, and stores pending content. Validation
//! failures are accumulated on the publication; only storage failures abort
//! the insertion.

use diesel::Connection as _Connection;
use diesel::result::Error as DbError;
use failure::Fail;
use serde_json::{Value, json};
use uuid::Uuid;

use std::collections::{HashMap, HashSet};

use crate::archive::{Archive, Binder, Document, Node, Package};
use crate::config::Config;
use crate::db::{
    Connection,
    models as db,
    schema::document_controls,
    types::{ContentType, PermissionType, PublicationState},
};
use crate::errors::PublicationError;
use crate::models::{
    Acl,
    Ident,
    Ledger,
    Module,
    NodeSpec,
    PendingDocument,
    Publication,
    file,
    module::FindModuleError,
    pending::CreatePendingError,
    publication::PokeError,
};
use crate::validation::{self, Validator};

use diesel::prelude::*;

/// Outcome of a submission: the new publication, where each piece of
/// content will land, and any validation messages recorded so far.
#[derive(Debug)]
pub struct IntakeSummary {
    pub publication_id: i32,
    /// Uuid of each submitted model mapped to its assigned identity.
    pub mapping: HashMap<Uuid, Ident>,
    pub state: PublicationState,
    pub messages: Vec<Value>,
}

/// Submit a parsed archive as a new publication batch.
pub fn add_publication(
    dbconn: &Connection,
    validator: &mut Validator,
    cfg: &Config,
    archive: &Archive,
) -> Result<IntakeSummary, IntakeError> {
    let mut publication = Publication::create(
        dbconn,
        &archive.publisher,
        &archive.message,
        Some(&archive.raw),
        archive.is_pre_publication,
    )?;

    let mut mapping = HashMap::new();
    let mut errors = Vec::new();

    match ingest(
        dbconn, validator, cfg, &publication, archive,
        &mut mapping, &mut errors,
    ) {
        Ok(()) => (),
        Err(error) => {
            // A storage failure is a programming or operational problem,
            // not a problem with the submission. Record an opaque fatal
            // message and surface the real cause to operators only.
            error!(
                "publication {} failed during intake: {}",
                publication.id(), error,
            );
            sentry::capture_message(
                &format!(
                    "publication {} failed during intake: {}",
                    publication.id(), error,
                ),
                sentry::Level::Error,
            );

            let _ = publication.append_message(dbconn, json!({
                "type": "CriticalError",
                "message": "an unexpected error occurred during intake",
            }));
            let _ = publication.fail(dbconn);

            return Err(error);
        }
    }

    for error in &errors {
        publication.append_message(dbconn, error.to_message())?;
    }

    if errors.is_empty() {
        publication.poke(dbconn)?;
    } else {
        publication.fail(dbconn)?;
    }

    Ok(IntakeSummary {
        publication_id: publication.id(),
        mapping,
        state: publication.state(),
        messages: publication.state_messages().to_vec(),
    })
}

fn ingest(
    dbconn: &Connection,
    validator: &mut Validator,
    cfg: &Config,
    publication: &Publication,
    archive: &Archive,
    mapping: &mut HashMap<Uuid, Ident>,
    errors: &mut Vec<PublicationError>,
) -> Result<(), IntakeError> {
    for package in &archive.packages {
        match package {
            Package::Document(document) => {
                let ident = add_pending_document(
                    dbconn, validator, cfg, publication, document, errors)?;
                mapping.insert(ident.uuid, ident);
            }
            Package::Binder(binder) => {
                let ident = add_pending_binder(
                    dbconn, validator, cfg, publication, binder,
                    mapping, errors,
                )?;
                mapping.insert(ident.uuid, ident);
            }
        }
    }

    Ok(())
}

fn add_pending_document(
    dbconn: &Connection,
    validator: &mut Validator,
    cfg: &Config,
    publication: &Publication,
    document: &Document,
    errors: &mut Vec<PublicationError>,
) -> Result<Ident, IntakeError> {
    let metadata = &document.metadata;

    // Version allocation and the pending insert commit together, so the
    // identity row lock taken while computing the next version holds
    // until this model is durably pending.
    dbconn.transaction(|| {
        let ident = allocate_identity(
            dbconn, publication, metadata, ContentType::Document, errors)?;

        errors.extend(validator.validate(dbconn, metadata)?);

        // Relative references must resolve to a resource in this
        // submission. Dangling ones are reported but don't block
        // acceptance bookkeeping.
        let filenames: HashSet<&str> = document.resources
            .iter()
            .map(|resource| resource.filename.as_str())
            .collect();
        for reference in &document.references {
            if reference.is_relative()
                && !filenames.contains(reference.target.as_str())
            {
                errors.push(PublicationError::InvalidReference {
                    xpath: reference.xpath.clone(),
                    value: reference.target.clone(),
                });
            }
        }

        let (license_accepted, roles_accepted) =
            seed_acceptance(dbconn, ident.uuid, metadata)?;

        let metadata_value = serde_json::to_value(metadata)?;
        let pending = PendingDocument::create(
            dbconn,
            publication.id(),
            &ident,
            ContentType::Document,
            license_accepted,
            roles_accepted,
            &metadata_value,
            Some(&document.content),
        )?;

        let limit = cfg.storage.resource_limit_bytes();
        for resource in &document.resources {
            if let Some(error) = validation::check_resource_size(
                &resource.filename, resource.data.len(), limit)
            {
                errors.push(error);
                continue;
            }

            let hash = file::hash_data(&resource.data);
            pending.attach_resource(
                dbconn,
                &resource.data,
                hash.as_bytes(),
                &resource.media_type,
                &resource.filename,
            )?;
        }

        Ok(ident)
    })
}

fn add_pending_binder(
    dbconn: &Connection,
    validator: &mut Validator,
    cfg: &Config,
    publication: &Publication,
    binder: &Binder,
    mapping: &mut HashMap<Uuid, Ident>,
    errors: &mut Vec<PublicationError>,
) -> Result<Ident, IntakeError> {
    // Documents first; the binder's tree references them.
    let mut contents = Vec::with_capacity(binder.nodes.len());
    for node in &binder.nodes {
        contents.push(build_node(
            dbconn, validator, cfg, publication, node, mapping, errors)?);
    }

    let metadata = &binder.metadata;

    dbconn.transaction(|| {
        let ident = allocate_identity(
            dbconn, publication, metadata, ContentType::Binder, errors)?;

        errors.extend(validator.validate(dbconn, metadata)?);

        let (license_accepted, roles_accepted) =
            seed_acceptance(dbconn, ident.uuid, metadata)?;

        let mut metadata_value = serde_json::to_value(metadata)?;
        metadata_value["tree"] = json!(&contents);

        PendingDocument::create(
            dbconn,
            publication.id(),
            &ident,
            ContentType::Binder,
            license_accepted,
            roles_accepted,
            &metadata_value,
            None,
        )?;

        Ok(ident)
    })
}

fn build_node(
    dbconn: &Connection,
    validator: &mut Validator,
    cfg: &Config,
    publication: &Publication,
    node: &Node,
    mapping: &mut HashMap<Uuid, Ident>,
    errors: &mut Vec<PublicationError>,
) -> Result<NodeSpec, IntakeError> {
    match node {
        Node::Document(document) => {
            let ident = add_pending_document(
                dbconn, validator, cfg, publication, document, errors)?;
            mapping.insert(ident.uuid, ident);

            Ok(NodeSpec::Document {
                id: ident.to_string(),
                title: document.metadata.title.clone(),
                latest: true,
            })
        }
        Node::Subcollection { title, nodes } => {
            let mut contents = Vec::with_capacity(nodes.len());
            for node in nodes {
                contents.push(build_node(
                    dbconn, validator, cfg, publication, node,
                    mapping, errors,
                )?);
            }

            Ok(NodeSpec::Subcollection {
                title: title.clone(),
                contents,
            })
        }
        Node::Pointer { ident, title } => {
            let parsed = ident.parse::<Ident>().ok();

            let resolved = match parsed {
                None => None,
                Some(ref parsed) => {
                    match Module::by_ident(dbconn, parsed) {
                        Ok(module) => Some(module.kind()),
                        Err(FindModuleError::NotFound) => None,
                        Err(FindModuleError::Database(e)) =>
                            return Err(e.into()),
                    }
                }
            };

            errors.extend(validation::check_document_pointer(ident, resolved));

            Ok(NodeSpec::Document {
                id: ident.clone(),
                title: title.clone(),
                latest: parsed.map(|p| !p.is_versioned()).unwrap_or(false),
            })
        }
    }
}

/// Assign the identity a model will be committed under.
///
/// Revisions keep the uuid embedded in their archive uri and get the next
/// version in its history; brand-new content is minted a fresh uuid with
/// the publisher placed on its ACL.
fn allocate_identity(
    dbconn: &Connection,
    publication: &Publication,
    metadata: &crate::archive::Metadata,
    kind: ContentType,
    errors: &mut Vec<PublicationError>,
) -> Result<Ident, IntakeError> {
    let existing = metadata.archive_uri
        .as_ref()
        .and_then(|uri| uri.parse::<Ident>().ok());

    let uuid = match existing {
        Some(existing) => {
            let uuid = existing.uuid;

            let has_acl = Acl::exists_for(dbconn, uuid)?;
            let allowed = Acl::has_permission(
                dbconn,
                &publication.publisher,
                PermissionType::Publish,
                uuid,
            )?;
            errors.extend(validation::check_permission(uuid, has_acl, allowed));

            ensure_control(dbconn, uuid)?;
            uuid
        }
        None => {
            let uuid = Uuid::new_v4();
            ensure_control(dbconn, uuid)?;
            Acl::grant(
                dbconn,
                uuid,
                &publication.publisher,
                PermissionType::Publish,
            )?;
            uuid
        }
    };

    let version = Module::next_version(dbconn, uuid, kind, false)?;

    Ok(Ident::new(uuid, version))
}

/// Ask every attributed user for license and role acceptance, then read
/// back whether the ledger already satisfies both.
fn seed_acceptance(
    dbconn: &Connection,
    uuid: Uuid,
    metadata: &crate::archive::Metadata,
) -> Result<(bool, bool), DbError> {
    let users = metadata.attributed_users();
    let roles: Vec<_> = metadata.roles
        .iter()
        .flat_map(|(&role_type, roles)| roles.iter()
            .map(move |role| (role_type, role.id.as_str())))
        .collect();

    Ledger::request_license(dbconn, uuid, &users)?;
    Ledger::request_roles(dbconn, uuid, &roles)?;

    let license = Ledger::license_complete(dbconn, uuid, &users)?;
    let accepted = Ledger::roles_complete(dbconn, uuid, &roles)?;

    Ok((license, accepted))
}

fn ensure_control(dbconn: &Connection, uuid: Uuid) -> Result<(), DbError> {
    diesel::insert_into(document_controls::table)
        .values(&db::DocumentControl {
            uuid,
            licenseid: None,
        })
        .on_conflict(document_controls::uuid)
        .do_nothing()
        .execute(dbconn)?;
    Ok(())
}

#[derive(Debug, Fail)]
pub enum IntakeError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Metadata could not be serialized for storage.
    #[fail(display = "Could not serialize metadata: {}", _0)]
    Serialization(#[cause] serde_json::Error),
    /// Creating a pending row failed.
    #[fail(display = "{}", _0)]
    Pending(#[cause] CreatePendingError),
    /// Poking the new publication failed.
    #[fail(display = "{}", _0)]
    Poke(#[cause] PokeError),
}

impl_from! { for IntakeError ;
    DbError => |e| IntakeError::Database(e),
    serde_json::Error => |e| IntakeError::Serialization(e),
    CreatePendingError => |e| IntakeError::Pending(e),
    PokeError => |e| IntakeError::Poke(e),
}
