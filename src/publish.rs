//! The commit and republication engine.
//!
//! Writes a gated publication batch into the versioned store and cascades
//! minor-version republications to collections that contained an updated
//! document. Each model commits in its own transaction: a failure part-way
//! leaves earlier models durably committed, and the publication's state
//! messages record which ones, so partial commits are visible rather than
//! hidden.

use diesel::{Connection as _Connection, prelude::*, result::Error as DbError};
use failure::Fail;
use serde_json::json;

use std::collections::{HashMap, HashSet};

use crate::db::{
    Connection,
    models as db,
    schema::{module_keywords, trees},
    types::{ContentType, ModuleState},
};
use crate::models::{
    Ident,
    Module,
    NodeSpec,
    PendingDocument,
    Publication,
    Tree,
    file::{CreateFileError, File},
    module::{CreateModuleError, FindModuleError},
    publication::FindPublicationError,
    tree::{Node, TreeError},
};

/// A model written to the versioned store by this pass.
#[derive(Debug)]
struct Committed {
    /// Module row of the version this one supersedes, if any.
    previous: Option<i32>,
    module_ident: i32,
    ident: Ident,
    kind: ContentType,
}

/// Commit every pending model of a publication, then run the republication
/// cascade. The publication must already be marked `Publishing`.
///
/// Returns the identities committed, batch models first, cascaded
/// collections after.
pub fn publish_pending(dbconn: &Connection, publication_id: i32)
-> Result<Vec<Ident>, PublishError> {
    let cfg = crate::config::load().map_err(PublishError::Config)?;

    let mut publication = Publication::by_id(dbconn, publication_id)?;
    let pending = PendingDocument::of_publication(dbconn, publication_id)?;

    let batch_uuids: HashSet<_> = pending.iter()
        .map(|pending| pending.uuid)
        .collect();

    // Tree references within the batch resolve through the identities the
    // pending rows were assigned at intake.
    let mut pending_map = HashMap::new();
    let mut committed = Vec::new();
    let message = publication.publication_message.clone();

    // Documents first; binder trees reference them.
    for p in pending.iter().filter(|p| p.kind() == ContentType::Document) {
        let model = publish_document(dbconn, &cfg.storage.path, p, &message)?;
        record_commit(dbconn, &mut publication, &model)?;
        pending_map.insert(model.ident.to_string(), model.module_ident);
        committed.push(model);
    }

    for p in pending.iter().filter(|p| p.kind() == ContentType::Binder) {
        let model = publish_binder(dbconn, p, &pending_map, &message)?;
        record_commit(dbconn, &mut publication, &model)?;
        pending_map.insert(model.ident.to_string(), model.module_ident);
        committed.push(model);
    }

    publication.succeed(dbconn)?;

    let cascaded = republish_binders(dbconn, &batch_uuids, &committed)?;

    info!(
        "publication {} committed {} models, republished {} collections",
        publication_id, committed.len(), cascaded.len(),
    );

    Ok(committed.into_iter()
        .map(|model| model.ident)
        .chain(cascaded)
        .collect())
}

fn publish_document(
    dbconn: &Connection,
    storage: &std::path::Path,
    pending: &PendingDocument,
    message: &str,
) -> Result<Committed, PublishError> {
    let ident = pending.ident();
    let resources = pending.resources(dbconn)?;

    dbconn.transaction(|| {
        let previous = Module::latest(dbconn, pending.uuid)?
            .map(|module| module.module_ident());

        let module = Module::create(
            dbconn,
            &ident,
            ContentType::Document,
            &pending.metadata,
            &pending_publisher(dbconn, pending)?,
            Some(message),
            ModuleState::Current,
        )?;

        for resource in &resources {
            let file = File::store(
                dbconn, storage, &resource.data, &resource.media_type)?;

            diesel::insert_into(crate::db::schema::module_files::table)
                .values(&db::NewModuleFile {
                    module_ident: module.module_ident(),
                    file: file.id,
                    filename: &resource.filename,
                })
                .execute(dbconn)?;
        }

        write_keywords(dbconn, module.module_ident(), &pending.metadata)?;

        debug!("committed document {}", ident);

        Ok(Committed {
            previous,
            module_ident: module.module_ident(),
            ident,
            kind: ContentType::Document,
        })
    })
}

fn publish_binder(
    dbconn: &Connection,
    pending: &PendingDocument,
    pending_map: &HashMap<String, i32>,
    message: &str,
) -> Result<Committed, PublishError> {
    let ident = pending.ident();
    let spec = pending.tree()?
        .ok_or_else(|| PublishError::MissingTree(ident.to_string()))?;

    dbconn.transaction(|| {
        let previous = Module::latest(dbconn, pending.uuid)?
            .map(|module| module.module_ident());

        let module = Module::create(
            dbconn,
            &ident,
            ContentType::Binder,
            &pending.metadata,
            &pending_publisher(dbconn, pending)?,
            Some(message),
            ModuleState::PostPublication,
        )?;

        let children = spec.iter()
            .map(|node| resolve_node(dbconn, node, pending_map))
            .collect::<Result<Vec<_>, _>>()?;

        let title = pending.metadata.get("title")
            .and_then(serde_json::Value::as_str)
            .map(String::from);

        let tree = Tree {
            root: Node {
                module: Some(module.module_ident()),
                title,
                latest: true,
                children,
            },
        };
        tree.write(dbconn, false)?;

        write_keywords(dbconn, module.module_ident(), &pending.metadata)?;

        debug!("committed binder {}", ident);

        Ok(Committed {
            previous,
            module_ident: module.module_ident(),
            ident,
            kind: ContentType::Binder,
        })
    })
}

/// Turn a submitted tree node into a stored one, resolving its ident-hash
/// to a module committed by this batch or already in the archive.
fn resolve_node(
    dbconn: &Connection,
    spec: &NodeSpec,
    pending_map: &HashMap<String, i32>,
) -> Result<Node, PublishError> {
    match spec {
        NodeSpec::Document { id, title, latest } => {
            let module_ident = match pending_map.get(id) {
                Some(&module_ident) => module_ident,
                None => {
                    let ident = id.parse::<Ident>().map_err(|_|
                        PublishError::UnresolvedReference(id.clone()))?;
                    match Module::by_ident(dbconn, &ident) {
                        Ok(module) => module.module_ident(),
                        Err(FindModuleError::NotFound) => return Err(
                            PublishError::UnresolvedReference(id.clone())),
                        Err(FindModuleError::Database(e)) =>
                            return Err(e.into()),
                    }
                }
            };

            Ok(Node {
                module: Some(module_ident),
                title: Some(title.clone()),
                latest: *latest,
                children: Vec::new(),
            })
        }
        NodeSpec::Subcollection { title, contents } => Ok(Node {
            module: None,
            title: Some(title.clone()),
            latest: true,
            children: contents.iter()
                .map(|child| resolve_node(dbconn, child, pending_map))
                .collect::<Result<Vec<_>, _>>()?,
        }),
    }
}

/// Republish every collection outside the batch whose latest tree contained
/// a previous version of a document committed by this pass.
///
/// Each affected collection gains exactly one minor version whose tree
/// points at the new documents; prior versions are left untouched, and the
/// pass never recurses from a just-updated collection to its own ancestors.
fn republish_binders(
    dbconn: &Connection,
    batch_uuids: &HashSet<uuid::Uuid>,
    committed: &[Committed],
) -> Result<Vec<Ident>, PublishError> {
    // Seeded from the batch, extended with each cascade's own supersession.
    let mut history_map: HashMap<i32, i32> = committed.iter()
        .filter_map(|model| model.previous
            .map(|previous| (previous, model.module_ident)))
        .collect();

    let mut affected = Vec::new();
    let mut seen = HashSet::new();

    for model in committed {
        let previous = match (model.kind, model.previous) {
            (ContentType::Document, Some(previous)) => previous,
            _ => continue,
        };

        for collection in containing_collections(dbconn, previous)? {
            if seen.insert(collection) {
                affected.push(collection);
            }
        }
    }

    let mut republished = Vec::new();

    for old_ident in affected {
        let old = Module::by_module_ident(dbconn, old_ident)
            .map_err(|e| match e {
                FindModuleError::Database(e) => PublishError::Database(e),
                FindModuleError::NotFound =>
                    PublishError::UnresolvedReference(old_ident.to_string()),
            })?;

        if batch_uuids.contains(&old.uuid) {
            continue;
        }

        // Only the newest version of an ancestor gains the update; older
        // trees stay exactly as published.
        let latest = Module::latest(dbconn, old.uuid)?
            .map(|module| module.module_ident());
        if latest != Some(old_ident) {
            continue;
        }

        let ident = dbconn.transaction(|| {
            let version = Module::next_version(
                dbconn, old.uuid, ContentType::Binder, true)?;
            let new = old.clone_as(dbconn, version, &old.metadata)?;

            history_map.insert(old_ident, new.module_ident());

            let tree = Tree::load(dbconn, old_ident, false)?
                .ok_or_else(|| PublishError::MissingTree(
                    old.ident().to_string()))?;
            tree.rewrite(&history_map).write(dbconn, false)?;

            debug!("republished collection {} as {}", old.ident(), new.ident());

            Ok::<_, PublishError>(new.ident())
        })?;

        republished.push(ident);
    }

    Ok(republished)
}

/// Roots of every uncollated tree whose latest-tracking nodes reference a
/// module, found by walking parent links upward with a cycle guard.
fn containing_collections(dbconn: &Connection, module_ident: i32)
-> Result<Vec<i32>, PublishError> {
    let nodes = trees::table
        .filter(trees::module.eq(module_ident))
        .filter(trees::is_collated.eq(false))
        .filter(trees::latest.eq(true))
        .get_results::<db::TreeNode>(dbconn)?;

    let mut roots = Vec::new();
    let mut found = HashSet::new();

    for node in nodes {
        let mut visited = HashSet::new();
        visited.insert(node.nodeid);

        let mut current = node;
        while let Some(parent) = current.parent {
            if !visited.insert(parent) {
                return Err(TreeError::Cycle(parent).into());
            }

            current = trees::table
                .filter(trees::nodeid.eq(parent))
                .get_result::<db::TreeNode>(dbconn)?;
        }

        match current.module {
            // A root that is the module itself is not a container.
            Some(root) if root != module_ident && found.insert(root) =>
                roots.push(root),
            _ => (),
        }
    }

    Ok(roots)
}

fn record_commit(
    dbconn: &Connection,
    publication: &mut Publication,
    model: &Committed,
) -> Result<(), DbError> {
    publication.append_message(dbconn, json!({
        "type": "Committed",
        "message": format!("committed {} {}", model.kind, model.ident),
        "ident_hash": model.ident.to_string(),
    }))
}

fn pending_publisher(dbconn: &Connection, pending: &PendingDocument)
-> Result<String, DbError> {
    use crate::db::schema::publications;

    publications::table
        .filter(publications::id.eq(pending.publication_id))
        .select(publications::publisher)
        .get_result::<String>(dbconn)
}

fn write_keywords(
    dbconn: &Connection,
    module_ident: i32,
    metadata: &serde_json::Value,
) -> Result<(), DbError> {
    let keywords = metadata.get("keywords")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    for keyword in keywords.iter().filter_map(serde_json::Value::as_str) {
        diesel::insert_into(module_keywords::table)
            .values(&db::ModuleKeyword {
                module_ident,
                keyword,
            })
            .on_conflict((
                module_keywords::module_ident,
                module_keywords::keyword,
            ))
            .do_nothing()
            .execute(dbconn)?;
    }

    Ok(())
}

#[derive(Debug, Fail)]
pub enum PublishError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Publication could not be loaded.
    #[fail(display = "{}", _0)]
    Publication(#[cause] FindPublicationError),
    /// Module row could not be written.
    #[fail(display = "{}", _0)]
    Module(#[cause] CreateModuleError),
    /// File could not be stored.
    #[fail(display = "{}", _0)]
    File(#[cause] CreateFileError),
    /// Tree could not be loaded or rebuilt.
    #[fail(display = "{}", _0)]
    Tree(#[cause] TreeError),
    /// Pending binder has no stored tree.
    #[fail(display = "Binder {} has no tree", _0)]
    MissingTree(String),
    /// A tree node references something neither this batch nor the archive
    /// knows.
    #[fail(display = "Unresolved content reference: {}", _0)]
    UnresolvedReference(String),
    /// Stored metadata doesn't parse.
    #[fail(display = "Malformed metadata: {}", _0)]
    Metadata(#[cause] serde_json::Error),
    /// Configuration could not be loaded.
    #[fail(display = "{}", _0)]
    Config(failure::Error),
}

impl_from! { for PublishError ;
    DbError => |e| PublishError::Database(e),
    FindPublicationError => |e| PublishError::Publication(e),
    CreateModuleError => |e| PublishError::Module(e),
    CreateFileError => |e| PublishError::File(e),
    TreeError => |e| PublishError::Tree(e),
    serde_json::Error => |e| PublishError::Metadata(e),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_map_seeds_from_batch_commits() {
        let committed = vec![
            Committed {
                previous: Some(10),
                module_ident: 11,
                ident: Ident::latest(uuid::Uuid::nil()),
                kind: ContentType::Document,
            },
            Committed {
                previous: None,
                module_ident: 12,
                ident: Ident::latest(uuid::Uuid::nil()),
                kind: ContentType::Document,
            },
        ];

        let map: HashMap<i32, i32> = committed.iter()
            .filter_map(|model| model.previous
                .map(|previous| (previous, model.module_ident)))
            .collect();

        assert_eq!(map.len(), 1);
        assert_eq!(map[&10], 11);
    }
}
