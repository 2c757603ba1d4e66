use diesel::{prelude::*, result::Error as DbError};
use failure::Fail;
use serde_json::Value;

use crate::archive::Metadata;
use crate::db::{
    Connection,
    models as db,
    schema::{pending_documents, pending_resource_associations, pending_resources},
    types::ContentType,
};
use super::{
    acceptance::Ledger,
    ident::{Ident, Version},
    tree::NodeSpec,
};

/// A document or binder submitted in a publication batch, awaiting commit.
#[derive(Debug)]
pub struct PendingDocument {
    data: db::PendingDocument,
}

impl PendingDocument {
    pub(crate) fn from_db(data: db::PendingDocument) -> PendingDocument {
        PendingDocument { data }
    }

    /// All pending rows of one publication, in submission order.
    pub fn of_publication(dbconn: &Connection, publication_id: i32)
    -> Result<Vec<PendingDocument>, DbError> {
        pending_documents::table
            .filter(pending_documents::publication_id.eq(publication_id))
            .order(pending_documents::id.asc())
            .get_results::<db::PendingDocument>(dbconn)
            .map(|rows| rows.into_iter()
                .map(PendingDocument::from_db)
                .collect())
    }

    /// Insert a pending row for a publication.
    pub fn create(
        dbconn: &Connection,
        publication_id: i32,
        ident: &Ident,
        kind: ContentType,
        license_accepted: bool,
        roles_accepted: bool,
        metadata: &Value,
        content: Option<&[u8]>,
    ) -> Result<PendingDocument, CreatePendingError> {
        let version = ident.version.ok_or(CreatePendingError::Unversioned)?;

        let data = diesel::insert_into(pending_documents::table)
            .values(&db::NewPendingDocument {
                publication_id,
                uuid: ident.uuid,
                major_version: version.major,
                minor_version: version.minor,
                type_: kind,
                license_accepted,
                roles_accepted,
                metadata,
                content,
            })
            .get_result::<db::PendingDocument>(dbconn)?;

        Ok(PendingDocument { data })
    }

    pub fn ident(&self) -> Ident {
        Ident::new(
            self.data.uuid,
            Version::new(self.data.major_version, self.data.minor_version),
        )
    }

    pub fn kind(&self) -> ContentType {
        self.data.type_
    }

    pub fn is_acceptance_complete(&self) -> bool {
        self.data.license_accepted && self.data.roles_accepted
    }

    /// Parse this row's metadata back into its structured form.
    pub fn metadata(&self) -> Result<Metadata, serde_json::Error> {
        serde_json::from_value(self.data.metadata.clone())
    }

    /// Tree stored in a pending binder's metadata.
    pub fn tree(&self) -> Result<Option<Vec<NodeSpec>>, serde_json::Error> {
        match self.data.metadata.get("tree") {
            Some(tree) => serde_json::from_value(tree.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Re-derive the acceptance flags from the ledger and persist any
    /// change. Returns the new completeness of this document.
    pub fn refresh_acceptance(&mut self, dbconn: &Connection)
    -> Result<bool, RefreshAcceptanceError> {
        let metadata = self.metadata()?;

        let users = metadata.attributed_users();
        let license = Ledger::license_complete(dbconn, self.data.uuid, &users)?;

        let role_pairs: Vec<_> = metadata.roles
            .iter()
            .flat_map(|(&role_type, roles)| roles.iter()
                .map(move |role| (role_type, role.id.as_str())))
            .collect();
        let roles = Ledger::roles_complete(dbconn, self.data.uuid, &role_pairs)?;

        if license != self.data.license_accepted
            || roles != self.data.roles_accepted
        {
            self.data = diesel::update(pending_documents::table
                .filter(pending_documents::id.eq(self.data.id)))
                .set((
                    pending_documents::license_accepted.eq(license),
                    pending_documents::roles_accepted.eq(roles),
                ))
                .get_result::<db::PendingDocument>(dbconn)?;
        }

        Ok(license && roles)
    }

    /// Resources attached to this pending document.
    pub fn resources(&self, dbconn: &Connection)
    -> Result<Vec<db::PendingResource>, DbError> {
        pending_resource_associations::table
            .filter(pending_resource_associations::document_id.eq(self.data.id))
            .inner_join(pending_resources::table)
            .select(pending_resources::all_columns)
            .get_results::<db::PendingResource>(dbconn)
    }

    /// Attach a resource, deduplicating on content hash within the pending
    /// store.
    pub fn attach_resource(
        &self,
        dbconn: &Connection,
        data: &[u8],
        hash: &[u8],
        media_type: &str,
        filename: &str,
    ) -> Result<(), DbError> {
        let existing = pending_resources::table
            .filter(pending_resources::hash.eq(hash))
            .get_result::<db::PendingResource>(dbconn)
            .optional()?;

        let resource_id = match existing {
            Some(resource) => resource.id,
            None => diesel::insert_into(pending_resources::table)
                .values(&db::NewPendingResource {
                    data,
                    hash,
                    media_type,
                    filename,
                })
                .get_result::<db::PendingResource>(dbconn)?
                .id,
        };

        diesel::insert_into(pending_resource_associations::table)
            .values(&db::PendingResourceAssociation {
                document_id: self.data.id,
                resource_id,
            })
            .on_conflict((
                pending_resource_associations::document_id,
                pending_resource_associations::resource_id,
            ))
            .do_nothing()
            .execute(dbconn)?;

        Ok(())
    }

    pub fn into_db(self) -> db::PendingDocument {
        self.data
    }
}

impl std::ops::Deref for PendingDocument {
    type Target = db::PendingDocument;

    fn deref(&self) -> &db::PendingDocument {
        &self.data
    }
}

#[derive(Debug, Fail)]
pub enum CreatePendingError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Pending rows must carry the version they will be committed under.
    #[fail(display = "Cannot create a pending document without a version")]
    Unversioned,
}

impl_from! { for CreatePendingError ;
    DbError => |e| CreatePendingError::Database(e),
}

#[derive(Debug, Fail)]
pub enum RefreshAcceptanceError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Stored metadata doesn't parse back into its structured form.
    #[fail(display = "Malformed metadata: {}", _0)]
    Metadata(#[cause] serde_json::Error),
}

impl_from! { for RefreshAcceptanceError ;
    DbError => |e| RefreshAcceptanceError::Database(e),
    serde_json::Error => |e| RefreshAcceptanceError::Metadata(e),
}
