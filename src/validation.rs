//! Metadata checks run against every pending document before it may
//! commit.
//!
//! Each check is a pure function over the metadata and a lookup table, so
//! the rules are testable without a database. Failures are accumulated,
//! never short-circuited; the full list is recorded on the owning
//! publication.

use diesel::{prelude::*, result::Error as DbError};
use serde_json::json;
use uuid::Uuid;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::archive::Metadata;
use crate::cache::Cache;
use crate::db::{
    Connection,
    models as db,
    schema::{licenses, subjects},
    types::RoleType,
};
use crate::errors::PublicationError;
use crate::models::{Ident, module::Module};

/// Identifier scheme accepted in role entries.
const SUPPORTED_ROLE_ID_TYPE: &str = "cnx-id";

/// How long license and vocabulary lookups stay cached.
const TABLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Validates pending metadata against the controlled tables.
///
/// Owns the caches over those tables; pass it by reference to whoever runs
/// intake.
pub struct Validator {
    licenses: Cache<(), HashMap<String, bool>>,
    subjects: Cache<(), HashSet<String>>,
}

impl Validator {
    pub fn new() -> Validator {
        Validator {
            licenses: Cache::new(TABLE_TTL),
            subjects: Cache::new(TABLE_TTL),
        }
    }

    /// Run every metadata check, returning all failures in order.
    pub fn validate(&mut self, dbconn: &Connection, metadata: &Metadata)
    -> Result<Vec<PublicationError>, DbError> {
        let mut errors = check_required_fields(metadata);

        let known_licenses = self.licenses.get_or_try_fill((), || {
            licenses::table
                .get_results::<db::License>(dbconn)
                .map(|rows| rows.into_iter()
                    .map(|row| (row.url, row.is_valid_for_publication))
                    .collect())
        })?;
        errors.extend(check_license(
            metadata.license_url.as_ref().map(String::as_str),
            known_licenses,
        ));

        errors.extend(check_roles(metadata));

        let vocabulary = self.subjects.get_or_try_fill((), || {
            subjects::table
                .select(subjects::name)
                .get_results::<String>(dbconn)
                .map(|names| names.into_iter().collect())
        })?;
        errors.extend(check_subjects(&metadata.subjects, vocabulary));

        if let Some(ref derived) = metadata.derived_from {
            errors.extend(check_derived_from(dbconn, derived)?);
        }

        Ok(errors)
    }
}

/// Title and summary must both be present and non-empty.
pub fn check_required_fields(metadata: &Metadata) -> Vec<PublicationError> {
    let mut errors = Vec::new();

    if metadata.title.is_empty() {
        errors.push(PublicationError::MissingRequiredMetadata {
            key: "title",
        });
    }

    match metadata.summary {
        Some(ref summary) if !summary.is_empty() => (),
        _ => errors.push(PublicationError::MissingRequiredMetadata {
            key: "summary",
        }),
    }

    errors
}

/// The license must be present, known, and open for new publications.
pub fn check_license(
    license_url: Option<&str>,
    known: &HashMap<String, bool>,
) -> Option<PublicationError> {
    let url = match license_url {
        Some(url) if !url.is_empty() => url,
        _ => return Some(PublicationError::MissingRequiredMetadata {
            key: "license_url",
        }),
    };

    match known.get(url) {
        Some(true) => None,
        _ => Some(PublicationError::InvalidLicense { value: url.to_string() }),
    }
}

/// Authors and publishers must be non-empty, and every role entry must use
/// the supported identifier scheme.
pub fn check_roles(metadata: &Metadata) -> Vec<PublicationError> {
    let mut errors = Vec::new();

    if metadata.roles_of(RoleType::Authors).is_empty() {
        errors.push(PublicationError::MissingRequiredMetadata {
            key: "authors",
        });
    }

    if metadata.roles_of(RoleType::Publishers).is_empty() {
        errors.push(PublicationError::MissingRequiredMetadata {
            key: "publishers",
        });
    }

    for &key in &RoleType::ALL {
        for role in metadata.roles_of(key) {
            if role.id_type != SUPPORTED_ROLE_ID_TYPE {
                errors.push(PublicationError::InvalidRole {
                    key,
                    value: json!(role),
                });
            }
        }
    }

    errors
}

/// Every subject tag must come from the controlled vocabulary. Reported as
/// one error carrying the full offending subset.
pub fn check_subjects(
    tags: &[String],
    vocabulary: &HashSet<String>,
) -> Option<PublicationError> {
    let offending: Vec<&String> = tags.iter()
        .filter(|tag| !vocabulary.contains(*tag))
        .collect();

    if offending.is_empty() {
        None
    } else {
        Some(PublicationError::InvalidMetadata {
            key: "subjects",
            value: json!(offending),
        })
    }
}

/// A derivation must point at content that actually exists, possibly at a
/// non-latest version.
pub fn check_derived_from(dbconn: &Connection, derived: &str)
-> Result<Option<PublicationError>, DbError> {
    let ident: Ident = match derived.parse() {
        Ok(ident) => ident,
        Err(_) => return Ok(Some(PublicationError::InvalidMetadata {
            key: "derived_from",
            value: json!(derived),
        })),
    };

    match Module::by_ident(dbconn, &ident) {
        Ok(_) => Ok(None),
        Err(crate::models::module::FindModuleError::NotFound) =>
            Ok(Some(PublicationError::InvalidMetadata {
                key: "derived_from",
                value: json!(derived),
            })),
        Err(crate::models::module::FindModuleError::Database(e)) => Err(e),
    }
}

/// Revisions of content that has an ACL require the publisher to hold the
/// publish permission. Content with no ACL is open.
pub fn check_permission(
    uuid: Uuid,
    has_acl: bool,
    publisher_has_permission: bool,
) -> Option<PublicationError> {
    if has_acl && !publisher_has_permission {
        Some(PublicationError::NotAllowed { uuid })
    } else {
        None
    }
}

/// A binder may point at already-published documents instead of embedding
/// them. The pointer must resolve, and must name a document; an exact
/// version is required except when tracking the latest version of a
/// document.
pub fn check_document_pointer(
    ident: &str,
    resolved: Option<crate::db::types::ContentType>,
) -> Option<PublicationError> {
    use crate::db::types::ContentType;

    match resolved {
        Some(ContentType::Document) => None,
        Some(ContentType::Binder) => Some(
            PublicationError::InvalidDocumentPointer {
                ident: ident.to_string(),
                exists: true,
                is_document: false,
            },
        ),
        None => Some(PublicationError::InvalidDocumentPointer {
            ident: ident.to_string(),
            exists: false,
            is_document: false,
        }),
    }
}

/// Attached resources may not exceed the configured size limit.
pub fn check_resource_size(filename: &str, size: usize, limit: usize)
-> Option<PublicationError> {
    if size > limit {
        Some(PublicationError::ResourceTooLarge {
            filename: filename.to_string(),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Role;

    fn metadata_with_roles(roles: &[(RoleType, &str, &str)]) -> Metadata {
        let mut metadata = Metadata::default();
        for &(key, id, id_type) in roles {
            metadata.roles.entry(key).or_insert_with(Vec::new).push(Role {
                id: id.into(),
                id_type: id_type.into(),
                name: id.into(),
            });
        }
        metadata
    }

    fn licenses() -> HashMap<String, bool> {
        let mut known = HashMap::new();
        known.insert("http://creativecommons.org/licenses/by/4.0/".into(), true);
        known.insert("http://creativecommons.org/licenses/by/1.0".into(), false);
        known
    }

    #[test]
    fn title_and_summary_are_required() {
        let errors = check_required_fields(&Metadata::default());
        assert_eq!(errors, vec![
            PublicationError::MissingRequiredMetadata { key: "title" },
            PublicationError::MissingRequiredMetadata { key: "summary" },
        ]);

        // An empty summary is as absent as no summary at all.
        let metadata = Metadata {
            title: "Physics".into(),
            summary: Some(String::new()),
            .. Metadata::default()
        };
        assert_eq!(check_required_fields(&metadata), vec![
            PublicationError::MissingRequiredMetadata { key: "summary" },
        ]);
    }

    #[test]
    fn present_title_and_summary_pass() {
        let metadata = Metadata {
            title: "Physics".into(),
            summary: Some("An introduction.".into()),
            .. Metadata::default()
        };
        assert!(check_required_fields(&metadata).is_empty());
    }

    #[test]
    fn missing_license_is_code_9() {
        let error = check_license(None, &licenses()).unwrap();
        assert_eq!(
            error,
            PublicationError::MissingRequiredMetadata { key: "license_url" },
        );
    }

    #[test]
    fn unknown_license_is_invalid() {
        let error = check_license(
            Some("http://example.com/no-such-license"),
            &licenses(),
        ).unwrap();
        match error {
            PublicationError::InvalidLicense { .. } => (),
            other => panic!("expected InvalidLicense, got {:?}", other),
        }
    }

    #[test]
    fn closed_license_is_invalid() {
        // Known, but not valid for new publications.
        let error = check_license(
            Some("http://creativecommons.org/licenses/by/1.0"),
            &licenses(),
        ).unwrap();
        match error {
            PublicationError::InvalidLicense { .. } => (),
            other => panic!("expected InvalidLicense, got {:?}", other),
        }
    }

    #[test]
    fn valid_license_passes() {
        assert_eq!(
            check_license(
                Some("http://creativecommons.org/licenses/by/4.0/"),
                &licenses(),
            ),
            None,
        );
    }

    #[test]
    fn authors_and_publishers_are_required() {
        let errors = check_roles(&Metadata::default());
        assert_eq!(errors, vec![
            PublicationError::MissingRequiredMetadata { key: "authors" },
            PublicationError::MissingRequiredMetadata { key: "publishers" },
        ]);
    }

    #[test]
    fn unsupported_role_id_type_is_invalid() {
        let metadata = metadata_with_roles(&[
            (RoleType::Authors, "alice", "cnx-id"),
            (RoleType::Publishers, "bob", "orcid"),
        ]);

        let errors = check_roles(&metadata);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            PublicationError::InvalidRole { key, .. } =>
                assert_eq!(*key, RoleType::Publishers),
            other => panic!("expected InvalidRole, got {:?}", other),
        }
    }

    #[test]
    fn supported_roles_pass() {
        let metadata = metadata_with_roles(&[
            (RoleType::Authors, "alice", "cnx-id"),
            (RoleType::Publishers, "bob", "cnx-id"),
        ]);
        assert!(check_roles(&metadata).is_empty());
    }

    #[test]
    fn subjects_outside_vocabulary_are_reported_together() {
        let vocabulary: HashSet<String> =
            ["Arts", "Science and Technology"]
                .iter()
                .map(|s| s.to_string())
                .collect();

        let tags = vec![
            "Arts".to_string(),
            "Alchemy".to_string(),
            "Phrenology".to_string(),
        ];

        let error = check_subjects(&tags, &vocabulary).unwrap();
        match error {
            PublicationError::InvalidMetadata { key, value } => {
                assert_eq!(key, "subjects");
                assert_eq!(value, json!(["Alchemy", "Phrenology"]));
            }
            other => panic!("expected InvalidMetadata, got {:?}", other),
        }
    }

    #[test]
    fn vocabulary_subjects_pass() {
        let vocabulary: HashSet<String> =
            ["Arts"].iter().map(|s| s.to_string()).collect();
        assert_eq!(check_subjects(&["Arts".to_string()], &vocabulary), None);
    }

    #[test]
    fn permission_applies_only_to_acl_guarded_content() {
        let uuid = Uuid::nil();

        // Brand-new content has no ACL yet and is allowed.
        assert_eq!(check_permission(uuid, false, false), None);
        assert_eq!(check_permission(uuid, true, true), None);
        assert_eq!(
            check_permission(uuid, true, false),
            Some(PublicationError::NotAllowed { uuid }),
        );
    }

    #[test]
    fn pointers_must_name_existing_documents() {
        use crate::db::types::ContentType;

        assert_eq!(
            check_document_pointer("a@1", Some(ContentType::Document)),
            None,
        );

        match check_document_pointer("a@1.1", Some(ContentType::Binder)) {
            Some(PublicationError::InvalidDocumentPointer {
                exists: true,
                is_document: false,
                ..
            }) => (),
            other => panic!("expected pointer error, got {:?}", other),
        }

        match check_document_pointer("a@1", None) {
            Some(PublicationError::InvalidDocumentPointer {
                exists: false, ..
            }) => (),
            other => panic!("expected pointer error, got {:?}", other),
        }
    }

    #[test]
    fn oversized_resources_are_rejected() {
        assert_eq!(check_resource_size("small.png", 512, 1024), None);
        assert_eq!(
            check_resource_size("big.png", 2048, 1024),
            Some(PublicationError::ResourceTooLarge {
                filename: "big.png".into(),
            }),
        );
    }
}
