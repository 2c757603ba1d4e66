use serde_json::{Value, json};
use uuid::Uuid;

use crate::db::types::RoleType;

pub use bindery_macros::PublicationCode;

/// Numeric wire code and type name of a recoverable publication error.
///
/// Client tooling branches on `code`/`type` in a publication's state
/// messages, so both are part of the public contract and must stay stable.
pub trait PublicationCode {
    fn code(&self) -> i32;
    fn kind(&self) -> &'static str;
}

/// A recoverable failure found while validating one pending document.
///
/// These never abort the batch. They are accumulated per document and
/// recorded on the owning publication, in the order found.
#[derive(Clone, Debug, Fail, PartialEq, PublicationCode)]
pub enum PublicationError {
    /// Publisher lacks publish permission on an existing uuid.
    #[fail(display = "Not allowed to publish {}", uuid)]
    #[publication(code = 8)]
    NotAllowed { uuid: Uuid },
    /// A required metadata key is absent or empty.
    #[fail(display = "Required metadata {:?} is missing", key)]
    #[publication(code = 9)]
    MissingRequiredMetadata { key: &'static str },
    /// License url is unknown, or the license is closed to new publications.
    #[fail(display = "Invalid license: {}", value)]
    #[publication(code = 10)]
    InvalidLicense { value: String },
    /// An attributed role entry uses an unsupported identifier type.
    #[fail(display = "Invalid role for {}: {}", key, value)]
    #[publication(code = 11)]
    InvalidRole { key: RoleType, value: Value },
    /// Metadata value fails a vocabulary or resolution check.
    #[fail(display = "Invalid value for {:?}: {}", key, value)]
    #[publication(code = 12)]
    InvalidMetadata { key: &'static str, value: Value },
    /// A relative reference inside document content doesn't resolve.
    #[fail(display = "Invalid reference at {}: {}", xpath, value)]
    #[publication(code = 20)]
    InvalidReference { xpath: String, value: String },
    /// A binder's pointer to an already-published document is unusable.
    #[fail(
        display = "Invalid document pointer: {} (exists: {}, document: {})",
        ident, exists, is_document
    )]
    #[publication(code = 21)]
    InvalidDocumentPointer {
        ident: String,
        exists: bool,
        is_document: bool,
    },
    /// An attached resource exceeds the configured size limit.
    #[fail(display = "Resource {:?} is too large", filename)]
    #[publication(code = 22)]
    ResourceTooLarge { filename: String },
}

impl PublicationError {
    /// Render this error as a structured state message record.
    pub fn to_message(&self) -> Value {
        let mut message = json!({
            "code": self.code(),
            "type": self.kind(),
            "message": self.to_string(),
        });

        let payload = match *self {
            PublicationError::NotAllowed { uuid } => json!({
                "uuid": uuid,
            }),
            PublicationError::MissingRequiredMetadata { key } => json!({
                "key": key,
            }),
            PublicationError::InvalidLicense { ref value } => json!({
                "value": value,
            }),
            PublicationError::InvalidRole { key, ref value } => json!({
                "key": key,
                "value": value,
            }),
            PublicationError::InvalidMetadata { key, ref value } => json!({
                "key": key,
                "value": value,
            }),
            PublicationError::InvalidReference { ref xpath, ref value } => json!({
                "xpath": xpath,
                "value": value,
            }),
            PublicationError::InvalidDocumentPointer {
                ref ident, exists, is_document,
            } => json!({
                "ident_hash": ident,
                "exists": exists,
                "is_document": is_document,
            }),
            PublicationError::ResourceTooLarge { ref filename } => json!({
                "filename": filename,
            }),
        };

        message.as_object_mut()
            .unwrap()
            .extend(payload.as_object().unwrap().clone());

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_contract() {
        let uuid = Uuid::nil();

        let cases: Vec<(PublicationError, i32, &str)> = vec![
            (PublicationError::NotAllowed { uuid }, 8, "NotAllowed"),
            (
                PublicationError::MissingRequiredMetadata { key: "license_url" },
                9,
                "MissingRequiredMetadata",
            ),
            (
                PublicationError::InvalidLicense { value: "x".into() },
                10,
                "InvalidLicense",
            ),
            (
                PublicationError::InvalidRole {
                    key: RoleType::Authors,
                    value: json!({"id": 0}),
                },
                11,
                "InvalidRole",
            ),
            (
                PublicationError::InvalidMetadata {
                    key: "subjects",
                    value: json!(["Alchemy"]),
                },
                12,
                "InvalidMetadata",
            ),
            (
                PublicationError::InvalidReference {
                    xpath: "//img".into(),
                    value: "missing.png".into(),
                },
                20,
                "InvalidReference",
            ),
            (
                PublicationError::InvalidDocumentPointer {
                    ident: uuid.to_string(),
                    exists: false,
                    is_document: false,
                },
                21,
                "InvalidDocumentPointer",
            ),
            (
                PublicationError::ResourceTooLarge { filename: "a.png".into() },
                22,
                "ResourceTooLarge",
            ),
        ];

        for (error, code, kind) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn message_carries_code_and_payload() {
        let message = PublicationError::InvalidLicense {
            value: "http://example.com/no-such-license".into(),
        }.to_message();

        assert_eq!(message["code"], 10);
        assert_eq!(message["type"], "InvalidLicense");
        assert_eq!(message["value"], "http://example.com/no-such-license");
        assert!(message["message"].is_string());
    }
}
