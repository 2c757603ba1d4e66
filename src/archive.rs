//! In-memory representation of an uploaded publication archive.
//!
//! The archive file format itself is parsed by an external library. This
//! module defines only the shapes that library hands over: a batch of
//! documents and binders with structured metadata, document bodies,
//! embedded references, and attached resources.

use serde::{Deserialize, Serialize};

use std::collections::HashMap;

use crate::db::types::RoleType;

/// A parsed publication archive.
#[derive(Clone, Debug)]
pub struct Archive {
    /// Identifier of the submitting user.
    pub publisher: String,
    /// Message to record on every module committed from this batch.
    pub message: String,
    /// Raw bytes of the uploaded archive, kept for audit.
    pub raw: Vec<u8>,
    /// Top-level packages, in submission order.
    pub packages: Vec<Package>,
    /// Pre-publications are validated and gated but never committed.
    pub is_pre_publication: bool,
}

impl Archive {
    /// Load an archive from its JSON manifest form.
    ///
    /// The manifest carries the same shapes as this module, with document
    /// bodies and resource data as plain strings. It is what the command
    /// line tooling accepts in place of a packaged archive.
    pub fn from_manifest(raw: &[u8]) -> Result<Archive, serde_json::Error> {
        let manifest: manifest::Archive = serde_json::from_slice(raw)?;

        Ok(Archive {
            publisher: manifest.publisher,
            message: manifest.message,
            raw: raw.to_vec(),
            packages: manifest.packages.into_iter().map(Into::into).collect(),
            is_pre_publication: manifest.pre_publication,
        })
    }
}

#[derive(Clone, Debug)]
pub enum Package {
    Document(Document),
    Binder(Binder),
}

/// A single document: metadata, body, and attachments.
#[derive(Clone, Debug)]
pub struct Document {
    pub metadata: Metadata,
    pub content: Vec<u8>,
    /// Hyperlinks and image references embedded in the body.
    pub references: Vec<Reference>,
    pub resources: Vec<Resource>,
}

/// An ordered, tree-shaped grouping of documents.
#[derive(Clone, Debug)]
pub struct Binder {
    pub metadata: Metadata,
    pub nodes: Vec<Node>,
}

/// One node of a binder's table of contents.
#[derive(Clone, Debug)]
pub enum Node {
    /// A document embedded in the archive.
    Document(Document),
    /// A titled sub-grouping with no content of its own.
    Subcollection {
        title: String,
        nodes: Vec<Node>,
    },
    /// A reference to an already-published document, by ident-hash.
    Pointer {
        ident: String,
        title: String,
    },
}

/// A reference embedded in a document body.
#[derive(Clone, Debug)]
pub struct Reference {
    /// Location of the reference within the body.
    pub xpath: String,
    /// Referenced uri, possibly relative to the archive.
    pub target: String,
}

impl Reference {
    /// Whether this reference points inside the archive rather than at an
    /// absolute url.
    pub fn is_relative(&self) -> bool {
        !self.target.contains("://") && !self.target.starts_with('#')
    }
}

/// A file attached to a document.
#[derive(Clone, Debug)]
pub struct Resource {
    pub filename: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Structured metadata of a document or binder.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Metadata {
    pub title: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Identity of the content this was derived from, as an ident-hash.
    #[serde(default)]
    pub derived_from: Option<String>,
    /// Identity this content was previously published under. Revisions carry
    /// one; brand-new content does not.
    #[serde(default)]
    pub archive_uri: Option<String>,
    /// Attributed roles, keyed by role kind.
    #[serde(default)]
    pub roles: HashMap<RoleType, Vec<Role>>,
}

/// A person attributed on content metadata.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Role {
    /// User identifier, interpreted according to `id_type`.
    pub id: String,
    /// Identifier scheme. Only `"cnx-id"` is supported.
    #[serde(rename = "type")]
    pub id_type: String,
    pub name: String,
}

impl Metadata {
    /// All user ids attributed under any role, deduplicated.
    pub fn attributed_users(&self) -> Vec<&str> {
        let mut users: Vec<&str> = self.roles
            .values()
            .flatten()
            .map(|role| role.id.as_str())
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// Role entries under a given key.
    pub fn roles_of(&self, key: RoleType) -> &[Role] {
        self.roles.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn default_language() -> String {
    "en".into()
}

/// Serde shapes of the JSON manifest form.
mod manifest {
    use serde::Deserialize;

    use super::Metadata;

    #[derive(Deserialize)]
    pub struct Archive {
        pub publisher: String,
        pub message: String,
        #[serde(default)]
        pub pre_publication: bool,
        pub packages: Vec<Package>,
    }

    #[derive(Deserialize)]
    #[serde(tag = "kind", rename_all = "lowercase")]
    pub enum Package {
        Document(Document),
        Binder(Binder),
    }

    #[derive(Deserialize)]
    pub struct Document {
        pub metadata: Metadata,
        pub content: String,
        #[serde(default)]
        pub references: Vec<Reference>,
        #[serde(default)]
        pub resources: Vec<Resource>,
    }

    #[derive(Deserialize)]
    pub struct Binder {
        pub metadata: Metadata,
        pub nodes: Vec<Node>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub enum Node {
        Document(Document),
        Subcollection {
            title: String,
            nodes: Vec<Node>,
        },
        Pointer {
            ident: String,
            title: String,
        },
    }

    #[derive(Deserialize)]
    pub struct Reference {
        pub xpath: String,
        pub target: String,
    }

    #[derive(Deserialize)]
    pub struct Resource {
        pub filename: String,
        pub media_type: String,
        pub data: String,
    }

    impl From<Package> for super::Package {
        fn from(package: Package) -> Self {
            match package {
                Package::Document(doc) => super::Package::Document(doc.into()),
                Package::Binder(binder) => super::Package::Binder(binder.into()),
            }
        }
    }

    impl From<Document> for super::Document {
        fn from(doc: Document) -> Self {
            super::Document {
                metadata: doc.metadata,
                content: doc.content.into_bytes(),
                references: doc.references.into_iter().map(Into::into).collect(),
                resources: doc.resources.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl From<Binder> for super::Binder {
        fn from(binder: Binder) -> Self {
            super::Binder {
                metadata: binder.metadata,
                nodes: binder.nodes.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl From<Node> for super::Node {
        fn from(node: Node) -> Self {
            match node {
                Node::Document(doc) => super::Node::Document(doc.into()),
                Node::Subcollection { title, nodes } => super::Node::Subcollection {
                    title,
                    nodes: nodes.into_iter().map(Into::into).collect(),
                },
                Node::Pointer { ident, title } => super::Node::Pointer {
                    ident,
                    title,
                },
            }
        }
    }

    impl From<Reference> for super::Reference {
        fn from(reference: Reference) -> Self {
            super::Reference {
                xpath: reference.xpath,
                target: reference.target,
            }
        }
    }

    impl From<Resource> for super::Resource {
        fn from(resource: Resource) -> Self {
            super::Resource {
                filename: resource.filename,
                media_type: resource.media_type,
                data: resource.data.into_bytes(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_references() {
        let absolute = Reference {
            xpath: "/html/body/a[1]".into(),
            target: "https://example.com/page".into(),
        };
        let fragment = Reference {
            xpath: "/html/body/a[2]".into(),
            target: "#section-2".into(),
        };
        let relative = Reference {
            xpath: "/html/body/img[1]".into(),
            target: "figure-1.png".into(),
        };

        assert!(!absolute.is_relative());
        assert!(!fragment.is_relative());
        assert!(relative.is_relative());
    }

    #[test]
    fn manifest_deserializes_mixed_packages() {
        let raw = br#"{
            "publisher": "user1",
            "message": "initial publication",
            "packages": [
                {
                    "kind": "document",
                    "metadata": {
                        "title": "Physics",
                        "license_url": "http://creativecommons.org/licenses/by/4.0/"
                    },
                    "content": "<html/>"
                },
                {
                    "kind": "binder",
                    "metadata": { "title": "Book" },
                    "nodes": [
                        { "title": "Part 1", "nodes": [] },
                        { "ident": "00000000-0000-0000-0000-000000000001@1",
                          "title": "Pinned chapter" }
                    ]
                }
            ]
        }"#;

        let archive = Archive::from_manifest(raw).unwrap();

        assert_eq!(archive.publisher, "user1");
        assert!(!archive.is_pre_publication);
        assert_eq!(archive.packages.len(), 2);

        match archive.packages[0] {
            Package::Document(ref doc) => {
                assert_eq!(doc.metadata.title, "Physics");
                assert_eq!(doc.metadata.language, "en");
                assert_eq!(doc.content, b"<html/>");
            }
            _ => panic!("expected a document"),
        }

        match archive.packages[1] {
            Package::Binder(ref binder) => {
                assert_eq!(binder.nodes.len(), 2);
                match binder.nodes[1] {
                    Node::Pointer { ref ident, .. } => assert!(
                        ident.ends_with("@1")),
                    _ => panic!("expected a pointer"),
                }
            }
            _ => panic!("expected a binder"),
        }
    }

    #[test]
    fn attributed_users_deduplicate() {
        let mut roles = HashMap::new();
        roles.insert(RoleType::Authors, vec![
            Role {
                id: "user1".into(),
                id_type: "cnx-id".into(),
                name: "User One".into(),
            },
        ]);
        roles.insert(RoleType::Publishers, vec![
            Role {
                id: "user1".into(),
                id_type: "cnx-id".into(),
                name: "User One".into(),
            },
            Role {
                id: "user2".into(),
                id_type: "cnx-id".into(),
                name: "User Two".into(),
            },
        ]);

        let metadata = Metadata {
            title: "Physics".into(),
            roles,
            .. Metadata::default()
        };

        assert_eq!(metadata.attributed_users(), vec!["user1", "user2"]);
    }
}
