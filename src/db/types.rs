use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

use std::fmt;

/// State of a publication batch.
///
/// A freshly submitted publication has no explicit state (`Pending` is only
/// what a NULL column reads back as); the first poke assigns one.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Publication_state"]
pub enum PublicationState {
    /// Submitted, not yet poked.
    #[db_rename = "Pending"]
    Pending,
    /// Commit in progress. Guards against re-entrant commits.
    #[db_rename = "Publishing"]
    Publishing,
    /// At least one pending document has an outstanding license or role
    /// acceptance.
    #[db_rename = "Waiting for acceptance"]
    WaitingForAcceptance,
    /// All acceptances are in, but the publisher has not been vetted yet.
    #[db_rename = "Waiting for moderation"]
    WaitingForModeration,
    /// A moderator rejected the batch.
    #[db_rename = "Rejected"]
    Rejected,
    /// The commit raised an error.
    #[db_rename = "Failed/Error"]
    Failed,
    /// Committed (or accepted, for pre-publications).
    #[db_rename = "Done/Success"]
    Done,
}

impl PublicationState {
    /// States from which a poke must return without doing anything. A
    /// batch mid-commit is settled for poking purposes but not terminal.
    pub fn is_settled(self) -> bool {
        self == PublicationState::Publishing || self.is_terminal()
    }

    /// States no poke or moderation can ever leave.
    pub fn is_terminal(self) -> bool {
        match self {
            PublicationState::Rejected
            | PublicationState::Failed
            | PublicationState::Done => true,
            _ => false,
        }
    }
}

impl fmt::Display for PublicationState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            PublicationState::Pending => "Pending",
            PublicationState::Publishing => "Publishing",
            PublicationState::WaitingForAcceptance => "Waiting for acceptance",
            PublicationState::WaitingForModeration => "Waiting for moderation",
            PublicationState::Rejected => "Rejected",
            PublicationState::Failed => "Failed/Error",
            PublicationState::Done => "Done/Success",
        })
    }
}

/// Kind of a piece of content, pending or committed.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Content_type"]
pub enum ContentType {
    #[db_rename = "Document"]
    Document,
    #[db_rename = "Binder"]
    Binder,
}

impl fmt::Display for ContentType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            ContentType::Document => "Document",
            ContentType::Binder => "Binder",
        })
    }
}

/// Lifecycle state of a committed module.
///
/// Documents are `current` from the moment they are written. Binders start
/// as `post-publication` and become `current` once baking succeeds.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Module_state"]
pub enum ModuleState {
    #[db_rename = "current"]
    Current,
    #[db_rename = "post-publication"]
    PostPublication,
    #[db_rename = "processing"]
    Processing,
    #[db_rename = "errored"]
    Errored,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            ModuleState::Current => "current",
            ModuleState::PostPublication => "post-publication",
            ModuleState::Processing => "processing",
            ModuleState::Errored => "errored",
        })
    }
}

/// An attributed role on a piece of content's metadata.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Role_type"]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    #[db_rename = "authors"]
    Authors,
    #[db_rename = "copyright_holders"]
    CopyrightHolders,
    #[db_rename = "editors"]
    Editors,
    #[db_rename = "illustrators"]
    Illustrators,
    #[db_rename = "publishers"]
    Publishers,
    #[db_rename = "translators"]
    Translators,
}

impl RoleType {
    /// All role keys, in the order they are reported in metadata.
    pub const ALL: [RoleType; 6] = [
        RoleType::Authors,
        RoleType::CopyrightHolders,
        RoleType::Editors,
        RoleType::Illustrators,
        RoleType::Publishers,
        RoleType::Translators,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoleType::Authors => "authors",
            RoleType::CopyrightHolders => "copyright_holders",
            RoleType::Editors => "editors",
            RoleType::Illustrators => "illustrators",
            RoleType::Publishers => "publishers",
            RoleType::Translators => "translators",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoleType {
    type Err = ParseRoleTypeError;

    fn from_str(s: &str) -> Result<RoleType, ParseRoleTypeError> {
        RoleType::ALL.iter()
            .cloned()
            .find(|role| role.as_str() == s)
            .ok_or(ParseRoleTypeError)
    }
}

#[derive(Clone, Copy, Debug, Eq, Fail, PartialEq)]
#[fail(display = "Unknown role type")]
pub struct ParseRoleTypeError;

/// Per-uuid access control entry kind.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Permission_type"]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    #[db_rename = "publish"]
    Publish,
}

impl fmt::Display for PermissionType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            PermissionType::Publish => "publish",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_keys_parse_round_trip() {
        for &role in &RoleType::ALL {
            assert_eq!(role.as_str().parse::<RoleType>().unwrap(), role);
        }
        assert!("reviewers".parse::<RoleType>().is_err());
    }

    #[test]
    fn publishing_is_settled_but_not_terminal() {
        assert!(PublicationState::Publishing.is_settled());
        assert!(!PublicationState::Publishing.is_terminal());

        assert!(PublicationState::Done.is_settled());
        assert!(PublicationState::Done.is_terminal());

        assert!(!PublicationState::Pending.is_settled());
        assert!(!PublicationState::WaitingForAcceptance.is_settled());
    }
}
