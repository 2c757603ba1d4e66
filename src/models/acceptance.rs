use diesel::{prelude::*, result::Error as DbError};
use uuid::Uuid;

use crate::db::{
    Connection,
    models as db,
    schema::{document_acl, license_acceptances, role_acceptances},
    types::{PermissionType, RoleType},
};

/// The per-uuid acceptance ledger.
///
/// Entries are scoped to a content uuid, never to a publication: a user who
/// accepted the license for some content stays accepted across all later
/// republications of it. Records may exist before the uuid is ever
/// published.
pub struct Ledger;

impl Ledger {
    /// Ask users to accept the license of a uuid. Users already asked keep
    /// whatever answer they gave.
    pub fn request_license(conn: &Connection, uuid: Uuid, users: &[&str])
    -> Result<(), DbError> {
        let rows: Vec<db::LicenseAcceptance> = users.iter()
            .map(|user| db::LicenseAcceptance {
                uuid,
                user_id: (*user).to_string(),
                accepted: None,
            })
            .collect();

        diesel::insert_into(license_acceptances::table)
            .values(&rows)
            .on_conflict((
                license_acceptances::uuid,
                license_acceptances::user_id,
            ))
            .do_nothing()
            .execute(conn)?;

        Ok(())
    }

    /// Ask users to accept their role attributions on a uuid.
    pub fn request_roles(
        conn: &Connection,
        uuid: Uuid,
        roles: &[(RoleType, &str)],
    ) -> Result<(), DbError> {
        let rows: Vec<db::RoleAcceptance> = roles.iter()
            .map(|&(role_type, user)| db::RoleAcceptance {
                uuid,
                user_id: user.to_string(),
                role_type,
                accepted: None,
            })
            .collect();

        diesel::insert_into(role_acceptances::table)
            .values(&rows)
            .on_conflict((
                role_acceptances::uuid,
                role_acceptances::user_id,
                role_acceptances::role_type,
            ))
            .do_nothing()
            .execute(conn)?;

        Ok(())
    }

    /// Record a user's answer to a license request.
    pub fn accept_license(
        conn: &Connection,
        uuid: Uuid,
        user: &str,
        accepted: bool,
    ) -> Result<(), DbError> {
        diesel::insert_into(license_acceptances::table)
            .values(&db::LicenseAcceptance {
                uuid,
                user_id: user.to_string(),
                accepted: Some(accepted),
            })
            .on_conflict((
                license_acceptances::uuid,
                license_acceptances::user_id,
            ))
            .do_update()
            .set(license_acceptances::accepted.eq(accepted))
            .execute(conn)?;

        Ok(())
    }

    /// Record a user's answer to a role attribution request.
    pub fn accept_role(
        conn: &Connection,
        uuid: Uuid,
        user: &str,
        role_type: RoleType,
        accepted: bool,
    ) -> Result<(), DbError> {
        diesel::insert_into(role_acceptances::table)
            .values(&db::RoleAcceptance {
                uuid,
                user_id: user.to_string(),
                role_type,
                accepted: Some(accepted),
            })
            .on_conflict((
                role_acceptances::uuid,
                role_acceptances::user_id,
                role_acceptances::role_type,
            ))
            .do_update()
            .set(role_acceptances::accepted.eq(accepted))
            .execute(conn)?;

        Ok(())
    }

    /// Drop a user's license request for a uuid.
    pub fn remove_license(conn: &Connection, uuid: Uuid, user: &str)
    -> Result<(), DbError> {
        diesel::delete(license_acceptances::table
            .filter(license_acceptances::uuid.eq(uuid))
            .filter(license_acceptances::user_id.eq(user)))
            .execute(conn)?;
        Ok(())
    }

    /// Whether every listed user has accepted the license for a uuid.
    pub fn license_complete(conn: &Connection, uuid: Uuid, users: &[&str])
    -> Result<bool, DbError> {
        if users.is_empty() {
            return Ok(true);
        }

        let states = license_acceptances::table
            .filter(license_acceptances::uuid.eq(uuid))
            .filter(license_acceptances::user_id
                .eq_any(users.iter().map(|u| u.to_string())))
            .select(license_acceptances::accepted)
            .get_results::<Option<bool>>(conn)?;

        Ok(states.len() == users.len() && all_accepted(states))
    }

    /// Whether every listed role attribution on a uuid has been accepted.
    pub fn roles_complete(
        conn: &Connection,
        uuid: Uuid,
        roles: &[(RoleType, &str)],
    ) -> Result<bool, DbError> {
        if roles.is_empty() {
            return Ok(true);
        }

        let mut count = 0;

        for &(role_type, user) in roles {
            let state = role_acceptances::table
                .filter(role_acceptances::uuid.eq(uuid))
                .filter(role_acceptances::user_id.eq(user))
                .filter(role_acceptances::role_type.eq(role_type))
                .select(role_acceptances::accepted)
                .get_result::<Option<bool>>(conn)
                .optional()?;

            match state {
                Some(Some(true)) => count += 1,
                _ => return Ok(false),
            }
        }

        Ok(count == roles.len())
    }
}

/// Access control entries attached to a content uuid.
pub struct Acl;

impl Acl {
    /// Grant a permission, idempotently.
    pub fn grant(
        conn: &Connection,
        uuid: Uuid,
        user: &str,
        permission: PermissionType,
    ) -> Result<(), DbError> {
        diesel::insert_into(document_acl::table)
            .values(&db::AclEntry {
                uuid,
                user_id: user.to_string(),
                permission,
            })
            .on_conflict((
                document_acl::uuid,
                document_acl::user_id,
                document_acl::permission,
            ))
            .do_nothing()
            .execute(conn)?;

        Ok(())
    }

    pub fn revoke(
        conn: &Connection,
        uuid: Uuid,
        user: &str,
        permission: PermissionType,
    ) -> Result<(), DbError> {
        diesel::delete(document_acl::table
            .filter(document_acl::uuid.eq(uuid))
            .filter(document_acl::user_id.eq(user))
            .filter(document_acl::permission.eq(permission)))
            .execute(conn)?;
        Ok(())
    }

    pub fn has_permission(
        conn: &Connection,
        user: &str,
        permission: PermissionType,
        uuid: Uuid,
    ) -> Result<bool, DbError> {
        let count: i64 = document_acl::table
            .filter(document_acl::uuid.eq(uuid))
            .filter(document_acl::user_id.eq(user))
            .filter(document_acl::permission.eq(permission))
            .count()
            .get_result(conn)?;
        Ok(count > 0)
    }

    /// Whether a uuid has any entries at all. Content with no ACL is open
    /// to any publisher (it predates or bypasses access control).
    pub fn exists_for(conn: &Connection, uuid: Uuid) -> Result<bool, DbError> {
        let count: i64 = document_acl::table
            .filter(document_acl::uuid.eq(uuid))
            .count()
            .get_result(conn)?;
        Ok(count > 0)
    }
}

/// An acceptance set is complete only when every answer is an explicit yes.
/// Unanswered requests and refusals both count as incomplete.
pub fn all_accepted<I>(states: I) -> bool
where
    I: IntoIterator<Item = Option<bool>>,
{
    states.into_iter().all(|state| state == Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_complete() {
        assert!(all_accepted(vec![]));
    }

    #[test]
    fn unanswered_requests_are_incomplete() {
        assert!(!all_accepted(vec![Some(true), None]));
    }

    #[test]
    fn refusals_are_incomplete() {
        assert!(!all_accepted(vec![Some(true), Some(false)]));
    }

    #[test]
    fn all_yes_is_complete() {
        assert!(all_accepted(vec![Some(true), Some(true)]));
    }
}
