use chrono::Utc;
use diesel::{
    Connection as _Connection,
    prelude::*,
    result::Error as DbError,
};
use failure::Fail;
use serde_json::Value;
use uuid::Uuid;

use crate::db::{
    Connection,
    models as db,
    schema::{document_controls, module_keywords, modules},
    types::{ContentType, ModuleState},
};
use super::ident::{Ident, Version};

/// A committed version of a document or binder in the versioned store.
#[derive(Debug)]
pub struct Module {
    data: db::Module,
}

impl Module {
    pub(crate) fn from_db(data: db::Module) -> Module {
        Module { data }
    }

    /// Find a module by identity. An unversioned identity resolves to the
    /// latest version of the uuid.
    pub fn by_ident(dbconn: &Connection, ident: &Ident)
    -> Result<Module, FindModuleError> {
        match ident.version {
            Some(version) => {
                let query = modules::table
                    .filter(modules::uuid.eq(ident.uuid))
                    .filter(modules::major_version.eq(version.major));

                match version.minor {
                    Some(minor) => query
                        .filter(modules::minor_version.eq(minor))
                        .get_result::<db::Module>(dbconn),
                    None => query
                        .filter(modules::minor_version.is_null())
                        .get_result::<db::Module>(dbconn),
                }
            }
            None => modules::table
                .filter(modules::uuid.eq(ident.uuid))
                .order((
                    modules::major_version.desc(),
                    modules::minor_version.desc(),
                ))
                .first::<db::Module>(dbconn),
        }
            .optional()?
            .ok_or(FindModuleError::NotFound)
            .map(Module::from_db)
    }

    /// Find a module by its surrogate key.
    pub fn by_module_ident(dbconn: &Connection, module_ident: i32)
    -> Result<Module, FindModuleError> {
        modules::table
            .filter(modules::module_ident.eq(module_ident))
            .get_result::<db::Module>(dbconn)
            .optional()?
            .ok_or(FindModuleError::NotFound)
            .map(Module::from_db)
    }

    /// Find the latest committed version of a uuid, if any.
    pub fn latest(dbconn: &Connection, uuid: Uuid)
    -> Result<Option<Module>, DbError> {
        modules::table
            .filter(modules::uuid.eq(uuid))
            .order((
                modules::major_version.desc(),
                modules::minor_version.desc(),
            ))
            .first::<db::Module>(dbconn)
            .optional()
            .map(|data| data.map(Module::from_db))
    }

    /// Whether any version exists for a uuid.
    pub fn any_version_exists(dbconn: &Connection, uuid: Uuid)
    -> Result<bool, DbError> {
        let count: i64 = modules::table
            .filter(modules::uuid.eq(uuid))
            .count()
            .get_result(dbconn)?;
        Ok(count > 0)
    }

    /// Compute the version the next publication of `uuid` should use,
    /// holding the uuid's identity row locked so concurrent computations
    /// serialize.
    pub fn next_version(
        dbconn: &Connection,
        uuid: Uuid,
        kind: ContentType,
        minor_bump: bool,
    ) -> Result<Version, DbError> {
        document_controls::table
            .filter(document_controls::uuid.eq(uuid))
            .for_update()
            .get_result::<db::DocumentControl>(dbconn)?;

        let history = modules::table
            .filter(modules::uuid.eq(uuid))
            .select((modules::major_version, modules::minor_version))
            .get_results::<(i32, Option<i32>)>(dbconn)?;

        Ok(next_version_from(&history, kind, minor_bump))
    }

    /// Insert a new module row.
    pub fn create(
        dbconn: &Connection,
        ident: &Ident,
        kind: ContentType,
        metadata: &Value,
        publisher: &str,
        message: Option<&str>,
        state: ModuleState,
    ) -> Result<Module, CreateModuleError> {
        let version = ident.version.ok_or(CreateModuleError::Unversioned)?;

        let title = metadata.get("title")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let language = metadata.get("language")
            .and_then(Value::as_str)
            .unwrap_or("en")
            .to_string();

        let data = diesel::insert_into(modules::table)
            .values(&db::NewModule {
                uuid: ident.uuid,
                major_version: version.major,
                minor_version: version.minor,
                type_: kind,
                title: &title,
                language: &language,
                metadata,
                publisher,
                publication_message: message,
                state,
            })
            .get_result::<db::Module>(dbconn)?;

        Ok(Module { data })
    }

    /// Clone this module's row under a new version, keyword associations
    /// included. Used by the republication cascade.
    pub fn clone_as(
        &self,
        dbconn: &Connection,
        version: Version,
        metadata: &Value,
    ) -> Result<Module, DbError> {
        dbconn.transaction(|| {
            let data = diesel::insert_into(modules::table)
                .values(&db::NewModule {
                    uuid: self.data.uuid,
                    major_version: version.major,
                    minor_version: version.minor,
                    type_: self.data.type_,
                    title: &self.data.title,
                    language: &self.data.language,
                    metadata,
                    publisher: &self.data.publisher,
                    publication_message:
                        self.data.publication_message.as_ref()
                            .map(String::as_str),
                    state: ModuleState::PostPublication,
                })
                .get_result::<db::Module>(dbconn)?;

            let keywords = module_keywords::table
                .filter(module_keywords::module_ident
                    .eq(self.data.module_ident))
                .get_results::<(i32, String)>(dbconn)?;

            for (_, keyword) in &keywords {
                diesel::insert_into(module_keywords::table)
                    .values(&db::ModuleKeyword {
                        module_ident: data.module_ident,
                        keyword,
                    })
                    .execute(dbconn)?;
            }

            Ok(Module { data })
        })
    }

    pub fn ident(&self) -> Ident {
        Ident::new(
            self.data.uuid,
            Version::new(self.data.major_version, self.data.minor_version),
        )
    }

    pub fn module_ident(&self) -> i32 {
        self.data.module_ident
    }

    pub fn kind(&self) -> ContentType {
        self.data.type_
    }

    pub fn state(&self) -> ModuleState {
        self.data.state
    }

    /// Move this module into another lifecycle state.
    pub fn set_state(&mut self, dbconn: &Connection, state: ModuleState)
    -> Result<(), DbError> {
        self.data = diesel::update(modules::table
            .filter(modules::module_ident.eq(self.data.module_ident)))
            .set(modules::state.eq(state))
            .get_result::<db::Module>(dbconn)?;
        Ok(())
    }

    /// Record a completed bake under the given recipe.
    pub fn mark_baked(&mut self, dbconn: &Connection, recipe: &str)
    -> Result<(), DbError> {
        self.data = diesel::update(modules::table
            .filter(modules::module_ident.eq(self.data.module_ident)))
            .set((
                modules::state.eq(ModuleState::Current),
                modules::recipe.eq(recipe),
                modules::baked.eq(Utc::now()),
            ))
            .get_result::<db::Module>(dbconn)?;
        Ok(())
    }

    pub fn into_db(self) -> db::Module {
        self.data
    }
}

impl std::ops::Deref for Module {
    type Target = db::Module;

    fn deref(&self) -> &db::Module {
        &self.data
    }
}

/// Decide the next version for a uuid given its version history.
pub fn next_version_from(
    history: &[(i32, Option<i32>)],
    kind: ContentType,
    minor_bump: bool,
) -> Version {
    let newest = history.iter()
        .map(|&(major, minor)| Version::new(major, minor))
        .max();

    match newest {
        None => Version::first(kind == ContentType::Binder),
        Some(version) if minor_bump => version.next_minor(),
        Some(version) => {
            let bumped = version.next_major();
            Version {
                major: bumped.major,
                minor: if kind == ContentType::Binder {
                    Some(1)
                } else {
                    None
                },
            }
        }
    }
}

#[derive(Debug, Fail)]
pub enum FindModuleError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// No module found matching given criteria.
    #[fail(display = "No such module")]
    NotFound,
}

impl_from! { for FindModuleError ;
    DbError => |e| FindModuleError::Database(e),
}

#[derive(Debug, Fail)]
pub enum CreateModuleError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Modules can only be created under an exact version.
    #[fail(display = "Cannot commit a module without a version")]
    Unversioned,
}

impl_from! { for CreateModuleError ;
    DbError => |e| CreateModuleError::Database(e),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_publication_versions() {
        assert_eq!(
            next_version_from(&[], ContentType::Document, false),
            Version::new(1, None),
        );
        assert_eq!(
            next_version_from(&[], ContentType::Binder, false),
            Version::new(1, Some(1)),
        );
    }

    #[test]
    fn document_revisions_bump_major() {
        let history = [(1, None), (2, None)];
        assert_eq!(
            next_version_from(&history, ContentType::Document, false),
            Version::new(3, None),
        );
    }

    #[test]
    fn binder_revisions_reset_minor() {
        let history = [(1, Some(1)), (1, Some(2)), (2, Some(1))];
        assert_eq!(
            next_version_from(&history, ContentType::Binder, false),
            Version::new(3, Some(1)),
        );
    }

    #[test]
    fn cascade_bumps_minor_only() {
        let history = [(1, Some(1)), (2, Some(1)), (2, Some(2))];
        assert_eq!(
            next_version_from(&history, ContentType::Binder, true),
            Version::new(2, Some(3)),
        );
    }

    #[test]
    fn row_identity_formats_canonically() {
        let module = Module::from_db(db::Module {
            module_ident: 7,
            uuid: Uuid::nil(),
            major_version: 2,
            minor_version: Some(3),
            type_: ContentType::Binder,
            title: "Physics".to_string(),
            language: "en".to_string(),
            metadata: serde_json::json!({}),
            publisher: "publisher".to_string(),
            publication_message: None,
            created: Utc::now(),
            revised: Utc::now(),
            state: ModuleState::PostPublication,
            recipe: None,
            baked: None,
        });

        assert_eq!(
            module.ident().to_string(),
            format!("{}@2.3", Uuid::nil()),
        );
    }

    #[test]
    fn history_order_does_not_matter() {
        let history = [(2, Some(2)), (1, Some(1)), (2, Some(1))];
        assert_eq!(
            next_version_from(&history, ContentType::Binder, true),
            Version::new(2, Some(3)),
        );
    }
}
