use blake2::blake2b::{Blake2b, Blake2bResult};
use diesel::{
    prelude::*,
    result::Error as DbError,
};
use std::{
    io::{self, Write},
    path::Path,
};
use tempfile::Builder as TempBuilder;

use crate::db::{
    Connection,
    models as db,
    schema::files,
};

/// A file in the content-addressed store.
///
/// Files are keyed by the BLAKE2 hash of their contents and never mutated
/// or deleted; publishing identical bytes twice reuses the existing entry.
#[derive(Debug)]
pub struct File {
    data: db::File,
}

impl File {
    pub(crate) fn from_db(data: db::File) -> File {
        File { data }
    }

    /// Store a blob, reusing an existing entry when one with the same hash
    /// is already present.
    pub fn store<P>(
        dbconn: &Connection,
        storage: P,
        data: &[u8],
        media_type: &str,
    ) -> Result<File, CreateFileError>
    where
        P: AsRef<Path>,
    {
        let hash = hash_data(data);

        match File::by_hash(dbconn, hash.as_bytes())? {
            // There already is a file with this hash.
            Some(file) => Ok(file),
            // It's a new file; we need to create database entry for it.
            None => {
                let mut tmp = TempBuilder::new()
                    .tempfile_in(&storage)?;
                tmp.write_all(data)?;

                let name = hash_to_hex(hash.as_bytes());
                let path = storage.as_ref().join(name);
                let _ = tmp.persist(&path)?;

                diesel::insert_into(files::table)
                    .values(db::NewFile {
                        media_type,
                        path: path.to_str().ok_or(CreateFileError::BadPath)?,
                        hash: hash.as_bytes(),
                    })
                    .get_result::<db::File>(dbconn)
                    .map_err(Into::into)
                    .map(|data| File { data })
            }
        }
    }

    /// Find a stored file by the hash of its contents.
    pub fn by_hash(dbconn: &Connection, hash: &[u8])
    -> Result<Option<File>, DbError> {
        files::table
            .filter(files::hash.eq(hash))
            .get_result::<db::File>(dbconn)
            .optional()
            .map(|data| data.map(|data| File { data }))
    }

    pub fn into_db(self) -> db::File {
        self.data
    }
}

impl std::ops::Deref for File {
    type Target = db::File;

    fn deref(&self) -> &db::File {
        &self.data
    }
}

/// Hash a blob the way the file store keys it.
pub fn hash_data(data: &[u8]) -> Blake2bResult {
    let mut digest = Blake2b::new(64);
    digest.update(data);
    digest.finalize()
}

#[derive(Debug, Fail)]
pub enum CreateFileError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// System error.
    #[fail(display = "System error: {}", _0)]
    System(#[cause] io::Error),
    /// Storage path is not valid UTF-8.
    #[fail(display = "Storage path is not valid UTF-8")]
    BadPath,
}

impl_from! { for CreateFileError ;
    DbError => |e| CreateFileError::Database(e),
    io::Error => |e| CreateFileError::System(e),
    tempfile::PersistError => |e| CreateFileError::System(e.error),
}

fn hash_to_hex(hash: &[u8]) -> String {
    use std::fmt::Write;

    let mut hex = String::with_capacity(hash.len() * 2);

    for byte in hash {
        let _ = write!(hex, "{:02x}", byte);
    }

    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_data_hashes_identically() {
        let a = hash_data(b"content");
        let b = hash_data(b"content");
        let c = hash_data(b"different");

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn hex_names_are_lowercase_hex() {
        assert_eq!(hash_to_hex(&[0x00, 0xff, 0x0a]), "00ff0a");
    }
}
