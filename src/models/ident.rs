use failure::Fail;
use uuid::Uuid;

use std::{fmt, str::FromStr};

/// Version of a piece of content.
///
/// Documents carry only a major version. Binders also carry a minor version,
/// bumped without authorial involvement when a republication cascade rebuilds
/// their tree.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Version {
    pub major: i32,
    pub minor: Option<i32>,
}

impl Version {
    pub fn new(major: i32, minor: Option<i32>) -> Version {
        Version { major, minor }
    }

    /// First version for freshly published content.
    pub fn first(minor: bool) -> Version {
        Version {
            major: 1,
            minor: if minor { Some(1) } else { None },
        }
    }

    /// Version following this one after a full (authored) republication.
    pub fn next_major(self) -> Version {
        Version {
            major: self.major + 1,
            minor: self.minor.map(|_| 1),
        }
    }

    /// Version following this one after a cascade republication. Only
    /// meaningful for binders.
    pub fn next_minor(self) -> Version {
        Version {
            major: self.major,
            minor: Some(self.minor.unwrap_or(0) + 1),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.minor {
            Some(minor) => write!(fmt, "{}.{}", self.major, minor),
            None => write!(fmt, "{}", self.major),
        }
    }
}

/// Canonical identity of a content version, serialized as `uuid@major.minor`
/// or `uuid@major`. The version may be absent entirely (`uuid` alone), which
/// addresses whatever version is latest.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Ident {
    pub uuid: Uuid,
    pub version: Option<Version>,
}

impl Ident {
    pub fn new(uuid: Uuid, version: Version) -> Ident {
        Ident { uuid, version: Some(version) }
    }

    /// Identity addressing the latest version of a uuid.
    pub fn latest(uuid: Uuid) -> Ident {
        Ident { uuid, version: None }
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.version {
            Some(version) => write!(fmt, "{}@{}", self.uuid, version),
            None => write!(fmt, "{}", self.uuid),
        }
    }
}

impl FromStr for Ident {
    type Err = ParseIdentError;

    fn from_str(s: &str) -> Result<Ident, ParseIdentError> {
        let mut parts = s.splitn(2, '@');

        let uuid = parts.next()
            .ok_or(ParseIdentError::MalformedIdentity)
            .and_then(|p| p.parse()
                .map_err(|_| ParseIdentError::MalformedIdentity))?;

        let version = match parts.next() {
            None => None,
            Some("") => return Err(ParseIdentError::MalformedIdentity),
            Some(v) => {
                let mut numbers = v.splitn(2, '.');

                let major = numbers.next()
                    .ok_or(ParseIdentError::MalformedIdentity)
                    .and_then(parse_version_number)?;

                let minor = match numbers.next() {
                    None => None,
                    Some(m) => Some(parse_version_number(m)?),
                };

                Some(Version { major, minor })
            }
        };

        Ok(Ident { uuid, version })
    }
}

fn parse_version_number(s: &str) -> Result<i32, ParseIdentError> {
    match s.parse() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ParseIdentError::MalformedIdentity),
    }
}

#[derive(Clone, Copy, Debug, Eq, Fail, PartialEq)]
pub enum ParseIdentError {
    #[fail(display = "Malformed content identity")]
    MalformedIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "91cb5f28-2b8a-4324-9373-dac1d617bc24";

    #[test]
    fn parse_bare_uuid() {
        let ident = format!("{}", UUID).parse::<Ident>().unwrap();
        assert_eq!(ident.uuid.to_string(), UUID);
        assert_eq!(ident.version, None);
    }

    #[test]
    fn parse_major_only() {
        let ident = format!("{}@4", UUID).parse::<Ident>().unwrap();
        assert_eq!(ident.version, Some(Version::new(4, None)));
    }

    #[test]
    fn parse_major_minor() {
        let ident = format!("{}@4.2", UUID).parse::<Ident>().unwrap();
        assert_eq!(ident.version, Some(Version::new(4, Some(2))));
    }

    #[test]
    fn reject_malformed() {
        for s in &[
            "not-a-uuid",
            "not-a-uuid@1",
            &format!("{}@", UUID) as &str,
            &format!("{}@0", UUID),
            &format!("{}@one", UUID),
            &format!("{}@1.", UUID),
            &format!("{}@1.0", UUID),
        ] {
            assert_eq!(
                s.parse::<Ident>(),
                Err(ParseIdentError::MalformedIdentity),
                "accepted {:?}", s,
            );
        }
    }

    #[test]
    fn round_trip_display() {
        for s in &[
            format!("{}", UUID),
            format!("{}@3", UUID),
            format!("{}@3.7", UUID),
        ] {
            assert_eq!(&s.parse::<Ident>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn first_versions() {
        assert_eq!(Version::first(false), Version::new(1, None));
        assert_eq!(Version::first(true), Version::new(1, Some(1)));
    }

    #[test]
    fn major_bump_resets_minor() {
        assert_eq!(Version::new(2, None).next_major(), Version::new(3, None));
        assert_eq!(
            Version::new(2, Some(8)).next_major(),
            Version::new(3, Some(1)),
        );
    }

    #[test]
    fn minor_bump_keeps_major() {
        assert_eq!(
            Version::new(2, Some(8)).next_minor(),
            Version::new(2, Some(9)),
        );
    }
}
