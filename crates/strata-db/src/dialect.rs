use std::fmt;
use std::str::FromStr;

use strata_common::Error;

/// The versioned set of schema conventions a migration was written against.
///
/// This only selects defaults for the table builder; it never changes what an
/// explicitly configured column or foreign key does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaDialect {
    major: u32,
    minor: u32,
}

impl SchemaDialect {
    pub const CURRENT: SchemaDialect = SchemaDialect { major: 7, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// `created_at` / `updated_at` are declared NOT NULL from 5.0 on.
    pub fn timestamps_not_null(&self) -> bool {
        self.major >= 5
    }

    /// References get a supporting index from 5.0 on.
    pub fn indexes_references(&self) -> bool {
        self.major >= 5
    }
}

impl Default for SchemaDialect {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl FromStr for SchemaDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Config(format!("invalid schema dialect version: {s:?}"));

        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { major, minor })
    }
}

impl fmt::Display for SchemaDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::SchemaDialect;

    #[test]
    fn parses_major_minor() {
        let dialect: SchemaDialect = "7.0".parse().unwrap();
        assert_eq!(dialect, SchemaDialect::CURRENT);
        assert_eq!(dialect.to_string(), "7.0");

        let dialect: SchemaDialect = " 4.2 ".parse().unwrap();
        assert_eq!((dialect.major(), dialect.minor()), (4, 2));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!("7".parse::<SchemaDialect>().is_err());
        assert!("seven.0".parse::<SchemaDialect>().is_err());
        assert!("7.x".parse::<SchemaDialect>().is_err());
        assert!("".parse::<SchemaDialect>().is_err());
    }

    #[test]
    fn older_dialects_relax_conventions() {
        let legacy = SchemaDialect::new(4, 2);
        assert!(!legacy.timestamps_not_null());
        assert!(!legacy.indexes_references());

        assert!(SchemaDialect::CURRENT.timestamps_not_null());
        assert!(SchemaDialect::CURRENT.indexes_references());
    }
}
