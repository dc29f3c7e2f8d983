use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;

const SQLITE_PREFIX: &str = "sqlite:";

/// Which key-value store backs the repository.
///
/// Written as `memory` or `sqlite:<path>` in config files and environment
/// variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StoreLocation {
    Memory,
    Sqlite(PathBuf),
}
impl TryFrom<String> for StoreLocation {
    type Error = ErrorKind;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value == "memory" {
            return Ok(Self::Memory);
        }
        match value.strip_prefix(SQLITE_PREFIX) {
            Some(path) if !path.is_empty() => Ok(Self::Sqlite(PathBuf::from(path))),
            _ => Err(ErrorKind::Invalid("store")),
        }
    }
}
impl From<StoreLocation> for String {
    fn from(value: StoreLocation) -> Self {
        value.to_string()
    }
}
impl Display for StoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Sqlite(path) => write!(f, "{SQLITE_PREFIX}{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("memory", Some(StoreLocation::Memory))]
    #[case(" memory ", Some(StoreLocation::Memory))]
    #[case("sqlite:/var/lib/fetchtrack.db", Some(StoreLocation::Sqlite("/var/lib/fetchtrack.db".into())))]
    #[case("sqlite:", None)]
    #[case("redis://localhost", None)]
    fn test_parse(#[case] input: &str, #[case] expected: Option<StoreLocation>) {
        assert_eq!(StoreLocation::try_from(input.to_string()).ok(), expected);
    }

    #[test]
    fn test_display_round_trips() {
        let location = StoreLocation::Sqlite("data/store.db".into());
        assert_eq!(StoreLocation::try_from(location.to_string()).unwrap(), location);
    }
}
