use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Deref};

/// Opaque record identifier. Freshly minted ids are ULIDs, so they sort
/// by creation time; ids read back from storage are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(rusty_ulid::generate_ulid_string())
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for Eid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for Eid {
    fn from(id: &str) -> Self {
        Eid(id.to_string())
    }
}
