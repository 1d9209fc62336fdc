use serde::{Deserialize, Serialize};

/// Current on-disk schema version for persisted entities. Bump when a
/// persisted shape changes incompatibly.
pub const CURRENT_SCHEMA_VERSION: u16 = 1;

/// Wraps a persisted entity with a version marker so a future reader can
/// tell an old record from a new one without guessing at field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(flatten)]
    pub data: T,
}

fn default_schema_version() -> u16 {
    1
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            data,
        }
    }
}
