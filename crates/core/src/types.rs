use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of one calculation job and the name of its workspace directory.
///
/// Always non-empty ASCII alphanumeric, so it is safe to use as a single
/// path segment on every platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh, collision-free identifier (UUID v4 without hyphens).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Derive an identifier from a transport session id by dropping every
    /// character that is not ASCII alphanumeric.
    pub fn from_session(session_id: &str) -> Result<Self, CoreError> {
        let sanitized: String = session_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        if sanitized.is_empty() {
            return Err(CoreError::Validation(format!(
                "Session id '{session_id}' contains no alphanumeric characters"
            )));
        }
        Ok(Self(sanitized))
    }

    /// Validate a client-supplied identifier without altering it.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() {
            return Err(CoreError::Validation("Job id must not be empty".into()));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::Validation(format!(
                "Invalid job id '{raw}': only alphanumeric characters are allowed"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}
