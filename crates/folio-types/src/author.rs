use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Commit identity supplied by the caller of a sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Both name and email are required.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.name.trim().is_empty() {
            return Err(TypeError::InvalidAuthor("name is required".into()));
        }
        if self.email.trim().is_empty() {
            return Err(TypeError::InvalidAuthor("email is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_author_is_valid() {
        assert!(Author::new("Ada", "ada@example.com").validate().is_ok());
    }

    #[test]
    fn blank_parts_are_rejected() {
        assert!(Author::new("", "ada@example.com").validate().is_err());
        assert!(Author::new("Ada", "  ").validate().is_err());
    }
}
