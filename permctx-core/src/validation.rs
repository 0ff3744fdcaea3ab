//! Input validation for nodes, group names and context pairs
//!
//! Everything that can enter a holder's node list passes through here first,
//! so the resolver never has to cope with malformed data.

// ============================================================================
// Canonical validation limits
// ============================================================================

/// Maximum permission string length
pub const PERMISSION_MAX: usize = 512;

/// Maximum group name length
pub const GROUP_NAME_MAX: usize = 36;

/// Maximum context key length
pub const CONTEXT_KEY_MAX: usize = 64;

/// Maximum context value length
pub const CONTEXT_VALUE_MAX: usize = 256;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid {field}: {message}")]
    Field { field: String, message: String },
}

impl ValidationError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Field {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a permission string before it is attached to a node.
pub fn validate_permission(permission: &str) -> ValidationResult<()> {
    if permission.trim().is_empty() {
        return Err(ValidationError::field("permission", "must not be empty"));
    }

    if permission.len() > PERMISSION_MAX {
        return Err(ValidationError::field(
            "permission",
            format!("must be at most {PERMISSION_MAX} characters"),
        ));
    }

    if permission.contains(char::is_whitespace) && !is_meta_like(permission) {
        return Err(ValidationError::field(
            "permission",
            "must not contain whitespace",
        ));
    }

    Ok(())
}

/// Prefix, suffix and meta nodes carry free text after their header and may
/// legitimately contain spaces.
fn is_meta_like(permission: &str) -> bool {
    let lower = permission.to_ascii_lowercase();
    lower.starts_with("prefix.") || lower.starts_with("suffix.") || lower.starts_with("meta.")
}

/// Validate a group name (the `<name>` part of `group.<name>`).
pub fn validate_group_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::field("group name", "must not be empty"));
    }

    if name.len() > GROUP_NAME_MAX {
        return Err(ValidationError::field(
            "group name",
            format!("must be at most {GROUP_NAME_MAX} characters"),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::field(
            "group name",
            "can only contain letters, numbers, underscores, and hyphens",
        ));
    }

    Ok(())
}

/// Validate one context pair. Keys are expected to be normalised already.
pub fn validate_context(key: &str, value: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::field("context key", "must not be empty"));
    }
    if key.len() > CONTEXT_KEY_MAX {
        return Err(ValidationError::field(
            "context key",
            format!("must be at most {CONTEXT_KEY_MAX} characters"),
        ));
    }
    if value.is_empty() {
        return Err(ValidationError::field(
            "context value",
            format!("for key '{key}' must not be empty"),
        ));
    }
    if value.len() > CONTEXT_VALUE_MAX {
        return Err(ValidationError::field(
            "context value",
            format!("must be at most {CONTEXT_VALUE_MAX} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_validation() {
        assert!(validate_permission("essentials.fly").is_ok());
        assert!(validate_permission("*").is_ok());
        assert!(validate_permission("").is_err());
        assert!(validate_permission("   ").is_err());
        assert!(validate_permission("some perm").is_err());
        assert!(validate_permission(&"a".repeat(PERMISSION_MAX + 1)).is_err());
    }

    #[test]
    fn test_meta_nodes_may_contain_spaces() {
        assert!(validate_permission("prefix.100.[Server Admin] ").is_ok());
        assert!(validate_permission("meta.motto.hello world").is_ok());
    }

    #[test]
    fn test_group_name_validation() {
        assert!(validate_group_name("admin").is_ok());
        assert!(validate_group_name("vip_plus-2").is_ok());
        assert!(validate_group_name("").is_err());
        assert!(validate_group_name("has space").is_err());
        assert!(validate_group_name("a.b").is_err());
        assert!(validate_group_name(&"g".repeat(GROUP_NAME_MAX + 1)).is_err());
    }

    #[test]
    fn test_context_validation() {
        assert!(validate_context("world", "nether").is_ok());
        assert!(validate_context("", "nether").is_err());
        assert!(validate_context("world", "").is_err());
    }
}
