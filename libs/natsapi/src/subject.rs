//! Dot-separated NATS subject handling.
//!
//! A subject is an ordered sequence of tokens joined by `.`. Wildcards (`*` for
//! one token, `>` for the remaining tail) are only meaningful on the
//! subscribe side; they are rejected when used as a concrete publish/request
//! subject or as an endpoint's own subject.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subject must not be empty")]
    Empty,
    #[error("subject {0:?} contains an empty token")]
    EmptyToken(String),
    #[error("subject {0:?} contains a wildcard token, which is only valid on subscriptions")]
    WildcardNotAllowed(String),
}

/// Join a root path and an endpoint-local subject into a fully-qualified subject.
///
/// `root_path + "." + subject`, mirroring the source's `".".join([root_path, subject])`.
pub fn join(root_path: &str, subject: &str) -> String {
    format!("{root_path}.{subject}")
}

/// Join a router prefix (if any) with an endpoint-local subject.
pub fn with_prefix(prefix: Option<&str>, subject: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}.{subject}"),
        _ => subject.to_string(),
    }
}

/// Validate a concrete (non-wildcard) subject, such as one being registered
/// as an endpoint or used to publish/request.
pub fn validate_concrete(subject: &str) -> Result<(), SubjectError> {
    if subject.is_empty() {
        return Err(SubjectError::Empty);
    }
    for token in subject.split('.') {
        if token.is_empty() {
            return Err(SubjectError::EmptyToken(subject.to_string()));
        }
        if token == "*" || token == ">" {
            return Err(SubjectError::WildcardNotAllowed(subject.to_string()));
        }
    }
    Ok(())
}

/// Build the wildcard subscribe subject for a root path: `root + ".>"`.
pub fn root_wildcard(root_path: &str) -> String {
    format!("{root_path}.>")
}

/// Append a JSON-RPC `method` token to a subject, used as the dispatcher's
/// fallback lookup when the direct subject isn't registered.
pub fn with_method(subject: &str, method: &str) -> String {
    format!("{subject}.{method}")
}

/// `operation_id = sanitize(summary + "_" + subject)`, replacing every
/// character outside `[0-9a-zA-Z_]` with `_`.
pub fn operation_id(summary: &str, subject: &str) -> String {
    let raw = format!("{summary}_{subject}");
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_root_and_subject() {
        assert_eq!(join("natsapi.development", "foo"), "natsapi.development.foo");
    }

    #[test]
    fn prefix_is_optional() {
        assert_eq!(with_prefix(None, "foo"), "foo");
        assert_eq!(with_prefix(Some("users"), "list"), "users.list");
        assert_eq!(with_prefix(Some(""), "list"), "list");
    }

    #[test]
    fn rejects_wildcards_in_concrete_subjects() {
        assert_eq!(
            validate_concrete("a.*.c"),
            Err(SubjectError::WildcardNotAllowed("a.*.c".to_string()))
        );
        assert_eq!(
            validate_concrete("a.>"),
            Err(SubjectError::WildcardNotAllowed("a.>".to_string()))
        );
        assert_eq!(validate_concrete(""), Err(SubjectError::Empty));
        assert_eq!(
            validate_concrete("a..b"),
            Err(SubjectError::EmptyToken("a..b".to_string()))
        );
        assert!(validate_concrete("a.b.c").is_ok());
    }

    #[test]
    fn builds_root_wildcard() {
        assert_eq!(root_wildcard("natsapi.development"), "natsapi.development.>");
    }

    #[test]
    fn sanitizes_operation_id() {
        assert_eq!(operation_id("List Users", "users.list"), "List_Users_users_list");
    }
}
