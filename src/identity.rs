// src/identity.rs
// Composite agent-identifier encoding shared with the host protocol.
//
// Wire form: `{user_id}__session__{session_name}__{agent_id}`.
// An identifier without the session marker is a plain user id and routes as a
// regular (non-coordination) call - the backward-compatible fallback path.

use crate::error::CoordError;

/// Fixed component delimiter. Reserved: no component may contain it.
pub const DELIMITER: &str = "__";

/// Literal marker distinguishing coordination identifiers from plain user ids.
pub const SESSION_MARKER: &str = "session";

/// Result of parsing an inbound identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Full coordination identity: user, session, and agent.
    Coordination {
        user_id: String,
        session_name: String,
        agent_id: String,
    },
    /// No session marker present; treat as a regular single-agent call.
    Direct { user_id: String },
}

/// Validate one identifier component: non-empty, delimiter-free.
pub fn validate_component(component: &str) -> Result<(), CoordError> {
    if component.trim().is_empty() {
        return Err(CoordError::InvalidIdentifier(
            "empty identifier component".to_string(),
        ));
    }
    if component.contains(DELIMITER) {
        return Err(CoordError::InvalidIdentifier(format!(
            "'{}' contains reserved delimiter '{}'",
            component, DELIMITER
        )));
    }
    Ok(())
}

/// Build the wire-form identifier. Components are validated so a name
/// containing the delimiter is rejected here rather than misparsed later.
pub fn encode(user_id: &str, session_name: &str, agent_id: &str) -> Result<String, CoordError> {
    validate_component(user_id)?;
    validate_component(session_name)?;
    validate_component(agent_id)?;
    Ok(format!(
        "{}{}{}{}{}{}{}",
        user_id, DELIMITER, SESSION_MARKER, DELIMITER, session_name, DELIMITER, agent_id
    ))
}

/// Strict parse of an inbound identifier.
///
/// A marker-bearing identifier must split into exactly four components;
/// anything else is rejected rather than silently misparsed.
pub fn parse(raw: &str) -> Result<Routed, CoordError> {
    if raw.trim().is_empty() {
        return Err(CoordError::InvalidIdentifier("empty identifier".to_string()));
    }

    if !raw.contains(DELIMITER) {
        return Ok(Routed::Direct {
            user_id: raw.to_string(),
        });
    }

    let parts: Vec<&str> = raw.split(DELIMITER).collect();
    if parts.len() != 4 || parts[1] != SESSION_MARKER {
        return Err(CoordError::InvalidIdentifier(format!(
            "expected '{{user}}__{}__{{session}}__{{agent}}', got '{}'",
            SESSION_MARKER, raw
        )));
    }

    let (user_id, session_name, agent_id) = (parts[0], parts[2], parts[3]);
    validate_component(user_id)?;
    validate_component(session_name)?;
    validate_component(agent_id)?;

    Ok(Routed::Coordination {
        user_id: user_id.to_string(),
        session_name: session_name.to_string(),
        agent_id: agent_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse_roundtrip() {
        let encoded = encode("peter", "auth-refactor", "planner").unwrap();
        assert_eq!(encoded, "peter__session__auth-refactor__planner");

        match parse(&encoded).unwrap() {
            Routed::Coordination {
                user_id,
                session_name,
                agent_id,
            } => {
                assert_eq!(user_id, "peter");
                assert_eq!(session_name, "auth-refactor");
                assert_eq!(agent_id, "planner");
            }
            other => panic!("expected coordination identity, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_user_id_routes_direct() {
        match parse("peter").unwrap() {
            Routed::Direct { user_id } => assert_eq!(user_id, "peter"),
            other => panic!("expected direct route, got {:?}", other),
        }
    }

    #[test]
    fn test_delimiter_collision_rejected() {
        assert!(encode("pe__ter", "s", "a").is_err());
        assert!(encode("peter", "my__session", "a").is_err());
        assert!(encode("peter", "s", "impl__a").is_err());
    }

    #[test]
    fn test_malformed_marker_identifiers_rejected() {
        // Delimiter present but no valid marker/arity: reject, don't guess.
        assert!(parse("peter__auth__planner").is_err());
        assert!(parse("peter__session__auth").is_err());
        assert!(parse("peter__session__auth__planner__extra").is_err());
        assert!(parse("__session__auth__planner").is_err());
    }

    #[test]
    fn test_empty_identifier_rejected() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }
}
