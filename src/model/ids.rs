//! Identifier forms.
//!
//! Every element carries a process-assigned `internal_id` (a hyphenated
//! UUID) and may carry a `stix_id` of the form `<type>--<uuid>`. Anything
//! else handed to a lookup is treated as a derived (inferred) identifier.

use uuid::Uuid;

/// Separator between the type prefix and the UUID of a stix id.
pub const STIX_ID_SEPARATOR: &str = "--";

/// Generate a fresh internal identifier.
pub fn new_internal_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh stix identifier for the given type prefix.
pub fn new_stix_id(prefix: &str) -> String {
    format!("{}{STIX_ID_SEPARATOR}{}", prefix.to_ascii_lowercase(), Uuid::new_v4())
}

/// True for hyphenated UUIDs, the only form `new_internal_id` produces.
pub fn is_internal_id(id: &str) -> bool {
    id.len() == 36 && Uuid::try_parse(id).is_ok()
}

/// True for `<type>--<uuid>` where the type prefix is lowercase
/// alphanumerics and single hyphens.
pub fn is_stix_id(id: &str) -> bool {
    let Some((prefix, uuid)) = id.split_once(STIX_ID_SEPARATOR) else {
        return false;
    };
    !prefix.is_empty()
        && !prefix.starts_with('-')
        && !prefix.ends_with('-')
        && prefix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && is_internal_id(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_id_roundtrip() {
        let id = new_internal_id();
        assert!(is_internal_id(&id));
        assert!(!is_stix_id(&id));
    }

    #[test]
    fn test_stix_id_forms() {
        assert!(is_stix_id("relationship--e35b3fc1-47f3-4ccb-a8fe-65a0864edd02"));
        assert!(is_stix_id("intrusion-set--18854f55-ac7c-4634-bd9a-352dd07613b7"));
        assert!(is_stix_id(&new_stix_id("Attack-Pattern")));
        assert!(!is_stix_id("relationship--not-a-uuid"));
        assert!(!is_stix_id("--e35b3fc1-47f3-4ccb-a8fe-65a0864edd02"));
        assert!(!is_stix_id("Report--e35b3fc1-47f3-4ccb-a8fe-65a0864edd02"));
    }

    #[test]
    fn test_inferred_ids_match_neither_form() {
        let inferred = "inferred-7b1f0c2d";
        assert!(!is_internal_id(inferred));
        assert!(!is_stix_id(inferred));
    }
}
