// ============================================
// File: crates/gatesplice-core/src/protocol/name.rs
// ============================================
//! # Message-Name Normalization
//!
//! ## Creation Reason
//! Hook registrations accept the loose camelCase spellings that circulate
//! in module code (`sLogin`, `cChatMessage`) as well as the canonical
//! uppercase-with-underscores identifiers the protocol tables use
//! (`S_LOGIN`, `C_CHAT_MESSAGE`). Normalization maps the former onto the
//! latter.
//!
//! ## Rules
//! 1. The literal `sF2pPremiumUserPermission` maps to
//!    `S_F2P_PremiumUser_Permission` (historical special case)
//! 2. A name containing no underscore has every uppercase letter prefixed
//!    with `_`, then the whole string is uppercased
//! 3. Anything else passes through unchanged
//!
//! ## Last Modified
//! v0.1.0 - Initial normalization rules

// The one name whose canonical spelling does not follow the camelCase rule.
const F2P_INPUT: &str = "sF2pPremiumUserPermission";
const F2P_CANONICAL: &str = "S_F2P_PremiumUser_Permission";

/// Normalizes a message name to its canonical table spelling.
///
/// # Example
/// ```
/// use gatesplice_core::protocol::normalize_name;
///
/// assert_eq!(normalize_name("sLogin"), "S_LOGIN");
/// assert_eq!(normalize_name("S_LOGIN"), "S_LOGIN");
/// assert_eq!(normalize_name("*"), "*");
/// ```
#[must_use]
pub fn normalize_name(name: &str) -> String {
    if name == F2P_INPUT {
        return F2P_CANONICAL.to_string();
    }

    if name.contains('_') {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() * 2);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(ch);
    }
    out.to_uppercase()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_expansion() {
        assert_eq!(normalize_name("sLogin"), "S_LOGIN");
        assert_eq!(normalize_name("cChatMessage"), "C_CHAT_MESSAGE");
        assert_eq!(normalize_name("sSpawnNpc"), "S_SPAWN_NPC");
    }

    #[test]
    fn test_underscore_passthrough() {
        assert_eq!(normalize_name("S_LOGIN"), "S_LOGIN");
        assert_eq!(normalize_name("C_CHECK_VERSION"), "C_CHECK_VERSION");
        // Mixed case with an underscore is passed through untouched,
        // even if it looks wrong.
        assert_eq!(normalize_name("s_Login"), "s_Login");
    }

    #[test]
    fn test_f2p_special_case() {
        assert_eq!(
            normalize_name("sF2pPremiumUserPermission"),
            "S_F2P_PremiumUser_Permission"
        );
    }

    #[test]
    fn test_wildcard_and_plain() {
        assert_eq!(normalize_name("*"), "*");
        assert_eq!(normalize_name("login"), "LOGIN");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_leading_uppercase() {
        // A leading capital gains a leading underscore; the tables never
        // spell names this way, so the lookup simply misses.
        assert_eq!(normalize_name("SLogin"), "_S_LOGIN");
    }
}
