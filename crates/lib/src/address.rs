//! Recipient address canonicalization.
//!
//! The canonical form (lowercase, trimmed) is the only key used for room
//! lookup and store partitioning, so ingestion, join/leave, and history
//! queries all normalize through here.

use crate::error::Error;

/// Canonicalize a raw recipient string: lowercase and trim.
/// Fails when the result is empty.
pub fn normalize(raw: &str) -> Result<String, Error> {
    let addr = raw.trim().to_lowercase();
    if addr.is_empty() {
        return Err(Error::InvalidAddress);
    }
    Ok(addr)
}

/// Extract the address from a `To` value that may carry a display name,
/// e.g. `Jane Doe <jane@example.com>` yields `jane@example.com`.
/// Without angle brackets the trimmed raw value is returned as-is.
pub fn extract_address(raw_to: &str) -> &str {
    if let (Some(start), Some(end)) = (raw_to.find('<'), raw_to.rfind('>')) {
        if start < end {
            return raw_to[start + 1..end].trim();
        }
    }
    raw_to.trim()
}

/// True when the address's domain equals `root` or is a subdomain of it.
/// Both sides are compared case-insensitively; an address without a domain
/// part never matches.
pub fn domain_matches(addr: &str, root: &str) -> bool {
    let Some((_, domain)) = addr.rsplit_once('@') else {
        return false;
    };
    let domain = domain.trim().to_lowercase();
    let root = root.trim().to_lowercase();
    if root.is_empty() {
        return false;
    }
    domain == root || domain.ends_with(&format!(".{}", root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize("  Alice@Example.COM ").unwrap(), "alice@example.com");
        assert_eq!(normalize("bob@d.io").unwrap(), "bob@d.io");
    }

    #[test]
    fn normalize_is_stable_across_case_and_whitespace_variants() {
        let variants = ["a@d.io", " A@D.IO", "a@D.io\t", "  A@d.Io  "];
        for v in variants {
            assert_eq!(normalize(v).unwrap(), "a@d.io");
        }
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(matches!(normalize("   "), Err(Error::InvalidAddress)));
        assert!(matches!(normalize(""), Err(Error::InvalidAddress)));
    }

    #[test]
    fn extract_address_handles_display_name_form() {
        assert_eq!(extract_address("Jane Doe <jane@example.com>"), "jane@example.com");
        assert_eq!(extract_address("<only@brackets.io>"), "only@brackets.io");
        assert_eq!(extract_address("  plain@addr.io  "), "plain@addr.io");
    }

    #[test]
    fn domain_matches_root_and_subdomains() {
        assert!(domain_matches("a@inbox.test", "inbox.test"));
        assert!(domain_matches("a@mail.inbox.test", "inbox.test"));
        assert!(domain_matches("a@inbox.test", "Inbox.Test"));
        assert!(!domain_matches("a@notinbox.test", "inbox.test"));
        assert!(!domain_matches("a@other.io", "inbox.test"));
        assert!(!domain_matches("no-at-sign", "inbox.test"));
    }
}
