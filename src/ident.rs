//! Handle and identifier normalization utilities
//! ----------------------------------------------
//! Single source of truth for canonicalizing login handles (email or phone),
//! display names, and user ids before they reach storage or the wire.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Sentinel user id used for scoping data that belongs to no signed-in user.
pub const GUEST_USER_ID: &str = "guest";

/// Handles shorter than this are rejected outright.
pub const MIN_HANDLE_LEN: usize = 3;

static PHONE_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-\(\)\.\+]").unwrap());
static DIGITS_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Email,
    Phone,
    Other,
}

/// Classify a raw handle without normalizing it. Anything containing `@` is
/// treated as an email; a string that is all digits once separators are
/// stripped is a phone number.
pub fn classify_handle(raw: &str) -> HandleKind {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return HandleKind::Email;
    }
    let stripped = PHONE_JUNK.replace_all(trimmed, "");
    if !stripped.is_empty() && DIGITS_ONLY.is_match(&stripped) {
        return HandleKind::Phone;
    }
    HandleKind::Other
}

/// Canonicalize a login handle so the same account is found regardless of
/// input formatting:
/// - emails: trimmed and lowercased
/// - phones: separators removed; a single leading country `1` is dropped
///   when it leaves a ten-digit national number
/// - anything else: trimmed and lowercased as-is
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    match classify_handle(trimmed) {
        HandleKind::Email => trimmed.to_lowercase(),
        HandleKind::Phone => {
            let digits = PHONE_JUNK.replace_all(trimmed, "").to_string();
            if digits.len() == 11 && digits.starts_with('1') {
                digits[1..].to_string()
            } else {
                digits
            }
        }
        HandleKind::Other => trimmed.to_lowercase(),
    }
}

/// Reject handles that cannot name an account.
pub fn validate_handle(raw: &str) -> bool {
    let n = normalize_handle(raw);
    if n.len() < MIN_HANDLE_LEN {
        return false;
    }
    match classify_handle(raw) {
        HandleKind::Email => {
            // One '@' with non-empty local part and a dotted domain
            let mut parts = n.splitn(2, '@');
            let local = parts.next().unwrap_or("");
            let domain = parts.next().unwrap_or("");
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        HandleKind::Phone => n.len() >= 7 && n.len() <= 15,
        HandleKind::Other => false,
    }
}

/// NFC-normalize a display name and collapse internal whitespace runs.
pub fn normalize_display_name(raw: &str) -> String {
    let nfc: String = raw.trim().nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_ws = false;
    for ch in nfc.chars() {
        if ch.is_whitespace() {
            if !last_ws && !out.is_empty() {
                out.push(' ');
            }
            last_ws = true;
        } else {
            out.push(ch);
            last_ws = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Returns the id unchanged when present and non-empty, otherwise the guest
/// sentinel. All per-user scoping funnels through here.
pub fn user_id_or_guest(uid: Option<&str>) -> String {
    match uid {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => GUEST_USER_ID.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_lowercase_and_trim() {
        assert_eq!(normalize_handle("  Ada@Example.COM "), "ada@example.com");
        assert_eq!(classify_handle("ada@example.com"), HandleKind::Email);
    }

    #[test]
    fn phones_strip_separators_and_country_one() {
        assert_eq!(normalize_handle("(415) 555-0132"), "4155550132");
        assert_eq!(normalize_handle("+1 415.555.0132"), "4155550132");
        assert_eq!(normalize_handle("1415555"), "1415555");
        assert_eq!(classify_handle("+1 415.555.0132"), HandleKind::Phone);
    }

    #[test]
    fn eleven_digits_without_leading_one_kept() {
        assert_eq!(normalize_handle("24155550132"), "24155550132");
    }

    #[test]
    fn handle_validation() {
        assert!(validate_handle("ada@example.com"));
        assert!(validate_handle("415-555-0132"));
        assert!(!validate_handle("ada@com"));
        assert!(!validate_handle("@example.com"));
        assert!(!validate_handle("12345"));
        assert!(!validate_handle("not a handle"));
        assert!(!validate_handle("  "));
    }

    #[test]
    fn display_names_collapse_whitespace() {
        assert_eq!(normalize_display_name("  Ada   Lovelace \t"), "Ada Lovelace");
        assert_eq!(normalize_display_name(""), "");
    }

    #[test]
    fn guest_fallback() {
        assert_eq!(user_id_or_guest(None), GUEST_USER_ID);
        assert_eq!(user_id_or_guest(Some("   ")), GUEST_USER_ID);
        assert_eq!(user_id_or_guest(Some("u-42")), "u-42");
    }
}
