//! # Device Classification
//!
//! Family-level user-agent classification for session records and the
//! login-alert fingerprint.
//!
//! The fingerprint ignores versions: it is
//! `hash(deviceType:osFamily:browserFamily)`, so a browser update does
//! not look like a new device, but a first login from Safari-on-iOS when
//! the user always signs in from Chrome-on-Windows does.

use sha2::{Digest, Sha256};

/// Family-level device facts extracted from a User-Agent header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// `desktop`, `mobile`, `tablet` or `bot`
    pub device_type: Option<String>,
    /// `Windows`, `macOS`, `Linux`, `Android`, `iOS`
    pub os_family: Option<String>,
    /// `Chrome`, `Firefox`, `Safari`, `Edge`, `Opera`
    pub browser_family: Option<String>,
}

/// Classifies a User-Agent string into family-level facts.
///
/// Substring tables, checked most-specific first (Edge before Chrome,
/// Chrome before Safari, iOS before macOS). Unknown agents leave the
/// fields `None` rather than guessing.
pub fn classify_user_agent(ua: &str) -> DeviceInfo {
    if ua.trim().is_empty() {
        return DeviceInfo::default();
    }

    let lower = ua.to_lowercase();

    let device_type = if lower.contains("bot") || lower.contains("crawler") || lower.contains("spider")
    {
        Some("bot")
    } else if lower.contains("ipad") || (lower.contains("tablet") && !lower.contains("mobile")) {
        Some("tablet")
    } else if lower.contains("mobile") || lower.contains("iphone") || lower.contains("android") {
        Some("mobile")
    } else {
        Some("desktop")
    };

    let os_family = if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ios") {
        Some("iOS")
    } else if lower.contains("android") {
        Some("Android")
    } else if lower.contains("windows") {
        Some("Windows")
    } else if lower.contains("mac os") || lower.contains("macintosh") {
        Some("macOS")
    } else if lower.contains("linux") {
        Some("Linux")
    } else {
        None
    };

    // Order matters: every Edge UA contains "chrome", every Chrome UA
    // contains "safari"
    let browser_family = if lower.contains("edg/") || lower.contains("edge") {
        Some("Edge")
    } else if lower.contains("opr/") || lower.contains("opera") {
        Some("Opera")
    } else if lower.contains("firefox") {
        Some("Firefox")
    } else if lower.contains("chrome") || lower.contains("crios") {
        Some("Chrome")
    } else if lower.contains("safari") {
        Some("Safari")
    } else {
        None
    };

    DeviceInfo {
        device_type: device_type.map(String::from),
        os_family: os_family.map(String::from),
        browser_family: browser_family.map(String::from),
    }
}

/// The login-alert fingerprint: SHA-256 over
/// `deviceType:osFamily:browserFamily`, missing parts as empty strings.
pub fn login_fingerprint(info: &DeviceInfo) -> String {
    let raw = format!(
        "{}:{}:{}",
        info.device_type.as_deref().unwrap_or(""),
        info.os_family.as_deref().unwrap_or(""),
        info.browser_family.as_deref().unwrap_or("")
    );

    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";
    const EDGE_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
    const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    #[test]
    fn test_chrome_on_windows() {
        let info = classify_user_agent(CHROME_WIN);
        assert_eq!(info.device_type.as_deref(), Some("desktop"));
        assert_eq!(info.os_family.as_deref(), Some("Windows"));
        assert_eq!(info.browser_family.as_deref(), Some("Chrome"));
    }

    #[test]
    fn test_safari_on_iphone() {
        let info = classify_user_agent(SAFARI_IPHONE);
        assert_eq!(info.device_type.as_deref(), Some("mobile"));
        assert_eq!(info.os_family.as_deref(), Some("iOS"));
        assert_eq!(info.browser_family.as_deref(), Some("Safari"));
    }

    #[test]
    fn test_edge_not_misread_as_chrome() {
        let info = classify_user_agent(EDGE_WIN);
        assert_eq!(info.browser_family.as_deref(), Some("Edge"));
    }

    #[test]
    fn test_firefox_on_linux() {
        let info = classify_user_agent(FIREFOX_LINUX);
        assert_eq!(info.os_family.as_deref(), Some("Linux"));
        assert_eq!(info.browser_family.as_deref(), Some("Firefox"));
    }

    #[test]
    fn test_empty_ua_is_unknown() {
        assert_eq!(classify_user_agent(""), DeviceInfo::default());
    }

    #[test]
    fn test_fingerprint_ignores_versions() {
        let v120 = classify_user_agent(CHROME_WIN);
        let v121 = classify_user_agent(&CHROME_WIN.replace("120.0.0.0", "121.0.0.0"));

        // Same family triple, same fingerprint
        assert_eq!(login_fingerprint(&v120), login_fingerprint(&v121));
    }

    #[test]
    fn test_fingerprint_differs_across_families() {
        let chrome = classify_user_agent(CHROME_WIN);
        let safari = classify_user_agent(SAFARI_IPHONE);
        assert_ne!(login_fingerprint(&chrome), login_fingerprint(&safari));
    }
}
