//! Build metadata embedded by the build script, reported at startup.

/// Short git commit hash, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("VPNWARDEN_GIT_HASH");

/// The cargo profile the binary was built with.
pub const BUILD_PROFILE: &str = env!("VPNWARDEN_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Formatted as `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_mentions_crate_version() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(BUILD_PROFILE));
    }

    #[test]
    fn test_git_hash_not_empty() {
        assert!(!GIT_HASH.is_empty());
    }
}
