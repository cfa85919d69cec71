use crate::error::{ForgeError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const FORGE_DIR: &str = ".forge";
pub const PROFILES_DIR: &str = ".forge/profiles";

pub const CONFIG_FILE: &str = ".forge/config.yaml";
pub const LEDGER_FILE: &str = ".forge/ledger.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn forge_dir(root: &Path) -> PathBuf {
    root.join(FORGE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(LEDGER_FILE)
}

pub fn profile_path(root: &Path, user_id: &str) -> PathBuf {
    root.join(PROFILES_DIR).join(format!("{user_id}.json"))
}

// ---------------------------------------------------------------------------
// Slug validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-_.+#]*[a-z0-9+#]$|^[a-z0-9]$").expect("static regex")
    })
}

/// User ids, skills, quests, badges and proposals all share one slug grammar.
/// `+`, `#`, `.` and `_` are allowed so language names like `c++`, `c#` and
/// `node.js` survive as skill keys.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(ForgeError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

/// Lowercase and trim a raw name (e.g. a language from a profile histogram)
/// into slug form. Whitespace becomes `-`.
pub fn normalize_slug(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_slugs() {
        for slug in ["rust", "a", "c++", "c#", "node.js", "bug-hunter", "user_42"] {
            validate_slug(slug).unwrap_or_else(|_| panic!("expected valid: {slug}"));
        }
    }

    #[test]
    fn invalid_slugs() {
        for slug in ["", "-rust", "rust-", "has spaces", "UPPER", "+x"] {
            assert!(validate_slug(slug).is_err(), "expected invalid: {slug}");
        }
    }

    #[test]
    fn normalize_language_names() {
        assert_eq!(normalize_slug("  Rust "), "rust");
        assert_eq!(normalize_slug("Jupyter Notebook"), "jupyter-notebook");
        assert_eq!(normalize_slug("C++"), "c++");
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(config_path(root), PathBuf::from("/tmp/proj/.forge/config.yaml"));
        assert_eq!(ledger_path(root), PathBuf::from("/tmp/proj/.forge/ledger.redb"));
        assert_eq!(
            profile_path(root, "octocat"),
            PathBuf::from("/tmp/proj/.forge/profiles/octocat.json")
        );
    }
}
