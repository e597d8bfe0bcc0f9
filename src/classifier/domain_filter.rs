//! Domain gating for the passive auto-processor.

use std::collections::BTreeSet;
use std::fmt;

/// Which traffic the auto-processor is allowed to learn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    All,
    InScope,
    CustomList,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::All => "ALL",
            FilterMode::InScope => "IN_SCOPE",
            FilterMode::CustomList => "CUSTOM_LIST",
        }
    }

    /// Parse the persisted preference value; anything unrecognized falls back
    /// to `All`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "IN_SCOPE" => FilterMode::InScope,
            "CUSTOM_LIST" => FilterMode::CustomList,
            _ => FilterMode::All,
        }
    }
}

/// Decides whether a domain's cookies should be submitted for classification.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    mode: FilterMode,
    allowed: BTreeSet<String>,
}

impl DomainFilter {
    pub fn new(mode: FilterMode, allowed: BTreeSet<String>) -> Self {
        Self { mode, allowed }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn allowed_domains(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    /// `in_scope` is the host's scope answer for the originating URL; it is
    /// only consulted in `InScope` mode.
    pub fn should_process(&self, domain: &str, in_scope: bool) -> bool {
        if domain.is_empty() {
            return false;
        }
        match self.mode {
            FilterMode::All => true,
            FilterMode::InScope => in_scope,
            FilterMode::CustomList => {
                if self.allowed.contains(domain) {
                    return true;
                }
                self.allowed.iter().any(|allowed| {
                    domain.ends_with(&format!(".{allowed}"))
                        || allowed.ends_with(&format!(".{domain}"))
                })
            }
        }
    }

    /// Parse a comma/semicolon/whitespace-separated domain list.
    pub fn parse_domain_list(raw: &str) -> BTreeSet<String> {
        raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl fmt::Display for DomainFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            FilterMode::All => write!(f, "All domains"),
            FilterMode::InScope => write!(f, "In-scope domains only"),
            FilterMode::CustomList => {
                write!(f, "Custom list ({} domains)", self.allowed.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(domains: &str) -> DomainFilter {
        DomainFilter::new(
            FilterMode::CustomList,
            DomainFilter::parse_domain_list(domains),
        )
    }

    #[test]
    fn all_mode_accepts_everything_but_empty() {
        let filter = DomainFilter::default();
        assert!(filter.should_process("example.com", false));
        assert!(!filter.should_process("", true));
    }

    #[test]
    fn in_scope_mode_follows_the_host_answer() {
        let filter = DomainFilter::new(FilterMode::InScope, BTreeSet::new());
        assert!(filter.should_process("example.com", true));
        assert!(!filter.should_process("example.com", false));
    }

    #[test]
    fn custom_list_matches_exact_and_suffix_both_ways() {
        let filter = custom("example.com, api.other.org");
        assert!(filter.should_process("example.com", false));
        assert!(filter.should_process("shop.example.com", false));
        // An allowed subdomain also admits its parent.
        assert!(filter.should_process("other.org", false));
        assert!(!filter.should_process("example.net", false));
        assert!(!filter.should_process("notexample.com", false));
    }

    #[test]
    fn list_parsing_accepts_mixed_separators() {
        let domains = DomainFilter::parse_domain_list("a.com, b.org;c.net  d.io");
        assert_eq!(domains.len(), 4);
        assert!(domains.contains("c.net"));
    }

    #[test]
    fn mode_parsing_defaults_to_all() {
        assert_eq!(FilterMode::parse("IN_SCOPE"), FilterMode::InScope);
        assert_eq!(FilterMode::parse("custom_list"), FilterMode::CustomList);
        assert_eq!(FilterMode::parse("whatever"), FilterMode::All);
    }
}
