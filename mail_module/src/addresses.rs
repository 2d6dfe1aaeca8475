use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

/// Pulls every address out of a header value, lowercased, in order, without repeats.
pub fn extract_emails(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    EMAIL_PATTERN
        .find_iter(raw)
        .map(|found| normalize_email(found.as_str()))
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

pub fn normalize_email(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

pub(crate) fn domain_of(address: &str) -> Option<&str> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

/// Sender domains the tracker accepts mail from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainAllowlist {
    domains: HashSet<String>,
}

impl DomainAllowlist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| domain.as_ref().trim().trim_start_matches('@').to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();
        Self { domains }
    }

    pub fn allows(&self, address: &str) -> bool {
        domain_of(address)
            .map(|domain| self.domains.contains(&domain.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}
