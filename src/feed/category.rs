//! Topical categories and the taxonomy → category resolver.
//!
//! Taxonomy authors add groups and subgroups faster than mapping tables get
//! updated, so resolution never fails: an unknown pair degrades through
//! group-only rules and keyword rules to a configurable default bucket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of article categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Crypto,
    Cybercrime,
    Dfir,
    General,
    GovCert,
    Leaks,
    Malware,
    ThreatIntel,
    MalwareAnalysis,
    Osint,
    Podcasts,
    Vendors,
    Vulns,
    Exploits,
    VulnAdvisories,
    /// Explicit bucket for taxonomy nodes no rule knows about.
    Other,
}

impl Category {
    pub const ALL: [Category; 16] = [
        Category::Crypto,
        Category::Cybercrime,
        Category::Dfir,
        Category::General,
        Category::GovCert,
        Category::Leaks,
        Category::Malware,
        Category::ThreatIntel,
        Category::MalwareAnalysis,
        Category::Osint,
        Category::Podcasts,
        Category::Vendors,
        Category::Vulns,
        Category::Exploits,
        Category::VulnAdvisories,
        Category::Other,
    ];

    /// Stable machine name, as used in config files and on the command line.
    pub fn slug(self) -> &'static str {
        match self {
            Category::Crypto => "crypto",
            Category::Cybercrime => "cybercrime",
            Category::Dfir => "dfir",
            Category::General => "general",
            Category::GovCert => "gov_cert",
            Category::Leaks => "leaks",
            Category::Malware => "malware",
            Category::ThreatIntel => "threat_intel",
            Category::MalwareAnalysis => "malware_analysis",
            Category::Osint => "osint",
            Category::Podcasts => "podcasts",
            Category::Vendors => "vendors",
            Category::Vulns => "vulns",
            Category::Exploits => "exploits",
            Category::VulnAdvisories => "vuln_advisories",
            Category::Other => "other",
        }
    }

    /// Human-readable label. Also part of the searchable text of an article.
    pub fn label(self) -> &'static str {
        match self {
            Category::Crypto => "Crypto",
            Category::Cybercrime => "Cybercrime",
            Category::Dfir => "DFIR",
            Category::General => "General",
            Category::GovCert => "Gov / CERT",
            Category::Leaks => "Leaks",
            Category::Malware => "Malware",
            Category::ThreatIntel => "Threat Intel",
            Category::MalwareAnalysis => "Malware Analysis",
            Category::Osint => "OSINT",
            Category::Podcasts => "Podcasts",
            Category::Vendors => "Vendors",
            Category::Vulns => "Vulnerabilities",
            Category::Exploits => "Exploits",
            Category::VulnAdvisories => "Advisories",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Accepts either the slug or the label, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.slug().eq_ignore_ascii_case(wanted) || c.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Built-in topic keywords, checked in order. More specific topics come
/// before the broader ones they overlap (`malware analysis` before `malware`).
const BUILTIN_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Crypto, &["crypto", "blockchain"]),
    (Category::Cybercrime, &["cybercrime", "darknet"]),
    (Category::Dfir, &["dfir", "forensics"]),
    (Category::General, &["general", "security news", "infosec"]),
    (Category::GovCert, &["cert", "government", "gov"]),
    (Category::Leaks, &["leaks", "breaches", "pwned"]),
    (Category::MalwareAnalysis, &["malware analysis", "reversing"]),
    (Category::Malware, &["malware", "ransomware"]),
    (Category::ThreatIntel, &["threat intel", "apt", "campaigns"]),
    (Category::Osint, &["osint", "communities"]),
    (Category::Podcasts, &["podcast"]),
    (Category::Vendors, &["vendor"]),
    (Category::VulnAdvisories, &["advisories", "advisory"]),
    (Category::Vulns, &["vulnerab", "cve"]),
    (Category::Exploits, &["exploit", "0day"]),
];

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Maps taxonomy (group, subgroup) pairs to categories.
///
/// Lookup order: exact pair, group only, keyword rules, default. Every
/// lookup returns a category; an empty resolver returns the default.
#[derive(Debug, Clone)]
pub struct CategoryResolver {
    exact: HashMap<(String, String), Category>,
    groups: HashMap<String, Category>,
    keywords: Vec<(Category, Vec<String>)>,
    default: Category,
}

impl Default for CategoryResolver {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            groups: HashMap::new(),
            keywords: Vec::new(),
            default: Category::Other,
        }
    }
}

impl CategoryResolver {
    pub fn new(default: Category) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    /// Maps an exact (group, subgroup) pair.
    pub fn map_pair(mut self, group: &str, subgroup: &str, category: Category) -> Self {
        self.exact
            .insert((normalize(group), normalize(subgroup)), category);
        self
    }

    /// Maps every subgroup of `group` not matched by a pair rule.
    pub fn map_group(mut self, group: &str, category: Category) -> Self {
        self.groups.insert(normalize(group), category);
        self
    }

    /// Adds a keyword rule; keywords are matched as substrings of the group
    /// and subgroup text.
    pub fn map_keywords<I, S>(mut self, category: Category, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();
        if !keywords.is_empty() {
            self.keywords.push((category, keywords));
        }
        self
    }

    /// Appends the built-in keyword table after any configured keyword rules.
    pub fn with_builtin_keywords(self) -> Self {
        BUILTIN_KEYWORDS
            .iter()
            .fold(self, |resolver, (category, words)| {
                resolver.map_keywords(*category, words.iter())
            })
    }

    pub fn default_category(&self) -> Category {
        self.default
    }

    pub fn resolve(&self, group: &str, subgroup: &str) -> Category {
        let group = normalize(group);
        let subgroup = normalize(subgroup);

        if let Some(category) = self.exact.get(&(group.clone(), subgroup.clone())) {
            return *category;
        }
        if let Some(category) = self.groups.get(&group) {
            return *category;
        }

        let text = format!("{} / {}", group, subgroup);
        for (category, words) in &self.keywords {
            if words.iter().any(|w| text.contains(w.as_str())) {
                return *category;
            }
        }

        tracing::debug!(group = %group, subgroup = %subgroup, category = %self.default, "No category rule matched, using default");
        self.default
    }
}
