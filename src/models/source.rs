use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A configured listing page or feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,

    #[serde(default)]
    pub fetch: FetchMode,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    // Browser navigation
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default)]
    pub navigation: Vec<NavigationStep>,
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Whole-attempt timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Per-source cap on extracted records.
    #[serde(default)]
    pub max_items: Option<usize>,

    pub extract: ExtractRules,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Browser,
    Http,
    File,
}

/// Browser action run after the page has loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NavigationStep {
    Click { selector: String },
    WaitFor { selector: String },
    SleepMs { ms: u64 },
    Evaluate { script: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ExtractRules {
    Html(HtmlRules),
    Json(JsonRules),
}

/// CSS selectors evaluated relative to each listing row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HtmlRules {
    pub row: String,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default = "default_link_attr")]
    pub link_attr: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Regex with one capture group, applied to the link when no id element matches.
    #[serde(default)]
    pub id_pattern: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Summary or scope text; searched by the relevance filter.
    #[serde(default)]
    pub description: Option<String>,
}

/// JSON pointers; field pointers are relative to each item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRules {
    #[serde(default)]
    pub items: String,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub id_pattern: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Summary or scope text; searched by the relevance filter.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_pages() -> usize {
    1
}

fn default_link_attr() -> String {
    "href".to_string()
}

impl SourceConfig {
    pub fn attempt_timeout(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(default_secs).max(1))
    }

    pub fn item_limit(&self, default_limit: usize) -> usize {
        self.max_items.unwrap_or(default_limit)
    }

    pub fn id_pattern(&self) -> Option<&str> {
        match &self.extract {
            ExtractRules::Html(rules) => rules.id_pattern.as_deref(),
            ExtractRules::Json(rules) => rules.id_pattern.as_deref(),
        }
    }

    /// Every CSS selector the source refers to, for up-front validation.
    pub fn css_selectors(&self) -> Vec<&str> {
        let mut selectors = Vec::new();
        selectors.extend(self.wait_for.as_deref());
        selectors.extend(self.next_page.as_deref());
        for step in &self.navigation {
            match step {
                NavigationStep::Click { selector } | NavigationStep::WaitFor { selector } => {
                    selectors.push(selector.as_str())
                }
                NavigationStep::SleepMs { .. } | NavigationStep::Evaluate { .. } => {}
            }
        }
        if let ExtractRules::Html(rules) = &self.extract {
            selectors.push(rules.row.as_str());
            selectors.push(rules.title.as_str());
            selectors.extend(rules.link.as_deref());
            selectors.extend(rules.id.as_deref());
            selectors.extend(rules.deadline.as_deref());
            selectors.extend(rules.buyer.as_deref());
            selectors.extend(rules.category.as_deref());
            selectors.extend(rules.description.as_deref());
        }
        selectors
    }

    pub fn needs_browser(&self) -> bool {
        self.fetch == FetchMode::Browser
    }

    pub fn uses_browser_navigation(&self) -> bool {
        self.wait_for.is_some() || !self.navigation.is_empty() || self.next_page.is_some()
    }
}
