// src/model.rs
//! Records shared by the store, the catalog and the triggers.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Identity of a reading-window entry. Monotonic, so it doubles as a tie-breaker
/// for entries appended within the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A processed news item as handed over by the upstream producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub url: String,
    pub source: String,
    pub category: String,
    #[serde(default)]
    pub trans_title: Option<String>,
    #[serde(default)]
    pub trans_summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Membership of one item in the reading window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingWindowEntry {
    pub id: EntryId,
    pub item: NewsItem,
    pub category: String,
    pub added_at: DateTime<Utc>,
    pub pushed: bool,
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Set of category tags. Empty means "every category".
///
/// Deserializes from a list (`["tech", "ai"]`) or from the comma separated form the
/// admin UI submits (`"tech, ai"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CategoryFilter(BTreeSet<String>);

impl<'de> Deserialize<'de> for CategoryFilter {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Csv(String),
            List(Vec<String>),
        }
        Ok(match Raw::deserialize(d)? {
            Raw::Csv(s) => Self::parse_csv(&s),
            Raw::List(v) => Self::of(v),
        })
    }
}

impl CategoryFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tags.into_iter()
                .map(|t| normalize_category(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Parse the comma separated form (`"tech, ai"`).
    pub fn parse_csv(raw: &str) -> Self {
        Self::of(raw.split(','))
    }

    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, category: &str) -> bool {
        self.is_any() || self.0.contains(&normalize_category(category))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        let joined: Vec<&str> = self.tags().collect();
        f.write_str(&joined.join(","))
    }
}

pub fn normalize_category(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Operator-authored template record. The body must compile before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    /// Subject line; may itself contain template actions (`Digest {{.Date}}`).
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub is_default: bool,
    pub updated_at: DateTime<Utc>,
}

/// A cron-driven push task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub cron_expr: String,
    pub channel_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub categories: CategoryFilter,
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_AUTO_PUSH_THRESHOLD: usize = 6;

/// Process-wide auto-push settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPushConfig {
    pub enabled: bool,
    pub threshold: usize,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
}

impl Default for AutoPushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_AUTO_PUSH_THRESHOLD,
            channel_id: None,
            template_id: None,
        }
    }
}

impl AutoPushConfig {
    /// A threshold below 1 falls back to the default; blank ids are treated as unset.
    pub fn normalized(mut self) -> Self {
        if self.threshold < 1 {
            self.threshold = DEFAULT_AUTO_PUSH_THRESHOLD;
        }
        self.channel_id = self.channel_id.filter(|s| !s.trim().is_empty());
        self.template_id = self.template_id.filter(|s| !s.trim().is_empty());
        self
    }
}
