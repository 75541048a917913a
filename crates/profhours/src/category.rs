use std::collections::BTreeMap;
use std::fmt;

/// Platforms the categorization backend buckets as UI profile hours.
/// Everything else counts as backend.
pub const UI_PLATFORMS: [&str; 3] = ["javascript", "android", "cocoa"];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Platform(String);

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ui(&self) -> bool {
        UI_PLATFORMS.contains(&self.0.as_str())
    }

    /// Source file extension used for synthetic frame paths.
    pub fn source_extension(&self) -> &'static str {
        match self.0.as_str() {
            "javascript" | "node" => "js",
            "android" | "java" => "java",
            "cocoa" => "swift",
            "python" => "py",
            _ => "rs",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Ui,
    Backend,
}

/// Decides the category tag attached to every emitted item.
///
/// The same value is written to the envelope item header (which the
/// ingestion fast path classifies on) and to the payload's `platform` field,
/// so both always agree.
pub trait CategoryTagger: Send + Sync {
    fn platform(&self) -> &Platform;

    fn category(&self) -> Category {
        if self.platform().is_ui() {
            Category::Ui
        } else {
            Category::Backend
        }
    }

    /// Tags describing the categorization, merged into every payload.
    fn tags(&self) -> BTreeMap<String, String> {
        let is_ui = (self.category() == Category::Ui).to_string();
        BTreeMap::from([
            ("is_ui_platform".to_owned(), is_ui.clone()),
            ("ui_profile_test".to_owned(), is_ui),
            ("platform_override".to_owned(), self.platform().to_string()),
        ])
    }
}

/// Tags every item with one fixed platform.
#[derive(Clone, Debug)]
pub struct PlatformTagger {
    platform: Platform,
}

impl PlatformTagger {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl CategoryTagger for PlatformTagger {
    fn platform(&self) -> &Platform {
        &self.platform
    }
}
