//! Application record model.
//!
//! An [`App`] is one emitted catalog component (desktop application, addon,
//! firmware, font, ...). Plugins create them, the build pipeline enriches
//! them and attaches vetoes, and [`crate::catalog`] serializes them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Locale key used for untranslated values.
pub const LOCALE_C: &str = "C";

// ============================================================================
// Kinds
// ============================================================================

/// Component kind, as written in the `type` attribute of `<component>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    #[default]
    Unknown,
    Desktop,
    Font,
    Codec,
    InputMethod,
    WebApp,
    Source,
    Addon,
    Firmware,
    Runtime,
    Generic,
    Localization,
    ShellExtension,
    Driver,
    Console,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Unknown => "unknown",
            AppKind::Desktop => "desktop",
            AppKind::Font => "font",
            AppKind::Codec => "codec",
            AppKind::InputMethod => "inputmethod",
            AppKind::WebApp => "webapp",
            AppKind::Source => "source",
            AppKind::Addon => "addon",
            AppKind::Firmware => "firmware",
            AppKind::Runtime => "runtime",
            AppKind::Generic => "generic",
            AppKind::Localization => "localization",
            AppKind::ShellExtension => "shell-extension",
            AppKind::Driver => "driver",
            AppKind::Console => "console-application",
        }
    }

    /// Parses a `type` attribute. Unrecognized values map to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "desktop" | "desktop-application" => AppKind::Desktop,
            "font" => AppKind::Font,
            "codec" => AppKind::Codec,
            "inputmethod" | "input-method" => AppKind::InputMethod,
            "webapp" | "web-application" => AppKind::WebApp,
            "source" => AppKind::Source,
            "addon" => AppKind::Addon,
            "firmware" => AppKind::Firmware,
            "runtime" => AppKind::Runtime,
            "generic" => AppKind::Generic,
            "localization" => AppKind::Localization,
            "shell-extension" => AppKind::ShellExtension,
            "driver" => AppKind::Driver,
            "console-application" | "console" => AppKind::Console,
            _ => AppKind::Unknown,
        }
    }

    /// Whether a record of this kind must carry an icon to be published.
    pub fn requires_icon(&self) -> bool {
        !matches!(
            self,
            AppKind::Addon
                | AppKind::Firmware
                | AppKind::Driver
                | AppKind::Generic
                | AppKind::Localization
                | AppKind::Codec
                | AppKind::InputMethod
                | AppKind::ShellExtension
        )
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an icon is referenced from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    /// Named icon from the stock theme.
    Stock,
    /// Icon file shipped in the icons tarball.
    Cached,
    /// Absolute path on the installed system.
    Local,
    /// PNG data inlined into the catalog.
    Embedded,
    /// Icon fetched from a URL.
    Remote,
}

impl IconKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IconKind::Stock => "stock",
            IconKind::Cached => "cached",
            IconKind::Local => "local",
            IconKind::Embedded => "embedded",
            IconKind::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stock" => Some(IconKind::Stock),
            "cached" => Some(IconKind::Cached),
            "local" => Some(IconKind::Local),
            "embedded" => Some(IconKind::Embedded),
            "remote" => Some(IconKind::Remote),
            _ => None,
        }
    }
}

// ============================================================================
// Record parts
// ============================================================================

/// An icon attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Icon {
    pub kind: IconKind,

    /// Icon name, cache filename, path or URL depending on `kind`.
    pub name: String,

    pub width: u32,
    pub height: u32,

    /// File the icon was found at inside an exploded package tree.
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// Raw bytes for embedded icons.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl Icon {
    pub fn stock(name: &str) -> Self {
        Self {
            kind: IconKind::Stock,
            name: name.to_string(),
            width: 0,
            height: 0,
            source: None,
            data: None,
        }
    }

    pub fn cached(name: &str, size: u32, source: PathBuf) -> Self {
        Self {
            kind: IconKind::Cached,
            name: name.to_string(),
            width: size,
            height: size,
            source: Some(source),
            data: None,
        }
    }
}

/// One release entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,

    /// Unix timestamp (seconds).
    pub timestamp: u64,

    pub description: Option<String>,
}

impl Release {
    pub fn new(version: &str, timestamp: u64) -> Self {
        Self {
            version: version.to_string(),
            timestamp,
            description: None,
        }
    }
}

/// A single screenshot image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotImage {
    pub url: String,
    pub width: u32,
    pub height: u32,

    /// Local copy found in an exploded tree or the extra screenshots dir.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Screenshot {
    pub is_default: bool,
    pub caption: Option<String>,
    pub images: Vec<ScreenshotImage>,
}

/// A block of description markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptionBlock {
    Paragraph(String),
    List { ordered: bool, items: Vec<String> },
}

/// Something a component provides (binary, library, mimetype, firmware guid ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provide {
    pub kind: String,
    pub value: String,
}

/// Back-reference from a record to the package that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppOrigin {
    /// Index of the package inside the build context, if it came from one.
    pub package: Option<usize>,
    pub name: String,
    pub nevr: String,
    pub arch: String,
    pub filename: String,
}

// ============================================================================
// Application record
// ============================================================================

/// One application metadata record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub kind: AppKind,

    pub names: BTreeMap<String, String>,
    pub summaries: BTreeMap<String, String>,
    pub descriptions: BTreeMap<String, Vec<DescriptionBlock>>,
    pub keywords: BTreeMap<String, Vec<String>>,

    pub developer_name: Option<String>,
    pub project_license: Option<String>,
    pub project_group: Option<String>,
    pub source_pkgname: Option<String>,

    /// URL kind (`homepage`, `bugtracker`, ...) to URL.
    pub urls: BTreeMap<String, String>,

    pub icons: Vec<Icon>,
    pub screenshots: Vec<Screenshot>,
    pub releases: Vec<Release>,
    pub provides: Vec<Provide>,
    pub categories: Vec<String>,
    pub mimetypes: Vec<String>,
    pub kudos: Vec<String>,
    pub extends: Vec<String>,
    pub pkgnames: Vec<String>,

    /// Locale to translation percentage.
    pub languages: BTreeMap<String, i32>,

    /// Free-form `<custom>` metadata.
    pub metadata: BTreeMap<String, String>,

    /// Rejection reasons. A vetoed record never reaches the primary catalog.
    pub vetoes: Vec<String>,

    /// Reasons this record is only publishable with AppData merged in.
    #[serde(skip)]
    pub requires_appdata: Vec<String>,

    #[serde(skip)]
    pub origin: Option<AppOrigin>,
}

impl App {
    pub fn new(id: &str, kind: AppKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.names.get(LOCALE_C).map(String::as_str)
    }

    pub fn summary(&self) -> Option<&str> {
        self.summaries.get(LOCALE_C).map(String::as_str)
    }

    pub fn set_name(&mut self, locale: &str, value: &str) {
        self.names.insert(locale.to_string(), value.to_string());
    }

    pub fn set_summary(&mut self, locale: &str, value: &str) {
        self.summaries.insert(locale.to_string(), value.to_string());
    }

    /// First package name, used for duplicate-package warnings.
    pub fn pkgname_default(&self) -> Option<&str> {
        self.pkgnames.first().map(String::as_str)
    }

    pub fn add_pkgname(&mut self, pkgname: &str) {
        if !self.pkgnames.iter().any(|p| p == pkgname) {
            self.pkgnames.push(pkgname.to_string());
        }
    }

    pub fn add_veto(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.vetoes.contains(&reason) {
            self.vetoes.push(reason);
        }
    }

    pub fn is_vetoed(&self) -> bool {
        !self.vetoes.is_empty()
    }

    pub fn add_kudo(&mut self, kudo: &str) {
        if !self.kudos.iter().any(|k| k == kudo) {
            self.kudos.push(kudo.to_string());
        }
    }

    pub fn has_kudo(&self, kudo: &str) -> bool {
        self.kudos.iter().any(|k| k == kudo)
    }

    pub fn add_category(&mut self, category: &str) {
        if !self.categories.iter().any(|c| c == category) {
            self.categories.push(category.to_string());
        }
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    pub fn add_provide(&mut self, kind: &str, value: &str) {
        let provide = Provide {
            kind: kind.to_string(),
            value: value.to_string(),
        };
        if !self.provides.contains(&provide) {
            self.provides.push(provide);
        }
    }

    /// Adds a keyword, ignoring duplicates within the same locale.
    pub fn add_keyword(&mut self, locale: &str, keyword: &str) {
        let words = self.keywords.entry(locale.to_string()).or_default();
        if !words.iter().any(|w| w == keyword) {
            words.push(keyword.to_string());
        }
    }

    pub fn add_language(&mut self, locale: &str, percentage: i32) {
        self.languages.insert(locale.to_string(), percentage);
    }

    /// Translation percentage of `locale`, if the record lists it.
    pub fn language(&self, locale: &str) -> Option<i32> {
        self.languages.get(locale).copied()
    }

    pub fn add_extends(&mut self, id: &str) {
        if !self.extends.iter().any(|e| e == id) {
            self.extends.push(id.to_string());
        }
    }

    pub fn add_icon(&mut self, icon: Icon) {
        if !self.icons.iter().any(|i| i.kind == icon.kind && i.name == icon.name) {
            self.icons.push(icon);
        }
    }

    /// Adds a release, keeping the earliest timestamp seen for a version.
    pub fn add_release(&mut self, release: Release) {
        match self.releases.iter_mut().find(|r| r.version == release.version) {
            Some(existing) => {
                if release.timestamp != 0 && release.timestamp < existing.timestamp {
                    existing.timestamp = release.timestamp;
                }
                if existing.description.is_none() {
                    existing.description = release.description;
                }
            }
            None => self.releases.push(release),
        }
    }

    /// Releases newest first, the order they are written in.
    pub fn sorted_releases(&self) -> Vec<&Release> {
        let mut releases: Vec<&Release> = self.releases.iter().collect();
        releases.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        releases
    }

    pub fn url(&self, kind: &str) -> Option<&str> {
        self.urls.get(kind).map(String::as_str)
    }

    pub fn set_url(&mut self, kind: &str, url: &str) {
        self.urls.insert(kind.to_string(), url.to_string());
    }

    pub fn metadata_item(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn add_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn remove_metadata(&mut self, key: &str) {
        self.metadata.remove(key);
    }

    /// Absorbs the translatable and list fields of `other` without
    /// overwriting values this record already has.
    pub fn subsume(&mut self, other: &App) {
        for (locale, value) in &other.names {
            self.names.entry(locale.clone()).or_insert_with(|| value.clone());
        }
        for (locale, value) in &other.summaries {
            self.summaries
                .entry(locale.clone())
                .or_insert_with(|| value.clone());
        }
        for (locale, value) in &other.descriptions {
            self.descriptions
                .entry(locale.clone())
                .or_insert_with(|| value.clone());
        }
        for (kind, url) in &other.urls {
            self.urls.entry(kind.clone()).or_insert_with(|| url.clone());
        }
        for provide in &other.provides {
            self.add_provide(&provide.kind, &provide.value);
        }
        for kudo in &other.kudos {
            self.add_kudo(kudo);
        }
        for pkgname in &other.pkgnames {
            self.add_pkgname(pkgname);
        }
        for category in &other.categories {
            self.add_category(category);
        }
        for (locale, percentage) in &other.languages {
            self.languages.entry(locale.clone()).or_insert(*percentage);
        }
        for screenshot in &other.screenshots {
            if !self.screenshots.contains(screenshot) {
                self.screenshots.push(screenshot.clone());
            }
        }
        if self.project_license.is_none() {
            self.project_license = other.project_license.clone();
        }
        if self.developer_name.is_none() {
            self.developer_name = other.developer_name.clone();
        }
    }

    /// Human-readable identity of the producing package, for diagnostics.
    pub fn origin_label(&self) -> String {
        match &self.origin {
            Some(origin) => origin.nevr.clone(),
            None => self
                .pkgname_default()
                .map(str::to_string)
                .unwrap_or_else(|| self.id.clone()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [AppKind::Desktop, AppKind::Addon, AppKind::ShellExtension] {
            assert_eq!(AppKind::parse(kind.as_str()), kind);
        }
        assert_eq!(AppKind::parse("nonsense"), AppKind::Unknown);
    }

    #[test]
    fn test_icon_requirement_by_kind() {
        assert!(AppKind::Desktop.requires_icon());
        assert!(AppKind::Font.requires_icon());
        assert!(!AppKind::Addon.requires_icon());
        assert!(!AppKind::Firmware.requires_icon());
        assert!(!AppKind::Codec.requires_icon());
    }

    #[test]
    fn test_release_keeps_earliest_timestamp() {
        let mut app = App::new("foo.desktop", AppKind::Desktop);
        app.add_release(Release::new("1.0", 200));
        app.add_release(Release::new("1.0", 100));
        app.add_release(Release::new("1.0", 300));
        app.add_release(Release::new("2.0", 400));

        assert_eq!(app.releases.len(), 2);
        assert_eq!(app.releases[0].timestamp, 100);
        assert_eq!(app.sorted_releases()[0].version, "2.0");
    }

    #[test]
    fn test_vetoes_are_deduplicated() {
        let mut app = App::new("foo.desktop", AppKind::Desktop);
        assert!(!app.is_vetoed());
        app.add_veto("Has no Icon");
        app.add_veto("Has no Icon");
        assert_eq!(app.vetoes.len(), 1);
        assert!(app.is_vetoed());
    }

    #[test]
    fn test_subsume_does_not_overwrite() {
        let mut parent = App::new("foo.desktop", AppKind::Desktop);
        parent.set_name(LOCALE_C, "Foo");

        let mut addon = App::new("foo-extra", AppKind::Addon);
        addon.set_name(LOCALE_C, "Foo Extra");
        addon.set_name("de", "Foo Extra DE");
        addon.add_kudo("UserDocs");

        parent.subsume(&addon);
        assert_eq!(parent.name(), Some("Foo"));
        assert_eq!(parent.names.get("de").map(String::as_str), Some("Foo Extra DE"));
        assert!(parent.has_kudo("UserDocs"));
    }
}
