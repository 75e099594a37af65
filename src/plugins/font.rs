//! Font records: names and sample text read from the font files a font
//! component ships, and extending fonts folded into their parent.
//!
//! The `Font*` metadata keys set here are working state for this plugin and
//! are stripped before catalogs are written.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::model::{App, AppKind, LOCALE_C};
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "font";

const FONT_GLOBS: &[&str] = &["/usr/share/fonts/*/*.otf", "/usr/share/fonts/*/*.ttf"];

/// `name` table ids and the metadata key each one fills.
const NAME_IDS: &[(u16, &str)] = &[
    (1, "FontFamily"),
    (2, "FontSubFamily"),
    (4, "FontFullName"),
    (16, "FontParent"),
];

const FOUNDRY_PREFIXES: &[&str] = &["GFS "];
const FOUNDRY_SUFFIXES: &[&str] = &[" SIL", " ADF", " CLM", " GPL&GNU", " SC"];

/// Short text for a font icon, by language.
const ICON_TEXT: &[(&str, &str)] = &[
    ("en", "Aa"),
    ("ar", "أب"),
    ("be", "Аа"),
    ("bg", "Аа"),
    ("cs", "Aa"),
    ("da", "Aa"),
    ("de", "Aa"),
    ("es", "Aa"),
    ("fr", "Aa"),
    ("gu", "અબક"),
    ("he", "אב"),
    ("it", "Aa"),
    ("ml", "ആഇ"),
    ("nl", "Aa"),
    ("pl", "ĄĘ"),
    ("pt", "Aa"),
    ("ru", "Аа"),
    ("sv", "Åäö"),
    ("ua", "Аа"),
    ("zh-tw", "漢"),
];

/// Pangram for a font preview, by language.
const SAMPLE_TEXT: &[(&str, &str)] = &[
    ("en", "How quickly daft jumping zebras vex."),
    ("be", "У Іўі худы жвавы чорт у зялёнай камізэльцы пабег пад’есці фаршу з юшкай."),
    ("bg", "Под южно дърво, цъфтящо в синьо, бягаше малко, пухкаво зайче."),
    ("cs", "Příliš žluťoučký kůň úpěl ďábelské ódy"),
    ("de", "Falsches Üben von Xylophonmusik quält jeden größeren Zwerg."),
    ("es", "Aquel biógrafo se zampó un extraño sándwich de vodka y ajo"),
    ("fr", "Voix ambiguë d'un cœur qui, au zéphyr, préfère les jattes de kiwis."),
    ("it", "Senza qualche prova ho il dubbio che si finga morto."),
    ("nl", "Pa's wijze lynx bezag vroom het fikse aquaduct."),
    ("pl", "Pójdźże, kiń tę chmurność w głąb flaszy!"),
    ("ru", "В чащах юга жил бы цитрус? Да, но фальшивый экземпляр!"),
    ("sv", "Gud hjälpe qvickt Zorns mö få aw byxor"),
    ("ua", "Чуєш їх, доцю, га? Кумедна ж ти, прощайся без ґольфів!"),
    ("zh-tw", "秋風滑過拔地紅樓角落，誤見釣人低聲吟詠離騷。"),
];

fn matches_font(filename: &str) -> bool {
    FONT_GLOBS.iter().any(|g| {
        glob::Pattern::new(g)
            .map(|p| p.matches(filename))
            .unwrap_or(false)
    })
}

// ============================================================================
// sfnt name table
// ============================================================================

fn be16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn be32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn decode_utf16be(raw: &[u8]) -> Option<String> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// English strings from the `name` table of a TrueType or OpenType font,
/// keyed by name id. Windows Unicode records win over Macintosh Roman ones.
pub fn read_names(data: &[u8]) -> Option<HashMap<u16, String>> {
    let version = be32(data, 0)?;
    if !matches!(version, 0x0001_0000 | 0x4F54_544F | 0x7472_7565) {
        return None;
    }
    let num_tables = usize::from(be16(data, 4)?);
    let table = (0..num_tables)
        .map(|i| 12 + i * 16)
        .find(|&record| data.get(record..record + 4) == Some(b"name"))?;
    let base = usize::try_from(be32(data, table + 8)?).ok()?;

    let count = usize::from(be16(data, base + 2)?);
    let strings = base + usize::from(be16(data, base + 4)?);

    let mut names: HashMap<u16, (u8, String)> = HashMap::new();
    for i in 0..count {
        let record = base + 6 + i * 12;
        let platform = be16(data, record)?;
        let encoding = be16(data, record + 2)?;
        let language = be16(data, record + 4)?;
        let name_id = be16(data, record + 6)?;
        let length = usize::from(be16(data, record + 8)?);
        let offset = usize::from(be16(data, record + 10)?);
        let Some(raw) = data.get(strings + offset..strings + offset + length) else {
            continue;
        };

        let (rank, value) = match (platform, encoding, language) {
            (3, 1, 0x0409) => (2, decode_utf16be(raw)),
            (0, _, _) => (1, decode_utf16be(raw)),
            (1, 0, 0) => (0, Some(raw.iter().map(|&b| char::from(b)).collect())),
            _ => continue,
        };
        let Some(value) = value else {
            continue;
        };
        match names.get(&name_id) {
            Some((best, _)) if *best >= rank => {}
            _ => {
                names.insert(name_id, (rank, value));
            }
        }
    }
    Some(names.into_iter().map(|(id, (_, v))| (id, v)).collect())
}

// ============================================================================
// Record building
// ============================================================================

fn is_valid_name(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(|c| c.is_ascii_control())
}

/// Family name without the foundry prefix or suffix.
fn display_name(family: &str) -> &str {
    let mut name = family;
    for suffix in FOUNDRY_SUFFIXES {
        name = name.strip_suffix(suffix).unwrap_or(name);
    }
    for prefix in FOUNDRY_PREFIXES {
        name = name.strip_prefix(prefix).unwrap_or(name);
    }
    name
}

/// Fills `FontSampleText` and `FontIconText` from the first listed
/// language a text is known for.
fn add_sample_text(package: &Package, app: &mut App) {
    let pick = |table: &[(&str, &'static str)], app: &App| {
        table
            .iter()
            .find(|(lang, _)| app.language(lang).is_some())
            .map(|(_, text)| *text)
    };
    if app.metadata_item("FontSampleText").is_none() {
        if let Some(text) = pick(SAMPLE_TEXT, app) {
            app.add_metadata("FontSampleText", text);
        }
    }
    if app.metadata_item("FontIconText").is_none() {
        if let Some(text) = pick(ICON_TEXT, app) {
            app.add_metadata("FontIconText", text);
        }
    }
    if app.metadata_item("FontSampleText").is_none() {
        let langs: Vec<&str> = app.languages.keys().map(String::as_str).collect();
        package.log(
            LogLevel::Warning,
            &format!("No FontSampleText for langs: {}", langs.join(", ")),
        );
    }
}

fn apply_font(package: &Package, app: &mut App, data: &[u8]) -> Result<(), PluginError> {
    let names = read_names(data)
        .ok_or_else(|| PluginError::failed(PLUGIN, "not a TrueType or OpenType font"))?;

    app.add_category("Addons");
    app.add_category("Fonts");

    let family = names.get(&1).map(String::as_str).unwrap_or_default();
    let style = names.get(&2).map(String::as_str).unwrap_or_default();
    if app.name().is_none() && !family.is_empty() {
        app.set_name(LOCALE_C, display_name(family));
    }
    if app.summary().is_none() && !family.is_empty() {
        app.set_summary(LOCALE_C, &format!("A {} font from {}", style, family));
    }

    // no coverage data without fontconfig
    if app.languages.is_empty() {
        app.add_language("en", 0);
    }

    for (id, key) in NAME_IDS {
        let Some(value) = names.get(id) else {
            continue;
        };
        if is_valid_name(value) {
            app.add_metadata(key, value);
        } else {
            package.log(
                LogLevel::Warning,
                &format!("Ignoring {} value: '{}'", key, value.escape_default()),
            );
        }
    }
    add_sample_text(package, app);
    Ok(())
}

#[derive(Debug, Default)]
pub struct FontPlugin;

impl Plugin for FontPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.extend(FONT_GLOBS.iter().map(|g| g.to_string()));
    }

    fn check_filename(&self, filename: &str) -> bool {
        matches_font(filename)
    }

    fn process_app(
        &self,
        package: &Package,
        app: &mut App,
        tmpdir: &Path,
    ) -> Result<(), PluginError> {
        if app.kind != AppKind::Font {
            return Ok(());
        }
        for filename in package.filelist().iter().filter(|f| matches_font(f)) {
            let path = tmpdir.join(filename.trim_start_matches('/'));
            let result = fs::read(&path)
                .map_err(PluginError::from)
                .and_then(|data| apply_font(package, app, &data));
            if let Err(e) = result {
                package.log(
                    LogLevel::Warning,
                    &format!("Failed to get font from {}: {}", path.display(), e),
                );
            }
        }
        Ok(())
    }

    fn merge(&self, apps: &mut Vec<App>) {
        let fonts: HashMap<String, usize> = apps
            .iter()
            .enumerate()
            .filter(|(_, a)| a.kind == AppKind::Font)
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        for i in 0..apps.len() {
            if apps[i].kind != AppKind::Font {
                continue;
            }
            let Some(target) = apps[i].extends.first().cloned() else {
                continue;
            };
            let Some(&parent) = fonts.get(&target) else {
                warn!(font = %apps[i].id, parent = %target, "Extended font not found");
                continue;
            };
            if parent == i {
                continue;
            }
            let child = apps[i].clone();
            apps[parent].subsume(&child);
            let parent_id = apps[parent].id.clone();
            debug!(font = %child.id, parent = %parent_id, "Merged font");
            apps[i].add_veto(format!("{} was merged into {}", child.id, parent_id));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
