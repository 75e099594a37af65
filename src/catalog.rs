//! AppStream collection catalogs and resource archives.
//!
//! Catalogs are `<components>` documents written with `xml-rs` and
//! gzip-compressed with `flate2`. The reader turns `<component>` elements
//! back into [`App`] records; it is used for firmware metainfo files, the
//! previous run's catalog and hand-written extra catalogs.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::harvest::resources::{decode_icon, encode_icon};
use crate::markup::{Element, XmlError};
use crate::model::{
    App, AppKind, DescriptionBlock, Icon, IconKind, Release, Screenshot, ScreenshotImage,
    LOCALE_C,
};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: XmlError,
    },

    #[error("'{path}' is not an AppStream document")]
    NotAppStream { path: String },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to emit XML: {0}")]
    Emit(#[from] xml::writer::Error),
}

impl CatalogError {
    fn read(path: &Path, source: std::io::Error) -> Self {
        CatalogError::Read {
            path: path.display().to_string(),
            source,
        }
    }

    fn write(path: &Path, source: std::io::Error) -> Self {
        CatalogError::Write {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Header attributes of a catalog.
#[derive(Debug, Clone)]
pub struct CatalogHeader<'a> {
    pub origin: &'a str,
    pub api_version: &'a str,
}

// ============================================================================
// Writing
// ============================================================================

type Writer<W> = EventWriter<W>;

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), CatalogError> {
    writer.write(XmlEvent::start_element(name))?;
    writer.write(XmlEvent::characters(text))?;
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

fn localized<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    values: &std::collections::BTreeMap<String, String>,
) -> Result<(), CatalogError> {
    if let Some(value) = values.get(LOCALE_C) {
        text_element(writer, name, value)?;
    }
    for (locale, value) in values.iter().filter(|(l, _)| l.as_str() != LOCALE_C) {
        writer.write(XmlEvent::start_element(name).attr("xml:lang", locale))?;
        writer.write(XmlEvent::characters(value))?;
        writer.write(XmlEvent::end_element())?;
    }
    Ok(())
}

fn list<W: Write>(
    writer: &mut Writer<W>,
    outer: &str,
    inner: &str,
    items: &[String],
) -> Result<(), CatalogError> {
    if items.is_empty() {
        return Ok(());
    }
    writer.write(XmlEvent::start_element(outer))?;
    for item in items {
        text_element(writer, inner, item)?;
    }
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_description<W: Write>(
    writer: &mut Writer<W>,
    locale: &str,
    blocks: &[DescriptionBlock],
) -> Result<(), CatalogError> {
    if locale == LOCALE_C {
        writer.write(XmlEvent::start_element("description"))?;
    } else {
        writer.write(XmlEvent::start_element("description").attr("xml:lang", locale))?;
    }
    for block in blocks {
        match block {
            DescriptionBlock::Paragraph(text) => text_element(writer, "p", text)?,
            DescriptionBlock::List { ordered, items } => {
                list(writer, if *ordered { "ol" } else { "ul" }, "li", items)?
            }
        }
    }
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_icon<W: Write>(writer: &mut Writer<W>, icon: &Icon) -> Result<(), CatalogError> {
    let width = icon.width.to_string();
    let height = icon.height.to_string();
    let mut start = XmlEvent::start_element("icon").attr("type", icon.kind.as_str());
    if icon.width > 0 {
        start = start.attr("width", &width).attr("height", &height);
    }
    writer.write(start)?;
    match (icon.kind, &icon.data) {
        (IconKind::Embedded, Some(data)) => {
            text_element(writer, "name", &icon.name)?;
            text_element(writer, "filecontent", &encode_icon(data))?;
        }
        _ => writer.write(XmlEvent::characters(&icon.name))?,
    }
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_screenshot<W: Write>(
    writer: &mut Writer<W>,
    shot: &Screenshot,
) -> Result<(), CatalogError> {
    if shot.is_default {
        writer.write(XmlEvent::start_element("screenshot").attr("type", "default"))?;
    } else {
        writer.write(XmlEvent::start_element("screenshot"))?;
    }
    if let Some(caption) = &shot.caption {
        text_element(writer, "caption", caption)?;
    }
    for image in &shot.images {
        let width = image.width.to_string();
        let height = image.height.to_string();
        let mut start = XmlEvent::start_element("image").attr("type", "source");
        if image.width > 0 {
            start = start.attr("width", &width).attr("height", &height);
        }
        writer.write(start)?;
        writer.write(XmlEvent::characters(&image.url))?;
        writer.write(XmlEvent::end_element())?;
    }
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_component<W: Write>(writer: &mut Writer<W>, app: &App) -> Result<(), CatalogError> {
    writer.write(XmlEvent::start_element("component").attr("type", app.kind.as_str()))?;
    text_element(writer, "id", &app.id)?;
    for pkgname in &app.pkgnames {
        text_element(writer, "pkgname", pkgname)?;
    }
    if let Some(source) = &app.source_pkgname {
        text_element(writer, "source_pkgname", source)?;
    }
    localized(writer, "name", &app.names)?;
    localized(writer, "summary", &app.summaries)?;
    if let Some(developer) = &app.developer_name {
        text_element(writer, "developer_name", developer)?;
    }
    for (locale, blocks) in &app.descriptions {
        write_description(writer, locale, blocks)?;
    }
    for icon in &app.icons {
        write_icon(writer, icon)?;
    }
    list(writer, "categories", "category", &app.categories)?;
    if !app.keywords.is_empty() {
        writer.write(XmlEvent::start_element("keywords"))?;
        for (locale, words) in &app.keywords {
            for word in words {
                if locale == LOCALE_C {
                    text_element(writer, "keyword", word)?;
                } else {
                    writer.write(XmlEvent::start_element("keyword").attr("xml:lang", locale))?;
                    writer.write(XmlEvent::characters(word))?;
                    writer.write(XmlEvent::end_element())?;
                }
            }
        }
        writer.write(XmlEvent::end_element())?;
    }
    list(writer, "kudos", "kudo", &app.kudos)?;
    list(writer, "mimetypes", "mimetype", &app.mimetypes)?;
    if !app.languages.is_empty() {
        writer.write(XmlEvent::start_element("languages"))?;
        for (locale, percentage) in &app.languages {
            let percentage = percentage.to_string();
            writer.write(XmlEvent::start_element("lang").attr("percentage", &percentage))?;
            writer.write(XmlEvent::characters(locale))?;
            writer.write(XmlEvent::end_element())?;
        }
        writer.write(XmlEvent::end_element())?;
    }
    if let Some(license) = &app.project_license {
        text_element(writer, "project_license", license)?;
    }
    if let Some(group) = &app.project_group {
        text_element(writer, "project_group", group)?;
    }
    for (kind, url) in &app.urls {
        writer.write(XmlEvent::start_element("url").attr("type", kind))?;
        writer.write(XmlEvent::characters(url))?;
        writer.write(XmlEvent::end_element())?;
    }
    for extends in &app.extends {
        text_element(writer, "extends", extends)?;
    }
    if !app.screenshots.is_empty() {
        writer.write(XmlEvent::start_element("screenshots"))?;
        for shot in &app.screenshots {
            write_screenshot(writer, shot)?;
        }
        writer.write(XmlEvent::end_element())?;
    }
    if !app.releases.is_empty() {
        writer.write(XmlEvent::start_element("releases"))?;
        for release in app.sorted_releases() {
            let timestamp = release.timestamp.to_string();
            writer.write(
                XmlEvent::start_element("release")
                    .attr("version", &release.version)
                    .attr("timestamp", &timestamp),
            )?;
            if let Some(description) = &release.description {
                writer.write(XmlEvent::start_element("description"))?;
                text_element(writer, "p", description)?;
                writer.write(XmlEvent::end_element())?;
            }
            writer.write(XmlEvent::end_element())?;
        }
        writer.write(XmlEvent::end_element())?;
    }
    if !app.provides.is_empty() {
        writer.write(XmlEvent::start_element("provides"))?;
        for provide in &app.provides {
            text_element(writer, &provide.kind, &provide.value)?;
        }
        writer.write(XmlEvent::end_element())?;
    }
    list(writer, "vetos", "veto", &app.vetoes)?;
    if !app.metadata.is_empty() {
        writer.write(XmlEvent::start_element("metadata"))?;
        for (key, value) in &app.metadata {
            writer.write(XmlEvent::start_element("value").attr("key", key))?;
            writer.write(XmlEvent::characters(value))?;
            writer.write(XmlEvent::end_element())?;
        }
        writer.write(XmlEvent::end_element())?;
    }
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

/// Writes `apps` as an uncompressed collection document to `out`.
///
/// # Errors
///
/// Returns [`CatalogError::Emit`] if the XML cannot be written.
pub fn write_collection<'a, W, I>(
    out: W,
    header: &CatalogHeader<'_>,
    apps: I,
) -> Result<W, CatalogError>
where
    W: Write,
    I: IntoIterator<Item = &'a App>,
{
    let mut writer = EmitterConfig::new()
        .perform_indent(true)
        .create_writer(out);
    writer.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("UTF-8"),
        standalone: None,
    })?;
    writer.write(
        XmlEvent::start_element("components")
            .attr("origin", header.origin)
            .attr("version", header.api_version),
    )?;
    for app in apps {
        write_component(&mut writer, app)?;
    }
    writer.write(XmlEvent::end_element())?;
    Ok(writer.into_inner())
}

/// Writes `apps` as a gzip-compressed collection to `path`.
///
/// # Errors
///
/// Returns [`CatalogError`] if the file cannot be created or written.
pub fn write_catalog<'a, I>(
    path: &Path,
    header: &CatalogHeader<'_>,
    apps: I,
) -> Result<usize, CatalogError>
where
    I: IntoIterator<Item = &'a App>,
{
    let apps: Vec<&App> = apps.into_iter().collect();
    info!(path = %path.display(), components = apps.len(), "Writing catalog");
    let file = File::create(path).map_err(|e| CatalogError::write(path, e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let encoder = write_collection(encoder, header, apps.iter().copied())?;
    let mut inner = encoder.finish().map_err(|e| CatalogError::write(path, e))?;
    inner.flush().map_err(|e| CatalogError::write(path, e))?;
    Ok(apps.len())
}

/// A single `<component>` fragment, without a document declaration.
///
/// # Errors
///
/// Returns [`CatalogError::Emit`] if the XML cannot be written.
pub fn component_xml(app: &App) -> Result<String, CatalogError> {
    let mut writer = EmitterConfig::new()
        .perform_indent(true)
        .write_document_declaration(false)
        .create_writer(Vec::new());
    write_component(&mut writer, app)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// One component of the ignore catalog.
pub fn ignore_record(name: &str, arch: &str) -> App {
    let mut app = App::new(&format!("{}.{}", name, arch), AppKind::Generic);
    app.add_pkgname(name);
    app
}

// ============================================================================
// Reading
// ============================================================================

fn locale_of(element: &Element) -> String {
    element
        .attr("xml:lang")
        .unwrap_or(LOCALE_C)
        .to_string()
}

fn parse_description(element: &Element) -> Vec<DescriptionBlock> {
    let mut blocks = Vec::new();
    for child in &element.children {
        match child.name.as_str() {
            "p" => blocks.push(DescriptionBlock::Paragraph(child.full_text())),
            "ul" | "ol" => blocks.push(DescriptionBlock::List {
                ordered: child.name == "ol",
                items: child.children_named("li").map(Element::full_text).collect(),
            }),
            _ => {}
        }
    }
    blocks
}

fn parse_icon(element: &Element) -> Option<Icon> {
    let kind = IconKind::parse(element.attr("type").unwrap_or("stock"))?;
    let width = element.attr("width").and_then(|w| w.parse().ok()).unwrap_or(0);
    let height = element.attr("height").and_then(|h| h.parse().ok()).unwrap_or(width);
    let (name, data) = match kind {
        IconKind::Embedded => (
            element.find_text("name").unwrap_or_default().to_string(),
            element.find_text("filecontent").and_then(decode_icon),
        ),
        _ => (element.text().to_string(), None),
    };
    if name.is_empty() {
        return None;
    }
    Some(Icon {
        kind,
        name,
        width,
        height,
        source: None,
        data,
    })
}

fn parse_screenshot(element: &Element) -> Screenshot {
    Screenshot {
        is_default: element.attr("type") == Some("default"),
        caption: element.find_text("caption").map(str::to_string),
        images: element
            .children_named("image")
            .filter(|i| i.attr("type").unwrap_or("source") == "source")
            .map(|i| ScreenshotImage {
                url: i.text().to_string(),
                width: i.attr("width").and_then(|w| w.parse().ok()).unwrap_or(0),
                height: i.attr("height").and_then(|h| h.parse().ok()).unwrap_or(0),
                source: None,
            })
            .collect(),
    }
}

/// Builds a record from a `<component>` element (also accepts the legacy
/// `<application>` root of AppData files).
pub fn app_from_element(element: &Element) -> App {
    let kind = element
        .attr("type")
        .map(AppKind::parse)
        .unwrap_or_default();
    let mut app = App::new(element.find_text("id").unwrap_or_default(), kind);

    for child in &element.children {
        match child.name.as_str() {
            "pkgname" => app.add_pkgname(child.text()),
            "source_pkgname" => app.source_pkgname = Some(child.text().to_string()),
            "name" => app.set_name(&locale_of(child), child.text()),
            "summary" => app.set_summary(&locale_of(child), child.text()),
            "developer_name" => app.developer_name = Some(child.text().to_string()),
            "description" => {
                app.descriptions
                    .insert(locale_of(child), parse_description(child));
            }
            "icon" => {
                if let Some(icon) = parse_icon(child) {
                    app.add_icon(icon);
                }
            }
            "categories" => child
                .children_named("category")
                .for_each(|c| app.add_category(c.text())),
            "keywords" => {
                for keyword in child.children_named("keyword") {
                    app.keywords
                        .entry(locale_of(keyword))
                        .or_default()
                        .push(keyword.text().to_string());
                }
            }
            "kudos" => child.children_named("kudo").for_each(|k| app.add_kudo(k.text())),
            "mimetypes" => app.mimetypes.extend(
                child
                    .children_named("mimetype")
                    .map(|m| m.text().to_string()),
            ),
            "languages" => {
                for lang in child.children_named("lang") {
                    let percentage = lang
                        .attr("percentage")
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(0);
                    app.add_language(lang.text(), percentage);
                }
            }
            "project_license" | "license" => {
                app.project_license = Some(child.text().to_string())
            }
            "project_group" => app.project_group = Some(child.text().to_string()),
            "url" => app.set_url(child.attr("type").unwrap_or("homepage"), child.text()),
            "extends" => app.add_extends(child.text()),
            "screenshots" => app
                .screenshots
                .extend(child.children_named("screenshot").map(parse_screenshot)),
            "releases" => {
                for release in child.children_named("release") {
                    let Some(version) = release.attr("version") else {
                        continue;
                    };
                    let timestamp = release
                        .attr("timestamp")
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(0);
                    let mut entry = Release::new(version, timestamp);
                    entry.description = release
                        .find("description")
                        .map(Element::full_text)
                        .filter(|d| !d.is_empty());
                    app.add_release(entry);
                }
            }
            "provides" => {
                for provide in &child.children {
                    app.add_provide(&provide.name, provide.text());
                }
            }
            "vetos" => child.children_named("veto").for_each(|v| app.add_veto(v.text())),
            "metadata" | "custom" => {
                for value in child.children_named("value") {
                    if let Some(key) = value.attr("key") {
                        app.add_metadata(key, value.text());
                    }
                }
            }
            _ => {}
        }
    }
    app
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>, CatalogError> {
    let file = File::open(path).map_err(|e| CatalogError::read(path, e))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn parse_document(path: &Path) -> Result<Element, CatalogError> {
    Element::parse(open_maybe_gz(path)?).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Reads a single-component file (AppData or metainfo).
///
/// # Errors
///
/// Returns [`CatalogError`] if the file is unreadable, malformed or has
/// no `<component>`/`<application>` root.
pub fn read_component_file(path: &Path) -> Result<App, CatalogError> {
    let root = parse_document(path)?;
    if root.name != "component" && root.name != "application" {
        return Err(CatalogError::NotAppStream {
            path: path.display().to_string(),
        });
    }
    Ok(app_from_element(&root))
}

/// Reads every component of a collection file, gzip-compressed or not.
///
/// # Errors
///
/// Returns [`CatalogError`] if the file is unreadable or malformed.
pub fn read_catalog(path: &Path) -> Result<Vec<App>, CatalogError> {
    let root = parse_document(path)?;
    if root.name != "components" {
        return Err(CatalogError::NotAppStream {
            path: path.display().to_string(),
        });
    }
    let apps: Vec<App> = root
        .children_named("component")
        .map(app_from_element)
        .filter(|a| !a.id.is_empty())
        .collect();
    debug!(path = %path.display(), components = apps.len(), "Read catalog");
    Ok(apps)
}

/// Reads every `*.xml` and `*.xml.gz` collection in `dir`, in filename
/// order.
///
/// # Errors
///
/// Returns [`CatalogError`] for the first unreadable file.
pub fn read_catalog_dir(dir: &Path) -> Result<Vec<App>, CatalogError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| CatalogError::read(dir, e))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            name.ends_with(".xml") || name.ends_with(".xml.gz")
        })
        .collect();
    paths.sort();

    let mut apps = Vec::new();
    for path in paths {
        apps.extend(read_catalog(&path)?);
    }
    Ok(apps)
}

// ============================================================================
// Archives
// ============================================================================

/// Packs the contents of `dir` into a tarball at `dest`, gzip-compressed
/// when `compress` is set. Entries are stored relative to `dir`.
///
/// # Errors
///
/// Returns [`CatalogError::Write`] on I/O failure.
pub fn write_archive_dir(dest: &Path, dir: &Path, compress: bool) -> Result<(), CatalogError> {
    info!(path = %dest.display(), "Writing archive");
    let file = File::create(dest).map_err(|e| CatalogError::write(dest, e))?;
    let out: Box<dyn Write> = if compress {
        Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    let mut builder = tar::Builder::new(out);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| CatalogError::write(dest, e))?;
    let mut out = builder.into_inner().map_err(|e| CatalogError::write(dest, e))?;
    out.flush().map_err(|e| CatalogError::write(dest, e))
}

/// Unpacks a gzip-compressed tarball into `dest`.
///
/// # Errors
///
/// Returns [`CatalogError`] if the archive is unreadable or cannot be
/// unpacked.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), CatalogError> {
    let file = File::open(archive).map_err(|e| CatalogError::read(archive, e))?;
    fs::create_dir_all(dest).map_err(|e| CatalogError::write(dest, e))?;
    tar::Archive::new(GzDecoder::new(BufReader::new(file)))
        .unpack(dest)
        .map_err(|e| CatalogError::write(dest, e))
}

// ============================================================================
// Tests
// ============================================================================
