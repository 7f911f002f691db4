//! Notebook settings resolution.
//!
//! # Responsibility
//! - Overlay user YAML settings on top of built-in defaults.
//! - Reject overrides whose type differs from the default.
//! - Derive renderer configuration and PDF conversion options.
//!
//! # Invariants
//! - Defaults are rebuilt for every merge; no merge can leak into another.
//! - Required markdown extensions and renderer plugins always precede user
//!   entries.
//! - `filetypes` overrides update the default mapping instead of replacing it.

mod renderer;
mod value;

pub use renderer::{renderer_config, RendererConfig, RENDERER_SETTING_NAMES, UNMAPPED_SETTINGS};
pub use value::ConfigValue;

use crate::error::{NotebookError, NotebookResult};
use crate::external::PdfOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const KEY_AUTHOR: &str = "author";
pub const KEY_NOTEBOOK_NAME: &str = "notebook name";
pub const KEY_TIMEZONE: &str = "timezone";
pub const KEY_LANGUAGE: &str = "language";
pub const KEY_LINKS: &str = "links";
pub const KEY_EMAIL: &str = "email";
pub const KEY_DESCRIPTION: &str = "description";
pub const KEY_ADDRESS: &str = "address";
pub const KEY_STREET_ADDRESS: &str = "street address";
pub const KEY_CITY: &str = "city";
pub const KEY_REGION: &str = "region";
pub const KEY_POSTAL: &str = "postal";
pub const KEY_COUNTRY: &str = "country";
pub const KEY_PLUGINS: &str = "plugins";
pub const KEY_MARKDOWN_EXTENSIONS: &str = "markdown extensions";
pub const KEY_BIBFILE: &str = "bibfile";
pub const KEY_FILETYPES: &str = "filetypes";
pub const KEY_PAPER_SIZE: &str = "paper size";

const DEFAULT_DESCRIPTION: &str = "This provides a description of your notebook. Talk \
about what's in it, maybe providing a summary. You might also want to write a bit about \
the author. Don't give any contact details about the author here, though. Those are \
provided elsewhere.";

/// Renderer plugins every build needs, in load order.
pub const REQUIRED_PLUGINS: &[&str] = &[
    "scribbler.render_math",
    "scribbler.tipue_search",
    "scribbler.neighbors",
    "scribbler.pdf-img",
    "scribbler.slugcollision",
    "scribbler.pelican-cite",
    "scribbler.figure-ref",
];

/// Markdown extensions every build needs; `{location}` is the notebook path.
pub const REQUIRED_MARKDOWN_EXTENSIONS: &[&str] = &[
    "scribbler.figureAltCaption",
    "superscript",
    "markdown_checklist.extension",
    "extra",
    "subscript",
    "MarkdownHighlight.highlight",
    "codehilite(css_class=highlight)",
    "del_ins",
    "markdown_include.include(base_path={location})",
    "scribbler.plantuml",
];

/// Default extension → file-store category mapping.
pub const DEFAULT_FILETYPES: &[(&str, &str)] = &[
    ("jpg", "images"),
    ("jpeg", "images"),
    ("png", "images"),
    ("gif", "images"),
    ("eps", "images"),
    ("svg", "images"),
    ("pdf", "pdfs"),
    ("ps", "pdfs"),
    ("dvi", "pdfs"),
    ("tar.gz", "archives"),
    ("tar.bz", "archives"),
    ("tar.bz2", "archives"),
    ("tar.xz", "archives"),
    ("tar", "archives"),
    ("rar", "archives"),
    ("zip", "archives"),
    ("deb", "archives"),
];

const DEFAULT_PAPER_SIZE: &str = "Letter";
const PDF_JAVASCRIPT_DELAY_MS: &str = "1000";

/// Fully resolved notebook settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    values: BTreeMap<String, ConfigValue>,
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.values.iter()
    }

    pub fn values(&self) -> &BTreeMap<String, ConfigValue> {
        &self.values
    }

    fn text(&self, key: &str) -> &str {
        self.get(key).and_then(ConfigValue::as_str).unwrap_or_default()
    }

    pub fn notebook_name(&self) -> &str {
        self.text(KEY_NOTEBOOK_NAME)
    }

    pub fn author(&self) -> &str {
        self.text(KEY_AUTHOR)
    }

    pub fn paper_size(&self) -> &str {
        match self.text(KEY_PAPER_SIZE) {
            "" => DEFAULT_PAPER_SIZE,
            size => size,
        }
    }

    /// Extension → category entries; non-string categories are ignored.
    pub fn filetypes(&self) -> BTreeMap<String, String> {
        self.get(KEY_FILETYPES)
            .and_then(ConfigValue::as_map)
            .map(|map| {
                map.iter()
                    .filter_map(|(ext, category)| {
                        category.as_str().map(|category| (ext.clone(), category.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builds a fresh copy of the default settings.
pub fn default_settings() -> BTreeMap<String, ConfigValue> {
    let empty = || ConfigValue::text("");
    let filetypes = DEFAULT_FILETYPES
        .iter()
        .map(|(ext, category)| (ext.to_string(), ConfigValue::text(*category)))
        .collect();

    BTreeMap::from([
        (KEY_AUTHOR.to_string(), ConfigValue::text("No Author")),
        (
            KEY_NOTEBOOK_NAME.to_string(),
            ConfigValue::text("A Scribbler Notebook"),
        ),
        (KEY_TIMEZONE.to_string(), ConfigValue::text("Etc/UCT")),
        (KEY_LANGUAGE.to_string(), ConfigValue::text("en")),
        (KEY_LINKS.to_string(), ConfigValue::List(Vec::new())),
        (KEY_EMAIL.to_string(), empty()),
        (KEY_DESCRIPTION.to_string(), ConfigValue::text(DEFAULT_DESCRIPTION)),
        (KEY_ADDRESS.to_string(), ConfigValue::Bool(false)),
        (KEY_STREET_ADDRESS.to_string(), empty()),
        (KEY_CITY.to_string(), empty()),
        (KEY_REGION.to_string(), empty()),
        (KEY_POSTAL.to_string(), empty()),
        (KEY_COUNTRY.to_string(), empty()),
        (KEY_PLUGINS.to_string(), ConfigValue::List(Vec::new())),
        (KEY_MARKDOWN_EXTENSIONS.to_string(), ConfigValue::List(Vec::new())),
        (KEY_BIBFILE.to_string(), empty()),
        (KEY_FILETYPES.to_string(), ConfigValue::Map(filetypes)),
        (KEY_PAPER_SIZE.to_string(), ConfigValue::text(DEFAULT_PAPER_SIZE)),
    ])
}

/// Reads `config_path` and merges it over the defaults.
///
/// # Errors
/// - `Config` when the file cannot be read or is not a YAML mapping.
/// - `SettingTypeMismatch` when an override changes a default's type.
pub fn resolve_settings(config_path: &Path, location: &Path) -> NotebookResult<Settings> {
    let contents = std::fs::read_to_string(config_path)
        .map_err(|err| NotebookError::io(config_path, err))?;
    let overrides: Option<BTreeMap<String, ConfigValue>> =
        serde_yaml::from_str(&contents).map_err(|err| NotebookError::Config {
            path: config_path.to_path_buf(),
            message: err.to_string(),
        })?;
    merge_settings(overrides.unwrap_or_default(), location)
}

/// Merges user overrides over the defaults for the notebook at `location`.
pub fn merge_settings(
    overrides: BTreeMap<String, ConfigValue>,
    location: &Path,
) -> NotebookResult<Settings> {
    let mut values = default_settings();

    for (key, value) in &overrides {
        if let Some(default) = values.get(key) {
            if !value.same_type(default) {
                return Err(NotebookError::SettingTypeMismatch {
                    key: key.clone(),
                    expected: default.type_name(),
                    found: value.type_name(),
                });
            }
        }
    }

    for (key, value) in overrides {
        match (key.as_str(), value) {
            (KEY_FILETYPES, ConfigValue::Map(user_types)) => {
                if let Some(ConfigValue::Map(types)) = values.get_mut(KEY_FILETYPES) {
                    types.extend(user_types);
                }
            }
            (_, value) => {
                values.insert(key, value);
            }
        }
    }

    let location = location.display().to_string();
    prepend_required(
        &mut values,
        KEY_MARKDOWN_EXTENSIONS,
        REQUIRED_MARKDOWN_EXTENSIONS
            .iter()
            .map(|ext| ext.replace("{location}", &location)),
    );
    prepend_required(
        &mut values,
        KEY_PLUGINS,
        REQUIRED_PLUGINS.iter().map(|plugin| plugin.to_string()),
    );

    Ok(Settings { values })
}

fn prepend_required(
    values: &mut BTreeMap<String, ConfigValue>,
    key: &str,
    required: impl Iterator<Item = String>,
) {
    let mut merged: Vec<ConfigValue> = required.map(ConfigValue::Text).collect();
    if let Some(ConfigValue::List(user)) = values.remove(key) {
        merged.extend(user);
    }
    values.insert(key.to_string(), ConfigValue::List(merged));
}

/// Conversion flags derived from settings.
pub fn pdf_options(settings: &Settings) -> PdfOptions {
    let mut options = PdfOptions::new();
    options.set("quiet", None);
    options.set("print-media-type", None);
    options.set("javascript-delay", Some(PDF_JAVASCRIPT_DELAY_MS.to_string()));
    options.set("page-size", Some(settings.paper_size().to_string()));
    options
}

#[cfg(test)]
mod tests {
    use super::{
        default_settings, merge_settings, pdf_options, ConfigValue, KEY_FILETYPES,
        KEY_MARKDOWN_EXTENSIONS, KEY_PLUGINS, REQUIRED_PLUGINS,
    };
    use crate::error::NotebookError;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn overrides(yaml: &str) -> BTreeMap<String, ConfigValue> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn user_plugins_follow_required_plugins() {
        let settings = merge_settings(overrides("plugins: [thing]"), Path::new("/nb")).unwrap();
        let plugins = settings.get(KEY_PLUGINS).unwrap().as_list().unwrap();
        assert_eq!(plugins.len(), REQUIRED_PLUGINS.len() + 1);
        assert_eq!(plugins[0], ConfigValue::text(REQUIRED_PLUGINS[0]));
        assert_eq!(plugins.last().unwrap(), &ConfigValue::text("thing"));
    }

    #[test]
    fn markdown_include_is_bound_to_notebook_location() {
        let settings = merge_settings(BTreeMap::new(), Path::new("/home/me/nb")).unwrap();
        let extensions = settings.get(KEY_MARKDOWN_EXTENSIONS).unwrap().as_list().unwrap();
        assert!(extensions
            .iter()
            .any(|ext| ext.as_str() == Some("markdown_include.include(base_path=/home/me/nb)")));
    }

    #[test]
    fn filetypes_are_merged_not_replaced() {
        let settings = merge_settings(
            overrides("filetypes: {ps: postscript, ps.gz: postscript}"),
            Path::new("/nb"),
        )
        .unwrap();
        let types = settings.filetypes();
        assert_eq!(types["ps"], "postscript");
        assert_eq!(types["ps.gz"], "postscript");
        assert_eq!(types["png"], "images");
        assert!(default_settings()[KEY_FILETYPES]
            .as_map()
            .unwrap()
            .get("ps.gz")
            .is_none());
    }

    #[test]
    fn type_mismatch_names_the_key() {
        let err = merge_settings(overrides("country: true"), Path::new("/nb")).unwrap_err();
        match err {
            NotebookError::SettingTypeMismatch { key, expected, found } => {
                assert_eq!(key, "country");
                assert_eq!(expected, "string");
                assert_eq!(found, "boolean");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_keys_pass_through() {
        let settings = merge_settings(overrides("favourite colour: blue"), Path::new("/nb")).unwrap();
        assert_eq!(
            settings.get("favourite colour"),
            Some(&ConfigValue::text("blue"))
        );
    }

    #[test]
    fn pdf_options_take_paper_size_from_settings() {
        let settings = merge_settings(overrides("paper size: A4"), Path::new("/nb")).unwrap();
        let options = pdf_options(&settings);
        assert_eq!(options.get("page-size"), Some(&Some("A4".to_string())));
        assert_eq!(options.get("print-media-type"), Some(&None));
    }
}
