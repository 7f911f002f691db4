//! Settings → renderer (Pelican) configuration mapping.

use super::{ConfigValue, Settings, KEY_FILETYPES, KEY_PAPER_SIZE};
use crate::layout::{NotebookPaths, APPENDIX_DIR, FILE_STORE_DIR, NOTE_DIR};
use chrono::Datelike;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Setting name → renderer configuration key.
pub const RENDERER_SETTING_NAMES: &[(&str, &str)] = &[
    ("author", "AUTHOR"),
    ("notebook name", "SITENAME"),
    ("timezone", "TIMEZONE"),
    ("language", "DEFAULT_LANG"),
    ("links", "LINKS"),
    ("email", "EMAIL"),
    ("description", "DESCRIPTION"),
    ("address", "ADDRESS"),
    ("street address", "STREET_ADDRESS"),
    ("city", "CITY"),
    ("region", "REGION"),
    ("postal", "POSTAL"),
    ("country", "COUNTRY"),
    ("plugins", "PLUGINS"),
    ("markdown extensions", "MD_EXTENSIONS"),
    ("bibfile", "PUBLICATIONS_SRC"),
];

/// Settings with no renderer counterpart that are not reported.
pub const UNMAPPED_SETTINGS: &[&str] = &[KEY_PAPER_SIZE, KEY_FILETYPES];

const THEME: &str = "notebook-theme";
const NOTE_URL: &str = "notes/{slug}.html";
const PAGE_URL: &str = "pages/{slug}.html";

/// Configuration handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    values: BTreeMap<String, ConfigValue>,
    /// Settings that had no renderer key.
    pub unrecognized: Vec<String>,
}

impl RendererConfig {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn values(&self) -> &BTreeMap<String, ConfigValue> {
        &self.values
    }

    /// Renders the configuration as a Python settings module.
    pub fn to_python_module(&self) -> String {
        let mut module = String::from(
            "#!/usr/bin/env python\n# -*- coding: utf-8 -*- #\n# Generated by scribbler; do not edit.\n",
        );
        for (key, value) in &self.values {
            module.push_str(key);
            module.push_str(" = ");
            module.push_str(&value.to_python_literal());
            module.push('\n');
        }
        module
    }
}

fn renderer_defaults(paths: &NotebookPaths) -> BTreeMap<String, ConfigValue> {
    let path = |p: std::path::PathBuf| ConfigValue::Text(p.display().to_string());
    let none = || ConfigValue::Null;
    let math_jax = BTreeMap::from([("message_style".to_string(), ConfigValue::text("none"))]);

    BTreeMap::from([
        ("DELETE_OUTPUT_DIRECTORY".to_string(), ConfigValue::Bool(true)),
        ("OUTPUT_PATH".to_string(), path(paths.html_dir())),
        ("PATH".to_string(), path(paths.staging_dir())),
        ("CACHE_PATH".to_string(), path(paths.renderer_cache_dir())),
        ("CACHE_CONTENT".to_string(), ConfigValue::Bool(true)),
        ("ARTICLE_PATHS".to_string(), ConfigValue::text_list([NOTE_DIR])),
        ("PAGE_PATHS".to_string(), ConfigValue::text_list([APPENDIX_DIR])),
        ("STATIC_PATHS".to_string(), ConfigValue::text_list([FILE_STORE_DIR])),
        ("RELATIVE_URLS".to_string(), ConfigValue::Bool(true)),
        ("THEME".to_string(), ConfigValue::text(THEME)),
        (
            "DIRECT_TEMPLATES".to_string(),
            ConfigValue::text_list(["index", "archives", "tags", "search"]),
        ),
        (
            "PAGINATED_DIRECT_TEMPLATES".to_string(),
            ConfigValue::text_list(["index", "tag", "archives", "period_archives"]),
        ),
        ("TYPOGRIFY".to_string(), ConfigValue::Bool(true)),
        ("DEFAULT_PAGINATION".to_string(), ConfigValue::Integer(10)),
        ("DEFAULT_ORPHANS".to_string(), ConfigValue::Integer(2)),
        (
            "YEAR".to_string(),
            ConfigValue::Integer(i64::from(chrono::Local::now().year())),
        ),
        ("SLUGIFY_SOURCE".to_string(), ConfigValue::text("basename")),
        ("AUTHOR_SAVE_AS".to_string(), ConfigValue::text("")),
        ("CATEGORY_SAVE_AS".to_string(), ConfigValue::text("")),
        ("ARTICLE_URL".to_string(), ConfigValue::text(NOTE_URL)),
        ("ARTICLE_SAVE_AS".to_string(), ConfigValue::text(NOTE_URL)),
        ("PAGE_URL".to_string(), ConfigValue::text(PAGE_URL)),
        ("PAGE_SAVE_AS".to_string(), ConfigValue::text(PAGE_URL)),
        (
            "MONTH_ARCHIVE_SAVE_AS".to_string(),
            ConfigValue::text("{date:%Y}/{date:%b}/index.html"),
        ),
        (
            "YEAR_ARCHIVE_SAVE_AS".to_string(),
            ConfigValue::text("{date:%Y}/index.html"),
        ),
        ("FEED_ALL_ATOM".to_string(), none()),
        ("CATEGORY_FEED_ATOM".to_string(), none()),
        ("AUTHOR_FEED_ATOM".to_string(), none()),
        ("AUTHOR_FEED_RSS".to_string(), none()),
        ("MATH_JAX".to_string(), ConfigValue::Map(math_jax)),
    ])
}

/// Builds the renderer configuration for `settings`.
///
/// Settings outside the name table and outside [`UNMAPPED_SETTINGS`] are
/// logged and listed in `unrecognized`; they never fail the build.
pub fn renderer_config(settings: &Settings, paths: &NotebookPaths) -> RendererConfig {
    let mut values = renderer_defaults(paths);
    let mut unrecognized = Vec::new();

    for (key, value) in settings.iter() {
        match RENDERER_SETTING_NAMES
            .iter()
            .find(|(setting, _)| *setting == key.as_str())
        {
            Some((_, renderer_key)) => {
                values.insert(renderer_key.to_string(), value.clone());
            }
            None if UNMAPPED_SETTINGS.contains(&key.as_str()) => {}
            None => {
                warn!("event=renderer_config module=settings status=warn unrecognized_setting={key:?}");
                unrecognized.push(key.clone());
            }
        }
    }

    RendererConfig {
        values,
        unrecognized,
    }
}
