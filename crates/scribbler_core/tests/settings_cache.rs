use filetime::{set_file_mtime, FileTime};
use scribbler_core::{ConfigValue, Notebook, NotebookError};
use std::sync::Arc;

fn bump_mtime(path: &std::path::Path, seconds: i64) {
    let metadata = std::fs::metadata(path).unwrap();
    let current = FileTime::from_last_modification_time(&metadata);
    set_file_mtime(path, FileTime::from_unix_time(current.unix_seconds() + seconds, 0)).unwrap();
}

#[test]
fn settings_are_cached_until_the_file_gets_newer() {
    let dir = tempfile::tempdir().unwrap();
    let mut notebook = Notebook::create("N", dir.path()).unwrap();
    let config = notebook.paths().settings_file();

    let first = notebook.settings().unwrap();
    let second = notebook.settings().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.notebook_name(), "N");

    std::fs::write(&config, "notebook name: N\nauthor: Someone Else\n").unwrap();
    bump_mtime(&config, 10);

    let third = notebook.settings().unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.author(), "Someone Else");
}

#[test]
fn renderer_config_follows_the_settings_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut notebook = Notebook::create("N", dir.path()).unwrap();
    let config = notebook.paths().settings_file();

    let first = notebook.renderer_config().unwrap();
    let second = notebook.renderer_config().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.get("SITENAME"), Some(&ConfigValue::text("N")));

    std::fs::write(&config, "notebook name: Renamed\n").unwrap();
    bump_mtime(&config, 10);

    let third = notebook.renderer_config().unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.get("SITENAME"), Some(&ConfigValue::text("Renamed")));
}

#[test]
fn caches_survive_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let mut notebook = Notebook::create("N", dir.path()).unwrap();
    notebook.renderer_config().unwrap();
    notebook.persist().unwrap();

    let reopened = Notebook::open(dir.path()).unwrap();
    assert_eq!(reopened.snapshot(), notebook.snapshot());
}

#[test]
fn type_mismatch_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut notebook = Notebook::create("N", dir.path()).unwrap();
    let config = notebook.paths().settings_file();
    std::fs::write(&config, "notebook name: N\naddress: yes please\n").unwrap();
    bump_mtime(&config, 10);

    match notebook.settings().unwrap_err() {
        NotebookError::SettingTypeMismatch {
            key,
            expected,
            found,
        } => {
            assert_eq!(key, "address");
            assert_eq!(expected, "boolean");
            assert_eq!(found, "string");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_settings_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut notebook = Notebook::create("N", dir.path()).unwrap();
    let config = notebook.paths().settings_file();
    std::fs::write(&config, "notebook name: [unclosed\n").unwrap();
    bump_mtime(&config, 10);

    assert!(matches!(
        notebook.settings(),
        Err(NotebookError::Config { .. })
    ));
}
