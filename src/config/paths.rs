//! Where the detector keeps things on disk, resolved with `dirs`.
//!
//! ```text
//! <config_dir>/precise-wake/settings.toml
//! <data_local_dir>/precise-wake/
//!     precise-engine/precise-engine      engine executable (downloaded)
//!     models/                            wake-word models (*.pb)
//! ```
//!
//! `config_dir` is `~/.config` on Linux, `%APPDATA%` on Windows;
//! `data_local_dir` is `~/.local/share` on Linux, `%LOCALAPPDATA%` on
//! Windows.  Both are `~/Library/Application Support` on macOS.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    /// The release archive is unpacked here.
    pub engine_root: PathBuf,
    pub engine_executable: PathBuf,
    /// Searched for relative model paths that don't exist as given.
    pub models_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "precise-wake";

    /// Directory and file name of the executable inside the release archive.
    pub const ENGINE_NAME: &'static str = "precise-engine";

    /// Platform locations, or the working directory where `dirs` has none.
    pub fn new() -> Self {
        let cwd = || PathBuf::from(".");
        Self::rooted_at(
            &dirs::config_dir().unwrap_or_else(cwd),
            &dirs::data_local_dir().unwrap_or_else(cwd),
        )
    }

    /// Same layout under explicit roots.
    pub fn rooted_at(config_root: &Path, data_root: &Path) -> Self {
        let config_dir = config_root.join(Self::APP_NAME);
        let engine_root = data_root.join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            engine_executable: engine_root.join(Self::ENGINE_NAME).join(Self::ENGINE_NAME),
            models_dir: engine_root.join("models"),
            config_dir,
            engine_root,
        }
    }

    /// Find the model file for `path`.
    ///
    /// `path` itself wins when it names an existing file.  Otherwise a
    /// relative path is looked up under [`models_dir`](Self::models_dir).
    pub fn resolve_model(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if path.is_absolute() {
            return None;
        }
        let candidate = self.models_dir.join(path);
        candidate.is_file().then_some(candidate)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn layout_under_roots() {
        let paths = AppPaths::rooted_at(Path::new("/cfg"), Path::new("/data"));
        assert_eq!(paths.settings_file, Path::new("/cfg/precise-wake/settings.toml"));
        assert_eq!(
            paths.engine_executable,
            Path::new("/data/precise-wake/precise-engine/precise-engine")
        );
        assert_eq!(paths.models_dir, Path::new("/data/precise-wake/models"));
    }

    #[test]
    fn platform_paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.engine_executable.starts_with(&paths.engine_root));
    }

    #[test]
    fn existing_model_path_is_used_as_is() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("hey-mycroft.pb");
        fs::write(&model, b"pb").unwrap();

        let paths = AppPaths::rooted_at(dir.path(), dir.path());
        assert_eq!(paths.resolve_model(&model), Some(model));
    }

    #[test]
    fn relative_model_falls_back_to_models_dir() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::rooted_at(dir.path(), dir.path());
        fs::create_dir_all(&paths.models_dir).unwrap();
        fs::write(paths.models_dir.join("computer.pb"), b"pb").unwrap();

        assert_eq!(
            paths.resolve_model(Path::new("computer.pb")),
            Some(paths.models_dir.join("computer.pb"))
        );
        assert_eq!(paths.resolve_model(Path::new("missing.pb")), None);
    }

    #[test]
    fn missing_absolute_model_is_not_searched() {
        let dir = tempdir().unwrap();
        let paths = AppPaths::rooted_at(dir.path(), dir.path());
        assert_eq!(paths.resolve_model(&dir.path().join("nope.pb")), None);
    }
}
