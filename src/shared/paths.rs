use std::path::{Path, PathBuf};

const APP_DIR: &str = "livecast";

/// Get the base storage directory following XDG Base Directory Specification.
/// Returns `$XDG_DATA_HOME/livecast`, the platform data dir, or `./.livecast`.
pub fn get_storage_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data.is_empty() {
            return PathBuf::from(xdg_data).join(APP_DIR);
        }
    }

    match dirs::data_dir() {
        Some(dir) => dir.join(APP_DIR),
        None => PathBuf::from(format!(".{}", APP_DIR)),
    }
}

/// Returns `{storage_dir}/logs`.
pub fn get_log_dir() -> PathBuf {
    get_storage_dir().join("logs")
}

/// Default location of the settings file.
pub fn get_settings_path() -> PathBuf {
    get_storage_dir().join("settings.json")
}

/// Default location of the OAuth authorized-user token for the YouTube API.
pub fn get_token_path() -> PathBuf {
    get_storage_dir().join("token.json")
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
