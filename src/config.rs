//! puter-cli credential config.
//!
//! The puter CLI stores login sessions in
//! `$APPDATA|$HOME/puter-cli-nodejs/Config/config.json` as a list of
//! profiles plus a selected-profile id. The token is read once at startup
//! and held for the process lifetime; there is no refresh or rotation.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    pub selected_profile: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub uuid: String,
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// What the server keeps from the chosen profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub username: Option<String>,
}

/// Location of the puter CLI config file (`APPDATA` on Windows, `HOME`
/// elsewhere, matching where the CLI itself writes it).
pub fn default_config_path() -> PathBuf {
    let base = std::env::var("APPDATA")
        .or_else(|_| std::env::var("HOME"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(base)
        .join("puter-cli-nodejs")
        .join("Config")
        .join("config.json")
}

/// Read the config file and return the selected profile's credentials.
/// Missing or malformed config yields `None` (the server still runs; worker
/// endpoints report an uninitialized client).
pub fn load_credentials(path: &Path) -> Option<Credentials> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to read puter-cli config {}: {}", path.display(), e);
            return None;
        }
    };
    let config: CliConfig = match serde_json::from_str(&data) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse puter-cli config {}: {}", path.display(), e);
            return None;
        }
    };
    select_credentials(&config)
}

/// Pick the selected profile, falling back to the first one.
pub fn select_credentials(config: &CliConfig) -> Option<Credentials> {
    config
        .selected_profile
        .as_deref()
        .and_then(|sel| config.profiles.iter().find(|p| p.uuid == sel))
        .or_else(|| config.profiles.first())
        .map(|p| Credentials {
            token: p.token.clone(),
            username: p.username.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn selected_profile_wins() {
        let f = write_config(
            r#"{
              "profiles": [
                {"uuid": "a", "token": "tok-a"},
                {"uuid": "b", "token": "tok-b", "username": "bob"}
              ],
              "selected_profile": "b"
            }"#,
        );
        assert_eq!(
            load_credentials(f.path()),
            Some(Credentials {
                token: "tok-b".to_string(),
                username: Some("bob".to_string()),
            })
        );
    }

    #[test]
    fn falls_back_to_first_profile() {
        let f = write_config(
            r#"{
              "profiles": [{"uuid": "a", "token": "tok-a"}],
              "selected_profile": "missing"
            }"#,
        );
        let creds = load_credentials(f.path()).unwrap();
        assert_eq!(creds.token, "tok-a");
        assert_eq!(creds.username, None);
    }

    #[test]
    fn no_profiles_yields_none() {
        let f = write_config(r#"{"profiles": [], "selected_profile": null}"#);
        assert_eq!(load_credentials(f.path()), None);
    }

    #[test]
    fn malformed_config_yields_none() {
        let f = write_config("not json at all");
        assert_eq!(load_credentials(f.path()), None);
    }

    #[test]
    fn missing_file_yields_none() {
        assert_eq!(load_credentials(Path::new("/nonexistent/config.json")), None);
    }
}
