//! `KEY=value` env files (`https.env`, `ldap.env`, `sync.env`, …).
//!
//! Edits keep comments, ordering and unrelated lines intact, and are saved
//! through a sibling temporary file that is renamed over the original, so a
//! crash never leaves a half-written file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

pub const HTTPS_DOMAIN: &str = "HTTPS_DOMAIN";
pub const HTTPS_ADMIN_EMAIL: &str = "HTTPS_ADMIN_EMAIL";

/// An env file held in memory line by line.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl EnvFile {
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        Ok(Self::parse(path, &content))
    }

    pub fn parse(path: &Path, content: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of the first `KEY=` line, trimmed.
    pub fn get(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.lines
            .iter()
            .find_map(|line| line.strip_prefix(&prefix))
            .map(str::trim)
    }

    /// All assignments, later lines overriding earlier ones.
    pub fn vars(&self) -> BTreeMap<String, String> {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect()
    }

    /// Set `key` on every line that assigns it, appending when absent.
    pub fn set(&mut self, key: &str, value: &str) {
        let prefix = format!("{key}=");
        let mut found = false;
        for line in &mut self.lines {
            if line.starts_with(&prefix) {
                *line = format!("{key}={value}");
                found = true;
            }
        }
        if !found {
            self.lines.push(format!("{key}={value}"));
        }
    }

    /// Apply a regex substitution to every line. Returns the number of
    /// lines that changed.
    pub fn replace_matching(&mut self, pattern: &Regex, replacement: &str) -> usize {
        let mut changed = 0;
        for line in &mut self.lines {
            let replaced = pattern.replace_all(line.as_str(), NoExpand(replacement));
            if replaced != line.as_str() {
                *line = replaced.into_owned();
                changed += 1;
            }
        }
        changed
    }

    /// Write back atomically, keeping the original file mode.
    pub fn save(&self) -> CoreResult<()> {
        let tmp = self.path.with_extension("env.tmp");
        let mut content = self.lines.join("\n");
        content.push('\n');
        fs::write(&tmp, content).map_err(|e| CoreError::io(&tmp, e))?;
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(&tmp, meta.permissions()).map_err(|e| CoreError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| CoreError::io(&self.path, e))?;
        debug!(path = ?self.path, "env file saved");
        Ok(())
    }
}

/// Domain and admin contact used for certificate issuance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpsSettings {
    pub domain: Option<String>,
    pub admin_email: Option<String>,
}

impl HttpsSettings {
    pub fn from_env_file(file: &EnvFile) -> Self {
        let non_empty = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            domain: non_empty(file.get(HTTPS_DOMAIN)),
            admin_email: non_empty(file.get(HTTPS_ADMIN_EMAIL)),
        }
    }

    /// Write both values into `file` (only the keys present are replaced
    /// when the file already declares them).
    pub fn apply(&self, file: &mut EnvFile) {
        if let Some(domain) = &self.domain {
            file.set(HTTPS_DOMAIN, domain);
        }
        if let Some(email) = &self.admin_email {
            file.set(HTTPS_ADMIN_EMAIL, email);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTTPS_ENV: &str = "# certificate settings\nHTTPS_DOMAIN=sync.example.org\nHTTPS_ADMIN_EMAIL=\nOTHER=1\n";

    #[test]
    fn reads_https_settings() {
        let file = EnvFile::parse(Path::new("https.env"), HTTPS_ENV);
        let settings = HttpsSettings::from_env_file(&file);
        assert_eq!(settings.domain.as_deref(), Some("sync.example.org"));
        assert_eq!(settings.admin_email, None);
    }

    #[test]
    fn set_replaces_and_appends() {
        let mut file = EnvFile::parse(Path::new("https.env"), HTTPS_ENV);
        file.set(HTTPS_ADMIN_EMAIL, "ops@example.org");
        file.set("NEW_KEY", "x");
        assert_eq!(file.get(HTTPS_ADMIN_EMAIL), Some("ops@example.org"));
        assert_eq!(file.get("NEW_KEY"), Some("x"));
        assert_eq!(file.get("OTHER"), Some("1"));
    }

    #[test]
    fn replace_matching_rewrites_password_line() {
        let mut file = EnvFile::parse(
            Path::new("ldap.env"),
            "LDAP_ORGANISATION=Example\n  LDAP_ADMIN_PASSWORD=admin\n",
        );
        let pattern = Regex::new(r"^\s*LDAP_ADMIN_PASSWORD=.*$").unwrap();
        let changed = file.replace_matching(&pattern, "LDAP_ADMIN_PASSWORD=s3cret");
        assert_eq!(changed, 1);
        assert_eq!(file.vars().get("LDAP_ADMIN_PASSWORD").unwrap(), "s3cret");
    }

    #[test]
    fn vars_skip_comments_and_blank_lines() {
        let file = EnvFile::parse(Path::new("x.env"), "# a\n\nA=1\nA=2\nB = 3\n");
        let vars = file.vars();
        assert_eq!(vars.get("A").unwrap(), "2");
        assert_eq!(vars.get("B").unwrap(), "3");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("https.env");
        fs::write(&path, HTTPS_ENV).unwrap();

        let mut file = EnvFile::load(&path).unwrap();
        HttpsSettings {
            domain: Some("new.example.org".to_string()),
            admin_email: Some("admin@example.org".to_string()),
        }
        .apply(&mut file);
        file.save().unwrap();

        let reloaded = EnvFile::load(&path).unwrap();
        let settings = HttpsSettings::from_env_file(&reloaded);
        assert_eq!(settings.domain.as_deref(), Some("new.example.org"));
        assert_eq!(settings.admin_email.as_deref(), Some("admin@example.org"));
        assert!(fs::read_to_string(&path).unwrap().starts_with("# certificate settings"));
        assert!(!dir.path().join("https.env.tmp").exists());
    }
}
