use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::GitError;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PackConfig {
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_mem_size: String,
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_disk_size: String,
    pub pack_decode_cache_path: PathBuf,
    pub clean_cache_after_decode: bool,
    pub channel_message_size: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            pack_decode_mem_size: "4G".to_string(),
            pack_decode_disk_size: "20%".to_string(),
            pack_decode_cache_path: PathBuf::from("pack_decode_cache"),
            clean_cache_after_decode: true,
            channel_message_size: 1_000_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LfsConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

fn string_or_usize<'deserialize, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'deserialize>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrUSize {
        String(String),
        USize(usize),
    }

    Ok(match StringOrUSize::deserialize(deserializer)? {
        StringOrUSize::String(v) => v,
        StringOrUSize::USize(v) => v.to_string(),
    })
}

const CONFIG_FILE: &str = "config";

/// `remote.<name>.*` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub fetch: Option<String>,
}

/// `branch.<name>.*` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchConfig {
    pub remote: Option<String>,
    pub merge: Option<String>,
}

/// INI-style `.wit/config`: `user.*`, `remote.<name>.*`, `branch.<name>.*`, `push.default`, and
/// `core.autocrlf`. Sections with a subsection are written as `[section "name"]`, matching the
/// format the wider ecosystem's own config file uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoConfig {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub push_default: Option<String>,
    /// Defaults to `false`: no EOL normalization is performed anywhere in this crate.
    pub autocrlf: bool,
    pub remotes: BTreeMap<String, RemoteConfig>,
    pub branches: BTreeMap<String, BranchConfig>,
}

impl RepoConfig {
    pub fn new() -> Self {
        RepoConfig::default()
    }

    /// Load `<repo_dir>/config`, or an all-default config if the file doesn't exist yet.
    pub fn load(repo_dir: &Path) -> Result<Self, GitError> {
        let path = repo_dir.join(CONFIG_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RepoConfig::new()),
            Err(e) => return Err(GitError::IOError(e)),
        };

        let mut config = RepoConfig::new();
        let mut section: Option<(String, Option<String>)> = None;

        for raw_line in raw.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') {
                section = parse_section_header(line);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().to_string();
            let Some((name, sub)) = &section else {
                continue;
            };

            match (name.as_str(), sub.as_deref(), key) {
                ("user", None, "name") => config.user_name = Some(value),
                ("user", None, "email") => config.user_email = Some(value),
                ("push", None, "default") => config.push_default = Some(value),
                ("core", None, "autocrlf") => config.autocrlf = value == "true",
                ("remote", Some(remote_name), "url") => {
                    config.remotes.entry(remote_name.to_string()).or_default().url = Some(value);
                }
                ("remote", Some(remote_name), "fetch") => {
                    config.remotes.entry(remote_name.to_string()).or_default().fetch = Some(value);
                }
                ("branch", Some(branch_name), "remote") => {
                    config.branches.entry(branch_name.to_string()).or_default().remote = Some(value);
                }
                ("branch", Some(branch_name), "merge") => {
                    config.branches.entry(branch_name.to_string()).or_default().merge = Some(value);
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Write this config back to `<repo_dir>/config`, through a temp file + rename.
    pub fn save(&self, repo_dir: &Path) -> Result<(), GitError> {
        fs::create_dir_all(repo_dir)?;
        let mut out = String::new();

        if self.user_name.is_some() || self.user_email.is_some() {
            out.push_str("[user]\n");
            if let Some(name) = &self.user_name {
                out.push_str(&format!("\tname = {name}\n"));
            }
            if let Some(email) = &self.user_email {
                out.push_str(&format!("\temail = {email}\n"));
            }
        }

        out.push_str("[core]\n");
        out.push_str(&format!("\tautocrlf = {}\n", self.autocrlf));

        if let Some(default) = &self.push_default {
            out.push_str("[push]\n");
            out.push_str(&format!("\tdefault = {default}\n"));
        }

        for (name, remote) in &self.remotes {
            out.push_str(&format!("[remote \"{name}\"]\n"));
            if let Some(url) = &remote.url {
                out.push_str(&format!("\turl = {url}\n"));
            }
            if let Some(fetch) = &remote.fetch {
                out.push_str(&format!("\tfetch = {fetch}\n"));
            }
        }

        for (name, branch) in &self.branches {
            out.push_str(&format!("[branch \"{name}\"]\n"));
            if let Some(remote) = &branch.remote {
                out.push_str(&format!("\tremote = {remote}\n"));
            }
            if let Some(merge) = &branch.merge {
                out.push_str(&format!("\tmerge = {merge}\n"));
            }
        }

        let path = repo_dir.join(CONFIG_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(repo_dir)?;
        tmp.write_all(out.as_bytes())?;
        tmp.persist(&path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    /// `user.name`, with `WIT_AUTHOR_NAME` taking precedence when set.
    pub fn author_name(&self) -> Option<String> {
        std::env::var("WIT_AUTHOR_NAME").ok().or_else(|| self.user_name.clone())
    }

    /// `user.email`, with `WIT_AUTHOR_EMAIL` taking precedence when set.
    pub fn author_email(&self) -> Option<String> {
        std::env::var("WIT_AUTHOR_EMAIL").ok().or_else(|| self.user_email.clone())
    }

    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.get(name)
    }

    pub fn branch(&self, name: &str) -> Option<&BranchConfig> {
        self.branches.get(name)
    }

    pub fn set_remote(&mut self, name: &str, url: String, fetch: String) {
        self.remotes.insert(
            name.to_string(),
            RemoteConfig {
                url: Some(url),
                fetch: Some(fetch),
            },
        );
    }
}

fn parse_section_header(line: &str) -> Option<(String, Option<String>)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    if let Some(quote_start) = inner.find('"') {
        let name = inner[..quote_start].trim().to_string();
        let rest = &inner[quote_start + 1..];
        let quote_end = rest.find('"')?;
        Some((name, Some(rest[..quote_end].to_string())))
    } else {
        Some((inner.trim().to_string(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_user_identity_and_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RepoConfig::new();
        config.user_name = Some("Ada Lovelace".to_string());
        config.user_email = Some("ada@example.com".to_string());
        config.set_remote("origin", "https://example.com/repo.git".to_string(), "+refs/heads/*:refs/remotes/origin/*".to_string());
        config.branches.insert(
            "main".to_string(),
            BranchConfig {
                remote: Some("origin".to_string()),
                merge: Some("refs/heads/main".to_string()),
            },
        );
        config.save(dir.path()).unwrap();

        let loaded = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.user_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(loaded.remote("origin").unwrap().url.as_deref(), Some("https://example.com/repo.git"));
        assert_eq!(loaded.branch("main").unwrap().remote.as_deref(), Some("origin"));
        assert!(!loaded.autocrlf);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(config.user_name, None);
        assert!(!config.autocrlf);
        assert_eq!(config.push_default, None);
    }

    #[test]
    fn env_var_overrides_configured_author_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RepoConfig::new();
        config.user_name = Some("File Name".to_string());
        config.save(dir.path()).unwrap();
        let loaded = RepoConfig::load(dir.path()).unwrap();

        // SAFETY: test-only process-wide env mutation; no other test in this module reads this var.
        unsafe { std::env::set_var("WIT_AUTHOR_NAME", "Env Name") };
        assert_eq!(loaded.author_name().as_deref(), Some("Env Name"));
        unsafe { std::env::remove_var("WIT_AUTHOR_NAME") };
    }
}
