use std::collections::BTreeMap;
use std::path::Path;

/// Configuration lookup: an optional dotenv file first, then the process
/// environment unless [`Env::dotenv_only`] cut it off.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
    ignore_process_env: bool,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.dotenv.keys().map(|key| key.as_str()).collect();
        f.debug_struct("Env")
            .field("dotenv_keys", &keys)
            .field("ignore_process_env", &self.ignore_process_env)
            .finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
            ignore_process_env: false,
        }
    }

    /// Resolve from the dotenv map alone.
    pub fn dotenv_only(mut self) -> Self {
        self.ignore_process_env = true;
        self
    }

    pub fn from_dotenv_file(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse_dotenv(&contents))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.dotenv
            .get(key)
            .cloned()
            .or_else(|| self.process_var(key))
    }

    /// First value among `keys`. Every alias is tried in the dotenv file
    /// before any is read from the process environment.
    pub fn get_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| self.dotenv.get(*key).cloned())
            .or_else(|| keys.iter().find_map(|key| self.process_var(key)))
    }

    fn process_var(&self, key: &str) -> Option<String> {
        if self.ignore_process_env {
            return None;
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| format!("invalid value for {key}: {raw}")),
        }
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = raw_value.trim().to_string();
        if let Some(stripped) = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        {
            value = stripped.to_string();
        }

        if value.trim().is_empty() {
            continue;
        }

        out.insert(key.to_string(), value);
    }

    out
}
