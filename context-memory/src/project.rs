//! Project identification and context keys
//!
//! A project is identified by its absolute directory path. The path is
//! normalized lexically (no filesystem access) and hashed, so the same
//! directory always maps to the same storage location.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::errors::{ContextError, Result};

/// Number of hex characters kept from the path digest.
const PROJECT_KEY_LEN: usize = 16;

/// Maximum length of an AI name.
const AI_NAME_MAX_LEN: usize = 64;

/// AIs the gateway routes to out of the box.
pub const KNOWN_AIS: [&str; 4] = ["gemini", "grok", "openai", "deepseek"];

/// Stable digest of an absolute project path
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Derive the key for a project directory.
    ///
    /// Relative paths are resolved against the process working directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let absolute = absolute_path(path.as_ref())?;
        Ok(Self::from_absolute(&absolute))
    }

    /// Derive the key for the process working directory.
    pub fn from_current_dir() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| ContextError::InvalidPath {
            path: ".".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_path(cwd)
    }

    fn from_absolute(path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..PROJECT_KEY_LEN].to_string())
    }

    /// Parse a key previously produced by [`ProjectKey::from_path`].
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == PROJECT_KEY_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProjectKey {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a project key: {value}"))
    }
}

impl From<ProjectKey> for String {
    fn from(key: ProjectKey) -> Self {
        key.0
    }
}

/// A resolved project directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    /// Storage key derived from `path`
    pub key: ProjectKey,
    /// Normalized absolute path
    pub path: PathBuf,
    /// Last path component, used for display
    pub name: String,
}

impl Project {
    /// Resolve a project directory into its key, absolute path and name.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = absolute_path(path.as_ref())?;
        let key = ProjectKey::from_absolute(&path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self { key, path, name })
    }
}

/// Make `path` absolute and normalize it lexically.
fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ContextError::InvalidPath {
            path: String::new(),
            reason: "empty path".to_string(),
        });
    }

    let absolute = std::path::absolute(path).map_err(|e| ContextError::InvalidPath {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            Component::Normal(part) => normalized.push(part),
        }
    }

    if !normalized.is_absolute() {
        return Err(ContextError::InvalidPath {
            path: path.display().to_string(),
            reason: "cannot be resolved to an absolute path".to_string(),
        });
    }
    Ok(normalized)
}

/// Validated, lowercase AI identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AiName(String);

impl AiName {
    /// Validate and normalize an AI name.
    pub fn parse(value: &str) -> Result<Self> {
        let name = value.trim().to_ascii_lowercase();
        if name.is_empty() || name.len() > AI_NAME_MAX_LEN {
            return Err(ContextError::InvalidAiName(format!(
                "'{value}' must be 1-{AI_NAME_MAX_LEN} characters"
            )));
        }
        if name == "all" {
            return Err(ContextError::InvalidAiName(
                "'all' is reserved for clearing every AI".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ContextError::InvalidAiName(format!(
                "'{value}' may only contain letters, digits, '_' and '-'"
            )));
        }
        Ok(Self(name))
    }

    /// The name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is one of [`KNOWN_AIS`]
    pub fn is_known(&self) -> bool {
        KNOWN_AIS.contains(&self.0.as_str())
    }
}

impl fmt::Display for AiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AiName {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AiName {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AiName> for String {
    fn from(name: AiName) -> Self {
        name.0
    }
}

/// Identity of one context record: a (project, AI) pair
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey {
    /// Owning project
    pub project: ProjectKey,
    /// AI the history belongs to
    pub ai: AiName,
}

impl ContextKey {
    /// Create a key for `ai` within `project`.
    pub fn new(project: ProjectKey, ai: AiName) -> Self {
        Self { project, ai }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.ai)
    }
}

/// What a clear operation removes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClearTarget {
    /// One AI's record
    Ai(AiName),
    /// Every AI's record within the project
    All,
}

impl FromStr for ClearTarget {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            AiName::parse(s).map(Self::Ai)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_same_key() {
        let a = ProjectKey::from_path("/projects/app").unwrap();
        let b = ProjectKey::from_path("/projects/app").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), PROJECT_KEY_LEN);
    }

    #[test]
    fn test_different_paths_different_keys() {
        let a = ProjectKey::from_path("/projects/app").unwrap();
        let b = ProjectKey::from_path("/projects/other").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_lexical_normalization() {
        let plain = ProjectKey::from_path("/projects/app").unwrap();
        assert_eq!(ProjectKey::from_path("/projects/./app").unwrap(), plain);
        assert_eq!(ProjectKey::from_path("/projects/app/").unwrap(), plain);
        assert_eq!(ProjectKey::from_path("/projects/x/../app").unwrap(), plain);
    }

    #[test]
    fn test_relative_path_uses_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let relative = ProjectKey::from_path("some/dir").unwrap();
        let absolute = ProjectKey::from_path(cwd.join("some/dir")).unwrap();
        assert_eq!(relative, absolute);
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let err = ProjectKey::from_path("").unwrap_err();
        assert!(matches!(err, ContextError::InvalidPath { .. }));
    }

    #[test]
    fn test_project_key_parse() {
        let key = ProjectKey::from_path("/projects/app").unwrap();
        assert_eq!(ProjectKey::parse(key.as_str()), Some(key));
        assert_eq!(ProjectKey::parse("not-a-key"), None);
        assert_eq!(ProjectKey::parse(".locks"), None);
    }

    #[test]
    fn test_project_resolve_name() {
        let project = Project::resolve("/home/user/my-app").unwrap();
        assert_eq!(project.name, "my-app");
        assert_eq!(project.path, PathBuf::from("/home/user/my-app"));
        assert_eq!(project.key, ProjectKey::from_path("/home/user/my-app").unwrap());
    }

    #[test]
    fn test_ai_name_validation() {
        assert_eq!(AiName::parse(" Gemini ").unwrap().as_str(), "gemini");
        assert!(AiName::parse("deepseek").unwrap().is_known());
        assert!(!AiName::parse("claude-2").unwrap().is_known());
        assert!(AiName::parse("").is_err());
        assert!(AiName::parse("all").is_err());
        assert!(AiName::parse("../etc").is_err());
        assert!(AiName::parse("gemini.corrupt-1").is_err());
    }

    #[test]
    fn test_clear_target_parse() {
        assert_eq!("ALL".parse::<ClearTarget>().unwrap(), ClearTarget::All);
        assert_eq!(
            "grok".parse::<ClearTarget>().unwrap(),
            ClearTarget::Ai(AiName::parse("grok").unwrap())
        );
        assert!("bad name".parse::<ClearTarget>().is_err());
    }
}
