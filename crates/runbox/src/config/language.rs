use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Placeholder replaced by the source file path in run commands
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Base name of the source file written into a workspace
pub const SOURCE_STEM: &str = "code";

/// Languages known at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python3,
    Shell,
    Cpp11,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python3, Language::Shell, Language::Cpp11];

    /// Identifier used in configuration and requests
    pub fn id(&self) -> &'static str {
        match self {
            Language::Python3 => "python3",
            Language::Shell => "shell",
            Language::Cpp11 => "cpp11",
        }
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::LanguageNotFound(s.to_string()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Configuration for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Human-readable name for the language (e.g., "Python 3")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// Run command with a `{source}` placeholder.
    ///
    /// Languages without a run command (compiled languages, for now) are
    /// registered for their extension only and cannot be run.
    #[serde(default)]
    pub run: Option<Vec<String>>,
}

impl LanguageConfig {
    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], source: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| arg.replace(SOURCE_PLACEHOLDER, source))
            .collect()
    }
}

/// File extension without dot (e.g., "py")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl fmt::Display for FileExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only language lookup tables built from configuration
///
/// Holds Language → extension, extension → Language and Language → run
/// command. Extensions are unique, so the first two maps are inverses of
/// each other over the registered subset.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    entries: HashMap<Language, LanguageConfig>,
    by_extension: HashMap<String, Language>,
}

impl LanguageRegistry {
    /// Build a registry, rejecting duplicate extensions
    pub fn new(
        entries: impl IntoIterator<Item = (Language, LanguageConfig)>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for (language, config) in entries {
            let ext = config.extension.as_str().to_owned();
            if let Some(other) = registry.by_extension.insert(ext.clone(), language)
                && other != language
            {
                return Err(ConfigError::Invalid(format!(
                    "extension '{ext}' registered for both '{other}' and '{language}'"
                )));
            }
            registry.entries.insert(language, config);
        }
        Ok(registry)
    }

    /// Get the configuration of a registered language
    pub fn get(&self, language: Language) -> Option<&LanguageConfig> {
        self.entries.get(&language)
    }

    pub fn extension(&self, language: Language) -> Option<&FileExtension> {
        self.get(language).map(|config| &config.extension)
    }

    /// Reverse lookup from a file extension (without dot)
    pub fn language_for_extension(&self, extension: &str) -> Option<Language> {
        self.by_extension.get(extension).copied()
    }

    /// Source file name for a language, e.g. `code.py`
    pub fn source_name(&self, language: Language) -> Option<String> {
        self.extension(language)
            .map(|ext| format!("{SOURCE_STEM}.{ext}"))
    }

    /// Expanded run command for `source`, or None if the language cannot be run
    pub fn run_command(&self, language: Language, source: &str) -> Option<Vec<String>> {
        let command = self.get(language)?.run.as_ref()?;
        if command.is_empty() {
            return None;
        }
        Some(LanguageConfig::expand_command(command, source))
    }

    /// Languages that have a run command, in stable order
    pub fn runnable(&self) -> Vec<Language> {
        let mut languages: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, config)| config.run.as_ref().is_some_and(|cmd| !cmd.is_empty()))
            .map(|(language, _)| *language)
            .collect();
        languages.sort();
        languages
    }

    /// Every registered language, in stable order
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<_> = self.entries.keys().copied().collect();
        languages.sort();
        languages
    }
}
