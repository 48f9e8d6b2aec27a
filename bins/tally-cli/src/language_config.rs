// Language descriptors loaded from languages.json
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tally_store::Language;

#[derive(Debug, Deserialize)]
struct LanguagesFile {
    languages: Vec<Language>,
}

/// Languages a submission may be stored with.
/// A submission keeps its own copy, so later edits here never touch stored records.
#[derive(Debug, Clone)]
pub struct LanguageCatalog {
    languages: Vec<Language>,
}

impl LanguageCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Language config file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: LanguagesFile = serde_json::from_str(content)?;
        if file.languages.is_empty() {
            bail!("No languages configured");
        }
        for (idx, lang) in file.languages.iter().enumerate() {
            if file.languages[..idx].iter().any(|l| l.name == lang.name) {
                bail!("Language '{}' is configured twice", lang.name);
            }
        }
        Ok(Self {
            languages: file.languages,
        })
    }

    /// Look a language up by name, case-insensitively.
    pub fn get(&self, name: &str) -> Result<&Language> {
        self.languages
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No configuration found for language '{}' (available: {})",
                    name,
                    self.names().join(", ")
                )
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.languages.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }
}
