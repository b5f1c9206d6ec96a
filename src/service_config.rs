//! Service config inspection.
//!
//! An API directory carries a `google.api.Service` YAML document. When a new
//! API is onboarded we only need one fact from it: whether its publishing
//! settings ask for a client library in the repository's language. The
//! document is modelled as nested optional structs so that every lookup is
//! an explicit present/absent step.

use crate::error::{Error, Result};
use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const SERVICE_CONFIG_TYPE: &str = "google.api.Service";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub publishing: Option<Publishing>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Publishing {
    pub library_settings: Option<Vec<ClientLibrarySettings>>,
}

/// One entry of `publishing.library_settings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientLibrarySettings {
    pub version: Option<String>,
    pub java_settings: Option<LanguageSettings>,
    pub cpp_settings: Option<LanguageSettings>,
    pub php_settings: Option<LanguageSettings>,
    pub python_settings: Option<LanguageSettings>,
    pub node_settings: Option<LanguageSettings>,
    pub dotnet_settings: Option<LanguageSettings>,
    pub ruby_settings: Option<LanguageSettings>,
    pub go_settings: Option<LanguageSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LanguageSettings {
    pub common: Option<CommonLanguageSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommonLanguageSettings {
    pub destinations: Vec<String>,
}

impl ClientLibrarySettings {
    /// The settings block for `language`, if the language is known and present.
    pub fn language_settings(&self, language: &str) -> Option<&LanguageSettings> {
        match language {
            "java" => self.java_settings.as_ref(),
            "cpp" => self.cpp_settings.as_ref(),
            "php" => self.php_settings.as_ref(),
            "python" => self.python_settings.as_ref(),
            "node" | "nodejs" => self.node_settings.as_ref(),
            "dotnet" => self.dotnet_settings.as_ref(),
            "ruby" => self.ruby_settings.as_ref(),
            "go" => self.go_settings.as_ref(),
            _ => None,
        }
    }

    fn destinations(&self, language: &str) -> Option<&[String]> {
        let settings = self.language_settings(language)?;
        let common = settings.common.as_ref()?;
        Some(common.destinations.as_slice())
    }
}

impl ServiceConfig {
    pub fn is_service(&self) -> bool {
        self.kind.as_deref() == Some(SERVICE_CONFIG_TYPE)
    }

    /// Whether any library settings entry lists a publishing destination for
    /// `language`.
    pub fn requests_library(&self, language: &str) -> bool {
        let Some(publishing) = self.publishing.as_ref() else {
            return false;
        };
        let Some(settings) = publishing.library_settings.as_ref() else {
            return false;
        };
        settings.iter().any(|entry| {
            entry
                .destinations(language)
                .is_some_and(|destinations| !destinations.is_empty())
        })
    }
}

pub fn parse_service_config(yaml: &str) -> Result<ServiceConfig> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Finds the service config in `api_dir`: the first YAML file (by name)
/// whose `type` is `google.api.Service`. Returns the file name and document.
pub fn find_service_config(api_dir: &Path) -> Result<Option<(String, ServiceConfig)>> {
    if !api_dir.is_dir() {
        return Err(Error::Config {
            message: format!("API directory '{}' does not exist", api_dir.display()),
        });
    }

    let mut names: Vec<String> = fs::read_dir(api_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".yaml") || name.ends_with(".yml"))
        .collect();
    names.sort();

    for name in names {
        let content = fs::read_to_string(api_dir.join(&name))?;
        match parse_service_config(&content) {
            Ok(config) if config.is_service() => return Ok(Some((name, config))),
            Ok(_) => debug!("'{}' is not a service config", name),
            Err(e) => debug!("Skipping unparseable '{}': {}", name, e),
        }
    }
    Ok(None)
}
