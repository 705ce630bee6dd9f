use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PREFERENCES_VERSION: u32 = 1;
const MAX_AUTOSAVE_DELAY_MS: u64 = 60_000;
const MAX_CACHE_LIMIT: usize = 256;
const MAX_RESULT_LIMIT: usize = 1_000;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub autosave: AutosavePreferences,
    #[serde(default)]
    pub editor: EditorPreferences,
    #[serde(default)]
    pub search: SearchPreferences,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            autosave: AutosavePreferences::default(),
            editor: EditorPreferences::default(),
            search: SearchPreferences::default(),
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.autosave.sanitize();
        self.editor.sanitize();
        self.search.sanitize();
    }
}

/// Debounced save behaviour. A delay of zero leaves manual saves only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosavePreferences {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_autosave_delay")]
    pub delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_autosave_delay() -> u64 {
    800
}

impl Default for AutosavePreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_autosave_delay(),
        }
    }
}

impl AutosavePreferences {
    fn sanitize(&mut self) {
        self.delay_ms = self.delay_ms.min(MAX_AUTOSAVE_DELAY_MS);
    }

    /// Delay actually applied by the scheduler.
    pub fn effective_delay_ms(&self) -> u64 {
        if self.enabled {
            self.delay_ms
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorPreferences {
    /// Editor states kept in memory at once; tabs beyond it stay open but unloaded.
    #[serde(default = "default_cache_limit")]
    pub cache_limit: usize,
}

fn default_cache_limit() -> usize {
    10
}

impl Default for EditorPreferences {
    fn default() -> Self {
        Self {
            cache_limit: default_cache_limit(),
        }
    }
}

impl EditorPreferences {
    fn sanitize(&mut self) {
        self.cache_limit = self.cache_limit.clamp(1, MAX_CACHE_LIMIT);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPreferences {
    #[serde(default = "default_title_weight")]
    pub title_weight: u32,
    #[serde(default = "default_tags_weight")]
    pub tags_weight: u32,
    #[serde(default = "default_body_weight")]
    pub body_weight: u32,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    #[serde(default = "default_true")]
    pub fuzzy: bool,
}

fn default_title_weight() -> u32 {
    10
}

fn default_tags_weight() -> u32 {
    5
}

fn default_body_weight() -> u32 {
    1
}

fn default_result_limit() -> usize {
    50
}

impl Default for SearchPreferences {
    fn default() -> Self {
        Self {
            title_weight: default_title_weight(),
            tags_weight: default_tags_weight(),
            body_weight: default_body_weight(),
            result_limit: default_result_limit(),
            fuzzy: true,
        }
    }
}

impl SearchPreferences {
    fn sanitize(&mut self) {
        if self.title_weight == 0 && self.tags_weight == 0 && self.body_weight == 0 {
            self.title_weight = default_title_weight();
            self.tags_weight = default_tags_weight();
            self.body_weight = default_body_weight();
        }
        if self.result_limit == 0 {
            self.result_limit = default_result_limit();
        }
        self.result_limit = self.result_limit.min(MAX_RESULT_LIMIT);
    }
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        let mut data = preferences;
        data.sanitize();
        Self {
            path: path.into(),
            data,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self::new(path, Preferences::default()));
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: Preferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
