use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::now_millis;

/// Captures kept in the history, newest first.
pub const MAX_CAPTURES: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access template store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template store {path} is corrupt: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no template with id '{0}'")]
    TemplateNotFound(String),
    #[error("template name must not be empty")]
    EmptyName,
    #[error("template descriptor must not be empty")]
    EmptyDescriptor,
    #[error("face matching requires consent; run `vocalis templates consent` first")]
    ConsentRequired,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A saved face descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub descriptor: Vec<f32>,
    pub created_at: u64,
}

/// A dataset capture record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub source: String,
    pub created_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    consent: bool,
    #[serde(default)]
    templates: Vec<Template>,
    #[serde(default)]
    captures: Vec<Capture>,
}

/// Templates, capture history and the consent flag, persisted as one JSON file.
///
/// Mutations only touch memory; call [`TemplateStore::save`] to persist.
#[derive(Debug)]
pub struct TemplateStore {
    path: PathBuf,
    data: StoreFile,
}

impl TemplateStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No template store at {}, starting empty", path.display());
                StoreFile::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn save(&self) -> Result<()> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.data).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(io_err)?;
        log::info!(
            "Saved {} template(s) and {} capture(s) to {}",
            self.data.templates.len(),
            self.data.captures.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn templates(&self) -> &[Template] {
        &self.data.templates
    }

    pub fn captures(&self) -> &[Capture] {
        &self.data.captures
    }

    pub fn has_consent(&self) -> bool {
        self.data.consent
    }

    pub fn accept_consent(&mut self) {
        self.data.consent = true;
    }

    /// Fails unless consent has been recorded.
    pub fn require_consent(&self) -> Result<()> {
        if self.data.consent {
            Ok(())
        } else {
            Err(StoreError::ConsentRequired)
        }
    }

    /// Save a new template in front of the existing ones.
    pub fn add_template(&mut self, name: &str, descriptor: Vec<f32>) -> Result<&Template> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if descriptor.is_empty() {
            return Err(StoreError::EmptyDescriptor);
        }
        let id = self.next_id();
        self.data.templates.insert(
            0,
            Template {
                id,
                name: name.to_string(),
                descriptor,
                created_at: now_millis(),
            },
        );
        Ok(&self.data.templates[0])
    }

    pub fn remove_template(&mut self, id: &str) -> Result<Template> {
        let index = self
            .data
            .templates
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::TemplateNotFound(id.to_string()))?;
        Ok(self.data.templates.remove(index))
    }

    /// Record a capture, evicting the oldest past [`MAX_CAPTURES`].
    pub fn record_capture(&mut self, source: &str) -> &Capture {
        let id = self.next_id();
        self.data.captures.insert(
            0,
            Capture {
                id,
                source: source.to_string(),
                created_at: now_millis(),
            },
        );
        self.data.captures.truncate(MAX_CAPTURES);
        &self.data.captures[0]
    }

    /// Forget templates, captures and consent.
    pub fn clear_all(&mut self) {
        self.data = StoreFile::default();
    }

    /// Millisecond ids, bumped past any id already in use.
    fn next_id(&self) -> String {
        let mut candidate = now_millis();
        loop {
            let id = candidate.to_string();
            let taken = self.data.templates.iter().any(|t| t.id == id)
                || self.data.captures.iter().any(|c| c.id == id);
            if !taken {
                return id;
            }
            candidate += 1;
        }
    }
}

/// `<data dir>/vocalis/templates.json`, falling back to the home directory.
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join("vocalis").join("templates.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(&dir.path().join("nested").join("templates.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_file_opens_empty() {
        let (_dir, store) = temp_store();
        assert!(store.templates().is_empty());
        assert!(store.captures().is_empty());
        assert!(!store.has_consent());
    }

    #[test]
    fn templates_are_newest_first_with_unique_ids() {
        let (_dir, mut store) = temp_store();
        store.add_template("Ana", vec![0.1, 0.2]).unwrap();
        store.add_template("  Bia ", vec![0.3]).unwrap();
        let names: Vec<&str> = store.templates().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Bia", "Ana"]);
        assert_ne!(store.templates()[0].id, store.templates()[1].id);
    }

    #[test]
    fn rejects_empty_name_and_descriptor() {
        let (_dir, mut store) = temp_store();
        assert!(matches!(store.add_template("  ", vec![0.1]), Err(StoreError::EmptyName)));
        assert!(matches!(store.add_template("Ana", vec![]), Err(StoreError::EmptyDescriptor)));
        assert!(store.templates().is_empty());
    }

    #[test]
    fn remove_unknown_template_fails() {
        let (_dir, mut store) = temp_store();
        let id = store.add_template("Ana", vec![0.1]).unwrap().id.clone();
        assert!(matches!(
            store.remove_template("nope"),
            Err(StoreError::TemplateNotFound(ref missing)) if missing == "nope"
        ));
        let removed = store.remove_template(&id).unwrap();
        assert_eq!(removed.name, "Ana");
        assert!(store.templates().is_empty());
    }

    #[test]
    fn capture_history_is_capped() {
        let (_dir, mut store) = temp_store();
        for i in 0..(MAX_CAPTURES + 3) {
            store.record_capture(&format!("frame-{}.png", i));
        }
        assert_eq!(store.captures().len(), MAX_CAPTURES);
        assert_eq!(store.captures()[0].source, "frame-14.png");
        assert_eq!(store.captures()[MAX_CAPTURES - 1].source, "frame-3.png");
    }

    #[test]
    fn persists_across_reopen() {
        let (_dir, mut store) = temp_store();
        store.accept_consent();
        store.add_template("Ana", vec![0.5, 0.25]).unwrap();
        store.record_capture("shot.png");
        store.save().unwrap();

        let reopened = TemplateStore::open(store.path()).unwrap();
        assert!(reopened.has_consent());
        assert_eq!(reopened.templates(), store.templates());
        assert_eq!(reopened.captures(), store.captures());
    }

    #[test]
    fn clear_all_revokes_consent() {
        let (_dir, mut store) = temp_store();
        store.accept_consent();
        store.add_template("Ana", vec![0.5]).unwrap();
        assert!(store.require_consent().is_ok());

        store.clear_all();
        assert!(store.templates().is_empty());
        assert!(matches!(store.require_consent(), Err(StoreError::ConsentRequired)));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(TemplateStore::open(&path), Err(StoreError::Json { .. })));
    }
}
