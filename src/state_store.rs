use std::fs;
use std::path::PathBuf;

use anyhow::Context;

/// Host-provided key-value seam for restore state. The bridge only ever
/// stores one opaque payload: the serialized derivation state.
pub trait StateStore: Send + Sync {
    fn load(&mut self) -> anyhow::Result<Option<String>>;
    fn save(&mut self, payload: &str) -> anyhow::Result<()>;
}

/// File-backed store for standalone runs. Writes go through a sibling temp
/// file and a rename so a crash never leaves a half-written payload.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for FileStateStore {
    fn load(&mut self) -> anyhow::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let payload = fs::read_to_string(&self.path)
            .with_context(|| format!("reading state file {}", self.path.display()))?;
        Ok(Some(payload))
    }

    fn save(&mut self, payload: &str) -> anyhow::Result<()> {
        let staged = self.path.with_extension("tmp");
        fs::write(&staged, payload)
            .with_context(|| format!("writing state file {}", staged.display()))?;
        fs::rename(&staged, &self.path)
            .with_context(|| format!("replacing state file {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store for tests and hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryStateStore {
    payload: Option<String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.payload.clone())
    }

    fn save(&mut self, payload: &str) -> anyhow::Result<()> {
        self.payload = Some(payload.to_string());
        Ok(())
    }
}
