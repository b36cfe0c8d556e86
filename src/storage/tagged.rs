use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{read_json, write_json_atomic};

pub const TAGGED_FILE: &str = "tagged.json";

/// Files the metadata stage has already written tags into.
#[derive(Debug)]
pub struct TaggedSet {
    path: PathBuf,
    files: BTreeSet<String>,
}

impl TaggedSet {
    pub async fn load(state_dir: &Path) -> anyhow::Result<Self> {
        let path = state_dir.join(TAGGED_FILE);
        let files = read_json(&path).await?.unwrap_or_default();
        Ok(Self { path, files })
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains(file)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub async fn insert(&mut self, file: &str) -> anyhow::Result<()> {
        if self.files.contains(file) {
            return Ok(());
        }
        let mut next = self.files.clone();
        next.insert(file.to_string());
        write_json_atomic(&self.path, &next).await?;
        self.files = next;
        Ok(())
    }
}
