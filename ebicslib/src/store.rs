//! Реализации `KeyringStore`: в памяти и в файлах.

use crate::{
    error::{EbicsError, Result},
    model::IdentityRef,
    traits::KeyringStore,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryKeyringStore {
    blobs: Mutex<HashMap<IdentityRef, Vec<u8>>>,
}

impl InMemoryKeyringStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyringStore for InMemoryKeyringStore {
    fn load(&self, identity: &IdentityRef) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| EbicsError::Store("keyring store lock poisoned".into()))?;
        Ok(blobs.get(identity).cloned())
    }

    fn save(&self, identity: &IdentityRef, blob: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .map_err(|_| EbicsError::Store("keyring store lock poisoned".into()))?
            .insert(identity.clone(), blob.to_vec());
        Ok(())
    }
}

/// Один файл `<identity>.json` на пользователя, запись через временный
/// файл и rename.
#[derive(Debug, Clone)]
pub struct FileKeyringStore {
    dir: PathBuf,
}

impl FileKeyringStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, identity: &IdentityRef) -> Result<PathBuf> {
        let name = &identity.0;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || name.starts_with('.')
        {
            return Err(EbicsError::Store(format!("unsafe identity name {name:?}")));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl KeyringStore for FileKeyringStore {
    fn load(&self, identity: &IdentityRef) -> Result<Option<Vec<u8>>> {
        let path = self.path(identity)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, identity: &IdentityRef, blob: &[u8]) -> Result<()> {
        let path = self.path(identity)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyringStore::new(dir.path().join("keys")).unwrap();
        let r = IdentityRef("ebics-user-1".into());
        assert_eq!(store.load(&r).unwrap(), None);
        store.save(&r, b"{\"version\":1}").unwrap();
        assert_eq!(store.load(&r).unwrap().as_deref(), Some(&b"{\"version\":1}"[..]));
        assert!(!dir.path().join("keys/ebics-user-1.json.tmp").exists());
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyringStore::new(dir.path()).unwrap();
        assert!(store.save(&IdentityRef("../x".into()), b"").is_err());
        assert!(store.load(&IdentityRef("".into())).is_err());
    }
}
