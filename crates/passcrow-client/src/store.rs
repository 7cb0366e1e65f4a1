//! Local pack persistence (§9): one file per pack name. Filenames that
//! aren't ASCII-safe are base32-encoded with a leading marker rather than
//! stored verbatim, so a pack name containing path separators or exotic
//! Unicode can never escape the pack directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pack::RecoveryPack;

const ESCAPED_PREFIX: char = '_';

fn is_ascii_safe(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with(ESCAPED_PREFIX)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

const BASE32_ALPHABET: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Map a pack name to a filesystem-safe filename. Safe names pass through
/// unchanged; anything else is base32-encoded behind a `_` marker so it can
/// be recognized and reversed.
pub fn filename_for(name: &str) -> String {
    if is_ascii_safe(name) {
        name.to_string()
    } else {
        format!("{ESCAPED_PREFIX}{}", base32::encode(BASE32_ALPHABET, name.as_bytes()))
    }
}

fn name_from_filename(filename: &str) -> Option<String> {
    if let Some(b32part) = filename.strip_prefix(ESCAPED_PREFIX) {
        let bytes = base32::decode(BASE32_ALPHABET, b32part)?;
        String::from_utf8(bytes).ok()
    } else {
        Some(filename.to_string())
    }
}

/// Load, save, delete, and enumerate locally-held recovery packs. A
/// transport-agnostic seam mirroring [`crate::rpc::RpcTransport`], so the
/// engine doesn't hardcode a filesystem.
pub trait PackStore: Send + Sync {
    fn load(&self, name: &str) -> Result<RecoveryPack>;
    fn save(&self, name: &str, pack: &RecoveryPack) -> Result<()>;
    fn delete(&self, name: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<String>>;
}

pub struct FsPackStore {
    dir: PathBuf,
}

impl FsPackStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(filename_for(name))
    }
}

impl PackStore for FsPackStore {
    fn load(&self, name: &str) -> Result<RecoveryPack> {
        let path = self.path_for(name);
        let bytes = fs::read(&path).map_err(|_| Error::PackNotFound(name.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Io(e.to_string()))
    }

    fn save(&self, name: &str, pack: &RecoveryPack) -> Result<()> {
        let path = self.path_for(name);
        let json = serde_json::to_vec_pretty(pack).map_err(|e| Error::Io(e.to_string()))?;
        fs::write(path, json).map_err(|e| Error::Io(e.to_string()))
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e.to_string())),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::Io(e.to_string()))?;
            if !entry.file_type().map_err(|e| Error::Io(e.to_string()))?.is_file() {
                continue;
            }
            if let Some(filename) = entry.file_name().to_str() {
                if let Some(name) = name_from_filename(filename) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

pub fn path_exists(dir: &Path, name: &str) -> bool {
    dir.join(filename_for(name)).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_safe_names_pass_through() {
        assert_eq!(filename_for("my-account"), "my-account");
    }

    #[test]
    fn unsafe_names_are_escaped_and_reversible() {
        let name = "my/weird:name ☃";
        let filename = filename_for(name);
        assert!(filename.starts_with('_'));
        assert_eq!(name_from_filename(&filename).unwrap(), name);
    }

    #[test]
    fn store_round_trips_a_pack() {
        let tmp = std::env::temp_dir().join(format!("passcrow-test-{}", std::process::id()));
        let store = FsPackStore::new(&tmp).unwrap();
        let pack = RecoveryPack {
            name: "weird name/here".to_string(),
            secret: "s".to_string(),
            created_ts: 1,
            is_ephemeral: false,
            ephemeral_id: None,
            description: "d".to_string(),
            min_shares: 1,
            shares: vec![],
            escrow: vec![],
        };
        store.save(&pack.name, &pack).unwrap();
        let loaded = store.load(&pack.name).unwrap();
        assert_eq!(loaded.name, pack.name);
        assert!(store.list().unwrap().contains(&pack.name));
        assert!(store.delete(&pack.name).unwrap());
        assert!(store.load(&pack.name).is_err());
        let _ = fs::remove_dir_all(&tmp);
    }
}
