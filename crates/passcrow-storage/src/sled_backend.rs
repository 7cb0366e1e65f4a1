//! `sled`-backed `Storage`: durable across restarts, no separate database
//! process to operate - matches how this codebase already embeds storage
//! in its server binaries.

use std::path::Path;

use crate::error::{Error, Result};
use crate::rowid::{canonical, is_expired, random_id_part};
use crate::Storage;

fn backend_err(e: sled::Error) -> Error {
    Error::Backend(e.to_string())
}

fn encode_columns(columns: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    for col in columns {
        buf.extend_from_slice(&(col.len() as u32).to_le_bytes());
        buf.extend_from_slice(col);
    }
    buf
}

fn decode_columns(mut buf: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut cols = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 4 {
            return Err(Error::Backend("truncated row".to_string()));
        }
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        buf = &buf[4..];
        if buf.len() < len {
            return Err(Error::Backend("truncated row".to_string()));
        }
        cols.push(buf[..len].to_vec());
        buf = &buf[len..];
    }
    Ok(cols)
}

pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(backend_err)?;
        Ok(Self { db })
    }

    fn key(table: &str, id: &str) -> Vec<u8> {
        let mut k = table.as_bytes().to_vec();
        k.push(0);
        k.extend_from_slice(id.as_bytes());
        k
    }

    fn prefix(table: &str) -> Vec<u8> {
        let mut k = table.as_bytes().to_vec();
        k.push(0);
        k
    }

    fn find_canonical(&self, table: &str, given: &str) -> Result<Option<String>> {
        let direct = Self::key(table, given);
        if self.db.contains_key(&direct).map_err(backend_err)? {
            return Ok(Some(given.to_string()));
        }
        let prefix = Self::prefix(table);
        let mut found: Option<String> = None;
        for item in self.db.scan_prefix(&prefix) {
            let (k, _) = item.map_err(backend_err)?;
            let id_bytes = &k[prefix.len()..];
            let id_str = std::str::from_utf8(id_bytes)
                .map_err(|_| Error::Backend("non utf8 row id".to_string()))?;
            if let Some((_, id_part)) = id_str.split_once('-') {
                if id_part == given {
                    if found.is_some() {
                        return Ok(None);
                    }
                    found = Some(id_str.to_string());
                }
            }
        }
        Ok(found)
    }
}

impl Storage for SledStorage {
    fn prepare_table(&self, _table: &str) -> Result<()> {
        // sled has no notion of separate tables to create up front; the
        // table name is folded into the key prefix.
        Ok(())
    }

    fn insert(&self, table: &str, columns: &[&[u8]], id: Option<&str>, expiration: u64) -> Result<String> {
        let id_part = id.map(str::to_string).unwrap_or_else(random_id_part);
        let row_id = canonical(expiration, &id_part);
        self.db
            .insert(Self::key(table, &row_id), encode_columns(columns))
            .map_err(backend_err)?;
        Ok(row_id)
    }

    fn fetch(&self, table: &str, row_id: &str, now: u64) -> Result<Vec<Vec<u8>>> {
        let Some(canonical_id) = self.find_canonical(table, row_id)? else {
            return Err(Error::NotFound);
        };
        let expiration = crate::rowid::expiration_of(&canonical_id).unwrap_or(0);
        if is_expired(expiration, now) {
            self.db
                .remove(Self::key(table, &canonical_id))
                .map_err(backend_err)?;
            return Err(Error::NotFound);
        }
        let raw = self
            .db
            .get(Self::key(table, &canonical_id))
            .map_err(backend_err)?
            .ok_or(Error::NotFound)?;
        decode_columns(&raw)
    }

    fn delete(&self, table: &str, row_id: &str) -> Result<bool> {
        match self.find_canonical(table, row_id)? {
            Some(canonical_id) => {
                let removed = self
                    .db
                    .remove(Self::key(table, &canonical_id))
                    .map_err(backend_err)?;
                Ok(removed.is_some())
            }
            None => Ok(false),
        }
    }

    fn expire_table(&self, table: &str, now: u64) -> Result<usize> {
        let prefix = Self::prefix(table);
        let mut expired = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (k, _) = item.map_err(backend_err)?;
            let id_bytes = &k[prefix.len()..];
            let id_str = std::str::from_utf8(id_bytes)
                .map_err(|_| Error::Backend("non utf8 row id".to_string()))?;
            if is_expired(crate::rowid::expiration_of(id_str).unwrap_or(0), now) {
                expired.push(k.to_vec());
            }
        }
        let n = expired.len();
        for k in expired {
            self.db.remove(k).map_err(backend_err)?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> SledStorage {
        let dir = tempdir();
        SledStorage::open(dir).unwrap()
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("passcrow-storage-test-{}", random_id_part()));
        p
    }

    #[test]
    fn insert_then_fetch_before_expiration() {
        let s = open_tmp();
        let id = s.insert("escrow", &[b"ciphertext"], None, 1000).unwrap();
        let cols = s.fetch("escrow", &id, 500).unwrap();
        assert_eq!(cols, vec![b"ciphertext".to_vec()]);
    }

    #[test]
    fn fetch_after_expiration_removes_and_errors() {
        let s = open_tmp();
        let id = s.insert("escrow", &[b"ciphertext"], None, 1000).unwrap();
        assert!(matches!(s.fetch("escrow", &id, 2000), Err(Error::NotFound)));
        assert!(matches!(s.fetch("escrow", &id, 500), Err(Error::NotFound)));
    }

    #[test]
    fn delete_is_idempotent() {
        let s = open_tmp();
        let id = s.insert("escrow", &[b"x"], None, 0).unwrap();
        assert!(s.delete("escrow", &id).unwrap());
        assert!(!s.delete("escrow", &id).unwrap());
    }
}
