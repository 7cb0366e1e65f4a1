//! In-memory `Storage` backend: used by tests and by any short-lived or
//! offline use of the server/client engines.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::rowid::{canonical, is_expired, random_id_part};
use crate::Storage;

type Table = HashMap<String, Vec<Vec<u8>>>;

/// `Storage` backed by an in-process `HashMap`, guarded by an `RwLock` - no
/// durability, no cross-process sharing.
#[derive(Default)]
pub struct MemStorage {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_canonical(table: &Table, given: &str) -> Option<String> {
        if table.contains_key(given) {
            return Some(given.to_string());
        }
        let mut matches = table.keys().filter(|k| match k.split_once('-') {
            Some((_, id_part)) => id_part == given,
            None => false,
        });
        let first = matches.next()?;
        if matches.next().is_some() {
            None
        } else {
            Some(first.clone())
        }
    }
}

impl Storage for MemStorage {
    fn prepare_table(&self, table: &str) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    fn insert(&self, table: &str, columns: &[&[u8]], id: Option<&str>, expiration: u64) -> Result<String> {
        let id_part = id.map(str::to_string).unwrap_or_else(random_id_part);
        let row_id = canonical(expiration, &id_part);
        let owned: Vec<Vec<u8>> = columns.iter().map(|c| c.to_vec()).collect();
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(row_id.clone(), owned);
        Ok(row_id)
    }

    fn fetch(&self, table: &str, row_id: &str, now: u64) -> Result<Vec<Vec<u8>>> {
        let mut tables = self.tables.write().unwrap();
        let Some(t) = tables.get_mut(table) else {
            return Err(Error::NotFound);
        };
        let Some(canonical_id) = Self::find_canonical(t, row_id) else {
            return Err(Error::NotFound);
        };
        let expiration = crate::rowid::expiration_of(&canonical_id).unwrap_or(0);
        if is_expired(expiration, now) {
            t.remove(&canonical_id);
            return Err(Error::NotFound);
        }
        Ok(t.get(&canonical_id).cloned().unwrap())
    }

    fn delete(&self, table: &str, row_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let Some(t) = tables.get_mut(table) else {
            return Ok(false);
        };
        match Self::find_canonical(t, row_id) {
            Some(canonical_id) => Ok(t.remove(&canonical_id).is_some()),
            None => Ok(false),
        }
    }

    fn expire_table(&self, table: &str, now: u64) -> Result<usize> {
        let mut tables = self.tables.write().unwrap();
        let Some(t) = tables.get_mut(table) else {
            return Ok(0);
        };
        let expired: Vec<String> = t
            .keys()
            .filter(|k| is_expired(crate::rowid::expiration_of(k).unwrap_or(0), now))
            .cloned()
            .collect();
        let n = expired.len();
        for k in expired {
            t.remove(&k);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_fetch_before_expiration() {
        let s = MemStorage::new();
        s.prepare_table("escrow").unwrap();
        let id = s.insert("escrow", &[b"ciphertext"], None, 1000).unwrap();
        let cols = s.fetch("escrow", &id, 500).unwrap();
        assert_eq!(cols, vec![b"ciphertext".to_vec()]);
    }

    #[test]
    fn fetch_after_expiration_removes_and_errors() {
        let s = MemStorage::new();
        s.prepare_table("escrow").unwrap();
        let id = s.insert("escrow", &[b"ciphertext"], None, 1000).unwrap();
        assert!(matches!(s.fetch("escrow", &id, 2000), Err(Error::NotFound)));
        // Gone for good, not just "expired this once".
        assert!(matches!(s.fetch("escrow", &id, 500), Err(Error::NotFound)));
    }

    #[test]
    fn fetch_by_id_suffix_alone() {
        let s = MemStorage::new();
        s.prepare_table("escrow").unwrap();
        let id = s.insert("escrow", &[b"x"], Some("cafef00d"), 1000).unwrap();
        assert_eq!(id, "3e8-cafef00d");
        let cols = s.fetch("escrow", "cafef00d", 500).unwrap();
        assert_eq!(cols, vec![b"x".to_vec()]);
    }

    #[test]
    fn delete_is_idempotent() {
        let s = MemStorage::new();
        s.prepare_table("escrow").unwrap();
        let id = s.insert("escrow", &[b"x"], None, 0).unwrap();
        assert!(s.delete("escrow", &id).unwrap());
        assert!(!s.delete("escrow", &id).unwrap());
    }

    #[test]
    fn expire_table_sweeps_only_expired_rows() {
        let s = MemStorage::new();
        s.prepare_table("vcodes").unwrap();
        let fresh = s.insert("vcodes", &[b"a"], None, 1000).unwrap();
        let stale = s.insert("vcodes", &[b"b"], None, 100).unwrap();
        let forever = s.insert("vcodes", &[b"c"], None, 0).unwrap();
        let removed = s.expire_table("vcodes", 500).unwrap();
        assert_eq!(removed, 1);
        assert!(s.fetch("vcodes", &fresh, 500).is_ok());
        assert!(s.fetch("vcodes", &forever, 500).is_ok());
        assert!(matches!(s.fetch("vcodes", &stale, 500), Err(Error::NotFound)));
    }
}
