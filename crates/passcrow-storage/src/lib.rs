//! A three-table keyed store (`escrow`, `vcodes`, `rlimit`) with per-row
//! expiration (§4.5). Every row id has canonical form
//! `"<expiration_hex>-<id_hex>"`; fetching an expired row physically
//! removes it and behaves exactly like fetching one that never existed.

mod error;
mod mem;
mod rowid;
mod sled_backend;

pub use error::{Error, Result};
pub use mem::MemStorage;
pub use rowid::{canonical as canonical_row_id, is_valid as is_valid_row_id};
pub use sled_backend::SledStorage;

/// Table names this protocol uses. A `Storage` impl need not special-case
/// these; they're just namespaces for keys.
pub const TABLE_ESCROW: &str = "escrow";
pub const TABLE_VCODES: &str = "vcodes";
pub const TABLE_RLIMIT: &str = "rlimit";

/// A keyed store with per-row expiration, atomic insert/fetch/delete, and
/// a sweep operation for garbage-collecting expired rows.
pub trait Storage: Send + Sync {
    /// Idempotently ensure `table` exists.
    fn prepare_table(&self, table: &str) -> Result<()>;

    /// Insert a new row with the given `columns`, returning its canonical
    /// id. If `id` is `None` a random one is generated. `expiration` is a
    /// unix timestamp; `0` means "never expires".
    fn insert(&self, table: &str, columns: &[&[u8]], id: Option<&str>, expiration: u64) -> Result<String>;

    /// Fetch a row's columns by canonical id or bare id suffix. Errors with
    /// [`Error::NotFound`] if missing *or* expired as of `now` - and
    /// physically removes the row in the expired case.
    fn fetch(&self, table: &str, row_id: &str, now: u64) -> Result<Vec<Vec<u8>>>;

    /// Delete a row by canonical id or bare id suffix. Idempotent: returns
    /// whether anything was actually removed.
    fn delete(&self, table: &str, row_id: &str) -> Result<bool>;

    /// Sweep `table` for rows whose expiration is at or before `now`,
    /// removing them. Returns the number of rows removed.
    fn expire_table(&self, table: &str, now: u64) -> Result<usize>;
}
