use super::BTreePageID;
use crate::{error::TinyError, storage::schema::TableSchema};

/// The capability every page category shares: construction from the
/// on-disk bytes, identity, parent maintenance and serialization.
pub trait BTreePage {
    /// Deserialize a page. Corrupted on-disk state (e.g. an invalid
    /// category byte) is reported as an error, never masked.
    fn new(
        pid: &BTreePageID,
        bytes: &[u8],
        schema: &TableSchema,
        key_field: usize,
    ) -> Result<Self, TinyError>
    where
        Self: Sized;

    fn get_pid(&self) -> BTreePageID;

    fn get_parent_pid(&self) -> BTreePageID;
    fn set_parent_pid(&mut self, pid: &BTreePageID);

    /// Serialize the page into exactly the byte block it occupies on
    /// disk. Reading the result back through `new` yields an
    /// identical page.
    fn get_page_data(&self) -> Vec<u8>;
}
