use super::{
    BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_INDEX,
};
use crate::{
    btree::consts::ROOT_PTR_PAGE_SIZE,
    error::TinyError,
    io::{TinyReader, TinyWriter},
    storage::schema::TableSchema,
};

/// The first page of every table file. It records where the current
/// root page lives (the root moves when the tree grows or shrinks a
/// level) and where the header-page chain starts.
pub struct BTreeRootPointerPage {
    base: BTreeBasePage,

    // The root pid is mandatory to avoid a bunch of Option & match;
    // a fresh file is initialized with an empty leaf as root.
    root_pid: BTreePageID,

    header_page_index: u32,
}

impl BTreeRootPointerPage {
    /// The serialized size, much smaller than a regular page.
    pub fn page_size() -> usize {
        ROOT_PTR_PAGE_SIZE
    }

    pub fn get_root_pid(&self) -> BTreePageID {
        self.root_pid
    }

    pub fn set_root_pid(&mut self, pid: &BTreePageID) {
        self.root_pid = *pid;
    }

    /// Get the id of the first header page, or None if the file has
    /// no header pages yet.
    pub fn get_header_pid(&self) -> Option<BTreePageID> {
        if self.header_page_index == EMPTY_PAGE_INDEX {
            None
        } else {
            Some(BTreePageID::new(
                PageCategory::Header,
                self.get_pid().get_table_id(),
                self.header_page_index,
            ))
        }
    }

    pub fn set_header_pid(&mut self, pid: &BTreePageID) {
        self.header_page_index = pid.page_index;
    }
}

impl BTreePage for BTreeRootPointerPage {
    fn new(
        pid: &BTreePageID,
        bytes: &[u8],
        _schema: &TableSchema,
        _key_field: usize,
    ) -> Result<Self, TinyError> {
        let mut reader = TinyReader::new(bytes);

        let root_index: u32 = reader.read();
        let root_category_byte: u8 = reader.read();
        let root_category = if root_index == EMPTY_PAGE_INDEX {
            // not expected after file initialization, default to a
            // leaf root
            PageCategory::Leaf
        } else {
            PageCategory::from_byte(root_category_byte)?
        };
        let root_pid =
            BTreePageID::new(root_category, pid.get_table_id(), root_index);

        let header_page_index: u32 = reader.read();
        let _header_category_byte: u8 = reader.read();

        Ok(Self {
            base: BTreeBasePage::new(pid),
            root_pid,
            header_page_index,
        })
    }

    fn get_pid(&self) -> BTreePageID {
        self.base.get_pid()
    }

    fn get_parent_pid(&self) -> BTreePageID {
        self.base.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.base.set_parent_pid(pid)
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = TinyWriter::new();

        self.root_pid.write_to(&mut writer);

        writer.write(&self.header_page_index);
        writer.write(&PageCategory::Header.to_byte());

        writer.to_padded_bytes(ROOT_PTR_PAGE_SIZE)
    }
}
