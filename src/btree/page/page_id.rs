use std::fmt;

use crate::{error::TinyError, io::TinyWriter};

/// Page index 0 is the root pointer page, so 0 doubles as the "no
/// page" sentinel wherever an optional page reference is stored.
pub const EMPTY_PAGE_INDEX: u32 = 0;

#[derive(PartialEq, Copy, Clone, Eq, Hash, Debug)]
pub enum PageCategory {
    RootPointer,
    Internal,
    Leaf,
    Header,
}

impl PageCategory {
    pub fn to_byte(&self) -> u8 {
        match self {
            PageCategory::RootPointer => 0,
            PageCategory::Internal => 1,
            PageCategory::Leaf => 2,
            PageCategory::Header => 3,
        }
    }

    /// A byte that names no category is a corrupted page, surfaced
    /// to the caller rather than masked.
    pub fn from_byte(b: u8) -> Result<Self, TinyError> {
        match b {
            0 => Ok(PageCategory::RootPointer),
            1 => Ok(PageCategory::Internal),
            2 => Ok(PageCategory::Leaf),
            3 => Ok(PageCategory::Header),
            _ => Err(TinyError::db(&format!("invalid page category: {}", b))),
        }
    }
}

/// Identifies a unique page of a table. The category is part of the
/// identity, so dispatching on a page reference is a match on this
/// tag.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BTreePageID {
    pub category: PageCategory,

    /// The position of the page in the table file, starting from 0
    /// (the root pointer page).
    pub page_index: u32,

    pub table_id: u32,
}

impl BTreePageID {
    pub fn new(category: PageCategory, table_id: u32, page_index: u32) -> Self {
        Self {
            category,
            page_index,
            table_id,
        }
    }

    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_short_repr(&self) -> String {
        format!("{:?}_{}", self.category, self.page_index)
    }

    /// Serialize as a page number plus a category byte. The table id
    /// is implicit from the file the page lives in.
    pub fn write_to(&self, writer: &mut TinyWriter) {
        writer.write(&self.page_index);
        writer.write(&self.category.to_byte());
    }
}

impl fmt::Display for BTreePageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}_{}", self.category, self.page_index)
    }
}

impl fmt::Debug for BTreePageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
