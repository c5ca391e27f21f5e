/// Serialized width of a page number.
pub const INDEX_SIZE: usize = 4;

/// Serialized width of a page category tag.
pub const CATEGORY_SIZE: usize = 1;

/// The root pointer page stores two page ids (the root page and the
/// first header page) and nothing else, so it is much smaller than a
/// regular page.
pub const ROOT_PTR_PAGE_SIZE: usize = 2 * (INDEX_SIZE + CATEGORY_SIZE);
