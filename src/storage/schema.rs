#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Type {
    Bool,
    Int64,
    Float64,
    Bytes(u8),
}

impl Type {
    /// Get the size of the type in bytes.
    pub fn size(&self) -> usize {
        match self {
            Type::Bool => 1,
            Type::Int64 | Type::Float64 => 8,
            Type::Bytes(size) => *size as usize,
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct FieldItem {
    pub field_name: String,
    pub t: Type,
}

impl FieldItem {
    pub fn new(field_name: &str, t: Type) -> FieldItem {
        FieldItem {
            field_name: field_name.to_string(),
            t,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub fields: Vec<FieldItem>,
}

impl TableSchema {
    pub fn new(fields: Vec<FieldItem>) -> Self {
        Self { fields }
    }

    /// Get the size of a tuple under this schema, in bytes.
    pub fn get_size(&self) -> usize {
        self.fields.iter().map(|f| f.t.size()).sum()
    }

    pub fn small_int_schema(width: usize) -> Self {
        let mut fields: Vec<FieldItem> = Vec::new();
        for i in 0..width {
            fields.push(FieldItem::new(&format!("int-{}", i), Type::Int64));
        }
        Self { fields }
    }
}

impl Default for TableSchema {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}
