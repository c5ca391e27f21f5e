use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::{
    btree::page::BTreePageID,
    io::{Decodeable, Encodeable, TinyReader},
    storage::schema::{TableSchema, Type},
};

/// A single typed value.
///
/// Comparison is only defined between cells of the same type, which
/// is all the engine ever does (a key field is compared against keys
/// of the same column).
#[derive(Debug, Clone)]
pub enum Cell {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Bytes(Vec<u8>),
}

impl Cell {
    /// The zero value of the given type, used to fill unoccupied
    /// slots so a page always serializes to its full fixed width.
    pub fn default_for(t: &Type) -> Self {
        match t {
            Type::Bool => Cell::Bool(false),
            Type::Int64 => Cell::Int64(0),
            Type::Float64 => Cell::Float64(0.0),
            Type::Bytes(size) => Cell::Bytes(vec![0; *size as usize]),
        }
    }

    pub fn read_from(reader: &mut TinyReader, t: &Type) -> Self {
        match t {
            Type::Bool => Cell::Bool(bool::read_from(reader)),
            Type::Int64 => Cell::Int64(i64::read_from(reader)),
            Type::Float64 => Cell::Float64(f64::read_from(reader)),
            Type::Bytes(size) => {
                Cell::Bytes(reader.read_exact(*size as usize).to_vec())
            }
        }
    }
}

impl Encodeable for Cell {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Cell::Bool(v) => vec![*v as u8],
            Cell::Int64(v) => v.to_le_bytes().to_vec(),
            Cell::Float64(v) => v.to_le_bytes().to_vec(),
            Cell::Bytes(v) => v.clone(),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Int64(a), Cell::Int64(b)) => a == b,
            (Cell::Float64(a), Cell::Float64(b)) => a == b,
            (Cell::Bytes(a), Cell::Bytes(b)) => a == b,
            _ => panic!("comparing cells of different types"),
        }
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.partial_cmp(b),
            (Cell::Int64(a), Cell::Int64(b)) => a.partial_cmp(b),
            (Cell::Float64(a), Cell::Float64(b)) => a.partial_cmp(b),
            (Cell::Bytes(a), Cell::Bytes(b)) => a.partial_cmp(b),
            _ => panic!("comparing cells of different types"),
        }
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap()
    }
}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Cell::Bool(v) => v.hash(state),
            Cell::Int64(v) => v.hash(state),
            Cell::Float64(v) => v.to_le_bytes().hash(state),
            Cell::Bytes(v) => v.hash(state),
        }
    }
}

pub struct Tuple {
    cells: Vec<Cell>,
}

// constructors
impl Tuple {
    pub fn new_from_cells(cells: &[Cell]) -> Self {
        Self {
            cells: cells.to_vec(),
        }
    }

    pub fn read_from(reader: &mut TinyReader, schema: &TableSchema) -> Self {
        let mut cells: Vec<Cell> = Vec::new();
        for field in &schema.fields {
            cells.push(Cell::read_from(reader, &field.t));
        }
        Tuple { cells }
    }

    pub fn new_int_tuples(value: i64, width: usize) -> Self {
        let cells = vec![Cell::Int64(value); width];
        Tuple { cells }
    }
}

impl Tuple {
    pub fn get_cell(&self, i: usize) -> Cell {
        self.cells[i].clone()
    }

    pub fn get_cells(&self) -> Vec<Cell> {
        self.cells.clone()
    }

    pub fn clone(&self) -> Tuple {
        Tuple {
            cells: self.cells.clone(),
        }
    }
}

impl Encodeable for Tuple {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for cell in &self.cells {
            bytes.append(&mut cell.to_bytes());
        }
        bytes
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content: Vec<String> =
            self.cells.iter().map(|c| format!("{:?}", c)).collect();
        write!(f, "{{{}}}", content.join(", "))
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A tuple decorated with its record id (the page it lives on and
/// the slot it occupies).
#[derive(PartialEq)]
pub struct WrappedTuple {
    internal: Tuple,
    slot_number: usize,
    pid: BTreePageID,
}

impl std::ops::Deref for WrappedTuple {
    type Target = Tuple;
    fn deref(&self) -> &Self::Target {
        &self.internal
    }
}

impl std::ops::DerefMut for WrappedTuple {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.internal
    }
}

impl WrappedTuple {
    pub fn new(
        internal: Tuple,
        slot_number: usize,
        pid: BTreePageID,
    ) -> WrappedTuple {
        WrappedTuple {
            internal,
            slot_number,
            pid,
        }
    }

    pub fn get_slot_number(&self) -> usize {
        self.slot_number
    }

    pub fn get_pid(&self) -> BTreePageID {
        self.pid
    }
}

impl Eq for WrappedTuple {}

impl fmt::Display for WrappedTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.internal)
    }
}

impl fmt::Debug for WrappedTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
