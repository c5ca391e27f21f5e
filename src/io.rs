use std::mem::size_of;

/// An append-only buffer used to serialize a page before it's written
/// to disk.
pub struct TinyWriter {
    buf: Vec<u8>,
}

impl TinyWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.to_bytes().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    /// Return the buffer content padded with zeros to the given size.
    ///
    /// Panic if the content is already larger than the given size,
    /// since that means the page layout calculation is wrong.
    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();

        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size,
            );
        }

        buf.resize(size, 0);
        buf
    }
}

/// A cursor over the raw bytes of a page read from disk.
pub struct TinyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TinyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read_exact(&mut self, bytes_count: usize) -> &'a [u8] {
        if self.pos + bytes_count > self.buf.len() {
            panic!(
                "read out of bound, pos: {}, len: {}, request: {}",
                self.pos,
                self.buf.len(),
                bytes_count,
            );
        }

        let slice = &self.buf[self.pos..self.pos + bytes_count];
        self.pos += bytes_count;
        slice
    }

    pub fn read<T: Decodeable>(&mut self) -> T {
        T::read_from(self)
    }
}

pub trait Encodeable {
    fn to_bytes(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn read_from(reader: &mut TinyReader) -> Self;
}

impl Encodeable for bool {
    fn to_bytes(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn read_from(reader: &mut TinyReader) -> Self {
        u8::read_from(reader) == 1
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn to_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn read_from(reader: &mut TinyReader) -> Self {
                    use std::convert::TryInto;
                    let bytes = reader.read_exact(size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);
