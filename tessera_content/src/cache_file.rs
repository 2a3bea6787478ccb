//! Both files of a cache start with a header that identifies them, followed by the content.
//!
//! | Field            | Type   | Size (bytes) | Description                          |
//! |------------------|--------|--------------|--------------------------------------|
//! | Magic            | u8[16] | 16           | 6c0e5f1a-93d2-4b7e-a4c1-2f8d0b9e7135 |
//! | Version          | u32    | 4            | [`CACHE_VERSION`]                    |
//! | File type length | u32    | 4            | Length of the file type string       |
//! | File type        | String | variable     | e.g. `toc/linux` or `dat/windows`    |
//!
//! The header has a variable length, so the content is addressed relative to its end.
//! [`CacheFileRead::content`] and [`CacheFileWrite::content`] provide [`Read`]/[`Write`]
//! implementations whose positions are relative to the start of the content.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tessera_shared::byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/* UUID string: 6c0e5f1a-93d2-4b7e-a4c1-2f8d0b9e7135 */
pub const MAGIC: [u8; 16] = [
    0x6c, 0x0e, 0x5f, 0x1a, 0x93, 0xd2, 0x4b, 0x7e, 0xa4, 0xc1, 0x2f, 0x8d, 0x0b, 0x9e, 0x71, 0x35,
];

pub const CACHE_VERSION: u32 = 1;

/// Upper bound for the file type string of a header.
pub const MAX_FILE_TYPE_LEN: u32 = 256;

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: [u8; 16],
    pub version: u32,
    pub file_type: String,
}

impl CacheHeader {
    pub fn new(file_type: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: CACHE_VERSION,
            file_type: file_type.into(),
        }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u8; 16];
        reader
            .read_exact(&mut magic)
            .map_err(|_| invalid_data("Failed to read magic number"))?;
        let version = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| invalid_data("Failed to read version number"))?;
        let file_type_len = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| invalid_data("Failed to read file type length"))?;
        if file_type_len > MAX_FILE_TYPE_LEN {
            return Err(invalid_data("File type is too long"));
        }
        let mut file_type = vec![0u8; file_type_len as usize];
        reader
            .read_exact(&mut file_type)
            .map_err(|_| invalid_data("Failed to read file type"))?;
        let file_type = String::from_utf8(file_type).map_err(|_| invalid_data("File type is not UTF-8"))?;
        Ok(Self { magic, version, file_type })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.file_type.len() as u32)?;
        writer.write_all(self.file_type.as_bytes())?;
        Ok(())
    }

    /// Checks magic number, version and that the file has the expected type.
    pub fn check(&self, expected_file_type: &str) -> io::Result<()> {
        if self.magic != MAGIC {
            return Err(invalid_data("Invalid magic number"));
        }
        if self.version != CACHE_VERSION {
            return Err(invalid_data("Unsupported cache version"));
        }
        if self.file_type != expected_file_type {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Expected file type '{expected_file_type}' but found '{}'", self.file_type),
            ));
        }
        Ok(())
    }
}

pub struct CacheFileWrite<W> {
    inner: W,
    content_start: u64,
}

impl<W: Write + Seek> CacheFileWrite<W> {
    /// Writes a fresh header. Everything written to the content afterwards follows it.
    ///
    /// # Example
    ///
    /// ```
    /// use std::io::{Cursor, Read, Write};
    /// use tessera_content::cache_file::{CacheFileRead, CacheFileWrite};
    ///
    /// let mut buf = Vec::new();
    /// let mut writer = CacheFileWrite::create(Cursor::new(&mut buf), "dat/linux").unwrap();
    /// writer.content().write_all(b"payload").unwrap();
    ///
    /// let mut reader = CacheFileRead::open(Cursor::new(&buf), "dat/linux").unwrap();
    /// let mut content = String::new();
    /// reader.content().read_to_string(&mut content).unwrap();
    /// assert_eq!(content, "payload");
    /// ```
    pub fn create(mut inner: W, file_type: &str) -> io::Result<Self> {
        CacheHeader::new(file_type).write(&mut inner)?;
        let content_start = inner.stream_position()?;
        Ok(Self { inner, content_start })
    }

    pub fn content(&mut self) -> CacheContent<'_, W> {
        CacheContent {
            inner: &mut self.inner,
            content_start: self.content_start,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<S: Write + Read + Seek> CacheFileWrite<S> {
    /// Opens a file with an existing header for modification.
    pub fn open(mut inner: S, file_type: &str) -> io::Result<Self> {
        CacheHeader::read(&mut inner)?.check(file_type)?;
        let content_start = inner.stream_position()?;
        Ok(Self { inner, content_start })
    }
}

pub struct CacheFileRead<R> {
    inner: R,
    content_start: u64,
}

impl<R: Read + Seek> CacheFileRead<R> {
    pub fn open(mut inner: R, file_type: &str) -> io::Result<Self> {
        CacheHeader::read(&mut inner)?.check(file_type)?;
        let content_start = inner.stream_position()?;
        Ok(Self { inner, content_start })
    }

    pub fn content(&mut self) -> CacheContent<'_, R> {
        CacheContent {
            inner: &mut self.inner,
            content_start: self.content_start,
        }
    }

    /// Reads `length` bytes starting at `offset` relative to the content. Ranges that don't
    /// lie within the content fail with [`io::ErrorKind::InvalidData`].
    pub fn read_range(&mut self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let mut content = self.content();
        let content_len = content.seek(SeekFrom::End(0))?;
        let in_bounds = offset.checked_add(length).is_some_and(|end| end <= content_len);
        if !in_bounds {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Range {offset}+{length} exceeds the content length {content_len}"),
            ));
        }
        let length = usize::try_from(length).map_err(|_| invalid_data("Range doesn't fit into memory"))?;
        content.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length];
        content.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// View on the content of a cache file. Positions are relative to the end of the header.
pub struct CacheContent<'a, S> {
    inner: &'a mut S,
    content_start: u64,
}

impl<S: Read> Read for CacheContent<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: Write> Write for CacheContent<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for CacheContent<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        seek(self.inner, pos, self.content_start)
    }
}

fn seek<S: Seek>(seekable: &mut S, pos: SeekFrom, content_start: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => return seekable.seek(SeekFrom::Start(content_start + offset)).map(|pos| pos - content_start),
        SeekFrom::End(offset) => seekable.seek(SeekFrom::End(0))? as i64 + offset,
        SeekFrom::Current(offset) => seekable.stream_position()? as i64 + offset,
    };
    if target < content_start as i64 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Seeking before the start of the content"));
    }
    seekable.seek(SeekFrom::Start(target as u64)).map(|pos| pos - content_start)
}
