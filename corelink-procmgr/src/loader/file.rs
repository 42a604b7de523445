//! Executable image files

use std::fs::File;
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom};

use corelink_api::error::{self, Result};
use corelink_api::loader::types::SeekOrigin;
use corelink_api::{Error, LoaderFile, Size};

/// An executable image read through any seekable byte stream
#[derive(Debug)]
pub struct ImageFile<R> {
    name: String,
    reader: Option<R>,
}

impl ImageFile<File> {
    /// Opens the image at `path` on the host filesystem
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|err| Error::IoError(format!("{}: {}", path, err)))?;
        Ok(Self {
            name: path.to_string(),
            reader: Some(file),
        })
    }
}

impl ImageFile<Cursor<Vec<u8>>> {
    /// Wraps an image already held in memory
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            reader: Some(Cursor::new(bytes)),
        }
    }
}

impl<R> ImageFile<R> {
    /// Name the image was opened under
    pub fn name(&self) -> &str {
        &self.name
    }

    fn reader(&mut self) -> Result<&mut R> {
        let name = &self.name;
        self.reader
            .as_mut()
            .ok_or_else(|| Error::InvalidState(format!("{} is closed", name)))
    }

    fn io(&self, err: std::io::Error) -> Error {
        Error::IoError(format!("{}: {}", self.name, err))
    }
}

impl<R: Read + Seek + Send> LoaderFile for ImageFile<R> {
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let target = match origin {
            SeekOrigin::Start => {
                let offset = u64::try_from(offset)
                    .map_err(|_| error::invalid_argument("negative absolute seek"))?;
                SeekFrom::Start(offset)
            }
            SeekOrigin::Current => SeekFrom::Current(offset),
            SeekOrigin::End => SeekFrom::End(offset),
        };
        let result = self.reader()?.seek(target);
        result.map_err(|err| self.io(err))
    }

    fn tell(&mut self) -> Result<u64> {
        let result = self.reader()?.stream_position();
        result.map_err(|err| self.io(err))
    }

    fn read(&mut self, buf: &mut [u8], record_size: Size, count: usize) -> Result<usize> {
        if record_size == 0 {
            return Err(error::invalid_argument("zero record size"));
        }
        let wanted = record_size
            .checked_mul(count)
            .filter(|wanted| *wanted <= buf.len())
            .ok_or_else(|| error::invalid_argument("buffer smaller than requested records"))?;

        let mut filled = 0;
        while filled < wanted {
            let result = self.reader()?.read(&mut buf[filled..wanted]);
            match result {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.io(err)),
            }
        }
        Ok(filled / record_size)
    }

    fn close(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(_) => Ok(()),
            None => Err(Error::InvalidState(format!("{} already closed", self.name))),
        }
    }
}
