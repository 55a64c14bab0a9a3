//! The intermediate dump artifact.
//!
//! A dump file is either a caller-supplied path that outlives the run, or an
//! ephemeral temp file removed when the [`DumpFile`] is dropped. A `.gz`,
//! `.bz2`, `.xz` or `.zst` extension makes the dump stage compress what it
//! writes and the restore stage decompress what it reads.

use crate::copier::{SizedReader, TransferSink, TransferSource};
use crate::error::{CloneError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const WRITER_BUFFER_SIZE: usize = 256 * 1024;

/// Compression format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Detect compression format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    fn wrap_writer(&self, file: File) -> io::Result<DumpWriter> {
        let buffered = BufWriter::with_capacity(WRITER_BUFFER_SIZE, file);
        let encoder = match self {
            Compression::None => Encoder::Plain(buffered),
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                buffered,
                flate2::Compression::default(),
            )),
            Compression::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                buffered,
                bzip2::Compression::default(),
            )),
            Compression::Xz => Encoder::Xz(xz2::write::XzEncoder::new(buffered, 6)),
            Compression::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(buffered, 0)?),
        };
        Ok(DumpWriter {
            encoder,
            failed: false,
        })
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

enum Location {
    Persistent(PathBuf),
    Ephemeral(TempPath),
}

/// Where the dump lives between the dump and restore stages.
pub struct DumpFile {
    location: Location,
    compression: Compression,
}

impl DumpFile {
    /// A caller-supplied path; never deleted by us.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compression = Compression::from_path(&path);
        Self {
            location: Location::Persistent(path),
            compression,
        }
    }

    /// A fresh temp file, deleted when this value is dropped.
    pub fn ephemeral() -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("mysql-clone-")
            .suffix(".sql")
            .tempfile()
            .map_err(|e| CloneError::io("creating temporary dump file", e))?;
        Ok(Self {
            location: Location::Ephemeral(temp.into_temp_path()),
            compression: Compression::None,
        })
    }

    /// Use the configured path, or fall back to a temp file for this run.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::persistent(path)),
            None => Self::ephemeral(),
        }
    }

    pub fn path(&self) -> &Path {
        match &self.location {
            Location::Persistent(path) => path.as_path(),
            Location::Ephemeral(temp) => &**temp,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self.location, Location::Ephemeral(_))
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Truncate the file and return a writer for the dump stage.
    pub fn create_writer(&self) -> Result<DumpWriter> {
        let path = self.path();
        let file = File::create(path)
            .map_err(|e| CloneError::io(format!("creating {}", path.display()), e))?;
        self.compression
            .wrap_writer(file)
            .map_err(|e| CloneError::io(format!("starting {} encoder", self.compression), e))
    }

    /// Open the dump for the restore stage.
    pub fn open_reader(&self) -> Result<DumpReader> {
        DumpReader::open(self.path())
    }
}

enum Encoder {
    Plain(BufWriter<File>),
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    Bzip2(bzip2::write::BzEncoder<BufWriter<File>>),
    Xz(xz2::write::XzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

/// Writes the dump, compressing it when the extension asks for it.
pub struct DumpWriter {
    encoder: Encoder,
    failed: bool,
}

impl DumpWriter {
    /// Write any compression trailer and flush everything to disk.
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self.encoder {
            Encoder::Plain(w) => w,
            Encoder::Gzip(w) => w.finish()?,
            Encoder::Bzip2(w) => w.finish()?,
            Encoder::Xz(w) => w.finish()?,
            Encoder::Zstd(w) => w.finish()?,
        };
        inner.flush()
    }

    /// Whether a write to the dump file has failed.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    fn inner(&mut self) -> &mut dyn Write {
        match &mut self.encoder {
            Encoder::Plain(w) => w as &mut dyn Write,
            Encoder::Gzip(w) => w,
            Encoder::Bzip2(w) => w,
            Encoder::Xz(w) => w,
            Encoder::Zstd(w) => w,
        }
    }
}

impl Write for DumpWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner().flush()
    }
}

impl TransferSink for DumpWriter {
    fn write_failed(&mut self, err: io::Error) -> CloneError {
        self.failed = true;
        CloneError::io("writing dump file", err)
    }
}

/// Reads the dump back, reporting progress against the on-disk size.
///
/// Every variant decodes from the same counting reader over the raw file, so
/// `position` moves with compressed bytes even when a decoder sits on top.
pub enum DumpReader {
    Plain(SizedReader<File>),
    Gzip(flate2::read::MultiGzDecoder<SizedReader<File>>),
    Bzip2(bzip2::read::MultiBzDecoder<SizedReader<File>>),
    Xz(xz2::read::XzDecoder<SizedReader<File>>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<SizedReader<File>>>),
}

impl DumpReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).map_err(|e| CloneError::io(format!("opening {}", path.display()), e))?;
        let total = file
            .metadata()
            .map_err(|e| CloneError::io(format!("reading metadata of {}", path.display()), e))?
            .len();
        let counted = SizedReader::new(file, Some(total));

        let compression = Compression::from_path(path);
        Ok(match compression {
            Compression::None => DumpReader::Plain(counted),
            Compression::Gzip => DumpReader::Gzip(flate2::read::MultiGzDecoder::new(counted)),
            Compression::Bzip2 => DumpReader::Bzip2(bzip2::read::MultiBzDecoder::new(counted)),
            Compression::Xz => DumpReader::Xz(xz2::read::XzDecoder::new_multi_decoder(counted)),
            Compression::Zstd => DumpReader::Zstd(
                zstd::stream::read::Decoder::new(counted)
                    .map_err(|e| CloneError::io(format!("starting {} decoder", compression), e))?,
            ),
        })
    }

    fn raw(&self) -> &SizedReader<File> {
        match self {
            DumpReader::Plain(r) => r,
            DumpReader::Gzip(r) => r.get_ref(),
            DumpReader::Bzip2(r) => r.get_ref(),
            DumpReader::Xz(r) => r.get_ref(),
            DumpReader::Zstd(r) => r.get_ref().get_ref(),
        }
    }
}

impl Read for DumpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DumpReader::Plain(r) => r.read(buf),
            DumpReader::Gzip(r) => r.read(buf),
            DumpReader::Bzip2(r) => r.read(buf),
            DumpReader::Xz(r) => r.read(buf),
            DumpReader::Zstd(r) => r.read(buf),
        }
    }
}

impl TransferSource for DumpReader {
    fn position(&self) -> u64 {
        self.raw().position()
    }

    fn total_len(&self) -> Option<u64> {
        self.raw().total_len()
    }
}
