//! Access to the pristine image and the working copy being patched.
//!
//! The pristine image is read fully into memory and never written. The working
//! copy is either a literal copy of it or, in place mode, the same file. Both
//! handles are released when the accessor is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::Instruction;
use crate::corpus::Corpus;
use crate::error::{CfpError, CfpResult};
use crate::model::BYTES_PER_INSN;

/// Read-only in-memory view of an image file.
#[derive(Debug, Clone)]
pub struct ImageSnapshot {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl ImageSnapshot {
    pub fn open(path: impl AsRef<Path>) -> CfpResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| CfpError::io(path, e))?;
        Ok(Self { path: path.to_path_buf(), bytes })
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self { path: path.into(), bytes }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Little-endian word at `offset`, in native order.
    pub fn word_at(&self, offset: u64) -> Option<u32> {
        let start = usize::try_from(offset).ok()?;
        let raw = self.bytes.get(start..start + BYTES_PER_INSN as usize)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Word of instruction line `line`.
    pub fn read_line(&self, corpus: &Corpus, line: usize) -> CfpResult<u32> {
        let offset = corpus.file_offset(line)?;
        self.word_at(offset).ok_or_else(|| {
            CfpError::malformed(line + 1, format!("offset {offset:#x} is past the end of the image"))
        })
    }

    /// Decode instruction line `line`.
    pub fn decode_line(&self, corpus: &Corpus, line: usize) -> CfpResult<Instruction> {
        Ok(corpus.decode_line(line, self.read_line(corpus, line)?))
    }
}

/// Where patched words are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTarget {
    /// Copy the pristine image to this path and patch the copy.
    Copy(PathBuf),
    /// Patch the source file itself.
    InPlace,
}

/// Writable handle on the working copy.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
    file: File,
}

impl WorkingCopy {
    fn open(path: &Path) -> CfpResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| CfpError::io(path, e))?;
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_word_at(&mut self, offset: u64, word: u32) -> CfpResult<()> {
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| CfpError::io(&self.path, e))?;
        self.file.write_all(&word.to_le_bytes()).map_err(|e| CfpError::io(&self.path, e))
    }

    fn flush(&mut self) -> CfpResult<()> {
        self.file.flush().map_err(|e| CfpError::io(&self.path, e))?;
        self.file.sync_all().map_err(|e| CfpError::io(&self.path, e))
    }
}

/// Translates corpus lines to file offsets and reads/writes instruction words.
#[derive(Debug)]
pub struct ImageAccessor<'c> {
    corpus: &'c Corpus,
    pristine: ImageSnapshot,
    working: WorkingCopy,
}

impl<'c> ImageAccessor<'c> {
    /// Acquire the working copy for an already loaded pristine image.
    pub fn open(corpus: &'c Corpus, pristine: ImageSnapshot, target: &ImageTarget) -> CfpResult<Self> {
        let source = pristine.path().to_path_buf();
        let working_path = match target {
            ImageTarget::Copy(path) => {
                if same_file(&source, path) {
                    return Err(CfpError::io(
                        path,
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "output is the input image; use in-place mode to patch it",
                        ),
                    ));
                }
                fs::copy(&source, path).map_err(|e| CfpError::io(path, e))?;
                path.clone()
            }
            ImageTarget::InPlace => source.clone(),
        };
        debug!(source = %source.display(), target = %working_path.display(), "image opened");
        let working = WorkingCopy::open(&working_path)?;
        Ok(Self { corpus, pristine, working })
    }

    pub fn corpus(&self) -> &'c Corpus {
        self.corpus
    }

    pub fn pristine(&self) -> &ImageSnapshot {
        &self.pristine
    }

    /// Release the working copy, keeping the pristine snapshot.
    pub fn into_pristine(self) -> ImageSnapshot {
        self.pristine
    }

    pub fn target_path(&self) -> &Path {
        self.working.path()
    }

    pub fn offset_of(&self, line: usize) -> CfpResult<u64> {
        self.corpus.file_offset(line)
    }

    /// Word of instruction line `line` in the pristine image.
    pub fn read_word(&self, line: usize) -> CfpResult<u32> {
        self.pristine.read_line(self.corpus, line)
    }

    /// Decode instruction line `line` from the pristine image.
    pub fn decode(&self, line: usize) -> CfpResult<Instruction> {
        self.pristine.decode_line(self.corpus, line)
    }

    pub fn write_word(&mut self, line: usize, word: u32) -> CfpResult<()> {
        let offset = self.offset_of(line)?;
        if offset + BYTES_PER_INSN > self.pristine.bytes.len() as u64 {
            return Err(CfpError::malformed(
                line + 1,
                format!("offset {offset:#x} is past the end of the image"),
            ));
        }
        self.working.write_word_at(offset, word)
    }

    /// Force pending writes to stable storage.
    pub fn flush(&mut self) -> CfpResult<()> {
        self.working.flush()
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
