//! Archive entry abstraction
//!
//! Loaders only ever see entries through [`ArchiveEntry`]: open a stream,
//! extract to a temporary file, read identity fields for the cache key, and
//! list children when the entry is itself a book. [`FileEntry`] implements it
//! over the file system, treating directories as nested books.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::{TempDir, TempPath};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff", "ico", "tga"];
const ANIMATED_EXTENSIONS: &[&str] = &["gif"];
const MEDIA_EXTENSIONS: &[&str] = &["mp4", "m4v", "mkv", "webm", "avi", "mov", "wmv", "mp3", "flac", "wav"];
const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// One entry of a book
pub trait ArchiveEntry: Send + Sync + fmt::Debug {
    /// Name within the containing archive
    fn entry_name(&self) -> &str;

    /// Name that identifies the entry across archives, used for cache keys
    fn full_name(&self) -> &str;

    fn length(&self) -> u64;

    fn last_write_time(&self) -> Option<SystemTime>;

    /// True when the entry is itself a book (folder or nested archive)
    fn is_directory(&self) -> bool;

    fn open_entry(&self) -> io::Result<Box<dyn Read + Send>>;

    fn extract_to_temp(&self, keep_name: bool) -> io::Result<TempFile>;

    /// Children of a nested book, sorted by name
    fn entries(&self) -> io::Result<Vec<Arc<dyn ArchiveEntry>>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not an archive", self.entry_name()),
        ))
    }

    fn kind(&self) -> EntryKind {
        if self.is_directory() {
            EntryKind::Archive
        } else {
            EntryKind::from_name(self.entry_name())
        }
    }

    /// Read the whole entry into memory
    fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.open_entry()?;
        let mut data = Vec::with_capacity(self.length() as usize);
        reader.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// What a page built from an entry will be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Image,
    AnimatedImage,
    Media,
    Pdf,
    Archive,
    Unknown,
}

impl EntryKind {
    pub fn from_name(name: &str) -> Self {
        let Some(extension) = Path::new(name).extension().and_then(|e| e.to_str()) else {
            return EntryKind::Unknown;
        };
        let extension = extension.to_lowercase();
        let extension = extension.as_str();
        if IMAGE_EXTENSIONS.contains(&extension) {
            EntryKind::Image
        } else if ANIMATED_EXTENSIONS.contains(&extension) {
            EntryKind::AnimatedImage
        } else if MEDIA_EXTENSIONS.contains(&extension) {
            EntryKind::Media
        } else if PDF_EXTENSIONS.contains(&extension) {
            EntryKind::Pdf
        } else {
            EntryKind::Unknown
        }
    }

    /// Entries whose pixels can be used for a thumbnail
    pub fn is_image(&self) -> bool {
        matches!(self, EntryKind::Image | EntryKind::AnimatedImage)
    }
}

/// A file extracted for external use; deleted when dropped
pub struct TempFile {
    path: PathBuf,
    _guard: TempGuard,
}

enum TempGuard {
    File(TempPath),
    Dir(TempDir),
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `reader` into a fresh temp file.
    ///
    /// With `keep_name` the file keeps `name` inside its own temp directory,
    /// otherwise it gets a random name with the same extension.
    pub fn create_from(reader: &mut dyn Read, name: &str, keep_name: bool) -> io::Result<Self> {
        if keep_name {
            let dir = tempfile::Builder::new().prefix("leafview-").tempdir()?;
            let file_name = Path::new(name)
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "entry".into());
            let path = dir.path().join(file_name);
            let mut file = fs::File::create(&path)?;
            io::copy(reader, &mut file)?;
            Ok(Self {
                path,
                _guard: TempGuard::Dir(dir),
            })
        } else {
            let suffix = Path::new(name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let mut file = tempfile::Builder::new()
                .prefix("leafview-")
                .suffix(&suffix)
                .tempfile()?;
            io::copy(reader, file.as_file_mut())?;
            let temp_path = file.into_temp_path();
            Ok(Self {
                path: temp_path.to_path_buf(),
                _guard: TempGuard::File(temp_path),
            })
        }
    }
}

impl fmt::Debug for TempFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self._guard {
            TempGuard::File(_) => "file",
            TempGuard::Dir(_) => "dir",
        };
        f.debug_struct("TempFile")
            .field("path", &self.path)
            .field("guard", &kind)
            .finish()
    }
}

/// File-system entry; directories are nested books
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: PathBuf,
    entry_name: String,
    full_name: String,
    length: u64,
    last_write_time: Option<SystemTime>,
    is_directory: bool,
}

impl FileEntry {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let metadata = fs::metadata(&path)?;
        let entry_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let full_name = path
            .canonicalize()
            .unwrap_or_else(|_| path.clone())
            .to_string_lossy()
            .into_owned();

        Ok(Arc::new(Self {
            entry_name,
            full_name,
            length: if metadata.is_dir() { 0 } else { metadata.len() },
            last_write_time: metadata.modified().ok(),
            is_directory: metadata.is_dir(),
            path,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveEntry for FileEntry {
    fn entry_name(&self) -> &str {
        &self.entry_name
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn last_write_time(&self) -> Option<SystemTime> {
        self.last_write_time
    }

    fn is_directory(&self) -> bool {
        self.is_directory
    }

    fn open_entry(&self) -> io::Result<Box<dyn Read + Send>> {
        if self.is_directory {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", self.path.display()),
            ));
        }
        Ok(Box::new(fs::File::open(&self.path)?))
    }

    fn extract_to_temp(&self, keep_name: bool) -> io::Result<TempFile> {
        let mut reader = self.open_entry()?;
        TempFile::create_from(&mut reader, &self.entry_name, keep_name)
    }

    fn entries(&self) -> io::Result<Vec<Arc<dyn ArchiveEntry>>> {
        if !self.is_directory {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not an archive", self.path.display()),
            ));
        }
        let mut paths = fs::read_dir(&self.path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        paths.sort();

        paths
            .into_iter()
            .map(|path| FileEntry::new(path).map(|e| e as Arc<dyn ArchiveEntry>))
            .collect()
    }
}
