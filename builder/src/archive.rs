//! Tar stream helpers for build contexts.
//!
//! Copies directory trees into an active tar stream under a rewritten path
//! prefix, keeping file bytes, modes and symlink targets as they are on disk.

use std::fs::{self, File, Metadata};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use layerpack_core::error::{LayerError, Result};
use tar::{EntryType, Header, HeaderMode};
use walkdir::WalkDir;

/// Append an in-memory file to the stream.
pub fn append_file_bytes<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    builder
        .append_data(&mut header, name, data)
        .map_err(|e| LayerError::Stream(format!("Failed to write {}: {}", name, e)))
}

/// Append an empty directory entry to the stream.
pub fn append_empty_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    mode: u32,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    builder
        .append_data(&mut header, name, std::io::empty())
        .map_err(|e| LayerError::Stream(format!("Failed to write directory {}: {}", name, e)))
}

/// Recursively copy `root` into the stream, renaming it to `prefix`.
///
/// `root` itself becomes the `prefix` entry; everything below it keeps its
/// path relative to `root`. When `root` is a symlink its target is copied.
/// Symlinks below the root are stored as links, never followed.
/// Entries are emitted in file-name order so the same tree always yields the
/// same archive bytes.
///
/// Returns the number of entries written.
pub fn append_dir_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    prefix: &Path,
) -> Result<usize> {
    let mut count = 0;

    let walker = WalkDir::new(root)
        .follow_root_links(true)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            LayerError::filesystem(path, e)
        })?;

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| LayerError::filesystem(path, e))?;
        let name = if relative.as_os_str().is_empty() {
            prefix.to_path_buf()
        } else {
            prefix.join(relative)
        };

        // A symlinked root is walked through, so it is stored as its target
        let metadata = if entry.depth() == 0 {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
        .map_err(|e| LayerError::filesystem(path, e))?;
        append_entry(builder, path, &name, &metadata)?;
        count += 1;
    }

    Ok(count)
}

/// Write one filesystem entry with a header derived from its metadata.
fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    name: &Path,
    metadata: &Metadata,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| LayerError::filesystem(path, e))?;
        header.set_size(0);
        builder
            .append_link(&mut header, name, &target)
            .map_err(|e| stream_error(name, e))
    } else if file_type.is_dir() {
        header.set_size(0);
        builder
            .append_data(&mut header, name, std::io::empty())
            .map_err(|e| stream_error(name, e))
    } else if file_type.is_file() {
        let file = File::open(path).map_err(|e| LayerError::filesystem(path, e))?;
        let reader = TrackedReader {
            inner: file.take(metadata.len()),
            path: path.to_path_buf(),
            failed: None,
        };
        append_file(builder, &mut header, name, reader)
    } else {
        Err(LayerError::filesystem(
            path,
            "unsupported file type (only regular files, directories and symlinks are copied)",
        ))
    }
}

/// Stream a regular file, telling read failures apart from write failures.
fn append_file<W: Write, R: Read>(
    builder: &mut tar::Builder<W>,
    header: &mut Header,
    name: &Path,
    mut reader: TrackedReader<R>,
) -> Result<()> {
    match builder.append_data(header, name, &mut reader) {
        Ok(()) => Ok(()),
        Err(e) => match reader.failed.take() {
            Some(read_err) => Err(LayerError::filesystem(reader.path, read_err)),
            None => Err(stream_error(name, e)),
        },
    }
}

/// Reader that remembers whether the source, rather than the sink, failed.
struct TrackedReader<R> {
    inner: R,
    path: PathBuf,
    failed: Option<String>,
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = Some(e.to_string());
                Err(e)
            }
        }
    }
}

fn stream_error(name: &Path, err: std::io::Error) -> LayerError {
    LayerError::Stream(format!("Failed to write {}: {}", name.display(), err))
}
