//! Filesystem helpers shared by the wikiflat crates, built on `cap-std` and
//! `camino`.
//!
//! Everything that marks progress on disk (batch files, state records, output
//! tables) goes through [`StagedFile`], so a reader never observes a partially
//! written file under its final name.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io::{self, Write};
use std::path::Component;

use tempfile::NamedTempFile;

/// Open a UTF-8 file path for reading using ambient authority.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Create `path` and every missing ancestor.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    if path.as_str().is_empty() || path == Utf8Path::new("/") {
        return Ok(());
    }
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => ensure_dir(parent),
        None => Ok(()),
    }
}

/// Report whether `path` exists and is a regular file.
///
/// A missing parent directory counts as "not a file" rather than an error.
pub fn is_file(path: &Utf8Path) -> io::Result<bool> {
    match metadata(path) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Report whether `path` exists and is a directory.
pub fn is_dir(path: &Utf8Path) -> io::Result<bool> {
    match fs_utf8::Dir::open_ambient_dir(path, ambient_authority()) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotADirectory => Ok(false),
        Err(err) => Err(err),
    }
}

/// Size in bytes of the regular file at `path`.
pub fn file_size(path: &Utf8Path) -> io::Result<u64> {
    metadata(path).map(|meta| meta.len())
}

fn metadata(path: &Utf8Path) -> io::Result<fs_utf8::Metadata> {
    let parent = parent_or_current(path);
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} should include a file name")))?;
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.metadata(name)
}

/// List the regular files directly inside `dir` whose names end with
/// `suffix`, sorted by name. A missing directory yields an empty list.
pub fn list_files(dir: &Utf8Path, suffix: &str) -> io::Result<Vec<Utf8PathBuf>> {
    let handle = match fs_utf8::Dir::open_ambient_dir(dir, ambient_authority()) {
        Ok(handle) => handle,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut names = Vec::new();
    for item in handle.entries()? {
        let entry = item?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name()?;
        if name.ends_with(suffix) && !name.starts_with(STAGING_PREFIX) {
            names.push(name);
        }
    }
    names.sort_unstable();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Remove a file if it exists.
pub fn remove_file_if_exists(path: &Utf8Path) -> io::Result<()> {
    let parent = parent_or_current(path);
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    let dir = match fs_utf8::Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    match dir.remove_file(name) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

const STAGING_PREFIX: &str = ".staged-";

/// A file written under a temporary name next to its target and moved into
/// place by [`StagedFile::commit`].
///
/// Dropping a `StagedFile` without committing removes the temporary file, so
/// an interrupted writer leaves nothing behind under the target name.
///
/// # Examples
/// ```
/// use std::io::Write;
/// use camino::Utf8PathBuf;
/// use wikiflat_fs::StagedFile;
///
/// # fn main() -> std::io::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let target = Utf8PathBuf::from_path_buf(dir.path().join("out/state.jsonl"))
///     .map_err(|_| std::io::Error::other("non-UTF-8 temp dir"))?;
/// let mut staged = StagedFile::create(&target)?;
/// staged.write_all(b"{\"step\":0}\n")?;
/// assert!(!target.exists());
/// staged.commit()?;
/// assert!(target.exists());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StagedFile {
    target: Utf8PathBuf,
    temp: NamedTempFile,
}

impl StagedFile {
    /// Stage a new file destined for `target`, creating parent directories.
    pub fn create(target: &Utf8Path) -> io::Result<Self> {
        ensure_parent_dir(target)?;
        let parent = parent_or_current(target);
        let temp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".partial")
            .tempfile_in(parent.as_std_path())?;
        Ok(Self {
            target: target.to_path_buf(),
            temp,
        })
    }

    /// Final location the staged bytes will be moved to.
    #[must_use]
    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Flush and atomically move the staged file over its target.
    pub fn commit(mut self) -> io::Result<()> {
        self.temp.flush()?;
        self.temp.as_file().sync_all()?;
        self.temp
            .persist(self.target.as_std_path())
            .map(|_| ())
            .map_err(|err| err.error)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Write `contents` to `target` through a [`StagedFile`].
pub fn write_atomically(target: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let mut staged = StagedFile::create(target)?;
    staged.write_all(contents)?;
    staged.commit()
}

fn parent_or_current(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

/// Split an absolute or relative path into an ambient base directory and a
/// relative suffix that cap-std can resolve beneath it.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let (base, relative) = match std_path.components().next() {
        // Windows drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_path.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from path"))?
                .to_path_buf();
            (base, relative)
        }
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), std_path.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let relative =
        Utf8PathBuf::from_path_buf(relative).map_err(|_| io::Error::other("non-UTF-8 path"))?;
    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn scratch() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        (dir, root)
    }

    #[rstest]
    fn staged_file_is_invisible_until_committed(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("nested/batch-0-of-1.parquet");
        let mut staged = StagedFile::create(&target).expect("stage");
        staged.write_all(b"payload").expect("write");

        assert!(!is_file(&target).expect("inspect"));
        assert!(
            list_files(target.parent().expect("parent"), ".partial")
                .expect("list")
                .is_empty(),
            "staging files are hidden from listings"
        );

        staged.commit().expect("commit");
        assert!(is_file(&target).expect("inspect"));
        assert_eq!(file_size(&target).expect("size"), 7);
    }

    #[rstest]
    fn dropped_staged_file_leaves_no_target(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("abandoned.parquet");
        {
            let mut staged = StagedFile::create(&target).expect("stage");
            staged.write_all(b"half").expect("write");
        }
        assert!(!is_file(&target).expect("inspect"));
    }

    #[rstest]
    fn list_files_filters_and_sorts(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        for name in ["b.jsonl", "a.jsonl", "c.txt"] {
            write_atomically(&root.join(name), b"{}").expect("write");
        }
        ensure_dir(&root.join("d.jsonl")).expect("directory named like a record");

        let listed = list_files(&root, ".jsonl").expect("list");
        assert_eq!(listed, vec![root.join("a.jsonl"), root.join("b.jsonl")]);
    }

    #[rstest]
    fn missing_directory_lists_nothing(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        assert!(list_files(&root.join("absent"), ".parquet").expect("list").is_empty());
        assert!(!is_dir(&root.join("absent")).expect("inspect"));
        assert!(is_dir(&root).expect("inspect"));
    }

    #[rstest]
    fn remove_file_if_exists_is_idempotent(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("gone.txt");
        write_atomically(&target, b"x").expect("write");
        remove_file_if_exists(&target).expect("remove");
        remove_file_if_exists(&target).expect("remove twice");
        assert!(!is_file(&target).expect("inspect"));
    }
}
