//! File naming and crash-safe writing for table and memo files.

use crate::parser::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Path the table is written to: `.dbf` is appended unless the name
/// already ends with it (any case).
pub fn table_path_for(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("dbf") => path.to_path_buf(),
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".dbf");
            PathBuf::from(name)
        }
    }
}

/// Companion memo file: the table's extension swapped for `.dbt`,
/// upper-case when the table's extension is upper-case.
pub fn memo_path_for(path: &Path) -> PathBuf {
    let upper = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| !e.is_empty() && e.chars().all(|c| !c.is_ascii_lowercase()))
        .unwrap_or(false);

    path.with_extension(if upper { "DBT" } else { "dbt" })
}

/// Writes to `<path>.tmp` and renames onto `path` on commit. Dropping an
/// uncommitted file removes the temporary.
pub struct AtomicFile {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    committed: bool,
}

impl AtomicFile {
    pub fn create(path: &Path) -> Result<Self> {
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
            committed: false,
        })
    }

    fn inner(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file already closed"))
    }

    /// Flush, fsync and move into place.
    pub fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&self.tmp_path, &self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            self.writer = None;
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_table_path() {
        assert_eq!(table_path_for(Path::new("a/roads.dbf")), PathBuf::from("a/roads.dbf"));
        assert_eq!(table_path_for(Path::new("ROADS.DBF")), PathBuf::from("ROADS.DBF"));
        assert_eq!(table_path_for(Path::new("roads")), PathBuf::from("roads.dbf"));
        assert_eq!(table_path_for(Path::new("roads.v2")), PathBuf::from("roads.v2.dbf"));
    }

    #[test]
    fn test_memo_path() {
        assert_eq!(memo_path_for(Path::new("roads.dbf")), PathBuf::from("roads.dbt"));
        assert_eq!(memo_path_for(Path::new("ROADS.DBF")), PathBuf::from("ROADS.DBT"));
        assert_eq!(memo_path_for(Path::new("roads")), PathBuf::from("roads.dbt"));
    }

    #[test]
    fn test_commit_replaces_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dbf");
        fs::write(&path, b"old").unwrap();

        let mut file = AtomicFile::create(&path).unwrap();
        file.write_all(b"new").unwrap();
        file.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join("out.dbf.tmp").exists());
    }

    #[test]
    fn test_drop_discards_temporary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dbf");

        {
            let mut file = AtomicFile::create(&path).unwrap();
            file.write_all(b"partial").unwrap();
        }

        assert!(!path.exists());
        assert!(!dir.path().join("out.dbf.tmp").exists());
    }
}
