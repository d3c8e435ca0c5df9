use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// An append-only log file rotated once it reaches `rotate_length` bytes.
///
/// Rotated files are named after the log file with a numeric suffix, `.1`
/// being the most recent. At most `max_rotated_files` of them are kept.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: fs_err::File,
    size: u64,
    rotate_length: u64,
    max_rotated_files: usize,
}

impl LogFile {
    /// Opens or creates the log file, creating its directory when needed.
    /// A `rotate_length` of 0 never rotates.
    pub fn open(
        path: impl Into<PathBuf>,
        rotate_length: u64,
        max_rotated_files: usize,
    ) -> io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs_err::create_dir_all(dir)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            size,
            rotate_length,
            max_rotated_files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn rotated_path(&self, n: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Suffixes of the rotated files found next to the log file, ascending.
    fn rotated_suffixes(&self) -> io::Result<Vec<usize>> {
        let (dir, name) = match (self.path.parent(), self.path.file_name()) {
            (Some(dir), Some(name)) => (dir, name.to_string_lossy()),
            _ => return Ok(vec![]),
        };
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        let prefix = format!("{name}.");

        let mut suffixes = vec![];
        for entry in fs_err::read_dir(dir)? {
            let entry = entry?;
            let n = entry
                .file_name()
                .to_str()
                .and_then(|f| f.strip_prefix(prefix.as_str()))
                .and_then(|n| n.parse::<usize>().ok().filter(|v| v.to_string() == n));
            if let Some(n) = n.filter(|n| *n > 0) {
                suffixes.push(n);
            }
        }
        suffixes.sort_unstable();
        Ok(suffixes)
    }

    /// Existing rotated files, most recent first.
    pub fn rotated_files(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .rotated_suffixes()?
            .into_iter()
            .map(|n| self.rotated_path(n))
            .collect())
    }

    fn should_rotate(&self) -> bool {
        self.rotate_length > 0 && self.size >= self.rotate_length
    }

    pub fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        for n in self.rotated_suffixes()?.into_iter().rev() {
            let from = self.rotated_path(n);
            if n >= self.max_rotated_files {
                fs_err::remove_file(from)?;
            } else {
                fs_err::rename(from, self.rotated_path(n + 1))?;
            }
        }

        if self.max_rotated_files > 0 {
            fs_err::rename(&self.path, self.rotated_path(1))?;
        } else {
            fs_err::remove_file(&self.path)?;
        }

        self.file = open_append(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<fs_err::File> {
    fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rotate() {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");

        let mut log = LogFile::open(&path, 0, 10).unwrap();
        log.write_all(b"first\n").unwrap();
        drop(log);

        let mut log = LogFile::open(&path, 0, 10).unwrap();
        assert_eq!(6, log.size());
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        assert_eq!("first\nsecond\n", fs_err::read_to_string(&path).unwrap());
        assert!(log.rotated_files().unwrap().is_empty());
    }

    #[test]
    fn rotate_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        let mut log = LogFile::open(&path, 10, 10).unwrap();
        for line in ["aaaaaaaaaa", "bbbbbbbbbb", "cc"] {
            log.write_all(line.as_bytes()).unwrap();
        }
        log.flush().unwrap();

        assert_eq!("cc", fs_err::read_to_string(&path).unwrap());
        assert_eq!(
            vec![log.rotated_path(1), log.rotated_path(2)],
            log.rotated_files().unwrap()
        );
        assert_eq!(
            "bbbbbbbbbb",
            fs_err::read_to_string(log.rotated_path(1)).unwrap()
        );
        assert_eq!(
            "aaaaaaaaaa",
            fs_err::read_to_string(log.rotated_path(2)).unwrap()
        );
    }

    #[test]
    fn keep_max_rotated_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        let mut log = LogFile::open(&path, 1, 3).unwrap();
        for i in 0..10 {
            log.write_all(i.to_string().as_bytes()).unwrap();
        }
        log.flush().unwrap();

        assert_eq!("9", fs_err::read_to_string(&path).unwrap());
        assert_eq!(3, log.rotated_files().unwrap().len());
        assert_eq!("8", fs_err::read_to_string(log.rotated_path(1)).unwrap());
        assert_eq!("6", fs_err::read_to_string(log.rotated_path(3)).unwrap());
        assert!(!log.rotated_path(4).exists());
    }

    #[test]
    fn no_rotated_files_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        let mut log = LogFile::open(&path, 2, 0).unwrap();
        log.write_all(b"ab").unwrap();
        log.write_all(b"cd").unwrap();
        log.flush().unwrap();

        assert_eq!("cd", fs_err::read_to_string(&path).unwrap());
        assert!(log.rotated_files().unwrap().is_empty());
    }

    #[test]
    fn rotate_past_missing_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs_err::write(dir.path().join("app.log.2"), "two").unwrap();
        fs_err::write(dir.path().join("app.log.3"), "three").unwrap();
        fs_err::write(dir.path().join("app.log.old"), "other").unwrap();

        let mut log = LogFile::open(&path, 1, 3).unwrap();
        assert_eq!(
            vec![log.rotated_path(2), log.rotated_path(3)],
            log.rotated_files().unwrap()
        );

        log.write_all(b"a").unwrap();
        log.write_all(b"b").unwrap();
        log.flush().unwrap();

        // .3 was shifted out of the kept range, .2 became .3
        assert_eq!(
            vec![log.rotated_path(1), log.rotated_path(3)],
            log.rotated_files().unwrap()
        );
        assert_eq!("a", fs_err::read_to_string(log.rotated_path(1)).unwrap());
        assert_eq!("two", fs_err::read_to_string(log.rotated_path(3)).unwrap());
        assert!(dir.path().join("app.log.old").exists());
    }
}
