//! The file node graphs are pasted from.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tempfile::NamedTempFile;

/// Well-known path that receives node-graph payloads.
///
/// Writes replace the whole file atomically: the payload is written to a
/// sibling temp file which is then renamed over the target. A
/// [`TransferHold`] keeps other writers out until it is dropped, so a
/// payload can be written and then consumed as one step.
#[derive(Debug)]
pub struct TransferFile {
    path: PathBuf,
    held: Mutex<bool>,
    released: Condvar,
}

/// Exclusive use of a [`TransferFile`]; released on drop.
#[derive(Debug)]
pub struct TransferHold {
    file: Arc<TransferFile>,
}

impl TransferFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file's contents with `text`.
    pub fn write(self: &Arc<Self>, text: &str) -> io::Result<()> {
        self.hold().write(text)
    }

    /// Blocks until no other hold is alive, then takes one.
    pub fn hold(self: &Arc<Self>) -> TransferHold {
        let mut held = self.lock();
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        TransferHold {
            file: Arc::clone(self),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransferHold {
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Replaces the file's contents with `text`.
    pub fn write(&self, text: &str) -> io::Result<()> {
        let path = &self.file.path;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;

        tracing::debug!(path = %path.display(), bytes = text.len(), "transfer file written");
        Ok(())
    }
}

impl Drop for TransferHold {
    fn drop(&mut self) {
        *self.file.lock() = false;
        self.file.released.notify_one();
    }
}

/// Default transfer location inside the system temp directory.
pub fn default_transfer_path() -> PathBuf {
    std::env::temp_dir().join("codesocket").join("transfer.nk")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(TransferFile::new(dir.path().join("transfer.nk")));

        file.write("first payload that is longer").unwrap();
        file.write("second").unwrap();

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "second");
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(TransferFile::new(dir.path().join("a").join("b").join("t.nk")));
        file.write("set cut_paste_input [stack 0]").unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(TransferFile::new(dir.path().join("t.nk")));
        file.write("x").unwrap();
        file.write("y").unwrap();

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn hold_keeps_contents_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(TransferFile::new(dir.path().join("t.nk")));

        let workers: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|text| {
                let file = Arc::clone(&file);
                std::thread::spawn(move || {
                    let hold = file.hold();
                    hold.write(text).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(30));
                    std::fs::read_to_string(hold.path()).unwrap()
                })
            })
            .collect();

        let mut seen: Vec<String> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        seen.sort();
        assert_eq!(seen, ["A", "B", "C"]);
    }

    #[test]
    fn dropped_hold_lets_next_writer_in() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(TransferFile::new(dir.path().join("t.nk")));

        drop(file.hold());
        file.write("after").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "after");
    }

    #[test]
    fn default_path_is_in_temp_dir() {
        assert!(default_transfer_path().starts_with(std::env::temp_dir()));
    }
}
