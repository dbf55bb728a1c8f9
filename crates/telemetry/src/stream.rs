//! A single mutex-guarded JSONL output stream.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Buffered, append-mode line writer shared between threads.
pub struct LogStream {
    writer: Mutex<BufWriter<File>>,
}

impl LogStream {
    /// Open (or create) the file at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> io::Result<LogStream> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogStream {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one line. Write errors are reported to the caller; the stream
    /// stays usable.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().unwrap().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_path(tag: &str) -> std::path::PathBuf {
        let n = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "chainmesh-stream-{}-{}-{}.jsonl",
            tag,
            std::process::id(),
            n
        ))
    }

    #[test]
    fn test_lines_are_appended() {
        let path = temp_path("append");
        let stream = LogStream::open(&path).unwrap();
        stream.write_line("{\"a\":1}").unwrap();
        stream.write_line("{\"b\":2}").unwrap();
        stream.flush().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}\n{\"b\":2}\n");
        std::fs::remove_file(&path).ok();
    }
}
