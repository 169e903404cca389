use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

/// Strips ANSI escape sequences so the log file stays plain text.
pub fn strip_ansi_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' {
            in_escape = true;
        } else if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Appends to a file and trims it back to `max_lines` once enough new lines
/// have accumulated.
#[derive(Clone)]
pub(crate) struct CappedFileWriter {
    path: PathBuf,
    max_lines: u32,
    pending_lines: Arc<Mutex<u32>>,
}

impl CappedFileWriter {
    pub fn new(path: impl Into<PathBuf>, max_lines: u32) -> Self {
        Self {
            path: path.into(),
            max_lines: max_lines.max(1),
            pending_lines: Arc::new(Mutex::new(0)),
        }
    }

    fn prune_threshold(&self) -> u32 {
        (self.max_lines / 10).max(50)
    }

    fn prune(&self) -> io::Result<()> {
        if !Path::new(&self.path).exists() {
            return Ok(());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
        let max = self.max_lines as usize;
        if lines.len() <= max {
            return Ok(());
        }

        let mut file = File::create(&self.path)?;
        for line in &lines[lines.len() - max..] {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}

impl io::Write for CappedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pending = self.pending_lines.lock();

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(buf)?;

        *pending += buf.iter().filter(|&&b| b == b'\n').count() as u32;
        if *pending >= self.prune_threshold() {
            if let Err(e) = self.prune() {
                eprintln!("Failed to prune log file: {}", e);
            }
            *pending = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CappedFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi_escapes("\x1b[31mERROR\x1b[0m done"), "ERROR done");
    }

    #[test]
    fn test_file_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        let mut writer = CappedFileWriter::new(&path, 10);

        for i in 0..120 {
            writeln!(writer, "line {}", i).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines.len() <= 60, "expected pruning, got {} lines", lines.len());
        assert_eq!(lines.last().copied(), Some("line 119"));
    }
}
