use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Tees every formatted line to stdout and to the run log that `freeclaim logs`
/// follows.
#[derive(Clone)]
pub(crate) struct TeeMakeWriter {
    pub file: Option<Arc<Mutex<File>>>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct TeeWriter {
    file: Option<Arc<Mutex<File>>>,
    suppress_stdout: bool,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &self.file
            && let Ok(mut f) = file.lock()
        {
            let _ = f.write_all(buf); // a full disk must not take the process down
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file
            && let Ok(mut f) = file.lock()
        {
            let _ = f.flush();
        }
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

pub(crate) fn parse_level(raw: &str) -> Level {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber. `log_file` is appended to when given.
pub(crate) fn init(level: &str, log_file: Option<&Path>, suppress_stdout: bool) -> Result<()> {
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(Arc::new(Mutex::new(f)))
        }
        None => None,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(level))
        .with_ansi(log_file.is_none())
        .with_writer(TeeMakeWriter {
            file,
            suppress_stdout,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // already set in tests
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_defaults_to_info() {
        assert_eq!(parse_level("nonsense"), Level::INFO);
        assert_eq!(parse_level(" DEBUG "), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
    }

    #[test]
    fn tee_writer_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let file = std::fs::File::create(&path).unwrap();
        let make = TeeMakeWriter {
            file: Some(Arc::new(Mutex::new(file))),
            suppress_stdout: true,
        };
        let mut w = make.make_writer();
        w.write_all(b"hello log\n").unwrap();
        w.flush().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "hello log\n");
    }
}
