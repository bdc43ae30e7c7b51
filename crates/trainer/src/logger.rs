use anyhow::Result;
use env_logger::{Builder, Env, Target};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Writer that duplicates every log line to stdout and a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}

/// Installs the process logger: level from `RUST_LOG` (default info), lines
/// tagged with the given name and mirrored to `<output_dir>/log.txt`.
pub fn setup_logger(name: &str, output_dir: &Path) -> Result<()> {
    let file = File::create(output_dir.join("log.txt"))?;
    let name = name.to_string();

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            writeln!(
                buf,
                "{} {} {}: {}",
                buf.timestamp(),
                name,
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(Tee { file })))
        .init();

    Ok(())
}
