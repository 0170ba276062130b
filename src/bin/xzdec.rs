use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use xzdec::XzReader;

/// Decompress a .xz file to standard output.
#[derive(Parser)]
#[command(name = "xzdec", version, about)]
struct Cli {
    /// The .xz file to decompress.
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("xzdec: {}: {error}", cli.file.display());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> io::Result<()> {
    let file = BufReader::new(File::open(&cli.file)?);
    let mut reader = XzReader::new(file);
    let mut stdout = BufWriter::new(io::stdout().lock());
    io::copy(&mut reader, &mut stdout)?;
    stdout.flush()
}
