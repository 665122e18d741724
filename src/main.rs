/*!
  Command-line front end: assemble a source file, optionally write the encoded
  program or a listing, then run it on a freshly powered machine.
*/

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use hexad::assembler::{assemble, AssembleError};
use hexad::machine::Machine;
use hexad::ports::{FileBlockDevice, NullDisplay, NullInput};

#[derive(Parser, Debug)]
#[command(version, about = "Assembler and virtual machine for the Hexad computer")]
struct Cli {
  /// Assembly source file
  input: PathBuf,

  /// Write the encoded program, one cell per line, to FILE
  #[arg(long, value_name = "FILE")]
  emit: Option<PathBuf>,

  /// Print an address-annotated listing of the assembled program
  #[arg(long)]
  listing: bool,

  /// Assemble only; do not run the program
  #[arg(long)]
  no_run: bool,

  /// Print the machine state (registers, stack, memory) after the run
  #[arg(long)]
  dump_state: bool,

  /// Directory holding the block-device drive files (drive0.bin, ...)
  #[arg(long, value_name = "DIR", default_value = ".")]
  disk_root: PathBuf,
}

fn main() -> ExitCode {
  env_logger::init();
  let cli = Cli::parse();
  let filename = cli.input.display().to_string();

  let source = match fs::read_to_string(&cli.input) {
    Ok(source) => source,
    Err(error) => {
      eprintln!("{}: {}", filename, error);
      return ExitCode::FAILURE;
    }
  };

  let assembly = match assemble(&source) {
    Ok(assembly) => assembly,
    Err(AssembleError::Rejected(report)) => {
      for diagnostic in &report.diagnostics {
        eprintln!("{}", diagnostic.render(&filename));
      }
      eprintln!("{}: {} error(s)", filename, report.error_count());
      return ExitCode::FAILURE;
    }
    Err(defect @ AssembleError::Defect(_)) => {
      eprintln!("{}: {}", filename, defect);
      return ExitCode::FAILURE;
    }
  };

  for warning in &assembly.warnings {
    eprintln!("{}", warning.render(&filename));
  }

  if cli.listing {
    print!("{}", assembly.listing());
  }

  if let Some(path) = &cli.emit {
    let mut out = String::new();
    for cell in &assembly.cells {
      out.push_str(&cell.to_string());
      out.push('\n');
    }
    if let Err(error) = fs::write(path, out) {
      eprintln!("{}: {}", path.display(), error);
      return ExitCode::FAILURE;
    }
  }

  if cli.no_run {
    return ExitCode::SUCCESS;
  }

  let mut machine = Machine::new(
    Box::new(NullDisplay),
    Box::new(NullInput),
    Box::new(FileBlockDevice::new(cli.disk_root)),
  );
  machine.load_program(&assembly.cells);
  machine.run();

  if cli.dump_state {
    print!("{}", machine);
  }

  ExitCode::SUCCESS
}
