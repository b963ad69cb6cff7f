use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use lanvm::alu::FlagMode;
use lanvm::display::{DisplayBackend, Headless, PpmDump};
use lanvm::env::Env;
use lanvm::io::StdConsole;
use lanvm::loader::{self, ImageFormat};
use lanvm::output::{MsgColor, Output};
use lanvm::{Air, ExitReason, RunConfig, RunEnvironment, RunExit};

/// LanVM is a toolchain for a small 16-bit register and stack machine: assembler and VM.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.lasm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a `.lasm` source, `.lbc` binary or `.hex` image directly
    Run {
        /// File to run
        name: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Assemble a `.lasm` file into a `.lbc` binary to run later
    Assemble {
        /// `.lasm` file to assemble
        name: PathBuf,
        /// Destination for the program image
        dest: Option<PathBuf>,
        /// Emit a hex text image instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
    /// Check a `.lasm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Place a watch on a `.lasm` file to receive constant assembler updates
    Watch {
        /// `.lasm` file to watch
        name: PathBuf,
    },
}

#[derive(clap::Args, Default)]
struct RunOpts {
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
    /// Print every instruction as it executes
    #[arg(short, long)]
    trace: bool,
    /// Derive carry and overflow from the truncated 16-bit result
    #[arg(long)]
    legacy_flags: bool,
    /// Skip invalid opcodes instead of stopping
    #[arg(long)]
    keep_going: bool,
    /// Write the last displayed frame to a PPM file
    #[arg(long, value_name = "PPM")]
    frame_out: Option<PathBuf>,
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    let env = Env::from_vars();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(lanvm::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let output = Output::new(env.minimal);
    if let Some(command) = args.command {
        match command {
            Command::Run { name, opts } => run(&name, opts, env),
            Command::Assemble { name, dest, hex } => {
                output.file_message(Green, "Assembling", &name);
                let src = fs::read_to_string(&name).into_diagnostic()?;
                let (air, image) = assemble(&src)?;
                if !output.is_minimal() {
                    print_summary(&air);
                }

                let format = if hex {
                    ImageFormat::HexText
                } else {
                    ImageFormat::Binary
                };
                let out_file_name = dest.unwrap_or_else(|| name.with_extension(format.extension()));
                match format {
                    ImageFormat::Binary => fs::write(&out_file_name, &image),
                    ImageFormat::HexText => fs::write(&out_file_name, loader::to_hex(&image)),
                }
                .into_diagnostic()?;

                output.message(Green, "Finished", &format!("emit {} bytes", image.len()));
                output.file_message(Green, "Saved", &out_file_name);
                Ok(())
            }
            Command::Check { name } => {
                output.file_message(Green, "Checking", &name);
                let src = fs::read_to_string(&name).into_diagnostic()?;
                let _ = assemble(&src)?;
                output.message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Watch { name } => watch(name, output),
        }
    } else if let Some(path) = args.path {
        run(&path, RunOpts::default(), env)
    } else {
        println!("\n~ lanvm v{VERSION} ~");
        println!("{}", LOGO.truecolor(120, 200, 255).bold());
        println!("{SHORT_INFO}");
        std::process::exit(0);
    }
}

fn watch(name: PathBuf, output: Output) -> Result<()> {
    use MsgColor::*;
    if !name.exists() {
        bail!("File does not exist. Exiting...")
    }
    // Vim breaks if watching a single file
    let folder_path = match name.parent() {
        Some(pth) if pth.is_dir() => pth.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    // Clear screen and move cursor to top left
    print!("\x1B[2J\x1B[2;1H");
    output.file_message(Green, "Watching", &name);
    output.message(Cyan, "Help", "press CTRL+C to exit");

    let mut watcher =
        Hotwatch::new_with_custom_delay(Duration::from_millis(500)).into_diagnostic()?;

    watcher
        .watch(folder_path, move |event: Event| match event.kind {
            // Watch remove for vim changes
            EventKind::Modify(_) | EventKind::Remove(_) => {
                print!("\x1B[2J\x1B[2;1H");
                output.file_message(Green, "Watching", &name);
                output.message(Green, "Re-checking", "file change detected");
                output.message(Cyan, "Help", "press CTRL+C to exit");

                // Makes reruns more obvious
                sleep(Duration::from_millis(50));

                let src = match fs::read_to_string(&name) {
                    Ok(src) => src,
                    Err(e) => {
                        eprintln!("{e}. Exiting...");
                        std::process::exit(1)
                    }
                };
                match assemble(&src) {
                    Ok(_) => output.message(Green, "Success", "no errors found!"),
                    Err(e) => println!("\n{:?}", e),
                }
                Flow::Continue
            }
            _ => Flow::Continue,
        })
        .into_diagnostic()?;
    watcher.run();
    Ok(())
}

fn run(name: &Path, opts: RunOpts, env: Env) -> Result<()> {
    let output = Output::new(opts.minimal || env.minimal);
    let image = match name.extension().and_then(|ext| ext.to_str()) {
        Some("lasm" | "asm") => {
            output.file_message(MsgColor::Green, "Assembling", name);
            let src = fs::read_to_string(name).into_diagnostic()?;
            assemble(&src)?.1
        }
        Some(_) => match ImageFormat::from_path(name) {
            Some(format) => loader::load(name, format)?,
            None => bail!("File has unknown extension. Exiting..."),
        },
        None => bail!("File has no extension. Exiting..."),
    };

    let config = RunConfig {
        flag_mode: if opts.legacy_flags {
            FlagMode::Truncated
        } else {
            FlagMode::Widened
        },
        trace: opts.trace || env.trace,
        halt_on_invalid: !opts.keep_going,
        restart_reload: true,
        output,
    };

    output.message(MsgColor::Green, "Running", "emitted binary");
    let exit = match opts.frame_out {
        Some(path) => execute(image, config, PpmDump::new(path))?,
        None => execute(image, config, Headless::new())?,
    };

    match &exit.reason {
        ExitReason::Halted | ExitReason::Exited | ExitReason::DisplayClosed => {
            output.file_message(MsgColor::Green, "Completed", name)
        }
        ExitReason::RanOffProgram => {
            output.message(MsgColor::Red, "Stopped", "ran past the end of the program")
        }
        // Already reported by the machine
        ExitReason::InvalidOpcode | ExitReason::Fault(_) => {
            output.message(MsgColor::Red, "Aborted", &format!("exit code {}", exit.code))
        }
    }
    if exit.code != 0 {
        std::process::exit(exit.code);
    }
    Ok(())
}

fn execute<D: DisplayBackend>(image: Vec<u8>, config: RunConfig, display: D) -> Result<RunExit> {
    let mut program =
        RunEnvironment::from_image(image, config, StdConsole::new(), display).into_diagnostic()?;
    let exit = program.run();
    if exit.reason == ExitReason::RanOffProgram {
        config.output.print_registers(program.state().regs());
    }
    Ok(exit)
}

/// Return the assembled program, printing any warnings
fn assemble(src: &str) -> Result<(Air, Vec<u8>)> {
    let (air, image) = lanvm::assemble(src)?;
    for warning in air.warnings() {
        eprintln!("{warning:?}");
    }
    Ok((air, image))
}

fn print_summary(air: &Air) {
    let labels = air.labels();
    println!("Labels ({} found):", labels.len());
    if labels.is_empty() {
        println!("  No labels found");
    }
    for (name, addr) in labels.iter() {
        println!("  {name}: 0x{addr:04x}");
    }
    for line in air.listing() {
        println!("{line}");
    }
}

const LOGO: &str = r#"
  _                __     ____  __
 | |    __ _ _ __  \ \   / /  \/  |
 | |   / _` | '_ \  \ \ / /| |\/| |
 | |__| (_| | | | |  \ V / | |  | |
 |_____\__,_|_| |_|   \_/  |_|  |_|"#;

const SHORT_INFO: &str = r"
Welcome to lanvm, an assembler and virtual machine for a small 16-bit
register and stack architecture.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
