//! Thin demo CLI: reads a file, dispatches to the PE or Mach-O path by
//! magic, and prints the result. Adapted from the teacher's `main.rs`
//! (`fs::read` + `{:#x?}` dump); this crate's parsers never install a log
//! sink themselves, so the CLI installs `env_logger` as the one the spec
//! leaves external.

use std::{env, fs, process};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: {} FILE", args[0]);
        process::exit(1);
    }

    let bytes = match fs::read(&args[1]) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{}: {e}", args[1]);
            process::exit(1);
        }
    };

    if bytes.len() >= 2 && &bytes[0..2] == b"MZ" {
        match binhull::PeImage::parse(&bytes) {
            Ok(image) => {
                println!("PE image: {} sections", image.sections.len());
                println!("entry point rva: {:#x}", image.headers.optional.entry_point_rva());
                println!("imports: {} descriptors", image.imports.len());
                if let Some(exports) = &image.exports {
                    println!("exports: {} entries ({})", exports.entries.len(), exports.name);
                }
                if !image.warnings.failures.is_empty() {
                    println!("warnings:");
                    for (step, err) in &image.warnings.failures {
                        println!("  {step}: {err}");
                    }
                }
            }
            Err(e) => {
                eprintln!("parse failed: {e}");
                process::exit(1);
            }
        }
        return;
    }

    eprintln!("{}: not a recognized PE image", args[1]);
    process::exit(1);
}
