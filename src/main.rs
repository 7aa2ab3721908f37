use opal::build;
use opal::settings::{Config, OPAL_FILE_EXTENSION, TARGET_FILE_EXTENSION};
use saying::say;
use std::env;
use std::path::PathBuf;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        print_help();
        return;
    }

    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(msg) => {
            say!(Red { msg });
            print_help();
            return;
        }
    };

    build::build(config);
}

fn parse_args(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut rest_are_program_args = false;

    for arg in args {
        if rest_are_program_args {
            config.program_args.push(arg.clone());
            continue;
        }

        match arg.as_str() {
            "-c" => config.compile_native = true,
            "-d" => config.debug_build = true,
            "-e" => config.error_test = true,
            "-p" => config.profile_refcounts = true,
            "-r" => config.pessimistic_refcounts = true,
            "-u" => config.unsafe_mode = true,
            "-v" => config.verbose = true,
            "-cpp" => {
                config.compile_native = true;
                config.stop_after_emit = true;
            }
            "-crt" => config.use_crt_allocator = true,
            "-typeset" => config.print_typesets = true,

            // A single dash ends the source list; the rest goes to the
            // interpreted program.
            "-" => rest_are_program_args = true,

            "-o" => {
                config.output_name = Some(String::new());
            }

            other if other.starts_with('-') => {
                return Err(format!("Unknown option '{other}'"));
            }

            other => {
                // `-o name` consumes the next bare token.
                if let Some(name) = &config.output_name {
                    if name.is_empty() {
                        config.output_name = Some(other.to_string());
                        continue;
                    }
                }

                let path = PathBuf::from(other);
                match path.extension().and_then(|e| e.to_str()) {
                    Some(OPAL_FILE_EXTENSION) => config.source_files.push(path),
                    Some(TARGET_FILE_EXTENSION) => config.include_files.push(path),
                    _ => {
                        // Once sources are known, stray tokens are
                        // program arguments.
                        if config.source_files.is_empty() {
                            return Err(format!("Don't know what to do with '{other}'"));
                        }
                        config.program_args.push(other.to_string());
                    }
                }
            }
        }
    }

    if config.source_files.is_empty() {
        return Err("No source files given".to_string());
    }
    if config
        .output_name
        .as_ref()
        .is_some_and(|name| name.is_empty())
    {
        return Err("-o needs an output name".to_string());
    }

    Ok(config)
}

fn print_help() {
    say!(Green "The Opal compiler");
    println!("Usage: opalc [options] source.opl ... [program-args]");
    println!("Options:");
    println!("  -c         compile to a native executable (default: interpret)");
    println!("  -d         debug build: no optimization, debug info");
    println!("  -e         error-test mode: diff reported errors against // error markers");
    println!("  -o name    output basename");
    println!("  -p         enable ref-count profiling hooks");
    println!("  -r         pessimistic mode: insert ref-counts everywhere");
    println!("  -u         unsafe mode: skip runtime ref-count checks");
    println!("  -v         print the C++ toolchain invocation");
    println!("  -cpp       stop after emitting C++ source");
    println!("  -crt       use the platform C runtime allocator");
    println!("  -typeset   print computed destruction sets");
    println!("  -          end of source list; the rest are program arguments");
}
