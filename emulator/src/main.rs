mod command;
mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::{Session, SessionOptions};

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: cdi-emulator [--rpm <n>] [--transcript <path>]");
        process::exit(2);
    });

    let mut session = Session::new(&options)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    repl(&mut session, stdin.lock(), &mut stdout.lock())
}

/// Feeds lines from `reader` to the bench until end of input or `exit`.
fn repl(session: &mut Session, reader: impl BufRead, writer: &mut impl Write) -> io::Result<()> {
    writeln!(
        writer,
        "CDI ignition bench ready. Type `help` for commands or `exit` to quit."
    )?;

    let mut lines = reader.lines();
    loop {
        write!(writer, "> ")?;
        writer.flush()?;

        let Some(line) = lines.next() else {
            writeln!(writer)?;
            break;
        };
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--rpm=") {
            options.rpm = parse_rpm(value)?;
        } else if arg == "--rpm" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --rpm".to_string())?;
            options.rpm = parse_rpm(&value)?;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --transcript".to_string())?;
            options.transcript = Some(PathBuf::from(value));
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }
    Ok(options)
}

fn parse_rpm(raw: &str) -> Result<u32, String> {
    raw.parse().map_err(|_| format!("Invalid rpm `{raw}`"))
}
