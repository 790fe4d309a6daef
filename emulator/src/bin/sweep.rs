//! Spins the simulated wheel through a range of speeds with a flat timing
//! table and records the bench output as a transcript.

use std::env;
use std::io;
use std::path::PathBuf;

#[path = "../command.rs"]
mod command;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Session, SessionOptions};

const SWEEP_RPM: [u32; 6] = [300, 900, 1_500, 2_400, 3_600, 6_000];
const DEFAULT_TRANSCRIPT: &str = "target/transcripts/sweep.log";

fn main() -> io::Result<()> {
    let transcript = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_TRANSCRIPT), PathBuf::from);
    let mut session = Session::new(&SessionOptions {
        rpm: 0,
        transcript: Some(transcript),
    })?;

    run(&mut session, "shift 40")?;
    for slot in 0..11u16 {
        run(&mut session, &format!("set {slot} {} 10", 100 + slot * 600))?;
    }

    for rpm in SWEEP_RPM {
        run(&mut session, &format!("rpm {rpm}"))?;
        run(&mut session, "run 2000")?;
        run(&mut session, "status")?;
    }
    run(&mut session, "speed")?;
    Ok(())
}

fn run(session: &mut Session, line: &str) -> io::Result<()> {
    println!("> {line}");
    for response in session.handle_command(line)? {
        println!("{response}");
    }
    Ok(())
}
