//! Bench command grammar.
//!
//! Commands are single lines of whitespace separated words, keywords matched
//! case-insensitively. Parsing uses `winnow` combinators directly over the
//! line.

use std::fmt;

use winnow::ascii::{Caseless, dec_uint, space1};
use winnow::combinator::{alt, eof, opt, peek, preceded, separated, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

/// One parsed bench command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BenchCommand {
    Rpm(u32),
    Run { millis: u32 },
    Speed,
    Get(Option<u8>),
    Set { slot: u8, speed: u16, timing: u8 },
    Shift(Option<u8>),
    Save,
    Reboot,
    Frame(Vec<u8>),
    Wheel([u32; 4]),
    Status,
    Events,
    Help(Option<String>),
}

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "rpm",
        "rpm <n>                      - spin the tooth wheel at n rpm (0 stops it)",
    ),
    ("run", "run <ms>                     - advance simulated time"),
    (
        "speed",
        "speed                        - GET_SPEED over the serial link",
    ),
    (
        "get",
        "get [slot]                   - GET_RECORD for one slot or the whole table",
    ),
    (
        "set",
        "set <slot> <rpm> <timing>    - SET_RECORD for one breakpoint",
    ),
    (
        "shift",
        "shift [value]                - GET_SHIFT, or SET_SHIFT with a value",
    ),
    (
        "save",
        "save                         - SAVE the calibration to EEPROM",
    ),
    (
        "reboot",
        "reboot                       - power-cycle the controller, keeping EEPROM",
    ),
    (
        "frame",
        "frame <hex bytes>            - send raw bytes on the serial link",
    ),
    (
        "wheel",
        "wheel <g0> <g1> <g2> <g3>    - relative gaps before each of the four teeth",
    ),
    (
        "status",
        "status                       - engine, spark and calibration state",
    ),
    (
        "events",
        "events                       - telemetry recorded since the last call",
    ),
    (
        "help",
        "help [topic]                 - show help for a command",
    ),
];

/// Rejected command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    /// Byte offset where parsing stopped.
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected input at column {}", self.offset + 1)
    }
}

impl std::error::Error for SyntaxError {}

/// Parses a trimmed command line.
///
/// # Errors
///
/// [`SyntaxError`] with the offset of the first token that did not fit.
pub fn parse(line: &str) -> Result<BenchCommand, SyntaxError> {
    terminated(command, eof)
        .parse(line.trim())
        .map_err(|err| SyntaxError {
            offset: err.offset(),
        })
}

fn command(input: &mut &str) -> ModalResult<BenchCommand> {
    alt((
        preceded(keyword("rpm"), argument(dec_uint)).map(BenchCommand::Rpm),
        preceded(keyword("run"), argument(dec_uint)).map(|millis| BenchCommand::Run { millis }),
        keyword("speed").value(BenchCommand::Speed),
        preceded(keyword("get"), opt(argument(dec_uint))).map(BenchCommand::Get),
        preceded(
            keyword("set"),
            (argument(dec_uint), argument(dec_uint), argument(dec_uint)),
        )
        .map(|(slot, speed, timing)| BenchCommand::Set {
            slot,
            speed,
            timing,
        }),
        preceded(keyword("shift"), opt(argument(dec_uint))).map(BenchCommand::Shift),
        keyword("save").value(BenchCommand::Save),
        keyword("reboot").value(BenchCommand::Reboot),
        preceded((keyword("frame"), space1), hex_bytes).map(BenchCommand::Frame),
        preceded(
            keyword("wheel"),
            (
                argument(dec_uint),
                argument(dec_uint),
                argument(dec_uint),
                argument(dec_uint),
            ),
        )
        .map(|(a, b, c, d)| BenchCommand::Wheel([a, b, c, d])),
        keyword("status").value(BenchCommand::Status),
        keyword("events").value(BenchCommand::Events),
        preceded(keyword("help"), opt(preceded(space1, rest)))
            .map(|topic: Option<&str>| BenchCommand::Help(topic.map(str::to_owned))),
    ))
    .parse_next(input)
}

/// Case-insensitive keyword that must end at whitespace or end of line.
fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(Caseless(word), peek(alt((space1, eof))))
}

/// Whitespace followed by `value`.
fn argument<'i, O>(
    value: impl Parser<&'i str, O, ErrMode<ContextError>>,
) -> impl Parser<&'i str, O, ErrMode<ContextError>> {
    preceded(space1, value)
}

fn hex_byte(input: &mut &str) -> ModalResult<u8> {
    take_while(1..=2, ('0'..='9', 'a'..='f', 'A'..='F'))
        .try_map(|digits| u8::from_str_radix(digits, 16))
        .parse_next(input)
}

fn hex_bytes(input: &mut &str) -> ModalResult<Vec<u8>> {
    separated(1.., hex_byte, space1).parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_calibration_commands() {
        assert_eq!(
            parse("set 3 2100 12"),
            Ok(BenchCommand::Set {
                slot: 3,
                speed: 2_100,
                timing: 12
            })
        );
        assert_eq!(parse("GET"), Ok(BenchCommand::Get(None)));
        assert_eq!(parse("get 10"), Ok(BenchCommand::Get(Some(10))));
        assert_eq!(parse("shift"), Ok(BenchCommand::Shift(None)));
        assert_eq!(parse("  shift 40 "), Ok(BenchCommand::Shift(Some(40))));
    }

    #[test]
    fn parses_raw_frames() {
        assert_eq!(
            parse("frame aa 21 3 0 0 0 CE"),
            Ok(BenchCommand::Frame(vec![0xAA, 0x21, 3, 0, 0, 0, 0xCE]))
        );
    }

    #[test]
    fn keywords_need_a_word_boundary() {
        assert!(parse("rpmx 10").is_err());
        assert!(parse("statusx").is_err());
        assert_eq!(parse("rpm 3000"), Ok(BenchCommand::Rpm(3_000)));
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        assert!(parse("set 300 1000 5").is_err());
        assert!(parse("shift 256").is_err());
    }

    #[test]
    fn help_takes_free_text_topic() {
        assert_eq!(parse("help"), Ok(BenchCommand::Help(None)));
        assert_eq!(
            parse("help set"),
            Ok(BenchCommand::Help(Some("set".to_owned())))
        );
    }
}
