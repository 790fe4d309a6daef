use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use cdi_core::calibration::{CalibrationStore, TIMING_SLOTS, TableSource, TimingRecord};
use cdi_core::config::{EngineConfig, SYSTEM_CLOCK_HZ, WATCHDOG_FEED_HZ};
use cdi_core::engine::{EngineControl, Ignition};
use cdi_core::ignition::{SparkChannel, VALUE_MAX};
use cdi_core::remote::{Command, FRAME_LEN, Frame, REJECTED, RemoteSession, Request};
use cdi_core::telemetry::{EventId, TelemetryEventKind};
use cdi_core::timer::{ConfigError, RawEvent, TimerPeripheral, TimerUnit};

use crate::command::{self, BenchCommand, HELP_TOPICS};
use crate::sim::{Eeprom, SimSpark, SimTimers, ToothWheel};

type Engine = Ignition<SimTimers, SimSpark>;

/// Start-up settings for a bench session.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub rpm: u32,
    pub transcript: Option<PathBuf>,
}

/// Simulated controller on a spinning tooth wheel, driven by bench commands.
pub struct Session {
    engine: Engine,
    eeprom: Eeprom,
    link: RemoteSession,
    wheel: ToothWheel,
    /// Simulated CPU cycles since power-on.
    now: u64,
    next_tooth_at: Option<u64>,
    armed_at: [Option<u64>; 2],
    last_delay: [Option<u64>; 2],
    cursor: EventId,
    transcript: Option<TranscriptLogger>,
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Timer(TimerUnit, RawEvent),
    Tooth,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;
        let eeprom = Eeprom::default();
        let engine = boot(&eeprom)?;

        let mut session = Self {
            engine,
            eeprom,
            link: RemoteSession::new(),
            wheel: ToothWheel::default(),
            now: 0,
            next_tooth_at: None,
            armed_at: [None; 2],
            last_delay: [None; 2],
            cursor: 0,
            transcript,
        };
        session.set_rpm(options.rpm);
        Ok(session)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.log(TranscriptRole::Host, trimmed)?;
        let lines = match command::parse(trimmed) {
            Ok(command) => self.execute(command)?,
            Err(err) => vec![format!("ERR syntax {err}")],
        };
        for line in &lines {
            self.log(TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    /// Simulated milliseconds since power-on.
    pub fn elapsed_ms(&self) -> u64 {
        self.now / cycles_per_ms()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Last measured delay value per channel, in units of 1/180 of the spark interval.
    pub fn measured_value(&self, channel: SparkChannel) -> Option<u64> {
        let delay = self.last_delay[channel.as_index()]?;
        let revolution = self.wheel.revolution_cycles()?;
        Some(delay * 2 * u64::from(VALUE_MAX) / revolution)
    }

    /// Advances simulated time, delivering tooth edges and timer interrupts in order.
    pub fn run_for(&mut self, cycles: u64) {
        let end = self.now.saturating_add(cycles);
        loop {
            let timer = self
                .engine
                .timers()
                .peripheral()
                .next_event()
                .map(|(delay, unit, event)| (self.now + delay, Step::Timer(unit, event)));
            let tooth = self.next_tooth_at.map(|at| (at, Step::Tooth));
            let Some((at, step)) = [timer, tooth]
                .into_iter()
                .flatten()
                .min_by_key(|&(at, _)| at)
                .filter(|&(at, _)| at <= end)
            else {
                break;
            };

            self.advance_to(at);
            match step {
                Step::Timer(unit, event) => self.timer_interrupt(unit, event),
                Step::Tooth => self.tooth_edge(),
            }
        }
        self.advance_to(end);
    }

    fn execute(&mut self, command: BenchCommand) -> io::Result<Vec<String>> {
        let lines = match command {
            BenchCommand::Rpm(rpm) => {
                self.set_rpm(rpm);
                vec![format!("OK wheel {rpm} rpm")]
            }
            BenchCommand::Run { millis } => {
                self.run_for(u64::from(millis) * cycles_per_ms());
                let mut lines = self.drain_events();
                lines.push(format!(
                    "OK t={} ms sync={} measured={}",
                    self.elapsed_ms(),
                    self.engine.sync_state(),
                    self.measured_rpm()
                ));
                lines
            }
            BenchCommand::Speed => self.transact(Request::GetSpeed),
            BenchCommand::Get(Some(slot)) => self.transact(Request::GetRecord { slot }),
            BenchCommand::Get(None) => {
                let mut lines = Vec::new();
                for slot in (0..=u8::MAX).take(TIMING_SLOTS) {
                    lines.extend(self.transact(Request::GetRecord { slot }));
                }
                lines
            }
            BenchCommand::Set {
                slot,
                speed,
                timing,
            } => self.transact(Request::SetRecord {
                slot,
                record: TimingRecord::new(speed, timing),
            }),
            BenchCommand::Shift(None) => self.transact(Request::GetShift),
            BenchCommand::Shift(Some(shift)) => self.transact(Request::SetShift(shift)),
            BenchCommand::Save => self.transact(Request::Save),
            BenchCommand::Reboot => self.reboot()?,
            BenchCommand::Frame(bytes) => self.send_bytes(&bytes),
            BenchCommand::Wheel(gaps) => self.replace_wheel(gaps),
            BenchCommand::Status => self.status(),
            BenchCommand::Events => {
                let lines = self.drain_events();
                if lines.is_empty() {
                    vec!["no new events".to_owned()]
                } else {
                    lines
                }
            }
            BenchCommand::Help(topic) => help(topic.as_deref().map(str::trim)),
        };
        Ok(lines)
    }

    fn set_rpm(&mut self, rpm: u32) {
        self.wheel.set_rpm(rpm);
        if rpm == 0 {
            self.next_tooth_at = None;
        } else if self.next_tooth_at.is_none() {
            self.next_tooth_at = self.wheel.next_gap().map(|gap| self.now + gap);
        }
    }

    fn replace_wheel(&mut self, gaps: [u32; 4]) -> Vec<String> {
        if gaps.iter().all(|&gap| gap == 0) {
            return vec!["ERR wheel needs at least one non-zero gap".to_owned()];
        }
        let rpm = self.wheel.rpm();
        self.wheel = ToothWheel::new(gaps);
        self.wheel.set_rpm(rpm);
        vec![format!("OK wheel gaps {gaps:?}")]
    }

    fn reboot(&mut self) -> io::Result<Vec<String>> {
        self.engine = boot(&self.eeprom)?;
        self.link = RemoteSession::new();
        self.cursor = self.engine.telemetry().next_id();
        self.armed_at = [None; 2];
        self.last_delay = [None; 2];
        Ok(vec![format!(
            "OK rebooted, calibration from {}",
            source_label(self.engine.calibration().source())
        )])
    }

    fn advance_to(&mut self, at: u64) {
        let delta = at.saturating_sub(self.now);
        self.engine.timers_mut().peripheral_mut().advance(delta);
        self.now = at;
    }

    fn timer_interrupt(&mut self, unit: TimerUnit, event: RawEvent) {
        let fired = self.engine.spark().fired_counts();
        self.engine
            .timers_mut()
            .peripheral_mut()
            .complete(unit, event);
        self.engine.on_interrupt(unit, event);
        self.observe_sparks(fired);
    }

    fn tooth_edge(&mut self) {
        let meter = self.engine.config().meter_unit;
        let captured = self.engine.timers().peripheral().counter(meter);
        let fired = self.engine.spark().fired_counts();
        let before = self.engine.telemetry().next_id();

        self.engine.on_interrupt(meter, RawEvent::Capture(captured));

        let armed: Vec<SparkChannel> = self
            .engine
            .telemetry()
            .since(before)
            .filter_map(|record| match record.event {
                TelemetryEventKind::Scheduled(channel) => Some(channel),
                _ => None,
            })
            .collect();
        for channel in armed {
            self.armed_at[channel.as_index()] = Some(self.now);
        }
        self.observe_sparks(fired);

        self.wheel.pass_tooth();
        self.next_tooth_at = self.wheel.next_gap().map(|gap| self.now + gap);
    }

    fn observe_sparks(&mut self, fired_before: [u32; 2]) {
        let fired = self.engine.spark().fired_counts();
        for channel in SparkChannel::ALL {
            let index = channel.as_index();
            if fired[index] != fired_before[index]
                && let Some(armed) = self.armed_at[index]
            {
                self.last_delay[index] = Some(self.now - armed);
            }
        }
    }

    fn transact(&mut self, request: Request) -> Vec<String> {
        let bytes = request.to_frame().encode();
        let mut lines = vec![format!("-> {} {}", request.command(), hex(&bytes))];
        lines.extend(self.send_bytes(&bytes));
        lines
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        let dropped = self.link.dropped();
        let mut control = EngineControl::new(&mut self.engine, &mut self.eeprom);
        let replies: Vec<[u8; FRAME_LEN]> = bytes
            .iter()
            .filter_map(|&byte| self.link.receive(byte, &mut control))
            .collect();

        let mut lines: Vec<String> = replies.iter().map(describe_reply).collect();
        let newly_dropped = self.link.dropped().wrapping_sub(dropped);
        if newly_dropped > 0 {
            lines.push(format!("<- {newly_dropped} frame(s) dropped"));
        }
        if lines.is_empty() {
            lines.push("<- no reply".to_owned());
        }
        lines
    }

    fn status(&self) -> Vec<String> {
        let engine = &self.engine;
        let spark = engine.spark();
        let mut lines = vec![
            format!(
                "time={} ms wheel={} rpm gaps={:?}",
                self.elapsed_ms(),
                self.wheel.rpm(),
                self.wheel.gaps()
            ),
            format!(
                "sync={} measured={} teeth={} busy={}",
                engine.sync_state(),
                self.measured_rpm(),
                engine.teeth(),
                engine.is_busy()
            ),
        ];
        for channel in SparkChannel::ALL {
            let value = self
                .measured_value(channel)
                .map_or_else(|| "-".to_owned(), |value| format!("{value}/{VALUE_MAX}"));
            lines.push(format!(
                "{channel}: fired={} level={} delay={value}",
                spark.fired(channel),
                u8::from(spark.level(channel))
            ));
        }

        let calibration = engine.calibration();
        lines.push(format!(
            "calibration shift={} dirty={} source={} eeprom-writes={}",
            calibration.shift(),
            calibration.is_dirty(),
            source_label(calibration.source()),
            self.eeprom.writes()
        ));
        lines.push(format!(
            "watchdog toggles={} heartbeats={}",
            engine.timers().peripheral().toggles(TimerUnit::Timer2),
            engine.heartbeats()
        ));
        lines
    }

    fn measured_rpm(&self) -> String {
        self.engine
            .speed()
            .map_or_else(|| "-".to_owned(), |speed| format!("{} rpm", speed.rpm))
    }

    fn drain_events(&mut self) -> Vec<String> {
        let telemetry = self.engine.telemetry();
        let lines = telemetry
            .since(self.cursor)
            .map(|record| {
                format!(
                    "#{} tooth={} {} {}",
                    record.id, record.tooth, record.event, record.details
                )
                .trim_end()
                .to_owned()
            })
            .collect();
        self.cursor = telemetry.next_id();
        lines
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = self.elapsed_ms();
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }
}

fn boot(eeprom: &Eeprom) -> io::Result<Engine> {
    let mut engine = Ignition::new(
        SimTimers::default(),
        SimSpark::default(),
        CalibrationStore::load(eeprom),
        EngineConfig::DEFAULT,
    );
    engine.start().map_err(config_error)?;
    engine
        .start_heartbeat(TimerUnit::Timer2, WATCHDOG_FEED_HZ)
        .map_err(config_error)?;
    Ok(engine)
}

fn config_error(err: ConfigError) -> io::Error {
    io::Error::other(err.to_string())
}

fn cycles_per_ms() -> u64 {
    u64::from(SYSTEM_CLOCK_HZ) / 1_000
}

fn source_label(source: TableSource) -> &'static str {
    match source {
        TableSource::Stored => "eeprom",
        TableSource::Defaults => "defaults",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_reply(bytes: &[u8; FRAME_LEN]) -> String {
    let raw = hex(bytes);
    let Ok(frame) = Frame::decode(bytes) else {
        return format!("<- {raw} (corrupt)");
    };
    if frame.value_u32() == REJECTED {
        return format!("<- {raw} rejected");
    }

    let [v0, v1, ..] = frame.value;
    let detail = match Command::from_code(frame.command) {
        Some(Command::GetSpeed) => format!("speed={} rpm", frame.low_u16()),
        Some(Command::GetRecord | Command::SetRecord) => format!(
            "slot={v0} speed={} timing={v1}",
            frame.high_u16()
        ),
        Some(Command::GetShift | Command::SetShift) => format!("shift={v0}"),
        Some(Command::Save) => "saved".to_owned(),
        None => "unknown command".to_owned(),
    };
    format!("<- {raw} {detail}")
}

fn help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) if !target.is_empty() => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        _ => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# CDI ignition bench transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, elapsed_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[+{elapsed_ms:>6} ms] {} {line}", role.prefix())?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
