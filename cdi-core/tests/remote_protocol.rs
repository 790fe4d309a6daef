mod support;

use cdi_core::calibration::{CalibrationStore, DEFAULT_TABLE, TableSource, TimingRecord};
use cdi_core::engine::EngineControl;
use cdi_core::remote::{FRAME_LEN, Frame, REJECTED, RemoteSession, Request};
use cdi_core::telemetry::TelemetryEventKind;

use support::{Engine, MemoryNvm, feed, started_engine};

struct Link {
    engine: Engine,
    memory: MemoryNvm,
    session: RemoteSession,
}

impl Link {
    fn new() -> Self {
        let memory = MemoryNvm::default();
        let engine = started_engine(CalibrationStore::load(&memory));
        Self {
            engine,
            memory,
            session: RemoteSession::new(),
        }
    }

    /// Pushes raw bytes and collects every reply frame.
    fn send_bytes(&mut self, bytes: &[u8]) -> Vec<[u8; FRAME_LEN]> {
        let mut control = EngineControl::new(&mut self.engine, &mut self.memory);
        bytes
            .iter()
            .filter_map(|&byte| self.session.receive(byte, &mut control))
            .collect()
    }

    fn request(&mut self, request: Request) -> Option<Frame> {
        let replies = self.send_bytes(&request.to_frame().encode());
        assert!(replies.len() <= 1);
        replies
            .first()
            .map(|bytes| Frame::decode(bytes).expect("replies carry a valid checksum"))
    }

    fn request_raw(&mut self, command: u8) -> Option<[u8; FRAME_LEN]> {
        self.send_bytes(&Frame::new(command, [0; 4]).encode())
            .first()
            .copied()
    }
}

#[test]
fn get_speed_is_zero_until_synchronized() {
    let mut link = Link::new();
    let reply = link.request(Request::GetSpeed).expect("reply");
    assert_eq!(reply, Frame::new(0x01, [0; 4]));

    feed(&mut link.engine, &[2_000; 8]);
    let reply = link.request(Request::GetSpeed).expect("reply");
    assert_eq!(reply.low_u16(), 1_860);
}

#[test]
fn set_record_round_trips_through_save_and_reload() {
    let mut link = Link::new();
    let record = TimingRecord::new(2_400, 17);

    let reply = link
        .request(Request::SetRecord { slot: 4, record })
        .expect("reply");
    assert_eq!(reply, Frame::new(0xA1, [4, 17, 0x60, 0x09]));

    let reply = link.request(Request::GetRecord { slot: 4 }).expect("reply");
    assert_eq!(reply, Frame::new(0x21, [4, 17, 0x60, 0x09]));

    let reply = link.request(Request::SetShift(44)).expect("reply");
    assert_eq!(reply, Frame::new(0xA2, [44, 0, 0, 0]));
    assert!(link.engine.calibration().is_dirty());

    let reply = link.request(Request::Save).expect("reply");
    assert_eq!(reply, Frame::new(0xAF, [0; 4]));
    assert!(!link.engine.calibration().is_dirty());
    assert_eq!(
        link.engine.telemetry().latest().map(|r| r.event),
        Some(TelemetryEventKind::CalibrationSaved)
    );

    let reloaded = CalibrationStore::load(&link.memory);
    assert_eq!(reloaded.source(), TableSource::Stored);
    assert_eq!(reloaded.table(), link.engine.calibration().table());
    assert_eq!(reloaded.get(4), Ok(record));
    assert_eq!(reloaded.shift(), 44);
}

#[test]
fn edits_are_lost_without_save() {
    let mut link = Link::new();
    link.request(Request::SetShift(60)).expect("reply");

    let reloaded = CalibrationStore::load(&link.memory);
    assert_eq!(reloaded.source(), TableSource::Defaults);
    assert_eq!(reloaded.table(), &DEFAULT_TABLE);
    assert_eq!(link.memory.writes, 0);
}

#[test]
fn out_of_range_requests_are_rejected() {
    let mut link = Link::new();

    let reply = link.request(Request::GetRecord { slot: 11 }).expect("reply");
    assert_eq!(reply, Frame::with_u32(0x21, REJECTED));

    let record = TimingRecord::new(1_000, 181);
    let reply = link
        .request(Request::SetRecord { slot: 0, record })
        .expect("reply");
    assert_eq!(reply.value_u32(), REJECTED);
    assert_eq!(link.engine.timing_record(0), Ok(DEFAULT_TABLE[0]));

    let reply = link.request(Request::SetShift(181)).expect("reply");
    assert_eq!(reply.value_u32(), REJECTED);
    assert_eq!(link.engine.shift(), 5);
}

#[test]
fn unordered_table_refuses_to_save() {
    let mut link = Link::new();
    let record = TimingRecord::new(9_000, 5);
    link.request(Request::SetRecord { slot: 1, record })
        .expect("reply");

    let reply = link.request(Request::Save).expect("reply");
    assert_eq!(reply.value_u32(), REJECTED);
    assert_eq!(link.memory.writes, 0);
    assert!(link.engine.calibration().is_dirty());
}

#[test]
fn corrupted_frames_are_never_dispatched() {
    let frame = Request::SetShift(90).to_frame().encode();
    for index in 0..FRAME_LEN {
        for flip in [0x01u8, 0x10, 0x80] {
            let mut link = Link::new();
            let mut corrupted = frame;
            corrupted[index] ^= flip;

            let replies = link.send_bytes(&corrupted);
            assert!(replies.is_empty(), "byte {index} ^ {flip:#04x} answered");
            assert_eq!(link.engine.shift(), 5, "byte {index} ^ {flip:#04x} applied");
        }
    }
}

#[test]
fn link_recovers_after_line_noise() {
    let mut link = Link::new();
    let mut stream = vec![0x00, 0x55, 0xAA, 0x01, 0x02];
    stream.extend_from_slice(&Request::GetShift.to_frame().encode());

    // The stray header swallows the start of the real frame; the bogus frame
    // fails its checksum and the retry goes through.
    let mut replies = link.send_bytes(&stream);
    replies.extend(link.send_bytes(&Request::GetShift.to_frame().encode()));
    assert!(!replies.is_empty());
    let reply = Frame::decode(replies.last().expect("reply")).expect("valid reply");
    assert_eq!(reply, Frame::new(0x22, [5, 0, 0, 0]));
}

#[test]
fn unknown_command_is_ignored() {
    let mut link = Link::new();
    assert_eq!(link.request_raw(0x42), None);
}
