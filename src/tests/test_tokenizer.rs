use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use rstest::rstest;
use tempfile::TempDir;

use crate::error::GenerationError;
use crate::tokenizer::*;

fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind,
    }
}

fn note(on: bool, key: u8, vel: u8) -> TrackEventKind<'static> {
    let message = if on {
        MidiMessage::NoteOn {
            key: u7::new(key),
            vel: u7::new(vel),
        }
    } else {
        MidiMessage::NoteOff {
            key: u7::new(key),
            vel: u7::new(0),
        }
    };
    TrackEventKind::Midi {
        channel: u4::new(0),
        message,
    }
}

fn end() -> TrackEventKind<'static> {
    TrackEventKind::Meta(MetaMessage::EndOfTrack)
}

fn to_bytes(smf: &Smf) -> Vec<u8> {
    let mut buf = Vec::new();
    smf.write_std(&mut buf).unwrap();
    buf
}

#[rstest]
#[case(Event::Pad, 0)]
#[case(Event::NoteOn(0), 1)]
#[case(Event::NoteOn(127), 128)]
#[case(Event::NoteOff(0), 129)]
#[case(Event::NoteOff(127), 256)]
#[case(Event::TimeShift(1), 257)]
#[case(Event::TimeShift(100), 356)]
#[case(Event::Velocity(0), 357)]
#[case(Event::Velocity(31), 388)]
fn test_token_boundaries(#[case] event: Event, #[case] token: u32) {
    assert_eq!(event.to_token(), token);
    assert_eq!(Event::from_token(token), Some(event));
}

#[test]
fn test_vocabulary_size() {
    assert_eq!(VOCAB_SIZE, 389);
    assert_eq!(Event::from_token(VOCAB_SIZE as u32), None);
    assert_eq!(MidiEventCodec::new().vocab_size(), VOCAB_SIZE);
}

#[test]
fn test_velocity_bins() {
    assert_eq!(velocity_to_bin(0), 0);
    assert_eq!(velocity_to_bin(82), 20);
    assert_eq!(velocity_to_bin(127), 31);
    assert_eq!(bin_to_velocity(0), 2);
    assert_eq!(velocity_to_bin(bin_to_velocity(20)), 20);
}

#[test]
fn test_decode_rejects_out_of_vocab() {
    let err = MidiEventCodec::new().decode(&[1, 400, 2]).unwrap_err();
    match err {
        GenerationError::Decode { tokens, message } => {
            assert_eq!(tokens, 3);
            assert!(message.contains("400"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_decoded_events_encode_back() {
    let codec = MidiEventCodec::new();
    let tokens: Vec<u32> = [
        Event::Velocity(20),
        Event::NoteOn(60),
        Event::TimeShift(50),
        Event::NoteOff(60),
    ]
    .iter()
    .map(|e| e.to_token())
    .collect();

    let bytes = codec.decode(&tokens).unwrap();
    assert_eq!(codec.encode_bytes(&bytes).unwrap(), tokens);
}

#[test]
fn test_encode_merges_tracks_with_tempo() {
    // One quarter per second at 480 tpq: tick 480 = 1.0 s = 100 steps.
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(480)),
    ));
    smf.tracks.push(vec![
        ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000)))),
        ev(0, end()),
    ]);
    smf.tracks.push(vec![
        ev(480, note(true, 64, 100)),
        // velocity 0 note-on closes the note
        ev(240, note(true, 64, 0)),
        ev(0, end()),
    ]);

    let tokens = MidiEventCodec::new().encode_bytes(&to_bytes(&smf)).unwrap();
    let events: Vec<Event> = tokens.iter().filter_map(|&t| Event::from_token(t)).collect();
    assert_eq!(
        events,
        vec![
            Event::TimeShift(100),
            Event::Velocity(velocity_to_bin(100)),
            Event::NoteOn(64),
            Event::TimeShift(50),
            Event::NoteOff(64),
        ]
    );
}

#[test]
fn test_long_gaps_split_into_max_shifts() {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(480)),
    ));
    // 2.5 s at the default 120 bpm = 2400 ticks.
    smf.tracks.push(vec![
        ev(2400, note(true, 40, 64)),
        ev(0, end()),
    ]);
    let tokens = MidiEventCodec::new().encode_bytes(&to_bytes(&smf)).unwrap();
    let shifts: Vec<Event> = tokens
        .iter()
        .filter_map(|&t| Event::from_token(t))
        .filter(|e| matches!(e, Event::TimeShift(_)))
        .collect();
    assert_eq!(
        shifts,
        vec![Event::TimeShift(100), Event::TimeShift(100), Event::TimeShift(50)]
    );
}

#[test]
fn test_dangling_notes_are_closed() {
    let codec = MidiEventCodec::new();
    let tokens = [
        Event::NoteOn(60).to_token(),
        Event::NoteOn(64).to_token(),
        Event::TimeShift(10).to_token(),
        // off for a note that never started is ignored
        Event::NoteOff(70).to_token(),
    ];
    let smf = codec.decode_to_smf(&tokens).unwrap();
    let track = &smf.tracks[0];

    let ons = track
        .iter()
        .filter(|e| matches!(e.kind, TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. }))
        .count();
    let offs: Vec<u8> = track
        .iter()
        .filter_map(|e| match e.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { key, .. },
                ..
            } => Some(key.as_int()),
            _ => None,
        })
        .collect();
    assert_eq!(ons, 2);
    assert_eq!(offs, vec![60, 64]);
    assert!(matches!(
        track.last().map(|e| e.kind),
        Some(TrackEventKind::Meta(MetaMessage::EndOfTrack))
    ));
}

#[test]
fn test_restruck_note_is_closed_first() {
    let codec = MidiEventCodec::new();
    let tokens = [Event::NoteOn(60).to_token(), Event::NoteOn(60).to_token()];
    let smf = codec.decode_to_smf(&tokens).unwrap();
    let kinds: Vec<&'static str> = smf.tracks[0]
        .iter()
        .filter_map(|e| match e.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { .. },
                ..
            } => Some("on"),
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { .. },
                ..
            } => Some("off"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["on", "off", "on", "off"]);
}

#[test]
fn test_pad_only_sequence_decodes_to_empty_track() {
    let bytes = MidiEventCodec::new().decode(&[PAD, PAD]).unwrap();
    assert!(MidiEventCodec::new().encode_bytes(&bytes).unwrap().is_empty());
}

#[test]
fn test_seed_encoding_errors() {
    let dir = TempDir::new().unwrap();
    let codec = MidiEventCodec::new();

    let garbage = dir.path().join("garbage.mid");
    std::fs::write(&garbage, b"definitely not midi").unwrap();
    let err = codec.encode_seed(&garbage).unwrap_err();
    assert!(matches!(err, GenerationError::SeedEncoding(_)));
    assert!(err.is_recoverable());

    let missing = dir.path().join("missing.mid");
    assert!(matches!(
        codec.encode_seed(&missing),
        Err(GenerationError::SeedEncoding(_))
    ));
}

#[test]
fn test_encode_seed_from_file() {
    let dir = TempDir::new().unwrap();
    let codec = MidiEventCodec::new();
    let tokens = vec![
        Event::Velocity(10).to_token(),
        Event::NoteOn(48).to_token(),
        Event::TimeShift(25).to_token(),
        Event::NoteOff(48).to_token(),
    ];
    let path = dir.path().join("seed.mid");
    std::fs::write(&path, codec.decode(&tokens).unwrap()).unwrap();
    assert_eq!(codec.encode_seed(&path).unwrap(), tokens);
}
