// src/tokenizer.rs

//! MIDI <-> token codec.
//!
//! Event vocabulary (389 ids, 0 = PAD):
//!
//! | ids          | event                                  |
//! |--------------|----------------------------------------|
//! | `0`          | PAD                                    |
//! | `1..=128`    | note-on, pitch 0..=127                 |
//! | `129..=256`  | note-off, pitch 0..=127                |
//! | `257..=356`  | time-shift of 1..=100 steps of 10 ms   |
//! | `357..=388`  | velocity bin 0..=31 (width 4)          |
//!
//! Decoding writes a single-track SMF at 480 ticks per quarter, 120 bpm.

use log::{debug, info, warn};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

use crate::error::{GenerationError, Result};

pub const PAD: u32 = 0;
pub const NOTE_ON_OFFSET: u32 = 1;
pub const NOTE_OFF_OFFSET: u32 = NOTE_ON_OFFSET + 128;
pub const TIME_SHIFT_OFFSET: u32 = NOTE_OFF_OFFSET + 128;
pub const MAX_SHIFT_STEPS: u32 = 100;
pub const VELOCITY_OFFSET: u32 = TIME_SHIFT_OFFSET + MAX_SHIFT_STEPS;
pub const VELOCITY_BINS: u32 = 32;
pub const VOCAB_SIZE: usize = (VELOCITY_OFFSET + VELOCITY_BINS) as usize;

/// Seconds per time-shift step.
pub const TIME_STEP_SECS: f64 = 0.01;

const DEFAULT_TEMPO_US: u32 = 500_000;
const TICKS_PER_QUARTER: u16 = 480;
const MAX_DELTA: u32 = (1 << 28) - 1;

// ═════════════════════════════════════════════════════════════════════════════
// Events
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Pad,
    NoteOn(u8),
    NoteOff(u8),
    /// 1..=100 steps.
    TimeShift(u32),
    /// 0..32 bin.
    Velocity(u8),
}

impl Event {
    pub fn to_token(self) -> u32 {
        match self {
            Event::Pad => PAD,
            Event::NoteOn(pitch) => NOTE_ON_OFFSET + pitch as u32,
            Event::NoteOff(pitch) => NOTE_OFF_OFFSET + pitch as u32,
            Event::TimeShift(steps) => TIME_SHIFT_OFFSET + steps - 1,
            Event::Velocity(bin) => VELOCITY_OFFSET + bin as u32,
        }
    }

    pub fn from_token(token: u32) -> Option<Self> {
        match token {
            PAD => Some(Event::Pad),
            t if t < NOTE_OFF_OFFSET => Some(Event::NoteOn((t - NOTE_ON_OFFSET) as u8)),
            t if t < TIME_SHIFT_OFFSET => Some(Event::NoteOff((t - NOTE_OFF_OFFSET) as u8)),
            t if t < VELOCITY_OFFSET => Some(Event::TimeShift(t - TIME_SHIFT_OFFSET + 1)),
            t if t < VOCAB_SIZE as u32 => Some(Event::Velocity((t - VELOCITY_OFFSET) as u8)),
            _ => None,
        }
    }
}

pub fn velocity_to_bin(velocity: u8) -> u8 {
    (velocity.min(127) / 4).min(VELOCITY_BINS as u8 - 1)
}

/// Centre of the bin, never 0 (which would read as a note-off).
pub fn bin_to_velocity(bin: u8) -> u8 {
    (bin as u32 * 4 + 2).min(127) as u8
}

// ═════════════════════════════════════════════════════════════════════════════
// Codec trait
// ═════════════════════════════════════════════════════════════════════════════

/// Tokenization collaborator of the generation engine.
pub trait TokenCodec {
    fn vocab_size(&self) -> usize;

    /// Tokens of a prompt file. Failures are `SeedEncoding` errors.
    fn encode_seed(&self, path: &Path) -> Result<Vec<u32>>;

    /// Standard MIDI File bytes for a token sequence. Failures are
    /// `Decode` errors.
    fn decode(&self, tokens: &[u32]) -> Result<Vec<u8>>;
}

// ═════════════════════════════════════════════════════════════════════════════
// Tempo map
// ═════════════════════════════════════════════════════════════════════════════

/// Tick -> seconds conversion for one file.
enum TempoMap {
    Metrical {
        ticks_per_quarter: f64,
        /// (start tick, start seconds, microseconds per quarter), sorted.
        segments: Vec<(u64, f64, u32)>,
    },
    Timecode {
        ticks_per_second: f64,
    },
}

impl TempoMap {
    fn new(timing: Timing, mut changes: Vec<(u64, u32)>) -> Self {
        match timing {
            Timing::Metrical(tpq) => {
                let ticks_per_quarter = tpq.as_int().max(1) as f64;
                changes.sort_by_key(|&(tick, _)| tick);

                let mut segments = vec![(0u64, 0.0f64, DEFAULT_TEMPO_US)];
                for (tick, tempo) in changes {
                    let &(start, secs, prev) = segments.last().unwrap_or(&(0, 0.0, DEFAULT_TEMPO_US));
                    let at = secs + (tick - start) as f64 * prev as f64 / 1e6 / ticks_per_quarter;
                    if tick == start {
                        segments.pop();
                    }
                    segments.push((tick, at, tempo));
                }
                TempoMap::Metrical {
                    ticks_per_quarter,
                    segments,
                }
            }
            Timing::Timecode(fps, subframes) => TempoMap::Timecode {
                ticks_per_second: (fps.as_f32() as f64 * subframes.max(1) as f64),
            },
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        match self {
            TempoMap::Metrical {
                ticks_per_quarter,
                segments,
            } => {
                let idx = segments.partition_point(|&(start, _, _)| start <= tick);
                let (start, secs, tempo) = segments[idx.saturating_sub(1)];
                secs + (tick - start) as f64 * tempo as f64 / 1e6 / ticks_per_quarter
            }
            TempoMap::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Event codec
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NoteEvent {
    On { key: u8, vel: u8 },
    Off { key: u8 },
}

/// Performance-event codec over Standard MIDI Files.
#[derive(Clone, Debug, Default)]
pub struct MidiEventCodec;

impl MidiEventCodec {
    pub fn new() -> Self {
        Self
    }

    /// Tokens for an in-memory SMF.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<Vec<u32>> {
        let smf = Smf::parse(bytes)
            .map_err(|e| GenerationError::SeedEncoding(format!("invalid MIDI file: {e}")))?;

        let mut tempo_changes = Vec::new();
        let mut notes: Vec<(u64, NoteEvent)> = Vec::new();

        for track in smf.tracks.iter() {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                match event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                        tempo_changes.push((tick, t.as_int()));
                    }
                    TrackEventKind::Midi { message, .. } => match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => notes.push((
                            tick,
                            NoteEvent::On {
                                key: key.as_int(),
                                vel: vel.as_int(),
                            },
                        )),
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            notes.push((tick, NoteEvent::Off { key: key.as_int() }))
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }

        let tempo = TempoMap::new(smf.header.timing, tempo_changes);
        // Stable: simultaneous events keep track order.
        notes.sort_by_key(|&(tick, _)| tick);

        let mut tokens = Vec::with_capacity(notes.len() * 2);
        let mut cursor = 0u64;
        let mut last_bin: Option<u8> = None;

        for (tick, note) in notes {
            let step = (tempo.seconds(tick) / TIME_STEP_SECS).round() as u64;
            let mut gap = step.saturating_sub(cursor);
            while gap > 0 {
                let shift = gap.min(MAX_SHIFT_STEPS as u64) as u32;
                tokens.push(Event::TimeShift(shift).to_token());
                gap -= shift as u64;
            }
            cursor = cursor.max(step);

            match note {
                NoteEvent::On { key, vel } => {
                    let bin = velocity_to_bin(vel);
                    if last_bin != Some(bin) {
                        tokens.push(Event::Velocity(bin).to_token());
                        last_bin = Some(bin);
                    }
                    tokens.push(Event::NoteOn(key).to_token());
                }
                NoteEvent::Off { key } => tokens.push(Event::NoteOff(key).to_token()),
            }
        }

        debug!("Encoded {} tokens from MIDI", tokens.len());
        Ok(tokens)
    }

    /// In-memory SMF for a token sequence.
    pub fn decode_to_smf(&self, tokens: &[u32]) -> Result<Smf<'static>> {
        let ticks_per_second =
            TICKS_PER_QUARTER as f64 * 1e6 / DEFAULT_TEMPO_US as f64;
        let to_tick = |step: u64| (step as f64 * TIME_STEP_SECS * ticks_per_second).round() as u64;

        let mut step = 0u64;
        let mut velocity = bin_to_velocity(16);
        let mut active = [false; 128];
        let mut timeline: Vec<(u64, MidiMessage)> = Vec::new();

        for (pos, &token) in tokens.iter().enumerate() {
            let event = Event::from_token(token).ok_or_else(|| GenerationError::Decode {
                tokens: tokens.len(),
                message: format!("token {token} at position {pos} is outside the vocabulary"),
            })?;
            match event {
                Event::Pad => {}
                Event::TimeShift(steps) => step += steps as u64,
                Event::Velocity(bin) => velocity = bin_to_velocity(bin),
                Event::NoteOn(key) => {
                    if active[key as usize] {
                        timeline.push((to_tick(step), note_off(key)));
                    }
                    active[key as usize] = true;
                    timeline.push((
                        to_tick(step),
                        MidiMessage::NoteOn {
                            key: u7::new(key),
                            vel: u7::new(velocity),
                        },
                    ));
                }
                Event::NoteOff(key) => {
                    if active[key as usize] {
                        active[key as usize] = false;
                        timeline.push((to_tick(step), note_off(key)));
                    }
                }
            }
        }

        let dangling = active.iter().filter(|&&on| on).count();
        if dangling > 0 {
            warn!("Closing {} notes left open at end of sequence", dangling);
        }
        for (key, _) in active.iter().enumerate().filter(|(_, on)| **on) {
            timeline.push((to_tick(step), note_off(key as u8)));
        }

        let mut track: Track<'static> = Vec::with_capacity(timeline.len() + 3);
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(DEFAULT_TEMPO_US))),
        });
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::ProgramChange {
                    program: u7::new(0),
                },
            },
        });

        let mut last_tick = 0u64;
        for (tick, message) in timeline {
            let delta = tick - last_tick;
            if delta > MAX_DELTA as u64 {
                return Err(GenerationError::Decode {
                    tokens: tokens.len(),
                    message: format!("event gap of {delta} ticks does not fit a MIDI delta"),
                });
            }
            track.push(TrackEvent {
                delta: u28::new(delta as u32),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message,
                },
            });
            last_tick = tick;
        }
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ));
        smf.tracks.push(track);
        Ok(smf)
    }
}

fn note_off(key: u8) -> MidiMessage {
    MidiMessage::NoteOff {
        key: u7::new(key),
        vel: u7::new(0),
    }
}

impl TokenCodec for MidiEventCodec {
    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn encode_seed(&self, path: &Path) -> Result<Vec<u32>> {
        info!("Encoding seed MIDI: {:?}", path);
        let bytes = std::fs::read(path).map_err(|e| {
            GenerationError::SeedEncoding(format!("cannot read {}: {e}", path.display()))
        })?;
        self.encode_bytes(&bytes)
    }

    fn decode(&self, tokens: &[u32]) -> Result<Vec<u8>> {
        let smf = self.decode_to_smf(tokens)?;
        let mut buf = Vec::new();
        smf.write_std(&mut buf).map_err(|e| GenerationError::Decode {
            tokens: tokens.len(),
            message: format!("cannot serialize MIDI: {e}"),
        })?;
        Ok(buf)
    }
}
