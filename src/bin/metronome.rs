//! Real-time MIDI metronome for the Rust Clock Library
//!
//! Plays a click on every beat from a single repeating event, and can change
//! tempo mid-run by time-stretching that event from inside its own callback.
//!
//! Usage:
//!   cargo run --bin metronome -- --list                       # List MIDI devices
//!   cargo run --bin metronome -- --device 0 --bpm 120         # Click on device 0
//!   cargo run --bin metronome -- --bpm 90 --to-bpm 150        # Dry run, printed clicks
//!
//! Set `RUST_LOG=rust_clock_lib=debug` to see clock and tempo events.

use midir::{MidiOutput, MidiOutputConnection};
use rust_clock_lib::{BeatGrid, ClockConfig, Engine, Event, Tempo};
use std::cell::{Cell, RefCell};
use std::env;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

// MIDI constants
const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

const HI_NOTE: u8 = 76; // downbeat
const LO_NOTE: u8 = 72;
const NOTE_LENGTH: f64 = 0.05;
const BEATS_PER_BAR: u32 = 4;

/// Wrapper for MIDI output connection with send capability
struct MidiSender {
    conn: MidiOutputConnection,
}

impl MidiSender {
    fn new(conn: MidiOutputConnection) -> Self {
        Self { conn }
    }

    fn send(&mut self, message: &[u8]) {
        if let Err(err) = self.conn.send(message) {
            tracing::warn!(?err, "midi send failed");
        }
    }
}

/// Where clicks go: a MIDI device, or stdout when none was picked.
enum Output {
    Midi(MidiSender),
    Print,
}

impl Output {
    fn note_on(&mut self, note: u8, velocity: u8, beat: u32, now: f64) {
        match self {
            Output::Midi(m) => m.send(&[NOTE_ON, note, velocity]),
            Output::Print => {
                let mark = if note == HI_NOTE { "TICK" } else { "tock" };
                println!("{:>8.3}s  beat {:>3}  {}", now, beat, mark);
            }
        }
    }

    fn note_off(&mut self, note: u8) {
        if let Output::Midi(m) = self {
            m.send(&[NOTE_OFF, note, 0]);
        }
    }
}

fn list_midi_devices() -> Result<(), Box<dyn std::error::Error>> {
    let midi_out = MidiOutput::new("metronome_list")?;
    let ports = midi_out.ports();

    if ports.is_empty() {
        println!("No MIDI output devices found.");
        return Ok(());
    }

    println!("Available MIDI output devices:");
    println!("------------------------------");
    for (i, port) in ports.iter().enumerate() {
        let name = midi_out.port_name(port).unwrap_or_else(|_| "Unknown".to_string());
        println!("  {}: {}", i, name);
    }
    println!();
    println!("Usage: cargo run --bin metronome -- --device <N> --bpm <BPM>");

    Ok(())
}

fn connect_to_device(device_index: usize) -> Result<MidiSender, Box<dyn std::error::Error>> {
    let midi_out = MidiOutput::new("metronome")?;
    let ports = midi_out.ports();

    if device_index >= ports.len() {
        return Err(format!(
            "Device index {} out of range. Only {} devices available.",
            device_index,
            ports.len()
        )
        .into());
    }

    let port = &ports[device_index];
    let port_name = midi_out.port_name(port)?;
    println!("Connecting to MIDI device: {}", port_name);

    let conn = midi_out.connect(port, "metronome_conn")?;
    Ok(MidiSender::new(conn))
}

struct Options {
    list_devices: bool,
    device_index: Option<usize>,
    bpm: f64,
    to_bpm: Option<f64>,
    change_bar: u32,
    bars: u32,
}

fn print_usage() {
    println!("Rust Clock Library - MIDI Metronome");
    println!("===================================");
    println!();
    println!("Usage:");
    println!("  cargo run --bin metronome -- --list            # List MIDI devices");
    println!("  cargo run --bin metronome -- [options]");
    println!();
    println!("Options:");
    println!("  --device N     MIDI output device (prints clicks if omitted)");
    println!("  --bpm B        Starting tempo (default 120)");
    println!("  --to-bpm B     Tempo to switch to at --change-bar");
    println!("  --change-bar N Bar at which the tempo changes (default 2)");
    println!("  --bars N       Number of bars to play (default 4)");
}

/// Returns `None` when only usage was requested.
fn parse_args() -> Option<Options> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options {
        list_devices: false,
        device_index: None,
        bpm: 120.0,
        to_bpm: None,
        change_bar: 2,
        bars: 4,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--list" | "-l" => opts.list_devices = true,
            "--device" | "-d" => {
                opts.device_index = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--bpm" => {
                if let Some(bpm) = value.and_then(|v| v.parse().ok()) {
                    opts.bpm = bpm;
                }
                i += 1;
            }
            "--to-bpm" => {
                opts.to_bpm = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--change-bar" => {
                if let Some(bar) = value.and_then(|v| v.parse().ok()) {
                    opts.change_bar = bar;
                }
                i += 1;
            }
            "--bars" => {
                if let Some(bars) = value.and_then(|v| v.parse().ok()) {
                    opts.bars = bars;
                }
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                return None;
            }
            other => tracing::warn!(arg = other, "ignoring unknown argument"),
        }
        i += 1;
    }
    Some(opts)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let Some(opts) = parse_args() else {
        return Ok(());
    };

    if opts.list_devices {
        return list_midi_devices();
    }

    let output = match opts.device_index {
        Some(d) => Output::Midi(connect_to_device(d)?),
        None => {
            println!("No --device given, printing clicks instead.\n");
            Output::Print
        }
    };
    let output = Rc::new(RefCell::new(output));

    let tempo = Rc::new(RefCell::new(Tempo::new(opts.bpm)?));
    if let Some(to_bpm) = opts.to_bpm {
        // Validate up front rather than failing inside a callback.
        Tempo::new(to_bpm)?;
    }
    let grid = BeatGrid::new(opts.bpm, BEATS_PER_BAR)?;
    let total_beats = opts.bars * BEATS_PER_BAR;

    let mut engine = Engine::realtime(ClockConfig::default());
    let clock = engine.clock().clone();

    println!(
        "Playing {} bars at {} BPM{}",
        opts.bars,
        opts.bpm,
        match opts.to_bpm {
            Some(to) => format!(", switching to {} BPM at bar {}", to, opts.change_bar),
            None => String::new(),
        }
    );

    let beat = Rc::new(Cell::new(0u32));
    let click = {
        let output = output.clone();
        let tempo = tempo.clone();
        let beat = beat.clone();
        let to_bpm = opts.to_bpm;
        let change_bar = opts.change_bar;

        move |e: &Event| {
            let Some(clock) = e.clock() else {
                return;
            };
            let n = beat.get();
            beat.set(n + 1);

            let downbeat = n % BEATS_PER_BAR == 0;
            let note = if downbeat { HI_NOTE } else { LO_NOTE };
            let velocity = if downbeat { 120 } else { 90 };
            output
                .borrow_mut()
                .note_on(note, velocity, n, clock.current_time());

            let off = output.clone();
            clock.schedule_after(NOTE_LENGTH, move |_: &Event| off.borrow_mut().note_off(note));

            if n + 1 >= total_beats {
                e.clear();
                // Let the last note-off land before stopping.
                let stopper = clock.clone();
                clock.schedule_after(NOTE_LENGTH * 2.0, move |_: &Event| stopper.stop());
                return;
            }

            if let Some(to) = to_bpm {
                if downbeat && n / BEATS_PER_BAR == change_bar {
                    if let Err(err) = tempo.borrow_mut().set_bpm(&clock, &[e.clone()], to) {
                        tracing::warn!(?err, "tempo change failed");
                    } else {
                        println!("--- tempo now {} BPM ---", to);
                    }
                }
            }
        }
    };

    // Start on the next bar line so the first click is a downbeat.
    let first = grid.next_beat_time(clock.current_time() + 0.1, 0);
    clock
        .schedule_at(first, click)
        .repeat(tempo.borrow().beat_duration())?;

    engine.run_until(|| false);

    if let Output::Midi(m) = &mut *output.borrow_mut() {
        m.send(&[NOTE_OFF, HI_NOTE, 0]);
        m.send(&[NOTE_OFF, LO_NOTE, 0]);
    }
    println!("\nMetronome finished after {} beats.", beat.get());
    Ok(())
}
