//! Cadence demo host
//!
//! Builds a small session (two tone tracks, an effect return fed by a
//! pre-fader send) and plays it on the default output device, or renders
//! it offline and prints the master meters.
//!
//! ## Command line flags
//!
//! - `--seconds <n>`: how long to play or render (default 5)
//! - `--config <path>`: engine config YAML (default: user config dir)
//! - `--offline`: render without an audio device
//! - `--save <path>`: write the session state as YAML before playing

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use cadence_core::audio::{AudioDevice, CpalBackend, NullDevice};
use cadence_core::config::{default_config_path, load_config, save_config, EngineConfig};
use cadence_core::engine::{AudioClip, EngineCommand, Session};
use cadence_core::plugin::native::{DELAY_URI, LOWPASS_URI};
use cadence_core::routing::BusProvider;
use cadence_core::types::{Sample, SAMPLE_RATE};

/// Parsed command line
struct Args {
    seconds: f32,
    config: Option<PathBuf>,
    offline: bool,
    save: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args {
            seconds: 5.0,
            config: None,
            offline: false,
            save: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--seconds" => {
                    let value = iter.next().context("--seconds needs a value")?;
                    args.seconds = value
                        .parse()
                        .with_context(|| format!("invalid --seconds value '{}'", value))?;
                }
                "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
                "--save" => args.save = Some(iter.next().context("--save needs a path")?.into()),
                "--offline" => args.offline = true,
                other => bail!("unknown argument '{}'", other),
            }
        }
        Ok(args)
    }
}

/// A decaying sine burst repeated every `period` frames
fn tone(frequency: f32, seconds: f32, period: usize) -> Vec<Sample> {
    let len = (seconds * SAMPLE_RATE as f32) as usize;
    (0..len)
        .map(|i| {
            let t = (i % period) as f32 / SAMPLE_RATE as f32;
            let envelope = (-6.0 * t).exp();
            0.4 * envelope * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

fn build_session(session: &mut Session, seconds: f32) -> Result<()> {
    let fx = session.add_bus("FX", 2);

    let bass = session.add_track("Bass")?;
    session.add_plugin_by_uri(bass, LOWPASS_URI, true)?;
    session.set_pan(bass, -0.3)?;
    if let Some(track) = session.track_mut(bass) {
        track.add_clip(AudioClip::new("bass", 0, SAMPLE_RATE, vec![tone(110.0, seconds, 24000)]));
    }

    let lead = session.add_track("Lead")?;
    session.set_pan(lead, 0.3)?;
    session.set_gain(lead, 0.8)?;
    session.add_pre_send(lead, fx.id())?;
    if let Some(track) = session.track_mut(lead) {
        track.add_clip(AudioClip::new("lead", 12000, SAMPLE_RATE, vec![tone(440.0, seconds, 12000)]));
    }

    let ret = session.add_track("FX Return")?;
    session.add_plugin_by_uri(ret, DELAY_URI, false)?;
    session.set_gain(ret, 0.5)?;
    session.set_input_bus(ret, Some(fx.id()))?;

    log::info!("Demo session built with {} tracks", session.track_count());
    Ok(())
}

fn log_meters(session: &Session) {
    let peaks = session.project().master_out_bus().get_peak_values();
    let db: Vec<String> = peaks
        .iter()
        .map(|p| {
            if *p > 0.0 {
                format!("{:6.1} dB", 20.0 * p.log10())
            } else {
                "  -inf dB".to_string()
            }
        })
        .collect();
    log::info!("Master: [{}]", db.join(", "));
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path("config.yaml"));
    let config: EngineConfig = load_config(&config_path);
    log::info!("cadence-host starting up (config {:?})", config_path);

    let mut session = Session::new(&config);
    build_session(&mut session, args.seconds)?;

    if let Some(path) = &args.save {
        save_config(&session.get_state(), path)?;
        log::info!("Session saved to {:?}", path);
    }

    let (mut commands, mut processor) = session.create_processor();
    if commands.send(EngineCommand::Start).is_err() {
        bail!("transport command queue is full");
    }

    if args.offline {
        let device = NullDevice::new(session.block_size(), config.sample_rate);
        let blocks_per_second = (device.sample_rate() as usize / device.block_size()).max(1);
        let seconds = args.seconds.max(0.0).ceil() as usize;
        for _ in 0..seconds {
            device.render(&mut processor, blocks_per_second);
            log_meters(&session);
        }
    } else {
        let backend = CpalBackend::start(&config.audio, processor)?;
        log::info!(
            "Playing on {} channels at {}Hz",
            backend.channels(),
            backend.sample_rate()
        );
        let ticks = (args.seconds.max(0.0) * 4.0) as usize;
        for _ in 0..ticks {
            std::thread::sleep(Duration::from_millis(250));
            log_meters(&session);
        }
        drop(backend);
    }

    for event in session.drain_events() {
        log::debug!("Session event: {:?}", event);
    }
    log::info!(
        "Transport stopped at frame {}",
        session.graph().transport().position()
    );
    Ok(())
}
