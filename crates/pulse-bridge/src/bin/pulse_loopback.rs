//! Pulse loopback demo
//!
//! Plays a sine tone through the simulated server and records it back:
//! every period the server asks the playback device for more audio, the bytes
//! it received are fed to the capture device, and the host pulls them out
//! again through `capture_samples`.
//!
//! Set RUST_LOG=debug (or trace) for the bridge's own logging.

use std::f32::consts::TAU;

use pulse_bridge::config::{default_config_path, load_config};
use pulse_bridge::server::sim::{SimConnector, SimOptions};
use pulse_bridge::{Direction, PulseBackend};

/// Periods to run
const PERIODS: usize = 16;

/// Tone frequency in Hz
const TONE_HZ: f32 = 440.0;

fn sine_mixer(rate: u32) -> impl FnMut(&mut [u8], usize) + Send {
    let step = TAU * TONE_HZ / rate as f32;
    let mut phase = 0.0f32;
    move |out: &mut [u8], frames: usize| {
        for frame in out.chunks_exact_mut(4).take(frames) {
            let sample = ((phase.sin() * 0.25) * i16::MAX as f32) as i16;
            let bytes = sample.to_ne_bytes();
            frame[..2].copy_from_slice(&bytes);
            frame[2..].copy_from_slice(&bytes);
            phase = (phase + step) % TAU;
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = default_config_path();
    let config = load_config(&config_path);
    // The loopback copies bytes verbatim, so both ends keep the host format
    let pinned_frequency = config.pinned_frequency;
    let config = config.with_pinned(true, pinned_frequency);
    log::info!("pulse-loopback starting ({:?})", config);

    let connector = SimConnector::new(SimOptions::default());
    let control = connector.control();

    let mut playback = PulseBackend::new(connector.clone(), config.clone())
        .on_disconnect(|name: &str| log::warn!("Lost playback device '{}'", name));
    let rate = playback.params().frequency;
    playback.set_mixer(Box::new(sine_mixer(rate)));
    playback.open(None)?;
    playback.reset_playback()?;

    let mut capture = PulseBackend::new(connector, config);
    capture.open_capture(None)?;
    capture.start_capture()?;

    if let Some(list) = playback.devices(Direction::Playback) {
        for name in list.display_names() {
            log::info!("Playback device: {}", name);
        }
    }

    let params = playback.params();
    let frame_size = params.frame_size();
    log::info!(
        "Playback negotiated: {} Hz, {} x {} frames",
        params.frequency,
        params.num_updates,
        params.update_size
    );

    // Drop the prefill; the loop below accounts for steady-state periods only
    control.take_played();

    let mut captured = 0usize;
    let mut buf = Vec::new();
    for period in 0..PERIODS {
        control.request_write(params.update_size as usize * frame_size);
        if !control.sync() {
            anyhow::bail!("simulated server did not respond");
        }

        let played = control.take_played();
        control.push_capture(&played);
        if !control.sync() {
            anyhow::bail!("simulated server did not respond");
        }

        let frames = capture.available_samples();
        buf.resize(frames * frame_size, 0);
        capture.capture_samples(&mut buf, frames)?;
        captured += frames;

        let matches = buf == played;
        log::info!(
            "Period {}: played {} bytes, captured {} frames (match: {})",
            period,
            played.len(),
            frames,
            matches
        );
    }

    capture.stop_capture()?;
    capture.close_capture();
    playback.stop_playback();
    playback.close();

    log::info!("Done: {} frames looped back", captured);
    Ok(())
}
