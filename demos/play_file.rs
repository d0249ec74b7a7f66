//! Play an audio file through the default output device.
//!
//! Usage: cargo run --example play_file -- <path> [--loop N]

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use streamvoice::{
    AudioDevice, AudioDeviceDesc, AudioEvent, CpalBackend, ListSortBy, LoopingMode, WaveInstance,
    WaveInstanceHandle, WaveResource,
};

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .context("usage: play_file <path> [--loop N]")?;
    let loops: u32 = match (args.next().as_deref(), args.next()) {
        (Some("--loop"), Some(count)) => count.parse().context("loop count")?,
        _ => 0,
    };

    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path))?;
    let extension = std::path::Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str());
    let wave = Arc::new(WaveResource::compressed(1, path.as_str(), bytes, extension));

    let desc = AudioDeviceDesc::new().sample_rate(48000).max_channels(8);
    let mut backend = CpalBackend::new(desc.clone())?;
    backend.start()?;
    let mut device = AudioDevice::new(desc, backend)?;

    let mut instance = WaveInstance::new(wave.clone());
    if loops > 0 {
        let mut remaining = loops;
        instance = instance
            .looping(LoopingMode::WithNotification)
            .with_finished_hook(move |_| {
                remaining -= 1;
                remaining == 0
            });
    }
    let handle = WaveInstanceHandle::new(instance);

    let mut listed = false;
    loop {
        device.update(std::slice::from_ref(&handle));

        for event in device.poll_events() {
            log::info!("{:?}", event);
            if let AudioEvent::InitFailed { wave_name, .. } = &event {
                anyhow::bail!("could not play {}", wave_name);
            }
        }

        if !listed && device.active_source_count() > 0 {
            log::info!("\n{}", device.list_sounds(ListSortBy::Size));
            listed = true;
        }

        if handle.lock().is_finished() {
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    device.free_resource(&wave);
    log::info!(
        "Done after {} ticks, {} frames rendered",
        device.context().current_tick(),
        device.backend().frames_processed()
    );
    Ok(())
}
