use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use prism_core::output::DmxOutput;
use prism_core::timing::sleep_until;
use prism_core::{
    build_pipeline, list_input_devices, list_midi_ports, validate_startup, ConfigManager,
    Settings,
};
use prism_fixtures::FixtureLibrary;

/// Audio reactive stage lighting with a safety interlocked DMX/Art-Net output.
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(about = "Real-time lighting pipeline")]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file (default: prism.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the lighting pipeline until interrupted
    Run {
        /// Use synthetic sensors and a recording output instead of hardware
        #[arg(long)]
        mock: bool,

        /// Override the configured frame rate
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Hold a single DMX channel at a value until interrupted
    DmxTest {
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=512))]
        channel: u16,

        #[arg(short, long)]
        value: u8,
    },
    /// List audio input devices
    ListAudio,
    /// List MIDI input ports
    ListMidi,
    /// Run the mock pipeline headless and report timing and safety statistics
    Analyze {
        /// Seconds to run for
        #[arg(long, default_value = "10")]
        duration: f64,
    },
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(args.debug);

    let result = match args.command {
        Command::Run { mock, fps } => run(args.config, args.debug, mock, fps),
        Command::DmxTest { channel, value } => dmx_test(args.config, channel, value),
        Command::ListAudio => list_audio(),
        Command::ListMidi => list_midi(),
        Command::Analyze { duration } => analyze(args.config, duration),
    };

    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn load_settings(config: Option<PathBuf>) -> anyhow::Result<Settings> {
    let mut manager = ConfigManager::new(config);
    let settings = manager
        .load()
        .with_context(|| format!("loading {}", manager.config_path().display()))?;
    log::info!("Loaded configuration from {}", manager.config_path().display());
    Ok(settings)
}

/// Call `on_signal` once on SIGINT or SIGTERM, from a helper thread running
/// a small tokio runtime.
fn spawn_signal_listener<F>(on_signal: F) -> anyhow::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating signal runtime")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(wait_for_signal());
            on_signal();
        })
        .context("spawning signal thread")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for SIGINT: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT, shutting down"),
        _ = term.recv() => log::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received Ctrl-C, shutting down"),
        Err(e) => log::error!("Cannot listen for Ctrl-C: {}", e),
    }
}

fn run(config: Option<PathBuf>, debug: bool, mock: bool, fps: Option<f64>) -> anyhow::Result<()> {
    let mut settings = load_settings(config)?;
    settings.debug |= debug;
    if let Some(fps) = fps {
        settings.target_fps = fps;
    }

    let fixtures = validate_startup(&settings, mock, &FixtureLibrary::new())?;
    let mut pipeline = build_pipeline(&settings, &fixtures, mock);

    let stop = pipeline.stop_handle();
    spawn_signal_listener(move || stop.stop())?;

    if let Err(e) = pipeline.orchestrator.start() {
        pipeline.orchestrator.stop();
        return Err(e.into());
    }
    let result = pipeline.orchestrator.run_loop();
    pipeline.orchestrator.stop();

    let stats = pipeline.orchestrator.stats();
    let output = pipeline.output.stats();
    log::info!(
        "Ran {} frames ({} overruns), sent {} DMX frames ({} errors)",
        stats.frames,
        stats.overruns,
        output.frames_sent,
        output.errors
    );
    for (stage, failures) in &stats.stage_failures {
        log::warn!("Stage {} failed {} times", stage, failures);
    }

    result?;
    Ok(())
}

fn dmx_test(config: Option<PathBuf>, channel: u16, value: u8) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let output = Arc::new(DmxOutput::new(
        settings.dmx.clone(),
        settings.runtime.dmx_double_buffer,
    ));
    output.start()?;

    if !output.set_channel(channel, value) {
        output.stop();
        anyhow::bail!("channel {} is outside the universe", channel);
    }
    println!(
        "Holding channel {} at {} on {}. Press Ctrl-C to stop.",
        channel, value, settings.dmx.interface_type
    );

    let (tx, rx) = mpsc::channel();
    spawn_signal_listener(move || {
        let _ = tx.send(());
    })?;
    let _ = rx.recv();

    output.stop();
    let stats = output.stats();
    println!(
        "Sent {} frames, {} errors ({:.1}% error rate)",
        stats.frames_sent,
        stats.errors,
        stats.error_rate * 100.0
    );
    Ok(())
}

fn list_audio() -> anyhow::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found");
        return Ok(());
    }

    println!("Audio input devices:");
    for (i, device) in devices.iter().enumerate() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}: {}{}", i, device.name, marker);
    }
    Ok(())
}

fn list_midi() -> anyhow::Result<()> {
    let ports = list_midi_ports()?;
    if ports.is_empty() {
        println!("No MIDI input ports found");
        return Ok(());
    }

    println!("MIDI input ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port);
    }
    Ok(())
}

#[derive(Default)]
struct SafetyCounts {
    not_ok: u64,
    degraded: u64,
    strobe_cooldown: u64,
}

fn analyze(config: Option<PathBuf>, duration: f64) -> anyhow::Result<()> {
    if !duration.is_finite() || duration <= 0.0 {
        anyhow::bail!("duration must be positive, got {}", duration);
    }

    let settings = load_settings(config)?;
    let fixtures = validate_startup(&settings, true, &FixtureLibrary::new())?;
    let mut pipeline = build_pipeline(&settings, &fixtures, true);
    let orchestrator = &mut pipeline.orchestrator;

    let stop = orchestrator.stop_handle();
    spawn_signal_listener(move || stop.stop())?;
    let stop = orchestrator.stop_handle();

    if let Err(e) = orchestrator.start() {
        orchestrator.stop();
        return Err(e.into());
    }

    let period = Duration::from_secs_f64(1.0 / orchestrator.target_fps());
    let deadline = Instant::now() + Duration::from_secs_f64(duration);
    let mut stage_totals: BTreeMap<String, Duration> = BTreeMap::new();
    let mut safety = SafetyCounts::default();
    let mut frame_times = Vec::new();
    let mut bpm = 0.0;

    println!("Analyzing mock pipeline for {:.1}s...", duration);
    while Instant::now() < deadline && !stop.is_stopped() {
        let started = Instant::now();
        let state = orchestrator.step();

        for (stage, elapsed) in &state.processing_times {
            *stage_totals.entry(stage.clone()).or_default() += *elapsed;
        }
        if !state.safety.ok {
            safety.not_ok += 1;
        }
        if state.safety.degraded {
            safety.degraded += 1;
        }
        if state.safety.strobe_cooldown {
            safety.strobe_cooldown += 1;
        }
        bpm = state.fused_bpm;

        frame_times.push(started.elapsed());
        sleep_until(started + period, settings.runtime.hybrid_pacing);
    }
    orchestrator.stop();

    let frames = frame_times.len().max(1) as u32;
    let total: Duration = frame_times.iter().sum();
    let worst = frame_times.iter().max().copied().unwrap_or_default();

    println!();
    println!("Frames:           {}", frame_times.len());
    println!("Fused BPM:        {:.1}", bpm);
    println!("Mean frame time:  {:.3} ms", (total / frames).as_secs_f64() * 1000.0);
    println!("Worst frame time: {:.3} ms", worst.as_secs_f64() * 1000.0);
    println!("Frame budget:     {:.3} ms", period.as_secs_f64() * 1000.0);
    println!();
    println!("Per stage (mean):");
    for (stage, elapsed) in &stage_totals {
        println!(
            "  {:<22} {:.3} ms",
            stage,
            (*elapsed / frames).as_secs_f64() * 1000.0
        );
    }
    println!();
    println!("Safety:");
    println!("  frames not ok:        {}", safety.not_ok);
    println!("  degraded frames:      {}", safety.degraded);
    println!("  strobe cooldown:      {}", safety.strobe_cooldown);
    println!("  emergency stop:       {}", pipeline.emergency_stop.is_active());
    Ok(())
}
