use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use stride::{
    body::{Skeleton, SkeletonOptions},
    playback::{PlaybackController, Recording, Speed},
    stream::{ConnectionStatus, StreamHandle, StreamOptions},
    timer::Timer,
};

/// Display refresh interval the headless replay is driven with.
const REFRESH: Duration = Duration::from_micros(16_667);

#[derive(Parser)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plays a recording back once and logs the reconstructed joint angles.
    Replay {
        recording: PathBuf,
        /// Playback speed (0.5, 1 or 2).
        #[arg(long, default_value_t = 1.0, value_parser = parse_speed)]
        speed: f64,
        /// Number of past frames to draw ankle trails from.
        #[arg(long, default_value_t = 40)]
        trail: usize,
    },
    /// Streams a recording to a phase service at its recorded timing.
    Stream {
        recording: PathBuf,
        /// WebSocket URL of the phase service.
        #[arg(long)]
        url: String,
        #[arg(long)]
        patient: String,
        #[arg(long)]
        user: String,
        /// Maximum number of frames sent per second.
        #[arg(long, default_value_t = 20.0)]
        max_rate: f32,
    },
}

fn parse_speed(s: &str) -> Result<f64, String> {
    let factor: f64 = s.parse().map_err(|e| format!("{e}"))?;
    match Speed::ALL.iter().find(|speed| speed.factor() == factor) {
        Some(speed) => Ok(speed.factor()),
        None => Err(format!("unsupported speed {factor}, expected 0.5, 1 or 2")),
    }
}

fn main() -> anyhow::Result<()> {
    stride::init_logger!();

    let args = Args::parse();
    match args.command {
        Command::Replay {
            recording,
            speed,
            trail,
        } => replay(Recording::load(recording)?, speed, trail),
        Command::Stream {
            recording,
            url,
            patient,
            user,
            max_rate,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            let options = StreamOptions::new(url).max_send_rate(max_rate);
            rt.block_on(stream(Recording::load(recording)?, options, &patient, &user))
        }
    }
}

fn replay(recording: Recording, speed: f64, trail: usize) -> anyhow::Result<()> {
    let speed = Speed::ALL
        .into_iter()
        .find(|s| s.factor() == speed)
        .unwrap_or_default();
    let duration = recording.duration();
    log::info!(
        "replaying {} frames ({duration:.2}s) at {}x",
        recording.frames.len(),
        speed.factor(),
    );

    let options = SkeletonOptions::default().trail_capacity(trail);
    let mut playback = PlaybackController::from_recording(recording, options)?;
    playback.set_speed(speed);
    playback.set_autoplay(true);

    let t_reconstruct = Timer::new("reconstruct");
    let mut last_index = None;
    let mut failures = 0;
    loop {
        let index = playback.cursor_index();
        if index != last_index {
            let result = {
                let _guard = t_reconstruct.start();
                playback.skeleton()
            };
            match result {
                Some(Ok(skeleton)) => log_skeleton(&skeleton, &playback),
                Some(Err(e)) => {
                    log::debug!("frame {index:?} skipped: {e}");
                    failures += 1;
                }
                None => {}
            }
        }

        let before = playback.cursor_time().unwrap_or(0.0);
        playback.advance(REFRESH);
        let after = playback.cursor_time().unwrap_or(0.0);
        if after < before || duration <= 0.0 {
            break;
        }
        last_index = index;
    }
    playback.stop();

    log::info!("{t_reconstruct}, {failures} frame(s) could not be reconstructed");
    Ok(())
}

fn log_skeleton(skeleton: &Skeleton, playback: &PlaybackController) {
    let phase = playback
        .current_phase_at(skeleton.time)
        .map_or("-", |phase| phase.as_str());
    let angle = |name: &str| {
        skeleton
            .angle(name)
            .map_or_else(|| "-".to_string(), |a| format!("{:.0}°", a.to_degrees()))
    };
    log::debug!(
        "{:7.3}s {phase:<12} knees {}/{} hips {}/{} com y={:.2}",
        skeleton.time,
        angle("left knee"),
        angle("right knee"),
        angle("left hip"),
        angle("right hip"),
        skeleton.center_of_mass.y,
    );
}

async fn stream(
    recording: Recording,
    options: StreamOptions,
    patient: &str,
    user: &str,
) -> anyhow::Result<()> {
    let Some(first) = recording.frames.first() else {
        bail!("recording contains no frames");
    };
    let start_time = first.time;

    let handle = StreamHandle::connect(options)
        .await
        .context("failed to connect to phase service")?;
    let mut state = handle.subscribe();
    state
        .wait_for(|s| s.connection == ConnectionStatus::Open)
        .await?;
    handle.start_test(patient, user).await?;
    log::info!("session {} started", handle.id());

    let start = tokio::time::Instant::now();
    for frame in recording.frames {
        let due = start + Duration::from_secs_f64((frame.time - start_time).max(0.0));
        tokio::time::sleep_until(due).await;
        if let ConnectionStatus::Disconnected(reason) = &handle.state().connection {
            bail!("connection lost: {reason}");
        }
        handle.send_frame(frame);
    }

    handle.stop_test().await?;
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        state.wait_for(|s| s.result.is_some()).await.map(|s| s.clone())
    })
    .await;

    match result {
        Ok(Ok(state)) => {
            if let Some(result) = &state.result {
                log::info!(
                    "test completed in {:.2}s (walk speed {:?} m/s, {})",
                    result.total_time_seconds,
                    result.walk_speed_mps,
                    result.assessment.as_deref().unwrap_or("no assessment"),
                );
            }
            for t in &state.phase.transitions {
                log::info!("{:<12} {:.2}s .. {:?}", t.phase.as_str(), t.start, t.end);
            }
        }
        Ok(Err(_)) => log::warn!("connection closed before a result arrived"),
        Err(_) => log::warn!("no result received within 10s"),
    }
    log::info!("{} frame(s) dropped", handle.dropped_frames());

    handle.close().await;
    Ok(())
}
