//! Media probing and extraction via the bundled ffmpeg/ffprobe binaries.

use std::path::Path;
use std::process::Command;

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::FfmpegEvent;
use ffmpeg_sidecar::ffprobe::ffprobe_path;
use serde::Deserialize;
use tokio::task;
use tracing::{debug, info};

use crate::error::PipelineError;

/// File-name pattern for extracted key frames. With `-frame_pts` the frame
/// number embedded in each name is the source presentation timestamp in
/// frames, which the slide scanner parses back into seconds.
pub const KEYFRAME_PATTERN: &str = "keyframe_%05d.jpg";

/// Frame-count and rate summary of a probed video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStatistics {
    pub total_frames: u64,
    pub frame_rate: f64,
}

impl VideoStatistics {
    pub fn duration_secs(&self) -> f64 {
        if self.frame_rate <= 0.0 {
            return 0.0;
        }
        self.total_frames as f64 / self.frame_rate
    }
}

/// Probe `input` with ffprobe and return its video stream statistics.
pub async fn video_statistics(input: &Path) -> Result<VideoStatistics, PipelineError> {
    let path = input.to_path_buf();
    let display = input.display().to_string();
    task::spawn_blocking(move || probe_statistics(&path))
        .await
        .map_err(|_| PipelineError::Probe {
            path: display,
            message: "probe task panicked".into(),
        })?
}

/// Decode only the key frames of `input` into `out_dir` as
/// [`KEYFRAME_PATTERN`] JPEG files, returning how many were produced.
///
/// Zero decoded frames is an error: an unreadable or frameless input must
/// fail the job rather than produce an empty slide set.
pub async fn extract_key_frames(input: &Path, out_dir: &Path) -> Result<usize, PipelineError> {
    tokio::fs::create_dir_all(out_dir).await?;
    let display = input.display().to_string();
    let input = input.to_path_buf();
    let out = out_dir.to_path_buf();

    let produced = task::spawn_blocking(move || -> Result<usize, PipelineError> {
        let pattern = out.join(KEYFRAME_PATTERN);
        FfmpegCommand::new()
            .hide_banner()
            .overwrite()
            .args(["-skip_frame", "nokey"])
            .input(input.to_string_lossy().as_ref())
            .args(["-vsync", "0", "-frame_pts", "1"])
            .output(pattern.to_string_lossy().as_ref())
            .print_command()
            .spawn()
            .map_err(|e| ffmpeg_err("key-frame extraction", e))?
            .iter()
            .map_err(|e| ffmpeg_err("key-frame extraction", e))?
            .for_each(|event| {
                if let FfmpegEvent::Log(level, msg) = event {
                    debug!("[ffmpeg {:?}] {}", level, msg);
                }
            });

        let mut produced = 0;
        for entry in std::fs::read_dir(&out)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with("keyframe_") {
                produced += 1;
            }
        }
        Ok(produced)
    })
    .await
    .map_err(|_| PipelineError::Ffmpeg {
        operation: "key-frame extraction".into(),
        message: "task panicked".into(),
    })??;

    if produced == 0 {
        return Err(PipelineError::NoFrames { path: display });
    }
    info!(frames = produced, "key frames extracted");
    Ok(produced)
}

/// Extract the audio track of `input` as a mono 16 kHz signed-16-bit WAV,
/// the layout the speech models expect.
pub async fn extract_audio(input: &Path, wav_out: &Path) -> Result<(), PipelineError> {
    let input = input.to_path_buf();
    let wav = wav_out.to_path_buf();

    task::spawn_blocking(move || -> Result<(), PipelineError> {
        FfmpegCommand::new()
            .hide_banner()
            .overwrite()
            .input(input.to_string_lossy().as_ref())
            .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
            .output(wav.to_string_lossy().as_ref())
            .print_command()
            .spawn()
            .map_err(|e| ffmpeg_err("audio extraction", e))?
            .iter()
            .map_err(|e| ffmpeg_err("audio extraction", e))?
            .for_each(|event| {
                if let FfmpegEvent::Log(level, msg) = event {
                    debug!("[ffmpeg {:?}] {}", level, msg);
                }
            });

        let size = std::fs::metadata(&wav).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(PipelineError::Ffmpeg {
                operation: "audio extraction".into(),
                message: format!("no audio written to '{}'", wav.display()),
            });
        }
        Ok(())
    })
    .await
    .map_err(|_| PipelineError::Ffmpeg {
        operation: "audio extraction".into(),
        message: "task panicked".into(),
    })?
}

// ── ffprobe ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

fn probe_statistics(path: &Path) -> Result<VideoStatistics, PipelineError> {
    let output = Command::new(ffprobe_path())
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=nb_frames,r_frame_rate,duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| probe_err(path, format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(probe_err(path, stderr.trim().to_owned()));
    }

    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| probe_err(path, format!("unreadable ffprobe output: {e}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| probe_err(path, "no video stream".into()))?;

    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_ratio)
        .filter(|r| *r > 0.0)
        .ok_or_else(|| probe_err(path, "missing or zero frame rate".into()))?;

    // Some containers omit nb_frames; fall back to duration * rate.
    let total_frames = match stream.nb_frames.as_deref().and_then(|s| s.parse::<u64>().ok()) {
        Some(n) if n > 0 => n,
        _ => {
            let duration = stream
                .duration
                .as_deref()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|d| *d > 0.0)
                .ok_or_else(|| probe_err(path, "missing frame count and duration".into()))?;
            (duration * frame_rate).round() as u64
        }
    };

    Ok(VideoStatistics {
        total_frames,
        frame_rate,
    })
}

/// Parse ffprobe's ratio form (`"30000/1001"`) or a plain decimal rate.
fn parse_ratio(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => s.trim().parse().ok(),
    }
}

fn ffmpeg_err(operation: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Ffmpeg {
        operation: operation.to_owned(),
        message: e.to_string(),
    }
}

fn probe_err(path: &Path, message: String) -> PipelineError {
    PipelineError::Probe {
        path: path.display().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parses_ntsc_rate() {
        let rate = parse_ratio("30000/1001").expect("ratio should parse");
        assert!((rate - 29.97).abs() < 0.01);
    }

    #[test]
    fn ratio_parses_plain_decimal() {
        assert_eq!(parse_ratio("25"), Some(25.0));
    }

    #[test]
    fn ratio_rejects_zero_denominator() {
        assert_eq!(parse_ratio("30/0"), None);
    }

    #[test]
    fn duration_uses_frame_rate() {
        let stats = VideoStatistics {
            total_frames: 1800,
            frame_rate: 30.0,
        };
        assert!((stats.duration_secs() - 60.0).abs() < f64::EPSILON);
    }
}
