//! Optional WAV capture of the engine's output.
//!
//! Samples go to a staging file next to the target. `finalize` moves it into
//! place; `discard` deletes it. Two sessions recording to the same path never
//! share a file handle.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{DenoiseError, Result};

/// Writes processed audio as 16-bit PCM mono at the engine rate.
pub struct WavRecorder {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    staging: PathBuf,
    samples: u64,
}

impl WavRecorder {
    /// `tag` distinguishes concurrent recorders aimed at the same `path`.
    pub fn create(path: &Path, sample_rate: u32, tag: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let staging = staging_path(path, tag);
        let writer = WavWriter::create(
            &staging,
            WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        )
        .map_err(wav_error)?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            staging,
            samples: 0,
        })
    }

    /// Samples outside [-1, 1] are clipped.
    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        for sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            self.writer.write_sample(pcm).map_err(wav_error)?;
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Patch the header and move the file to `path`. Returns the samples written.
    pub fn finalize(self) -> Result<u64> {
        self.writer.finalize().map_err(wav_error)?;
        std::fs::rename(&self.staging, &self.path)?;
        Ok(self.samples)
    }

    /// Close and delete the staging file; `path` is left untouched.
    pub fn discard(self) -> Result<()> {
        self.writer.finalize().map_err(wav_error)?;
        std::fs::remove_file(&self.staging)?;
        Ok(())
    }
}

fn staging_path(path: &Path, tag: u64) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording.wav".into());
    path.with_file_name(format!(".{name}.{}-{tag}.part", std::process::id()))
}

fn wav_error(e: hound::Error) -> DenoiseError {
    match e {
        hound::Error::IoError(io) => DenoiseError::Io(io),
        other => DenoiseError::Other(anyhow::anyhow!("wav: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_readable_mono_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.wav");

        let mut recorder = WavRecorder::create(&path, 48_000, 1).unwrap();
        recorder.write(&[0.0, 0.5, -1.0, 2.0]).unwrap();
        assert_eq!(recorder.path(), path.as_path());
        assert!(!path.exists(), "target appears only on finalize");
        assert_eq!(recorder.finalize().unwrap(), 4);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, [0, 16383, -32767, 32767]);
    }

    #[test]
    fn discarded_recorder_leaves_existing_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut kept = WavRecorder::create(&path, 48_000, 1).unwrap();
        let mut stale = WavRecorder::create(&path, 48_000, 2).unwrap();
        kept.write(&[0.25; 8]).unwrap();
        stale.write(&[-0.5; 3]).unwrap();
        assert_eq!(kept.finalize().unwrap(), 8);
        stale.discard().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, [8191; 8]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
