//! Audio artifact sink
//!
//! The service returns bare PCM (16-bit, mono, 24 kHz), which is wrapped in a
//! WAV container. Payloads that already carry a container are stored as-is:
//! RIFF/WAVE as `NN.wav`, MP3 (ID3 tag or MPEG frame sync) as `NN.mp3`.
//!
//! `merge_wavs` joins finished chunks into a single file.

use std::future::Future;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use batch_runner::{ArtifactSink, SinkError};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::Error;

pub const PCM_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioFormat {
    Wav,
    Mp3,
    RawPcm,
}

fn detect(audio: &[u8]) -> AudioFormat {
    let head = &audio[..audio.len().min(12)];
    if head.starts_with(b"RIFF") && head.windows(4).any(|w| w == b"WAVE") {
        AudioFormat::Wav
    } else if head.starts_with(b"ID3") || head.starts_with(&[0xFF, 0xFB]) {
        AudioFormat::Mp3
    } else {
        AudioFormat::RawPcm
    }
}

/// Writes one audio file per unit into a directory, named by sequence number.
#[derive(Debug, Clone)]
pub struct WavSink {
    dir: PathBuf,
}

impl WavSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the WAV artifact for unit `seq` is written.
    pub fn wav_path(&self, seq: u32) -> PathBuf {
        self.dir.join(format!("{seq:02}.wav"))
    }

    async fn write(&self, seq: u32, audio: Bytes) -> Result<PathBuf, SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let format = detect(&audio);
        let path = match format {
            AudioFormat::Mp3 => self.dir.join(format!("{seq:02}.mp3")),
            AudioFormat::Wav | AudioFormat::RawPcm => self.wav_path(seq),
        };

        let len = audio.len();
        match format {
            AudioFormat::Wav | AudioFormat::Mp3 => tokio::fs::write(&path, &audio).await?,
            AudioFormat::RawPcm => {
                let target = path.clone();
                tokio::task::spawn_blocking(move || write_pcm_wav(&target, &audio))
                    .await
                    .map_err(|e| SinkError::Encode(format!("encoder task failed: {e}")))??;
            }
        }

        debug!(unit = seq, path = %path.display(), ?format, bytes = len, "artifact written");
        Ok(path)
    }
}

/// Wrap little-endian 16-bit mono PCM in a WAV container. A trailing odd
/// byte is dropped.
fn write_pcm_wav(path: &Path, pcm: &[u8]) -> Result<(), SinkError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: PCM_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode = |e: hound::Error| SinkError::Encode(e.to_string());

    let mut writer = hound::WavWriter::create(path, spec).map_err(encode)?;
    for sample in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(encode)?;
    }
    writer.finalize().map_err(encode)
}

impl ArtifactSink for WavSink {
    fn materialize<'a>(
        &'a self,
        seq: u32,
        audio: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, SinkError>> + Send + 'a>> {
        Box::pin(self.write(seq, audio))
    }
}

/// Concatenate WAV files in order into `out`, returning how many were joined.
///
/// Missing files are skipped with a warning. Every input must share the
/// format of the first one present. Blocking; run on the blocking pool.
pub fn merge_wavs(files: &[PathBuf], out: &Path) -> crate::error::Result<usize> {
    let present: Vec<&PathBuf> = files
        .iter()
        .filter(|file| {
            let exists = file.exists();
            if !exists {
                warn!(path = %file.display(), "chunk missing, leaving it out of the merge");
            }
            exists
        })
        .collect();
    let Some(first) = present.first() else {
        return Err(Error::NothingToMerge);
    };

    let spec = hound::WavReader::open(first)?.spec();
    let mut writer = hound::WavWriter::create(out, spec)?;
    for file in &present {
        let reader = hound::WavReader::open(file)?;
        if reader.spec() != spec {
            return Err(Error::MergeFormatMismatch(file.to_path_buf()));
        }
        match spec.sample_format {
            hound::SampleFormat::Int => copy_samples::<i32, _, _>(reader, &mut writer)?,
            hound::SampleFormat::Float => copy_samples::<f32, _, _>(reader, &mut writer)?,
        }
    }
    writer.finalize()?;

    info!(path = %out.display(), chunks = present.len(), "chunks merged");
    Ok(present.len())
}

fn copy_samples<S, R, W>(
    reader: hound::WavReader<R>,
    writer: &mut hound::WavWriter<W>,
) -> hound::Result<()>
where
    S: hound::Sample,
    R: Read,
    W: Write + Seek,
{
    for sample in reader.into_samples::<S>() {
        writer.write_sample(sample?)?;
    }
    Ok(())
}
