//! Frame Source Reader: decimation, blur gate, enhancement.

use std::time::Duration;

use super::quality::{enhance, is_blurry, measure_sharpness};
use super::source::{FrameStream, SourceOpener};
use crate::config::{QualitySettings, SamplingSettings};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::imaging;

/// Counters for one pass over a source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReaderStats {
    /// Frames decoded from the stream.
    pub decoded: u64,
    /// Frames selected by the sampling interval.
    pub sampled: u64,
    /// Sampled frames dropped by the blur gate.
    pub rejected_blurry: u64,
    /// Frames emitted.
    pub accepted: u64,
}

#[derive(Debug)]
pub struct SampledFrames {
    pub frames: Vec<Frame>,
    pub stats: ReaderStats,
}

#[derive(Clone, Debug)]
pub struct FrameReader {
    sampling: SamplingSettings,
    quality: QualitySettings,
}

impl FrameReader {
    pub fn new(sampling: SamplingSettings, quality: QualitySettings) -> Self {
        Self { sampling, quality }
    }

    /// Keep every `interval`-th decoded frame so the output approximates the
    /// target rate.
    pub fn sampling_interval(native_fps: f64, target_fps: f64) -> u64 {
        if !(native_fps.is_finite() && native_fps > 0.0 && target_fps > 0.0) {
            return 1;
        }
        ((native_fps / target_fps).round() as u64).max(1)
    }

    pub fn read(
        &self,
        opener: &dyn SourceOpener,
        locator: &str,
    ) -> Result<SampledFrames, PipelineError> {
        let stream = opener.open(locator)?;
        self.read_stream(locator, stream)
    }

    pub fn read_stream(
        &self,
        locator: &str,
        mut stream: Box<dyn FrameStream>,
    ) -> Result<SampledFrames, PipelineError> {
        let native_fps = stream.native_fps();
        let interval = Self::sampling_interval(native_fps, self.sampling.sample_rate);
        let mut stats = ReaderStats::default();
        let mut frames = Vec::new();

        while frames.len() < self.sampling.max_frames {
            let pixels = match stream.next_frame() {
                Ok(Some(pixels)) => pixels,
                Ok(None) => break,
                Err(e) if stats.decoded == 0 => {
                    return Err(PipelineError::unreadable(locator, format!("{e:#}")));
                }
                Err(e) => {
                    log::warn!(
                        "FrameReader: {} stopped decoding after frame {}: {:#}",
                        locator,
                        stats.decoded,
                        e
                    );
                    break;
                }
            };
            let source_index = stats.decoded;
            stats.decoded += 1;
            if source_index % interval != 0 {
                continue;
            }
            stats.sampled += 1;

            let score = measure_sharpness(&imaging::to_gray(&pixels));
            if is_blurry(&score, &self.quality) {
                stats.rejected_blurry += 1;
                log::debug!(
                    "FrameReader: {} frame {} rejected as blurry (laplacian {:.1}, sobel {:.1})",
                    locator,
                    source_index,
                    score.laplacian_var,
                    score.sobel_var
                );
                continue;
            }

            let pixels = if self.quality.enhance {
                enhance(&pixels, &score, &self.quality)
            } else {
                pixels
            };
            let timestamp = if native_fps.is_finite() && native_fps > 0.0 {
                Duration::from_secs_f64(source_index as f64 / native_fps)
            } else {
                Duration::ZERO
            };
            frames.push(Frame::new(
                frames.len() as u32,
                source_index,
                locator,
                timestamp,
                pixels,
            ));
        }
        stats.accepted = frames.len() as u64;

        if frames.is_empty() {
            return Err(PipelineError::NoUsableFrames {
                locator: locator.to_string(),
                decoded: stats.decoded,
                rejected: stats.rejected_blurry,
            });
        }
        log::info!(
            "FrameReader: {} decoded {} frames at {:.2} fps, interval {}, accepted {} ({} blurry)",
            locator,
            stats.decoded,
            native_fps,
            interval,
            stats.accepted,
            stats.rejected_blurry
        );
        Ok(SampledFrames { frames, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use anyhow::Result;
    use image::{Rgb, RgbImage};

    struct ScriptedStream {
        fps: f64,
        frames: Vec<Option<RgbImage>>,
        fail_at: Option<usize>,
        pos: usize,
    }

    impl FrameStream for ScriptedStream {
        fn native_fps(&self) -> f64 {
            self.fps
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.fail_at == Some(self.pos) {
                anyhow::bail!("corrupt packet");
            }
            let next = self.frames.get(self.pos).cloned().flatten();
            self.pos += 1;
            Ok(next)
        }
    }

    fn textured(seed: u32) -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| {
            let v = if ((x + seed) / 4 + y / 4) % 2 == 0 { 20 } else { 230 };
            Rgb([v, v, v])
        })
    }

    fn reader(max_frames: usize, sample_rate: f64) -> FrameReader {
        let mut cfg = PipelineConfig::default();
        cfg.sampling.max_frames = max_frames;
        cfg.sampling.sample_rate = sample_rate;
        cfg.quality.enhance = false;
        FrameReader::new(cfg.sampling, cfg.quality)
    }

    fn stream(count: usize, fps: f64) -> Box<dyn FrameStream> {
        Box::new(ScriptedStream {
            fps,
            frames: (0..count).map(|i| Some(textured(i as u32))).collect(),
            fail_at: None,
            pos: 0,
        })
    }

    #[test]
    fn interval_rounds_and_never_drops_below_one() {
        assert_eq!(FrameReader::sampling_interval(30.0, 1.0), 30);
        assert_eq!(FrameReader::sampling_interval(29.97, 1.0), 30);
        assert_eq!(FrameReader::sampling_interval(25.0, 2.0), 13);
        assert_eq!(FrameReader::sampling_interval(5.0, 10.0), 1);
        assert_eq!(FrameReader::sampling_interval(0.0, 1.0), 1);
    }

    #[test]
    fn decimates_and_indexes_accepted_frames() -> Result<()> {
        let out = reader(100, 1.0).read_stream("mem", stream(95, 30.0))?;
        let sources: Vec<u64> = out.frames.iter().map(|f| f.source_index).collect();
        assert_eq!(sources, vec![0, 30, 60, 90]);
        let indices: Vec<u32> = out.frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(out.frames[2].timestamp, Duration::from_secs(2));
        assert_eq!(out.stats.decoded, 95);
        assert_eq!(out.stats.accepted, 4);
        Ok(())
    }

    #[test]
    fn respects_frame_cap() -> Result<()> {
        let out = reader(3, 30.0).read_stream("mem", stream(50, 30.0))?;
        assert_eq!(out.frames.len(), 3);
        Ok(())
    }

    #[test]
    fn blurry_frames_are_skipped_not_fatal() -> Result<()> {
        let mut frames: Vec<Option<RgbImage>> = (0..4).map(|i| Some(textured(i))).collect();
        frames[1] = Some(RgbImage::from_pixel(32, 32, Rgb([120, 120, 120])));
        let source = Box::new(ScriptedStream {
            fps: 1.0,
            frames,
            fail_at: None,
            pos: 0,
        });
        let out = reader(10, 1.0).read_stream("mem", source)?;
        assert_eq!(out.frames.len(), 3);
        assert_eq!(out.stats.rejected_blurry, 1);
        assert_eq!(out.frames[1].source_index, 2);
        Ok(())
    }

    #[test]
    fn all_blurry_is_no_usable_frames() {
        let source = Box::new(ScriptedStream {
            fps: 1.0,
            frames: vec![Some(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90]))); 5],
            fail_at: None,
            pos: 0,
        });
        let err = reader(10, 1.0).read_stream("mem", source).err();
        assert!(matches!(
            err,
            Some(PipelineError::NoUsableFrames { decoded: 5, rejected: 5, .. })
        ));
    }

    #[test]
    fn failure_before_first_frame_is_unreadable() {
        let source = Box::new(ScriptedStream {
            fps: 1.0,
            frames: vec![],
            fail_at: Some(0),
            pos: 0,
        });
        let err = reader(10, 1.0).read_stream("mem", source).err();
        assert!(matches!(err, Some(PipelineError::SourceUnreadable { .. })));
    }

    #[test]
    fn mid_stream_failure_keeps_decoded_prefix() -> Result<()> {
        let source = Box::new(ScriptedStream {
            fps: 1.0,
            frames: (0..6).map(|i| Some(textured(i))).collect(),
            fail_at: Some(3),
            pos: 0,
        });
        let out = reader(10, 1.0).read_stream("mem", source)?;
        assert_eq!(out.frames.len(), 3);
        Ok(())
    }
}
