//! Deterministic synthetic inputs for tests and demos.
//!
//! Rendered road scenes, an in-memory frame source and a detector that
//! replays scripted detections. Nothing in the production pipeline reaches
//! this module; callers inject these through the same traits as the real
//! implementations.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::classify::ChangeClass;
use crate::detect::{Detection, ElementDetector, ElementType};
use crate::error::{DetectorError, PipelineError};
use crate::evaluate::GroundTruthLabel;
use crate::frame::Frame;
use crate::geometry::BBox;
use crate::ingest::{FrameStream, SourceOpener};

pub const SCENE_WIDTH: u32 = 640;
pub const SCENE_HEIGHT: u32 = 360;
/// Frames per pass written by `sample_passes`.
pub const SAMPLE_FRAMES: usize = 60;
/// Base frames `0..SIGN_FRAMES` show the sign.
pub const SIGN_FRAMES: usize = 40;

const ASPHALT: u8 = 70;
const TEXTURE_AMPLITUDE: i16 = 6;
const SIGN_GREEN: Rgb<u8> = Rgb([50, 200, 50]);
const PAINT: Rgb<u8> = Rgb([240, 240, 240]);
const WORN_PAINT: Rgb<u8> = Rgb([150, 150, 150]);

pub fn sign_box() -> BBox {
    BBox::new(200.0, 200.0, 260.0, 260.0)
}

pub fn lane_box() -> BBox {
    BBox::new(100.0, 295.0, 540.0, 305.0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneStyle {
    Solid,
    /// Paint alternating with worn patches, pixel by pixel.
    Faded,
    Absent,
}

#[derive(Clone, Debug)]
pub struct SceneSpec {
    pub sign: bool,
    pub lane: LaneStyle,
    /// Seed of the asphalt texture. Same seed, same pixels.
    pub texture_seed: u64,
}

impl Default for SceneSpec {
    fn default() -> Self {
        Self {
            sign: true,
            lane: LaneStyle::Solid,
            texture_seed: 7,
        }
    }
}

/// Render a 640x360 road scene: textured asphalt, an optional green sign
/// board, and a lane marking.
pub fn render_scene(spec: &SceneSpec) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(spec.texture_seed);
    let mut img = RgbImage::from_fn(SCENE_WIDTH, SCENE_HEIGHT, |_, _| {
        let v = (ASPHALT as i16 + rng.gen_range(-TEXTURE_AMPLITUDE..=TEXTURE_AMPLITUDE)) as u8;
        Rgb([v, v, v])
    });
    if spec.sign {
        fill_box(&mut img, &sign_box(), |_, _| SIGN_GREEN);
    }
    match spec.lane {
        LaneStyle::Solid => fill_box(&mut img, &lane_box(), |_, _| PAINT),
        LaneStyle::Faded => fill_box(&mut img, &lane_box(), |x, y| {
            if (x + y) % 2 == 0 {
                PAINT
            } else {
                WORN_PAINT
            }
        }),
        LaneStyle::Absent => {}
    }
    img
}

fn fill_box(img: &mut RgbImage, bbox: &BBox, colour: impl Fn(u32, u32) -> Rgb<u8>) {
    let Some((x0, y0, w, h)) = bbox.pixel_rect(img.width(), img.height()) else {
        return;
    };
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            img.put_pixel(x, y, colour(x, y));
        }
    }
}

/// The sample job: the sign disappears after base frame 39 and never shows
/// in the present pass, whose lane marking is worn.
pub fn sample_passes(frames: usize) -> (Vec<RgbImage>, Vec<RgbImage>) {
    let base = (0..frames)
        .map(|i| {
            render_scene(&SceneSpec {
                sign: i < SIGN_FRAMES,
                ..SceneSpec::default()
            })
        })
        .collect();
    let present_frame = render_scene(&SceneSpec {
        sign: false,
        lane: LaneStyle::Faded,
        ..SceneSpec::default()
    });
    (base, vec![present_frame; frames])
}

pub fn sample_labels() -> Vec<GroundTruthLabel> {
    vec![
        GroundTruthLabel {
            element: ElementType::SignBoard,
            issue_type: ChangeClass::Missing,
        },
        GroundTruthLabel {
            element: ElementType::LaneMarking,
            issue_type: ChangeClass::Faded,
        },
    ]
}

/// Write frames as `frame_0000.png`, `frame_0001.png`, ... under `dir`.
pub fn write_sequence(dir: &Path, frames: &[RgbImage]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("frame_{i:04}.png"));
        frame
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// In-memory source
// ----------------------------------------------------------------------------

pub struct MemoryStream {
    frames: VecDeque<RgbImage>,
    fps: f64,
}

impl FrameStream for MemoryStream {
    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}

/// Serves registered frame lists by locator.
#[derive(Default)]
pub struct MemoryOpener {
    sources: HashMap<String, (Vec<RgbImage>, f64)>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: &str, frames: Vec<RgbImage>, fps: f64) {
        self.sources.insert(locator.to_string(), (frames, fps));
    }
}

impl SourceOpener for MemoryOpener {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameStream>, PipelineError> {
        let (frames, fps) = self
            .sources
            .get(locator)
            .ok_or_else(|| PipelineError::unreadable(locator, "unknown in-memory source"))?;
        Ok(Box::new(MemoryStream {
            frames: frames.iter().cloned().collect(),
            fps: *fps,
        }))
    }
}

// ----------------------------------------------------------------------------
// Scripted detector
// ----------------------------------------------------------------------------

/// Replays detections keyed by `(source locator, frame index)`.
#[derive(Default)]
pub struct ScriptedDetector {
    script: HashMap<(String, u32), Vec<Detection>>,
    failing: HashSet<(String, u32)>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: &str, frame_index: u32, element: ElementType, bbox: BBox, confidence: f32) {
        self.script
            .entry((source.to_string(), frame_index))
            .or_default()
            .push(Detection::new(element, bbox, confidence, frame_index));
    }

    /// Script the same detection on every frame of `frames`.
    pub fn add_span(
        &mut self,
        source: &str,
        frames: std::ops::Range<u32>,
        element: ElementType,
        bbox: BBox,
        confidence: f32,
    ) {
        for frame_index in frames {
            self.add(source, frame_index, element, bbox, confidence);
        }
    }

    /// Make inference fail on one frame.
    pub fn fail_on(&mut self, source: &str, frame_index: u32) {
        self.failing.insert((source.to_string(), frame_index));
    }
}

impl ElementDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let key = (frame.source_id.clone(), frame.index);
        if self.failing.contains(&key) {
            return Err(DetectorError::Inference(format!("scripted failure on frame {}", frame.index)));
        }
        Ok(self.script.get(&key).cloned().unwrap_or_default())
    }
}
