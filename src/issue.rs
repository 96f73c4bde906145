//! Issue Assembler.
//!
//! The only place externally visible results are produced. A change record
//! becomes an `Issue` when it is not `unchanged` and every track behind it is
//! confirmed with at least `persist_n` detections.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::classify::{ChangeClass, ChangeRecord, CropSource, Pass, Severity};
use crate::config::EvidenceSettings;
use crate::detect::ElementType;
use crate::evidence::{persist_evidence, BlobSink};
use crate::track::Track;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Confirmed,
    Dismissed,
}

impl IssueStatus {
    /// Map a reviewer feedback label. Used by the surrounding application;
    /// the pipeline never changes an issue's status.
    pub fn from_feedback(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "confirm" | "confirmed" => Some(Self::Confirmed),
            "false_positive" | "dismiss" | "dismissed" => Some(Self::Dismissed),
            "open" | "reopen" => Some(Self::Open),
            _ => None,
        }
    }
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::Open
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub element: ElementType,
    pub issue_type: ChangeClass,
    pub severity: Severity,
    pub confidence: f32,
    pub first_frame: u32,
    pub last_frame: u32,
    /// Blob reference of the base-pass evidence crop, if it was persisted.
    pub base_crop: Option<String>,
    pub present_crop: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub status: IssueStatus,
}

fn new_issue_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("iss-{}", hex::encode(bytes))
}

pub struct IssueAssembler<'a> {
    settings: &'a EvidenceSettings,
    sink: &'a dyn BlobSink,
    persist_n: usize,
}

impl<'a> IssueAssembler<'a> {
    pub fn new(settings: &'a EvidenceSettings, sink: &'a dyn BlobSink, persist_n: usize) -> Self {
        Self {
            settings,
            sink,
            persist_n,
        }
    }

    /// Whether a record passes the persistence filter.
    pub fn is_reportable(&self, record: &ChangeRecord) -> bool {
        if record.classification == ChangeClass::Unchanged {
            return false;
        }
        let persistent = |t: &Track| t.confirmed && t.len() >= self.persist_n;
        let tracks = [record.base_track.as_ref(), record.present_track.as_ref()];
        tracks.iter().any(Option::is_some) && tracks.iter().flatten().all(|t| persistent(*t))
    }

    /// Turn change records into issues, highest severity first.
    pub fn assemble(&self, records: &[ChangeRecord], frames: &dyn CropSource) -> Vec<Issue> {
        let mut issues: Vec<Issue> = records
            .iter()
            .filter(|r| self.is_reportable(r))
            .filter_map(|r| self.build(r, frames))
            .collect();
        issues.sort_by_key(|i| (i.severity, i.first_frame));
        issues
    }

    fn build(&self, record: &ChangeRecord, frames: &dyn CropSource) -> Option<Issue> {
        let primary = record.primary_track()?;
        let detection = primary.first_detection()?;
        let element = primary.element_type;

        // The counterpart pass is cropped at its own track's first occurrence
        // when there is one, otherwise at the primary's frame and box.
        let (base_at, present_at) = {
            let own = |t: Option<&Track>| {
                t.and_then(|t| t.first_detection())
                    .map(|d| (d.frame_index, d.bbox))
                    .unwrap_or((detection.frame_index, detection.bbox))
            };
            (own(record.base_track.as_ref()), own(record.present_track.as_ref()))
        };

        let base_crop = self.persist(frames, Pass::Base, base_at.0, &base_at.1, element);
        let present_crop = self.persist(frames, Pass::Present, present_at.0, &present_at.1, element);

        Some(Issue {
            id: new_issue_id(),
            element,
            issue_type: record.classification,
            severity: record.severity,
            confidence: record.confidence,
            first_frame: primary.first_frame,
            last_frame: primary.last_frame,
            base_crop,
            present_crop,
            reason: record.reason.clone(),
            status: IssueStatus::Open,
        })
    }

    fn persist(
        &self,
        frames: &dyn CropSource,
        pass: Pass,
        frame_index: u32,
        bbox: &crate::geometry::BBox,
        element: ElementType,
    ) -> Option<String> {
        let Some(image) = frames.frame(pass, frame_index) else {
            log::warn!(
                "IssueAssembler: {:?} frame {} unavailable for {} evidence",
                pass,
                frame_index,
                element
            );
            return None;
        };
        match persist_evidence(self.sink, image, bbox, self.settings) {
            Ok(reference) => Some(reference),
            Err(e) => {
                log::warn!(
                    "IssueAssembler: {} evidence at {:?} frame {}: {}",
                    element,
                    pass,
                    frame_index,
                    e
                );
                None
            }
        }
    }
}
