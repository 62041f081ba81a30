//! IoU multi-object tracking.
//!
//! Two-pass association in the ByteTrack style: confident detections are
//! matched to every live track first, weaker ones only to tracks left over.
//! New tracks start from unmatched confident detections. A track's box is its
//! last matched box; there is no motion model.

use std::collections::BTreeMap;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, InferenceConfig};
use crate::detect::result::{BoundingBox, LabelVocabulary, RawDetection};

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Minimum IoU between a detection and a track's last box to match.
    pub iou_threshold: f32,
    /// Cycles a track survives without a match.
    pub max_age: u32,
    /// Matches needed before the track id is reported.
    pub min_hits: u32,
    /// Detections at or above this score may start tracks and match first.
    pub high_score: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_age: 30,
            min_hits: 1,
            high_score: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
struct Tracklet {
    bbox: BoundingBox,
    class_index: usize,
    hits: u32,
    steps_since_update: u32,
}

#[derive(Clone, Debug)]
pub struct IouTracker {
    config: TrackerConfig,
    tracklets: BTreeMap<u64, Tracklet>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracklets: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn num_tracklets(&self) -> usize {
        self.tracklets.len()
    }

    /// Forget every track. Ids restart at 1.
    pub fn clear(&mut self) {
        self.tracklets.clear();
        self.next_id = 1;
    }

    /// Assign track ids to one cycle's detections, in place.
    ///
    /// Existing ids on the input are overwritten. Detections matched to a
    /// track with fewer than `min_hits` matches stay unconfirmed.
    pub fn update(&mut self, detections: &mut [RawDetection]) {
        for tracklet in self.tracklets.values_mut() {
            tracklet.steps_since_update += 1;
        }
        for det in detections.iter_mut() {
            det.track_id = None;
        }

        let (high, low): (Vec<usize>, Vec<usize>) = (0..detections.len())
            .partition(|&i| detections[i].confidence >= self.config.high_score);

        let live: Vec<u64> = self.tracklets.keys().copied().collect();
        let (matched, unmatched_high) = self.associate(detections, &high, &live);
        let leftover: Vec<u64> = live
            .iter()
            .copied()
            .filter(|id| !matched.contains(id))
            .collect();
        self.associate(detections, &low, &leftover);

        for idx in unmatched_high {
            let id = self.next_id;
            self.next_id += 1;
            let det = &mut detections[idx];
            self.tracklets.insert(
                id,
                Tracklet {
                    bbox: to_box(det),
                    class_index: det.class_index,
                    hits: 1,
                    steps_since_update: 0,
                },
            );
            if self.config.min_hits <= 1 {
                det.track_id = Some(id as i64);
            }
        }

        let max_age = self.config.max_age;
        self.tracklets
            .retain(|_, t| t.steps_since_update <= max_age);
    }

    /// Greedy highest-IoU-first matching of `candidates` against `tracks`.
    /// Returns the matched track ids and the unmatched candidate indices.
    fn associate(
        &mut self,
        detections: &mut [RawDetection],
        candidates: &[usize],
        tracks: &[u64],
    ) -> (Vec<u64>, Vec<usize>) {
        let mut pairs = Vec::new();
        for &idx in candidates {
            let bbox = to_box(&detections[idx]);
            for &id in tracks {
                let Some(tracklet) = self.tracklets.get(&id) else {
                    continue;
                };
                if tracklet.class_index != detections[idx].class_index {
                    continue;
                }
                let iou = tracklet.bbox.iou(&bbox);
                if iou > self.config.iou_threshold {
                    pairs.push((iou, idx, id));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut matched_tracks = Vec::new();
        let mut matched_dets = Vec::new();
        for (_, idx, id) in pairs {
            if matched_tracks.contains(&id) || matched_dets.contains(&idx) {
                continue;
            }
            let Some(tracklet) = self.tracklets.get_mut(&id) else {
                continue;
            };
            tracklet.bbox = to_box(&detections[idx]);
            tracklet.hits += 1;
            tracklet.steps_since_update = 0;
            if tracklet.hits >= self.config.min_hits {
                detections[idx].track_id = Some(id as i64);
            }
            matched_tracks.push(id);
            matched_dets.push(idx);
        }

        let unmatched = candidates
            .iter()
            .copied()
            .filter(|idx| !matched_dets.contains(idx))
            .collect();
        (matched_tracks, unmatched)
    }
}

fn to_box(det: &RawDetection) -> BoundingBox {
    let [x1, y1, x2, y2] = det.bbox;
    BoundingBox::new(x1, y1, x2, y2)
}

/// Adds an [`IouTracker`] to a detector that has none.
///
/// With `persist_tracks` off, tracker state is dropped before every call, so
/// ids do not carry over between frames.
pub struct TrackingBackend {
    inner: Box<dyn DetectorBackend>,
    tracker: IouTracker,
}

impl TrackingBackend {
    pub fn new(inner: Box<dyn DetectorBackend>, config: TrackerConfig) -> Self {
        Self {
            inner,
            tracker: IouTracker::new(config),
        }
    }

    pub fn tracker(&self) -> &IouTracker {
        &self.tracker
    }
}

impl DetectorBackend for TrackingBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn vocabulary(&self) -> &LabelVocabulary {
        self.inner.vocabulary()
    }

    fn infer_and_track(
        &mut self,
        frame: &RgbImage,
        config: &InferenceConfig,
    ) -> Result<Vec<RawDetection>> {
        let mut detections = self.inner.infer_and_track(frame, config)?;
        if !config.persist_tracks {
            self.tracker.clear();
        }
        self.tracker.update(&mut detections);
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;

    fn det(x: f32, class_index: usize, confidence: f32) -> RawDetection {
        RawDetection::new([x, 10.0, x + 40.0, 50.0], class_index, confidence)
    }

    fn ids(detections: &[RawDetection]) -> Vec<Option<i64>> {
        detections.iter().map(|d| d.track_id).collect()
    }

    #[test]
    fn ids_persist_while_objects_move_slightly() {
        let mut tracker = IouTracker::new(TrackerConfig::default());
        let mut first = vec![det(0.0, 0, 0.9), det(100.0, 0, 0.8)];
        tracker.update(&mut first);
        assert_eq!(ids(&first), vec![Some(1), Some(2)]);

        let mut second = vec![det(104.0, 0, 0.85), det(3.0, 0, 0.9)];
        tracker.update(&mut second);
        assert_eq!(ids(&second), vec![Some(2), Some(1)]);
    }

    #[test]
    fn class_change_starts_a_new_track() {
        let mut tracker = IouTracker::new(TrackerConfig::default());
        let mut first = vec![det(0.0, 0, 0.9)];
        tracker.update(&mut first);
        let mut second = vec![det(0.0, 1, 0.9)];
        tracker.update(&mut second);
        assert_eq!(ids(&second), vec![Some(2)]);
    }

    #[test]
    fn weak_detections_extend_tracks_but_never_start_them() {
        let mut tracker = IouTracker::new(TrackerConfig::default());
        let mut first = vec![det(0.0, 0, 0.9)];
        tracker.update(&mut first);

        let mut second = vec![det(2.0, 0, 0.45), det(200.0, 0, 0.45)];
        tracker.update(&mut second);
        assert_eq!(ids(&second), vec![Some(1), None]);
        assert_eq!(tracker.num_tracklets(), 1);
    }

    #[test]
    fn tracks_expire_after_max_age() {
        let mut tracker = IouTracker::new(TrackerConfig {
            max_age: 1,
            ..TrackerConfig::default()
        });
        tracker.update(&mut [det(0.0, 0, 0.9)]);
        tracker.update(&mut []);
        assert_eq!(tracker.num_tracklets(), 1);
        tracker.update(&mut []);
        assert_eq!(tracker.num_tracklets(), 0);

        let mut back = vec![det(0.0, 0, 0.9)];
        tracker.update(&mut back);
        assert_eq!(ids(&back), vec![Some(2)]);
    }

    #[test]
    fn min_hits_delays_confirmation() {
        let mut tracker = IouTracker::new(TrackerConfig {
            min_hits: 2,
            ..TrackerConfig::default()
        });
        let mut first = vec![det(0.0, 0, 0.9)];
        tracker.update(&mut first);
        assert_eq!(ids(&first), vec![None]);
        let mut second = vec![det(1.0, 0, 0.9)];
        tracker.update(&mut second);
        assert_eq!(ids(&second), vec![Some(1)]);
    }

    #[test]
    fn backend_ids_survive_two_cycles_only_when_persisting() -> Result<()> {
        let script = || {
            StubBackend::new(LabelVocabulary::new(["AA"])).with_script(vec![
                vec![det(50.0, 0, 0.9), det(0.0, 0, 0.9)],
                vec![det(2.0, 0, 0.9)],
            ])
        };
        let frame = RgbImage::new(200, 100);

        let mut persistent = TrackingBackend::new(Box::new(script()), TrackerConfig::default());
        let config = InferenceConfig::default();
        persistent.infer_and_track(&frame, &config)?;
        let second = persistent.infer_and_track(&frame, &config)?;
        assert_eq!(ids(&second), vec![Some(2)]);

        let mut fresh = TrackingBackend::new(Box::new(script()), TrackerConfig::default());
        let config = InferenceConfig {
            persist_tracks: false,
            ..InferenceConfig::default()
        };
        fresh.infer_and_track(&frame, &config)?;
        let second = fresh.infer_and_track(&frame, &config)?;
        assert_eq!(ids(&second), vec![Some(1)]);
        Ok(())
    }
}
