/// Axis-aligned box in frame pixel coordinates, `x1 < x2`, `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    /// Clamp to a `width` x `height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    /// Intersection over union. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Detector output before normalization.
///
/// Backends fill this from whatever their library returns. Values are not
/// trusted: the adapter validates every field.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f32; 4],
    pub class_index: usize,
    pub confidence: f32,
    /// Tracker identity. `None` (or negative) while the track is unconfirmed.
    pub track_id: Option<i64>,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], class_index: usize, confidence: f32) -> Self {
        Self {
            bbox,
            class_index,
            confidence,
            track_id: None,
        }
    }

    pub fn with_track(mut self, track_id: i64) -> Self {
        self.track_id = Some(track_id);
        self
    }
}

/// One normalized detection for the current cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Stable tracker id; absent until the tracker confirms the object.
    pub track_id: Option<u64>,
    pub class_label: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Caption shown next to the box: `#7 AA 0.91`, or `AA 0.91` when unconfirmed.
    pub fn caption(&self) -> String {
        match self.track_id {
            Some(id) => format!("#{} {} {:.2}", id, self.class_label, self.confidence),
            None => format!("{} {:.2}", self.class_label, self.confidence),
        }
    }
}

/// Class-index to label mapping, fixed when the model is loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Placeholder labels `class_0 .. class_{n-1}` for models shipped without names.
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("class_{}", i)))
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(10.0, 10.0, 50.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn validity_rejects_inverted_and_nan() {
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!BoundingBox::new(5.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f32::NAN, 1.0).is_valid());
    }

    #[test]
    fn captions_mark_unconfirmed_tracks() {
        let mut det = Detection {
            track_id: Some(7),
            class_label: "AA".to_string(),
            confidence: 0.912,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        };
        assert_eq!(det.caption(), "#7 AA 0.91");
        det.track_id = None;
        assert_eq!(det.caption(), "AA 0.91");
    }

    #[test]
    fn vocabulary_lookups() {
        let vocab = LabelVocabulary::new(["AA", "AAA", "9V"]);
        assert_eq!(vocab.label(2), Some("9V"));
        assert_eq!(vocab.label(3), None);
        assert_eq!(vocab.index_of("AAA"), Some(1));
        assert!(!vocab.contains("D"));
        assert_eq!(LabelVocabulary::numbered(2).label(1), Some("class_1"));
    }
}
