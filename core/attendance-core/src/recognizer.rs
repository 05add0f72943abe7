//! Seam to the external face classifier.
//!
//! Feature extraction and classification live outside this crate; all the
//! engine needs is "who, and how confident" per detected region.

use serde::{Deserialize, Serialize};

/// A classifier verdict for one region. `confidence` is distance-like:
/// lower is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub student_id: String,
    pub name: String,
    pub confidence: f64,
}

/// One identity seen in the current frame.
pub type Sighting = Recognition;

pub trait Recognizer {
    type Region;

    fn recognize(&self, region: &Self::Region) -> Option<Recognition>;
}

/// Classifies every region of a frame, dropping the unrecognized ones.
pub fn sightings_from_frame<R: Recognizer>(recognizer: &R, regions: &[R::Region]) -> Vec<Sighting> {
    regions
        .iter()
        .filter_map(|region| recognizer.recognize(region))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LookupRecognizer;

    impl Recognizer for LookupRecognizer {
        type Region = (&'static str, f64);

        fn recognize(&self, region: &Self::Region) -> Option<Recognition> {
            let (label, confidence) = *region;
            (label != "?").then(|| Recognition {
                student_id: label.to_string(),
                name: label.to_lowercase(),
                confidence,
            })
        }
    }

    #[test]
    fn unrecognized_regions_are_dropped() {
        let sightings = sightings_from_frame(&LookupRecognizer, &[("S1", 40.0), ("?", 10.0)]);
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].student_id, "S1");
        assert_eq!(sightings[0].confidence, 40.0);
    }
}
