//! Maps classifier output posted by the capture client onto roster identities.
//!
//! The client runs detection and classification and sends one labelled
//! observation per face; the label is the student id the model was trained on.

use attendance_core::{InMemoryRoster, Recognition, Recognizer, Roster};
use classeye_daemon_protocol::FaceObservation;

pub struct RosterRecognizer<'a> {
    roster: &'a InMemoryRoster,
}

impl<'a> RosterRecognizer<'a> {
    pub fn new(roster: &'a InMemoryRoster) -> Self {
        Self { roster }
    }
}

impl Recognizer for RosterRecognizer<'_> {
    type Region = FaceObservation;

    /// Unlabelled or non-finite observations are dropped. Unknown labels are
    /// passed through; the engine ignores them.
    fn recognize(&self, region: &FaceObservation) -> Option<Recognition> {
        let student_id = region.label.trim();
        if student_id.is_empty() || !region.confidence.is_finite() {
            return None;
        }
        Some(Recognition {
            student_id: student_id.to_string(),
            name: self.roster.name_of(student_id).unwrap_or_default(),
            confidence: region.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_core::sightings_from_frame;
    use classeye_daemon_protocol::Student;

    fn observation(label: &str, confidence: f64) -> FaceObservation {
        FaceObservation {
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn resolves_names_and_drops_blank_labels() {
        let roster = InMemoryRoster::new(vec![Student::new("S1", "Asha", "B1")]);
        let recognizer = RosterRecognizer::new(&roster);
        let sightings = sightings_from_frame(
            &recognizer,
            &[
                observation(" S1 ", 42.0),
                observation("", 10.0),
                observation("S9", 30.0),
                observation("S1", f64::NAN),
            ],
        );

        assert_eq!(sightings.len(), 2);
        assert_eq!(sightings[0].student_id, "S1");
        assert_eq!(sightings[0].name, "Asha");
        assert_eq!(sightings[1].student_id, "S9");
        assert_eq!(sightings[1].name, "");
    }
}
