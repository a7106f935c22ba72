use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::store::Template;
use crate::util::round_to;

/// Default maximum descriptor distance for a positive match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Attention credited to a frame with faces but no recognized template.
const UNRECOGNIZED_ATTENTION: f32 = 0.4;
/// Attention credited to a frame with faces when no templates are saved.
const UNMATCHED_ATTENTION: f32 = 0.35;

/// One face from an external detector.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Detection {
    pub descriptor: Vec<f32>,
    /// Scores in the order the detector listed them.
    #[serde(default, with = "ordered_scores")]
    pub expressions: Vec<(String, f32)>,
}

impl Detection {
    /// Highest-scoring expression, if any scores were given.
    pub fn top_expression(&self) -> Option<(&str, f32)> {
        // Reversed so the first of equally scored names wins.
        self.expressions
            .iter()
            .rev()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(name, score)| (name.as_str(), *score))
    }
}

/// A JSON object of name -> score read as a list, keeping key order.
mod ordered_scores {
    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(scores: &[(String, f32)], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(scores.iter().map(|(name, score)| (name, score)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, f32)>, D::Error> {
        struct ScoresVisitor;

        impl<'de> Visitor<'de> for ScoresVisitor {
            type Value = Vec<(String, f32)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of expression scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut scores = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, f32>()? {
                    scores.push(entry);
                }
                Ok(scores)
            }
        }

        deserializer.deserialize_map(ScoresVisitor)
    }
}

/// Every face found in one video frame.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameDetections {
    pub timestamp: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceSnapshot {
    pub timestamp: u64,
    pub faces: usize,
    pub recognition: Option<String>,
    pub expression: Option<String>,
    pub attention_score: f32,
    pub descriptor_distance: Option<f32>,
}

/// Nearest template to a descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateMatch<'a> {
    pub template: &'a Template,
    pub distance: f32,
}

/// Euclidean distance over the components both descriptors have.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn nearest_template<'a>(descriptor: &[f32], templates: &'a [Template]) -> Option<TemplateMatch<'a>> {
    templates
        .iter()
        .map(|t| TemplateMatch {
            template: t,
            distance: euclidean_distance(&t.descriptor, descriptor),
        })
        .min_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
}

#[derive(Clone, Copy, Debug)]
pub struct Recognizer {
    pub threshold: f32,
}

impl Default for Recognizer {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Recognizer {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Summarize one frame against the saved templates.
    ///
    /// Only the first detection is matched; the frame expression comes from
    /// the last detection that carries expression scores.
    pub fn evaluate(&self, frame: &FrameDetections, templates: &[Template]) -> FaceSnapshot {
        let faces = frame.detections.len();
        let expression = frame
            .detections
            .iter()
            .rev()
            .find_map(|d| d.top_expression())
            .map(|(name, _)| name.to_string());

        let mut snapshot = FaceSnapshot {
            timestamp: frame.timestamp,
            faces,
            recognition: None,
            expression,
            attention_score: if faces > 0 { UNMATCHED_ATTENTION } else { 0.0 },
            descriptor_distance: None,
        };

        let Some(first) = frame.detections.first() else {
            return snapshot;
        };
        let Some(best) = nearest_template(&first.descriptor, templates) else {
            return snapshot;
        };

        if best.distance < self.threshold {
            log::debug!("Recognized '{}' at distance {:.3}", best.template.name, best.distance);
            snapshot.recognition = Some(best.template.name.clone());
            snapshot.attention_score = round_to(1.0 - best.distance, 3);
            snapshot.descriptor_distance = Some(best.distance);
        } else {
            snapshot.attention_score = UNRECOGNIZED_ATTENTION;
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str, name: &str, descriptor: Vec<f32>) -> Template {
        Template {
            id: id.to_string(),
            name: name.to_string(),
            descriptor,
            created_at: 0,
        }
    }

    fn detection(descriptor: Vec<f32>, expressions: &[(&str, f32)]) -> Detection {
        Detection {
            descriptor,
            expressions: expressions.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn distance_uses_shared_prefix() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[1.0, 2.0, 9.0], &[1.0, 2.0]), 0.0);
        assert_eq!(euclidean_distance(&[], &[1.0]), 0.0);
    }

    #[test]
    fn nearest_prefers_first_on_ties() {
        let templates = vec![
            template("1", "ana", vec![1.0, 0.0]),
            template("2", "bia", vec![0.0, 1.0]),
            template("3", "caio", vec![0.1, 0.0]),
        ];
        let m = nearest_template(&[0.0, 0.0], &templates).unwrap();
        assert_eq!(m.template.name, "caio");

        let m = nearest_template(&[0.5, 0.5], &templates[..2]).unwrap();
        assert_eq!(m.template.name, "ana");

        assert!(nearest_template(&[0.0], &[]).is_none());
    }

    #[test]
    fn recognizes_below_threshold() {
        let templates = vec![template("1", "ana", vec![0.0, 0.0])];
        let frame = FrameDetections {
            timestamp: 42,
            detections: vec![detection(vec![0.0, 0.5], &[("happy", 0.9), ("neutral", 0.1)])],
        };
        let snap = Recognizer::default().evaluate(&frame, &templates);
        assert_eq!(snap.timestamp, 42);
        assert_eq!(snap.faces, 1);
        assert_eq!(snap.recognition.as_deref(), Some("ana"));
        assert_eq!(snap.expression.as_deref(), Some("happy"));
        assert_eq!(snap.attention_score, 0.5);
        assert_eq!(snap.descriptor_distance, Some(0.5));
    }

    #[test]
    fn threshold_is_exclusive() {
        let templates = vec![template("1", "ana", vec![0.0, 0.0])];
        let frame = FrameDetections {
            timestamp: 0,
            detections: vec![detection(vec![0.0, 1.0], &[])],
        };
        // distance is exactly 1.0
        let snap = Recognizer::new(1.0).evaluate(&frame, &templates);
        assert_eq!(snap.recognition, None);
        assert_eq!(snap.attention_score, 0.4);
        assert_eq!(snap.descriptor_distance, None);
        assert_eq!(snap.expression, None);
    }

    #[test]
    fn no_templates_scores_presence_only() {
        let frame = FrameDetections {
            timestamp: 0,
            detections: vec![detection(vec![0.1], &[]), detection(vec![0.2], &[])],
        };
        let snap = Recognizer::default().evaluate(&frame, &[]);
        assert_eq!(snap.faces, 2);
        assert_eq!(snap.attention_score, 0.35);

        let empty = FrameDetections::default();
        let snap = Recognizer::default().evaluate(&empty, &[template("1", "ana", vec![0.0])]);
        assert_eq!(snap.faces, 0);
        assert_eq!(snap.attention_score, 0.0);
        assert_eq!(snap.recognition, None);
    }

    #[test]
    fn expression_comes_from_last_scored_detection() {
        let frame = FrameDetections {
            timestamp: 0,
            detections: vec![
                detection(vec![0.0], &[("sad", 0.7)]),
                detection(vec![0.0], &[("surprised", 0.6), ("angry", 0.3)]),
                detection(vec![0.0], &[]),
            ],
        };
        let snap = Recognizer::default().evaluate(&frame, &[]);
        assert_eq!(snap.expression.as_deref(), Some("surprised"));
    }

    #[test]
    fn detections_parse_without_expressions() {
        let frame: FrameDetections =
            serde_json::from_str(r#"{"timestamp": 10, "detections": [{"descriptor": [0.1, 0.2]}]}"#).unwrap();
        assert_eq!(frame.detections.len(), 1);
        assert!(frame.detections[0].expressions.is_empty());
    }

    #[test]
    fn expression_ties_go_to_first_listed() {
        let frame: FrameDetections = serde_json::from_str(
            r#"{"timestamp": 0, "detections": [{"descriptor": [], "expressions": {"neutral": 0.4, "happy": 0.4, "angry": 0.2}}]}"#,
        )
        .unwrap();
        assert_eq!(frame.detections[0].top_expression(), Some(("neutral", 0.4)));

        let json = serde_json::to_value(&frame.detections[0]).unwrap();
        assert_eq!(json["expressions"].as_object().map(|m| m.len()), Some(3));
        assert!(json["expressions"]["happy"].is_number());
    }
}
