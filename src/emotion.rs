use serde::ser::{Serialize, SerializeMap, Serializer};

/// The emotion taxonomy of the classifier, in canonical order. Tie-breaks
/// for the dominant emotion resolve to the first label in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

pub const EMOTION_COUNT: usize = 7;

impl Emotion {
    pub const ALL: [Emotion; EMOTION_COUNT] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

/// One non-negative score per taxonomy label. Doubles as the percentage map,
/// which has the same key set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScores {
    values: [f32; EMOTION_COUNT],
}

impl EmotionScores {
    pub fn new(values: [f32; EMOTION_COUNT]) -> Self {
        Self { values }
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        self.values[emotion as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().map(|&e| (e, self.values[e as usize]))
    }

    pub fn total(&self) -> f32 {
        self.values.iter().sum()
    }

    /// Label with the maximum raw score. Scanning in canonical order with a
    /// strict comparison makes the first label win on ties.
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::ALL[0];
        for &emotion in &Emotion::ALL[1..] {
            if self.values[emotion as usize] > self.values[best as usize] {
                best = emotion;
            }
        }
        best
    }

    /// Percentage-normalized scores, each rounded to two decimals. `None`
    /// when the scores sum to zero and normalization is undefined.
    pub fn percentages(&self) -> Option<EmotionScores> {
        let total = self.total();
        if total == 0.0 {
            return None;
        }
        let mut values = [0.0; EMOTION_COUNT];
        for (i, value) in self.values.iter().enumerate() {
            values[i] = round_two_decimals(value / total * 100.0);
        }
        Some(EmotionScores { values })
    }
}

fn round_two_decimals(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

impl Serialize for EmotionScores {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(EMOTION_COUNT))?;
        for (emotion, value) in self.iter() {
            map.serialize_entry(emotion.as_str(), &value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentages_sum_to_one_hundred() {
        let scores = EmotionScores::new([0.1, 0.05, 0.02, 0.6, 0.13, 0.03, 0.07]);
        let percentages = scores.percentages().unwrap();

        let sum: f32 = percentages.iter().map(|(_, v)| v).sum();
        assert!((sum - 100.0).abs() < 0.1);
        assert_eq!(percentages.get(Emotion::Happy), 60.0);
    }

    #[test]
    fn test_percentages_round_to_two_decimals() {
        let scores = EmotionScores::new([1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let percentages = scores.percentages().unwrap();

        assert_eq!(percentages.get(Emotion::Angry), 33.33);
        assert_eq!(percentages.get(Emotion::Happy), 0.0);
    }

    #[test]
    fn test_percentages_of_zero_total_are_undefined() {
        let scores = EmotionScores::new([0.0; EMOTION_COUNT]);
        assert!(scores.percentages().is_none());
    }

    #[test]
    fn test_dominant_is_max_raw_score() {
        let scores = EmotionScores::new([0.1, 0.0, 0.0, 0.2, 0.65, 0.05, 0.0]);
        assert_eq!(scores.dominant(), Emotion::Sad);
    }

    #[test]
    fn test_dominant_tie_breaks_in_canonical_order() {
        let scores = EmotionScores::new([0.0, 0.5, 0.0, 0.5, 0.0, 0.0, 0.5]);
        assert_eq!(scores.dominant(), Emotion::Disgust);
    }

    #[test]
    fn test_serializes_in_canonical_key_order() {
        let scores = EmotionScores::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let json = serde_json::to_string(&scores).unwrap();

        assert_eq!(
            json,
            r#"{"angry":1.0,"disgust":2.0,"fear":3.0,"happy":4.0,"sad":5.0,"surprise":6.0,"neutral":7.0}"#
        );
    }
}
