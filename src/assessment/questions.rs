//! Static test configuration: sections and typed questions.
//!
//! Loaded once from an authored JSON template at session start and read-only
//! afterwards. The tag values match the spelling the templates use.

use serde::{Deserialize, Serialize};

/// Discriminant for the question and answer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "Read Aloud")]
    ReadAloud,
    #[serde(rename = "Repeat Sentence")]
    RepeatSentence,
    #[serde(rename = "Short Answer")]
    ShortAnswer,
    #[serde(rename = "Story Retell")]
    StoryRetell,
    #[serde(rename = "Open Question")]
    OpenQuestion,
    #[serde(rename = "Situation Response")]
    SituationResponse,
    #[serde(rename = "Sentence Build")]
    SentenceBuild,
    #[serde(rename = "Sentence Completion")]
    SentenceCompletion,
}

impl QuestionType {
    /// Question kinds answered by speaking into the microphone.
    pub fn needs_recording(&self) -> bool {
        !matches!(self, QuestionType::SentenceBuild)
    }

    /// Audio answers of these kinds run through the evaluation pipeline.
    pub fn is_audio_scored(&self) -> bool {
        matches!(
            self,
            QuestionType::ReadAloud
                | QuestionType::RepeatSentence
                | QuestionType::ShortAnswer
                | QuestionType::StoryRetell
                | QuestionType::OpenQuestion
                | QuestionType::SituationResponse
        )
    }

    /// Open-ended kinds have no reference text to grade against.
    pub fn is_open_ended(&self) -> bool {
        matches!(self, QuestionType::OpenQuestion)
    }
}

/// One test item, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Question {
    #[serde(rename = "Read Aloud")]
    ReadAloud { text: String },
    #[serde(rename = "Open Question")]
    OpenQuestion { text: String },
    #[serde(rename = "Repeat Sentence")]
    RepeatSentence {
        audio: String,
        text: String,
        solution: String,
    },
    #[serde(rename = "Short Answer")]
    ShortAnswer {
        audio: String,
        text: String,
        solution: String,
    },
    #[serde(rename = "Story Retell")]
    StoryRetell {
        audio: String,
        text: String,
        solution: String,
    },
    #[serde(rename = "Situation Response")]
    SituationResponse {
        audio: String,
        text: String,
        solution: String,
    },
    #[serde(rename = "Sentence Build")]
    SentenceBuild {
        words: Vec<String>,
        solution: String,
    },
    #[serde(rename = "Sentence Completion")]
    SentenceCompletion {
        audio: String,
        text: String,
        solution: String,
    },
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        match self {
            Question::ReadAloud { .. } => QuestionType::ReadAloud,
            Question::OpenQuestion { .. } => QuestionType::OpenQuestion,
            Question::RepeatSentence { .. } => QuestionType::RepeatSentence,
            Question::ShortAnswer { .. } => QuestionType::ShortAnswer,
            Question::StoryRetell { .. } => QuestionType::StoryRetell,
            Question::SituationResponse { .. } => QuestionType::SituationResponse,
            Question::SentenceBuild { .. } => QuestionType::SentenceBuild,
            Question::SentenceCompletion { .. } => QuestionType::SentenceCompletion,
        }
    }

    /// The text a spoken answer is graded against, when one exists.
    /// Read-aloud questions grade against the displayed text; prompted
    /// questions grade against their solution; open questions have none.
    pub fn reference_text(&self) -> Option<&str> {
        match self {
            Question::ReadAloud { text } => Some(text),
            Question::OpenQuestion { .. } => None,
            Question::RepeatSentence { solution, .. }
            | Question::ShortAnswer { solution, .. }
            | Question::StoryRetell { solution, .. }
            | Question::SituationResponse { solution, .. } => Some(solution),
            Question::SentenceBuild { .. } | Question::SentenceCompletion { .. } => None,
        }
    }

    /// The expected answer for locally-checked question kinds.
    pub fn solution(&self) -> Option<&str> {
        match self {
            Question::SentenceBuild { solution, .. }
            | Question::SentenceCompletion { solution, .. } => Some(solution),
            _ => None,
        }
    }
}

/// An ordered block of questions sharing a per-question time budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub description: String,
    /// Seconds allowed per question.
    pub time: u64,
    pub questions: Vec<Question>,
}

impl Section {
    /// The question kind this section's completion batch grades. Sections
    /// may mix kinds; the most frequent one wins, earliest breaking ties.
    pub fn primary_type(&self) -> Option<QuestionType> {
        let mut counts: Vec<(QuestionType, usize)> = Vec::new();
        for question in &self.questions {
            let kind = question.question_type();
            match counts.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((kind, 1)),
            }
        }

        let mut best: Option<(QuestionType, usize)> = None;
        for (kind, count) in counts {
            if best.map_or(true, |(_, n)| count > n) {
                best = Some((kind, count));
            }
        }
        best.map(|(kind, _)| kind)
    }

    pub fn is_formation(&self) -> bool {
        self.primary_type() == Some(QuestionType::SentenceBuild)
    }
}

/// The full test configuration consumed by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub sections: Vec<Section>,
}

impl TestPlan {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn total_questions(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_from_tagged_json() {
        let json = r#"{
            "sections": [
                {
                    "title": "Part A: Reading",
                    "description": "Read each sentence aloud.",
                    "time": 30,
                    "questions": [
                        { "type": "Read Aloud", "text": "The quick fox." },
                        { "type": "Sentence Build", "words": ["a", "b"], "solution": "a b" },
                        {
                            "type": "Repeat Sentence",
                            "audio": "/audio/rs1.mp3",
                            "text": "Listen and repeat.",
                            "solution": "We ship on Friday."
                        }
                    ]
                }
            ]
        }"#;

        let plan = TestPlan::from_json(json).unwrap();
        assert_eq!(plan.total_questions(), 3);

        let section = &plan.sections[0];
        assert_eq!(section.time, 30);
        assert_eq!(
            section.questions[0].question_type(),
            QuestionType::ReadAloud
        );
        assert_eq!(
            section.questions[0].reference_text(),
            Some("The quick fox.")
        );
        assert_eq!(
            section.questions[2].reference_text(),
            Some("We ship on Friday.")
        );
    }

    #[test]
    fn primary_type_is_the_modal_kind() {
        let section = Section {
            title: "Mixed".to_string(),
            description: String::new(),
            time: 30,
            questions: vec![
                Question::ShortAnswer {
                    audio: String::new(),
                    text: String::new(),
                    solution: String::new(),
                },
                Question::StoryRetell {
                    audio: String::new(),
                    text: String::new(),
                    solution: String::new(),
                },
                Question::ShortAnswer {
                    audio: String::new(),
                    text: String::new(),
                    solution: String::new(),
                },
            ],
        };
        assert_eq!(section.primary_type(), Some(QuestionType::ShortAnswer));
    }

    #[test]
    fn primary_type_tie_prefers_earliest() {
        let section = Section {
            title: "Tie".to_string(),
            description: String::new(),
            time: 30,
            questions: vec![
                Question::ReadAloud {
                    text: String::new(),
                },
                Question::OpenQuestion {
                    text: String::new(),
                },
            ],
        };
        assert_eq!(section.primary_type(), Some(QuestionType::ReadAloud));
    }

    #[test]
    fn empty_section_has_no_primary_type() {
        let section = Section {
            title: "Empty".to_string(),
            description: String::new(),
            time: 30,
            questions: Vec::new(),
        };
        assert_eq!(section.primary_type(), None);
    }

    #[test]
    fn only_sentence_build_skips_recording() {
        for kind in [
            QuestionType::ReadAloud,
            QuestionType::RepeatSentence,
            QuestionType::ShortAnswer,
            QuestionType::StoryRetell,
            QuestionType::OpenQuestion,
            QuestionType::SituationResponse,
            QuestionType::SentenceCompletion,
        ] {
            assert!(kind.needs_recording());
        }
        assert!(!QuestionType::SentenceBuild.needs_recording());
    }
}
