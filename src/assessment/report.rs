//! Aggregate report derivation.
//!
//! Pure functions over the answer store and the test plan: nothing here
//! mutates state, so reports can be recomputed at any moment and always
//! reflect exactly what the store holds.

use serde::Serialize;

use super::answers::AnswerStore;
use super::questions::{Section, TestPlan};

/// Rounded per-metric averages for a speech section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpeechScore {
    pub pronunciation: u32,
    pub fluency: u32,
    pub accuracy: u32,
    pub phonetic: u32,
}

impl SpeechScore {
    /// Mean of the four metrics, the section's single headline number.
    pub fn composite(&self) -> u32 {
        let total = self.pronunciation + self.fluency + self.accuracy + self.phonetic;
        ((total as f64) / 4.0).round() as u32
    }
}

/// Attempt-penalized scores for a word-ordering section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FormationScore {
    pub sentence_mastery: u32,
    /// Average attempts, rounded to one decimal place.
    pub attempts: f64,
}

/// Scores for one section, shaped by what the section grades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SectionScore {
    Speech(SpeechScore),
    Formation(FormationScore),
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub title: String,
    pub score: SectionScore,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub sections: Vec<SectionReport>,
    /// Rounded unweighted mean of pronunciation and fluency per speech
    /// section plus sentence mastery per formation section.
    pub overall: u32,
}

/// Attempt-penalized correctness for one word-ordering answer: a correct
/// answer loses 20 points per extra attempt down to a floor of 20; an
/// incorrect answer scores 0 regardless of attempts.
pub fn sentence_mastery(is_correct: bool, attempts: u32) -> u32 {
    if !is_correct {
        return 0;
    }
    let penalty = 20 * i64::from(attempts.saturating_sub(1));
    (100 - penalty).max(20) as u32
}

/// Derive the full report for a test. A section with no scored answers
/// reports zeros; that is a reporting choice, not an error.
pub fn test_report(plan: &TestPlan, store: &AnswerStore) -> TestReport {
    let mut sections = Vec::with_capacity(plan.sections.len());
    let mut overall_values: Vec<f64> = Vec::new();

    for (index, section) in plan.sections.iter().enumerate() {
        let score = if section.is_formation() {
            let formation = formation_score(store, index);
            overall_values.push(f64::from(formation.sentence_mastery));
            SectionScore::Formation(formation)
        } else {
            let speech = speech_score(store, index);
            overall_values.push(f64::from(speech.pronunciation));
            overall_values.push(f64::from(speech.fluency));
            SectionScore::Speech(speech)
        };

        sections.push(SectionReport {
            title: section.title.clone(),
            score,
        });
    }

    let overall = if overall_values.is_empty() {
        0
    } else {
        (overall_values.iter().sum::<f64>() / overall_values.len() as f64).round() as u32
    };

    TestReport { sections, overall }
}

/// Per-field rounded average over the section's answers that carry scores.
pub fn speech_score(store: &AnswerStore, section: usize) -> SpeechScore {
    let mut totals = [0.0f64; 4];
    let mut count = 0u32;

    if let Some(answers) = store.section_answers(section) {
        for stored in answers.values() {
            if let Some(scores) = stored.answer.scores() {
                totals[0] += f64::from(scores.pronunciation.unwrap_or(0.0));
                totals[1] += f64::from(scores.fluency.unwrap_or(0.0));
                totals[2] += f64::from(scores.accuracy.unwrap_or(0.0));
                totals[3] += f64::from(scores.phonetic.unwrap_or(0.0));
                count += 1;
            }
        }
    }

    if count == 0 {
        return SpeechScore::default();
    }

    let n = f64::from(count);
    SpeechScore {
        pronunciation: (totals[0] / n).round() as u32,
        fluency: (totals[1] / n).round() as u32,
        accuracy: (totals[2] / n).round() as u32,
        phonetic: (totals[3] / n).round() as u32,
    }
}

/// Mastery and attempt averages over every answer carrying a correctness
/// flag (word-ordering and fill-in answers both do).
pub fn formation_score(store: &AnswerStore, section: usize) -> FormationScore {
    let mut mastery_total = 0u64;
    let mut attempts_total = 0u64;
    let mut count = 0u64;

    if let Some(answers) = store.section_answers(section) {
        for stored in answers.values() {
            if let Some((is_correct, attempts)) = stored.answer.correctness() {
                mastery_total += u64::from(sentence_mastery(is_correct, attempts));
                attempts_total += u64::from(attempts);
                count += 1;
            }
        }
    }

    if count == 0 {
        return FormationScore::default();
    }

    FormationScore {
        sentence_mastery: ((mastery_total as f64) / (count as f64)).round() as u32,
        attempts: ((attempts_total as f64) / (count as f64) * 10.0).round() / 10.0,
    }
}
