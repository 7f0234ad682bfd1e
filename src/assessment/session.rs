//! Test session state machine.
//!
//! Drives section/question progression, owns the recording lifecycle and the
//! countdown, evaluates spoken answers as they are submitted, and runs the
//! section-completion batch before a section can be left behind. Everything
//! is scoped to one session instance; a fresh session gets a fresh store.

use std::sync::Arc;

use futures::future::join_all;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::answers::{Answer, AnswerStore, AudioAnswer, SentenceBuildAnswer, SentenceCompletionAnswer};
use super::questions::{Question, Section, TestPlan};
use super::report::{self, TestReport};
use crate::audio::Recording;
use crate::error::SessionError;
use crate::evaluation::{CancelToken, EvaluationScores, SpeechEvaluator};

/// Capture front end collaborator. The session only ever consumes completed
/// buffers; streaming and chunking stay on the capture side.
pub trait AudioCapture: Send {
    fn start(&mut self) -> anyhow::Result<()>;

    /// Finalize and hand over everything recorded since `start`.
    fn stop(&mut self) -> anyhow::Result<Recording>;
}

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Presenting,
    Recording,
    Evaluating,
    Completed,
}

/// Snapshot of the mutable session state for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub section: usize,
    pub question: usize,
    pub time_left: u64,
    pub is_recording: bool,
    pub is_playing: bool,
}

pub struct TestSession<C: AudioCapture> {
    id: Uuid,
    plan: TestPlan,
    store: Arc<Mutex<AnswerStore>>,
    evaluator: Arc<SpeechEvaluator>,
    capture: C,
    cancel: CancelToken,
    phase: SessionPhase,
    section: usize,
    question: usize,
    time_left: u64,
    is_playing: bool,
    /// Buffer held between a completion question's stop and its submission.
    pending_recording: Option<(Recording, u64)>,
}

impl<C: AudioCapture> TestSession<C> {
    pub fn new(plan: TestPlan, evaluator: Arc<SpeechEvaluator>, capture: C) -> Self {
        let time_left = plan.sections.first().map(|s| s.time).unwrap_or(0);
        Self {
            id: Uuid::new_v4(),
            plan,
            store: Arc::new(Mutex::new(AnswerStore::new())),
            evaluator,
            capture,
            cancel: CancelToken::new(),
            phase: SessionPhase::Idle,
            section: 0,
            question: 0,
            time_left,
            is_playing: false,
            pending_recording: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle to the per-session answer store, for report consumers.
    pub fn store(&self) -> Arc<Mutex<AnswerStore>> {
        Arc::clone(&self.store)
    }

    /// Token that aborts this session's in-flight evaluations.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            phase: self.phase,
            section: self.section,
            question: self.question,
            time_left: self.time_left,
            is_recording: self.phase == SessionPhase::Recording,
            is_playing: self.is_playing,
        }
    }

    pub fn current_section(&self) -> Option<&Section> {
        self.plan.sections.get(self.section)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current_section()?.questions.get(self.question)
    }

    /// Present the first question. A plan without sections completes
    /// immediately.
    pub fn begin(&mut self) {
        if self.phase != SessionPhase::Idle {
            return;
        }
        if self.plan.sections.is_empty() {
            self.phase = SessionPhase::Completed;
            return;
        }

        self.time_left = self.plan.sections[0].time;
        self.phase = SessionPhase::Presenting;
        info!(
            "🎬 session {}: starting test, {} sections / {} questions",
            self.id,
            self.plan.sections.len(),
            self.plan.total_questions()
        );
    }

    /// Mark prompt playback as running; recording cannot start meanwhile.
    pub fn start_playback(&mut self) {
        self.is_playing = true;
    }

    pub fn finish_playback(&mut self) {
        self.is_playing = false;
    }

    /// Arm the capture and the countdown for the current question.
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Presenting => {}
            SessionPhase::Completed => return Err(SessionError::Completed),
            _ => return Err(SessionError::NotPresenting),
        }
        if self.is_playing {
            return Err(SessionError::PlaybackInProgress);
        }

        self.capture
            .start()
            .map_err(|e| SessionError::Capture(e.to_string()))?;

        self.time_left = self.current_section().map(|s| s.time).unwrap_or(0);
        self.phase = SessionPhase::Recording;
        info!(
            "session {}: recording question {}/{} ({}s budget)",
            self.id,
            self.section + 1,
            self.question + 1,
            self.time_left
        );
        Ok(())
    }

    /// Advance the countdown by one second. Expiry while recording behaves
    /// exactly like a manual stop.
    pub async fn tick(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Recording {
            return Ok(());
        }

        self.time_left = self.time_left.saturating_sub(1);
        if self.time_left == 0 {
            info!(
                "⏱️ session {}: time expired on question {}/{}",
                self.id,
                self.section + 1,
                self.question + 1
            );
            self.stop_recording().await?;
        }
        Ok(())
    }

    /// Finalize the capture into a Recording and dispose of it according to
    /// the question kind: audio-scored kinds are evaluated and stored right
    /// away (failures store fallback scores rather than stalling the test),
    /// completion kinds hold the buffer until the typed answer arrives.
    pub async fn stop_recording(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Recording {
            return Err(SessionError::NotRecording);
        }

        let section = self.section;
        let question = self.question;
        let budget = self.current_section().map(|s| s.time).unwrap_or(0);
        let duration = budget.saturating_sub(self.time_left);

        let recording = match self.capture.stop() {
            Ok(recording) => recording,
            Err(e) => {
                // No usable buffer; skip the answer instead of failing the test.
                warn!("session {}: capture produced no recording: {e}", self.id);
                self.phase = SessionPhase::Presenting;
                self.advance().await;
                return Ok(());
            }
        };

        let Some(current) = self.current_question().cloned() else {
            self.phase = SessionPhase::Presenting;
            self.advance().await;
            return Ok(());
        };
        let kind = current.question_type();

        if !kind.is_audio_scored() {
            self.pending_recording = Some((recording, duration));
            self.phase = SessionPhase::Presenting;
            return Ok(());
        }

        self.phase = SessionPhase::Evaluating;
        let result = match current.reference_text() {
            Some(reference) => {
                self.evaluator
                    .evaluate_reading(&recording, reference, &self.cancel)
                    .await
            }
            None => {
                self.evaluator
                    .evaluate_open_ended(&recording, &self.cancel)
                    .await
            }
        };

        let scores = match result {
            Ok(scores) => scores,
            Err(err) => {
                error!(
                    "session {}: evaluation failed for question {}/{}: {err}; storing fallback scores",
                    self.id,
                    section + 1,
                    question + 1
                );
                if kind.is_open_ended() {
                    EvaluationScores::open_ended(String::new())
                } else {
                    EvaluationScores::zeroed()
                }
            }
        };

        self.store.lock().put(
            section,
            question,
            Answer::Audio(AudioAnswer {
                question_type: kind,
                recording,
                duration,
                scores: Some(scores),
            }),
        );

        self.phase = SessionPhase::Presenting;
        self.advance().await;
        Ok(())
    }

    /// Submit a word-ordering answer. Correctness is a case-insensitive
    /// comparison of the arranged sentence against the solution.
    pub async fn submit_sentence_build(
        &mut self,
        arranged_words: Vec<String>,
        attempts: u32,
    ) -> Result<bool, SessionError> {
        match self.phase {
            SessionPhase::Presenting => {}
            SessionPhase::Completed => return Err(SessionError::Completed),
            _ => return Err(SessionError::NotPresenting),
        }
        let Some(Question::SentenceBuild { solution, .. }) = self.current_question().cloned()
        else {
            return Err(SessionError::AnswerMismatch);
        };

        let is_correct = arranged_words.join(" ").to_lowercase() == solution.to_lowercase();
        self.store.lock().put(
            self.section,
            self.question,
            Answer::SentenceBuild(SentenceBuildAnswer {
                arranged_words,
                is_correct,
                attempts: attempts.max(1),
            }),
        );

        self.advance().await;
        Ok(is_correct)
    }

    /// Submit a fill-in answer together with its recording (taken from the
    /// most recent stop). The solution may list alternatives separated by
    /// `/`; matching any of them counts.
    pub async fn submit_sentence_completion(
        &mut self,
        text_answer: &str,
        attempts: u32,
    ) -> Result<bool, SessionError> {
        match self.phase {
            SessionPhase::Presenting => {}
            SessionPhase::Completed => return Err(SessionError::Completed),
            _ => return Err(SessionError::NotPresenting),
        }
        let Some(Question::SentenceCompletion { solution, .. }) = self.current_question().cloned()
        else {
            return Err(SessionError::AnswerMismatch);
        };

        let answer_norm = text_answer.to_lowercase();
        let is_correct = solution
            .to_lowercase()
            .split('/')
            .any(|candidate| answer_norm.trim() == candidate.trim());

        let (recording, _) = self
            .pending_recording
            .take()
            .unwrap_or_else(|| (Recording::new(Vec::new(), "audio/l16;rate=16000"), 0));

        self.store.lock().put(
            self.section,
            self.question,
            Answer::SentenceCompletion(SentenceCompletionAnswer {
                text_answer: text_answer.to_string(),
                recording,
                is_correct,
                attempts: attempts.max(1),
                scores: None,
            }),
        );

        self.advance().await;
        Ok(is_correct)
    }

    /// Move on without storing an answer (the learner pressed next without
    /// recording). Partial completion is allowed everywhere.
    pub async fn skip_question(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Presenting => {
                self.pending_recording = None;
                self.advance().await;
                Ok(())
            }
            SessionPhase::Completed => Err(SessionError::Completed),
            _ => Err(SessionError::NotPresenting),
        }
    }

    /// Tear the session down: cancel in-flight evaluations and discard any
    /// recording that was never submitted. Nothing is scored afterwards.
    pub fn abort(&mut self) {
        self.cancel.cancel();
        self.pending_recording = None;
        if self.phase == SessionPhase::Recording {
            if let Err(e) = self.capture.stop() {
                warn!("session {}: discarding capture on abort: {e}", self.id);
            }
        }
        self.phase = SessionPhase::Completed;
        info!("🛑 session {}: aborted", self.id);
    }

    /// Current report derived from the store; safe to call at any point.
    pub fn report(&self) -> TestReport {
        report::test_report(&self.plan, &self.store.lock())
    }

    async fn advance(&mut self) {
        self.is_playing = false;

        let total = self.current_section().map(|s| s.questions.len()).unwrap_or(0);
        if self.question + 1 < total {
            self.question += 1;
            self.time_left = self.current_section().map(|s| s.time).unwrap_or(0);
            self.phase = SessionPhase::Presenting;
            return;
        }

        // Last question: the section must be fully evaluated before moving on.
        self.phase = SessionPhase::Evaluating;
        let store = Arc::clone(&self.store);
        let evaluator = Arc::clone(&self.evaluator);
        let cancel = self.cancel.clone();
        if let Some(section_cfg) = self.current_section().cloned() {
            evaluate_section(self.section, &section_cfg, &store, &evaluator, &cancel).await;
        }

        if self.section + 1 < self.plan.sections.len() {
            self.section += 1;
            self.question = 0;
            self.time_left = self.current_section().map(|s| s.time).unwrap_or(0);
            self.phase = SessionPhase::Presenting;
        } else {
            info!("✅ session {}: test completed", self.id);
            self.phase = SessionPhase::Completed;
        }
    }
}

/// Section-completion batch: evaluate every stored audio answer of the
/// section's primary scorable kind that does not yet carry complete scores.
///
/// Already-complete answers are skipped, so re-running the batch never
/// double-scores or rewrites them. Evaluations for different questions run
/// concurrently; one failure never blocks siblings. Returns how many answers
/// were evaluated this pass.
pub async fn evaluate_section(
    section_index: usize,
    section: &Section,
    store: &Mutex<AnswerStore>,
    evaluator: &SpeechEvaluator,
    cancel: &CancelToken,
) -> usize {
    let Some(primary) = section.primary_type() else {
        return 0;
    };

    if !primary.is_audio_scored() {
        log_formation_results(section_index, section, store);
        return 0;
    }

    info!(
        "section {} ({}): running completion evaluation",
        section_index + 1,
        section.title
    );

    // Snapshot pending work under the lock; evaluations run outside it.
    let pending: Vec<(usize, Recording, Option<String>)> = {
        let store = store.lock();
        let Some(answers) = store.section_answers(section_index) else {
            info!("section {}: no answers to evaluate", section_index + 1);
            return 0;
        };

        answers
            .iter()
            .filter_map(|(&qi, stored)| match &stored.answer {
                Answer::Audio(audio)
                    if audio.question_type == primary
                        && !audio.scores.as_ref().is_some_and(|s| s.is_complete()) =>
                {
                    let reference = section
                        .questions
                        .get(qi)
                        .and_then(|q| q.reference_text())
                        .map(str::to_string);
                    Some((qi, audio.recording.clone(), reference))
                }
                _ => None,
            })
            .collect()
    };

    if pending.is_empty() {
        info!(
            "section {}: all answers already evaluated, skipping",
            section_index + 1
        );
        return 0;
    }

    let evaluations = pending.into_iter().map(|(qi, recording, reference)| async move {
        let result = match &reference {
            Some(reference) => evaluator.evaluate_reading(&recording, reference, cancel).await,
            None => evaluator.evaluate_open_ended(&recording, cancel).await,
        };
        (qi, result)
    });

    let mut evaluated = 0;
    for (qi, result) in join_all(evaluations).await {
        match result {
            Ok(scores) => {
                store.lock().update_scores(section_index, qi, &scores);
                evaluated += 1;
            }
            Err(err) => {
                // One failed question must not block its siblings.
                error!(
                    "section {} question {}: evaluation failed: {err}",
                    section_index + 1,
                    qi + 1
                );
            }
        }
    }

    log_section_averages(section_index, section, store);
    evaluated
}

fn log_formation_results(section_index: usize, section: &Section, store: &Mutex<AnswerStore>) {
    let store = store.lock();
    let Some(answers) = store.section_answers(section_index) else {
        return;
    };

    let mut mastery_total = 0u64;
    let mut attempts_total = 0u64;
    let mut count = 0u64;
    for (qi, stored) in answers {
        if let Some((is_correct, attempts)) = stored.answer.correctness() {
            let mastery = report::sentence_mastery(is_correct, attempts);
            info!(
                "section {} question {}: mastery={} attempts={}",
                section_index + 1,
                qi + 1,
                mastery,
                attempts
            );
            mastery_total += u64::from(mastery);
            attempts_total += u64::from(attempts);
            count += 1;
        }
    }

    if count > 0 {
        info!(
            "section {} ({}) averages: mastery={} attempts={:.1}",
            section_index + 1,
            section.title,
            mastery_total / count,
            attempts_total as f64 / count as f64
        );
    }
}

fn log_section_averages(section_index: usize, section: &Section, store: &Mutex<AnswerStore>) {
    let primary = section.primary_type();
    let store = store.lock();
    let Some(answers) = store.section_answers(section_index) else {
        return;
    };

    let mut totals = [0.0f64; 4];
    let mut count = 0u32;
    for stored in answers.values() {
        if Some(stored.answer.question_type()) != primary {
            continue;
        }
        if let Some(scores) = stored.answer.scores() {
            totals[0] += f64::from(scores.pronunciation.unwrap_or(0.0));
            totals[1] += f64::from(scores.fluency.unwrap_or(0.0));
            totals[2] += f64::from(scores.accuracy.unwrap_or(0.0));
            totals[3] += f64::from(scores.phonetic.unwrap_or(0.0));
            count += 1;
        }
    }

    if count > 0 {
        info!(
            "section {} ({}) averages: pronunciation={:.0} fluency={:.0} accuracy={:.0} phonetic={:.0}",
            section_index + 1,
            section.title,
            totals[0] / f64::from(count),
            totals[1] / f64::from(count),
            totals[2] / f64::from(count),
            totals[3] / f64::from(count)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CanonicalAudio;
    use crate::error::ScorerError;
    use crate::scorer::{PronunciationAssessment, PronunciationScorer};
    use async_trait::async_trait;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::io::Cursor;

    /// Returns the reference text back as the transcript.
    struct EchoScorer;

    #[async_trait]
    impl PronunciationScorer for EchoScorer {
        async fn score(
            &self,
            _audio: &CanonicalAudio,
            reference_text: Option<&str>,
        ) -> Result<PronunciationAssessment, ScorerError> {
            Ok(PronunciationAssessment {
                transcript: reference_text.unwrap_or("open answer").to_string(),
                pronunciation_score: 90.0,
                fluency_score: 85.0,
            })
        }
    }

    struct ToneCapture;

    impl AudioCapture for ToneCapture {
        fn start(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> anyhow::Result<Recording> {
            let mut cursor = Cursor::new(Vec::new());
            let spec = WavSpec {
                channels: 1,
                sample_rate: 16_000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..1600 {
                writer.write_sample(((i % 80) * 100) as i16).unwrap();
            }
            writer.finalize().unwrap();
            Ok(Recording::new(cursor.into_inner(), "audio/wav"))
        }
    }

    fn two_question_plan() -> TestPlan {
        TestPlan {
            sections: vec![Section {
                title: "Part A: Reading".to_string(),
                description: "Read each sentence aloud.".to_string(),
                time: 30,
                questions: vec![
                    Question::ReadAloud {
                        text: "The quick fox.".to_string(),
                    },
                    Question::ReadAloud {
                        text: "A second sentence.".to_string(),
                    },
                ],
            }],
        }
    }

    fn session(plan: TestPlan) -> TestSession<ToneCapture> {
        let evaluator = Arc::new(SpeechEvaluator::new(Arc::new(EchoScorer)));
        TestSession::new(plan, evaluator, ToneCapture)
    }

    #[tokio::test]
    async fn recording_requires_presenting_phase() {
        let mut session = session(two_question_plan());
        assert!(matches!(
            session.start_recording(),
            Err(SessionError::NotPresenting)
        ));

        session.begin();
        session.start_recording().unwrap();
        assert!(matches!(
            session.start_recording(),
            Err(SessionError::NotPresenting)
        ));
    }

    #[tokio::test]
    async fn playback_blocks_recording() {
        let mut session = session(two_question_plan());
        session.begin();
        session.start_playback();
        assert!(matches!(
            session.start_recording(),
            Err(SessionError::PlaybackInProgress)
        ));
        session.finish_playback();
        session.start_recording().unwrap();
    }

    #[tokio::test]
    async fn stop_stores_scored_answer_and_advances() {
        let mut session = session(two_question_plan());
        session.begin();
        session.start_recording().unwrap();
        session.tick().await.unwrap();
        session.stop_recording().await.unwrap();

        let state = session.state();
        assert_eq!(state.question, 1);
        assert_eq!(state.phase, SessionPhase::Presenting);

        let store = session.store();
        let store = store.lock();
        let stored = store.get(0, 0).unwrap();
        let scores = stored.answer.scores().unwrap();
        assert!(scores.is_complete());
        assert_eq!(scores.accuracy, Some(100.0));
    }

    #[tokio::test]
    async fn timer_expiry_acts_as_manual_stop() {
        let mut session = session(two_question_plan());
        session.begin();
        session.start_recording().unwrap();

        for _ in 0..30 {
            session.tick().await.unwrap();
        }

        assert_eq!(session.state().question, 1);
        let store = session.store();
        assert!(store.lock().get(0, 0).is_some());
    }

    #[tokio::test]
    async fn finishing_the_last_section_completes_the_test() {
        let mut session = session(two_question_plan());
        session.begin();

        for _ in 0..2 {
            session.start_recording().unwrap();
            session.stop_recording().await.unwrap();
        }

        assert_eq!(session.state().phase, SessionPhase::Completed);
    }

    #[tokio::test]
    async fn sentence_build_checks_word_order() {
        let plan = TestPlan {
            sections: vec![Section {
                title: "Part D: Formation".to_string(),
                description: String::new(),
                time: 60,
                questions: vec![Question::SentenceBuild {
                    words: vec!["fox".into(), "the".into(), "quick".into()],
                    solution: "the quick fox".to_string(),
                }],
            }],
        };

        let mut session = session(plan);
        session.begin();

        let correct = session
            .submit_sentence_build(
                vec!["The".into(), "quick".into(), "fox".into()],
                1,
            )
            .await
            .unwrap();
        assert!(correct);
        assert_eq!(session.state().phase, SessionPhase::Completed);
    }

    #[tokio::test]
    async fn sentence_completion_accepts_any_alternative() {
        let plan = TestPlan {
            sections: vec![Section {
                title: "Part E".to_string(),
                description: String::new(),
                time: 45,
                questions: vec![Question::SentenceCompletion {
                    audio: String::new(),
                    text: "Please ___ the report.".to_string(),
                    solution: "send / submit".to_string(),
                }],
            }],
        };

        let mut session = session(plan);
        session.begin();

        let correct = session
            .submit_sentence_completion("Submit", 2)
            .await
            .unwrap();
        assert!(correct);

        let store = session.store();
        let store = store.lock();
        let Answer::SentenceCompletion(answer) = &store.get(0, 0).unwrap().answer else {
            panic!("wrong answer variant");
        };
        assert!(answer.is_correct);
        assert_eq!(answer.attempts, 2);
    }

    #[tokio::test]
    async fn skipping_every_question_still_completes() {
        let mut session = session(two_question_plan());
        session.begin();
        session.skip_question().await.unwrap();
        session.skip_question().await.unwrap();

        assert_eq!(session.state().phase, SessionPhase::Completed);
        assert!(session.store().lock().is_empty());
    }

    #[tokio::test]
    async fn abort_discards_in_flight_recording() {
        let mut session = session(two_question_plan());
        session.begin();
        session.start_recording().unwrap();
        session.abort();

        assert_eq!(session.state().phase, SessionPhase::Completed);
        assert!(session.cancel_token().is_cancelled());
        assert!(session.store().lock().is_empty());
    }
}
