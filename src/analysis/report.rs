use super::state::{AnalysisSession, AnalysisStatus};
use super::types::SentimentAnalysis;
use serde::Serialize;
use std::fmt;

/// Video 50 + audio 50.
pub const MAX_SCORE: f64 = 100.0;
pub const MAX_WORDS_SHOWN: usize = 4;
const SCORE_GAP: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 95.0 => Grade::APlus,
            s if s >= 85.0 => Grade::A,
            s if s >= 75.0 => Grade::B,
            s if s >= 65.0 => Grade::C,
            s if s >= 55.0 => Grade::D,
            _ => Grade::F,
        }
    }

    /// C or better.
    pub fn is_passing(&self) -> bool {
        *self <= Grade::C
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Headline {
    AnalyzingBoth,
    AnalyzingVideo,
    AnalyzingAudio,
    VerbalStronger,
    NonVerbalStronger,
    Balanced,
    NeedsImprovement,
    NotStarted,
}

impl Headline {
    pub fn title(&self) -> &'static str {
        match self {
            Headline::AnalyzingBoth => "Analyzing...",
            Headline::AnalyzingVideo => "Analyzing video...",
            Headline::AnalyzingAudio => "Analyzing voice...",
            Headline::VerbalStronger => "Your verbal delivery stood out!",
            Headline::NonVerbalStronger => "Your non-verbal delivery stood out!",
            Headline::Balanced => "A balanced interview!",
            Headline::NeedsImprovement => "Room for improvement.",
            Headline::NotStarted => "Starting analysis...",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Headline::AnalyzingBoth | Headline::AnalyzingVideo | Headline::AnalyzingAudio => {
                "Please wait a moment."
            }
            Headline::VerbalStronger => "You scored higher on verbal feedback.",
            Headline::NonVerbalStronger => "You scored higher on non-verbal feedback.",
            Headline::Balanced => "Verbal and non-verbal delivery are well balanced.",
            Headline::NeedsImprovement => {
                "The analysis is complete but the score is low. Some areas need work."
            }
            Headline::NotStarted => "Starting analysis.",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SentimentBreakdown {
    pub confidence: Option<u32>,
    pub emotional_stability: Option<u32>,
    pub sentiment_score: Option<u32>,
    pub stress_level: Option<u32>,
}

impl From<&SentimentAnalysis> for SentimentBreakdown {
    fn from(raw: &SentimentAnalysis) -> Self {
        Self {
            confidence: parse_percentage(raw.confidence_level.as_deref()),
            emotional_stability: parse_percentage(raw.emotional_stability.as_deref()),
            sentiment_score: parse_percentage(raw.sentiment_score.as_deref()),
            stress_level: parse_percentage(raw.stress_level.as_deref()),
        }
    }
}

/// `"85%"` -> 85. Zero and non-numeric values mean the service had no reading.
pub fn parse_percentage(value: Option<&str>) -> Option<u32> {
    let digits = value?.trim().trim_end_matches('%').trim();
    match digits.parse::<f64>() {
        Ok(v) if v > 0.0 => Some(v.trunc() as u32),
        _ => None,
    }
}

/// Everything the score section of the report renders, derived from a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub video_score: f64,
    pub audio_score: f64,
    pub total_score: f64,
    pub grade: Grade,
    pub headline: Headline,
    pub sentiment: Option<SentimentBreakdown>,
    pub detailed_feedback: Option<String>,
    pub frequent_words: Vec<String>,
}

impl ScoreReport {
    pub fn from_session(session: &AnalysisSession) -> Self {
        let video = session.analysis_results.video.as_ref();
        let audio = session.analysis_results.audio.as_ref();

        let video_score = video.and_then(|v| v.score).unwrap_or(0.0);
        let audio_score = audio.and_then(|a| a.score).unwrap_or(0.0);
        let total_score = video_score + audio_score;
        let grade = Grade::from_score(total_score);

        Self {
            video_score,
            audio_score,
            total_score,
            grade,
            headline: headline(session, video_score, audio_score, grade),
            sentiment: video
                .and_then(|v| v.sentiment_analysis.as_ref())
                .map(SentimentBreakdown::from),
            detailed_feedback: video
                .and_then(|v| v.detailed_feedback.clone())
                .filter(|f| !f.trim().is_empty()),
            frequent_words: audio
                .map(|a| {
                    a.frequently_used_words
                        .iter()
                        .take(MAX_WORDS_SHOWN)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn headline(session: &AnalysisSession, video_score: f64, audio_score: f64, grade: Grade) -> Headline {
    use AnalysisStatus::{Analyzing, Completed};

    match (
        session.individual_status.video,
        session.individual_status.audio,
    ) {
        (Analyzing, Analyzing) => Headline::AnalyzingBoth,
        (Analyzing, _) => Headline::AnalyzingVideo,
        (_, Analyzing) => Headline::AnalyzingAudio,
        (Completed, Completed) if !grade.is_passing() => Headline::NeedsImprovement,
        (Completed, Completed) if (video_score - audio_score).abs() < SCORE_GAP => {
            Headline::Balanced
        }
        (Completed, Completed) if video_score < audio_score => Headline::VerbalStronger,
        (Completed, Completed) => Headline::NonVerbalStronger,
        _ => Headline::NotStarted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::state::IndividualStatus;
    use crate::testing::{sample_audio_result, sample_video_result};

    fn completed(video: f64, audio: f64) -> AnalysisSession {
        let mut session = AnalysisSession::default();
        session.individual_status = IndividualStatus {
            video: AnalysisStatus::Completed,
            audio: AnalysisStatus::Completed,
        };
        session.analysis_results.video = Some(sample_video_result(video));
        session.analysis_results.audio = Some(sample_audio_result(audio));
        session
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(Grade::from_score(100.0), Grade::APlus);
        assert_eq!(Grade::from_score(95.0), Grade::APlus);
        assert_eq!(Grade::from_score(94.9), Grade::A);
        assert_eq!(Grade::from_score(75.0), Grade::B);
        assert_eq!(Grade::from_score(65.0), Grade::C);
        assert_eq!(Grade::from_score(55.0), Grade::D);
        assert_eq!(Grade::from_score(54.0), Grade::F);
        assert!(Grade::C.is_passing());
        assert!(!Grade::D.is_passing());
        assert_eq!(Grade::APlus.to_string(), "A+");
    }

    #[test]
    fn headline_follows_score_gap() {
        assert_eq!(
            ScoreReport::from_session(&completed(30.0, 45.0)).headline,
            Headline::VerbalStronger
        );
        assert_eq!(
            ScoreReport::from_session(&completed(45.0, 30.0)).headline,
            Headline::NonVerbalStronger
        );
        assert_eq!(
            ScoreReport::from_session(&completed(40.0, 36.0)).headline,
            Headline::Balanced
        );
        assert_eq!(
            ScoreReport::from_session(&completed(30.0, 20.0)).headline,
            Headline::NeedsImprovement
        );
    }

    #[test]
    fn pending_side_is_reported() {
        let mut session = completed(40.0, 40.0);
        session.individual_status.audio = AnalysisStatus::Analyzing;
        assert_eq!(
            ScoreReport::from_session(&session).headline,
            Headline::AnalyzingAudio
        );

        session.individual_status.video = AnalysisStatus::Analyzing;
        assert_eq!(
            ScoreReport::from_session(&session).headline,
            Headline::AnalyzingBoth
        );

        assert_eq!(
            ScoreReport::from_session(&AnalysisSession::default()).headline,
            Headline::NotStarted
        );
    }

    #[test]
    fn partial_results_still_render() {
        let mut session = completed(42.0, 0.0);
        session.individual_status.audio = AnalysisStatus::Error;
        session.analysis_results.audio = None;

        let report = ScoreReport::from_session(&session);

        assert_eq!(report.total_score, 42.0);
        assert!(report.frequent_words.is_empty());
        assert_eq!(report.sentiment.unwrap().confidence, Some(80));
        assert_eq!(report.headline, Headline::NotStarted);
    }

    #[test]
    fn details_are_trimmed_for_display() {
        let report = ScoreReport::from_session(&completed(40.0, 40.0));

        assert_eq!(report.frequent_words.len(), MAX_WORDS_SHOWN);
        let sentiment = report.sentiment.unwrap();
        assert_eq!(sentiment.emotional_stability, Some(75));
        assert_eq!(sentiment.sentiment_score, None);
        assert_eq!(sentiment.stress_level, None);
    }

    #[test]
    fn percentage_parsing() {
        assert_eq!(parse_percentage(Some("85%")), Some(85));
        assert_eq!(parse_percentage(Some(" 12.7 % ")), Some(12));
        assert_eq!(parse_percentage(Some("0%")), None);
        assert_eq!(parse_percentage(Some("n/a")), None);
        assert_eq!(parse_percentage(None), None);
    }
}
