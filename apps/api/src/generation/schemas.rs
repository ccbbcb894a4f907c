//! Artifact schemas: the typed shape of every structured model output.
//!
//! Each artifact carries three things: the JSON schema handed to the provider
//! as a tool `input_schema`, a `validate` pass for constraints JSON schema alone
//! does not pin down reliably (exact counts, distinctness, ranges), and an
//! optional `finalize` step run after validation.

use std::collections::HashSet;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

// ────────────────────────────────────────────────────────────────────────────
// Artifact kinds
// ────────────────────────────────────────────────────────────────────────────

/// The four generation tasks sharing one generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Analysis,
    Summary,
    CoverLetter,
    Interview,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Analysis => "analysis",
            ArtifactKind::Summary => "summary",
            ArtifactKind::CoverLetter => "cover-letter",
            ArtifactKind::Interview => "interview",
        }
    }

    /// Name of the tool the model is forced to call.
    pub fn tool_name(&self) -> &'static str {
        match self {
            ArtifactKind::Analysis => "record_cv_analysis",
            ArtifactKind::Summary => "record_summary_options",
            ArtifactKind::CoverLetter => "record_cover_letter",
            ArtifactKind::Interview => "record_interview_pack",
        }
    }

    pub fn tool_description(&self) -> &'static str {
        match self {
            ArtifactKind::Analysis => "Record the ATS analysis of the CV against the job description.",
            ArtifactKind::Summary => "Record exactly three professional summary options.",
            ArtifactKind::CoverLetter => "Record the cover letter and four effectiveness tips.",
            ArtifactKind::Interview => "Record exactly ten interview questions with answer guides.",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured model output with a fixed schema.
pub trait Artifact: Serialize + DeserializeOwned + Send + Sized + 'static {
    const KIND: ArtifactKind;

    /// JSON schema handed to the provider.
    fn input_schema() -> Value;

    /// Constraints checked after deserialization. Returns a human-readable reason.
    fn validate(&self) -> Result<(), String>;

    /// Post-validation normalization.
    fn finalize(&mut self) {}
}

fn string_array(description: &str) -> Value {
    json!({"type": "array", "items": {"type": "string"}, "description": description})
}

fn ensure_non_blank(items: &[String], field: &str) -> Result<(), String> {
    if items.iter().any(|s| s.trim().is_empty()) {
        return Err(format!("{field} contains an empty entry"));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// 1. Analysis
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStatus {
    Excellent,
    Good,
    NeedsImprovement,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Excellent => "excellent",
            AnalysisStatus::Good => "good",
            AnalysisStatus::NeedsImprovement => "needs-improvement",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSets {
    pub found: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionScore {
    pub score: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSections {
    pub format: SectionScore,
    pub content: SectionScore,
    pub keywords: SectionScore,
    pub experience: SectionScore,
}

/// Full analysis payload, persisted verbatim as `analysis_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvAnalysis {
    pub score: f64,
    pub status: AnalysisStatus,
    pub job_title: String,
    pub company: String,
    pub job_description_summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub keywords: KeywordSets,
    pub sections: AnalysisSections,
}

impl CvAnalysis {
    /// Overall score as stored in the `score` column.
    pub fn rounded_score(&self) -> i32 {
        self.score.round().clamp(0.0, 100.0) as i32
    }
}

fn section_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": {"type": "number", "minimum": 0, "maximum": 100},
            "feedback": {"type": "string", "description": "Feedback in Bahasa Indonesia"}
        },
        "required": ["score", "feedback"]
    })
}

fn score_in_range(score: f64, field: &str) -> Result<(), String> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(format!("{field} must be between 0 and 100, got {score}"));
    }
    Ok(())
}

impl Artifact for CvAnalysis {
    const KIND: ArtifactKind = ArtifactKind::Analysis;

    fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "score": {
                    "type": "number", "minimum": 0, "maximum": 100,
                    "description": "Score from 0 to 100 based on match with job description"
                },
                "status": {
                    "type": "string",
                    "enum": ["excellent", "good", "needs-improvement"],
                    "description": "Overall status of the CV"
                },
                "jobTitle": {"type": "string", "description": "Extracted or inferred job title from CV or JD"},
                "company": {
                    "type": "string",
                    "description": "Extracted company/industry name from JD if available, or \"Target Company\""
                },
                "jobDescriptionSummary": {
                    "type": "string",
                    "description": "A concise summary of the job description in Bahasa Indonesia, maximum 3 sentences."
                },
                "strengths": string_array("List of strong points in the CV in Bahasa Indonesia"),
                "weaknesses": string_array("List of weak points or missing skills in Bahasa Indonesia"),
                "suggestions": string_array("Actionable suggestions for improvement in Bahasa Indonesia"),
                "keywords": {
                    "type": "object",
                    "properties": {
                        "found": string_array("Keywords from JD found in CV"),
                        "missing": string_array("Important keywords from JD missing in CV")
                    },
                    "required": ["found", "missing"]
                },
                "sections": {
                    "type": "object",
                    "properties": {
                        "format": section_schema(),
                        "content": section_schema(),
                        "keywords": section_schema(),
                        "experience": section_schema()
                    },
                    "required": ["format", "content", "keywords", "experience"]
                }
            },
            "required": [
                "score", "status", "jobTitle", "company", "jobDescriptionSummary",
                "strengths", "weaknesses", "suggestions", "keywords", "sections"
            ]
        })
    }

    fn validate(&self) -> Result<(), String> {
        score_in_range(self.score, "score")?;
        score_in_range(self.sections.format.score, "sections.format.score")?;
        score_in_range(self.sections.content.score, "sections.content.score")?;
        score_in_range(self.sections.keywords.score, "sections.keywords.score")?;
        score_in_range(self.sections.experience.score, "sections.experience.score")?;
        if self.job_description_summary.trim().is_empty() {
            return Err("jobDescriptionSummary is empty".to_string());
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// 2. Summary options
// ────────────────────────────────────────────────────────────────────────────

pub const SUMMARY_OPTION_COUNT: usize = 3;

/// Three summary variants: professional, achievement-based, creative (in that order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOptions {
    pub options: Vec<String>,
}

impl Artifact for SummaryOptions {
    const KIND: ArtifactKind = ArtifactKind::Summary;

    fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "options": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": SUMMARY_OPTION_COUNT,
                    "maxItems": SUMMARY_OPTION_COUNT,
                    "description": "Three different professional summary options in Bahasa Indonesia: professional, achievement based, creative"
                }
            },
            "required": ["options"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.options.len() != SUMMARY_OPTION_COUNT {
            return Err(format!(
                "expected {SUMMARY_OPTION_COUNT} summary options, got {}",
                self.options.len()
            ));
        }
        ensure_non_blank(&self.options, "options")?;
        let distinct: HashSet<&str> = self.options.iter().map(|o| o.trim()).collect();
        if distinct.len() != self.options.len() {
            return Err("summary options are not distinct".to_string());
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// 3. Cover letter
// ────────────────────────────────────────────────────────────────────────────

pub const COVER_LETTER_TIP_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverLetterTips {
    pub strengths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterDraft {
    pub cover_letter: String,
    pub tips: CoverLetterTips,
}

impl Artifact for CoverLetterDraft {
    const KIND: ArtifactKind = ArtifactKind::CoverLetter;

    fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "coverLetter": {"type": "string", "description": "The complete cover letter text in Bahasa Indonesia"},
                "tips": {
                    "type": "object",
                    "properties": {
                        "strengths": {
                            "type": "array",
                            "items": {"type": "string"},
                            "minItems": COVER_LETTER_TIP_COUNT,
                            "maxItems": COVER_LETTER_TIP_COUNT,
                            "description": "List of 4 strong points about this specific cover letter based on the CV and JD"
                        }
                    },
                    "required": ["strengths"]
                }
            },
            "required": ["coverLetter", "tips"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.cover_letter.trim().is_empty() {
            return Err("coverLetter is empty".to_string());
        }
        if self.tips.strengths.len() != COVER_LETTER_TIP_COUNT {
            return Err(format!(
                "expected {COVER_LETTER_TIP_COUNT} cover letter tips, got {}",
                self.tips.strengths.len()
            ));
        }
        ensure_non_blank(&self.tips.strengths, "tips.strengths")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// 4. Interview pack
// ────────────────────────────────────────────────────────────────────────────

pub const INTERVIEW_QUESTION_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionCategory {
    Behavioral,
    Technical,
    Company,
}

impl QuestionCategory {
    /// Required number of questions per category.
    pub fn quota(&self) -> usize {
        match self {
            QuestionCategory::Behavioral => 4,
            QuestionCategory::Technical => 4,
            QuestionCategory::Company => 2,
        }
    }

    pub const ALL: [QuestionCategory; 3] = [
        QuestionCategory::Behavioral,
        QuestionCategory::Technical,
        QuestionCategory::Company,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodAnswer {
    pub structure: String,
    pub key_points: Vec<String>,
    pub example: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadAnswer {
    pub examples: Vec<String>,
    pub why_bad: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewQuestion {
    /// Provider ids are not trusted; replaced by `q-N` in `finalize`.
    #[serde(default)]
    pub id: String,
    pub category: QuestionCategory,
    pub question: String,
    pub good_answer: GoodAnswer,
    pub bad_answer: BadAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewPack {
    pub questions: Vec<InterviewQuestion>,
}

impl InterviewPack {
    pub fn count_by_category(&self, category: QuestionCategory) -> usize {
        self.questions
            .iter()
            .filter(|q| q.category == category)
            .count()
    }
}

impl Artifact for InterviewPack {
    const KIND: ArtifactKind = ArtifactKind::Interview;

    fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "minItems": INTERVIEW_QUESTION_COUNT,
                    "maxItems": INTERVIEW_QUESTION_COUNT,
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "category": {"type": "string", "enum": ["behavioral", "technical", "company"]},
                            "question": {"type": "string"},
                            "goodAnswer": {
                                "type": "object",
                                "properties": {
                                    "structure": {"type": "string", "description": "Recommended structure for the answer"},
                                    "keyPoints": string_array("Key points to cover"),
                                    "example": {"type": "string", "description": "A strong example answer"}
                                },
                                "required": ["structure", "keyPoints", "example"]
                            },
                            "badAnswer": {
                                "type": "object",
                                "properties": {
                                    "examples": string_array("Examples of weak or bad answers"),
                                    "whyBad": string_array("Reasons why these answers are bad")
                                },
                                "required": ["examples", "whyBad"]
                            }
                        },
                        "required": ["id", "category", "question", "goodAnswer", "badAnswer"]
                    }
                }
            },
            "required": ["questions"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.questions.len() != INTERVIEW_QUESTION_COUNT {
            return Err(format!(
                "expected {INTERVIEW_QUESTION_COUNT} interview questions, got {}",
                self.questions.len()
            ));
        }
        for category in QuestionCategory::ALL {
            let count = self.count_by_category(category);
            if count != category.quota() {
                return Err(format!(
                    "expected {} {:?} questions, got {count}",
                    category.quota(),
                    category
                ));
            }
        }
        if self.questions.iter().any(|q| q.question.trim().is_empty()) {
            return Err("interview question text is empty".to_string());
        }
        Ok(())
    }

    fn finalize(&mut self) {
        for (i, question) in self.questions.iter_mut().enumerate() {
            question.id = format!("q-{}", i + 1);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_analysis_deserializes_and_validates() {
        let analysis: CvAnalysis = serde_json::from_value(analysis_json(82.6)).unwrap();
        assert!(analysis.validate().is_ok());
        assert_eq!(analysis.status, AnalysisStatus::Good);
        assert_eq!(analysis.rounded_score(), 83);
    }

    #[test]
    fn test_analysis_rejects_out_of_range_score() {
        let analysis: CvAnalysis = serde_json::from_value(analysis_json(140.0)).unwrap();
        assert!(analysis.validate().unwrap_err().contains("score"));
    }

    #[test]
    fn test_analysis_rejects_unknown_status() {
        let mut value = analysis_json(50.0);
        value["status"] = "perfect".into();
        assert!(serde_json::from_value::<CvAnalysis>(value).is_err());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(AnalysisStatus::NeedsImprovement).unwrap(),
            "needs-improvement"
        );
        assert_eq!(AnalysisStatus::NeedsImprovement.as_str(), "needs-improvement");
    }

    #[test]
    fn test_summary_requires_three_distinct_options() {
        let ok = SummaryOptions {
            options: vec!["A".into(), "B".into(), "C".into()],
        };
        assert!(ok.validate().is_ok());

        let two = SummaryOptions {
            options: vec!["A".into(), "B".into()],
        };
        assert!(two.validate().is_err());

        let duplicate = SummaryOptions {
            options: vec!["A".into(), "A ".into(), "C".into()],
        };
        assert!(duplicate.validate().unwrap_err().contains("distinct"));
    }

    #[test]
    fn test_cover_letter_requires_four_tips() {
        let draft = CoverLetterDraft {
            cover_letter: "Yth. Tim Rekrutmen".into(),
            tips: CoverLetterTips {
                strengths: vec!["a".into(), "b".into(), "c".into()],
            },
        };
        assert!(draft.validate().unwrap_err().contains("4"));
    }

    #[test]
    fn test_cover_letter_uses_camel_case_keys() {
        let value = serde_json::json!({"coverLetter": "Isi", "tips": {"strengths": ["1", "2", "3", "4"]}});
        let draft: CoverLetterDraft = serde_json::from_value(value).unwrap();
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_interview_distribution_enforced() {
        let pack: InterviewPack =
            serde_json::from_value(interview_json(&STANDARD_DISTRIBUTION)).unwrap();
        assert!(pack.validate().is_ok());

        let mut skewed = STANDARD_DISTRIBUTION;
        skewed[9] = "technical";
        let pack: InterviewPack = serde_json::from_value(interview_json(&skewed)).unwrap();
        assert!(pack.validate().is_err());

        let pack: InterviewPack =
            serde_json::from_value(interview_json(&STANDARD_DISTRIBUTION[..9])).unwrap();
        assert!(pack.validate().unwrap_err().contains("10"));
    }

    #[test]
    fn test_interview_finalize_assigns_sequential_ids() {
        let mut pack: InterviewPack =
            serde_json::from_value(interview_json(&STANDARD_DISTRIBUTION)).unwrap();
        pack.finalize();
        let ids: Vec<&str> = pack.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids.first(), Some(&"q-1"));
        assert_eq!(ids.last(), Some(&"q-10"));
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), INTERVIEW_QUESTION_COUNT);
    }

    #[test]
    fn test_interview_question_without_id_deserializes() {
        let mut value = interview_json(&STANDARD_DISTRIBUTION);
        value["questions"][0].as_object_mut().unwrap().remove("id");
        let pack: InterviewPack = serde_json::from_value(value).unwrap();
        assert_eq!(pack.questions[0].id, "");
    }

    #[test]
    fn test_every_schema_is_an_object_with_required_fields() {
        for schema in [
            CvAnalysis::input_schema(),
            SummaryOptions::input_schema(),
            CoverLetterDraft::input_schema(),
            InterviewPack::input_schema(),
        ] {
            assert_eq!(schema["type"], "object");
            assert!(!schema["required"].as_array().unwrap().is_empty());
        }
    }
}
