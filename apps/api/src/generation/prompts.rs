// Prompt templates for the four artifact kinds.
// Placeholders: {job_description}, {company}, {cv_text}, {job_title}, {language}.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::generation::schemas::ArtifactKind;
use crate::llm_client::prompts::LANGUAGE_INSTRUCTION;

/// Inputs interpolated into a prompt template.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub job_description: &'a str,
    pub company: &'a str,
    pub cv_text: &'a str,
    pub job_title: &'a str,
}

pub const ANALYSIS_PROMPT_TEMPLATE: &str = r#"You are an expert ATS (Applicant Tracking System) and Resume Coach.
Analyze the following CV against the provided Job Description.

{language}

JOB DESCRIPTION:
{job_description}

TARGET COMPANY:
{company}

CV CONTENT:
{cv_text}

For 'jobDescriptionSummary', create a concise summary of the provided Job Description in Bahasa Indonesia, maximum 3 sentences.
If 'company' is not explicitly mentioned in the Job Description, use "{company}".
Score every section from 0 to 100. Be critical but constructive."#;

pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"You are an expert Resume Writer and Career Coach.
Based on the user's CV content and the target Job Description, generate 3 distinct Professional Summary options for their CV.

Option 1: Professional (safe, standard corporate tone, polished)
Option 2: Achievement Based (focus on metrics, results, and action verbs)
Option 3: Creative (showcasing personality, passion, and potential)

{language}
Each summary should be approximately 3-5 sentences long. Return them in the order above.

JOB DESCRIPTION:
{job_description}

TARGET COMPANY:
{company}

CV CONTENT:
{cv_text}"#;

pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"You are an expert Career Coach and Professional Writer.
Write a persuasive Cover Letter for the user based on their CV and the Job Description.

The tone should be professional, confident and enthusiastic.

Rules:
1. {language}
2. Customize the letter specifically for the company: "{company}".
3. Highlight key achievements from the CV that match the Job Description.
4. Keep it concise (approximately 300-400 words).
5. Also provide exactly 4 strength points explaining why this cover letter is effective (e.g. "Mentioned specific company value", "Quantified achievement in paragraph 2").

JOB DESCRIPTION:
{job_description}

CV CONTENT:
{cv_text}

TARGET COMPANY:
{company}"#;

pub const INTERVIEW_PROMPT_TEMPLATE: &str = r#"You are an expert Interview Coach.
Generate exactly 10 interview questions for a candidate applying for:
Job Title: {job_title}
Company: {company}

Distribution:
- Behavioral: 4 questions (STAR method focus, category 'behavioral')
- Technical: 4 questions (based on skills in the JD and CV, category 'technical')
- About Company: 2 questions (research focused, category 'company')

Rules:
- {language}
- Questions should be specific to the role and company.
- Valid categories are: 'behavioral', 'technical', 'company'.

For each question, provide:
1. A good answer guide including structure, key points and a specific example.
2. Bad answer examples and an explanation of why they are bad.

JOB DESCRIPTION:
{job_description}

CV CONTENT:
{cv_text}"#;

fn template_for(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Analysis => ANALYSIS_PROMPT_TEMPLATE,
        ArtifactKind::Summary => SUMMARY_PROMPT_TEMPLATE,
        ArtifactKind::CoverLetter => COVER_LETTER_PROMPT_TEMPLATE,
        ArtifactKind::Interview => INTERVIEW_PROMPT_TEMPLATE,
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(language|job_title|company|job_description|cv_text)\}")
            .expect("valid placeholder regex")
    })
}

/// Renders the prompt for `kind` in a single pass over the template, so
/// substituted text is never scanned for placeholders again.
pub fn build_prompt(kind: ArtifactKind, ctx: &PromptContext<'_>) -> String {
    placeholder_re()
        .replace_all(template_for(kind), |caps: &Captures<'_>| match &caps[1] {
            "language" => LANGUAGE_INSTRUCTION,
            "job_title" => ctx.job_title,
            "company" => ctx.company,
            "job_description" => ctx.job_description,
            _ => ctx.cv_text,
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext<'static> {
        PromptContext {
            job_description: "Backend engineer with Rust",
            company: "PT Contoh",
            cv_text: "Five years of Rust",
            job_title: "Backend Engineer",
        }
    }

    #[test]
    fn test_every_placeholder_is_filled() {
        for kind in [
            ArtifactKind::Analysis,
            ArtifactKind::Summary,
            ArtifactKind::CoverLetter,
            ArtifactKind::Interview,
        ] {
            let prompt = build_prompt(kind, &ctx());
            assert!(!prompt.contains("{company}"), "{kind} left a placeholder");
            assert!(!prompt.contains("{job_description}"), "{kind} left a placeholder");
            assert!(!prompt.contains("{language}"), "{kind} left a placeholder");
            assert!(prompt.contains("Bahasa Indonesia"));
            assert!(prompt.contains("PT Contoh"));
        }
    }

    #[test]
    fn test_interview_prompt_names_job_title() {
        let prompt = build_prompt(ArtifactKind::Interview, &ctx());
        assert!(prompt.contains("Job Title: Backend Engineer"));
    }

    #[test]
    fn test_braces_in_cv_text_are_left_alone() {
        let mut c = ctx();
        c.cv_text = "Built {company} dashboards";
        let prompt = build_prompt(ArtifactKind::Summary, &c);
        assert!(prompt.contains("Built {company} dashboards"));
    }

    #[test]
    fn test_placeholders_in_user_text_are_not_expanded() {
        let c = PromptContext {
            job_description: "We use templates like {cv_text} and {language}",
            company: "{job_description}",
            cv_text: "CV-MARKER",
            job_title: "",
        };
        let prompt = build_prompt(ArtifactKind::Summary, &c);

        assert_eq!(prompt.matches("CV-MARKER").count(), 1);
        assert_eq!(prompt.matches("We use templates like").count(), 1);
        assert!(prompt.contains("We use templates like {cv_text} and {language}"));
        assert!(prompt.contains("TARGET COMPANY:\n{job_description}"));
    }
}
