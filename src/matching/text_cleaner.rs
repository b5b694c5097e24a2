use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Fixed, closed-vocabulary skill lexicon. A configuration input, not
/// hard-coded policy — swapping this list bumps `CLEANING_VERSION`. Multi-
/// word phrases are matched as whole phrases; special characters like `c++`
/// and `node.js` are matched literally.
pub const DEFAULT_SKILL_LEXICON: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "c++",
    "c#",
    "go",
    "rust",
    "sql",
    "nosql",
    "mongodb",
    "postgresql",
    "mysql",
    "redis",
    "aws",
    "azure",
    "gcp",
    "docker",
    "kubernetes",
    "terraform",
    "react",
    "angular",
    "vue",
    "node.js",
    "django",
    "flask",
    "fastapi",
    "machine learning",
    "deep learning",
    "nlp",
    "computer vision",
    "tensorflow",
    "pytorch",
    "scikit-learn",
    "pandas",
    "numpy",
    "git",
    "ci/cd",
    "agile",
    "scrum",
    "jira",
    "rest",
    "graphql",
    "microservices",
    "api",
];

static HTML_TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static MULTI_SPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static MULTI_NEWLINE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static BOILERPLATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)equal\s+opportunity\s+employer").unwrap(),
        Regex::new(r"(?i)\b(eoe|eeo)\b").unwrap(),
        Regex::new(r"(?i)by\s+applying.{0,40}you\s+agree").unwrap(),
        Regex::new(r"(?i)accommodations?\s+available").unwrap(),
        Regex::new(r"(?i)we\s+are\s+an\s+equal\s+opportunity").unwrap(),
        Regex::new(r"(?i)click\s+(here\s+)?to\s+apply").unwrap(),
        Regex::new(r"(?i)\bapply\s+now\b").unwrap(),
    ]
});

/// Result of a cleaning pass, with diagnostics about how much was stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanTextResult {
    pub text: String,
    pub was_html: bool,
    pub removed_chars: usize,
    pub original_length: usize,
}

impl CleanTextResult {
    pub fn compression_ratio(&self) -> f64 {
        if self.original_length == 0 {
            return 0.0;
        }
        self.removed_chars as f64 / self.original_length as f64
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn collapse_whitespace(text: &str) -> String {
    let collapsed_spaces = MULTI_SPACE_PATTERN.replace_all(text, " ");
    MULTI_NEWLINE_PATTERN
        .replace_all(&collapsed_spaces, "\n\n")
        .into_owned()
}

fn strip_boilerplate_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return true;
            }
            !BOILERPLATE_PATTERNS.iter().any(|p| p.is_match(trimmed))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn clean_pipeline(text: &str, strip_boilerplate: bool) -> CleanTextResult {
    let original_length = text.chars().count();
    let was_html = HTML_TAG_PATTERN.is_match(text);

    let stripped = HTML_TAG_PATTERN.replace_all(text, " ");
    let decoded = decode_entities(&stripped);
    let normalized = normalize_line_endings(&decoded);
    let collapsed = collapse_whitespace(&normalized);
    let filtered = if strip_boilerplate {
        strip_boilerplate_lines(&collapsed)
    } else {
        collapsed
    };
    let result_text = filtered.trim().to_string();

    let removed_chars = original_length.saturating_sub(result_text.chars().count());

    CleanTextResult {
        text: result_text,
        was_html,
        removed_chars,
        original_length,
    }
}

/// Cleans a job posting: strips markup, decodes entities, normalizes
/// whitespace, and drops boilerplate lines (equal-opportunity language,
/// "apply now", etc). Idempotent: `clean_job_text(clean_job_text(t).text) ==
/// clean_job_text(t)`.
pub fn clean_job_text(text: &str) -> CleanTextResult {
    clean_pipeline(text, true)
}

/// Cleans résumé text with the same pipeline, **omitting boilerplate
/// removal** — a résumé may legitimately contain "equal opportunity" or
/// "apply" in its own text (e.g. describing past work), and this function
/// must never silently discard résumé content.
pub fn clean_resume_text(text: &str) -> CleanTextResult {
    clean_pipeline(text, false)
}

/// Matches the fixed skill lexicon against lowercased text with word-
/// boundary semantics; multi-word phrases match as whole phrases; special
/// characters (`c++`, `node.js`) match literally. Returns a sorted,
/// duplicate-free list of canonical lowercase skill tokens.
pub fn extract_skills(text: &str, lexicon: &[&str]) -> Vec<String> {
    let lowercased = text.to_lowercase();
    let mut found: Vec<String> = lexicon
        .iter()
        .filter(|skill| skill_matches(&lowercased, skill))
        .map(|s| s.to_string())
        .collect();
    found.sort();
    found.dedup();
    found
}

pub fn extract_skills_default(text: &str) -> Vec<String> {
    extract_skills(text, DEFAULT_SKILL_LEXICON)
}

/// Word-boundary matching for tokens made only of plain word characters can
/// use `\b`; skills containing special characters (c++, node.js, c#, ci/cd)
/// need a literal non-alphanumeric-neighbor check instead, since `\b` does
/// not fire around symbol characters the way it does around letters.
fn compile_skill_pattern(skill: &str) -> Regex {
    if skill.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        Regex::new(&format!(r"\b{}\b", regex::escape(skill))).expect("valid skill pattern")
    } else {
        Regex::new(&format!(r"(?:^|[^a-z0-9]){}(?:$|[^a-z0-9])", regex::escape(skill)))
            .expect("valid skill pattern")
    }
}

/// One precompiled regex per `DEFAULT_SKILL_LEXICON` entry, built once. This
/// is the hot path — `extract_skills_default` is called once per candidate
/// job from `compute_skill_overlap` in C4's scoring loop — so skills from the
/// default lexicon never pay a per-call `Regex::new`. A caller-supplied
/// custom lexicon (outside the default list) still compiles on demand.
static DEFAULT_LEXICON_PATTERNS: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    DEFAULT_SKILL_LEXICON
        .iter()
        .map(|skill| (*skill, compile_skill_pattern(skill)))
        .collect()
});

fn skill_matches(lowercased_text: &str, skill: &str) -> bool {
    let padded = format!(" {lowercased_text} ");
    match DEFAULT_LEXICON_PATTERNS.get(skill) {
        Some(re) => re.is_match(&padded),
        None => compile_skill_pattern(skill).is_match(&padded),
    }
}

/// Assembles the canonical document passed to the embedder:
/// `Title: X\nCompany: Y\nLocation: Z\n\nDescription:\n<description>`.
/// The description is cleaned first if it still contains markup, then
/// truncated on a word boundary with `"..."` appended if cut.
pub fn build_job_document(
    title: &str,
    company: &str,
    location: &str,
    description: &str,
    max_description_chars: usize,
) -> String {
    let title = title.trim();
    let company = company.trim();
    let location = location.trim();

    let description = if description.contains('<') && description.contains('>') {
        clean_job_text(description).text
    } else {
        description.trim().to_string()
    };

    let truncated = truncate_on_word_boundary(&description, max_description_chars);

    format!("Title: {title}\nCompany: {company}\nLocation: {location}\n\nDescription:\n{truncated}")
}

fn truncate_on_word_boundary(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = chars[..max_chars].iter().collect();
    match truncated.rsplit_once(' ') {
        Some((head, _)) => format!("{head}..."),
        None => format!("{truncated}..."),
    }
}

/// Counts non-whitespace characters; default `min=100` for jobs, `min=200`
/// for résumés, per spec §4.1.
pub fn is_text_too_short(text: &str, min_chars: usize) -> bool {
    let non_whitespace = text.chars().filter(|c| !c.is_whitespace()).count();
    non_whitespace < min_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_job_text_strips_boilerplate() {
        let input = "Great role.\nWe are an equal opportunity employer.\nApply now!\nMore details here.";
        let result = clean_job_text(input);
        assert!(!result.text.to_lowercase().contains("equal opportunity"));
        assert!(!result.text.to_lowercase().contains("apply now"));
        assert!(result.text.contains("Great role."));
        assert!(result.text.contains("More details here."));
    }

    #[test]
    fn test_clean_job_text_idempotent() {
        let input = "<p>Job description</p> with   extra   spaces.\n\n\n\nAnd more.";
        let once = clean_job_text(input);
        let twice = clean_job_text(&once.text);
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn test_clean_resume_text_preserves_equal_opportunity_and_apply() {
        let input = "I worked at an equal opportunity employer and helped candidates apply for jobs.";
        let result = clean_resume_text(input);
        assert!(result.text.to_lowercase().contains("equal opportunity"));
        assert!(result.text.to_lowercase().contains("apply"));
    }

    #[test]
    fn test_clean_resume_text_idempotent() {
        let input = "Résumé   text\r\nwith   mixed   line endings\r and spacing.";
        let once = clean_resume_text(input);
        let twice = clean_resume_text(&once.text);
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn test_clean_strips_html_tags_and_decodes_entities() {
        let input = "<div>Join our team &amp; grow</div>";
        let result = clean_job_text(input);
        assert!(result.was_html);
        assert!(!result.text.contains('<'));
        assert!(result.text.contains("Join our team & grow"));
    }

    #[test]
    fn test_extract_skills_sorted_deduplicated_lowercase() {
        let text = "Experienced with Python, python, PYTHON, and Node.js, plus C++ and machine learning.";
        let skills = extract_skills_default(text);
        assert_eq!(
            skills,
            vec![
                "c++".to_string(),
                "machine learning".to_string(),
                "node.js".to_string(),
                "python".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_skills_does_not_match_substrings() {
        // "java" should not match inside "javascript"
        let text = "Strong javascript background.";
        let skills = extract_skills_default(text);
        assert!(skills.contains(&"javascript".to_string()));
        assert!(!skills.contains(&"java".to_string()));
    }

    #[test]
    fn test_build_job_document_shape() {
        let doc = build_job_document("Engineer", "Acme", "Remote", "Build things.", 6000);
        assert!(doc.starts_with("Title: Engineer\nCompany: Acme\nLocation: Remote\n\nDescription:\n"));
        assert!(doc.ends_with("Build things."));
    }

    #[test]
    fn test_build_job_document_truncates_on_word_boundary() {
        let long_description = "word ".repeat(50);
        let doc = build_job_document("T", "C", "L", &long_description, 20);
        assert!(doc.contains("..."));
        assert!(!doc.ends_with("wor..."));
    }

    #[test]
    fn test_is_text_too_short() {
        assert!(is_text_too_short("short", 100));
        assert!(!is_text_too_short(&"a".repeat(100), 100));
        assert!(is_text_too_short("   \n\t  ", 1));
    }
}
