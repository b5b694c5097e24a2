use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::embeddings::EmbeddingManager;
use super::text_cleaner::{extract_skills, DEFAULT_SKILL_LEXICON};
use crate::models::{EvidenceMatch, EvidenceResult, MatchType};

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;
const MAX_SENTENCES_PER_SIDE: usize = 30;
const MAX_KEYWORDS: usize = 20;
const DEFAULT_MIN_KEYWORD_LENGTH: usize = 4;

static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:[.!?])\s+(?=[A-Z])").unwrap());
static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]+").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
        "can", "need", "this", "that", "these", "those", "what", "which", "who", "whom",
        "whose", "where", "when", "why", "how", "all", "each", "every", "both", "few", "more",
        "most", "other", "some", "such", "than", "too", "very", "just", "also", "only", "own",
        "same", "into", "over", "after", "before", "between", "under", "again", "further",
        "then", "once", "here", "there", "about", "through", "during", "above", "below",
        "your", "you", "their", "they", "our", "we", "work", "working", "experience", "team",
        "ability", "skills", "strong", "excellent", "good", "great", "best", "well", "new",
        "years", "year", "role", "position", "company", "looking",
    ]
    .into_iter()
    .collect()
});

/// Splits text into sentences with a simple terminator+whitespace+uppercase
/// heuristic, dropping fragments too short to be useful evidence and bullet
/// points/headers under the same length floor.
///
/// `SENTENCE_BOUNDARY` matches the terminator plus the whitespace that
/// follows it, so splitting on it directly (`Regex::split`) would consume
/// the terminator along with the delimiter and drop it from both sides of
/// the cut. The terminator is found instead and kept with the sentence that
/// precedes it — only the whitespace between sentences is discarded.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let mut raw_sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_BOUNDARY.find_iter(text) {
        let terminator_end = m.start() + 1;
        raw_sentences.push(&text[start..terminator_end]);
        start = m.end();
    }
    raw_sentences.push(&text[start..]);

    raw_sentences
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| s.len() >= 20)
        .filter(|s| {
            let starts_with_glyph = s.starts_with(['-', '*', '•', '–']);
            !(starts_with_glyph && s.len() < 50)
        })
        .map(|s| s.to_string())
        .collect()
}

/// Tokenizes alphabetic runs, lowercases, and drops stop words and short
/// tokens (default minimum length 4).
pub fn extract_keywords(text: &str, min_length: usize) -> HashSet<String> {
    let lowered = text.to_lowercase();
    WORD_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() >= min_length && !STOP_WORDS.contains(w.as_str()))
        .collect()
}

/// Produces sentence-level, skill-level, and keyword-level justifications
/// for why a job matches a résumé. Semantic extraction degrades gracefully:
/// any embedding failure (or absence of an embedder) yields an empty
/// semantic-match list without affecting skill/keyword evidence.
pub struct EvidenceExtractor<'a> {
    embedder: Option<&'a EmbeddingManager>,
    top_k: usize,
    threshold: f64,
}

impl<'a> EvidenceExtractor<'a> {
    pub fn new(embedder: Option<&'a EmbeddingManager>) -> Self {
        Self {
            embedder,
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sorted `(matched, job_only)` skill evidence.
    pub fn extract_skill_evidence(&self, resume_text: &str, job_text: &str) -> (Vec<String>, Vec<String>) {
        let resume_skills: HashSet<String> =
            extract_skills(resume_text, DEFAULT_SKILL_LEXICON).into_iter().collect();
        let job_skills: HashSet<String> =
            extract_skills(job_text, DEFAULT_SKILL_LEXICON).into_iter().collect();

        let mut matched: Vec<String> = resume_skills.intersection(&job_skills).cloned().collect();
        matched.sort();
        let mut job_only: Vec<String> = job_skills.difference(&resume_skills).cloned().collect();
        job_only.sort();
        (matched, job_only)
    }

    /// Keyword overlap, longest-first then alphabetical, capped at 20.
    pub fn extract_keyword_evidence(&self, resume_text: &str, job_text: &str) -> Vec<String> {
        let resume_keywords = extract_keywords(resume_text, DEFAULT_MIN_KEYWORD_LENGTH);
        let job_keywords = extract_keywords(job_text, DEFAULT_MIN_KEYWORD_LENGTH);

        let mut overlap: Vec<String> = resume_keywords.intersection(&job_keywords).cloned().collect();
        overlap.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        overlap.truncate(MAX_KEYWORDS);
        overlap
    }

    /// Best-matching résumé sentence per job sentence, kept when similarity
    /// clears the threshold, sorted descending and capped at `top_k`.
    /// Returns an empty list (never an error) if no embedder is configured
    /// or the embedding call itself fails — semantic evidence is advisory.
    pub async fn extract_semantic_evidence(&self, resume_text: &str, job_text: &str) -> Vec<EvidenceMatch> {
        let Some(embedder) = self.embedder else {
            return Vec::new();
        };

        let mut resume_sentences = split_into_sentences(resume_text);
        let mut job_sentences = split_into_sentences(job_text);
        if resume_sentences.is_empty() || job_sentences.is_empty() {
            return Vec::new();
        }
        resume_sentences.truncate(MAX_SENTENCES_PER_SIDE);
        job_sentences.truncate(MAX_SENTENCES_PER_SIDE);

        let resume_embeddings = match embedder.embed_many(&resume_sentences, 64, true).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("evidence: failed to embed resume sentences: {e}");
                return Vec::new();
            }
        };
        let job_embeddings = match embedder.embed_many(&job_sentences, 64, true).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("evidence: failed to embed job sentences: {e}");
                return Vec::new();
            }
        };

        let mut matches = Vec::new();
        for (j, job_sentence) in job_sentences.iter().enumerate() {
            let mut best_i = 0usize;
            let mut best_sim = f32::NEG_INFINITY;
            for (i, resume_embedding) in resume_embeddings.iter().enumerate() {
                let sim = dot(resume_embedding, &job_embeddings[j]);
                if sim > best_sim {
                    best_sim = sim;
                    best_i = i;
                }
            }
            if best_sim as f64 >= self.threshold {
                matches.push(EvidenceMatch::new(
                    resume_sentences[best_i].clone(),
                    job_sentence.clone(),
                    best_sim as f64,
                    MatchType::Semantic,
                    Vec::new(),
                ));
            }
        }

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(self.top_k);
        matches
    }

    /// Full extraction: semantic matches, then one synthesized-or-found
    /// match per top-5 matched skill, then dedup of the lead sentences.
    pub async fn extract_evidence(&self, job_id: &str, resume_text: &str, job_text: &str) -> EvidenceResult {
        let (skill_matches, _job_only) = self.extract_skill_evidence(resume_text, job_text);
        let keyword_matches = self.extract_keyword_evidence(resume_text, job_text);
        let semantic_matches = self.extract_semantic_evidence(resume_text, job_text).await;

        let resume_sentences = split_into_sentences(resume_text);
        let job_sentences = split_into_sentences(job_text);

        let mut all_matches = semantic_matches;
        for skill in skill_matches.iter().take(5) {
            let resume_sentence = resume_sentences
                .iter()
                .find(|s| s.to_lowercase().contains(&skill.to_lowercase()))
                .cloned()
                .unwrap_or_else(|| format!("Resume mentions: {skill}"));
            let job_sentence = job_sentences
                .iter()
                .find(|s| s.to_lowercase().contains(&skill.to_lowercase()))
                .cloned()
                .unwrap_or_else(|| format!("Job requires: {skill}"));

            all_matches.push(EvidenceMatch::new(
                resume_sentence,
                job_sentence,
                1.0,
                MatchType::Skill,
                vec![skill.clone()],
            ));
        }

        let mut top_resume_sentences = Vec::new();
        let mut top_job_sentences = Vec::new();
        for m in all_matches.iter().take(self.top_k) {
            if !top_resume_sentences.contains(&m.resume_sentence) {
                top_resume_sentences.push(m.resume_sentence.clone());
            }
            if !top_job_sentences.contains(&m.job_sentence) {
                top_job_sentences.push(m.job_sentence.clone());
            }
        }

        EvidenceResult {
            job_id: job_id.to_string(),
            matches: all_matches,
            top_resume_sentences,
            top_job_sentences,
            skill_matches,
            keyword_matches,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// HTML-escapes `text` and every term first, then case-insensitively wraps
/// matches in a `<span>`. Escaping happens before substitution so neither
/// the source text nor the highlight terms can smuggle markup through —
/// this function is an XSS boundary, not just a display helper.
pub fn highlight(text: &str, terms: &[String], css_class: &str) -> String {
    let safe_text = html_escape(text);
    if terms.is_empty() {
        return safe_text;
    }

    let mut result = safe_text;
    let safe_class = html_escape(css_class);
    for term in terms {
        let safe_term = html_escape(term);
        if safe_term.is_empty() {
            continue;
        }
        let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(&safe_term))) else {
            continue;
        };
        result = pattern
            .replace_all(&result, |caps: &regex::Captures| {
                format!(
                    "<span class=\"{safe_class}\" style=\"background-color: #fff3cd; padding: 1px 3px; border-radius: 3px; font-weight: 500;\">{}</span>",
                    &caps[0]
                )
            })
            .into_owned();
    }
    result
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_sentences_drops_short_and_bullets() {
        let text = "This is a long enough sentence to keep. Hi. - short bullet. This one is definitely long enough to be kept as a sentence.";
        let sentences = split_into_sentences(text);
        assert!(sentences.iter().all(|s| s.len() >= 20));
        assert!(!sentences.iter().any(|s| s.starts_with('-') && s.len() < 50));
    }

    #[test]
    fn test_split_into_sentences_preserves_terminal_punctuation() {
        let text = "This sentence definitely ends with a period. Did this one keep its question mark? This exclamation must keep its mark!";
        let sentences = split_into_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert!(sentences[0].ends_with('.'));
        assert!(sentences[1].ends_with('?'));
        assert!(sentences[2].ends_with('!'));
    }

    #[test]
    fn test_extract_keywords_drops_stop_words_and_short_tokens() {
        let keywords = extract_keywords("The team is looking for a strong engineer with kubernetes experience", 4);
        assert!(keywords.contains("kubernetes"));
        assert!(keywords.contains("engineer"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("for"));
    }

    #[test]
    fn test_skill_evidence_matched_and_job_only() {
        let extractor = EvidenceExtractor::new(None);
        let (matched, job_only) = extractor.extract_skill_evidence(
            "Experienced in python and docker.",
            "We need python, docker, and kubernetes experience.",
        );
        assert_eq!(matched, vec!["docker".to_string(), "python".to_string()]);
        assert_eq!(job_only, vec!["kubernetes".to_string()]);
    }

    #[test]
    fn test_keyword_evidence_sorted_longest_first() {
        let extractor = EvidenceExtractor::new(None);
        let overlap = extractor.extract_keyword_evidence(
            "distributed systems engineering experience with kubernetes",
            "looking for distributed systems engineering and kubernetes skills",
        );
        assert!(overlap.contains(&"distributed".to_string()));
        assert!(overlap.contains(&"kubernetes".to_string()));
        for pair in overlap.windows(2) {
            assert!(pair[0].len() >= pair[1].len());
        }
    }

    #[tokio::test]
    async fn test_semantic_evidence_empty_without_embedder() {
        let extractor = EvidenceExtractor::new(None);
        let matches = extractor
            .extract_semantic_evidence(
                "I have five years of backend engineering experience with distributed systems.",
                "We are looking for a backend engineer with distributed systems experience.",
            )
            .await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_extract_evidence_degrades_to_skill_and_keyword_only() {
        let extractor = EvidenceExtractor::new(None);
        let result = extractor
            .extract_evidence(
                "job_1",
                "Experienced python and docker engineer with five years in backend systems.",
                "We need a python and docker engineer for our backend systems team.",
            )
            .await;
        assert!(result.matches.iter().all(|m| m.match_type == MatchType::Skill));
        assert!(!result.skill_matches.is_empty());
        assert!(!result.keyword_matches.is_empty());
    }

    #[test]
    fn test_highlight_escapes_raw_html() {
        let text = "Knows <script>alert(1)</script> and python";
        let terms = vec!["python".to_string()];
        let out = highlight(text, &terms, "hl");
        assert!(!out.contains("<script>"));
        assert!(out.contains("&lt;script&gt;"));
        assert!(out.contains("<span class=\"hl\""));
    }

    #[test]
    fn test_highlight_escapes_malicious_terms() {
        let text = "Plain text";
        let terms = vec!["<script>".to_string()];
        let out = highlight(text, &terms, "hl");
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn test_highlight_no_terms_still_escapes_text() {
        let out = highlight("<b>bold</b>", &[], "hl");
        assert_eq!(out, "&lt;b&gt;bold&lt;/b&gt;");
    }
}
