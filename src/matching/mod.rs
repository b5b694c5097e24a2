pub mod embeddings;
pub mod evidence;
pub mod scorer;
pub mod text_cleaner;
pub mod vector_index;

/// Monotonic string identifying the text-normalization logic. Bump whenever
/// the cleaning pipeline or the skill lexicon changes; it participates in the
/// embedding `versionId` hash so a lexicon upgrade lands in a fresh
/// collection rather than silently mixing with old vectors.
pub const CLEANING_VERSION: &str = "1";
