//! Basic tokenizer for keyword search
//!
//! Simple text tokenization shared by indexing and scoring. Stemming and
//! stopword handling can slot in here later without touching callers.

/// Tokenize text into searchable terms
///
/// - Lowercase
/// - Split on non-alphanumeric characters
/// - Filter tokens shorter than 2 characters
///
/// # Example
///
/// ```
/// use nexus_search::tokenizer::tokenize;
///
/// let tokens = tokenize("Hello, World!");
/// assert_eq!(tokens, vec!["hello", "world"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(String::from)
        .collect()
}

/// Tokenize and deduplicate for query processing
///
/// # Example
///
/// ```
/// use nexus_search::tokenizer::tokenize_unique;
///
/// let tokens = tokenize_unique("test test TEST");
/// assert_eq!(tokens, vec!["test"]);
/// ```
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
