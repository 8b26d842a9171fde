pub mod config;
pub mod docs;
pub mod init;
pub mod lifecycle;
pub mod log;
pub mod query;
pub mod validate;

/// Join trailing words into one argument; blank input reads as absent.
pub fn join_words(words: &[String]) -> Option<String> {
    let joined = words.join(" ");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
