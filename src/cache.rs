use std::collections::BTreeMap;

/// Prompt text to image reference, round-tripped by the client on every call.
pub type PromptImageMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup<'a> {
    Hit(&'a str),
    Miss,
}

/// Exact, case-sensitive lookup. Hits are trusted as-is; whether the file
/// behind a cached path still exists is the caller's concern.
pub fn lookup<'a>(prompt: &str, cache: &'a PromptImageMap) -> CacheLookup<'a> {
    match cache.get(prompt) {
        Some(reference) => CacheLookup::Hit(reference.as_str()),
        None => CacheLookup::Miss,
    }
}
