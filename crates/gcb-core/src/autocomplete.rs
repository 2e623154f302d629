/// Most suggestions a single autocomplete reply may carry.
pub const MAX_CHOICES: usize = 25;

/// Candidates containing `partial` (case-insensitive), in candidate order, capped at
/// [`MAX_CHOICES`]. An empty `partial` matches everything.
pub fn autocomplete<I, S>(candidates: I, partial: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let needle = partial.to_lowercase();
    candidates
        .into_iter()
        .filter(|c| c.as_ref().to_lowercase().contains(&needle))
        .take(MAX_CHOICES)
        .map(|c| c.as_ref().to_string())
        .collect()
}
