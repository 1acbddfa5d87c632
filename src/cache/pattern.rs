//! Key Pattern Module
//!
//! Glob matching for dependency patterns and bulk invalidation.

// == Pattern Match ==
/// Checks whether `key` matches the glob `pattern` end to end.
///
/// `*` matches any sequence of characters, including the empty one. Every
/// other character, `.` included, matches only itself.
///
/// # Examples
///
/// ```
/// use reactive_cache::cache::pattern_matches;
///
/// assert!(pattern_matches("cache:user:42:*", "cache:user:42:profile"));
/// assert!(pattern_matches("*.json", "report.json"));
/// assert!(!pattern_matches("*.json", "reportxjson"));
/// assert!(!pattern_matches("cache:user:42:*", "cache:user:99:profile"));
/// ```
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // Position of the last `*` seen and the key index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, k));
            p += 1;
        } else if p < pattern.len() && pattern[p] == key[k] {
            p += 1;
            k += 1;
        } else if let Some((star, tried)) = backtrack {
            // Let the last `*` swallow one more character
            p = star + 1;
            k = tried + 1;
            backtrack = Some((star, tried + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
