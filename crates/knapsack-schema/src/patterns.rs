//! Name-based exclusion patterns shared by identity hashing and packaging.
//!
//! The same set must be applied on both sides: a name skipped while hashing
//! but packaged anyway (or the reverse) would let the cache key and artifact
//! content diverge.

/// A normalized set of glob-style name patterns.
///
/// Patterns support `*` (any run of characters, including none) and `?`
/// (exactly one character), matched against individual file and directory
/// names, never against full paths. Construction trims, drops empties,
/// sorts, and deduplicates so equal inputs compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExcludeSet {
    patterns: Vec<String>,
}

impl ExcludeSet {
    /// Build a set from raw pattern strings.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut cleaned: Vec<String> = patterns
            .iter()
            .map(|p| p.as_ref().trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();
        cleaned.sort();
        cleaned.dedup();
        Self { patterns: cleaned }
    }

    /// The empty set; nothing is excluded.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The normalized pattern strings.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `name` matches any pattern in the set.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| wildcard_match(p, name))
    }
}

/// Match a name against a single `*`/`?` wildcard pattern, iteratively with
/// star backtracking.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let mut pi = 0;
    let mut ni = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ni;
            pi += 1;
        } else if let Some(s) = star {
            // Reopen the last star to swallow one more character.
            pi = s + 1;
            mark += 1;
            ni = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytecode_pattern_matches_suffix() {
        let set = ExcludeSet::new(&["*.pyc".to_owned()]);
        assert!(set.matches("module.pyc"));
        assert!(set.matches(".pyc"));
        assert!(!set.matches("module.py"));
        assert!(!set.matches("module.pyc.bak"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let set = ExcludeSet::new(&["?.txt".to_owned()]);
        assert!(set.matches("a.txt"));
        assert!(!set.matches("ab.txt"));
        assert!(!set.matches(".txt"));
    }

    #[test]
    fn star_matches_interior_runs() {
        let set = ExcludeSet::new(&["a*c".to_owned()]);
        assert!(set.matches("ac"));
        assert!(set.matches("abc"));
        assert!(set.matches("abbbc"));
        assert!(!set.matches("ab"));
        assert!(!set.matches("cab"));
    }

    #[test]
    fn multiple_stars_backtrack() {
        let set = ExcludeSet::new(&["*a*b".to_owned()]);
        assert!(set.matches("ab"));
        assert!(set.matches("xaxb"));
        assert!(set.matches("aabb"));
        assert!(!set.matches("ba"));
    }

    #[test]
    fn literal_pattern_is_exact() {
        let set = ExcludeSet::new(&["__pycache__".to_owned()]);
        assert!(set.matches("__pycache__"));
        assert!(!set.matches("__pycache__x"));
    }

    #[test]
    fn construction_normalizes() {
        let set = ExcludeSet::new(&[
            "  *.pyc ".to_owned(),
            String::new(),
            "*.pyc".to_owned(),
            "*.log".to_owned(),
        ]);
        assert_eq!(set.patterns(), &["*.log".to_owned(), "*.pyc".to_owned()]);
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = ExcludeSet::empty();
        assert!(set.is_empty());
        assert!(!set.matches("anything"));
    }
}
