//! Name patterns for rules.
//!
//! `*` matches any run of characters (including none), `?` matches exactly one character.
//! Everything else matches itself, case-sensitively. A pattern without wildcards is an exact
//! comparison.

use std::fmt;

/// A compiled name pattern.
///
/// # Examples
///
/// ```rust
/// use cilweave::policy::Pattern;
///
/// assert!(Pattern::new("Shop.*Controller").matches("Shop.CartController"));
/// assert!(Pattern::new("Get?").matches("GetA"));
/// assert!(!Pattern::new("Get?").matches("Get"));
/// assert!(Pattern::new("Run").matches("Run"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<PatternToken>,
    exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternToken {
    Literal(char),
    AnyOne,
    AnyRun,
}

impl Pattern {
    /// Compile a pattern
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut tokens: Vec<PatternToken> = Vec::with_capacity(source.len());
        for c in source.chars() {
            let token = match c {
                '*' => PatternToken::AnyRun,
                '?' => PatternToken::AnyOne,
                other => PatternToken::Literal(other),
            };
            // Consecutive runs are equivalent to one
            if token == PatternToken::AnyRun && tokens.last() == Some(&PatternToken::AnyRun) {
                continue;
            }
            tokens.push(token);
        }

        let exact = tokens
            .iter()
            .all(|token| matches!(token, PatternToken::Literal(_)));

        Pattern {
            source: source.to_string(),
            tokens,
            exact,
        }
    }

    /// The pattern text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the pattern has no wildcards
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Match `candidate` against the whole pattern
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        if self.exact {
            return self.source == candidate;
        }

        let text: Vec<char> = candidate.chars().collect();
        let (mut t, mut p) = (0_usize, 0_usize);
        // Position of the last `*` and the text position it was tried at
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(PatternToken::AnyRun) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(PatternToken::AnyOne) => {
                    t += 1;
                    p += 1;
                }
                Some(PatternToken::Literal(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match backtrack {
                    Some((star, tried)) => {
                        p = star + 1;
                        t = tried + 1;
                        backtrack = Some((star, tried + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..]
            .iter()
            .all(|token| *token == PatternToken::AnyRun)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        let pattern = Pattern::new("Shop.Cart");
        assert!(pattern.is_exact());
        assert!(pattern.matches("Shop.Cart"));
        assert!(!pattern.matches("Shop.CartLine"));
        assert!(!pattern.matches("shop.cart"));
    }

    #[test]
    fn test_any_run() {
        let pattern = Pattern::new("*.Get*");
        assert!(pattern.matches("A.Get"));
        assert!(pattern.matches("A.B.GetValue"));
        assert!(!pattern.matches("GetValue"));

        assert!(Pattern::new("*").matches(""));
        assert!(Pattern::new("**").matches("anything"));
        assert!(Pattern::new("a*b*c").matches("aXbYbZc"));
        assert!(!Pattern::new("a*b*c").matches("aXbYbZ"));
    }

    #[test]
    fn test_any_one() {
        let pattern = Pattern::new("Item?");
        assert!(pattern.matches("Item1"));
        assert!(!pattern.matches("Item"));
        assert!(!pattern.matches("Item12"));
        assert!(Pattern::new("?*").matches("x"));
        assert!(!Pattern::new("?*").matches(""));
    }

    #[test]
    fn test_nested_type_names() {
        assert!(Pattern::new("Shop.Cart+*").matches("Shop.Cart+Line"));
        assert!(!Pattern::new("Shop.Cart+*").matches("Shop.Cart"));
    }
}
