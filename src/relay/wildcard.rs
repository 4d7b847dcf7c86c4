// Shell-glob wildcard matching for query fields

/// One element of a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// A character that must appear as-is
    Literal(char),
    /// `?`: exactly one character
    AnyChar,
    /// `*`: any run of characters, including none
    AnyRun,
    /// `[...]` or `[!...]`
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

impl ClassItem {
    fn contains(&self, c: char) -> bool {
        match *self {
            ClassItem::Char(x) => x == c,
            ClassItem::Range(lo, hi) => lo <= c && c <= hi,
        }
    }
}

impl Token {
    /// Check a single-character token against `c`
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Literal(x) => *x == c,
            Token::AnyChar => true,
            Token::AnyRun => false,
            Token::Class { negated, items } => items.iter().any(|i| i.contains(c)) != *negated,
        }
    }
}

/// A compiled glob pattern (supports `*`, `?` and `[...]` classes)
///
/// Matching is case-sensitive and anchored at both ends: the whole value
/// must match, so an empty pattern only matches the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    source: String,
    tokens: Vec<Token>,
}

impl WildcardPattern {
    /// Compile a pattern from glob syntax
    pub fn new(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            tokens: compile(pattern),
        }
    }

    /// The pattern text as given
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check if a value matches this pattern
    pub fn matches(&self, value: &str) -> bool {
        let t: Vec<char> = value.chars().collect();
        let p = &self.tokens;

        let mut pi = 0; // token index
        let mut ti = 0; // text index
        let mut star_pi = None; // token index after last *
        let mut star_ti = 0; // text index when * was matched

        while ti < t.len() || pi < p.len() {
            if pi < p.len() {
                if p[pi] == Token::AnyRun {
                    while pi < p.len() && p[pi] == Token::AnyRun {
                        pi += 1;
                    }
                    if pi == p.len() {
                        return true;
                    }
                    star_pi = Some(pi);
                    star_ti = ti;
                    continue;
                }
                if ti < t.len() && p[pi].accepts(t[ti]) {
                    pi += 1;
                    ti += 1;
                    continue;
                }
            }

            // Mismatch: let the last * swallow one more character
            match star_pi {
                Some(spi) if star_ti < t.len() => {
                    star_ti += 1;
                    pi = spi;
                    ti = star_ti;
                }
                _ => return false,
            }
        }

        true
    }
}

impl std::fmt::Display for WildcardPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Match `value` against the glob `pattern`
pub fn matches(value: &str, pattern: &str) -> bool {
    WildcardPattern::new(pattern).matches(value)
}

fn compile(pattern: &str) -> Vec<Token> {
    let p: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(p.len());
    let mut i = 0;

    while i < p.len() {
        match p[i] {
            '*' => tokens.push(Token::AnyRun),
            '?' => tokens.push(Token::AnyChar),
            '[' => {
                if let Some((class, next)) = compile_class(&p, i + 1) {
                    tokens.push(class);
                    i = next;
                    continue;
                }
                // Unterminated class is a plain '['
                tokens.push(Token::Literal('['));
            }
            c => tokens.push(Token::Literal(c)),
        }
        i += 1;
    }

    tokens
}

/// Parse a class body starting just after `[`.
///
/// Returns the token and the index after the closing `]`, or `None` if the
/// class is never closed.
fn compile_class(p: &[char], start: usize) -> Option<(Token, usize)> {
    let mut j = start;
    let negated = p.get(j) == Some(&'!');
    if negated {
        j += 1;
    }
    let body_start = j;
    // A ']' right after the opening is part of the set
    if p.get(j) == Some(&']') {
        j += 1;
    }
    while j < p.len() && p[j] != ']' {
        j += 1;
    }
    if j >= p.len() {
        return None;
    }

    let body = &p[body_start..j];
    let mut items = Vec::new();
    let mut k = 0;
    while k < body.len() {
        if k + 2 < body.len() && body[k + 1] == '-' {
            // Reversed ranges select nothing
            if body[k] <= body[k + 2] {
                items.push(ClassItem::Range(body[k], body[k + 2]));
            }
            k += 3;
        } else {
            items.push(ClassItem::Char(body[k]));
            k += 1;
        }
    }

    Some((Token::Class { negated, items }, j + 1))
}
