//! Glob matching for the in-process store's key scans.
//!
//! Supports the subset of Redis `SCAN MATCH` syntax the service emits:
//! `*` matches any run of characters and `?` matches exactly one.

/// Pattern compiled once per scan and tested against every key.
pub(crate) struct KeyPattern {
    chars: Vec<char>,
}

impl KeyPattern {
    pub(crate) fn new(pattern: &str) -> Self {
        Self {
            chars: pattern.chars().collect(),
        }
    }

    pub(crate) fn matches(&self, key: &str) -> bool {
        let text: Vec<char> = key.chars().collect();

        let mut pi = 0;
        let mut ti = 0;

        // backtrack point for the most recent '*'
        let mut star_pi: Option<usize> = None;
        let mut star_ti = 0;

        while ti < text.len() {
            match self.chars.get(pi) {
                Some(&'*') => {
                    star_pi = Some(pi);
                    star_ti = ti;
                    pi += 1;
                }
                Some(&p) if p == '?' || Some(&p) == text.get(ti) => {
                    pi += 1;
                    ti += 1;
                }
                _ => match star_pi {
                    Some(sp) => {
                        pi = sp + 1;
                        star_ti += 1;
                        ti = star_ti;
                    }
                    None => return false,
                },
            }
        }

        // trailing stars match the empty suffix
        self.chars.get(pi..).is_some_and(|rest| rest.iter().all(|c| *c == '*'))
    }
}
