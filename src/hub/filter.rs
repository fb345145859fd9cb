use anyhow::{Context, Result};
use regex::Regex;

/// Selects repository files by glob.
///
/// `*` and `?` stay inside one path segment, `**` spans segments. An empty
/// allow list admits every file; ignore patterns always win.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    allow: Vec<Regex>,
    ignore: Vec<Regex>,
}

impl FileFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new<S: AsRef<str>>(allow: &[S], ignore: &[S]) -> Result<Self> {
        Ok(Self {
            allow: compile(allow)?,
            ignore: compile(ignore)?,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        let allowed = self.allow.is_empty() || self.allow.iter().any(|re| re.is_match(path));
        allowed && !self.ignore.iter().any(|re| re.is_match(path))
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            let p = p.as_ref();
            Regex::new(&glob_to_regex(p)).with_context(|| format!("invalid glob '{}'", p))
        })
        .collect()
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}
