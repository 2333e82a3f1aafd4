//! Rule-based inclusion/exclusion of filesystem entries.
//!
//! A filter string is one or more repetitions of `+` or `-` followed by
//! whitespace-separated glob patterns (single or double quotes may wrap a
//! pattern containing spaces). Patterns ending with a separator apply to
//! directories only; all others apply to files only. Evaluation walks the
//! compiled rule list in order and the first matching rule wins; when no
//! rule matches, a caller-supplied default (normally exclude) applies.
//!
//! Two behaviors keep narrow includes usable during a pruning tree walk:
//! - every include pattern also synthesizes directory-only include rules for
//!   its ancestor directories, so `+ a/b/*.txt` still lets the walk descend
//!   into `a` and `a/b`;
//! - a directory-only rule matches the directory itself and anything beneath
//!   it, so `- a/b/` excludes `a/b/c.txt` even when the file is queried
//!   directly. Synthesized ancestor rules match the directory itself only
//!   and never drag in siblings.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashSet;

use crate::errors::PatternError;

/// One compiled rule: include or exclude, file-only or directory-only.
#[derive(Debug)]
struct CompiledRule {
    include: bool,
    kind: RuleKind,
    /// Whether any component of the pattern starts with a literal dot.
    /// Used for hidden-entry suppression: with `ignore_hidden`, only
    /// dot-explicit rules may match a path with a dot-leading component.
    dot_explicit: bool,
}

#[derive(Debug)]
enum RuleKind {
    File(GlobMatcher),
    Dir {
        exact: GlobMatcher,
        /// Present for user-written directory rules; `None` for synthesized
        /// ancestor rules, which must not match descendants.
        descendants: Option<GlobMatcher>,
    },
}

/// An ordered, immutable set of compiled filter rules.
#[derive(Debug)]
pub struct FilterSet {
    rules: Vec<CompiledRule>,
    ignore_hidden: bool,
}

impl FilterSet {
    /// Compile a filter string. Case-insensitive matching follows the
    /// platform convention of the scanned roots, passed in by the caller.
    pub fn compile(
        filter: &str,
        ignore_hidden: bool,
        case_insensitive: bool,
    ) -> Result<Self, PatternError> {
        let mut set = FilterSet {
            rules: Vec::new(),
            ignore_hidden,
        };
        // Ancestors already synthesized for the current include run.
        // Reset at each exclude group so a later include regenerates its
        // ancestor rules after the exclude.
        let mut implicit_dirs: HashSet<String> = HashSet::new();

        let mut action: Option<bool> = None;
        for token in tokenize(filter)? {
            let pattern = match token {
                Token::Include => {
                    action = Some(true);
                    continue;
                }
                Token::Exclude => {
                    action = Some(false);
                    implicit_dirs.clear();
                    continue;
                }
                Token::Pattern(p) => p,
            };
            let Some(include) = action else {
                return Err(PatternError::MissingAction(pattern));
            };
            set.push_pattern(&pattern, include, case_insensitive, &mut implicit_dirs)?;
        }

        Ok(set)
    }

    fn push_pattern(
        &mut self,
        raw: &str,
        include: bool,
        case_insensitive: bool,
        implicit_dirs: &mut HashSet<String>,
    ) -> Result<(), PatternError> {
        let pattern = normalize_pattern(raw);
        if pattern.is_empty() {
            return Ok(());
        }
        validate_pattern(&pattern)?;

        let dir_only = pattern.ends_with('/');
        let body = pattern.trim_end_matches('/');
        if body.is_empty() {
            return Ok(());
        }

        let kind = if dir_only {
            RuleKind::Dir {
                exact: compile_glob(body, case_insensitive)?,
                descendants: Some(compile_glob(&format!("{body}/**"), case_insensitive)?),
            }
        } else {
            RuleKind::File(compile_glob(body, case_insensitive)?)
        };
        self.rules.push(CompiledRule {
            include,
            kind,
            dot_explicit: is_dot_explicit(body),
        });

        // Implicit ancestor inclusion: keep the walk descending toward a
        // narrow include without including anything else along the way.
        if include {
            let mut ancestor = body;
            while let Some(idx) = ancestor.rfind('/') {
                ancestor = &ancestor[..idx];
                if ancestor.is_empty() || !implicit_dirs.insert(ancestor.to_string()) {
                    break;
                }
                self.rules.push(CompiledRule {
                    include: true,
                    kind: RuleKind::Dir {
                        exact: compile_glob(ancestor, case_insensitive)?,
                        descendants: None,
                    },
                    dot_explicit: is_dot_explicit(ancestor),
                });
            }
        }

        Ok(())
    }

    /// Decide whether `relpath` participates. Directory queries pass
    /// `is_dir = true`; `relpath` uses `/` separators and no trailing one.
    /// Returns `default` when no rule matches.
    pub fn evaluate_or(&self, relpath: &str, is_dir: bool, default: bool) -> bool {
        let hidden = self.ignore_hidden && relpath.split('/').any(|c| c.starts_with('.'));
        for rule in &self.rules {
            if hidden && !rule.dot_explicit {
                continue;
            }
            let matched = match &rule.kind {
                RuleKind::File(glob) => !is_dir && glob.is_match(relpath),
                RuleKind::Dir { exact, descendants } => {
                    if is_dir {
                        exact.is_match(relpath)
                            || descendants.as_ref().is_some_and(|d| d.is_match(relpath))
                    } else {
                        descendants.as_ref().is_some_and(|d| d.is_match(relpath))
                    }
                }
            };
            if matched {
                return rule.include;
            }
        }
        default
    }

    /// `evaluate_or` with the standard default of exclude.
    pub fn evaluate(&self, relpath: &str, is_dir: bool) -> bool {
        self.evaluate_or(relpath, is_dir, false)
    }
}

fn compile_glob(pattern: &str, case_insensitive: bool) -> Result<GlobMatcher, PatternError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(case_insensitive)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|source| PatternError::BadGlob {
            pattern: pattern.to_string(),
            source,
        })
}

/// Strip a leading `./` and, on Windows, fold backslash separators so
/// user-typed paths match the normalized keys used everywhere else.
fn normalize_pattern(raw: &str) -> String {
    let mut p = raw.to_string();
    if cfg!(windows) {
        p = p.replace('\\', "/");
    }
    if let Some(stripped) = p.strip_prefix("./") {
        p = stripped.to_string();
    }
    p
}

fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    let trimmed = pattern.trim_end_matches('/');
    if trimmed == ".." || trimmed.starts_with("../") || trimmed.ends_with("/..") || trimmed.contains("/../")
    {
        return Err(PatternError::ParentEscape(pattern.to_string()));
    }
    let absolute = pattern.starts_with('/')
        || (pattern.len() >= 2 && pattern.as_bytes()[1] == b':' && pattern.as_bytes()[0].is_ascii_alphabetic());
    if absolute {
        return Err(PatternError::AbsolutePath(pattern.to_string()));
    }
    Ok(())
}

fn is_dot_explicit(pattern: &str) -> bool {
    pattern.split('/').any(|c| c.starts_with('.'))
}

enum Token {
    Include,
    Exclude,
    Pattern(String),
}

/// Split a filter string into `+`/`-` actions and pattern tokens.
/// Quoted tokens keep embedded whitespace; quotes themselves are stripped.
fn tokenize(s: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' || c == '"' {
            chars.next();
            let mut word = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == c {
                    closed = true;
                    break;
                }
                word.push(ch);
            }
            if !closed {
                return Err(PatternError::UnterminatedQuote(word));
            }
            tokens.push(Token::Pattern(word));
            continue;
        }
        let mut word = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                break;
            }
            word.push(ch);
            chars.next();
        }
        match word.as_str() {
            "+" => tokens.push(Token::Include),
            "-" => tokens.push(Token::Exclude),
            _ => tokens.push(Token::Pattern(word)),
        }
    }
    Ok(tokens)
}
