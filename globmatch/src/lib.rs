//! Translation of the DBATS-style glob dialect used throughout pipeline
//! configuration (`match`/`groupby` expressions) into anchored [`regex`]
//! patterns.
//!
//! The dialect supports `*` (matches any run of characters except `.`), `?`
//! (matches a single non-`.` character), `[...]`/`[^...]` character classes,
//! `{a,b,c}` literal alternation, and `(...)` capturing groups used by
//! aggregation stages to rebuild an output key from the matched pieces.
//! Anything else is a literal character, backslash-escaped in the output
//! regex when the literal happens to be a regex metacharacter.
pub mod error;

pub use error::GlobError;

use regex::Regex;

/// Characters a glob pattern treats specially, and which may therefore
/// follow a `\` escape.
const GLOB_META: &str = "*?{}[]()\\";

/// Characters that are meaningful to [`regex`] and must be escaped when
/// emitted literally.
const RE_META: &str = ".^$*+?{}[]|()\\";

/// A glob pattern translated to a regex, along with the number of capturing
/// groups it produced (used by `groupby` expressions to rebuild an output
/// key from a match).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub pattern: String,
    pub capture_count: usize,
}

fn push_literal(out: &mut String, c: char) {
    if RE_META.contains(c) {
        out.push('\\');
    }
    out.push(c);
}

/// Translates a single glob pattern into an anchored regex pattern string.
///
/// The returned pattern matches the glob's *entire* input (it is wrapped in
/// `^...$`), mirroring the original's full-match semantics.
pub fn translate(glob: &str) -> Result<Translated, GlobError> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0usize;
    let mut parens = 0usize;
    let mut capture_count = 0usize;

    while let Some(&c) = chars.get(i) {
        match c {
            '\\' => {
                let escaped = *chars.get(i + 1).ok_or(GlobError::TrailingBackslash)?;
                if !GLOB_META.contains(escaped) {
                    return Err(GlobError::IllegalEscape(escaped));
                }
                push_literal(&mut out, escaped);
                i += 2;
            }
            '*' => {
                out.push_str("[^.]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^.]");
                i += 1;
            }
            '[' => {
                out.push('[');
                i += 1;
                if chars.get(i) == Some(&'^') {
                    out.push_str("^.");
                    i += 1;
                }
                loop {
                    let cur = *chars.get(i).ok_or(GlobError::UnmatchedBracket)?;
                    if cur == '\\' && chars.get(i + 1).is_some() {
                        out.push('\\');
                        out.push(*chars.get(i + 1).expect("checked above"));
                        i += 2;
                        continue;
                    }
                    out.push(cur);
                    i += 1;
                    if cur == ']' {
                        break;
                    }
                }
            }
            '{' => {
                out.push_str("(?:");
                i += 1;
                loop {
                    let cur = *chars.get(i).ok_or(GlobError::UnmatchedBrace)?;
                    match cur {
                        // Mirrors the original's escape handling inside
                        // braces: the escaped pair is copied through
                        // verbatim rather than re-validated against the
                        // glob metacharacter set.
                        '\\' => {
                            let escaped = *chars.get(i + 1).ok_or(GlobError::TrailingBackslash)?;
                            out.push('\\');
                            out.push(escaped);
                            i += 2;
                        }
                        '}' => {
                            out.push(')');
                            i += 1;
                            break;
                        }
                        ',' => {
                            out.push('|');
                            i += 1;
                        }
                        c if ".*{}[]()".contains(c) => {
                            return Err(GlobError::IllegalCharInBraces(c));
                        }
                        c => {
                            push_literal(&mut out, c);
                            i += 1;
                        }
                    }
                }
            }
            '(' => {
                if parens > 0 {
                    return Err(GlobError::NestedParens);
                }
                parens += 1;
                capture_count += 1;
                out.push('(');
                i += 1;
            }
            ')' => {
                if parens == 0 {
                    return Err(GlobError::UnmatchedParen);
                }
                parens -= 1;
                out.push(')');
                i += 1;
            }
            c => {
                push_literal(&mut out, c);
                i += 1;
            }
        }
    }

    if parens > 0 {
        return Err(GlobError::UnmatchedParen);
    }

    out.push('$');
    Ok(Translated {
        pattern: out,
        capture_count,
    })
}

/// Translates and compiles a glob pattern in one step.
pub fn compile(glob: &str) -> Result<Regex, GlobError> {
    let translated = translate(glob)?;
    // The translator only ever emits well-formed regex syntax; a compile
    // failure here would be a bug in `translate`, not a user error.
    Ok(Regex::new(&translated.pattern).expect("translate produced invalid regex"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn star_matches_any_run_except_dot() {
        let re = compile("foo.*.bar").unwrap();
        assert!(re.is_match("foo.anything.bar"));
        assert!(!re.is_match("foo.a.b.bar"));
    }

    #[test]
    fn question_matches_single_non_dot_char() {
        let re = compile("foo.?.bar").unwrap();
        assert!(re.is_match("foo.x.bar"));
        assert!(!re.is_match("foo..bar"));
        assert!(!re.is_match("foo.xy.bar"));
    }

    #[test]
    fn bracket_class() {
        let re = compile("iface.eth[0-9]").unwrap();
        assert!(re.is_match("iface.eth0"));
        assert!(!re.is_match("iface.etha"));
    }

    #[test]
    fn negated_bracket_class() {
        let re = compile("iface.eth[^0-9]").unwrap();
        assert!(re.is_match("iface.etha"));
        assert!(!re.is_match("iface.eth0"));
    }

    #[test]
    fn brace_alternation() {
        let re = compile("if.{eth0,eth1,lo}.octets").unwrap();
        assert!(re.is_match("if.eth0.octets"));
        assert!(re.is_match("if.lo.octets"));
        assert!(!re.is_match("if.eth2.octets"));
    }

    #[test]
    fn escaped_comma_in_braces_is_literal() {
        // `\,` inside `{...}` is a literal comma, not an alternation split.
        let re = compile(r"if.{eth\,0,lo}.octets").unwrap();
        assert!(re.is_match("if.eth,0.octets"));
        assert!(re.is_match("if.lo.octets"));
        assert!(!re.is_match("if.eth.octets"));
    }

    #[test]
    fn capturing_group_counts() {
        let t = translate("if.(eth[0-9]).octets").unwrap();
        assert_eq!(t.capture_count, 1);
        let re = Regex::new(&t.pattern).unwrap();
        let caps = re.captures("if.eth3.octets").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "eth3");
    }

    #[test]
    fn literal_dot_is_escaped() {
        let re = compile("a.b.c").unwrap();
        assert!(re.is_match("a.b.c"));
        assert!(!re.is_match("aXb.c"));
    }

    #[test]
    fn trailing_backslash_is_an_error() {
        assert_eq!(translate("foo\\"), Err(GlobError::TrailingBackslash));
    }

    #[test]
    fn illegal_escape_is_an_error() {
        assert_eq!(translate("foo\\x"), Err(GlobError::IllegalEscape('x')));
    }

    #[test]
    fn escaped_meta_is_literal() {
        let re = compile("50\\%").unwrap();
        assert!(re.is_match("50%"));
    }

    #[test]
    fn unmatched_bracket_is_an_error() {
        assert_eq!(translate("foo[bar"), Err(GlobError::UnmatchedBracket));
    }

    #[test]
    fn unmatched_brace_is_an_error() {
        assert_eq!(translate("foo{bar"), Err(GlobError::UnmatchedBrace));
    }

    #[test]
    fn unmatched_open_paren_is_an_error() {
        assert_eq!(translate("foo(bar"), Err(GlobError::UnmatchedParen));
    }

    #[test]
    fn unmatched_close_paren_is_an_error() {
        assert_eq!(translate("foo)bar"), Err(GlobError::UnmatchedParen));
    }

    #[test]
    fn nested_parens_are_an_error() {
        assert_eq!(translate("foo((bar))"), Err(GlobError::NestedParens));
    }

    #[test]
    fn illegal_char_in_braces_is_an_error() {
        assert_eq!(
            translate("foo{a.b,c}"),
            Err(GlobError::IllegalCharInBraces('.'))
        );
    }
}

#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    // Plain alphanumeric segments joined by literal dots always round-trip:
    // the glob with no metacharacters matches exactly the string it spells.
    proptest! {
        #[test]
        fn literal_glob_matches_only_itself(segments in proptest::collection::vec("[a-zA-Z0-9]{1,8}", 1..4)) {
            let glob = segments.join(".");
            let re = compile(&glob).unwrap();
            prop_assert!(re.is_match(&glob));
        }

        #[test]
        fn star_segment_matches_any_non_dot_run(
            prefix in "[a-zA-Z]{1,6}",
            filler in "[a-zA-Z0-9]{0,12}",
            suffix in "[a-zA-Z]{1,6}",
        ) {
            let glob = format!("{prefix}.*.{suffix}");
            let s = format!("{prefix}.{filler}.{suffix}");
            let re = compile(&glob).unwrap();
            prop_assert!(re.is_match(&s));
        }

        #[test]
        fn brace_alternation_matches_each_option(
            opts in proptest::collection::vec("[a-z]{1,6}", 2..5),
        ) {
            let glob = format!("prefix.{{{}}}", opts.join(","));
            let re = compile(&glob).unwrap();
            for opt in &opts {
                prop_assert!(re.is_match(&format!("prefix.{opt}")));
            }
        }
    }
}
