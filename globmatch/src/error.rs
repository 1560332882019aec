use thiserror::Error;

/// User-visible glob translation errors. None of these are
/// fatal to the process: the pipeline driver reports the offending stage's
/// location and config loading fails with a `ConfigError`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GlobError {
    #[error("illegal trailing '\\' in pattern")]
    TrailingBackslash,
    #[error("illegal escape '\\{0}' in pattern")]
    IllegalEscape(char),
    #[error("unmatched '[' in pattern")]
    UnmatchedBracket,
    #[error("unmatched '{{' in pattern")]
    UnmatchedBrace,
    #[error("unmatched '(' in pattern")]
    UnmatchedParen,
    #[error("illegal nested parentheses in pattern")]
    NestedParens,
    #[error("illegal character '{0}' inside {{}} in pattern")]
    IllegalCharInBraces(char),
}
