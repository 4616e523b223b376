//! Rule-driven tokenizer.
//!
//! A [`Lexer`] knows nothing about the script grammar; it is configured with
//! character rules (quotes, capsules, ignorable characters, extraction
//! characters, line comments, line breaks, escapes) and splits source text
//! into a flat list of [`Token`]s in one left-to-right pass.  Every rule has a
//! predicate-based `_if` variant for when a fixed character set is not enough.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use crate::error::ScriptError;

/// One lexed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token text.  Strings have their quotes stripped and escapes applied;
    /// capsules keep their delimiters.
    pub text: String,
    /// `true` if the token came from a quoted string.
    pub is_string: bool,
    /// 1-based line on which the token started.
    pub line: usize,
    /// Byte range of the source the token was derived from.
    pub span: Range<usize>,
}

impl Token {
    pub fn new(text: impl Into<String>, is_string: bool, line: usize) -> Self {
        Token { text: text.into(), is_string, line, span: 0..0 }
    }

    /// `true` for an unquoted token that is exactly `s`.
    pub fn is(&self, s: &str) -> bool {
        !self.is_string && self.text == s
    }

    /// `true` for an unquoted capsule token opened by `open`.
    pub fn is_capsule(&self, open: char, close: char) -> bool {
        !self.is_string
            && self.text.len() >= 2
            && self.text.starts_with(open)
            && self.text.ends_with(close)
    }

    /// Inner text of a capsule token, without its delimiters.
    pub fn capsule_body(&self) -> &str {
        let mut chars = self.text.chars();
        chars.next();
        chars.next_back();
        chars.as_str()
    }

    /// Source-form text: strings are re-quoted with escapes.
    pub fn to_source(&self) -> String {
        if self.is_string {
            quote(&self.text)
        } else {
            self.text.clone()
        }
    }
}

/// Quote `s` so that the default lexer reads it back as the same string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Lexing failed.  The tokens produced before the failure are kept so the
/// caller can inspect them, but they must not be trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
    pub partial: Vec<Token>,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error on line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}

impl From<LexError> for ScriptError {
    fn from(e: LexError) -> Self {
        ScriptError::Lex { line: e.line, message: e.message }
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

type CharPred = Rc<dyn Fn(char) -> bool>;

#[derive(Clone)]
enum Matcher {
    Char(char),
    Pred(CharPred),
}

impl Matcher {
    fn matches(&self, c: char) -> bool {
        match self {
            Matcher::Char(m) => *m == c,
            Matcher::Pred(p) => p(c),
        }
    }
}

fn any(rules: &[Matcher], c: char) -> bool {
    rules.iter().any(|m| m.matches(c))
}

/// A configured tokenizer.  Build with the chained `add_*` methods.
#[derive(Clone, Default)]
pub struct Lexer {
    capsules: Vec<(Matcher, Matcher)>,
    quotes: Vec<Matcher>,
    ignores: Vec<Matcher>,
    extracts: Vec<Matcher>,
    lineskips: Vec<Matcher>,
    linebreaks: Vec<Matcher>,
    escapes: HashMap<char, char>,
    erase_empty: bool,
    verbatim_backslash: bool,
}

impl Lexer {
    /// An empty rule set with the default escape table (`\n \t \r \0`).
    pub fn new() -> Self {
        let mut lx = Lexer::default();
        lx.escapes = [('n', '\n'), ('t', '\t'), ('r', '\r'), ('0', '\0')].into_iter().collect();
        lx
    }

    pub fn add_capsule(mut self, open: char, close: char) -> Self {
        self.capsules.push((Matcher::Char(open), Matcher::Char(close)));
        self
    }

    pub fn add_capsule_if(
        mut self,
        open: impl Fn(char) -> bool + 'static,
        close: impl Fn(char) -> bool + 'static,
    ) -> Self {
        self.capsules.push((Matcher::Pred(Rc::new(open)), Matcher::Pred(Rc::new(close))));
        self
    }

    pub fn add_quote(mut self, c: char) -> Self {
        self.quotes.push(Matcher::Char(c));
        self
    }

    pub fn add_quote_if(mut self, p: impl Fn(char) -> bool + 'static) -> Self {
        self.quotes.push(Matcher::Pred(Rc::new(p)));
        self
    }

    pub fn add_ignore(mut self, c: char) -> Self {
        self.ignores.push(Matcher::Char(c));
        self
    }

    pub fn add_ignore_if(mut self, p: impl Fn(char) -> bool + 'static) -> Self {
        self.ignores.push(Matcher::Pred(Rc::new(p)));
        self
    }

    pub fn add_extract(mut self, c: char) -> Self {
        self.extracts.push(Matcher::Char(c));
        self
    }

    pub fn add_extract_if(mut self, p: impl Fn(char) -> bool + 'static) -> Self {
        self.extracts.push(Matcher::Pred(Rc::new(p)));
        self
    }

    pub fn add_lineskip(mut self, c: char) -> Self {
        self.lineskips.push(Matcher::Char(c));
        self
    }

    pub fn add_lineskip_if(mut self, p: impl Fn(char) -> bool + 'static) -> Self {
        self.lineskips.push(Matcher::Pred(Rc::new(p)));
        self
    }

    pub fn add_linebreak(mut self, c: char) -> Self {
        self.linebreaks.push(Matcher::Char(c));
        self
    }

    pub fn add_linebreak_if(mut self, p: impl Fn(char) -> bool + 'static) -> Self {
        self.linebreaks.push(Matcher::Pred(Rc::new(p)));
        self
    }

    /// Map `\<from>` to `to`.  Unmapped escapes copy the character as-is.
    pub fn add_escape(mut self, from: char, to: char) -> Self {
        self.escapes.insert(from, to);
        self
    }

    /// Drop zero-length tokens between adjacent separators.
    pub fn erase_empty(mut self) -> Self {
        self.erase_empty = true;
        self
    }

    /// Keep backslash sequences verbatim instead of translating them.
    pub fn verbatim_backslash(mut self) -> Self {
        self.verbatim_backslash = true;
        self
    }

    fn opens_capsule(&self, c: char) -> Option<usize> {
        self.capsules.iter().position(|(open, _)| open.matches(c))
    }

    fn closes_any_capsule(&self, c: char) -> bool {
        self.capsules.iter().any(|(_, close)| close.matches(c))
    }

    fn is_quote(&self, c: char) -> bool {
        any(&self.quotes, c)
    }

    fn is_linebreak(&self, c: char) -> bool {
        any(&self.linebreaks, c)
    }

    // ── Scan ──────────────────────────────────────────────────────────────────

    /// Tokenize `src`.
    pub fn lex(&self, src: &str) -> Result<Vec<Token>, LexError> {
        let mut scan = Scan { lexer: self, tokens: Vec::new(), cur: String::new(), start: None, start_line: 1, line: 1 };
        // Open capsules by rule index; the quote char open inside a capsule.
        let mut capsules: Vec<usize> = Vec::new();
        let mut capsule_quote: Option<char> = None;
        let mut string_quote: Option<char> = None;
        let mut skip = false;
        let mut chars = src.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            let end = i + c.len_utf8();

            if skip {
                if self.is_linebreak(c) {
                    skip = false;
                    scan.line += 1;
                }
                continue;
            }

            if let Some(q) = string_quote {
                if c == '\\' {
                    let Some((j, e)) = chars.next() else {
                        return Err(scan.fail("escape at end of input"));
                    };
                    if self.verbatim_backslash {
                        scan.cur.push('\\');
                        scan.cur.push(e);
                    } else {
                        scan.cur.push(self.escapes.get(&e).copied().unwrap_or(e));
                    }
                    if self.is_linebreak(e) {
                        scan.line += 1;
                    }
                    scan.mark_end(j + e.len_utf8());
                } else if c == q {
                    string_quote = None;
                    scan.emit(true, end);
                } else {
                    if self.is_linebreak(c) {
                        scan.line += 1;
                    }
                    scan.cur.push(c);
                }
                continue;
            }

            if let Some(&top) = capsules.last() {
                scan.cur.push(c);
                if self.is_linebreak(c) {
                    scan.line += 1;
                }
                if let Some(q) = capsule_quote {
                    if c == '\\' {
                        let Some((_, e)) = chars.next() else {
                            return Err(scan.fail("escape at end of input"));
                        };
                        scan.cur.push(e);
                    } else if c == q {
                        capsule_quote = None;
                    }
                    continue;
                }
                if self.is_quote(c) {
                    capsule_quote = Some(c);
                } else if self.capsules[top].1.matches(c) {
                    capsules.pop();
                    if capsules.is_empty() {
                        scan.emit(false, end);
                    }
                } else if let Some(idx) = self.opens_capsule(c) {
                    capsules.push(idx);
                } else if self.closes_any_capsule(c) {
                    return Err(scan.fail(format!("mismatched closing '{c}'")));
                }
                continue;
            }

            if self.is_quote(c) {
                scan.flush(i);
                string_quote = Some(c);
                scan.begin(i);
            } else if let Some(idx) = self.opens_capsule(c) {
                scan.flush(i);
                capsules.push(idx);
                scan.begin(i);
                scan.cur.push(c);
            } else if self.closes_any_capsule(c) {
                return Err(scan.fail(format!("unbalanced closing '{c}'")));
            } else if any(&self.lineskips, c) {
                scan.flush(i);
                skip = true;
            } else if self.is_linebreak(c) {
                scan.flush(i);
                scan.line += 1;
            } else if any(&self.ignores, c) {
                scan.flush(i);
            } else if any(&self.extracts, c) {
                scan.flush(i);
                scan.begin(i);
                scan.cur.push(c);
                scan.emit(false, end);
            } else if c == '\\' && !self.verbatim_backslash {
                let Some((j, e)) = chars.next() else {
                    return Err(scan.fail("escape at end of input"));
                };
                if scan.start.is_none() {
                    scan.begin(i);
                }
                scan.cur.push(self.escapes.get(&e).copied().unwrap_or(e));
                scan.mark_end(j + e.len_utf8());
            } else {
                if scan.start.is_none() {
                    scan.begin(i);
                }
                scan.cur.push(c);
                scan.mark_end(end);
            }
        }

        if string_quote.is_some() {
            return Err(scan.fail("unterminated string"));
        }
        if !capsules.is_empty() {
            return Err(scan.fail("unbalanced capsule"));
        }
        scan.flush(src.len());
        Ok(scan.tokens)
    }
}

/// Mutable state of one [`Lexer::lex`] pass.
struct Scan<'a> {
    lexer: &'a Lexer,
    tokens: Vec<Token>,
    cur: String,
    /// Byte offset where the pending token started, and its current end.
    start: Option<(usize, usize)>,
    start_line: usize,
    line: usize,
}

impl Scan<'_> {
    fn begin(&mut self, at: usize) {
        self.start = Some((at, at));
        self.start_line = self.line;
    }

    fn mark_end(&mut self, end: usize) {
        if let Some((_, e)) = self.start.as_mut() {
            *e = end;
        }
    }

    fn emit(&mut self, is_string: bool, end: usize) {
        let (start, _) = self.start.take().unwrap_or((end, end));
        self.tokens.push(Token {
            text: std::mem::take(&mut self.cur),
            is_string,
            line: self.start_line,
            span: start..end,
        });
    }

    /// Close the pending plain token at a separator found at byte `at`.
    fn flush(&mut self, at: usize) {
        match self.start.take() {
            Some((start, end)) => {
                self.tokens.push(Token {
                    text: std::mem::take(&mut self.cur),
                    is_string: false,
                    line: self.start_line,
                    span: start..end,
                });
            }
            None if !self.lexer.erase_empty => {
                self.tokens.push(Token { text: String::new(), is_string: false, line: self.line, span: at..at });
            }
            None => {}
        }
    }

    fn fail(&mut self, message: impl Into<String>) -> LexError {
        LexError { line: self.line, message: message.into(), partial: std::mem::take(&mut self.tokens) }
    }
}

// ── Stock configurations ──────────────────────────────────────────────────────

/// Rules for whole script files: directives, comments and label bodies.
pub fn source_lexer() -> Lexer {
    Lexer::new()
        .add_quote('"')
        .add_capsule('(', ')')
        .add_capsule('[', ']')
        .add_ignore(' ')
        .add_ignore('\t')
        .add_ignore('\r')
        .add_linebreak('\n')
        .add_lineskip('#')
        .add_extract('@')
        .verbatim_backslash()
        .erase_empty()
}

/// Rules for a single expression.
pub fn expression_lexer() -> Lexer {
    Lexer::new()
        .add_quote('"')
        .add_capsule('(', ')')
        .add_capsule('[', ']')
        .add_capsule('{', '}')
        .add_ignore_if(char::is_whitespace)
        .erase_empty()
}

/// Rules for splitting an argument list on top-level commas.
pub fn argument_lexer() -> Lexer {
    Lexer::new()
        .add_quote('"')
        .add_capsule('(', ')')
        .add_capsule('[', ']')
        .add_capsule('{', '}')
        .add_extract(',')
        .add_ignore_if(char::is_whitespace)
        .verbatim_backslash()
        .erase_empty()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn splits_on_ignored_chars() {
        let toks = Lexer::new().add_ignore(' ').erase_empty().lex("a  bb c").unwrap();
        assert_eq!(texts(&toks), ["a", "bb", "c"]);
    }

    #[test]
    fn keeps_empty_tokens_unless_erased() {
        let toks = Lexer::new().add_ignore(',').lex("a,,b").unwrap();
        assert_eq!(texts(&toks), ["a", "", "b"]);
    }

    #[test]
    fn string_escape_translated() {
        let toks = expression_lexer().lex(r#""a\tb""#).unwrap();
        assert_eq!(toks.len(), 1);
        assert!(toks[0].is_string);
        assert_eq!(toks[0].text, "a\tb");
    }

    #[test]
    fn verbatim_backslash_keeps_sequence() {
        let toks = source_lexer().lex(r#""a\"b""#).unwrap();
        assert_eq!(toks[0].text, r#"a\"b"#);
    }

    #[test]
    fn custom_escape() {
        let toks = Lexer::new().add_quote('\'').add_escape('e', '\x1b').erase_empty().lex(r"'\e'").unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].text, "\x1b");
    }

    #[test]
    fn capsule_is_one_token_with_nesting() {
        let toks = expression_lexer().lex("f(a, (b c), [d]) x").unwrap();
        assert_eq!(texts(&toks), ["f", "(a, (b c), [d])", "x"]);
    }

    #[test]
    fn quote_inside_capsule_hides_closer() {
        let toks = expression_lexer().lex(r#"(")")"#).unwrap();
        assert_eq!(texts(&toks), [r#"(")")"#]);
    }

    #[test]
    fn mismatched_capsule_fails() {
        let err = expression_lexer().lex("(a]").unwrap_err();
        assert!(err.message.contains("mismatched"));
        assert!(expression_lexer().lex("a)").is_err());
        assert!(expression_lexer().lex("(a").is_err());
    }

    #[test]
    fn unterminated_string_fails() {
        let err = expression_lexer().lex("\"abc").unwrap_err();
        assert_eq!(err.message, "unterminated string");
    }

    #[test]
    fn dangling_escape_fails() {
        assert!(expression_lexer().lex("\"abc\\").is_err());
    }

    #[test]
    fn partial_tokens_survive_failure() {
        let err = expression_lexer().lex("a b (c").unwrap_err();
        assert_eq!(texts(&err.partial), ["a", "b"]);
    }

    #[test]
    fn extract_emits_single_char() {
        let toks = source_lexer().lex("@main []").unwrap();
        assert_eq!(texts(&toks), ["@", "main", "[]"]);
    }

    #[test]
    fn comment_skips_to_line_break() {
        let toks = source_lexer().lex("a # b c\nd").unwrap();
        assert_eq!(texts(&toks), ["a", "d"]);
        assert_eq!(toks[1].line, 2);
    }

    #[test]
    fn comment_marker_inside_string_is_text() {
        let toks = source_lexer().lex("\"#x\" y").unwrap();
        assert_eq!(texts(&toks), ["#x", "y"]);
    }

    #[test]
    fn capsule_records_opening_line() {
        let toks = source_lexer().lex("a\n(b\nc)\nd").unwrap();
        assert_eq!(toks[1].text, "(b\nc)");
        assert_eq!(toks[1].line, 2);
        assert_eq!(toks[2].line, 4);
    }

    #[test]
    fn predicate_rules() {
        let toks = Lexer::new()
            .add_ignore_if(|c| c == ';')
            .add_extract_if(|c| c.is_ascii_digit())
            .erase_empty()
            .lex("ab1cd;e")
            .unwrap();
        assert_eq!(texts(&toks), ["ab", "1", "cd", "e"]);
    }

    #[test]
    fn predicate_capsule() {
        let toks = Lexer::new()
            .add_capsule_if(|c| c == '<', |c| c == '>')
            .add_ignore(' ')
            .erase_empty()
            .lex("x <a b> y")
            .unwrap();
        assert_eq!(texts(&toks), ["x", "<a b>", "y"]);
    }

    #[test]
    fn spans_cover_source() {
        let src = "set(x, \"a b\") # c\n@ main []";
        let toks = source_lexer().lex(src).unwrap();
        assert_eq!(&src[toks[0].span.clone()], "set");
        assert_eq!(&src[toks[1].span.clone()], "(x, \"a b\")");
        assert_eq!(&src[toks[2].span.clone()], "@");
    }

    #[test]
    fn quote_round_trips() {
        let s = "a\"b\\c\nd\te";
        let toks = expression_lexer().lex(&quote(s)).unwrap();
        assert_eq!(toks[0].text, s);
    }
}
