//! Tokenizer and rewriter for the small javascript-like expression language
//! embedded in template directives.
//!
//! The rewriter does not build a syntax tree. It walks the token stream and
//! decides, token by token, whether a symbol is a free variable that must be
//! looked up in the rendering context:
//!
//! - by default every symbol is a variable,
//! - unless the previous token is a dot (`a.b`, `b` is a property),
//! - or the previous token is `{` or `,` and the next is `:` (an object key),
//! - or it names a parameter of an arrow function in the same expression.
//!
//! `compile_expr("computeSomething({val: state.val})")` gives
//! `ctx['computeSomething']({val:ctx['state'].val})`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CompileError, CompileResult};

const RESERVED_WORDS: [&str; 21] = [
    "true",
    "false",
    "NaN",
    "null",
    "undefined",
    "debugger",
    "console",
    "window",
    "in",
    "instanceof",
    "new",
    "function",
    "return",
    "this",
    "eval",
    "void",
    "Math",
    "RegExp",
    "Array",
    "Object",
    "Date",
];

const WORD_REPLACEMENT: [(&str, &str); 6] = [
    ("and", "&&"),
    ("or", "||"),
    ("gt", ">"),
    ("gte", ">="),
    ("lt", "<"),
    ("lte", "<="),
];

// The trailing space of `typeof `, `in ` and `new ` is significant: it keeps
// them from matching the start of a longer symbol.
const OPERATORS: [&str; 29] = [
    "...", ".", "===", "==", "+", "!==", "!=", "!", "||", "&&", ">=", ">", "<=", "<", "?", "-",
    "*", "/", "%", "typeof ", "=>", "=", ";", "in ", "new ", "|", "&", "^", "~",
];

/// Matches `{{ expr }}` and `#{ expr }` interpolations in attribute values.
static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{.*?\}\}|#\{.*?\}").expect("interpolation pattern is valid")
});

static TEMPLATE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(.*?)\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    String,
    TemplateString,
    Number,
    Symbol,
    Operator,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    Colon,
    Comma,
}

impl TokenKind {
    const fn from_static(ch: char) -> Option<Self> {
        match ch {
            '{' => Some(Self::LeftBrace),
            '}' => Some(Self::RightBrace),
            '[' => Some(Self::LeftBracket),
            ']' => Some(Self::RightBracket),
            '(' => Some(Self::LeftParen),
            ')' => Some(Self::RightParen),
            ':' => Some(Self::Colon),
            ',' => Some(Self::Comma),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    /// Source length consumed, when it differs from `value` (word operators).
    size: Option<usize>,
    original_value: Option<String>,
    var_name: Option<String>,
    is_local: bool,
}

impl Token {
    fn new<V: Into<String>>(kind: TokenKind, value: V) -> Self {
        Self {
            kind,
            value: value.into(),
            size: None,
            original_value: None,
            var_name: None,
            is_local: false,
        }
    }

    fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.value == op
    }

    /// The source name of a symbol that was recognised as a variable.
    pub fn var_name(&self) -> Option<&str> {
        self.var_name.as_deref()
    }

    /// True when the variable is an arrow function parameter.
    pub const fn is_local(&self) -> bool {
        self.is_local
    }

    /// The text this token contributes to a compiled expression.
    pub fn output(&self) -> &str {
        if self.value == "in " {
            " in "
        } else {
            &self.value
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    const fn new(input: &'a str) -> Self {
        Lexer { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn make_error(&self) -> CompileError {
        CompileError::tokenize(self.input)
    }

    fn consume_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn lex_string(&self) -> CompileResult<Option<Token>> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        let quote = match chars.next() {
            Some((_, q @ ('\'' | '"' | '`'))) => q,
            _ => return Ok(None),
        };
        while let Some((idx, ch)) = chars.next() {
            if ch == '\\' {
                if chars.next().is_none() {
                    return Err(self.make_error());
                }
            } else if ch == quote {
                let end = idx + ch.len_utf8();
                let value = rest.get(..end).unwrap_or(rest);
                let kind = if quote == '`' {
                    TokenKind::TemplateString
                } else {
                    TokenKind::String
                };
                return Ok(Some(Token::new(kind, value)));
            }
        }
        Err(self.make_error())
    }

    fn lex_number(&self) -> Option<Token> {
        let rest = self.rest();
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        rest.get(..end).map(|n| Token::new(TokenKind::Number, n))
    }

    fn lex_operator(&self) -> Option<Token> {
        let rest = self.rest();
        OPERATORS
            .iter()
            .find(|op| rest.starts_with(*op))
            .map(|op| Token::new(TokenKind::Operator, *op))
    }

    fn lex_symbol(&self) -> Option<Token> {
        let rest = self.rest();
        if !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$') {
            return None;
        }
        let end = rest
            .char_indices()
            .skip(1)
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(rest.len(), |(idx, _)| idx);
        let word = rest.get(..end)?;
        if let Some((_, op)) = WORD_REPLACEMENT.iter().find(|(w, _)| *w == word) {
            let mut token = Token::new(TokenKind::Operator, *op);
            token.size = Some(word.len());
            return Some(token);
        }
        Some(Token::new(TokenKind::Symbol, word))
    }

    fn lex_static(&self) -> Option<Token> {
        let ch = self.rest().chars().next()?;
        TokenKind::from_static(ch).map(|kind| Token::new(kind, ch))
    }

    fn next_token(&mut self) -> CompileResult<Option<Token>> {
        self.consume_whitespace();
        if self.eof() {
            return Ok(None);
        }
        let token = match self.lex_string()? {
            Some(token) => Some(token),
            None => self
                .lex_number()
                .or_else(|| self.lex_operator())
                .or_else(|| self.lex_symbol())
                .or_else(|| self.lex_static()),
        };
        match token {
            Some(token) => {
                self.pos += token.size.unwrap_or(token.value.len());
                Ok(Some(token))
            }
            None => Err(self.make_error()),
        }
    }
}

/// Splits an expression into tokens.
///
/// Fails on unterminated strings and on any input no token rule accepts.
pub fn tokenize(expr: &str) -> CompileResult<Vec<Token>> {
    let mut lexer = Lexer::new(expr);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

fn is_left_separator(token: Option<&Token>) -> bool {
    token.is_some_and(|t| matches!(t.kind, TokenKind::LeftBrace | TokenKind::Comma))
}

fn is_right_separator(token: Option<&Token>) -> bool {
    token.is_some_and(|t| matches!(t.kind, TokenKind::RightBrace | TokenKind::Comma))
}

fn rewrite_template_string(literal: &str) -> CompileResult<String> {
    let mut result = String::with_capacity(literal.len());
    let mut last = 0;
    for caps in TEMPLATE_PLACEHOLDER.captures_iter(literal) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(literal.get(last..whole.start()).unwrap_or_default());
        result.push_str("${");
        result.push_str(&compile_expr(inner.as_str())?);
        result.push('}');
        last = whole.end();
    }
    result.push_str(literal.get(last..).unwrap_or_default());
    Ok(result)
}

/// Tokenizes `expr` and rewrites every free variable into a context lookup.
///
/// All arrow function parameters are treated as locals for the rest of the
/// expression: the expression is assumed to hold a single scope.
pub fn compile_expr_to_tokens(expr: &str) -> CompileResult<Vec<Token>> {
    let mut locals: HashSet<String> = HashSet::new();
    let mut tokens = tokenize(expr)?;
    // tracks the innermost open `{` or `[`
    let mut groups: Vec<TokenKind> = Vec::new();

    let mut i = 0;
    while let Some(token) = tokens.get(i) {
        let kind = token.kind;
        let group = groups.last().copied();
        match kind {
            TokenKind::LeftBrace | TokenKind::LeftBracket => groups.push(kind),
            TokenKind::RightBrace | TokenKind::RightBracket => {
                groups.pop();
            }
            _ => {}
        }

        let mut is_var =
            kind == TokenKind::Symbol && !RESERVED_WORDS.contains(&token.value.as_str());
        if is_var && i > 0 {
            let prev = tokens.get(i - 1);
            // `{a}` is shorthand for `{a: a}`
            if group == Some(TokenKind::LeftBrace)
                && is_left_separator(prev)
                && is_right_separator(tokens.get(i + 1))
            {
                let copy = token.clone();
                tokens.insert(i + 1, Token::new(TokenKind::Colon, ":"));
                tokens.insert(i + 2, copy);
            }
            let prev = tokens.get(i - 1);
            let next = tokens.get(i + 1);
            if prev.is_some_and(|p| p.is_operator(".")) {
                is_var = false;
            } else if prev.is_some_and(|p| matches!(p.kind, TokenKind::LeftBrace | TokenKind::Comma))
                && next.is_some_and(|n| n.kind == TokenKind::Colon)
            {
                is_var = false;
            }
        }

        if kind == TokenKind::TemplateString {
            if let Some(token) = tokens.get_mut(i) {
                token.value = rewrite_template_string(&token.value)?;
            }
        }

        if tokens.get(i + 1).is_some_and(|n| n.is_operator("=>")) {
            if kind == TokenKind::RightParen {
                let mut j = i.saturating_sub(1);
                while j > 0 {
                    let Some(param) = tokens.get_mut(j) else { break };
                    if param.kind == TokenKind::LeftParen {
                        break;
                    }
                    if param.kind == TokenKind::Symbol {
                        if let Some(original) = param.original_value.clone() {
                            param.value = original.clone();
                            locals.insert(original);
                        }
                    }
                    j -= 1;
                }
            } else if let Some(token) = tokens.get(i) {
                locals.insert(token.value.clone());
            }
        }

        if is_var {
            if let Some(token) = tokens.get_mut(i) {
                token.var_name = Some(token.value.clone());
                if !locals.contains(&token.value) {
                    token.original_value = Some(token.value.clone());
                    token.value = format!("ctx['{}']", token.value);
                }
            }
        }
        i += 1;
    }

    for token in &mut tokens {
        if token.kind == TokenKind::Symbol
            && token.var_name.is_some()
            && locals.contains(&token.value)
        {
            token.original_value = Some(token.value.clone());
            token.value = format!("_{}", token.value);
            token.is_local = true;
        }
    }
    Ok(tokens)
}

/// Rewrites `expr` so that free variables are looked up in `ctx`.
pub fn compile_expr(expr: &str) -> CompileResult<String> {
    Ok(compile_expr_to_tokens(expr)?
        .iter()
        .map(Token::output)
        .collect())
}

/// True when `s` holds at least one `{{ }}` or `#{ }` interpolation.
pub fn has_interpolation(s: &str) -> bool {
    INTERPOLATION.is_match(s)
}

fn interpolation_body(matched: &str) -> &str {
    let end = if matched.starts_with('{') { 2 } else { 1 };
    matched
        .get(2..matched.len().saturating_sub(end))
        .unwrap_or_default()
}

/// Turns a string with interpolations into a javascript template literal,
/// or into a parenthesised expression when the whole string is a single
/// interpolation.
pub fn replace_dynamic_parts<F>(s: &str, mut replacer: F) -> CompileResult<String>
where
    F: FnMut(&str) -> CompileResult<String>,
{
    if let Some(first) = INTERPOLATION.find(s) {
        if first.len() == s.len() {
            return Ok(format!("({})", replacer(interpolation_body(first.as_str()))?));
        }
    }
    let mut result = String::from("`");
    let mut last = 0;
    for found in INTERPOLATION.find_iter(s) {
        result.push_str(s.get(last..found.start()).unwrap_or_default());
        result.push_str("${");
        result.push_str(&replacer(interpolation_body(found.as_str()))?);
        result.push('}');
        last = found.end();
    }
    result.push_str(s.get(last..).unwrap_or_default());
    result.push('`');
    Ok(result)
}

/// `replace_dynamic_parts` with plain expression compilation.
pub fn interpolate(s: &str) -> CompileResult<String> {
    replace_dynamic_parts(s, compile_expr)
}
