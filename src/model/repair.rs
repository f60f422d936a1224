//! Best-effort textual repair of near-JSON model output.
//!
//! Handles markdown fences, prose around the payload, single or typographic
//! quotes, bare keys, Python literals, trailing commas, raw newlines inside
//! strings, and output cut off mid-structure.

use regex::Regex;
use std::sync::LazyLock;

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("static regex")
});

/// Returns a candidate JSON text, or `None` when no object or array start is
/// present at all. The result is not guaranteed to parse.
pub fn repair_json(raw: &str) -> Option<String> {
    let text = strip_fence(raw.trim());
    let start = text.find(['{', '['])?;
    Some(Rewriter::default().run(&text[start..]))
}

fn strip_fence(text: &str) -> &str {
    if let Some(c) = FENCED.captures(text) {
        if let Some(m) = c.get(1) {
            return m.as_str().trim();
        }
    }
    // Unterminated fence: drop the opening line.
    match text.strip_prefix("```") {
        Some(rest) => rest.split_once('\n').map(|(_, body)| body).unwrap_or(""),
        None => text,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    Single,
    Typographic,
}

impl Quote {
    fn closes(self, c: char) -> bool {
        match self {
            Quote::Double => c == '"',
            Quote::Single => c == '\'',
            Quote::Typographic => c == '\u{201D}' || c == '"',
        }
    }
}

#[derive(Default)]
struct Rewriter {
    out: String,
    closers: Vec<char>,
    quote: Option<Quote>,
    escaped: bool,
    /// Output offset of an object key whose `:` has not been seen yet.
    pending_key: Option<usize>,
}

impl Rewriter {
    fn run(mut self, body: &str) -> String {
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            if let Some(q) = self.quote {
                self.in_string(q, c);
                continue;
            }
            match c {
                '{' | '[' => {
                    self.closers.push(if c == '{' { '}' } else { ']' });
                    self.out.push(c);
                }
                '}' | ']' => {
                    self.drop_trailing_comma();
                    if self.closers.last() == Some(&c) {
                        self.closers.pop();
                    }
                    self.out.push(c);
                    if self.closers.is_empty() {
                        // Anything after the top-level value is prose.
                        return self.out;
                    }
                }
                '"' | '\'' | '\u{201C}' | '\u{201D}' => {
                    self.open_string(match c {
                        '"' => Quote::Double,
                        '\'' => Quote::Single,
                        _ => Quote::Typographic,
                    });
                }
                ':' => {
                    self.pending_key = None;
                    self.out.push(c);
                }
                c if (c.is_ascii_alphabetic() || c == '_') && !self.in_number() => {
                    let mut word = String::from(c);
                    while let Some(&n) = chars.peek() {
                        if n.is_ascii_alphanumeric() || n == '_' || n == '-' {
                            word.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    self.bare_word(&word);
                }
                _ => self.out.push(c),
            }
        }
        self.finish()
    }

    fn in_string(&mut self, q: Quote, c: char) {
        if self.escaped {
            self.escaped = false;
            if q == Quote::Single && c == '\'' {
                // `\'` is not a JSON escape.
                self.out.pop();
            }
            self.out.push(c);
            return;
        }
        if c == '\\' {
            self.escaped = true;
            self.out.push(c);
        } else if q.closes(c) {
            self.out.push('"');
            self.quote = None;
        } else if c == '"' {
            self.out.push_str("\\\"");
        } else if c == '\n' {
            self.out.push_str("\\n");
        } else if c == '\r' {
            self.out.push_str("\\r");
        } else if c == '\t' {
            self.out.push_str("\\t");
        } else {
            self.out.push(c);
        }
    }

    fn open_string(&mut self, q: Quote) {
        if self.in_object() && self.at_member_start() {
            self.pending_key = Some(self.out.len());
        }
        self.quote = Some(q);
        self.out.push('"');
    }

    fn bare_word(&mut self, word: &str) {
        let literal = match word {
            "true" | "True" => Some("true"),
            "false" | "False" => Some("false"),
            "null" | "None" | "undefined" => Some("null"),
            _ => None,
        };
        if self.in_object() && self.at_member_start() {
            self.pending_key = Some(self.out.len());
            self.out.push('"');
            self.out.push_str(word);
            self.out.push('"');
            return;
        }
        match literal {
            Some(l) => self.out.push_str(l),
            // Unquoted text in value position.
            None => {
                self.out.push('"');
                self.out.push_str(word);
                self.out.push('"');
            }
        }
    }

    fn in_object(&self) -> bool {
        self.closers.last() == Some(&'}')
    }

    fn in_number(&self) -> bool {
        self.out.ends_with(|p: char| p.is_ascii_digit() || p == '.')
    }

    fn at_member_start(&self) -> bool {
        matches!(self.out.trim_end().chars().last(), Some('{') | Some(','))
    }

    fn drop_trailing_comma(&mut self) {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
        if self.out.ends_with(',') {
            self.out.pop();
        }
    }

    fn finish(mut self) -> String {
        if self.quote.take().is_some() {
            if self.escaped {
                self.out.pop();
            }
            self.out.push('"');
        }
        if let Some(at) = self.pending_key.take() {
            self.out.truncate(at);
        }
        self.drop_trailing_comma();
        if self.out.ends_with(':') {
            self.out.push_str("null");
        }
        // A number cut off at its exponent or decimal point.
        while self.out.ends_with(['.', '-', '+', 'e', 'E']) {
            let before = self.out.trim_end_matches(['.', '-', '+', 'e', 'E']);
            if before.ends_with(|c: char| c.is_ascii_digit()) {
                let len = before.len();
                self.out.truncate(len);
            } else {
                break;
            }
        }
        while let Some(closer) = self.closers.pop() {
            self.drop_trailing_comma();
            if self.out.ends_with(':') {
                self.out.push_str("null");
            }
            self.out.push(closer);
        }
        self.out
    }
}
