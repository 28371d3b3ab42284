// SPDX-License-Identifier: Apache-2.0

//! Statement-level lexer for section bodies.
//!
//! Splits a body into logical statements, dropping comments and blank lines.
//! A statement continues across newlines while a bracket is open or when a
//! line ends in a backslash. Continuation pieces are joined by a single space
//! (no space directly after an opening bracket or before a closing one), so
//! lexing the re-emitted text of a body is a fixed point.

use crate::morph_error::{MorphError, Result};

/// One logical statement with its 1-based source line span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub lineno: usize,
    pub end_lineno: usize,
}

impl Statement {
    /// Leading whitespace of the statement.
    pub fn indent(&self) -> &str {
        let trimmed = self.text.trim_start();
        &self.text[..self.text.len() - trimmed.len()]
    }
}

struct PendingStatement {
    indent: String,
    content: String,
    lineno: usize,
}

impl PendingStatement {
    fn push_piece(&mut self, piece: &str) {
        let piece = piece.trim();
        if piece.is_empty() {
            return;
        }
        if self.content.is_empty() {
            self.content.push_str(piece);
            return;
        }
        let prev_opens = self
            .content
            .chars()
            .last()
            .map_or(false, |c| matches!(c, '(' | '[' | '{'));
        let next_closes = piece
            .chars()
            .next()
            .map_or(false, |c| matches!(c, ')' | ']' | '}'));
        if !prev_opens && !next_closes {
            self.content.push(' ');
        }
        self.content.push_str(piece);
    }
}

/// Lexes `body` into comment-free logical statements.
pub fn lex_statements(body: &str) -> Result<Vec<Statement>> {
    let mut out = Vec::new();
    let mut depth: i32 = 0;
    let mut pending: Option<PendingStatement> = None;

    for (idx, line) in body.lines().enumerate() {
        let lineno = idx + 1;
        let mut piece = String::new();
        let mut in_string: Option<char> = None;
        let mut chars = line.chars();
        while let Some(ch) = chars.next() {
            if let Some(quote) = in_string {
                piece.push(ch);
                if ch == '\\' {
                    if let Some(escaped) = chars.next() {
                        piece.push(escaped);
                    }
                } else if ch == quote {
                    in_string = None;
                }
                continue;
            }
            match ch {
                '#' => break,
                '\'' | '"' => {
                    in_string = Some(ch);
                    piece.push(ch);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    piece.push(ch);
                }
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(MorphError::Parse(format!(
                            "line {}: unbalanced closing bracket '{}'",
                            lineno, ch
                        )));
                    }
                    piece.push(ch);
                }
                _ => piece.push(ch),
            }
        }
        if in_string.is_some() {
            return Err(MorphError::Parse(format!(
                "line {}: unterminated string literal",
                lineno
            )));
        }

        let trimmed_end = piece.trim_end();
        let (piece_text, backslash) = match trimmed_end.strip_suffix('\\') {
            Some(rest) => (rest, true),
            None => (trimmed_end, false),
        };

        let stmt = pending.get_or_insert_with(|| PendingStatement {
            indent: String::new(),
            content: String::new(),
            lineno,
        });
        if stmt.content.is_empty() {
            let indent_len = piece_text.len() - piece_text.trim_start().len();
            stmt.indent = piece_text[..indent_len].to_string();
            stmt.lineno = lineno;
        }
        stmt.push_piece(piece_text);

        if depth == 0 && !backslash {
            if let Some(done) = pending.take() {
                if !done.content.is_empty() {
                    out.push(Statement {
                        text: format!("{}{}", done.indent, done.content),
                        lineno: done.lineno,
                        end_lineno: lineno,
                    });
                }
            }
        }
    }

    if depth != 0 {
        return Err(MorphError::Parse(
            "unbalanced brackets at end of section body".to_string(),
        ));
    }
    if let Some(p) = pending {
        if !p.content.is_empty() {
            return Err(MorphError::Parse(format!(
                "line {}: dangling line continuation at end of section body",
                p.lineno
            )));
        }
    }
    Ok(out)
}

/// Re-emits `body` without comments, blank lines or continuations.
pub fn normalize_body(body: &str) -> Result<String> {
    let stmts = lex_statements(body)?;
    Ok(stmts
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Splits `s` on `sep` at bracket depth zero, ignoring separators inside
/// string literals.
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if let Some(q) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                in_string = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => in_string = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

pub fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_comments_and_blank_lines_dropped() {
        let body = "# leading comment\n\nqc.h(0)  # trailing\n\nx = '#not a comment'\n";
        let stmts = lex_statements(body).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].text, "qc.h(0)");
        assert_eq!(stmts[0].lineno, 3);
        assert_eq!(stmts[1].text, "x = '#not a comment'");
        assert_eq!(stmts[1].lineno, 5);
    }

    #[test]
    fn test_bracket_continuation_is_joined() {
        let body = "qc.append(RZGate(0.5),\n          qargs=[qr[0]],  # why\n          cargs=[])\n";
        let stmts = lex_statements(body).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(
            stmts[0].text,
            "qc.append(RZGate(0.5), qargs=[qr[0]], cargs=[])"
        );
        assert_eq!(stmts[0].lineno, 1);
        assert_eq!(stmts[0].end_lineno, 3);
    }

    #[test]
    fn test_open_bracket_continuation_has_no_inner_space() {
        let body = "coupling = [\n    [0, 1],\n    [1, 2]\n]\n";
        let stmts = lex_statements(body).unwrap();
        assert_eq!(stmts[0].text, "coupling = [[0, 1], [1, 2]]");
    }

    #[test]
    fn test_backslash_continuation() {
        let body = "x = 1 + \\\n    2\n";
        let stmts = lex_statements(body).unwrap();
        assert_eq!(stmts[0].text, "x = 1 + 2");
        assert_eq!(stmts[0].end_lineno, 2);
    }

    #[test]
    fn test_indentation_is_kept() {
        let body = "for i in range(3):\n    qc.h(i)\n";
        let stmts = lex_statements(body).unwrap();
        assert_eq!(stmts[1].text, "    qc.h(i)");
        assert_eq!(stmts[1].indent(), "    ");
    }

    #[test]
    fn test_unbalanced_is_error() {
        assert!(lex_statements("qc.append(HGate(), [qr[0]]").is_err());
        assert!(lex_statements("x = 1)").is_err());
        assert!(lex_statements("x = 'abc").is_err());
    }

    #[test]
    fn test_normalize_body_is_fixed_point() {
        let body = "a = 1  # c\n\nb = foo(1,\n   2)\n";
        let once = normalize_body(body).unwrap();
        assert_eq!(once, "a = 1\nb = foo(1, 2)");
        assert_eq!(normalize_body(&once).unwrap(), once);
    }

    #[test]
    fn test_split_top_level() {
        let parts = split_top_level("RZGate(f(1, 2)), qargs=[qr[0], qr[1]], name='a,b'", ',');
        assert_eq!(
            parts,
            vec!["RZGate(f(1, 2))", " qargs=[qr[0], qr[1]]", " name='a,b'"]
        );
    }
}
