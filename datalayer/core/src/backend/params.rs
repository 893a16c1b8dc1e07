//! Named parameter handling
//!
//! Queries reference parameters as `:name`. The warehouse accepts that form
//! natively; Postgres needs positional `$n` placeholders, which
//! [`to_positional`] produces. [`rewrite_params`] can instead splice a value
//! in as a literal, which leaves its type for the server to infer.

/// Query text rewritten for positional binding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionalQuery {
    /// SQL with `$1..$n` in place of `:name`
    pub sql: String,
    /// Parameter names in `$n` order; a repeated name reuses its index
    pub names: Vec<String>,
}

/// Rewrite `:name` placeholders to `$n`
///
/// Skips `::type` casts, quoted strings and identifiers, and comments.
#[must_use]
pub fn to_positional(query: &str) -> PositionalQuery {
    rewrite_params(query, |_| None)
}

/// Rewrite `:name` placeholders, inlining some of them
///
/// When `inline` returns SQL text for a name, every occurrence of that
/// placeholder is replaced by it and no `$n` index is allocated.
pub fn rewrite_params<F>(query: &str, mut inline: F) -> PositionalQuery
where
    F: FnMut(&str) -> Option<String>,
{
    let chars: Vec<char> = query.chars().collect();
    let mut sql = String::with_capacity(query.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = scan_quoted(&chars, i, c);
                sql.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                sql.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = scan_block_comment(&chars, i);
                sql.extend(&chars[i..end]);
                i = end;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                sql.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_') =>
            {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
                    .map_or(chars.len(), |p| start + p);
                let name: String = chars[start..end].iter().collect();
                i = end;

                if let Some(literal) = inline(&name) {
                    sql.push_str(&literal);
                    continue;
                }

                let index = match names.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                sql.push('$');
                sql.push_str(&index.to_string());
            }
            _ => {
                sql.push(c);
                i += 1;
            }
        }
    }

    PositionalQuery { sql, names }
}

/// Untyped SQL string literal with embedded quotes doubled
///
/// Sound only with `standard_conforming_strings = on`, where backslashes are
/// ordinary characters.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// End index (exclusive) of a quoted run starting at `start`; doubled quotes escape
fn scan_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn scan_block_comment(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}
