//! Rule template evaluation.
//!
//! A rule is a command string containing `$NAME` or `${NAME}` placeholders
//! that are filled in from the configuration mapping right before the rule
//! runs. Evaluation is deliberately safe and boring: unknown names stay in
//! the output untouched, and the result is never re-scanned, so a value
//! containing `$` cannot trigger a second substitution.

use crate::config::Config;

/// Substitute `$NAME` / `${NAME}` placeholders from the configuration.
///
/// Placeholder names are runs of ASCII alphanumerics and underscores. A
/// lone `$`, a `$` followed by a non-name character, an unterminated
/// `${...}`, and any name without a mapping are all left intact.
pub fn eval(template: &str, config: &Config) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match scan_placeholder(rest) {
            Some((name, consumed)) => {
                match config.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[..consumed]),
                }
                rest = &rest[consumed..];
            }
            None => {
                out.push('$');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parse a placeholder at the start of `input` (which begins with `$`).
///
/// Returns the name and the number of bytes the placeholder spans, or
/// `None` if no well-formed placeholder starts here.
fn scan_placeholder(input: &str) -> Option<(&str, usize)> {
    let body = &input[1..];
    if let Some(inner) = body.strip_prefix('{') {
        let end = inner.find('}')?;
        let name = &inner[..end];
        if name.is_empty() || !name.bytes().all(is_name_byte) {
            return None;
        }
        // `$` + `{` + name + `}`
        Some((name, name.len() + 3))
    } else {
        let len = body
            .bytes()
            .take_while(|&b| is_name_byte(b))
            .count();
        if len == 0 {
            return None;
        }
        Some((&body[..len], len + 1))
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
