//! Literal values as written on the command line.
//!
//! ```text
//! 42  -1.5  true  false  _  null  "some text"  #issue  'quoted
//! ```
//!
//! Anything else is taken as text.

use cellar_runtime::{Heap, RuntimeError, Value};
use thiserror::Error;

#[derive(Error, miette::Diagnostic, Debug, Clone, PartialEq)]
pub enum LiteralError {
    #[error("unclosed text literal: {0}")]
    #[diagnostic(code(cellar::literal::unclosed), help("close the text with a double quote"))]
    UnclosedText(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),
}

pub fn parse(heap: &mut Heap, source: &str) -> Result<Value, LiteralError> {
    if let Some(rest) = source.strip_prefix('\'') {
        let mut value = parse(heap, rest)?;
        heap.quote(&mut value)?;
        return Ok(value);
    }

    if let Some(rest) = source.strip_prefix('"') {
        let text = rest
            .strip_suffix('"')
            .ok_or_else(|| LiteralError::UnclosedText(source.to_string()))?;

        return Ok(heap.make_text(&text.replace("^\"", "\"")));
    }

    if let Some(issue) = source.strip_prefix('#').filter(|issue| !issue.is_empty()) {
        return Ok(heap.make_issue(issue));
    }

    let value = match source {
        "true" => Value::logic(true),
        "false" => Value::logic(false),
        "_" => Value::blank(),
        "null" => Value::null(),
        _ => match (source.parse::<i64>(), source.parse::<f64>()) {
            (Ok(n), _) => Value::integer(n),
            (_, Ok(n)) if source.contains(&['.', 'e', 'E'][..]) => Value::decimal(n),
            _ => heap.make_text(source),
        },
    };

    Ok(value)
}

/// Splits a line into literals at whitespace, keeping quoted text together.
pub fn split(line: &str) -> Result<Vec<String>, LiteralError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in line.chars() {
        match c {
            '"' if !escaped => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }

        escaped = c == '^' && !escaped;
    }

    if quoted {
        return Err(LiteralError::UnclosedText(current));
    }

    if !current.is_empty() {
        words.push(current);
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_runtime::{HeapConfig, Kind};

    #[test]
    fn test_literal_scalars() {
        let mut heap = Heap::new(HeapConfig::small());

        assert_eq!(parse(&mut heap, "42").unwrap().as_integer().unwrap(), 42);
        assert_eq!(parse(&mut heap, "-1.5").unwrap().as_decimal().unwrap(), -1.5);
        assert!(parse(&mut heap, "true").unwrap().as_logic().unwrap());
        assert_eq!(parse(&mut heap, "_").unwrap().type_of(), Kind::Blank);
        assert!(parse(&mut heap, "null").unwrap().is_null());
    }

    #[test]
    fn test_literal_text() {
        let mut heap = Heap::new(HeapConfig::small());

        let text = parse(&mut heap, "\"two words\"").unwrap();
        assert_eq!(heap.text_of(&text).unwrap(), "two words");

        let bare = parse(&mut heap, "inf").unwrap();
        assert_eq!(bare.type_of(), Kind::Text);

        let issue = parse(&mut heap, "#abc").unwrap();
        assert_eq!(heap.mold(&issue), "#abc");

        assert_eq!(
            parse(&mut heap, "\"open"),
            Err(LiteralError::UnclosedText("\"open".into()))
        );
    }

    #[test]
    fn test_literal_quote() {
        let mut heap = Heap::new(HeapConfig::small());
        let quoted = parse(&mut heap, "''5").unwrap();

        assert_eq!(quoted.quote_depth(), 2);
        assert_eq!(heap.mold(&quoted), "''5");
    }

    #[test]
    fn test_split() {
        assert_eq!(
            split("append \"a b\"  1").unwrap(),
            ["append", "\"a b\"", "1"]
        );
        assert_eq!(split("say \"^\"hi^\"\"").unwrap(), ["say", "\"^\"hi^\"\""]);
        assert!(split("say \"oops").is_err());
    }
}
