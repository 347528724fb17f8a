//! Parsing of sub-metric selectors.
//!
//! A selector names a metric plus a tag filter: `http_reqs{status:500}`. The
//! filter is a comma-separated list of `key:value` pairs. Whitespace around
//! keys and values is trimmed. A value may be wrapped in double quotes to
//! keep delimiters literal; inside quotes, `\"` and `\\` escape the quote and
//! the backslash. An empty filter `{}` is valid and matches every sample.

use std::collections::BTreeMap;

/// Errors that can occur while parsing a sub-metric selector.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SelectorError {
    /// The selector had an opening `{` but no closing `}`.
    #[error("missing ending bracket, sub-metric format needs to be 'metric{{key:value}}'")]
    MissingBracket,

    /// The filter expression did not scan as `key:value` pairs.
    #[error("malformed sub-metric selector: {0}")]
    Malformed(String),

    /// The same tag key appeared twice in one filter.
    #[error("duplicate tag key '{0}' in sub-metric selector")]
    DuplicateKey(String),

    /// Submetrics can only be derived from top-level metrics.
    #[error("cannot derive a sub-metric from another sub-metric")]
    NestedSubmetric,
}

/// Splits `metric{filter}` into the metric name and the optional filter
/// expression (without braces).
pub fn split_name(name: &str) -> Result<(&str, Option<&str>), SelectorError> {
    match name.find('{') {
        None => Ok((name, None)),
        Some(open) => {
            if !name.ends_with('}') {
                return Err(SelectorError::MissingBracket);
            }
            Ok((&name[..open], Some(&name[open + 1..name.len() - 1])))
        }
    }
}

/// Parses a filter expression into its canonical pair map.
pub fn parse(expr: &str) -> Result<BTreeMap<String, String>, SelectorError> {
    let mut filter = BTreeMap::new();
    if expr.trim().is_empty() {
        return Ok(filter);
    }

    let mut rest = expr;
    loop {
        let colon = rest.find(':').ok_or_else(|| {
            SelectorError::Malformed(format!("expected 'key:value', got '{}'", rest.trim()))
        })?;
        let key = rest[..colon].trim();
        if key.is_empty() {
            return Err(SelectorError::Malformed("empty tag key".to_string()));
        }
        if key.contains(',') {
            return Err(SelectorError::Malformed(format!("missing value for '{key}'")));
        }

        let (value, remainder) = parse_value(rest[colon + 1..].trim_start())?;
        if filter.insert(key.to_string(), value).is_some() {
            return Err(SelectorError::DuplicateKey(key.to_string()));
        }

        match remainder {
            None => return Ok(filter),
            Some(after_comma) => rest = after_comma,
        }
    }
}

/// Scans one value. Returns the value and, when a separating comma followed,
/// the remainder after it.
fn parse_value(input: &str) -> Result<(String, Option<&str>), SelectorError> {
    let Some(body) = input.strip_prefix('"') else {
        return Ok(match input.find(',') {
            Some(comma) => (input[..comma].trim().to_string(), Some(&input[comma + 1..])),
            None => (input.trim().to_string(), None),
        });
    };

    let mut value = String::new();
    let mut close = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if escaped {
            match c {
                '"' | '\\' => value.push(c),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            close = Some(i);
            break;
        } else {
            value.push(c);
        }
    }
    let close =
        close.ok_or_else(|| SelectorError::Malformed("unterminated quoted value".to_string()))?;

    let after = body[close + 1..].trim_start();
    if after.is_empty() {
        return Ok((value, None));
    }
    match after.strip_prefix(',') {
        Some(remainder) => Ok((value, Some(remainder))),
        None => Err(SelectorError::Malformed(format!(
            "unexpected characters after quoted value: '{after}'"
        ))),
    }
}

/// Renders a filter map in canonical form: keys sorted, values quoted only
/// when they contain a delimiter or have significant whitespace.
pub fn canonical(filter: &BTreeMap<String, String>) -> String {
    filter
        .iter()
        .map(|(key, value)| {
            if needs_quoting(value) {
                format!("{key}:\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                format!("{key}:{value}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn needs_quoting(value: &str) -> bool {
    value.contains([',', '{', '}', '"', '\\'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
}
