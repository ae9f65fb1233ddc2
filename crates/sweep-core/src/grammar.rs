use crate::error::{Result, SweepError};
use crate::value::{AxisValue, Scalar, DEFINED_MARKER, UNDEFINED_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Scalar,
    ChoiceList,
    PresenceToggleList,
}

impl AxisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AxisKind::Scalar => "scalar",
            AxisKind::ChoiceList => "choice-list",
            AxisKind::PresenceToggleList => "presence-toggle-list",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAxis {
    pub key: String,
    pub kind: AxisKind,
    pub values: Vec<AxisValue>,
    pub grouped: bool,
}

impl ParameterAxis {
    pub fn new(key: impl Into<String>, values: Vec<AxisValue>) -> Self {
        let kind = if values.iter().any(AxisValue::is_toggle) {
            AxisKind::PresenceToggleList
        } else {
            AxisKind::ChoiceList
        };
        Self {
            key: key.into(),
            kind,
            values,
            grouped: false,
        }
    }

    pub fn scalar(key: impl Into<String>, value: AxisValue) -> Self {
        Self {
            key: key.into(),
            kind: AxisKind::Scalar,
            values: vec![value],
            grouped: false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Scalar(Scalar),
    Marker(AxisValue),
    List(Vec<Token>),
}

pub fn parse_combination(text: &str) -> Result<Vec<ParameterAxis>> {
    let items = split_top_level(text, ',').map_err(|msg| SweepError::grammar(text.trim(), msg))?;
    let mut axes: Vec<ParameterAxis> = Vec::new();
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, raw) = split_assignment(item)
            .ok_or_else(|| SweepError::grammar(item, "expected `key=value`"))?;
        if key.is_empty() {
            return Err(SweepError::grammar(item, "empty option key"));
        }
        if axes.iter().any(|a| a.key == key) {
            return Err(SweepError::grammar(key, "option given more than once"));
        }
        let token = parse_token(raw).map_err(|msg| SweepError::grammar(key, msg))?;
        let axis = match token {
            Token::Scalar(s) => ParameterAxis::scalar(key, AxisValue::Concrete(s)),
            Token::Marker(m) => ParameterAxis::scalar(key, m),
            Token::List(items) => {
                if items.is_empty() {
                    return Err(SweepError::grammar(key, "empty value list"));
                }
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Token::Scalar(s) => values.push(AxisValue::Concrete(s)),
                        Token::Marker(m) => values.push(m),
                        Token::List(_) => {
                            return Err(SweepError::grammar(key, "nested lists are not allowed"))
                        }
                    }
                }
                ParameterAxis::new(key, values)
            }
        };
        axes.push(axis);
    }
    Ok(axes)
}

pub fn parse_combine(text: &str) -> Result<Vec<String>> {
    let trimmed = strip_quotes(text.trim());
    let mut keys: Vec<String> = Vec::new();
    for part in trimmed.split('+') {
        let key = part.trim();
        if key.is_empty() {
            return Err(SweepError::grammar(text.trim(), "empty key in combine directive"));
        }
        if keys.iter().any(|k| k == key) {
            return Err(SweepError::grammar(key, "key repeated in combine directive"));
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

pub fn apply_combine(axes: &mut [ParameterAxis], keys: &[String]) -> Result<()> {
    for key in keys {
        let axis = axes
            .iter_mut()
            .find(|a| &a.key == key)
            .ok_or_else(|| SweepError::grammar(key, "combined key is not a declared option"))?;
        axis.grouped = true;
    }
    check_grouped_lengths(axes)
}

pub fn check_grouped_lengths(axes: &[ParameterAxis]) -> Result<()> {
    let mut grouped = axes.iter().filter(|a| a.grouped);
    if let Some(first) = grouped.next() {
        for other in grouped {
            if other.len() != first.len() {
                return Err(SweepError::configuration(
                    &other.key,
                    format!(
                        "grouped with `{}` but has {} values instead of {}",
                        first.key,
                        other.len(),
                        first.len()
                    ),
                ));
            }
        }
    }
    Ok(())
}

pub fn parse_study_axes(text: &str, combine: Option<&str>) -> Result<Vec<ParameterAxis>> {
    let mut axes = parse_combination(text)?;
    if let Some(directive) = combine.filter(|c| !c.trim().is_empty()) {
        let keys = parse_combine(directive)?;
        apply_combine(&mut axes, &keys)?;
    }
    Ok(axes)
}

pub fn parse_token(raw: &str) -> std::result::Result<Token, String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err("empty value".to_string());
    }
    if let Some(rest) = t.strip_prefix('[') {
        let inner = rest
            .strip_suffix(']')
            .ok_or_else(|| format!("unterminated list `{}`", t))?;
        if inner.trim().is_empty() {
            return Ok(Token::List(Vec::new()));
        }
        let mut items = Vec::new();
        for part in split_top_level(inner, ',')? {
            items.push(parse_token(&part)?);
        }
        return Ok(Token::List(items));
    }
    if t.starts_with('\'') || t.starts_with('"') {
        let quote = &t[..1];
        if t.len() < 2 || !t.ends_with(quote) {
            return Err(format!("unterminated string `{}`", t));
        }
        let inner = &t[1..t.len() - 1];
        return Ok(match marker(inner) {
            Some(m) => Token::Marker(m),
            None => Token::Scalar(Scalar::Str(inner.to_string())),
        });
    }
    if t.starts_with('{') {
        if !t.ends_with('}') {
            return Err(format!("unterminated dict-like literal `{}`", t));
        }
        return Ok(Token::Scalar(Scalar::Str(t.to_string())));
    }
    if t.starts_with('@') {
        return marker(t)
            .map(Token::Marker)
            .ok_or_else(|| format!("unknown marker `{}`", t));
    }
    if let Ok(v) = t.parse::<i64>() {
        return Ok(Token::Scalar(Scalar::Int(v)));
    }
    if looks_numeric(t) {
        if let Ok(v) = t.parse::<f64>() {
            return Ok(Token::Scalar(Scalar::Float(v)));
        }
    }
    Ok(Token::Scalar(Scalar::Str(t.to_string())))
}

fn marker(text: &str) -> Option<AxisValue> {
    match text {
        DEFINED_MARKER => Some(AxisValue::Included),
        UNDEFINED_MARKER => Some(AxisValue::Omitted),
        _ => None,
    }
}

// `f64::from_str` also takes `inf` and `NaN`, which are words here.
fn looks_numeric(t: &str) -> bool {
    let first = t.chars().next().unwrap_or(' ');
    (first.is_ascii_digit() || first == '-' || first == '+' || first == '.')
        && t.chars().any(|c| c.is_ascii_digit())
}

fn strip_quotes(t: &str) -> &str {
    for q in ['\'', '"'] {
        if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
            return &t[1..t.len() - 1];
        }
    }
    t
}

fn split_assignment(item: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (idx, c) in item.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' | '{' | '(' => depth += 1,
                ']' | '}' | ')' => depth -= 1,
                '=' if depth == 0 => {
                    return Some((item[..idx].trim(), item[idx + 1..].trim()));
                }
                _ => {}
            },
        }
    }
    None
}

pub fn split_top_level(text: &str, sep: char) -> std::result::Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                stack.push(c);
                current.push(c);
            }
            ']' | '}' | ')' => {
                let open = match c {
                    ']' => '[',
                    '}' => '{',
                    _ => '(',
                };
                if stack.pop() != Some(open) {
                    return Err(format!("unbalanced `{}` in `{}`", c, text.trim()));
                }
                current.push(c);
            }
            _ if c == sep && stack.is_empty() => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if let Some(q) = quote {
        return Err(format!("unterminated {} quote in `{}`", q, text.trim()));
    }
    if let Some(open) = stack.last() {
        return Err(format!("unclosed `{}` in `{}`", open, text.trim()));
    }
    parts.push(current);
    Ok(parts)
}
