use crate::table::Fields;
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use sweep_core::grammar::split_top_level;
use sweep_core::{parse_token, Scalar, Token};

pub trait ArtifactParser: Send + Sync {
    fn parse(&self, path: &Path, record: &Fields) -> Result<Fields>;

    /// Configuration that affects the parsed fields. Stored rows are only
    /// reused while it stays the same.
    fn settings(&self) -> String {
        String::new()
    }
}

impl<F> ArtifactParser for F
where
    F: Fn(&Path, &Fields) -> Result<Fields> + Send + Sync,
{
    fn parse(&self, path: &Path, record: &Fields) -> Result<Fields> {
        self(path, record)
    }
}

pub struct ScoopEntry {
    pub pattern: String,
    pub parser: Box<dyn ArtifactParser>,
}

impl ScoopEntry {
    pub fn new(pattern: impl Into<String>, parser: impl ArtifactParser + 'static) -> Self {
        Self {
            pattern: pattern.into(),
            parser: Box::new(parser),
        }
    }
}

impl ScoopEntry {
    pub fn settings(&self) -> String {
        format!("{}\u{0}{}", self.pattern, self.parser.settings())
    }
}

impl fmt::Debug for ScoopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoopEntry")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

fn scalar_to_json(s: Scalar) -> Value {
    match s {
        Scalar::Str(text) => match text.as_str() {
            "True" => Value::Bool(true),
            "False" => Value::Bool(false),
            "None" => Value::Null,
            _ => Value::String(text),
        },
        other => other.to_json(),
    }
}

fn token_to_json(token: Token) -> Value {
    match token {
        Token::Scalar(s) => scalar_to_json(s),
        Token::Marker(m) => m.to_json(),
        Token::List(items) => Value::Array(items.into_iter().map(token_to_json).collect()),
    }
}

pub fn literal_to_json(text: &str) -> Value {
    let t = text.trim();
    if t.is_empty() {
        return Value::String(String::new());
    }
    match parse_token(t) {
        Ok(token) => token_to_json(token),
        Err(_) => Value::String(t.to_string()),
    }
}

fn parse_dict_literal(text: &str) -> Option<Vec<(String, Value)>> {
    let inner = text.trim().strip_prefix('{')?.strip_suffix('}')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut out = Vec::new();
    for item in split_top_level(inner, ',').ok()? {
        if item.trim().is_empty() {
            continue;
        }
        let parts = split_top_level(&item, ':').ok()?;
        if parts.len() < 2 {
            return None;
        }
        let key = parts[0].trim().trim_matches(|c| c == '\'' || c == '"');
        let value = parts[1..].join(":");
        out.push((key.to_string(), literal_to_json(&value)));
    }
    Some(out)
}

fn is_underline(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && t.chars().all(|c| c == '-')
}

#[derive(Debug, Clone, Default)]
pub struct OptionsFileParser {
    pub split_keys: Vec<String>,
}

const COMMAND_LINE_SECTION: &str = "command line";

impl OptionsFileParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.split_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn parse_text(&self, text: &str) -> Fields {
        let lines: Vec<&str> = text.lines().collect();
        let mut fields = Fields::new();
        let mut section: Option<String> = None;
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if !line.trim().is_empty() && lines.get(i + 1).map_or(false, |l| is_underline(l)) {
                section = Some(line.trim().to_string());
                i += 2;
                continue;
            }
            i += 1;
            if section.as_deref() == Some(COMMAND_LINE_SECTION) || line.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = value.trim();
            if self.split_keys.iter().any(|k| k == key) {
                if let Some(entries) = parse_dict_literal(value) {
                    for (sub, v) in entries {
                        fields.insert(format!("{}__{}", key, sub), v);
                    }
                    continue;
                }
            }
            fields.insert(key.to_string(), literal_to_json(value));
        }
        fields
    }
}

impl ArtifactParser for OptionsFileParser {
    fn parse(&self, path: &Path, _record: &Fields) -> Result<Fields> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read options file {}", path.display()))?;
        Ok(self.parse_text(&text))
    }

    fn settings(&self) -> String {
        format!("options split_keys={:?}", self.split_keys)
    }
}

#[derive(Debug, Clone)]
pub struct KeyValueParser {
    pub separator: String,
    pub prefix: Option<String>,
    pub keys: Option<Vec<String>>,
}

impl Default for KeyValueParser {
    fn default() -> Self {
        Self {
            separator: ":".to_string(),
            prefix: None,
            keys: None,
        }
    }
}

impl KeyValueParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn parse_text(&self, text: &str) -> Fields {
        let mut collected: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for line in text.lines() {
            let line = match &self.prefix {
                Some(prefix) => match line.trim_start().strip_prefix(prefix.as_str()) {
                    Some(rest) => rest,
                    None => continue,
                },
                None => line,
            };
            let Some((key, value)) = line.split_once(self.separator.as_str()) else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            if let Some(keys) = &self.keys {
                if !keys.iter().any(|k| k == key) {
                    continue;
                }
            }
            collected
                .entry(key.to_string())
                .or_default()
                .push(literal_to_json(value));
        }
        collected
            .into_iter()
            .map(|(k, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Array(values)
                };
                (k, value)
            })
            .collect()
    }
}

impl ArtifactParser for KeyValueParser {
    fn parse(&self, path: &Path, _record: &Fields) -> Result<Fields> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(self.parse_text(&text))
    }

    fn settings(&self) -> String {
        format!("{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl ArtifactParser for JsonParser {
    fn parse(&self, path: &Path, _record: &Fields) -> Result<Fields> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        match value {
            Value::Object(map) => Ok(object_to_fields(map)),
            other => Err(anyhow!(
                "{} holds a JSON {} instead of an object",
                path.display(),
                json_type_name(&other)
            )),
        }
    }

    fn settings(&self) -> String {
        "json".to_string()
    }
}

fn object_to_fields(map: Map<String, Value>) -> Fields {
    map.into_iter().collect()
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPTIONS: &str = "command line\n------------\n\nmonty_hall.py --num=100 --repeat=5 out/000\n\noptions\n-------\n\nhost: random\nnum: 100\nplot_opts: {'alpha': 0.5, 'linewidth': 3}\nrepeat: 5\nseed: None\nsilent: False\nswitch: True\nratios: [0.5, 1]\noutput_dir: out/000\n";

    #[test]
    fn options_dump_skips_command_line_and_types_values() {
        let fields = OptionsFileParser::new().parse_text(OPTIONS);
        assert_eq!(fields.get("num"), Some(&json!(100)));
        assert_eq!(fields.get("repeat"), Some(&json!(5)));
        assert_eq!(fields.get("host"), Some(&json!("random")));
        assert_eq!(fields.get("seed"), Some(&Value::Null));
        assert_eq!(fields.get("silent"), Some(&json!(false)));
        assert_eq!(fields.get("switch"), Some(&json!(true)));
        assert_eq!(fields.get("ratios"), Some(&json!([0.5, 1])));
        assert_eq!(fields.get("output_dir"), Some(&json!("out/000")));
        assert_eq!(
            fields.get("plot_opts"),
            Some(&json!("{'alpha': 0.5, 'linewidth': 3}"))
        );
        assert!(!fields.keys().any(|k| k.contains("monty_hall.py")));
    }

    #[test]
    fn split_keys_expand_dict_literals() {
        let fields = OptionsFileParser::new()
            .with_split_keys(["plot_opts"])
            .parse_text(OPTIONS);
        assert!(fields.get("plot_opts").is_none());
        assert_eq!(fields.get("plot_opts__alpha"), Some(&json!(0.5)));
        assert_eq!(fields.get("plot_opts__linewidth"), Some(&json!(3)));
    }

    #[test]
    fn key_value_lines_collect_repeats() {
        let text = "# run 1\nelapsed: 0.25\nwin rate: 0.5\nelapsed: 0.5\nnoise without separator\n";
        let fields = KeyValueParser::new().parse_text(text);
        assert_eq!(fields.get("elapsed"), Some(&json!([0.25, 0.5])));
        assert_eq!(fields.get("win rate"), Some(&json!(0.5)));
        assert_eq!(fields.len(), 2);

        let filtered = KeyValueParser::new()
            .separator("=")
            .prefix("@")
            .keys(["n"])
            .parse_text("@n = 3\nn = 4\n@m = 1\n");
        assert_eq!(filtered.get("n"), Some(&json!(3)));
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn json_parser_requires_an_object() {
        let root = std::env::temp_dir().join(format!(
            "sweep_parsers_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("mkdir");
        let good = root.join("metrics.json");
        fs::write(&good, br#"{"loss": 0.1, "tags": ["a"]}"#).expect("write");
        let fields = JsonParser.parse(&good, &Fields::new()).expect("parse");
        assert_eq!(fields.get("loss"), Some(&json!(0.1)));
        assert_eq!(fields.get("tags"), Some(&json!(["a"])));

        let bad = root.join("list.json");
        fs::write(&bad, b"[1, 2]").expect("write");
        let err = JsonParser.parse(&bad, &Fields::new()).expect_err("array");
        assert!(err.to_string().contains("array"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn closures_are_parsers() {
        let parser = |_: &Path, record: &Fields| -> Result<Fields> {
            let mut out = Fields::new();
            out.insert("seen".to_string(), json!(record.len()));
            Ok(out)
        };
        let entry = ScoopEntry::new("*.txt", parser);
        let mut record = Fields::new();
        record.insert("a".to_string(), json!(1));
        let out = entry
            .parser
            .parse(Path::new("x.txt"), &record)
            .expect("closure parse");
        assert_eq!(out.get("seen"), Some(&json!(1)));
    }

    #[test]
    fn literals_fall_back_to_text() {
        assert_eq!(literal_to_json(" 12 "), json!(12));
        assert_eq!(literal_to_json("1e-3"), json!(0.001));
        assert_eq!(literal_to_json("'quoted'"), json!("quoted"));
        assert_eq!(literal_to_json("[True, None]"), json!([true, null]));
        assert_eq!(literal_to_json("'open"), json!("'open"));
        assert_eq!(literal_to_json(""), json!(""));
    }
}
