use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Escaped in substituted URL values: everything outside the RFC 3986 unreserved set.
const URL_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Per-iteration variables. Static scenario data is copied in at the start of each iteration.
pub type Vars = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Lit(String),
    /// `{{course.course_id}}` -> `["course", "course_id"]`.
    Var(Vec<String>),
}

/// A string with `{{name}}` / `{{name.field}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidTemplate {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(Part::Lit(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| invalid("unclosed `{{`"))?;

            let name = after[..close].trim();
            if name.is_empty() {
                return Err(invalid("empty variable name"));
            }
            let path: Vec<String> = name.split('.').map(str::to_string).collect();
            if path
                .iter()
                .any(|seg| seg.is_empty() || !seg.chars().all(is_var_char))
            {
                return Err(invalid(&format!("invalid variable `{name}`")));
            }

            parts.push(Part::Var(path));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Lit(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Lit(_)))
    }

    /// Root variable names referenced by this template.
    pub fn variables(&self) -> impl Iterator<Item = &str> + '_ {
        self.parts.iter().filter_map(|p| match p {
            Part::Var(path) => path.first().map(String::as_str),
            Part::Lit(_) => None,
        })
    }

    /// `None` when any referenced variable (or nested field) is missing.
    pub fn render(&self, vars: &Vars) -> Option<String> {
        self.render_with(vars, |value, out| out.push_str(value))
    }

    /// Like [`Template::render`], but substituted values are percent-encoded so each one stays
    /// a single path segment or query value. Literal text is kept as written.
    pub fn render_url(&self, vars: &Vars) -> Option<String> {
        self.render_with(vars, |value, out| {
            out.extend(utf8_percent_encode(value, URL_VALUE));
        })
    }

    /// The path of the only placeholder when the template is exactly `{{name}}`.
    fn whole_variable(&self) -> Option<&[String]> {
        match self.parts.as_slice() {
            [Part::Var(path)] => Some(path),
            _ => None,
        }
    }

    fn render_with(&self, vars: &Vars, push: impl Fn(&str, &mut String)) -> Option<String> {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                Part::Lit(s) => out.push_str(s),
                Part::Var(path) => match lookup(vars, path)? {
                    Value::String(s) => push(s, &mut out),
                    Value::Null => return None,
                    other => push(&other.to_string(), &mut out),
                },
            }
        }
        Some(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum JsonNode {
    Fixed(Value),
    Text(Template),
    /// A string leaf that is exactly one placeholder; renders as the variable's own JSON value.
    Var(Vec<String>),
    Array(Vec<JsonNode>),
    /// Keys are literal.
    Object(Vec<(String, JsonNode)>),
}

impl JsonNode {
    fn parse(doc: &Value) -> Result<Self> {
        Ok(match doc {
            Value::String(s) => {
                let t = Template::parse(s)?;
                if t.is_literal() {
                    Self::Fixed(doc.clone())
                } else if let Some(path) = t.whole_variable() {
                    Self::Var(path.to_vec())
                } else {
                    Self::Text(t)
                }
            }
            Value::Array(items) => {
                Self::Array(items.iter().map(Self::parse).collect::<Result<_>>()?)
            }
            Value::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(k, v)| Self::parse(v).map(|n| (k.clone(), n)))
                    .collect::<Result<_>>()?,
            ),
            other => Self::Fixed(other.clone()),
        })
    }

    fn render(&self, vars: &Vars) -> Option<Value> {
        Some(match self {
            Self::Fixed(v) => v.clone(),
            Self::Text(t) => Value::String(t.render(vars)?),
            Self::Var(path) => match lookup(vars, path)? {
                Value::Null => return None,
                v => v.clone(),
            },
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|n| n.render(vars))
                    .collect::<Option<_>>()?,
            ),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, n)| n.render(vars).map(|v| (k.clone(), v)))
                    .collect::<Option<Map<_, _>>>()?,
            ),
        })
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Fixed(_) => {}
            Self::Text(t) => out.extend(t.variables()),
            Self::Var(path) => out.extend(path.first().map(String::as_str)),
            Self::Array(items) => items.iter().for_each(|n| n.collect_variables(out)),
            Self::Object(fields) => fields.iter().for_each(|(_, n)| n.collect_variables(out)),
        }
    }
}

/// A JSON document whose string values may hold placeholders.
///
/// Rendering builds a [`Value`] rather than splicing text, so substituted strings are escaped
/// by the serializer. A value that is exactly `{{name}}` keeps the variable's JSON type
/// (`"{{user_id}}"` with `user_id = 7` renders as `7`); any other string renders as text.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonTemplate {
    root: JsonNode,
}

impl JsonTemplate {
    pub fn parse(doc: &Value) -> Result<Self> {
        Ok(Self {
            root: JsonNode::parse(doc)?,
        })
    }

    /// Root variable names referenced anywhere in the document.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_variables(&mut out);
        out
    }

    /// `None` when any referenced variable is missing or null.
    pub fn render(&self, vars: &Vars) -> Option<Value> {
        self.root.render(vars)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Dotted lookup: object keys, or array indices for numeric segments.
fn lookup<'a>(vars: &'a Vars, path: &[String]) -> Option<&'a Value> {
    let (root, rest) = path.split_first()?;
    let mut cur = vars.get(root)?;
    for seg in rest {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Vars {
        let mut v = Vars::new();
        v.insert("token".into(), json!("t-1"));
        v.insert("course".into(), json!({ "course_id": 2, "tags": ["a", "b"] }));
        v
    }

    #[test]
    fn renders_plain_and_nested_values() {
        let t = Template::parse("/courses/{{course.course_id}}/tags/{{ course.tags.1 }}")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.render(&vars()).as_deref(), Some("/courses/2/tags/b"));

        let h = Template::parse("Bearer {{token}}").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(h.render(&vars()).as_deref(), Some("Bearer t-1"));
        assert_eq!(h.variables().collect::<Vec<_>>(), vec!["token"]);
    }

    #[test]
    fn missing_reference_renders_none() {
        let t = Template::parse("/x/{{user.id}}").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.render(&vars()), None);

        let t = Template::parse("/x/{{course.missing}}").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.render(&vars()), None);
    }

    #[test]
    fn literal_template_has_no_variables() {
        let t = Template::parse("/health").unwrap_or_else(|e| panic!("{e}"));
        assert!(t.is_literal());
        assert_eq!(t.render(&Vars::new()).as_deref(), Some("/health"));
    }

    #[test]
    fn url_rendering_encodes_substituted_values_only() {
        let mut v = vars();
        v.insert("q".into(), json!("Rust Fundamentals"));
        v.insert("page".into(), json!(2));
        v.insert("dir".into(), json!("a/b?c#d"));

        let t = Template::parse("/courses/search?q={{q}}&page={{page}}")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            t.render_url(&v).as_deref(),
            Some("/courses/search?q=Rust%20Fundamentals&page=2")
        );

        let t = Template::parse("/files/{{dir}}").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.render_url(&v).as_deref(), Some("/files/a%2Fb%3Fc%23d"));
        assert_eq!(t.render(&v).as_deref(), Some("/files/a/b?c#d"));
    }

    #[test]
    fn json_template_escapes_strings_and_keeps_value_types() {
        let mut v = vars();
        v.insert("password".into(), json!(r#"p"w\d"#));
        v.insert("user_id".into(), json!(7));

        let doc = json!({
            "user_id": "{{user_id}}",
            "password": "{{password}}",
            "note": "course {{ course.course_id }} for {{password}}",
            "tags": ["{{course.tags}}", "fixed", 3],
        });
        let t = JsonTemplate::parse(&doc).unwrap_or_else(|e| panic!("{e}"));
        let mut names = t.variables();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names, vec!["course", "password", "user_id"]);

        let rendered = t.render(&v).unwrap_or_else(|| panic!("render failed"));
        assert_eq!(rendered["user_id"], json!(7));
        assert_eq!(rendered["password"], json!(r#"p"w\d"#));
        assert_eq!(rendered["note"], json!(r#"course 2 for p"w\d"#));
        assert_eq!(rendered["tags"], json!([["a", "b"], "fixed", 3]));

        let wire = serde_json::to_string(&rendered).unwrap_or_else(|e| panic!("{e}"));
        assert!(wire.contains(r#""user_id":7"#), "{wire}");
        let back: Value = serde_json::from_str(&wire).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(back, rendered);

        v.remove("user_id");
        assert_eq!(t.render(&v), None);
    }

    #[test]
    fn json_template_rejects_malformed_placeholders() {
        assert!(JsonTemplate::parse(&json!({ "a": ["{{oops"] })).is_err());
    }

    #[test]
    fn rejects_malformed_placeholders() {
        assert!(Template::parse("/x/{{token").is_err());
        assert!(Template::parse("/x/{{}}").is_err());
        assert!(Template::parse("/x/{{a..b}}").is_err());
        assert!(Template::parse("/x/{{a b}}").is_err());
    }
}
