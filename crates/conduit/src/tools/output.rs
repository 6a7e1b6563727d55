use serde_json::{json, Map, Value};

const SUMMARY_LIMIT: usize = 120;

/// What a tool handler produced, in the shape it will be displayed
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    List {
        summary: String,
        items: Vec<Value>,
    },
    KeyValue {
        summary: String,
        entries: Map<String, Value>,
    },
    Error(String),
}

impl ToolOutput {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ToolOutput::Text(text.into())
    }

    pub fn list<S: Into<String>>(summary: S, items: Vec<Value>) -> Self {
        ToolOutput::List {
            summary: summary.into(),
            items,
        }
    }

    pub fn key_value<S: Into<String>>(summary: S, entries: Map<String, Value>) -> Self {
        ToolOutput::KeyValue {
            summary: summary.into(),
            entries,
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        ToolOutput::Error(message.into())
    }

    /// Pick the variant from the shape of an arbitrary handler result.
    ///
    /// Strings are text, arrays are lists and objects are key-value pairs. An
    /// object's own `summary` string is used when present. Scalars become text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => ToolOutput::Text(text),
            Value::Null => ToolOutput::Text(String::new()),
            Value::Array(items) => {
                let summary = format!("{} item{}", items.len(), plural(items.len()));
                ToolOutput::List { summary, items }
            }
            Value::Object(mut entries) => {
                let summary = match entries.remove("summary") {
                    Some(Value::String(summary)) => summary,
                    Some(other) => {
                        entries.insert("summary".to_string(), other);
                        format!("{} field{}", entries.len(), plural(entries.len()))
                    }
                    None => format!("{} field{}", entries.len(), plural(entries.len())),
                };
                ToolOutput::KeyValue { summary, entries }
            }
            scalar => ToolOutput::Text(scalar.to_string()),
        }
    }

    /// The display object: `{ok, summary, view, data}` or `{ok: false, error}`
    pub fn to_display(&self) -> Value {
        match self {
            ToolOutput::Text(text) => json!({
                "ok": true,
                "summary": summarize(text),
                "view": "text",
                "data": text,
            }),
            ToolOutput::List { summary, items } => json!({
                "ok": true,
                "summary": summary,
                "view": "list",
                "data": items,
            }),
            ToolOutput::KeyValue { summary, entries } => json!({
                "ok": true,
                "summary": summary,
                "view": "kv",
                "data": entries,
            }),
            ToolOutput::Error(error) => json!({
                "ok": false,
                "error": error,
            }),
        }
    }

    /// The display object as the text body of a tool message
    pub fn render(&self) -> String {
        self.to_display().to_string()
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn summarize(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > SUMMARY_LIMIT {
        let cut: String = first_line.chars().take(SUMMARY_LIMIT).collect();
        format!("{}…", cut)
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_picks_variant_by_shape() {
        assert_eq!(ToolOutput::from_value(json!("hi")), ToolOutput::text("hi"));
        assert_eq!(ToolOutput::from_value(json!(42)), ToolOutput::text("42"));

        match ToolOutput::from_value(json!([1, 2])) {
            ToolOutput::List { summary, items } => {
                assert_eq!(summary, "2 items");
                assert_eq!(items.len(), 2);
            }
            other => panic!("Expected list, got {:?}", other),
        }

        match ToolOutput::from_value(json!({"summary": "moved", "from": "/a", "to": "/b"})) {
            ToolOutput::KeyValue { summary, entries } => {
                assert_eq!(summary, "moved");
                assert!(!entries.contains_key("summary"));
                assert_eq!(entries["to"], "/b");
            }
            other => panic!("Expected key-value, got {:?}", other),
        }
    }

    #[test]
    fn test_display_shapes() {
        let display = ToolOutput::list("1 entry", vec![json!({"name": "a.txt"})]).to_display();
        assert_eq!(
            display,
            json!({"ok": true, "summary": "1 entry", "view": "list", "data": [{"name": "a.txt"}]})
        );

        let display = ToolOutput::error("No such file").to_display();
        assert_eq!(display, json!({"ok": false, "error": "No such file"}));
    }

    #[test]
    fn test_text_summary_is_first_line() {
        let long = "x".repeat(200);
        let display = ToolOutput::text(format!("{}\nsecond", long)).to_display();
        let summary = display["summary"].as_str().unwrap();
        assert_eq!(summary.chars().count(), SUMMARY_LIMIT + 1);
        assert_eq!(display["view"], "text");
    }
}
