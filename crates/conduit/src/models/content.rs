use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// Either a remote url or a `data:<mime>;base64,<payload>` uri
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub image_url: ImageUrl,
}

/// An inline base64 image split out of a data uri
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

impl ImageContent {
    /// Split a `data:` uri into its mime type and base64 payload.
    /// Remote urls return None.
    pub fn inline(&self) -> Option<InlineImage<'_>> {
        let rest = self.image_url.url.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        Some(InlineImage { mime_type, data })
    }

    pub fn url(&self) -> &str {
        &self.image_url.url
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
/// A single block of a multi-part message body
pub enum Content {
    #[serde(rename = "text")]
    Text(TextContent),
    #[serde(rename = "image_url")]
    Image(ImageContent),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn image_url<S: Into<String>>(url: S) -> Self {
        Content::Image(ImageContent {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        })
    }

    pub fn image<S: AsRef<str>, T: AsRef<str>>(data: S, mime_type: T) -> Self {
        Content::image_url(format!(
            "data:{};base64,{}",
            mime_type.as_ref(),
            data.as_ref()
        ))
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageContent> {
        match self {
            Content::Image(image) => Some(image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// The body of a canonical message: plain text or an ordered list of blocks
pub enum MessageContent {
    Text(String),
    Parts(Vec<Content>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl MessageContent {
    /// All text in the body, blocks joined by newlines
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn images(&self) -> Vec<&ImageContent> {
        match self {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts.iter().filter_map(Content::as_image).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// The body as a list of blocks, dropping an empty text body
    pub fn to_parts(&self) -> Vec<Content> {
        match self {
            MessageContent::Text(text) if text.is_empty() => Vec::new(),
            MessageContent::Text(text) => vec![Content::text(text.clone())],
            MessageContent::Parts(parts) => parts.clone(),
        }
    }

    /// Append blocks, promoting a plain text body to a block list when needed
    pub fn extend(&mut self, other: MessageContent) {
        match (&mut *self, other) {
            (MessageContent::Text(a), MessageContent::Text(b)) => {
                if !a.is_empty() && !b.is_empty() {
                    a.push('\n');
                }
                a.push_str(&b);
            }
            (_, other) => {
                let mut parts = self.to_parts();
                parts.extend(other.to_parts());
                *self = MessageContent::Parts(parts);
            }
        }
    }
}

/// OpenAI sends `"content": null` on assistant messages that only carry tool calls
pub(crate) fn deserialize_content<'de, D>(deserializer: D) -> Result<MessageContent, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<MessageContent>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_wire_shape() {
        let value = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hi"}));

        let value = serde_json::to_value(Content::image("AAAA", "image/png")).unwrap();
        assert_eq!(
            value,
            json!({"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}})
        );
    }

    #[test]
    fn test_inline_image_split() {
        let image = Content::image("QUJD", "image/jpeg");
        let inline = image.as_image().unwrap().inline().unwrap();
        assert_eq!(inline.mime_type, "image/jpeg");
        assert_eq!(inline.data, "QUJD");

        let remote = Content::image_url("https://example.com/cat.png");
        assert!(remote.as_image().unwrap().inline().is_none());
    }

    #[test]
    fn test_message_content_untagged() {
        let text: MessageContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(text, MessageContent::Text("hello".into()));

        let parts: MessageContent =
            serde_json::from_value(json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]))
                .unwrap();
        assert_eq!(parts.text(), "a\nb");
    }

    #[test]
    fn test_extend_promotes_to_parts() {
        let mut content = MessageContent::Text("look".into());
        content.extend(MessageContent::Parts(vec![Content::image("QUJD", "image/png")]));
        match content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0].as_text(), Some("look"));
            }
            _ => panic!("Expected parts"),
        }

        let mut content = MessageContent::Text("a".into());
        content.extend(MessageContent::Text("b".into()));
        assert_eq!(content, MessageContent::Text("a\nb".into()));
    }
}
