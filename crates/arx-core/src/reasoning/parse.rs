/// Pull the first JSON object out of free-form model text.
///
/// Models wrap JSON in prose or code fences; the first `{` that starts a
/// complete object wins. Returns `None` when no object parses.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let mut offset = 0;
    while let Some(pos) = text[offset..].find('{') {
        let start = offset + pos;
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() {
                return Some(value);
            }
        }
        offset = start + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_object_in_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1, \"b\": [true]}\n```\nDone.";
        assert_eq!(extract_json(text), Some(json!({"a": 1, "b": [true]})));
    }

    #[test]
    fn skips_unbalanced_braces_before_the_object() {
        let text = "use {braces} wisely {\"ok\": true}";
        assert_eq!(extract_json(text), Some(json!({"ok": true})));
    }

    #[test]
    fn returns_none_without_json() {
        assert_eq!(extract_json("no structure here"), None);
        assert_eq!(extract_json("{not json"), None);
    }
}
