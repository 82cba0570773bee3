//! Minimal XML body reader.
//!
//! Produces the same shape form parameters take: the root element becomes the
//! single top-level key, elements with children become objects, repeated child
//! names become arrays, text-only elements become strings and empty elements
//! become `null`. Attributes, processing instructions, comments and doctype
//! declarations are skipped.

use serde_json::{Map, Value};

/// Deepest element nesting accepted, matching serde_json's recursion limit.
const MAX_DEPTH: usize = 128;

pub(super) fn parse(input: &str) -> Result<Value, String> {
    let mut reader = Reader {
        src: input,
        pos: 0,
        depth: 0,
    };
    reader.skip_misc()?;
    let (name, value) = reader.element()?;
    reader.skip_misc()?;
    if reader.pos < reader.src.len() {
        return Err(format!("unexpected content after root element at byte {}", reader.pos));
    }
    let mut root = Map::new();
    root.insert(name, value);
    Ok(Value::Object(root))
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn skip_past(&mut self, terminator: &str) -> Result<(), String> {
        match self.rest().find(terminator) {
            Some(offset) => {
                self.pos += offset + terminator.len();
                Ok(())
            }
            None => Err(format!("unterminated markup, expected `{terminator}`")),
        }
    }

    /// Skip whitespace, comments, processing instructions and doctype declarations.
    fn skip_misc(&mut self) -> Result<(), String> {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<!") {
                self.skip_past(">")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> Result<String, String> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(format!("expected element name at byte {}", self.pos));
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    fn element(&mut self) -> Result<(String, Value), String> {
        if !self.rest().starts_with('<') {
            return Err(format!("expected `<` at byte {}", self.pos));
        }
        self.pos += 1;
        let name = self.name()?;

        // Attributes are not part of the parameter tree.
        let close = self
            .rest()
            .find('>')
            .ok_or_else(|| format!("unterminated start tag `{name}`"))?;
        let self_closing = self.rest()[..close].trim_end().ends_with('/');
        self.pos += close + 1;
        if self_closing {
            return Ok((name, Value::Null));
        }

        let mut text = String::new();
        let mut children: Map<String, Value> = Map::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(format!("missing closing tag for `{name}`"));
            }
            if rest.starts_with("</") {
                self.pos += 2;
                let closing = self.name()?;
                if closing != name {
                    return Err(format!("mismatched closing tag `{closing}` for `{name}`"));
                }
                self.skip_whitespace();
                if !self.rest().starts_with('>') {
                    return Err(format!("malformed closing tag `{closing}`"));
                }
                self.pos += 1;
                break;
            }
            if rest.starts_with("<!--") || rest.starts_with("<?") {
                self.skip_misc()?;
                continue;
            }
            if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let end = self
                    .rest()
                    .find("]]>")
                    .ok_or_else(|| "unterminated CDATA section".to_string())?;
                text.push_str(&self.rest()[..end]);
                self.pos += end + 3;
                continue;
            }
            if rest.starts_with('<') {
                if self.depth >= MAX_DEPTH {
                    return Err(format!("nesting too deep at byte {}", self.pos));
                }
                self.depth += 1;
                let (child, value) = self.element()?;
                self.depth -= 1;
                insert_child(&mut children, child, value);
                continue;
            }
            let end = rest.find('<').unwrap_or(rest.len());
            text.push_str(&unescape(&rest[..end]));
            self.pos += end;
        }

        let value = if !children.is_empty() {
            Value::Object(children)
        } else if text.trim().is_empty() {
            Value::Null
        } else {
            Value::String(text)
        };
        Ok((name, value))
    }
}

fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_elements() {
        let value = parse(
            r#"<?xml version="1.0"?>
            <pet kind="cat"><name>Fluffy &amp; Co</name><tags><tag>a</tag><tag>b</tag></tags><owner/></pet>"#,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"pet": {"name": "Fluffy & Co", "tags": {"tag": ["a", "b"]}, "owner": null}})
        );
    }

    #[test]
    fn test_mismatched_tags_are_rejected() {
        assert!(parse("<a><b></a></b>").is_err());
        assert!(parse("<a>").is_err());
        assert!(parse("not xml").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let body = format!("{}{}", "<a>".repeat(200_000), "</a>".repeat(200_000));
        let err = parse(&body).unwrap_err();
        assert!(err.contains("nesting too deep"));
    }

    #[test]
    fn test_nesting_up_to_the_limit_is_accepted() {
        let body = format!("{}{}", "<a>".repeat(MAX_DEPTH), "</a>".repeat(MAX_DEPTH));
        assert!(parse(&body).is_ok());
    }
}
