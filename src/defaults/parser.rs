//! Recursive-descent parser for default-configuration fragments.
//!
//! Fragments are small XML documents. The outer document tag is a wrapper
//! and never produces a node; its `requireExisting` / `addIfMissing`
//! attributes seed the inherited flags, which every element threads down to
//! its children as parameters. An element may override the flags for its own
//! subtree by declaring the attributes itself.
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

pub const REQUIRE_EXISTING_ATTR: &str = "requireExisting";
pub const ADD_IF_MISSING_ATTR: &str = "addIfMissing";

/// One parsed configuration element. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<ConfigElement>,
    pub text: Option<String>,
    pub require_existing: bool,
    pub add_if_missing: bool,
}

/// Parses a fragment document into its top-level elements (the children of
/// the skipped wrapper root).
pub fn parse_fragment(input: &str) -> Result<Vec<ConfigElement>> {
    let mut tokens = Tokenizer::new(input).tokenize()?;
    tokens.reverse(); // consume from the back

    let root = match tokens.pop() {
        Some(Token::StartTag(tag)) => tag,
        Some(_) => bail!("fragment does not start with an element"),
        None => bail!("fragment is empty"),
    };
    let mut attributes = root.attributes;
    let require_existing = take_flag(&mut attributes, REQUIRE_EXISTING_ATTR)?;
    let add_if_missing = take_flag(&mut attributes, ADD_IF_MISSING_ATTR)?;
    let elements = if root.self_closing {
        Vec::new()
    } else {
        parse_children(&mut tokens, &root.name, require_existing, add_if_missing)?.0
    };
    if tokens.pop().is_some() {
        bail!("unexpected content after the <{}> document element", root.name);
    }
    Ok(elements)
}

/// Parses sibling elements until the enclosing end tag. The two booleans are
/// the flags active at the containing level; children inherit them verbatim
/// unless an element overrides them in its own scope.
fn parse_children(
    tokens: &mut Vec<Token>,
    enclosing: &str,
    require_existing: bool,
    add_if_missing: bool,
) -> Result<(Vec<ConfigElement>, Option<String>)> {
    let mut elements = Vec::new();
    let mut text = String::new();
    loop {
        match tokens.pop() {
            Some(Token::StartTag(tag)) => {
                let mut attributes = tag.attributes;
                let own_require = take_flag_or(&mut attributes, REQUIRE_EXISTING_ATTR, require_existing)?;
                let own_add = take_flag_or(&mut attributes, ADD_IF_MISSING_ATTR, add_if_missing)?;
                let (children, child_text) = if tag.self_closing {
                    (Vec::new(), None)
                } else {
                    parse_children(tokens, &tag.name, own_require, own_add)?
                };
                elements.push(ConfigElement {
                    name: tag.name,
                    attributes,
                    children,
                    text: child_text,
                    require_existing: own_require,
                    add_if_missing: own_add,
                });
            }
            Some(Token::EndTag(name)) => {
                if name != enclosing {
                    bail!("mismatched end tag: expected </{enclosing}>, found </{name}>");
                }
                let text = text.trim();
                let text = (!text.is_empty()).then(|| text.to_string());
                return Ok((elements, text));
            }
            Some(Token::Text(run)) => text.push_str(&run),
            None => bail!("missing end tag </{enclosing}>"),
        }
    }
}

fn take_flag(attributes: &mut BTreeMap<String, String>, name: &str) -> Result<bool> {
    take_flag_or(attributes, name, false)
}

fn take_flag_or(
    attributes: &mut BTreeMap<String, String>,
    name: &str,
    inherited: bool,
) -> Result<bool> {
    match attributes.remove(name) {
        None => Ok(inherited),
        Some(value) => match value.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => bail!("attribute {name} must be true or false, found '{other}'"),
        },
    }
}

#[derive(Debug)]
struct StartTag {
    name: String,
    attributes: BTreeMap<String, String>,
    self_closing: bool,
}

#[derive(Debug)]
enum Token {
    StartTag(StartTag),
    EndTag(String),
    Text(String),
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
}

impl Tokenizer {
    fn new(input: &str) -> Self {
        Tokenizer {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            if ch == '<' {
                if self.starts_with("<!--") {
                    self.skip_until("-->")?;
                } else if self.starts_with("<?") {
                    self.skip_until("?>")?;
                } else if self.starts_with("<!") {
                    self.skip_until(">")?;
                } else if self.starts_with("</") {
                    tokens.push(self.read_end_tag()?);
                } else {
                    tokens.push(self.read_start_tag()?);
                }
            } else {
                let text = self.read_text();
                if !text.trim().is_empty() {
                    tokens.push(Token::Text(decode_entities(&text)?));
                }
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        let mut i = self.pos;
        for want in prefix.chars() {
            match self.chars.get(i) {
                Some(have) if *have == want => i += 1,
                _ => return false,
            }
        }
        true
    }

    fn skip_until(&mut self, terminator: &str) -> Result<()> {
        while self.pos < self.chars.len() {
            if self.starts_with(terminator) {
                self.pos += terminator.chars().count();
                return Ok(());
            }
            self.pos += 1;
        }
        bail!("unterminated markup, expected '{terminator}'");
    }

    fn read_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch == '<' {
                break;
            }
            text.push(ch);
            self.pos += 1;
        }
        text
    }

    fn read_end_tag(&mut self) -> Result<Token> {
        self.pos += 2; // "</"
        let name = self.read_name()?;
        self.skip_whitespace();
        self.expect('>')?;
        Ok(Token::EndTag(name))
    }

    fn read_start_tag(&mut self) -> Result<Token> {
        self.pos += 1; // "<"
        let name = self.read_name()?;
        let mut attributes = BTreeMap::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('>') => {
                    self.pos += 1;
                    return Ok(Token::StartTag(StartTag {
                        name,
                        attributes,
                        self_closing: false,
                    }));
                }
                Some('/') => {
                    self.pos += 1;
                    self.expect('>')?;
                    return Ok(Token::StartTag(StartTag {
                        name,
                        attributes,
                        self_closing: true,
                    }));
                }
                Some(_) => {
                    let (key, value) = self.read_attribute()?;
                    attributes.insert(key, value);
                }
                None => bail!("unterminated start tag <{name}"),
            }
        }
    }

    fn read_name(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '.' || ch == ':' {
                name.push(ch);
                self.pos += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            bail!("expected a tag or attribute name at position {}", self.pos);
        }
        Ok(name)
    }

    fn read_attribute(&mut self) -> Result<(String, String)> {
        let key = self.read_name()?;
        self.skip_whitespace();
        self.expect('=')?;
        self.skip_whitespace();
        let quote = match self.peek() {
            Some(ch @ ('"' | '\'')) => ch,
            _ => bail!("attribute {key} value must be quoted"),
        };
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(ch) if ch == quote => {
                    self.pos += 1;
                    return Ok((key, decode_entities(&value)?));
                }
                Some(ch) => {
                    value.push(ch);
                    self.pos += 1;
                }
                None => bail!("unterminated value for attribute {key}"),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.peek() {
            Some(ch) if ch == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(ch) => bail!("expected '{expected}' at position {}, found '{ch}'", self.pos),
            None => bail!("expected '{expected}', found end of input"),
        }
    }
}

fn decode_entities(input: &str) -> Result<String> {
    if !input.contains('&') {
        return Ok(input.to_string());
    }
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail
            .find(';')
            .ok_or_else(|| anyhow!("unterminated entity in '{input}'"))?;
        let entity = &tail[1..end];
        match entity {
            "amp" => output.push('&'),
            "lt" => output.push('<'),
            "gt" => output.push('>'),
            "quot" => output.push('"'),
            "apos" => output.push('\''),
            other => bail!("unsupported entity '&{other};'"),
        }
        rest = &tail[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_root_is_skipped() {
        let elements = parse_fragment("<server><dataSource id=\"ds1\"/></server>").expect("parses");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].name, "dataSource");
        assert_eq!(elements[0].attributes.get("id").map(String::as_str), Some("ds1"));
        assert!(!elements[0].require_existing);
        assert!(!elements[0].add_if_missing);
    }

    #[test]
    fn root_flags_are_inherited_through_nesting() {
        let elements = parse_fragment(
            "<root requireExisting=\"true\"><a><b/></a></root>",
        )
        .expect("parses");
        let a = &elements[0];
        assert!(a.require_existing);
        assert!(!a.add_if_missing);
        let b = &a.children[0];
        assert!(b.require_existing);
        assert!(!b.add_if_missing);
    }

    #[test]
    fn element_scope_overrides_inherited_flags() {
        let elements = parse_fragment(
            "<root requireExisting=\"true\">\
             <a requireExisting=\"false\" addIfMissing=\"true\"><b/></a>\
             <c/></root>",
        )
        .expect("parses");
        let a = &elements[0];
        assert!(!a.require_existing);
        assert!(a.add_if_missing);
        // b inherits a's overridden scope, not the document default.
        let b = &a.children[0];
        assert!(!b.require_existing);
        assert!(b.add_if_missing);
        // c sits back at document scope.
        let c = &elements[1];
        assert!(c.require_existing);
        assert!(!c.add_if_missing);
    }

    #[test]
    fn flag_attributes_do_not_leak_into_attribute_maps() {
        let elements = parse_fragment(
            "<root addIfMissing=\"true\"><a requireExisting=\"true\" id=\"x\"/></root>",
        )
        .expect("parses");
        let a = &elements[0];
        assert_eq!(a.attributes.len(), 1);
        assert_eq!(a.attributes.get("id").map(String::as_str), Some("x"));
    }

    #[test]
    fn text_entities_and_prolog_are_handled() {
        let elements = parse_fragment(
            "<?xml version=\"1.0\"?><!-- defaults --><root>\
             <message greeting=\"a &amp; b\">x &lt; y</message></root>",
        )
        .expect("parses");
        let message = &elements[0];
        assert_eq!(message.text.as_deref(), Some("x < y"));
        assert_eq!(
            message.attributes.get("greeting").map(String::as_str),
            Some("a & b")
        );
    }

    #[test]
    fn malformed_fragments_are_errors() {
        assert!(parse_fragment("").is_err());
        assert!(parse_fragment("just text").is_err());
        assert!(parse_fragment("<root><a></root>").is_err());
        assert!(parse_fragment("<root><a/>").is_err());
        assert!(parse_fragment("<root requireExisting=\"maybe\"/>").is_err());
        assert!(parse_fragment("<root/><extra/>").is_err());
    }

    #[test]
    fn self_closing_root_yields_no_elements() {
        assert!(parse_fragment("<root/>").expect("parses").is_empty());
    }
}
