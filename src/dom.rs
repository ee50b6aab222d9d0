//! Serialisable page model the extractor reads.
//!
//! Content scripts ship the relevant part of the page as an element tree.
//! Queries support the selector subset the extractor needs: type selectors,
//! `*`, attribute presence / equality, the descendant combinator and `,`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("page has no document")]
    NoDocument,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Text that belongs directly to this element.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    #[cfg(test)]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    #[cfg(test)]
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    #[cfg(test)]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Rendered text of this element and its subtree, one space between pieces.
    pub fn inner_text(&self) -> String {
        let mut pieces = Vec::new();
        self.collect_text(&mut pieces);
        pieces.join(" ")
    }

    fn collect_text<'a>(&'a self, pieces: &mut Vec<&'a str>) {
        let own = self.text.trim();
        if !own.is_empty() {
            pieces.push(own);
        }
        for child in &self.children {
            child.collect_text(pieces);
        }
    }

    /// First descendant matching `selector`, in document order.
    pub fn query_selector(&self, selector: &str) -> Result<Option<&Element>, DomError> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    /// All descendants matching `selector`, in document order.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<&Element>, DomError> {
        let selector = Selector::parse(selector)?;
        let mut found = Vec::new();
        let mut ancestors = vec![self];
        for child in &self.children {
            walk(child, &selector, &mut ancestors, &mut found);
        }
        Ok(found)
    }
}

fn walk<'a>(
    node: &'a Element,
    selector: &Selector,
    ancestors: &mut Vec<&'a Element>,
    found: &mut Vec<&'a Element>,
) {
    if selector.matches(node, ancestors) {
        found.push(node);
    }
    ancestors.push(node);
    for child in &node.children {
        walk(child, selector, ancestors, found);
    }
    ancestors.pop();
}

/// A captured page: its URL and document element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    #[serde(default)]
    pub document: Option<Element>,
}

impl Page {
    #[cfg(test)]
    pub fn new(url: &str, document: Element) -> Self {
        Self {
            url: url.to_string(),
            document: Some(document),
        }
    }

    fn document(&self) -> Result<&Element, DomError> {
        self.document.as_ref().ok_or(DomError::NoDocument)
    }

    /// Like `document.querySelector`: the document element itself can match.
    pub fn query_selector(&self, selector: &str) -> Result<Option<&Element>, DomError> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<&Element>, DomError> {
        let document = self.document()?;
        let selector = Selector::parse(selector)?;
        let mut found = Vec::new();
        walk(document, &selector, &mut Vec::new(), &mut found);
        Ok(found)
    }

    /// Parent of `target` (compared by address), if it is inside this page.
    pub fn parent_of(&self, target: &Element) -> Result<Option<&Element>, DomError> {
        fn find<'a>(node: &'a Element, target: &Element) -> Option<&'a Element> {
            for child in &node.children {
                if std::ptr::eq(child, target) {
                    return Some(node);
                }
                if let Some(parent) = find(child, target) {
                    return Some(parent);
                }
            }
            None
        }
        Ok(find(self.document()?, target))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrTest {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound {
    /// None matches any tag.
    tag: Option<String>,
    attrs: Vec<AttrTest>,
}

impl Compound {
    fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !el.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        self.attrs.iter().all(|test| match (&test.value, el.attr(&test.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(want), Some(have)) => want == have,
        })
    }
}

/// Comma-separated alternatives, each a chain of descendant compounds.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selector {
    alternatives: Vec<Vec<Compound>>,
}

impl Selector {
    fn parse(input: &str) -> Result<Self, DomError> {
        let invalid = |reason: &str| DomError::InvalidSelector {
            selector: input.to_string(),
            reason: reason.to_string(),
        };

        let mut alternatives = Vec::new();
        let mut chain: Vec<Compound> = Vec::new();
        let mut chars = input.chars().peekable();
        let mut current: Option<Compound> = None;

        while let Some(c) = chars.next() {
            match c {
                ',' => {
                    chain.extend(current.take());
                    if chain.is_empty() {
                        return Err(invalid("empty alternative"));
                    }
                    alternatives.push(std::mem::take(&mut chain));
                }
                c if c.is_whitespace() => {
                    chain.extend(current.take());
                }
                '[' => {
                    let mut body = String::new();
                    let mut in_quotes = false;
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '"' => in_quotes = !in_quotes,
                            ']' if !in_quotes => {
                                closed = true;
                                break;
                            }
                            _ => body.push(c),
                        }
                    }
                    if !closed {
                        return Err(invalid("unterminated attribute test"));
                    }
                    let test = match body.split_once('=') {
                        Some((name, value)) => AttrTest {
                            name: name.trim().to_string(),
                            value: Some(value.trim().to_string()),
                        },
                        None => AttrTest {
                            name: body.trim().to_string(),
                            value: None,
                        },
                    };
                    if test.name.is_empty() {
                        return Err(invalid("attribute test without a name"));
                    }
                    current
                        .get_or_insert(Compound {
                            tag: None,
                            attrs: Vec::new(),
                        })
                        .attrs
                        .push(test);
                }
                c if c == '*' || c.is_ascii_alphanumeric() || c == '-' => {
                    if current.is_some() {
                        return Err(invalid("type selector must come first"));
                    }
                    let mut tag = String::from(c);
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '-' {
                            tag.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    current = Some(Compound {
                        tag: (tag != "*").then_some(tag),
                        attrs: Vec::new(),
                    });
                }
                other => return Err(invalid(&format!("unsupported character '{}'", other))),
            }
        }

        chain.extend(current.take());
        if chain.is_empty() {
            return Err(invalid("empty selector"));
        }
        alternatives.push(chain);
        Ok(Self { alternatives })
    }

    fn matches(&self, el: &Element, ancestors: &[&Element]) -> bool {
        self.alternatives.iter().any(|chain| {
            let Some((last, rest)) = chain.split_last() else {
                return false;
            };
            if !last.matches(el) {
                return false;
            }
            // Greedy match of the remaining compounds against the nearest ancestors.
            let mut remaining = rest.iter().rev().peekable();
            for ancestor in ancestors.iter().rev() {
                match remaining.peek() {
                    Some(compound) if compound.matches(ancestor) => {
                        remaining.next();
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            remaining.peek().is_none()
        })
    }
}
