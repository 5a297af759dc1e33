//! Ordered message-extraction strategies.
//!
//! Each strategy maps the document to an ordered message list or `None`.
//! [`Extractor`] tries them in order and keeps the first non-empty result:
//! adapter selectors, then role attributes, then class hints on the
//! conversation container's children, then position alternation.

use std::collections::BTreeMap;

use chorus_core::Result;
use chorus_protocol::{AdapterSelectors, ExtractedMessage, Role};
use tracing::debug;

use crate::document::{Document, Element};

/// Selectors tried, in order, to find the element holding the conversation.
const CONTAINER_SELECTORS: &[&str] = &[
    "[role=\"log\"]",
    "[role=\"feed\"]",
    ".conversation",
    ".chat-container",
    "#chat",
    "main",
];

const ROLE_ATTRIBUTES: &[&str] = &["data-message-author-role", "data-role", "data-author"];

const USER_HINTS: &[&str] = &["user", "human", "query", "question", "prompt"];
const ASSISTANT_HINTS: &[&str] = &["assistant", "model", "bot", "response", "answer", "ai-"];

/// One way of reading messages out of a document.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` or an empty list both mean "nothing found".
    fn extract(&self, doc: &dyn Document) -> Result<Option<Vec<ExtractedMessage>>>;
}

/// Sort by document position, then drop the position key.
fn in_document_order(mut items: Vec<(usize, ExtractedMessage)>) -> Vec<ExtractedMessage> {
    items.sort_by_key(|(pos, _)| *pos);
    items.into_iter().map(|(_, m)| m).collect()
}

fn non_empty(messages: Vec<ExtractedMessage>) -> Option<Vec<ExtractedMessage>> {
    (!messages.is_empty()).then_some(messages)
}

fn role_from_value(value: &str) -> Option<Role> {
    match value.trim().to_lowercase().as_str() {
        "user" | "human" => Some(Role::User),
        "assistant" | "model" | "bot" | "ai" => Some(Role::Assistant),
        _ => None,
    }
}

/// Guess a role from class names and attribute values.
fn role_from_hints(element: &Element) -> Option<Role> {
    let haystack: Vec<String> = element
        .classes
        .iter()
        .chain(element.attributes.values())
        .map(|s| s.to_lowercase())
        .collect();
    let has = |hints: &[&str]| haystack.iter().any(|h| hints.iter().any(|t| h.contains(t)));
    match (has(USER_HINTS), has(ASSISTANT_HINTS)) {
        (true, false) => Some(Role::User),
        (false, true) => Some(Role::Assistant),
        _ => None,
    }
}

/// Find the conversation container, descending through single-child wrappers.
fn find_container(doc: &dyn Document) -> Result<Option<Vec<Element>>> {
    for selector in CONTAINER_SELECTORS {
        let Some(container) = doc.query_first(selector)? else {
            continue;
        };
        let mut children = doc.children(&container)?;
        let mut depth = 0;
        while children.len() == 1 && depth < 3 {
            children = doc.children(&children[0])?;
            depth += 1;
        }
        if !children.is_empty() {
            return Ok(Some(children));
        }
    }
    Ok(None)
}

/// The site adapter's own message selectors.
pub struct AdapterStrategy {
    selectors: AdapterSelectors,
}

impl AdapterStrategy {
    pub fn new(selectors: AdapterSelectors) -> Self {
        Self { selectors }
    }
}

impl ExtractionStrategy for AdapterStrategy {
    fn name(&self) -> &'static str {
        "adapter"
    }

    fn extract(&self, doc: &dyn Document) -> Result<Option<Vec<ExtractedMessage>>> {
        let mut items = Vec::new();
        for (selector, role) in [
            (&self.selectors.user_message, Role::User),
            (&self.selectors.assistant_message, Role::Assistant),
        ] {
            for element in doc.query_all(selector)? {
                if let Some(text) = element.content() {
                    items.push((
                        element.position,
                        ExtractedMessage {
                            role,
                            content: text.to_string(),
                        },
                    ));
                }
            }
        }
        Ok(non_empty(in_document_order(items)))
    }
}

/// Elements that declare their author in a data attribute.
pub struct RoleAttributeStrategy;

impl ExtractionStrategy for RoleAttributeStrategy {
    fn name(&self) -> &'static str {
        "role-attributes"
    }

    fn extract(&self, doc: &dyn Document) -> Result<Option<Vec<ExtractedMessage>>> {
        // Keyed by position so an element carrying two role attributes counts once
        let mut found: BTreeMap<usize, ExtractedMessage> = BTreeMap::new();
        for attr in ROLE_ATTRIBUTES {
            for element in doc.query_all(&format!("[{}]", attr))? {
                let role = element.attr(attr).and_then(role_from_value);
                if let (Some(role), Some(text)) = (role, element.content()) {
                    found.entry(element.position).or_insert(ExtractedMessage {
                        role,
                        content: text.to_string(),
                    });
                }
            }
        }
        Ok(non_empty(found.into_values().collect()))
    }
}

/// Container children classified by user-ish / assistant-ish class names.
pub struct ClassHintStrategy;

impl ExtractionStrategy for ClassHintStrategy {
    fn name(&self) -> &'static str {
        "class-hints"
    }

    fn extract(&self, doc: &dyn Document) -> Result<Option<Vec<ExtractedMessage>>> {
        let Some(children) = find_container(doc)? else {
            return Ok(None);
        };
        let items = children
            .iter()
            .filter_map(|child| {
                let role = role_from_hints(child)?;
                let text = child.content()?;
                Some((
                    child.position,
                    ExtractedMessage {
                        role,
                        content: text.to_string(),
                    },
                ))
            })
            .collect();
        Ok(non_empty(in_document_order(items)))
    }
}

/// Last resort: assume turns alternate, starting with the user.
///
/// Wrong for any layout with non-alternating turns; it only runs when every
/// other strategy came back empty.
pub struct AlternationStrategy;

impl ExtractionStrategy for AlternationStrategy {
    fn name(&self) -> &'static str {
        "alternation"
    }

    fn extract(&self, doc: &dyn Document) -> Result<Option<Vec<ExtractedMessage>>> {
        let Some(children) = find_container(doc)? else {
            return Ok(None);
        };
        let items = children
            .iter()
            .filter_map(|child| child.content().map(|t| (child.position, t.to_string())))
            .enumerate()
            .map(|(i, (pos, content))| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                (pos, ExtractedMessage { role, content })
            })
            .collect();
        Ok(non_empty(in_document_order(items)))
    }
}

/// Ordered strategy list.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Adapter selectors first, then the generic fallbacks.
    pub fn for_adapter(selectors: AdapterSelectors) -> Self {
        Self::new(vec![
            Box::new(AdapterStrategy::new(selectors)),
            Box::new(RoleAttributeStrategy),
            Box::new(ClassHintStrategy),
            Box::new(AlternationStrategy),
        ])
    }

    /// First non-empty result, with the name of the strategy that produced it.
    /// A strategy that errors is skipped.
    pub fn extract(&self, doc: &dyn Document) -> Option<(&'static str, Vec<ExtractedMessage>)> {
        for strategy in &self.strategies {
            match strategy.extract(doc) {
                Ok(Some(messages)) if !messages.is_empty() => {
                    return Some((strategy.name(), messages));
                }
                Ok(_) => {}
                Err(e) => debug!(strategy = strategy.name(), "extraction failed: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryPage, NodeSpec};
    use chorus_protocol::AdapterTable;

    fn selectors(key: &str) -> AdapterSelectors {
        AdapterTable::builtin().resolve(key).selectors
    }

    #[test]
    fn test_adapter_selectors_win() {
        let page = MemoryPage::new();
        let main = page.append(page.root(), NodeSpec::new("main"));
        page.append(main, NodeSpec::new("div").attr("data-message-author-role", "user").text("q1"));
        page.append(main, NodeSpec::new("div").attr("data-message-author-role", "assistant").text("a1"));
        page.append(main, NodeSpec::new("div").attr("data-message-author-role", "user").text("  "));

        let (name, messages) = Extractor::for_adapter(selectors("chatgpt")).extract(&page).unwrap();
        assert_eq!(name, "adapter");
        assert_eq!(
            messages,
            vec![ExtractedMessage::user("q1"), ExtractedMessage::assistant("a1")]
        );
    }

    #[test]
    fn test_role_attributes_fallback() {
        let page = MemoryPage::new();
        let log = page.append(page.root(), NodeSpec::new("section"));
        page.append(log, NodeSpec::new("p").attr("data-role", "human").text("hello"));
        page.append(log, NodeSpec::new("p").attr("data-author", "model").text("hi there"));

        // Gemini selectors match nothing here
        let (name, messages) = Extractor::for_adapter(selectors("gemini")).extract(&page).unwrap();
        assert_eq!(name, "role-attributes");
        assert_eq!(messages[1], ExtractedMessage::assistant("hi there"));
    }

    #[test]
    fn test_class_hints_fallback() {
        let page = MemoryPage::new();
        let chat = page.append(page.root(), NodeSpec::new("div").class("conversation"));
        page.append(chat, NodeSpec::new("div").class("bubble human-turn").text("ping"));
        page.append(chat, NodeSpec::new("div").class("divider"));
        page.append(chat, NodeSpec::new("div").class("bubble bot-turn").text("pong"));

        let (name, messages) = Extractor::for_adapter(selectors("claude")).extract(&page).unwrap();
        assert_eq!(name, "class-hints");
        assert_eq!(
            messages,
            vec![ExtractedMessage::user("ping"), ExtractedMessage::assistant("pong")]
        );
    }

    #[test]
    fn test_alternation_is_last_resort() {
        let page = MemoryPage::new();
        let main = page.append(page.root(), NodeSpec::new("main"));
        // Single wrapper is descended through
        let wrapper = page.append(main, NodeSpec::new("div"));
        page.append(wrapper, NodeSpec::new("div").text("first"));
        page.append(wrapper, NodeSpec::new("div").text("second"));
        page.append(wrapper, NodeSpec::new("div").text("third"));

        let (name, messages) = Extractor::for_adapter(selectors("claude")).extract(&page).unwrap();
        assert_eq!(name, "alternation");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2], ExtractedMessage::user("third"));
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        let page = MemoryPage::new();
        assert!(Extractor::for_adapter(selectors("chatgpt")).extract(&page).is_none());
    }

    #[test]
    fn test_dom_errors_are_swallowed() {
        let page = MemoryPage::new();
        let main = page.append(page.root(), NodeSpec::new("main"));
        page.append(main, NodeSpec::new("div").class("user-message").text("x"));
        page.set_failing(true);
        assert!(Extractor::for_adapter(selectors("generic")).extract(&page).is_none());
    }
}
