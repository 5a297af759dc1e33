//! In-memory page — a small DOM with a CSS subset, used to drive the agent
//! without a browser (tests, replay of captured page snapshots).
//!
//! Supported selectors: type, `*`, `.class`, `#id`, `[attr]`, `[attr=value]`
//! (quoted or bare), compounds of those, descendant combinators and `,` lists.

use std::collections::{BTreeMap, HashMap};

use chorus_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::document::{Document, Element, MutationBatch, MutationStream, NodeId, Page};

/// Builder for a node appended to a [`MemoryPage`].
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    text: String,
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            ..Default::default()
        }
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.extend(class.split_whitespace().map(String::from));
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }
}

/// Something the agent did to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Input { selector: String, text: String },
    Click { selector: String },
    Enter { selector: String },
}

struct Node {
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    text: String,
    parent: Option<u64>,
    children: Vec<u64>,
}

struct Dom {
    nodes: HashMap<u64, Node>,
    root: u64,
    next_id: u64,
    failing: bool,
    actions: Vec<PageAction>,
}

/// A mutable in-memory document implementing [`Page`].
pub struct MemoryPage {
    dom: Mutex<Dom>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MutationBatch>>>,
}

impl MemoryPage {
    /// Create a page holding an empty `<body>`.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            0,
            Node {
                tag: "body".into(),
                classes: Vec::new(),
                attributes: BTreeMap::new(),
                text: String::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            dom: Mutex::new(Dom {
                nodes,
                root: 0,
                next_id: 1,
                failing: false,
                actions: Vec::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(self.dom.lock().root)
    }

    /// Append a child node and notify observers.
    pub fn append(&self, parent: NodeId, spec: NodeSpec) -> NodeId {
        let id = {
            let mut dom = self.dom.lock();
            let id = dom.next_id;
            dom.next_id += 1;
            dom.nodes.insert(
                id,
                Node {
                    tag: spec.tag,
                    classes: spec.classes,
                    attributes: spec.attributes,
                    text: spec.text,
                    parent: Some(parent.0),
                    children: Vec::new(),
                },
            );
            if let Some(p) = dom.nodes.get_mut(&parent.0) {
                p.children.push(id);
            }
            id
        };
        self.notify(1);
        NodeId(id)
    }

    pub fn set_text(&self, node: NodeId, text: &str) {
        if let Some(n) = self.dom.lock().nodes.get_mut(&node.0) {
            n.text = text.to_string();
        }
        self.notify(1);
    }

    pub fn set_attr(&self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.dom.lock().nodes.get_mut(&node.0) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
        self.notify(1);
    }

    pub fn add_class(&self, node: NodeId, class: &str) {
        if let Some(n) = self.dom.lock().nodes.get_mut(&node.0) {
            if !n.classes.iter().any(|c| c == class) {
                n.classes.push(class.to_string());
            }
        }
        self.notify(1);
    }

    pub fn remove_class(&self, node: NodeId, class: &str) {
        if let Some(n) = self.dom.lock().nodes.get_mut(&node.0) {
            n.classes.retain(|c| c != class);
        }
        self.notify(1);
    }

    /// Detach a node and its subtree.
    pub fn remove(&self, node: NodeId) {
        {
            let mut dom = self.dom.lock();
            let parent = dom.nodes.get(&node.0).and_then(|n| n.parent);
            if let Some(p) = parent.and_then(|p| dom.nodes.get_mut(&p)) {
                p.children.retain(|c| *c != node.0);
            }
            let mut stack = vec![node.0];
            while let Some(id) = stack.pop() {
                if let Some(n) = dom.nodes.remove(&id) {
                    stack.extend(n.children);
                }
            }
        }
        self.notify(1);
    }

    /// Emit a mutation notification without changing anything.
    pub fn touch(&self) {
        self.notify(1);
    }

    /// Make every read fail, as a detached or navigating page would.
    pub fn set_failing(&self, failing: bool) {
        self.dom.lock().failing = failing;
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.dom.lock().actions.clone()
    }

    fn notify(&self, records: usize) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(MutationBatch { records }).is_ok());
    }
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    fn check(&self) -> Result<()> {
        if self.failing {
            return Err(Error::Dom("document is not accessible".into()));
        }
        Ok(())
    }

    fn preorder(&self) -> Vec<u64> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get(&id) {
                order.push(id);
                stack.extend(n.children.iter().rev());
            }
        }
        order
    }

    fn text_content(&self, id: u64) -> String {
        let Some(node) = self.nodes.get(&id) else {
            return String::new();
        };
        let mut parts = Vec::new();
        if !node.text.is_empty() {
            parts.push(node.text.clone());
        }
        for child in &node.children {
            let t = self.text_content(*child);
            if !t.is_empty() {
                parts.push(t);
            }
        }
        parts.join("\n")
    }

    fn snapshot(&self, id: u64, position: usize) -> Option<Element> {
        let node = self.nodes.get(&id)?;
        Some(Element {
            node: NodeId(id),
            position,
            tag: node.tag.clone(),
            classes: node.classes.clone(),
            attributes: node.attributes.clone(),
            text: self.text_content(id),
        })
    }

    fn positions(&self) -> HashMap<u64, usize> {
        self.preorder()
            .into_iter()
            .enumerate()
            .map(|(pos, id)| (id, pos))
            .collect()
    }

    fn select(&self, selector: &str) -> Result<Vec<u64>> {
        let list = parse_selector_list(selector)?;
        Ok(self
            .preorder()
            .into_iter()
            .filter(|id| list.iter().any(|sel| self.matches(*id, sel)))
            .collect())
    }

    fn matches(&self, id: u64, selector: &[Compound]) -> bool {
        let Some((last, ancestors)) = selector.split_last() else {
            return false;
        };
        if !self.matches_compound(id, last) {
            return false;
        }
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        for compound in ancestors.iter().rev() {
            loop {
                match current {
                    Some(a) if self.matches_compound(a, compound) => {
                        current = self.nodes.get(&a).and_then(|n| n.parent);
                        break;
                    }
                    Some(a) => current = self.nodes.get(&a).and_then(|n| n.parent),
                    None => return false,
                }
            }
        }
        true
    }

    fn matches_compound(&self, id: u64, compound: &Compound) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if let Some(tag) = &compound.tag {
            if tag != "*" && !tag.eq_ignore_ascii_case(&node.tag) {
                return false;
            }
        }
        if let Some(wanted) = &compound.id {
            if node.attributes.get("id") != Some(wanted) {
                return false;
            }
        }
        if !compound
            .classes
            .iter()
            .all(|c| node.classes.iter().any(|nc| nc == c))
        {
            return false;
        }
        compound.attrs.iter().all(|(name, value)| match value {
            Some(v) => node.attributes.get(name) == Some(v),
            None => node.attributes.contains_key(name),
        })
    }
}

impl Document for MemoryPage {
    fn query_all(&self, selector: &str) -> Result<Vec<Element>> {
        let dom = self.dom.lock();
        dom.check()?;
        let positions = dom.positions();
        Ok(dom
            .select(selector)?
            .into_iter()
            .filter_map(|id| dom.snapshot(id, positions.get(&id).copied().unwrap_or(usize::MAX)))
            .collect())
    }

    fn children(&self, parent: &Element) -> Result<Vec<Element>> {
        let dom = self.dom.lock();
        dom.check()?;
        let node = dom
            .nodes
            .get(&parent.node.0)
            .ok_or_else(|| Error::Dom(format!("node {} detached", parent.node.0)))?;
        let positions = dom.positions();
        Ok(node
            .children
            .iter()
            .filter_map(|id| dom.snapshot(*id, positions.get(id).copied().unwrap_or(usize::MAX)))
            .collect())
    }
}

impl Page for MemoryPage {
    fn set_input(&self, selector: &str, text: &str) -> Result<bool> {
        let found = {
            let mut dom = self.dom.lock();
            dom.check()?;
            let target = dom.select(selector)?.into_iter().next();
            match target.and_then(|id| dom.nodes.get_mut(&id)) {
                Some(node) => {
                    node.attributes.insert("value".into(), text.to_string());
                    dom.actions.push(PageAction::Input {
                        selector: selector.to_string(),
                        text: text.to_string(),
                    });
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(1);
        }
        Ok(found)
    }

    fn click(&self, selector: &str) -> Result<bool> {
        let mut dom = self.dom.lock();
        dom.check()?;
        let target = dom.select(selector)?.into_iter().next();
        let enabled = target
            .and_then(|id| dom.nodes.get(&id))
            .map(|n| !n.attributes.contains_key("disabled"))
            .unwrap_or(false);
        if enabled {
            dom.actions.push(PageAction::Click {
                selector: selector.to_string(),
            });
        }
        Ok(enabled)
    }

    fn press_enter(&self, selector: &str) -> Result<()> {
        let mut dom = self.dom.lock();
        dom.check()?;
        dom.actions.push(PageAction::Enter {
            selector: selector.to_string(),
        });
        Ok(())
    }

    fn mutations(&self) -> MutationStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

// ---------------------------------------------------------------
// Selector parsing
// ---------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

fn unsupported(selector: &str) -> Error {
    Error::Dom(format!("unsupported selector: {}", selector))
}

/// Split on `is_sep` outside of `[...]` and quotes.
fn split_outside(src: &str, is_sep: impl Fn(char) -> bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in src.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            (None, c) if depth == 0 && is_sep(c) => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            (None, c) => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_selector_list(src: &str) -> Result<Vec<Vec<Compound>>> {
    let list: Vec<Vec<Compound>> = split_outside(src, |c| c == ',')
        .iter()
        .map(|sel| {
            split_outside(sel, char::is_whitespace)
                .iter()
                .map(|part| parse_compound(part))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<_>>()?;
    if list.is_empty() {
        return Err(unsupported(src));
    }
    Ok(list)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(src: &str) -> Result<Compound> {
    let chars: Vec<char> = src.chars().collect();
    let mut compound = Compound::default();
    let mut i = 0;

    let read_ident = |i: &mut usize| {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };

    if i < chars.len() && chars[i] == '*' {
        compound.tag = Some("*".into());
        i += 1;
    } else {
        let tag = read_ident(&mut i);
        if !tag.is_empty() {
            compound.tag = Some(tag.to_lowercase());
        }
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let class = read_ident(&mut i);
                if class.is_empty() {
                    return Err(unsupported(src));
                }
                compound.classes.push(class);
            }
            '#' => {
                i += 1;
                let id = read_ident(&mut i);
                if id.is_empty() {
                    return Err(unsupported(src));
                }
                compound.id = Some(id);
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .ok_or_else(|| unsupported(src))?;
                let inner: String = chars[i + 1..i + close].iter().collect();
                compound.attrs.push(parse_attr(&inner).ok_or_else(|| unsupported(src))?);
                i += close + 1;
            }
            _ => return Err(unsupported(src)),
        }
    }
    Ok(compound)
}

fn parse_attr(inner: &str) -> Option<(String, Option<String>)> {
    match inner.split_once('=') {
        None => {
            let name = inner.trim();
            (!name.is_empty() && name.chars().all(is_ident_char)).then(|| (name.to_string(), None))
        }
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() || !name.chars().all(is_ident_char) {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((name.to_string(), Some(value.to_string())))
        }
    }
}
