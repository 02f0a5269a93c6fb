//! Reference rich-text document tree.
//!
//! # Responsibility
//! - Build a block/inline tree from generic markup (the de-tagged body).
//! - Track inline formatting and concept marks per text leaf.
//! - Render back to generic markup, keeping marks open across leaves.
//!
//! # Invariants
//! - Leaf text is stored decoded, exactly as the logical-text projection
//!   reads its source, so the two share one offset space.
//! - Rendering escapes leaf text; no text typed into the tree can read back
//!   as markup.
//! - A leaf carries at most one concept mark; marks are kept sorted, and the
//!   concept mark sorts first so it renders outermost.
//! - Empty leaves exist only as concept placeholders.
//! - Tree positions: entering or leaving a block costs 1, each text char
//!   costs 1, a hard break costs 1.

use crate::codec::markup::{decode_text, escape_text, Lexer, Tag, TagKind, Token};
use crate::codec::offset::{slice_chars, TreeOffset};
use crate::codec::tree::{ConceptTree, TextLeafRef};
use crate::model::annotation::ConceptTag;
use std::ops::Range;

/// Attribute carrying the concept tag on rendered wrappers.
pub const CONCEPT_TAG_ATTRIBUTE: &str = "data-concept-tag";
/// Default class added to rendered concept wrappers.
pub const DEFAULT_CONCEPT_CLASS: &str = "concept-mark";

/// Block node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    /// Levels 1..=3.
    Heading(u8),
    BulletList,
    OrderedList,
    ListItem,
    Blockquote,
}

impl BlockKind {
    fn from_element(name: &str) -> Option<Self> {
        match name {
            "p" | "h4" | "h5" | "h6" => Some(Self::Paragraph),
            "h1" => Some(Self::Heading(1)),
            "h2" => Some(Self::Heading(2)),
            "h3" => Some(Self::Heading(3)),
            "ul" => Some(Self::BulletList),
            "ol" => Some(Self::OrderedList),
            "li" => Some(Self::ListItem),
            "blockquote" => Some(Self::Blockquote),
            _ => None,
        }
    }

    pub fn element(&self) -> &'static str {
        match self {
            Self::Paragraph => "p",
            Self::Heading(1) => "h1",
            Self::Heading(2) => "h2",
            Self::Heading(_) => "h3",
            Self::BulletList => "ul",
            Self::OrderedList => "ol",
            Self::ListItem => "li",
            Self::Blockquote => "blockquote",
        }
    }

    /// Textblocks hold inline content only.
    pub fn is_textblock(&self) -> bool {
        matches!(self, Self::Paragraph | Self::Heading(_))
    }
}

/// Inline mark. Variant order is render nesting order, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mark {
    /// `None` is a tag-less placeholder applied while a tag is pending.
    Concept(Option<ConceptTag>),
    Bold,
    Italic,
    Underline,
}

impl Mark {
    pub fn concept_tag(&self) -> Option<&ConceptTag> {
        match self {
            Self::Concept(tag) => tag.as_ref(),
            _ => None,
        }
    }
}

/// Text-bearing leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLeaf {
    pub text: String,
    pub marks: Vec<Mark>,
}

impl TextLeaf {
    pub fn new(text: impl Into<String>, mut marks: Vec<Mark>) -> Self {
        marks.sort();
        marks.dedup();
        Self {
            text: text.into(),
            marks,
        }
    }

    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The leaf's concept mark, tagged or placeholder.
    pub fn concept(&self) -> Option<&Option<ConceptTag>> {
        self.marks.iter().find_map(|mark| match mark {
            Mark::Concept(tag) => Some(tag),
            _ => None,
        })
    }

    fn with_concept(&self, text: &str, tag: Option<Option<&ConceptTag>>) -> Self {
        let mut marks: Vec<Mark> = self
            .marks
            .iter()
            .filter(|mark| !matches!(mark, Mark::Concept(_)))
            .cloned()
            .collect();
        if let Some(tag) = tag {
            marks.push(Mark::Concept(tag.cloned()));
        }
        Self::new(text, marks)
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            text: slice_chars(&self.text, start, end).to_string(),
            marks: self.marks.clone(),
        }
    }
}

/// Block node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub kind: BlockKind,
    /// Raw `style` attribute, kept for alignment round-trips.
    pub style: Option<String>,
    pub children: Vec<Node>,
}

/// Tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Block(BlockNode),
    Text(TextLeaf),
    HardBreak(Vec<Mark>),
}

impl Node {
    /// Size in tree positions.
    pub fn size(&self) -> usize {
        match self {
            Self::Block(block) => 2 + block.children.iter().map(Node::size).sum::<usize>(),
            Self::Text(leaf) => leaf.len(),
            Self::HardBreak(_) => 1,
        }
    }
}

/// Minimal rich-text document tree implementing [`ConceptTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocTree {
    nodes: Vec<Node>,
    selection: Range<TreeOffset>,
    concept_class: String,
}

impl Default for DocTree {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            selection: TreeOffset(0)..TreeOffset(0),
            concept_class: DEFAULT_CONCEPT_CLASS.to_string(),
        }
    }
}

impl DocTree {
    /// Builds a tree from generic markup.
    ///
    /// Unknown elements are unwrapped, loose inline content is wrapped in
    /// paragraphs, and whitespace-only text between blocks is kept so the
    /// tree text matches the markup projection.
    pub fn parse(markup: &str) -> Self {
        let mut parser = TreeParser::default();
        for lexeme in Lexer::new(markup) {
            match lexeme.token {
                Token::Text(text) => parser.push_text(&decode_text(text)),
                Token::Tag(tag) => parser.push_tag(&tag),
            }
        }
        Self {
            nodes: parser.finish(),
            ..Self::default()
        }
    }

    /// Sets the class rendered on concept wrappers (empty disables it).
    pub fn with_concept_class(mut self, class: impl Into<String>) -> Self {
        self.concept_class = class.into();
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn selection(&self) -> Range<TreeOffset> {
        self.selection.clone()
    }

    pub fn set_selection(&mut self, selection: Range<TreeOffset>) {
        self.selection = selection;
    }

    /// Concatenated text of every leaf.
    pub fn plain_text(&self) -> String {
        self.text_leaves().iter().map(|leaf| leaf.text).collect()
    }

    /// Inserts `text` at `at`, inheriting the marks of the char before it.
    ///
    /// Returns `false` when `at` is not inside or at the edge of a text leaf.
    pub fn insert_text(&mut self, at: TreeOffset, text: &str) -> bool {
        let target = self
            .text_leaves()
            .iter()
            .position(|leaf| {
                leaf_end(leaf) >= at && (leaf.pos < at || (leaf.pos == at && leaf.text.is_empty()))
            })
            .or_else(|| {
                self.text_leaves()
                    .iter()
                    .position(|leaf| leaf.pos == at && !leaf.text.is_empty())
            });
        let Some(target) = target else {
            return false;
        };

        let mut index = 0;
        self.rewrite_leaves(|start, mut leaf| {
            if index == target {
                let split = at.get() - start;
                let byte = leaf
                    .text
                    .char_indices()
                    .nth(split)
                    .map_or(leaf.text.len(), |(byte, _)| byte);
                leaf.text.insert_str(byte, text);
            }
            index += 1;
            vec![leaf]
        });
        true
    }

    /// Deletes the text covered by `range`. Block structure is kept; leaves
    /// emptied by the deletion disappear together with their marks.
    pub fn delete_range(&mut self, range: Range<TreeOffset>) {
        if range.is_empty() {
            return;
        }
        self.rewrite_leaves(|start, leaf| {
            let end = start + leaf.len();
            let cut_start = range.start.get().clamp(start, end);
            let cut_end = range.end.get().clamp(start, end);
            if cut_start >= cut_end {
                return vec![leaf];
            }
            let mut text = slice_chars(&leaf.text, 0, cut_start - start).to_string();
            text.push_str(slice_chars(&leaf.text, cut_end - start, end - start));
            if text.is_empty() {
                Vec::new()
            } else {
                vec![TextLeaf::new(text, leaf.marks)]
            }
        });
    }

    /// Removes tag-less placeholder concept marks on `range`.
    pub fn clear_placeholder_marks(&mut self, range: Range<TreeOffset>) {
        self.strip_concept(range, |tag| tag.is_none());
    }

    fn strip_concept(&mut self, range: Range<TreeOffset>, matches: impl Fn(&Option<ConceptTag>) -> bool) {
        self.rewrite_leaves(|start, leaf| {
            let Some(concept) = leaf.concept() else {
                return vec![leaf];
            };
            if !matches(concept) {
                return vec![leaf];
            }
            let end = start + leaf.len();
            if leaf.is_empty() {
                let inside = range.start.get() <= start && start <= range.end.get();
                return if inside { Vec::new() } else { vec![leaf] };
            }
            if range.start.get() >= end || range.end.get() <= start {
                return vec![leaf];
            }
            split_and_mark(&leaf, start, end, &range, None)
        });
    }

    /// Rewrites every text leaf in document order.
    ///
    /// `visit` gets the leaf's start position and returns its replacements.
    fn rewrite_leaves<F>(&mut self, mut visit: F)
    where
        F: FnMut(usize, TextLeaf) -> Vec<TextLeaf>,
    {
        let nodes = std::mem::take(&mut self.nodes);
        let mut pos = 0;
        self.nodes = rewrite_nodes(nodes, &mut pos, &mut visit, false);
    }
}

impl ConceptTree for DocTree {
    fn text_leaves(&self) -> Vec<TextLeafRef<'_>> {
        let mut leaves = Vec::new();
        let mut pos = 0;
        collect_leaves(&self.nodes, &mut pos, &mut leaves);
        leaves
    }

    fn content_size(&self) -> TreeOffset {
        TreeOffset(self.nodes.iter().map(Node::size).sum())
    }

    fn set_concept_mark(&mut self, range: Range<TreeOffset>, tag: Option<&ConceptTag>) -> bool {
        let mut applied = false;
        if range.is_empty() {
            let at = range.start.get();
            self.rewrite_leaves(|start, leaf| {
                let end = start + leaf.len();
                if applied || at < start || at > end {
                    return vec![leaf];
                }
                applied = true;
                let split = at - start;
                around(
                    leaf.slice(0, split),
                    leaf.with_concept("", Some(tag)),
                    leaf.slice(split, end - start),
                )
            });
            return applied;
        }

        self.rewrite_leaves(|start, leaf| {
            let end = start + leaf.len();
            if range.start.get() >= end || range.end.get() <= start {
                return vec![leaf];
            }
            applied = true;
            split_and_mark(&leaf, start, end, &range, Some(tag))
        });
        applied
    }

    fn unset_concept_mark(&mut self, range: Range<TreeOffset>) {
        self.strip_concept(range, |_| true);
    }

    fn text_between(&self, range: Range<TreeOffset>) -> String {
        self.text_leaves()
            .iter()
            .filter_map(|leaf| {
                let start = leaf.pos.get();
                let end = leaf_end(leaf).get();
                let from = range.start.get().clamp(start, end);
                let to = range.end.get().clamp(start, end);
                (from < to).then(|| slice_chars(leaf.text, from - start, to - start))
            })
            .collect()
    }

    fn concept_tag_at(&self, pos: TreeOffset) -> Option<ConceptTag> {
        let mut found = None;
        let mut cursor = 0;
        visit_text_leaves(&self.nodes, &mut cursor, &mut |start, leaf| {
            if found.is_none() && start <= pos.get() && pos.get() < start + leaf.len() {
                found = leaf.concept().and_then(|tag| tag.clone());
            }
        });
        found
    }

    fn reset_selection(&mut self) {
        self.selection = TreeOffset(0)..TreeOffset(0);
    }

    fn render_html(&self) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, &self.concept_class, &mut out);
        out
    }
}

fn leaf_end(leaf: &TextLeafRef<'_>) -> TreeOffset {
    TreeOffset(leaf.pos.get() + leaf.text.chars().count())
}

/// Splits `leaf` around `range`; the covered middle gets `concept`
/// (`None` removes the concept mark).
fn split_and_mark(
    leaf: &TextLeaf,
    start: usize,
    end: usize,
    range: &Range<TreeOffset>,
    concept: Option<Option<&ConceptTag>>,
) -> Vec<TextLeaf> {
    let cut_start = range.start.get().clamp(start, end) - start;
    let cut_end = range.end.get().clamp(start, end) - start;
    let middle = slice_chars(&leaf.text, cut_start, cut_end);
    around(
        leaf.slice(0, cut_start),
        leaf.with_concept(middle, concept),
        leaf.slice(cut_end, end - start),
    )
}

/// Joins split pieces; empty outer pieces are dropped so a split never
/// leaves stray placeholders behind.
fn around(left: TextLeaf, middle: TextLeaf, right: TextLeaf) -> Vec<TextLeaf> {
    let mut pieces = Vec::with_capacity(3);
    if !left.is_empty() {
        pieces.push(left);
    }
    pieces.push(middle);
    if !right.is_empty() {
        pieces.push(right);
    }
    pieces
}

fn collect_leaves<'a>(nodes: &'a [Node], pos: &mut usize, out: &mut Vec<TextLeafRef<'a>>) {
    for node in nodes {
        match node {
            Node::Block(block) => {
                *pos += 1;
                collect_leaves(&block.children, pos, out);
                *pos += 1;
            }
            Node::Text(leaf) => {
                out.push(TextLeafRef {
                    pos: TreeOffset(*pos),
                    text: &leaf.text,
                });
                *pos += leaf.len();
            }
            Node::HardBreak(_) => *pos += 1,
        }
    }
}

fn visit_text_leaves(nodes: &[Node], pos: &mut usize, visit: &mut dyn FnMut(usize, &TextLeaf)) {
    for node in nodes {
        match node {
            Node::Block(block) => {
                *pos += 1;
                visit_text_leaves(&block.children, pos, visit);
                *pos += 1;
            }
            Node::Text(leaf) => {
                visit(*pos, leaf);
                *pos += leaf.len();
            }
            Node::HardBreak(_) => *pos += 1,
        }
    }
}

fn rewrite_nodes<F>(nodes: Vec<Node>, pos: &mut usize, visit: &mut F, inline: bool) -> Vec<Node>
where
    F: FnMut(usize, TextLeaf) -> Vec<TextLeaf>,
{
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Block(mut block) => {
                *pos += 1;
                let children = std::mem::take(&mut block.children);
                block.children = rewrite_nodes(children, pos, visit, block.kind.is_textblock());
                *pos += 1;
                out.push(Node::Block(block));
            }
            Node::Text(leaf) => {
                let start = *pos;
                *pos += leaf.len();
                out.extend(visit(start, leaf).into_iter().map(Node::Text));
            }
            Node::HardBreak(marks) => {
                *pos += 1;
                out.push(Node::HardBreak(marks));
            }
        }
    }
    if inline {
        normalize_inline(out)
    } else {
        out.retain(|node| !matches!(node, Node::Text(leaf) if leaf.is_empty() && leaf.concept().is_none()));
        out
    }
}

/// Drops empty unmarked leaves and merges neighbours with equal marks.
fn normalize_inline(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Node::Text(leaf) = &node {
            if leaf.is_empty() && leaf.concept().is_none() {
                continue;
            }
            if let Some(Node::Text(previous)) = out.last_mut() {
                if previous.marks == leaf.marks {
                    previous.text.push_str(&leaf.text);
                    continue;
                }
            }
        }
        out.push(node);
    }
    out
}

/// Wraps loose inline runs in paragraphs; whitespace-only runs stay as is.
fn normalize_container(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut run: Vec<Node> = Vec::new();
    for node in nodes {
        if matches!(node, Node::Block(_)) {
            flush_inline_run(&mut run, &mut out);
            out.push(node);
        } else {
            run.push(node);
        }
    }
    flush_inline_run(&mut run, &mut out);
    out
}

fn flush_inline_run(run: &mut Vec<Node>, out: &mut Vec<Node>) {
    if run.is_empty() {
        return;
    }
    let inline = normalize_inline(std::mem::take(run));
    let formatting_only = inline.iter().all(|node| match node {
        Node::Text(leaf) => leaf.text.trim().is_empty() && leaf.concept().is_none(),
        _ => false,
    });
    if formatting_only {
        out.extend(inline);
    } else {
        out.push(Node::Block(BlockNode {
            kind: BlockKind::Paragraph,
            style: None,
            children: inline,
        }));
    }
}

struct Frame {
    element: String,
    kind: Option<BlockKind>,
    style: Option<String>,
    children: Vec<Node>,
}

struct OpenInline {
    element: String,
    mark: Option<Mark>,
}

struct TreeParser {
    stack: Vec<Frame>,
    inline: Vec<OpenInline>,
}

impl Default for TreeParser {
    fn default() -> Self {
        Self {
            stack: vec![Frame {
                element: String::new(),
                kind: None,
                style: None,
                children: Vec::new(),
            }],
            inline: Vec::new(),
        }
    }
}

impl TreeParser {
    fn active_marks(&self) -> Vec<Mark> {
        let mut marks = Vec::new();
        for open in &self.inline {
            if let Some(mark) = &open.mark {
                if matches!(mark, Mark::Concept(_)) {
                    // Innermost concept wins.
                    marks.retain(|existing| !matches!(existing, Mark::Concept(_)));
                }
                marks.push(mark.clone());
            }
        }
        marks
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn push_text(&mut self, text: &str) {
        let leaf = TextLeaf::new(text, self.active_marks());
        self.top().children.push(Node::Text(leaf));
    }

    fn push_tag(&mut self, tag: &Tag<'_>) {
        let name = tag.name.to_ascii_lowercase();
        match tag.kind {
            TagKind::Open | TagKind::SelfClosing => {
                if name == "br" {
                    let marks = self.active_marks();
                    self.top().children.push(Node::HardBreak(marks));
                } else if let Some(kind) = BlockKind::from_element(&name) {
                    self.open_block(name, kind, tag.attribute("style"));
                    if tag.kind == TagKind::SelfClosing {
                        self.close_frame();
                    }
                } else if tag.kind == TagKind::Open {
                    if let Some(mark) = inline_mark(&name, tag) {
                        self.inline.push(OpenInline {
                            element: name,
                            mark,
                        });
                    }
                }
            }
            TagKind::Close => {
                if BlockKind::from_element(&name).is_some() {
                    if let Some(depth) = self.stack.iter().rposition(|frame| frame.element == name) {
                        if depth > 0 {
                            while self.stack.len() > depth {
                                self.close_frame();
                            }
                        }
                    }
                } else if let Some(index) = self.inline.iter().rposition(|open| open.element == name) {
                    self.inline.remove(index);
                }
            }
            TagKind::Other => {}
        }
    }

    fn open_block(&mut self, element: String, kind: BlockKind, style: Option<&str>) {
        while self
            .stack
            .last()
            .and_then(|frame| frame.kind)
            .is_some_and(|open| open.is_textblock())
        {
            self.close_frame();
        }
        self.stack.push(Frame {
            element,
            kind: Some(kind),
            style: style.map(str::to_string),
            children: Vec::new(),
        });
    }

    fn close_frame(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let Some(kind) = frame.kind else {
            return;
        };
        let children = if kind.is_textblock() {
            normalize_inline(frame.children)
        } else {
            normalize_container(frame.children)
        };
        self.top().children.push(Node::Block(BlockNode {
            kind,
            style: frame.style,
            children,
        }));
    }

    fn finish(mut self) -> Vec<Node> {
        while self.stack.len() > 1 {
            self.close_frame();
        }
        let root = self.stack.pop().map(|frame| frame.children).unwrap_or_default();
        normalize_container(root)
    }
}

/// Inline elements tracked while parsing; the inner `None` marks elements
/// (plain spans) that carry no mark but must still pair with their close.
fn inline_mark(name: &str, tag: &Tag<'_>) -> Option<Option<Mark>> {
    match name {
        "strong" | "b" => Some(Some(Mark::Bold)),
        "em" | "i" => Some(Some(Mark::Italic)),
        "u" => Some(Some(Mark::Underline)),
        "span" => Some(
            tag.attribute(CONCEPT_TAG_ATTRIBUTE)
                .map(|value| Mark::Concept(ConceptTag::parse(value).ok())),
        ),
        _ => None,
    }
}

fn render_nodes(nodes: &[Node], class: &str, out: &mut String) {
    let mut index = 0;
    while index < nodes.len() {
        if let Node::Block(block) = &nodes[index] {
            render_block(block, class, out);
            index += 1;
            continue;
        }
        let run = nodes[index..]
            .iter()
            .take_while(|node| !matches!(node, Node::Block(_)))
            .count();
        render_inline(&nodes[index..index + run], class, out);
        index += run;
    }
}

fn render_block(block: &BlockNode, class: &str, out: &mut String) {
    let element = block.kind.element();
    out.push('<');
    out.push_str(element);
    if let Some(style) = &block.style {
        let quote = if style.contains('"') { '\'' } else { '"' };
        out.push_str(" style=");
        out.push(quote);
        out.push_str(style);
        out.push(quote);
    }
    out.push('>');
    render_nodes(&block.children, class, out);
    out.push_str("</");
    out.push_str(element);
    out.push('>');
}

fn render_inline(nodes: &[Node], class: &str, out: &mut String) {
    let mut open: Vec<&Mark> = Vec::new();
    for node in nodes {
        let marks = match node {
            Node::Text(leaf) => &leaf.marks,
            Node::HardBreak(marks) => marks,
            Node::Block(_) => continue,
        };
        let keep = open
            .iter()
            .zip(marks.iter())
            .take_while(|(current, wanted)| **current == *wanted)
            .count();
        while open.len() > keep {
            if let Some(mark) = open.pop() {
                close_mark(mark, out);
            }
        }
        for mark in &marks[keep..] {
            open_mark(mark, class, out);
            open.push(mark);
        }
        match node {
            Node::Text(leaf) => out.push_str(&escape_text(&leaf.text)),
            _ => out.push_str("<br>"),
        }
    }
    while let Some(mark) = open.pop() {
        close_mark(mark, out);
    }
}

fn open_mark(mark: &Mark, class: &str, out: &mut String) {
    match mark {
        Mark::Bold => out.push_str("<strong>"),
        Mark::Italic => out.push_str("<em>"),
        Mark::Underline => out.push_str("<u>"),
        Mark::Concept(tag) => {
            out.push_str("<span");
            if !class.is_empty() {
                out.push_str(" class=\"");
                out.push_str(class);
                out.push('"');
            }
            if let Some(tag) = tag {
                out.push(' ');
                out.push_str(CONCEPT_TAG_ATTRIBUTE);
                out.push_str("=\"");
                out.push_str(tag.as_str());
                out.push('"');
            }
            out.push('>');
        }
    }
}

fn close_mark(mark: &Mark, out: &mut String) {
    out.push_str(match mark {
        Mark::Bold => "</strong>",
        Mark::Italic => "</em>",
        Mark::Underline => "</u>",
        Mark::Concept(_) => "</span>",
    });
}
