//! Structured rich-text document model.
//!
//! A document is a flat list of blocks; each block holds inline spans that
//! carry marks. Markdown is the interchange format in both directions and
//! is parsed with pulldown-cmark.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use super::EditorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mark {
    Bold,
    Italic,
    Code,
    /// Uncommitted streamed text.
    Ghost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    /// Sorted, no duplicates.
    pub marks: Vec<Mark>,
}

impl Span {
    pub fn new(text: impl Into<String>, marks: &[Mark]) -> Self {
        let mut marks = marks.to_vec();
        marks.sort();
        marks.dedup();
        Self {
            text: text.into(),
            marks,
        }
    }

    pub fn has(&self, mark: Mark) -> bool {
        self.marks.contains(&mark)
    }

    fn len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    CodeBlock { language: Option<String> },
    ListItem { ordered: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub spans: Vec<Span>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            spans: Vec::new(),
        }
    }

    pub fn paragraph(text: &str) -> Self {
        let mut block = Self::new(BlockKind::Paragraph);
        block.spans.push(Span::new(text, &[]));
        block.normalize();
        block
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.spans.iter().map(Span::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.iter().all(|span| span.text.is_empty())
    }

    pub fn text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect()
    }

    /// Split the inline content at a char offset.
    fn split_at(&self, offset: usize) -> (Vec<Span>, Vec<Span>) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        let mut remaining = offset;
        for span in &self.spans {
            let len = span.len();
            if remaining >= len {
                left.push(span.clone());
                remaining -= len;
            } else if remaining == 0 {
                right.push(span.clone());
            } else {
                let at = byte_index(&span.text, remaining);
                left.push(Span {
                    text: span.text[..at].to_string(),
                    marks: span.marks.clone(),
                });
                right.push(Span {
                    text: span.text[at..].to_string(),
                    marks: span.marks.clone(),
                });
                remaining = 0;
            }
        }
        (left, right)
    }

    /// Marks in effect just before `offset`, ghost excluded.
    pub fn marks_at(&self, offset: usize) -> Vec<Mark> {
        let (left, _) = self.split_at(offset);
        left.last()
            .map(|span| {
                span.marks
                    .iter()
                    .copied()
                    .filter(|mark| *mark != Mark::Ghost)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop empty spans and merge neighbours with identical marks.
    fn normalize(&mut self) {
        let mut merged: Vec<Span> = Vec::with_capacity(self.spans.len());
        for span in self.spans.drain(..) {
            if span.text.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.marks == span.marks => last.text.push_str(&span.text),
                _ => merged.push(span),
            }
        }
        self.spans = merged;
    }
}

/// Char offset inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Position {
    pub block: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(block: usize, offset: usize) -> Self {
        Self { block, offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RichDocument {
    pub blocks: Vec<Block>,
}

impl RichDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_markdown(markdown: &str) -> Self {
        let mut builder = BlockBuilder::default();
        for event in Parser::new_ext(markdown, Options::empty()) {
            builder.event(event);
        }
        builder.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(Block::is_empty)
    }

    /// Position after the last char.
    pub fn end(&self) -> Position {
        match self.blocks.len() {
            0 => Position::default(),
            n => Position::new(n - 1, self.blocks[n - 1].len()),
        }
    }

    pub fn check(&self, at: Position) -> Result<(), EditorError> {
        if self.blocks.is_empty() && at == Position::default() {
            return Ok(());
        }
        match self.blocks.get(at.block) {
            Some(block) if at.offset <= block.len() => Ok(()),
            _ => Err(EditorError::InvalidPosition {
                block: at.block,
                offset: at.offset,
            }),
        }
    }

    /// Text with ghost spans.
    pub fn ghost_text(&self) -> String {
        self.blocks
            .iter()
            .flat_map(|block| block.spans.iter())
            .filter(|span| span.has(Mark::Ghost))
            .map(|span| span.text.as_str())
            .collect()
    }

    pub fn has_ghost(&self) -> bool {
        self.blocks
            .iter()
            .any(|block| block.spans.iter().any(|span| span.has(Mark::Ghost)))
    }

    /// Same document with every ghost span removed.
    pub fn without_ghost(&self) -> Self {
        let mut doc = self.clone();
        for block in &mut doc.blocks {
            block.spans.retain(|span| !span.has(Mark::Ghost));
            block.normalize();
        }
        doc
    }

    fn ensure_block(&mut self, at: Position) -> Result<(), EditorError> {
        self.check(at)?;
        if self.blocks.is_empty() {
            self.blocks.push(Block::new(BlockKind::Paragraph));
        }
        Ok(())
    }

    pub fn insert_text(
        &mut self,
        at: Position,
        text: &str,
        marks: &[Mark],
    ) -> Result<(), EditorError> {
        self.ensure_block(at)?;
        let block = &mut self.blocks[at.block];
        let (mut spans, right) = block.split_at(at.offset);
        spans.push(Span::new(text, marks));
        spans.extend(right);
        block.spans = spans;
        block.normalize();
        Ok(())
    }

    /// Delete `from..to`; blocks between the endpoints are removed and the
    /// endpoint blocks are joined.
    pub fn delete_range(&mut self, from: Position, to: Position) -> Result<(), EditorError> {
        self.check(from)?;
        self.check(to)?;
        if to < from {
            return Err(EditorError::InvalidPosition {
                block: to.block,
                offset: to.offset,
            });
        }
        if from == to || self.blocks.is_empty() {
            return Ok(());
        }

        let (mut spans, _) = self.blocks[from.block].split_at(from.offset);
        let (_, right) = self.blocks[to.block].split_at(to.offset);
        spans.extend(right);

        let block = &mut self.blocks[from.block];
        block.spans = spans;
        block.normalize();
        self.blocks.drain(from.block + 1..=to.block);
        Ok(())
    }

    /// Splice a parsed fragment in at `at`. The first fragment block joins
    /// the block at `at`; the remainder of that block moves to the end of
    /// the last fragment block.
    pub fn insert_fragment(
        &mut self,
        at: Position,
        fragment: RichDocument,
    ) -> Result<(), EditorError> {
        self.ensure_block(at)?;
        let mut incoming = fragment.blocks.into_iter();
        let Some(first) = incoming.next() else {
            return Ok(());
        };
        let rest: Vec<Block> = incoming.collect();

        let target = &mut self.blocks[at.block];
        let (mut left, right) = target.split_at(at.offset);
        if target.is_empty() {
            target.kind = first.kind.clone();
        }
        left.extend(first.spans);

        if rest.is_empty() {
            left.extend(right);
            target.spans = left;
            target.normalize();
            return Ok(());
        }

        target.spans = left;
        target.normalize();
        let mut tail = rest;
        if let Some(last) = tail.last_mut() {
            last.spans.extend(right);
            last.normalize();
        }
        let insert_at = at.block + 1;
        self.blocks.splice(insert_at..insert_at, tail);
        Ok(())
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let mut ordinal = 0;
        for (index, block) in self.blocks.iter().enumerate() {
            if index > 0 {
                let both_items = matches!(block.kind, BlockKind::ListItem { .. })
                    && matches!(self.blocks[index - 1].kind, BlockKind::ListItem { .. });
                out.push_str(if both_items { "\n" } else { "\n\n" });
            }
            match &block.kind {
                BlockKind::ListItem { ordered: true } => ordinal += 1,
                _ => ordinal = 0,
            }

            match &block.kind {
                BlockKind::Paragraph => out.push_str(&inline_markdown(&block.spans)),
                BlockKind::Heading(level) => {
                    out.push_str(&"#".repeat(usize::from(*level)));
                    out.push(' ');
                    out.push_str(&inline_markdown(&block.spans));
                }
                BlockKind::CodeBlock { language } => {
                    out.push_str("```");
                    out.push_str(language.as_deref().unwrap_or_default());
                    out.push('\n');
                    out.push_str(&block.text());
                    out.push_str("\n```");
                }
                BlockKind::ListItem { ordered } => {
                    if *ordered {
                        out.push_str(&format!("{ordinal}. "));
                    } else {
                        out.push_str("- ");
                    }
                    out.push_str(&inline_markdown(&block.spans));
                }
            }
        }
        out
    }

    /// Markdown of the committed content only.
    pub fn committed_markdown(&self) -> String {
        self.without_ghost().to_markdown()
    }

    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(Block::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn byte_index(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

fn inline_markdown(spans: &[Span]) -> String {
    let mut out = String::new();
    for span in spans {
        let mut text = span.text.clone();
        if span.has(Mark::Code) {
            text = format!("`{text}`");
        }
        if span.has(Mark::Italic) {
            text = format!("*{text}*");
        }
        if span.has(Mark::Bold) {
            text = format!("**{text}**");
        }
        out.push_str(&text);
    }
    out
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    current: Option<Block>,
    marks: Vec<Mark>,
    lists: Vec<bool>,
}

impl BlockBuilder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Paragraph) => {
                if self.current.is_none() {
                    self.current = Some(Block::new(BlockKind::Paragraph));
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if matches!(
                    self.current.as_ref().map(|block| &block.kind),
                    Some(BlockKind::Paragraph)
                ) {
                    self.flush();
                }
            }
            Event::Start(Tag::Heading { level, .. }) => {
                self.flush();
                self.current = Some(Block::new(BlockKind::Heading(level as u8)));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                self.flush();
                let language = match kind {
                    CodeBlockKind::Fenced(info) if !info.trim().is_empty() => {
                        Some(info.trim().to_string())
                    }
                    _ => None,
                };
                self.current = Some(Block::new(BlockKind::CodeBlock { language }));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(block) = self.current.as_mut() {
                    if let Some(last) = block.spans.last_mut() {
                        let trimmed = last.text.trim_end_matches('\n').len();
                        last.text.truncate(trimmed);
                    }
                }
                self.flush();
            }
            Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::Item) => self.flush(),
            Event::Start(Tag::List(start)) => {
                self.flush();
                self.lists.push(start.is_some());
            }
            Event::End(TagEnd::List(_)) => {
                self.lists.pop();
            }
            Event::Start(Tag::Item) => {
                self.flush();
                let ordered = self.lists.last().copied().unwrap_or(false);
                self.current = Some(Block::new(BlockKind::ListItem { ordered }));
            }
            Event::Start(Tag::Emphasis) => self.marks.push(Mark::Italic),
            Event::Start(Tag::Strong) => self.marks.push(Mark::Bold),
            Event::End(TagEnd::Emphasis) => self.pop_mark(Mark::Italic),
            Event::End(TagEnd::Strong) => self.pop_mark(Mark::Bold),
            Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => {
                let marks = self.marks.clone();
                self.push(&text, &marks);
            }
            Event::Code(text) => {
                let mut marks = self.marks.clone();
                marks.push(Mark::Code);
                self.push(&text, &marks);
            }
            Event::SoftBreak | Event::HardBreak => {
                let marks = self.marks.clone();
                self.push("\n", &marks);
            }
            _ => {}
        }
    }

    fn pop_mark(&mut self, mark: Mark) {
        if let Some(index) = self.marks.iter().rposition(|m| *m == mark) {
            self.marks.remove(index);
        }
    }

    fn push(&mut self, text: &str, marks: &[Mark]) {
        self.current
            .get_or_insert_with(|| Block::new(BlockKind::Paragraph))
            .spans
            .push(Span::new(text, marks));
    }

    fn flush(&mut self) {
        if let Some(mut block) = self.current.take() {
            block.normalize();
            let keep = !block.is_empty() || matches!(block.kind, BlockKind::CodeBlock { .. });
            if keep {
                self.blocks.push(block);
            }
        }
    }

    fn finish(mut self) -> RichDocument {
        self.flush();
        RichDocument {
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_roundtrips_through_blocks() {
        let source = "# Title\n\nHello **bold** and *it* with `code`.\n\n- a\n- b\n\n```rust\nfn main() {}\n```";
        let doc = RichDocument::from_markdown(source);
        assert_eq!(doc.blocks.len(), 5);
        assert_eq!(doc.blocks[0].kind, BlockKind::Heading(1));
        assert_eq!(doc.blocks[2].kind, BlockKind::ListItem { ordered: false });
        assert_eq!(
            doc.blocks[4].kind,
            BlockKind::CodeBlock {
                language: Some("rust".to_string())
            }
        );
        assert_eq!(doc.to_markdown(), source);
    }

    #[test]
    fn ordered_lists_are_renumbered() {
        let doc = RichDocument::from_markdown("1. one\n2. two");
        assert_eq!(doc.blocks[1].kind, BlockKind::ListItem { ordered: true });
        assert_eq!(doc.to_markdown(), "1. one\n2. two");
    }

    #[test]
    fn insert_text_merges_matching_marks() {
        let mut doc = RichDocument::from_markdown("Hello world");
        doc.insert_text(Position::new(0, 5), ",", &[]).unwrap();
        assert_eq!(doc.blocks[0].spans.len(), 1);
        assert_eq!(doc.plain_text(), "Hello, world");

        doc.insert_text(Position::new(0, 12), "!", &[Mark::Bold])
            .unwrap();
        assert_eq!(doc.blocks[0].spans.len(), 2);
        assert_eq!(doc.to_markdown(), "Hello, world**!**");
    }

    #[test]
    fn insert_into_empty_document_creates_paragraph() {
        let mut doc = RichDocument::new();
        doc.insert_text(Position::default(), "hi", &[]).unwrap();
        assert_eq!(doc.blocks, vec![Block::paragraph("hi")]);
    }

    #[test]
    fn out_of_range_positions_are_rejected() {
        let mut doc = RichDocument::from_markdown("abc");
        assert!(matches!(
            doc.insert_text(Position::new(0, 4), "x", &[]),
            Err(EditorError::InvalidPosition { .. })
        ));
        assert!(doc.insert_text(Position::new(1, 0), "x", &[]).is_err());
    }

    #[test]
    fn delete_range_joins_blocks() {
        let mut doc = RichDocument::from_markdown("first\n\nsecond\n\nthird");
        doc.delete_range(Position::new(0, 3), Position::new(2, 2))
            .unwrap();
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(doc.plain_text(), "firird");
    }

    #[test]
    fn ghost_spans_are_excluded_from_committed_markdown() {
        let mut doc = RichDocument::from_markdown("Intro");
        doc.insert_text(doc.end(), " streaming", &[Mark::Ghost])
            .unwrap();
        assert!(doc.has_ghost());
        assert_eq!(doc.ghost_text(), " streaming");
        assert_eq!(doc.committed_markdown(), "Intro");
        assert_eq!(doc.to_markdown(), "Intro streaming");
    }

    #[test]
    fn fragment_splices_blocks_at_position() {
        let mut doc = RichDocument::from_markdown("before after");
        let fragment = RichDocument::from_markdown("one\n\n## two\n\nthree");
        doc.insert_fragment(Position::new(0, 7), fragment).unwrap();
        assert_eq!(doc.blocks.len(), 3);
        assert_eq!(doc.blocks[0].text(), "before one");
        assert_eq!(doc.blocks[1].kind, BlockKind::Heading(2));
        assert_eq!(doc.blocks[2].text(), "threeafter");
    }

    #[test]
    fn fragment_into_empty_document_keeps_block_kinds() {
        let mut doc = RichDocument::new();
        doc.insert_fragment(Position::default(), RichDocument::from_markdown("# Head\n\nbody"))
            .unwrap();
        assert_eq!(doc.to_markdown(), "# Head\n\nbody");
    }
}
