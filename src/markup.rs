//! Markdown in comments and media descriptions, flattened to terminal text.
//!
//! Raw HTML is dropped and images are never fetched: an image reference is
//! shown as the markdown source it was written as.

use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

const ZERO_WIDTH: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}', '\u{FEFF}',
];

pub fn strip_leading_zero_width(input: &str) -> &str {
    input.trim_start_matches(ZERO_WIDTH)
}

pub fn render(input: &str) -> Text<'static> {
    let source = strip_leading_zero_width(input);
    let mut writer = Writer::new(source);
    writer.run();
    writer.into_text()
}

enum Block {
    Text(String),
    Heading(String),
    Item { indent: usize, marker: String, text: String },
    Quote { depth: usize, text: String },
    Code(String),
    Blank,
}

struct ListState {
    ordered: bool,
    next: u64,
}

struct Writer<'a> {
    source: &'a str,
    blocks: Vec<Block>,
    buffer: String,
    lists: Vec<ListState>,
    item: Option<(usize, String)>,
    quote_depth: usize,
    heading: bool,
    code: Option<String>,
    links: Vec<String>,
    image_depth: usize,
}

impl<'a> Writer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            blocks: Vec::new(),
            buffer: String::new(),
            lists: Vec::new(),
            item: None,
            quote_depth: 0,
            heading: false,
            code: None,
            links: Vec::new(),
            image_depth: 0,
        }
    }

    fn run(&mut self) {
        let mut opts = Options::empty();
        opts.insert(Options::ENABLE_STRIKETHROUGH);
        let source = self.source;
        for (event, range) in Parser::new_ext(source, opts).into_offset_iter() {
            if self.image_depth > 0 {
                match event {
                    Event::Start(Tag::Image { .. }) => self.image_depth += 1,
                    Event::End(TagEnd::Image) => self.image_depth -= 1,
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(tag) => self.start(tag, range),
                Event::End(tag) => self.end(tag),
                Event::Text(text) => match self.code.as_mut() {
                    Some(code) => code.push_str(&text),
                    None => self.buffer.push_str(&text),
                },
                Event::Code(code) => {
                    self.buffer.push('`');
                    self.buffer.push_str(&code);
                    self.buffer.push('`');
                }
                Event::SoftBreak => self.buffer.push(' '),
                Event::HardBreak => self.flush(),
                Event::Rule => {
                    self.flush();
                    self.blocks.push(Block::Text("―".repeat(20)));
                }
                Event::TaskListMarker(done) => {
                    self.buffer.push_str(if done { "[x] " } else { "[ ] " });
                }
                Event::Html(_) | Event::InlineHtml(_) | Event::FootnoteReference(_) => {}
            }
        }
        self.flush();
    }

    fn start(&mut self, tag: Tag<'_>, range: Range<usize>) {
        match tag {
            Tag::Paragraph => self.flush(),
            Tag::Heading { .. } => {
                self.flush();
                self.heading = true;
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        self.blocks.push(Block::Text(format!("[{lang}]")));
                    }
                }
                self.code = Some(String::new());
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(ListState {
                    ordered: start.is_some(),
                    next: start.unwrap_or(1),
                });
            }
            Tag::Item => {
                self.flush();
                let indent = self.lists.len().saturating_sub(1);
                if let Some(list) = self.lists.last_mut() {
                    let marker = if list.ordered {
                        let marker = format!("{}.", list.next);
                        list.next += 1;
                        marker
                    } else {
                        "•".to_string()
                    };
                    self.item = Some((indent, marker));
                }
            }
            Tag::Link { dest_url, .. } => self.links.push(dest_url.into_string()),
            Tag::Image { .. } => {
                self.buffer.push_str(&self.source[range]);
                self.image_depth = 1;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush();
                self.blocks.push(Block::Blank);
            }
            TagEnd::Heading(_) => {
                self.flush();
                self.heading = false;
                self.blocks.push(Block::Blank);
            }
            TagEnd::BlockQuote => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    for line in code.trim_end_matches('\n').split('\n') {
                        self.blocks.push(Block::Code(line.to_string()));
                    }
                    self.blocks.push(Block::Blank);
                }
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
            }
            TagEnd::Item => {
                self.flush();
                self.item = None;
            }
            TagEnd::Link => {
                if let Some(url) = self.links.pop() {
                    if !self.buffer.ends_with(url.as_str()) {
                        self.buffer.push_str(&format!(" ({url})"));
                    }
                }
            }
            _ => {}
        }
    }

    fn flush(&mut self) {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            return;
        }
        let block = if self.heading {
            Block::Heading(text)
        } else if let Some((indent, marker)) = &self.item {
            Block::Item {
                indent: *indent,
                marker: marker.clone(),
                text,
            }
        } else if self.quote_depth > 0 {
            Block::Quote {
                depth: self.quote_depth,
                text,
            }
        } else {
            Block::Text(text)
        };
        self.blocks.push(block);
    }

    fn into_text(mut self) -> Text<'static> {
        while matches!(self.blocks.last(), Some(Block::Blank)) {
            self.blocks.pop();
        }
        let lines: Vec<Line<'static>> = self
            .blocks
            .into_iter()
            .map(|block| match block {
                Block::Text(text) => Line::from(text),
                Block::Heading(text) => Line::from(Span::styled(
                    text,
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Block::Item {
                    indent,
                    marker,
                    text,
                } => Line::from(vec![
                    Span::raw("  ".repeat(indent)),
                    Span::styled(format!("{marker} "), Style::default().fg(Color::Yellow)),
                    Span::raw(text),
                ]),
                Block::Quote { depth, text } => Line::from(Span::styled(
                    format!("{} {text}", ">".repeat(depth)),
                    Style::default().fg(Color::Green),
                )),
                Block::Code(text) => {
                    Line::from(Span::styled(text, Style::default().fg(Color::Cyan)))
                }
                Block::Blank => Line::default(),
            })
            .collect();
        Text::from(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_text(input: &str) -> String {
        render(input)
            .lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn zero_width_prefix_is_removed() {
        assert_eq!(strip_leading_zero_width("\u{200B}\u{FEFF}hi\u{200B}"), "hi\u{200B}");
        assert_eq!(plain_text("\u{200B}# Title"), "Title");
    }

    #[test]
    fn images_stay_as_source() {
        assert_eq!(
            plain_text("look ![a cat](https://x/cat.png) here"),
            "look ![a cat](https://x/cat.png) here"
        );
    }

    #[test]
    fn html_is_dropped_and_links_keep_target() {
        assert_eq!(
            plain_text("<script>alert(1)</script>\n\nsee [docs](https://d.example)"),
            "see docs (https://d.example)"
        );
    }

    #[test]
    fn lists_and_code() {
        let text = plain_text("1. one\n2. two\n\n```\nlet x = 1;\n```");
        assert_eq!(text, "1. one\n2. two\nlet x = 1;");
    }
}
