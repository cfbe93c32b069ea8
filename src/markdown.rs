//! Markdown rendering for assistant answers. The backend speaks markdown;
//! this flattens it into a column of styled text blocks rather than a full
//! layout engine, which is all a chat transcript needs.

use iced::widget::{container, horizontal_rule, text, Column};
use iced::{Element, Font, Length};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(String),
    Heading { level: u8, text: String },
    Code(String),
    ListItem { depth: usize, marker: String, text: String },
    Quote(String),
    Rule,
}

fn heading_rank(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

pub fn parse_blocks(source: &str) -> Vec<Block> {
    let parser = Parser::new_ext(source, Options::ENABLE_STRIKETHROUGH);

    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    // One entry per open list; `Some(n)` carries the next ordered number.
    let mut list_stack: Vec<Option<u64>> = Vec::new();

    fn flush_paragraph(current: &mut String, blocks: &mut Vec<Block>, in_quote: bool) {
        let text = std::mem::take(current);
        let text = text.trim();
        if !text.is_empty() {
            if in_quote {
                blocks.push(Block::Quote(text.to_string()));
            } else {
                blocks.push(Block::Paragraph(text.to_string()));
            }
        }
    }

    for event in parser {
        match event {
            Event::Start(Tag::Heading(..)) => {
                flush_paragraph(&mut current, &mut blocks, in_quote);
            }
            Event::End(Tag::Heading(level, ..)) => {
                blocks.push(Block::Heading {
                    level: heading_rank(level),
                    text: std::mem::take(&mut current).trim().to_string(),
                });
            }
            Event::Start(Tag::CodeBlock(_)) => {
                flush_paragraph(&mut current, &mut blocks, in_quote);
            }
            Event::End(Tag::CodeBlock(_)) => {
                blocks.push(Block::Code(
                    std::mem::take(&mut current).trim_end().to_string(),
                ));
            }
            Event::Start(Tag::List(start)) => {
                flush_paragraph(&mut current, &mut blocks, in_quote);
                list_stack.push(start);
            }
            Event::End(Tag::List(_)) => {
                list_stack.pop();
            }
            Event::End(Tag::Item) => {
                let marker = match list_stack.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                let text = std::mem::take(&mut current).trim().to_string();
                if !text.is_empty() {
                    blocks.push(Block::ListItem {
                        depth: list_stack.len().saturating_sub(1),
                        marker,
                        text,
                    });
                }
            }
            Event::Start(Tag::BlockQuote) => {
                flush_paragraph(&mut current, &mut blocks, in_quote);
                in_quote = true;
            }
            Event::End(Tag::BlockQuote) => {
                flush_paragraph(&mut current, &mut blocks, true);
                in_quote = false;
            }
            Event::End(Tag::Paragraph) => {
                // Paragraphs inside a list item stay part of that item.
                if list_stack.is_empty() {
                    flush_paragraph(&mut current, &mut blocks, in_quote);
                } else {
                    current.push('\n');
                }
            }
            Event::Text(t) => current.push_str(&t),
            Event::Code(code) => {
                current.push('`');
                current.push_str(&code);
                current.push('`');
            }
            Event::SoftBreak => current.push(' '),
            Event::HardBreak => current.push('\n'),
            Event::Rule => {
                flush_paragraph(&mut current, &mut blocks, in_quote);
                blocks.push(Block::Rule);
            }
            _ => {}
        }
    }
    flush_paragraph(&mut current, &mut blocks, in_quote);

    blocks
}

pub fn view<'a, Message: 'a>(source: &str) -> Element<'a, Message> {
    let mut column = Column::new().spacing(8);
    for block in parse_blocks(source) {
        column = column.push(block_view(block));
    }
    column.into()
}

fn block_view<'a, Message: 'a>(block: Block) -> Element<'a, Message> {
    match block {
        Block::Paragraph(body) => text(body).size(15).into(),
        Block::Heading { level, text: title } => {
            let size = match level {
                1 => 23,
                2 => 20,
                3 => 18,
                _ => 16,
            };
            text(title).size(size).into()
        }
        Block::Code(code) => container(text(code).size(14).font(Font::MONOSPACE))
            .style(container::bordered_box)
            .padding(8)
            .width(Length::Fill)
            .into(),
        Block::ListItem { depth, marker, text: body } => {
            text(format!("{}{}{}", "    ".repeat(depth), marker, body))
                .size(15)
                .into()
        }
        Block::Quote(body) => text(format!("▍ {body}")).size(15).into(),
        Block::Rule => horizontal_rule(1).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_and_headings() {
        let blocks = parse_blocks("# Title\n\nFirst line.\nStill first.\n\nSecond.");
        assert_eq!(
            blocks,
            vec![
                Block::Heading { level: 1, text: "Title".to_string() },
                Block::Paragraph("First line. Still first.".to_string()),
                Block::Paragraph("Second.".to_string()),
            ]
        );
    }

    #[test]
    fn fenced_code_is_kept_verbatim() {
        let blocks = parse_blocks("```\nlet x = 1;\nlet y = 2;\n```");
        assert_eq!(blocks, vec![Block::Code("let x = 1;\nlet y = 2;".to_string())]);
    }

    #[test]
    fn ordered_lists_count_from_their_start() {
        let blocks = parse_blocks("3. three\n4. four");
        assert_eq!(
            blocks,
            vec![
                Block::ListItem { depth: 0, marker: "3. ".to_string(), text: "three".to_string() },
                Block::ListItem { depth: 0, marker: "4. ".to_string(), text: "four".to_string() },
            ]
        );
    }

    #[test]
    fn latex_math_passes_through_as_plain_text() {
        // No math renderer; `$...$` markup must at least survive verbatim.
        let blocks = parse_blocks("The loss $L = \\sum_i x_i^2$ converges.");
        assert_eq!(
            blocks,
            vec![Block::Paragraph(
                "The loss $L = \\sum_i x_i^2$ converges.".to_string()
            )]
        );
    }

    #[test]
    fn inline_code_survives_flattening() {
        let blocks = parse_blocks("Call `split_text` first.");
        assert_eq!(
            blocks,
            vec![Block::Paragraph("Call `split_text` first.".to_string())]
        );
    }
}
