// src/markdown.rs
//! Markdown to ratatui lines.
//!
//! Input is often a prefix cut mid-token by the reveal engine. pulldown-cmark accepts any
//! text, so an unfinished `**`, fence or table simply renders as literal text until the
//! rest arrives.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

pub fn render(markdown: &str, base: Style) -> Vec<Line<'static>> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut renderer = Renderer::new(base);
    for event in Parser::new_ext(markdown, options) {
        renderer.handle(event);
    }
    renderer.finish()
}

struct Renderer {
    base: Style,
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    styles: Vec<Style>,
    lists: Vec<Option<u64>>,
    links: Vec<String>,
    in_code_block: bool,
    first_cell: bool,
}

impl Renderer {
    fn new(base: Style) -> Self {
        Renderer {
            base,
            lines: Vec::new(),
            current: Vec::new(),
            styles: Vec::new(),
            lists: Vec::new(),
            links: Vec::new(),
            in_code_block: false,
            first_cell: true,
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or(self.base)
    }

    fn push_style(&mut self, patch: Style) {
        let style = self.style().patch(patch);
        self.styles.push(style);
    }

    fn code_style(&self) -> Style {
        self.base.fg(Color::Yellow)
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.current)));
        }
    }

    fn blank(&mut self) {
        self.flush();
        if self.lines.last().is_some_and(|line| line.width() > 0) {
            self.lines.push(Line::default());
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if self.in_code_block {
                    for line in text.lines() {
                        self.current.push(Span::styled(format!("  {}", line), self.code_style()));
                        self.flush();
                    }
                } else {
                    self.current.push(Span::styled(text.to_string(), self.style()));
                }
            }
            Event::Code(code) => self.current.push(Span::styled(code.to_string(), self.code_style())),
            Event::SoftBreak | Event::HardBreak => self.flush(),
            Event::Rule => {
                self.flush();
                self.lines.push(Line::styled("────────────", self.base.add_modifier(Modifier::DIM)));
            }
            Event::TaskListMarker(done) => {
                self.current.push(Span::styled(if done { "[x] " } else { "[ ] " }, self.style()));
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { .. } => {
                self.flush();
                self.push_style(Style::new().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}. ", n);
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.current.push(Span::styled(format!("{}{}", "  ".repeat(depth), marker), self.base));
            }
            Tag::Strong => self.push_style(Style::new().add_modifier(Modifier::BOLD)),
            Tag::Emphasis => self.push_style(Style::new().add_modifier(Modifier::ITALIC)),
            Tag::Strikethrough => self.push_style(Style::new().add_modifier(Modifier::CROSSED_OUT)),
            Tag::Link { dest_url, .. } => {
                self.links.push(dest_url.to_string());
                self.push_style(Style::new().fg(Color::Cyan).add_modifier(Modifier::UNDERLINED));
            }
            Tag::CodeBlock(_) => {
                self.flush();
                self.in_code_block = true;
            }
            Tag::Table(_) => self.flush(),
            Tag::TableHead | Tag::TableRow => {
                self.flush();
                self.first_cell = true;
            }
            Tag::TableCell => {
                if !self.first_cell {
                    self.current.push(Span::styled(" │ ", self.base.add_modifier(Modifier::DIM)));
                }
                self.first_cell = false;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.lists.is_empty() {
                    self.blank();
                } else {
                    self.flush();
                }
            }
            TagEnd::Heading(_) => {
                self.styles.pop();
                self.blank();
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            TagEnd::Item => self.flush(),
            TagEnd::Strong | TagEnd::Emphasis | TagEnd::Strikethrough => {
                self.styles.pop();
            }
            TagEnd::Link => {
                self.styles.pop();
                if let Some(url) = self.links.pop() {
                    self.current.push(Span::styled(format!(" ({})", url), self.base.add_modifier(Modifier::DIM)));
                }
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.blank();
            }
            TagEnd::TableHead | TagEnd::TableRow => self.flush(),
            TagEnd::Table => self.blank(),
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush();
        while self.lines.last().is_some_and(|line| line.width() == 0) {
            self.lines.pop();
        }
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn renders_ordered_and_bullet_lists() {
        let lines = render("建议流程：\n\n1. **商标查询**：近似查询。\n2. 提交申请\n\n- 发明专利\n- 外观设计", Style::default());
        assert_eq!(
            plain(&lines),
            ["建议流程：", "", "1. 商标查询：近似查询。", "2. 提交申请", "", "• 发明专利", "• 外观设计"]
        );
        let bold = lines[2].spans.iter().find(|span| span.content == "商标查询").unwrap();
        assert!(bold.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn nested_lists_are_indented() {
        let lines = render("1. 源代码：\n   - 前后各30页\n2. 说明文档", Style::default());
        let text = plain(&lines);
        assert!(text.contains(&"1. 源代码：".to_string()));
        assert!(text.contains(&"  • 前后各30页".to_string()));
        assert!(text.contains(&"2. 说明文档".to_string()));
    }

    #[test]
    fn partial_markup_degrades_to_text() {
        assert_eq!(plain(&render("关于**商标", Style::default())), ["关于**商标"]);
        assert_eq!(plain(&render("[专利法](https://www.cnip", Style::default())), ["[专利法](https://www.cnip"]);

        let fence = plain(&render("示例：\n\n```\nlet x = 1;", Style::default()));
        assert_eq!(fence, ["示例：", "", "  let x = 1;"]);
    }

    #[test]
    fn every_prefix_renders() {
        let source = "| 类型 | 期限 |\n|---|---|\n| 发明 | 20年 |\n\n> 引用 `code` [link](http://x)\n\n# 标题\n\n---";
        let chars: Vec<char> = source.chars().collect();
        for end in 0..=chars.len() {
            let prefix: String = chars[..end].iter().collect();
            render(&prefix, Style::default());
        }
    }

    #[test]
    fn tables_and_links() {
        let lines = render("| 类型 | 期限 |\n|---|---|\n| 发明 | 20年 |\n\n见[官网](https://www.cnipa.gov.cn/)", Style::default());
        let text = plain(&lines);
        assert_eq!(text[0], "类型 │ 期限");
        assert_eq!(text[1], "发明 │ 20年");
        assert_eq!(text.last().unwrap(), "见官网 (https://www.cnipa.gov.cn/)");
    }
}
