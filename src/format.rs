//! Renders raw assistant text into styled terminal lines.
//!
//! The pipeline is sanitize -> markdown -> highlight, and each later stage
//! is optional: the markdown and highlight backends are installed by a
//! background loader, and any stage failing degrades to plainer output
//! instead of surfacing an error. Messages must always display.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;

const CAPABILITY_WATCH_ATTEMPTS: u32 = 20;

/// Marker for the markdown capability. Parsing itself is pure, but the
/// formatter treats it as an installable backend so rendering degrades to
/// plain lines until the loader has run.
pub struct MarkdownBackend;

pub struct HighlightBackend {
    syntaxes: SyntaxSet,
    dark: Theme,
    light: Theme,
}

/// Capability gate for the two optional renderers. `format` consults it on
/// every call, so output is correct whether a backend arrives before, after,
/// or never.
#[derive(Default)]
pub struct RenderBackends {
    markdown: OnceLock<MarkdownBackend>,
    highlight: OnceLock<HighlightBackend>,
}

impl RenderBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_markdown(&self) {
        let _ = self.markdown.set(MarkdownBackend);
    }

    pub fn install_highlight(&self, backend: HighlightBackend) {
        let _ = self.highlight.set(backend);
    }

    pub fn markdown_available(&self) -> bool {
        self.markdown.get().is_some()
    }

    pub fn highlight_available(&self) -> bool {
        self.highlight.get().is_some()
    }
}

/// Load the backends off the event loop. Syntax and theme definitions are
/// the slow part, so they go through `spawn_blocking`.
pub fn spawn_loader(backends: Arc<RenderBackends>) {
    tokio::spawn(async move {
        backends.install_markdown();
        match tokio::task::spawn_blocking(HighlightBackend::load).await {
            Ok(Ok(backend)) => backends.install_highlight(backend),
            Ok(Err(err)) => tracing::warn!(%err, "failed to load highlight backend"),
            Err(err) => tracing::warn!(%err, "highlight loader task failed"),
        }
    });
}

/// Bounded readiness watch: checks every 500ms and stops as soon as both
/// backends are present, or gives up after the attempt budget.
pub fn spawn_capability_watch(backends: Arc<RenderBackends>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        for _ in 0..CAPABILITY_WATCH_ATTEMPTS {
            interval.tick().await;
            if backends.markdown_available() && backends.highlight_available() {
                tracing::info!("markdown and highlight backends ready");
                return;
            }
        }
        tracing::warn!("render backends still loading; plain-text fallback stays active");
    });
}

#[derive(Clone)]
pub struct Formatter {
    backends: Arc<RenderBackends>,
}

impl Formatter {
    pub fn new(backends: Arc<RenderBackends>) -> Self {
        Self { backends }
    }

    /// Render assistant text to styled lines. Never fails: formatting
    /// problems fall back to plain text.
    pub fn render(&self, raw: &str, dark: bool) -> Text<'static> {
        let clean = sanitize(raw);
        if self.backends.markdown.get().is_none() {
            return plain_lines(&clean);
        }
        match parse_markdown(&clean) {
            Ok(blocks) => self.render_blocks(blocks, dark),
            Err(err) => {
                tracing::warn!(%err, "markdown rendering failed, using plain text");
                plain_lines(&clean)
            }
        }
    }

    fn render_blocks(&self, blocks: Vec<MarkdownBlock>, dark: bool) -> Text<'static> {
        let mut lines: Vec<Line<'static>> = Vec::new();
        for block in blocks {
            match block {
                MarkdownBlock::Paragraph(segments) => {
                    lines.extend(segment_lines(&segments, dark));
                    lines.push(Line::default());
                }
                MarkdownBlock::Heading { level, segments } => {
                    let style = Style::default()
                        .fg(if dark { Color::Cyan } else { Color::Blue })
                        .add_modifier(Modifier::BOLD);
                    let mut spans = vec![Span::styled("#".repeat(level as usize) + " ", style)];
                    for line in segment_lines(&segments, dark) {
                        spans.extend(
                            line.spans
                                .into_iter()
                                .map(|s| Span::styled(s.content, style)),
                        );
                    }
                    lines.push(Line::from(spans));
                    lines.push(Line::default());
                }
                MarkdownBlock::CodeBlock { lang, code } => {
                    lines.extend(self.render_code_block(&lang, &code, dark));
                    lines.push(Line::default());
                }
                MarkdownBlock::List(items) => {
                    for item in items {
                        for (i, line) in segment_lines(&item, dark).into_iter().enumerate() {
                            let bullet = if i == 0 { "• " } else { "  " };
                            let mut spans = vec![Span::raw(bullet)];
                            spans.extend(line.spans);
                            lines.push(Line::from(spans));
                        }
                    }
                    lines.push(Line::default());
                }
                MarkdownBlock::Rule => {
                    lines.push(Line::from(Span::styled(
                        "─".repeat(30),
                        Style::default().fg(Color::DarkGray),
                    )));
                    lines.push(Line::default());
                }
            }
        }
        // Drop the trailing blank separator
        if lines.last().is_some_and(|l| l.spans.is_empty()) {
            lines.pop();
        }
        Text::from(lines)
    }

    fn render_code_block(&self, lang: &str, code: &str, dark: bool) -> Vec<Line<'static>> {
        if let Some(backend) = self.backends.highlight.get() {
            match backend.highlight_block(lang, code, dark) {
                Ok(lines) => return lines,
                Err(err) => {
                    // One bad block must not take down the message
                    tracing::warn!(%err, lang, "highlighting failed for code block");
                }
            }
        }
        let style = Style::default().fg(if dark { Color::Gray } else { Color::DarkGray });
        code.lines()
            .map(|line| Line::from(Span::styled(format!("  {line}"), style)))
            .collect()
    }
}

impl HighlightBackend {
    pub fn load() -> Result<Self> {
        let syntaxes = SyntaxSet::load_defaults_newlines();
        let themes = ThemeSet::load_defaults();
        let dark = themes
            .themes
            .get("base16-ocean.dark")
            .cloned()
            .context("missing dark highlight theme")?;
        let light = themes
            .themes
            .get("InspiredGitHub")
            .cloned()
            .context("missing light highlight theme")?;
        Ok(Self {
            syntaxes,
            dark,
            light,
        })
    }

    fn highlight_block(&self, lang: &str, code: &str, dark: bool) -> Result<Vec<Line<'static>>> {
        let syntax = self
            .syntaxes
            .find_syntax_by_token(lang)
            .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());
        let theme = if dark { &self.dark } else { &self.light };
        let mut highlighter = HighlightLines::new(syntax, theme);

        let mut lines = Vec::new();
        for line in syntect::util::LinesWithEndings::from(code) {
            let ranges = highlighter.highlight_line(line, &self.syntaxes)?;
            let spans: Vec<Span<'static>> = ranges
                .into_iter()
                .map(|(style, text)| {
                    Span::styled(
                        text.trim_end_matches('\n').to_string(),
                        convert_style(style),
                    )
                })
                .collect();
            lines.push(Line::from(spans));
        }
        Ok(lines)
    }
}

fn convert_style(style: syntect::highlighting::Style) -> Style {
    let fg = style.foreground;
    let mut out = Style::default().fg(Color::Rgb(fg.r, fg.g, fg.b));
    if style.font_style.contains(FontStyle::BOLD) {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.font_style.contains(FontStyle::ITALIC) {
        out = out.add_modifier(Modifier::ITALIC);
    }
    out
}

/// Strip control characters so model output cannot inject terminal escape
/// sequences. Newlines and tabs survive; everything else control is the
/// terminal's equivalent of unescaped markup.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn plain_lines(text: &str) -> Text<'static> {
    Text::from(
        text.lines()
            .map(|line| Line::from(line.to_string()))
            .collect::<Vec<_>>(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkdownBlock {
    Paragraph(Vec<InlineSegment>),
    Heading {
        level: u8,
        segments: Vec<InlineSegment>,
    },
    CodeBlock {
        lang: String,
        code: String,
    },
    List(Vec<Vec<InlineSegment>>),
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InlineSegment {
    Text {
        content: String,
        bold: bool,
        italic: bool,
    },
    Code(String),
    Break,
}

fn segment_lines(segments: &[InlineSegment], dark: bool) -> Vec<Line<'static>> {
    let code_style = Style::default().fg(if dark { Color::Yellow } else { Color::Magenta });
    let mut lines = Vec::new();
    let mut spans: Vec<Span<'static>> = Vec::new();
    for segment in segments {
        match segment {
            InlineSegment::Text {
                content,
                bold,
                italic,
            } => {
                let mut style = Style::default();
                if *bold {
                    style = style.add_modifier(Modifier::BOLD);
                }
                if *italic {
                    style = style.add_modifier(Modifier::ITALIC);
                }
                spans.push(Span::styled(content.clone(), style));
            }
            InlineSegment::Code(code) => {
                spans.push(Span::styled(code.clone(), code_style));
            }
            InlineSegment::Break => {
                lines.push(Line::from(std::mem::take(&mut spans)));
            }
        }
    }
    if !spans.is_empty() {
        lines.push(Line::from(spans));
    }
    lines
}

/// Parse into an owned block representation. pulldown-cmark does not fail
/// on input text, but the fallible seam keeps the plain-text fallback path
/// honest should the backend ever change.
fn parse_markdown(source: &str) -> Result<Vec<MarkdownBlock>> {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES;
    let parser = Parser::new_ext(source, options);

    let mut blocks: Vec<MarkdownBlock> = Vec::new();
    let mut segments: Vec<InlineSegment> = Vec::new();
    let mut bold = false;
    let mut italic = false;
    let mut heading_level: u8 = 0;
    let mut in_code_block = false;
    let mut code_lang = String::new();
    let mut code = String::new();
    let mut list_items: Vec<Vec<InlineSegment>> = Vec::new();
    let mut item_segments: Vec<InlineSegment> = Vec::new();
    let mut in_item = false;

    let mut push_text = |text: String,
                         bold: bool,
                         italic: bool,
                         in_item: bool,
                         segments: &mut Vec<InlineSegment>,
                         item_segments: &mut Vec<InlineSegment>| {
        let segment = InlineSegment::Text {
            content: text,
            bold,
            italic,
        };
        if in_item {
            item_segments.push(segment);
        } else {
            segments.push(segment);
        }
    };

    for event in parser {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                if !segments.is_empty() {
                    blocks.push(MarkdownBlock::Paragraph(std::mem::take(&mut segments)));
                }
                in_code_block = true;
                code.clear();
                code_lang = match kind {
                    CodeBlockKind::Fenced(lang) => lang.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                blocks.push(MarkdownBlock::CodeBlock {
                    lang: std::mem::take(&mut code_lang),
                    code: std::mem::take(&mut code),
                });
            }
            Event::Start(Tag::Heading { level, .. }) => {
                if !segments.is_empty() {
                    blocks.push(MarkdownBlock::Paragraph(std::mem::take(&mut segments)));
                }
                heading_level = level as u8;
            }
            Event::End(TagEnd::Heading(_)) => {
                blocks.push(MarkdownBlock::Heading {
                    level: heading_level,
                    segments: std::mem::take(&mut segments),
                });
                heading_level = 0;
            }
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                if in_item {
                    continue;
                }
                if !segments.is_empty() {
                    blocks.push(MarkdownBlock::Paragraph(std::mem::take(&mut segments)));
                }
            }
            Event::Start(Tag::Strong) => bold = true,
            Event::End(TagEnd::Strong) => bold = false,
            Event::Start(Tag::Emphasis) => italic = true,
            Event::End(TagEnd::Emphasis) => italic = false,
            Event::Start(Tag::List(_)) => {
                if !segments.is_empty() {
                    blocks.push(MarkdownBlock::Paragraph(std::mem::take(&mut segments)));
                }
                list_items.clear();
            }
            Event::End(TagEnd::List(_)) => {
                if in_item && !item_segments.is_empty() {
                    list_items.push(std::mem::take(&mut item_segments));
                    in_item = false;
                }
                blocks.push(MarkdownBlock::List(std::mem::take(&mut list_items)));
            }
            Event::Start(Tag::Item) => {
                if in_item && !item_segments.is_empty() {
                    list_items.push(std::mem::take(&mut item_segments));
                }
                in_item = true;
                item_segments.clear();
            }
            Event::End(TagEnd::Item) => {
                list_items.push(std::mem::take(&mut item_segments));
                in_item = false;
            }
            Event::Code(text) => {
                let segment = InlineSegment::Code(text.to_string());
                if in_item {
                    item_segments.push(segment);
                } else {
                    segments.push(segment);
                }
            }
            Event::Text(text) => {
                if in_code_block {
                    code.push_str(&text);
                } else {
                    push_text(
                        text.to_string(),
                        bold,
                        italic,
                        in_item,
                        &mut segments,
                        &mut item_segments,
                    );
                }
            }
            // Raw HTML is inert in a terminal; show it literally
            Event::Html(html) | Event::InlineHtml(html) => {
                push_text(
                    html.trim_end_matches('\n').to_string(),
                    bold,
                    italic,
                    in_item,
                    &mut segments,
                    &mut item_segments,
                );
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_item {
                    item_segments.push(InlineSegment::Break);
                } else {
                    segments.push(InlineSegment::Break);
                }
            }
            Event::Rule => {
                if !segments.is_empty() {
                    blocks.push(MarkdownBlock::Paragraph(std::mem::take(&mut segments)));
                }
                blocks.push(MarkdownBlock::Rule);
            }
            _ => {}
        }
    }

    if !segments.is_empty() {
        blocks.push(MarkdownBlock::Paragraph(segments));
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(text: &Text<'_>) -> String {
        text.lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|s| s.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn bare_formatter() -> Formatter {
        Formatter::new(Arc::new(RenderBackends::new()))
    }

    fn markdown_formatter() -> Formatter {
        let backends = Arc::new(RenderBackends::new());
        backends.install_markdown();
        Formatter::new(backends)
    }

    #[test]
    fn without_backends_falls_back_to_plain_lines() {
        let text = bare_formatter().render("first\nsecond", true);
        assert_eq!(flatten(&text), "first\nsecond");
    }

    #[test]
    fn control_sequences_are_stripped() {
        let text = markdown_formatter().render("\x1b[2J\x1b[31mred\x07 text", true);
        let flat = flatten(&text);
        assert!(!flat.contains('\x1b'));
        assert!(!flat.contains('\x07'));
        assert!(flat.contains("red"));
    }

    #[test]
    fn script_tag_is_displayed_as_inert_text() {
        let text = markdown_formatter().render("hello <script>alert(1)</script>", true);
        let flat = flatten(&text);
        assert!(flat.contains("<script>"));
        assert!(!flat.contains('\x1b'));
    }

    #[test]
    fn bold_markdown_becomes_bold_span() {
        let text = markdown_formatter().render("a **loud** word", true);
        let has_bold = text.lines.iter().any(|line| {
            line.spans
                .iter()
                .any(|s| s.content == "loud" && s.style.add_modifier.contains(Modifier::BOLD))
        });
        assert!(has_bold);
    }

    #[test]
    fn code_block_renders_without_highlighter() {
        let text = markdown_formatter().render("```yaml\nkind: Pod\n```", true);
        assert!(flatten(&text).contains("kind: Pod"));
    }

    #[test]
    fn unknown_language_still_renders_code() {
        let backends = Arc::new(RenderBackends::new());
        backends.install_markdown();
        backends.install_highlight(HighlightBackend::load().unwrap());
        let formatter = Formatter::new(backends);
        let text = formatter.render("```nosuchlang\nsome code\n```", true);
        assert!(flatten(&text).contains("some code"));
    }

    #[test]
    fn newline_fallback_preserves_every_line() {
        let text = bare_formatter().render("a\n\nb\nc", false);
        assert_eq!(text.lines.len(), 4);
    }

    #[test]
    fn sanitize_keeps_tabs_and_newlines() {
        assert_eq!(sanitize("a\tb\nc\rd\x1b[0m"), "a\tb\ncd[0m");
    }

    #[test]
    fn list_items_get_bullets() {
        let text = markdown_formatter().render("- one\n- two", true);
        let flat = flatten(&text);
        assert!(flat.contains("• one"));
        assert!(flat.contains("• two"));
    }
}
