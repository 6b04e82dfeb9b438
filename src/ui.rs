use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{
        Block, Borders, Clear, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Wrap,
    },
    Frame,
};

use crate::app::{short_context_name, App, ConnectionStatus, InputMode, Popup};
use crate::chat::ChatRole;

/// Chrome colors for the two themes. Message bodies get their colors from
/// the formatter; this covers borders, labels, and the header/footer.
struct Palette {
    accent: Color,
    border: Color,
    dim: Color,
    user: Color,
    assistant: Color,
    chrome_bg: Color,
    chrome_fg: Color,
}

fn palette(dark: bool) -> Palette {
    if dark {
        Palette {
            accent: Color::Cyan,
            border: Color::DarkGray,
            dim: Color::DarkGray,
            user: Color::Cyan,
            assistant: Color::Yellow,
            chrome_bg: Color::DarkGray,
            chrome_fg: Color::White,
        }
    } else {
        Palette {
            accent: Color::Blue,
            border: Color::Gray,
            dim: Color::Gray,
            user: Color::Blue,
            assistant: Color::Magenta,
            chrome_bg: Color::Gray,
            chrome_fg: Color::Black,
        }
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let colors = palette(app.dark_mode);

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_header(app, &colors, frame, header_area);
    render_chat(app, &colors, frame, chat_area);
    render_input(app, &colors, frame, input_area);
    render_footer(app, frame, footer_area);

    match app.popup {
        Popup::ContextPicker => render_context_picker(app, &colors, frame, area),
        Popup::ExamplePicker => render_example_picker(app, &colors, frame, area),
        Popup::ResetConfirm => render_reset_confirm(&colors, frame, area),
        Popup::None => {}
    }
}

fn render_header(app: &App, colors: &Palette, frame: &mut Frame, area: Rect) {
    let context = app
        .current_context
        .as_deref()
        .map(short_context_name)
        .unwrap_or_else(|| "no context".to_string());

    let (status_text, status_color) = match app.connection {
        ConnectionStatus::Connected => ("● connected", Color::Green),
        ConnectionStatus::Disconnected => ("● disconnected", Color::Red),
        ConnectionStatus::Unknown => ("● connecting", colors.dim),
    };

    let title = Line::from(vec![
        Span::styled(
            " kubechat ",
            Style::default().fg(colors.accent).bold(),
        ),
        Span::styled(format!(" {} ", context), Style::default().fg(colors.chrome_fg)),
        Span::raw(" "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(colors.chrome_fg),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(colors.chrome_bg));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, colors: &Palette, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(colors.border))
        .title(" Conversation ");

    if app.chat.is_empty() && !app.thinking {
        frame.render_widget(welcome_text(app, colors).block(block), area);
        return;
    }

    let mut lines: Vec<Line<'static>> = Vec::new();
    for msg in app.chat.messages() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(colors.user).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
                lines.push(Line::default());
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "kubectl-ai:",
                    Style::default()
                        .fg(colors.assistant)
                        .add_modifier(Modifier::BOLD),
                )));
                lines.extend(app.formatter.render(&msg.content, app.dark_mode).lines);
                lines.push(Line::default());
            }
        }
    }

    if app.thinking {
        lines.push(Line::from(Span::styled(
            "kubectl-ai:",
            Style::default()
                .fg(colors.assistant)
                .add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(colors.dim).add_modifier(Modifier::ITALIC),
        )));
    }

    let total_lines = lines.len() as u16;

    let chat = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);

    if total_lines > app.chat_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("^"))
            .end_symbol(Some("v"));

        let mut scrollbar_state =
            ScrollbarState::new(total_lines as usize).position(app.chat_scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }
}

fn welcome_text<'a>(app: &App, colors: &Palette) -> Paragraph<'a> {
    let mut lines = vec![
        Line::default(),
        Line::from(Span::styled(
            "  Welcome to kubechat",
            Style::default().fg(colors.accent).bold(),
        )),
        Line::from(Span::styled(
            "  Ask about your cluster in plain language.",
            Style::default().fg(colors.dim),
        )),
        Line::default(),
    ];

    if app.commands.is_empty() {
        lines.push(Line::from(Span::styled(
            "  Type a question and press Enter.",
            Style::default().fg(colors.dim),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            "  Try one of these (press 'e' to pick):",
            Style::default().fg(colors.dim),
        )));
        for command in &app.commands {
            lines.push(Line::from(vec![
                Span::styled("  • ", Style::default().fg(colors.accent)),
                Span::raw(command.clone()),
            ]));
        }
    }

    Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false })
}

fn render_input(app: &App, colors: &Palette, frame: &mut Frame, area: Rect) {
    let (border_color, title) = if app.busy {
        (colors.dim, " Waiting for response (Esc to cancel) ")
    } else if app.input_mode == InputMode::Editing {
        (Color::Yellow, " Ask ")
    } else {
        (colors.border, " Ask (i to focus) ")
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.query_cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .query_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(colors.user))
        .block(input_block);

    frame.render_widget(input, area);

    if app.input_mode == InputMode::Editing && !app.busy && app.popup == Popup::None {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INPUT ",
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match (app.popup, app.input_mode) {
        (Popup::ResetConfirm, _) => vec![
            Span::styled(" y ", key_style),
            Span::styled(" confirm ", label_style),
            Span::styled(" n ", key_style),
            Span::styled(" cancel ", label_style),
        ],
        (Popup::ContextPicker, _) | (Popup::ExamplePicker, _) => vec![
            Span::styled(" j/k ", key_style),
            Span::styled(" nav ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" select ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" close ", label_style),
        ],
        (Popup::None, InputMode::Editing) => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(
                if app.busy { " cancel " } else { " stop typing " },
                label_style,
            ),
        ],
        (Popup::None, InputMode::Normal) => vec![
            Span::styled(" i ", key_style),
            Span::styled(" type ", label_style),
            Span::styled(" j/k ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" c ", key_style),
            Span::styled(" context ", label_style),
            Span::styled(" e ", key_style),
            Span::styled(" examples ", label_style),
            Span::styled(" R ", key_style),
            Span::styled(" reset ", label_style),
            Span::styled(" t ", key_style),
            Span::styled(" theme ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ],
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

/// List popup height: one row per item plus the border, saturating instead
/// of wrapping when the list is absurdly long
fn popup_height(items: usize) -> u16 {
    u16::try_from(items).unwrap_or(u16::MAX).saturating_add(2)
}

/// Centered popup rect, clamped to the frame
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = (area.width.saturating_sub(width)) / 2;
    let y = (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_context_picker(app: &mut App, colors: &Palette, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 50, popup_height(app.contexts.len()));
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(colors.accent))
        .title(" Switch Context ");

    if app.contexts.is_empty() {
        let placeholder = Paragraph::new("No contexts available")
            .style(Style::default().fg(colors.dim))
            .block(block);
        frame.render_widget(placeholder, centered(area, 50, 3));
        return;
    }

    let items: Vec<ListItem> = app
        .contexts
        .iter()
        .map(|context| {
            let is_current = app.current_context.as_deref() == Some(context.as_str());
            let prefix = if is_current { "* " } else { "  " };
            let style = if is_current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!("{}{}", prefix, short_context_name(context))).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.context_state);
}

fn render_example_picker(app: &mut App, colors: &Palette, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 60, popup_height(app.commands.len()));
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(colors.accent))
        .title(" Example Queries ");

    if app.commands.is_empty() {
        let placeholder = Paragraph::new("No example queries available")
            .style(Style::default().fg(colors.dim))
            .block(block);
        frame.render_widget(placeholder, centered(area, 60, 3));
        return;
    }

    let items: Vec<ListItem> = app
        .commands
        .iter()
        .map(|command| ListItem::new(format!(" {} ", command)))
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.command_state);
}

fn render_reset_confirm(colors: &Palette, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 46, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Reset Conversation ");

    let body = Text::from(vec![
        Line::from("This clears the chat and server history."),
        Line::from(Span::styled(
            "Press y to confirm, n to cancel.",
            Style::default().fg(colors.dim),
        )),
    ]);

    let popup = Paragraph::new(body)
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(popup, popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popup_height_saturates_on_huge_lists() {
        assert_eq!(popup_height(0), 2);
        assert_eq!(popup_height(5), 7);
        assert_eq!(popup_height(u16::MAX as usize), u16::MAX);
        assert_eq!(popup_height(usize::MAX), u16::MAX);
    }

    #[test]
    fn centered_never_exceeds_the_frame() {
        let area = Rect::new(0, 0, 80, 24);
        let rect = centered(area, 200, u16::MAX);
        assert!(rect.width <= area.width);
        assert!(rect.height <= area.height);
    }
}
