use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Tabs, Wrap},
};
use gemsuite_core::{ChatRole, Feature, Thumbnail};
use crate::app::{App, InputMode, Popup};
use crate::input::TextInput;

const SPINNER: [&str; 8] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧"];

fn spinner(app: &App) -> &'static str {
    SPINNER[app.animation_frame % SPINNER.len()]
}

/// Render inline `**bold**` spans; headings and bullets get light styling.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('#') {
        let heading = trimmed.trim_start_matches('#').trim().to_string();
        return Line::from(Span::styled(
            heading,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
    }

    let (prefix, body) = match trimmed.strip_prefix("* ").or_else(|| trimmed.strip_prefix("- ")) {
        Some(rest) => {
            let indent = text.len() - trimmed.len();
            (format!("{}• ", " ".repeat(indent)), rest)
        }
        None => (String::new(), text),
    };

    let mut spans: Vec<Span<'static>> = Vec::new();
    if !prefix.is_empty() {
        spans.push(Span::raw(prefix));
    }
    let mut chars = body.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn markdown_text(text: &str) -> Vec<Line<'static>> {
    text.lines().map(parse_markdown_line).collect()
}

/// Size in cells of a thumbnail fitted into `cols` x `rows`, where each cell
/// holds two vertically stacked pixels. Returns (columns, pixel rows).
fn fit_thumbnail(thumb: &Thumbnail, cols: u16, rows: u16) -> (u16, u16) {
    if thumb.width == 0 || thumb.height == 0 || cols == 0 || rows == 0 {
        return (0, 0);
    }
    let scale = (cols as f32 / thumb.width as f32).min((rows as f32 * 2.0) / thumb.height as f32);
    let width = ((thumb.width as f32 * scale).round() as u16).clamp(1, cols);
    let height = ((thumb.height as f32 * scale).round() as u16).clamp(1, rows * 2);
    (width, height)
}

/// Half-block rendering: `▀` with the upper pixel as foreground and the
/// lower pixel as background.
fn thumbnail_lines(thumb: &Thumbnail, cols: u16, rows: u16) -> Vec<Line<'static>> {
    let (width, pixel_rows) = fit_thumbnail(thumb, cols, rows);
    if width == 0 {
        return Vec::new();
    }
    let left_pad = " ".repeat(((cols - width) / 2) as usize);

    let sample = |x: u16, y: u16| -> Option<Color> {
        if y >= pixel_rows {
            return None;
        }
        let sx = (x as u32 * thumb.width / width as u32).min(thumb.width - 1);
        let sy = (y as u32 * thumb.height / pixel_rows as u32).min(thumb.height - 1);
        thumb.pixel(sx, sy).map(|[r, g, b]| Color::Rgb(r, g, b))
    };

    (0..pixel_rows.div_ceil(2))
        .map(|row| {
            let mut spans = vec![Span::raw(left_pad.clone())];
            for x in 0..width {
                let mut style = Style::default();
                if let Some(top) = sample(x, row * 2) {
                    style = style.fg(top);
                }
                if let Some(bottom) = sample(x, row * 2 + 1) {
                    style = style.bg(bottom);
                }
                spans.push(Span::styled("▀", style));
            }
            Line::from(spans)
        })
        .collect()
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, tabs, body, footer
    let [header_area, tabs_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_tabs(app, frame, tabs_area);

    match app.tab {
        Feature::Chat => render_chat_screen(app, frame, body_area),
        Feature::Vision => render_vision_screen(app, frame, body_area),
        Feature::Story => render_story_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);

    match app.popup {
        Some(Popup::ApiKey) => render_api_key_input(app, frame, area),
        Some(Popup::PickImage(target)) => render_pick_image(app, target, frame, area),
        None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let key_indicator = match app.config.key_source() {
        Some(source) => format!(" [key: {}]", source),
        None => " [no API key, press K]".to_string(),
    };

    let title = Line::from(vec![
        Span::styled(" Gemini Suite ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(key_indicator, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_tabs(app: &App, frame: &mut Frame, area: Rect) {
    let titles: Vec<Line> = Feature::all()
        .iter()
        .enumerate()
        .map(|(i, f)| Line::from(format!(" {} {} ", i + 1, f.display_name())))
        .collect();

    let tabs = Tabs::new(titles)
        .select(app.tab.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .divider("│");
    frame.render_widget(tabs, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let hint = |key: &'static str, label: &'static str| {
        [
            Span::styled(format!(" {} ", key), key_style),
            Span::styled(format!(" {} ", label), label_style),
        ]
    };

    let mut spans = vec![Span::styled(mode_text, mode_style)];

    if let Some(status) = &app.status {
        spans.push(Span::styled(format!(" {} ", status), Style::default().fg(Color::Red)));
    } else {
        let hints: Vec<[Span; 2]> = match (app.popup, app.input_mode, app.tab) {
            (Some(_), _, _) => vec![hint("Enter", "confirm"), hint("Esc", "cancel")],
            (None, InputMode::Editing, Feature::Chat) => vec![hint("Enter", "send"), hint("Esc", "done")],
            (None, InputMode::Editing, _) => vec![hint("Enter", "analyze"), hint("Esc", "done")],
            (None, InputMode::Normal, Feature::Chat) => vec![
                hint("i", "type"),
                hint("j/k", "scroll"),
                hint("^r", "new chat"),
                hint("Tab", "next"),
                hint("q", "quit"),
            ],
            (None, InputMode::Normal, Feature::Vision) => vec![
                hint("o", "open image"),
                hint("p", "prompt"),
                hint("a", "analyze"),
                hint("x", "remove"),
                hint("Tab", "next"),
                hint("q", "quit"),
            ],
            (None, InputMode::Normal, Feature::Story) => vec![
                hint("o", "open image"),
                hint("s", "generate"),
                hint("r", "read aloud"),
                hint("x", "remove"),
                hint("Tab", "next"),
                hint("q", "quit"),
            ],
        };
        for pair in hints {
            spans.push(Span::raw(" "));
            spans.extend(pair);
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_input(input: &TextInput, title: &str, placeholder: &str, editing: bool, frame: &mut Frame, area: Rect) {
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ", title));

    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible, cursor_x) = input.visible(inner_width);

    let paragraph = if input.is_empty() && !editing {
        Paragraph::new(Span::styled(placeholder.to_string(), Style::default().fg(Color::DarkGray)))
    } else {
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan))
    };
    frame.render_widget(paragraph.block(block), area);

    if editing {
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn chat_title(model: &str, exchanges: usize) -> String {
    match exchanges {
        0 => format!(" Chat Assistant: {} ", model),
        1 => format!(" Chat Assistant: {} (1 exchange) ", model),
        n => format!(" Chat Assistant: {} ({} exchanges) ", model, n),
    }
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    app.main_area = Some(chat_area);
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let title = match &app.chat_session {
        Some(session) => chat_title(session.model(), session.history().len() / 2),
        None => chat_title(app.config.chat_model(), 0),
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    let mut lines: Vec<Line> = Vec::new();
    let last = app.chat.messages().len().saturating_sub(1);
    for (i, msg) in app.chat.messages().iter().enumerate() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(msg.text.clone()));
            }
            ChatRole::Model => {
                lines.push(Line::from(Span::styled(
                    "Gemini:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                if msg.is_error {
                    lines.push(Line::from(Span::styled(msg.text.clone(), Style::default().fg(Color::Red))));
                } else if msg.text.is_empty() && i == last && app.chat.is_loading() {
                    lines.push(Line::from(Span::styled(
                        format!("{} Thinking", spinner(app)),
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    )));
                } else {
                    lines.extend(markdown_text(&msg.text));
                }
            }
        }
        lines.push(Line::default());
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    let editing = app.input_mode == InputMode::Editing && app.popup.is_none();
    let title = if app.chat.is_loading() { "Message (waiting for reply)" } else { "Message" };
    render_input(&app.chat_input, title, "Type your message...", editing, frame, input_area);
}

fn render_preview(app: &App, slot: &gemsuite_core::state::ImageSlot, empty_hint: &str, frame: &mut Frame, area: Rect) {
    let title = slot
        .image()
        .map(|image| format!(" {} ", image.name))
        .unwrap_or_else(|| " Image ".to_string());
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(image) = slot.image() else {
        let hint = Text::from(vec![
            Line::default(),
            Line::from(Span::styled("Click to upload image", Style::default().fg(Color::Cyan).bold())),
            Line::from(Span::styled(format!("press o, {}", empty_hint), Style::default().fg(Color::DarkGray))),
            Line::from(Span::styled("SVG, PNG, JPG or GIF", Style::default().fg(Color::DarkGray))),
        ]);
        frame.render_widget(Paragraph::new(hint).centered().wrap(Wrap { trim: true }), inner);
        return;
    };

    let thumbnail = slot.preview().and_then(|handle| app.previews.get(handle));
    let lines = match thumbnail {
        Some(thumb) => thumbnail_lines(thumb, inner.width, inner.height.saturating_sub(1)),
        None => vec![Line::from(Span::styled("(no preview)", Style::default().fg(Color::DarkGray)))],
    };
    let mut lines = lines;
    lines.push(Line::from(Span::styled(
        format!("{}  x to remove", image.mime_type),
        Style::default().fg(Color::DarkGray),
    )));
    frame.render_widget(Paragraph::new(Text::from(lines)), inner);
}

fn render_vision_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [left, results_area] = Layout::horizontal([
        Constraint::Percentage(45),
        Constraint::Percentage(55),
    ])
    .areas(area);
    let [preview_area, prompt_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(left);

    app.main_area = Some(results_area);

    render_preview(app, &app.analysis.slot, "then a to analyze", frame, preview_area);

    let editing = app.input_mode == InputMode::Editing && app.popup.is_none();
    render_input(
        &app.prompt_input,
        "Custom Prompt (Optional)",
        "e.g., 'Identify the plants in this image' or 'Explain this chart'",
        editing,
        frame,
        prompt_area,
    );

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Analysis Results ");

    let text = if app.analysis.is_loading {
        Text::from(Line::from(Span::styled(
            format!("{} Examining pixels...", spinner(app)),
            Style::default().fg(Color::Yellow),
        )))
    } else if let Some(error) = &app.analysis.error {
        Text::from(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))))
    } else if !app.analysis.result.is_empty() {
        Text::from(markdown_text(&app.analysis.result))
    } else {
        Text::from(Line::from(Span::styled(
            "Upload an image to see the magic happen.",
            Style::default().fg(Color::DarkGray),
        )))
    };

    let results = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.analysis_scroll, 0));
    frame.render_widget(results, results_area);
}

fn render_story_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [left, story_area] = Layout::horizontal([
        Constraint::Percentage(45),
        Constraint::Percentage(55),
    ])
    .areas(area);
    let [preview_area, actions_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(left);

    app.main_area = Some(story_area);

    render_preview(app, &app.story.slot, "then s to generate", frame, preview_area);

    let idle = Style::default().fg(Color::White);
    let disabled = Style::default().fg(Color::DarkGray);
    let busy = Style::default().fg(Color::Yellow);
    let generate = if app.story.is_loading {
        Span::styled(format!("{} Weaving Narrative...", spinner(app)), busy)
    } else if app.story.slot.is_empty() {
        Span::styled("[s] Generate Story", disabled)
    } else {
        Span::styled("[s] Generate Story", idle)
    };
    let read = if app.story.is_playing_audio {
        Span::styled(format!("{} Narrating...", spinner(app)), busy)
    } else if app.story.story.is_empty() {
        Span::styled("[r] Read Aloud", disabled)
    } else {
        Span::styled("[r] Read Aloud", idle)
    };
    let actions = Paragraph::new(Line::from(vec![generate, Span::raw("   "), read])).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(actions, actions_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" The Opening... ");

    let mut lines: Vec<Line> = Vec::new();
    if let Some(error) = &app.story.error {
        lines.push(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))));
        lines.push(Line::default());
    }
    if !app.story.story.is_empty() {
        lines.extend(
            markdown_text(&app.story.story)
                .into_iter()
                .map(|line| line.style(Style::default().add_modifier(Modifier::ITALIC))),
        );
    } else if !app.story.is_loading && app.story.error.is_none() {
        lines.push(Line::from(Span::styled(
            "Choose a scene to inspire your story",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let story = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.story_scroll, 0));
    frame.render_widget(story, story_area);
}

/// Centered popup area of the given size
fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(popup_x, popup_y, popup_width, height.min(area.height))
}

fn render_pick_image(app: &App, target: Feature, frame: &mut Frame, area: Rect) {
    let popup_area = popup_rect(area, 70, 6);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(format!(" Open image for {} ", target.display_name()));
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path to a PNG, JPEG, GIF, WebP or BMP file. Enter to open, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let (visible, cursor_x) = app.popup_input.visible(inner.width as usize);
    frame.render_widget(Paragraph::new(visible).style(Style::default().fg(Color::Cyan)), input_area);
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

/// Mask a key, showing only its last four characters.
fn mask_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        "*".repeat(len)
    } else {
        let masked_len = len - 4;
        let last_four: String = key.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
    }
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = popup_rect(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Enter Gemini API Key ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Paste your API key below. Press Enter to save, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let masked = mask_key(app.popup_input.text());
    let cursor_x = (masked.chars().count() as u16).min(input_area.width);
    frame.render_widget(Paragraph::new(masked).style(Style::default().fg(Color::Cyan)), input_area);
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status = Paragraph::new(format!("{} characters", app.popup_input.char_count()))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(status, Rect::new(inner.x, inner.y + 4, inner.width, 1));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_bold_spans_are_styled() {
        let line = parse_markdown_line("A **bold** move");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "bold");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line_text(&line), "A bold move");
    }

    #[test]
    fn test_unclosed_bold_is_literal() {
        assert_eq!(line_text(&parse_markdown_line("a **b")), "a **b");
    }

    #[test]
    fn test_headings_and_bullets() {
        assert_eq!(line_text(&parse_markdown_line("## Colors")), "Colors");
        assert_eq!(line_text(&parse_markdown_line("* **Red** sky")), "• Red sky");
        assert_eq!(line_text(&parse_markdown_line("  - leaf")), "  • leaf");
    }

    #[test]
    fn test_fit_thumbnail_keeps_aspect() {
        let wide = Thumbnail::from_pixels(100, 50, vec![[0, 0, 0]; 5000]);
        assert_eq!(fit_thumbnail(&wide, 40, 40), (40, 20));

        let tall = Thumbnail::from_pixels(10, 40, vec![[0, 0, 0]; 400]);
        assert_eq!(fit_thumbnail(&tall, 40, 10), (5, 20));

        assert_eq!(fit_thumbnail(&wide, 0, 10), (0, 0));
    }

    #[test]
    fn test_half_blocks_pair_rows() {
        let thumb = Thumbnail::from_pixels(1, 2, vec![[255, 0, 0], [0, 0, 255]]);
        let lines = thumbnail_lines(&thumb, 1, 1);
        assert_eq!(lines.len(), 1);

        let cell = lines[0].spans.last().unwrap();
        assert_eq!(cell.content, "▀");
        assert_eq!(cell.style.fg, Some(Color::Rgb(255, 0, 0)));
        assert_eq!(cell.style.bg, Some(Color::Rgb(0, 0, 255)));
    }

    #[test]
    fn test_chat_title_counts_exchanges() {
        assert_eq!(chat_title("gemini-3-pro-preview", 0), " Chat Assistant: gemini-3-pro-preview ");
        assert_eq!(chat_title("m", 1), " Chat Assistant: m (1 exchange) ");
        assert_eq!(chat_title("m", 4), " Chat Assistant: m (4 exchanges) ");
    }

    #[test]
    fn test_mask_key_shows_last_four() {
        assert_eq!(mask_key(""), "");
        assert_eq!(mask_key("abc"), "***");
        assert_eq!(mask_key("AIzaSy123456"), "********...3456");
    }
}
