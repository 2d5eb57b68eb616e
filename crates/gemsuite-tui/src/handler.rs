use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use gemsuite_core::Feature;
use ratatui::layout::Rect;

use crate::app::{App, InputMode, Popup};
use crate::input::TextInput;
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::ChatUpdate { generation, text } => app.on_chat_update(generation, &text),
        AppEvent::ChatDone { generation, session, result } => {
            app.on_chat_done(generation, session, result)
        }
        AppEvent::AnalysisDone { generation, result } => app.on_analysis_done(generation, result),
        AppEvent::StoryDone { generation, result } => app.on_story_done(generation, result),
        AppEvent::NarrationDone { generation, result } => app.on_narration_done(generation, result),
        AppEvent::ImagePicked { generation, target, image, preview } => {
            app.on_image_picked(generation, target, image, preview)
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }
    app.status = None;

    if let Some(popup) = app.popup {
        handle_popup(app, popup, key);
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_popup(app: &mut App, popup: Popup, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.popup = None;
            app.popup_input.clear();
        }
        KeyCode::Enter => match popup {
            Popup::ApiKey => app.submit_api_key(),
            Popup::PickImage(target) => app.submit_image_path(target),
        },
        _ => edit_text(&mut app.popup_input, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Tabs
        KeyCode::Tab | KeyCode::Right | KeyCode::Char('l') => app.next_tab(),
        KeyCode::BackTab | KeyCode::Left | KeyCode::Char('h') => app.previous_tab(),
        KeyCode::Char('1') => app.select_tab(Feature::Chat),
        KeyCode::Char('2') => app.select_tab(Feature::Vision),
        KeyCode::Char('3') => app.select_tab(Feature::Story),

        // Scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => app.scroll_down(10),
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => app.scroll_up(10),
        KeyCode::Char('g') => app.scroll_to_top(),

        KeyCode::Char('K') => app.open_api_key_popup(),

        _ => match app.tab {
            Feature::Chat => handle_chat_normal(app, key),
            Feature::Vision => handle_vision_normal(app, key),
            Feature::Story => handle_story_normal(app, key),
        },
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => app.reset_chat(),
        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),
        _ => {}
    }
}

fn handle_vision_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('o') => app.open_pick_popup(),
        KeyCode::Char('x') => app.clear_image(),
        KeyCode::Char('p') | KeyCode::Char('i') => {
            if !app.analysis.slot.is_empty() {
                app.input_mode = InputMode::Editing;
            }
        }
        KeyCode::Enter | KeyCode::Char('a') => app.analyze(),
        _ => {}
    }
}

fn handle_story_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('o') => app.open_pick_popup(),
        KeyCode::Char('x') => app.clear_image(),
        KeyCode::Enter | KeyCode::Char('s') => app.generate_story(),
        KeyCode::Char('r') if !key.modifiers.contains(KeyModifiers::CONTROL) => app.narrate(),
        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => match app.tab {
            Feature::Chat => app.submit_chat(),
            Feature::Vision => {
                app.input_mode = InputMode::Normal;
                app.analyze();
            }
            Feature::Story => app.input_mode = InputMode::Normal,
        },
        _ => match app.tab {
            Feature::Chat => edit_text(&mut app.chat_input, key),
            Feature::Vision => edit_text(&mut app.prompt_input, key),
            Feature::Story => {}
        },
    }
}

fn edit_text(input: &mut TextInput, key: KeyEvent) {
    match key.code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.left(),
        KeyCode::Right => input.right(),
        KeyCode::Home => input.home(),
        KeyCode::End => input.end(),
        KeyCode::Char(c) => input.insert(c),
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    if app.popup.is_some() {
        return;
    }
    let in_main = app
        .main_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_main {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}
