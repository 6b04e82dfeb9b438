use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

use crate::app::{App, InputMode, Popup};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
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

    if app.popup != Popup::None {
        handle_popup(app, key);
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_popup(app: &mut App, key: KeyEvent) {
    match app.popup {
        Popup::ContextPicker => match key.code {
            KeyCode::Esc => app.popup = Popup::None,
            KeyCode::Char('j') | KeyCode::Down => app.context_nav_down(),
            KeyCode::Char('k') | KeyCode::Up => app.context_nav_up(),
            KeyCode::Enter => app.choose_context(),
            _ => {}
        },
        Popup::ExamplePicker => match key.code {
            KeyCode::Esc => app.popup = Popup::None,
            KeyCode::Char('j') | KeyCode::Down => app.command_nav_down(),
            KeyCode::Char('k') | KeyCode::Up => app.command_nav_up(),
            KeyCode::Enter => app.choose_example(),
            _ => {}
        },
        Popup::ResetConfirm => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => app.confirm_reset(),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.popup = Popup::None,
            _ => {}
        },
        Popup::None => {}
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Focus the input
        KeyCode::Char('i') | KeyCode::Char('/') => {
            app.input_mode = InputMode::Editing;
            app.query_cursor = app.query_input.chars().count();
        }

        // Chat scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
        KeyCode::Char('g') => app.scroll_to_top(),
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),

        // Pickers and actions
        KeyCode::Char('c') => app.open_context_picker(),
        KeyCode::Char('e') => {
            if app.command_state.selected().is_none() && !app.commands.is_empty() {
                app.command_state.select(Some(0));
            }
            app.popup = Popup::ExamplePicker;
        }
        KeyCode::Char('R') => app.popup = Popup::ResetConfirm,
        KeyCode::Char('t') => app.toggle_theme(),

        // Abort the in-flight turn
        KeyCode::Esc => {
            if app.busy {
                app.cancel_query();
            }
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            if app.busy {
                app.cancel_query();
            } else {
                app.input_mode = InputMode::Normal;
            }
        }
        KeyCode::Enter => {
            app.submit_query();
        }
        KeyCode::Backspace => {
            if app.query_cursor > 0 {
                app.query_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.query_input, app.query_cursor);
                app.query_input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.query_input.chars().count();
            if app.query_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.query_input, app.query_cursor);
                app.query_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.query_cursor = app.query_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.query_input.chars().count();
            app.query_cursor = (app.query_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.query_cursor = 0;
        }
        KeyCode::End => {
            app.query_cursor = app.query_input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.query_input, app.query_cursor);
            app.query_input.insert(byte_pos, c);
            app.query_cursor += 1;
        }
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => {
            app.scroll_down();
            app.scroll_down();
            app.scroll_down();
        }
        MouseEventKind::ScrollUp => {
            app.scroll_up();
            app.scroll_up();
            app.scroll_up();
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::format::RenderBackends;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn test_app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(
            "http://127.0.0.1:1",
            &Config::default(),
            Arc::new(RenderBackends::new()),
            tx,
        );
        app.input_mode = InputMode::Normal;
        app
    }

    #[test]
    fn char_to_byte_index_handles_multibyte() {
        assert_eq!(char_to_byte_index("naïve", 3), 4);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[test]
    fn i_enters_editing_with_cursor_at_end() {
        let mut app = test_app();
        app.query_input = "héllo".to_string();
        handle_key(&mut app, key(KeyCode::Char('i')));
        assert_eq!(app.input_mode, InputMode::Editing);
        assert_eq!(app.query_cursor, 5);
    }

    #[test]
    fn typing_inserts_at_cursor_with_utf8() {
        let mut app = test_app();
        app.input_mode = InputMode::Editing;
        for c in "naïve".chars() {
            handle_key(&mut app, key(KeyCode::Char(c)));
        }
        handle_key(&mut app, key(KeyCode::Left));
        handle_key(&mut app, key(KeyCode::Backspace));
        assert_eq!(app.query_input, "nave");
    }

    #[test]
    fn reset_confirm_requires_y() {
        let mut app = test_app();
        handle_key(&mut app, key(KeyCode::Char('R')));
        assert_eq!(app.popup, Popup::ResetConfirm);
        handle_key(&mut app, key(KeyCode::Char('n')));
        assert_eq!(app.popup, Popup::None);
    }

    #[test]
    fn esc_while_busy_cancels_the_turn() {
        let mut app = test_app();
        app.input_mode = InputMode::Editing;
        app.busy = true;
        app.thinking = true;
        handle_key(&mut app, key(KeyCode::Esc));
        assert!(!app.busy);
        assert!(!app.thinking);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[test]
    fn theme_toggle_flips_palette() {
        let mut app = test_app();
        let before = app.dark_mode;
        handle_key(&mut app, key(KeyCode::Char('t')));
        assert_eq!(app.dark_mode, !before);
    }
}
