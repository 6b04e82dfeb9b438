use ratatui::widgets::ListState;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::chat::{ChatLog, ChatRole, MessageId};
use crate::client::ApiClient;
use crate::config::Config;
use crate::format::{Formatter, RenderBackends};
use crate::session::{self, NetEvent, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    None,
    ContextPicker,
    ExamplePicker,
    ResetConfirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unknown,
    Connected,
    Disconnected,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub popup: Popup,

    // Query input
    pub query_input: String,
    pub query_cursor: usize, // cursor position in query_input

    // Conversation state
    pub chat: ChatLog,
    pub busy: bool,
    pub thinking: bool, // indicator shown until the first fragment arrives
    open_message: Option<MessageId>,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Chat viewport
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations

    // Context selector state
    pub contexts: Vec<String>,
    pub current_context: Option<String>,
    pub context_state: ListState,
    pub connection: ConnectionStatus,

    // Example query state
    pub commands: Vec<String>,
    pub command_state: ListState,

    // Theme
    pub dark_mode: bool,
    pub formatter: Formatter,

    // Backend
    pub client: ApiClient,
    net_tx: UnboundedSender<NetEvent>,
    query_task: Option<tokio::task::JoinHandle<()>>,
    // Current turn stamp. Aborting a task leaves its already-queued events
    // on the channel, so every session event carries the stamp of the turn
    // that produced it and stale ones are dropped on receipt.
    turn: u64,
}

impl App {
    pub fn new(
        server_url: &str,
        config: &Config,
        backends: Arc<RenderBackends>,
        net_tx: UnboundedSender<NetEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            popup: Popup::None,

            query_input: String::new(),
            query_cursor: 0,

            chat: ChatLog::new(),
            busy: false,
            thinking: false,
            open_message: None,
            animation_frame: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            contexts: Vec::new(),
            current_context: None,
            context_state: ListState::default(),
            connection: ConnectionStatus::Unknown,

            commands: Vec::new(),
            command_state: ListState::default(),

            dark_mode: config.dark_mode,
            formatter: Formatter::new(backends),

            client: ApiClient::new(server_url),
            net_tx,
            query_task: None,
            turn: 0,
        }
    }

    // Startup fetches: contexts double as the connectivity check
    pub fn refresh_contexts(&self) {
        session::spawn_fetch_contexts(self.client.clone(), self.net_tx.clone());
    }

    pub fn refresh_commands(&self) {
        session::spawn_fetch_commands(self.client.clone(), self.net_tx.clone());
    }

    /// Start one query turn. Does nothing while a turn is in flight or when
    /// the trimmed input is empty.
    pub fn submit_query(&mut self) {
        if self.busy {
            return;
        }
        let query = self.query_input.trim().to_string();
        if query.is_empty() {
            return;
        }

        self.chat.append(ChatRole::User, query.clone());
        self.busy = true;
        self.thinking = true;
        self.open_message = None;
        self.query_input.clear();
        self.query_cursor = 0;
        self.scroll_chat_to_bottom();

        self.turn += 1;
        self.query_task = Some(session::spawn_query(
            self.client.clone(),
            query,
            self.turn,
            self.net_tx.clone(),
        ));
    }

    /// Abort the in-flight turn, keeping whatever partial text already
    /// rendered.
    pub fn cancel_query(&mut self) {
        if let Some(task) = self.query_task.take() {
            task.abort();
        }
        // Anything the aborted task already queued is now stale
        self.turn += 1;
        if let Some(id) = self.open_message.take() {
            self.chat.close(id);
        }
        self.finish_turn();
    }

    pub fn on_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Session { turn, event } => {
                if turn != self.turn {
                    tracing::debug!(turn, current = self.turn, "dropping stale session event");
                    return;
                }
                self.on_session_event(event);
            }
            NetEvent::Contexts(Ok(response)) => {
                self.contexts = response.contexts;
                self.current_context = response.current;
                self.connection = ConnectionStatus::Connected;
                if self.context_state.selected().is_none() && !self.contexts.is_empty() {
                    let current = self
                        .current_context
                        .as_ref()
                        .and_then(|c| self.contexts.iter().position(|x| x == c))
                        .unwrap_or(0);
                    self.context_state.select(Some(current));
                }
            }
            NetEvent::Contexts(Err(err)) => {
                tracing::warn!(%err, "failed to fetch contexts");
                self.connection = ConnectionStatus::Disconnected;
            }
            NetEvent::ContextSet { context, result } => match result {
                Ok(()) => {
                    self.chat.append_closed(
                        ChatRole::Assistant,
                        format!(
                            "Context switched to **{}**",
                            short_context_name(&context)
                        ),
                    );
                    self.refresh_contexts();
                    self.scroll_chat_to_bottom();
                }
                Err(err) => {
                    self.chat
                        .append_closed(ChatRole::Assistant, format!("**Error:** {err}"));
                    self.scroll_chat_to_bottom();
                }
            },
            NetEvent::Commands(Ok(commands)) => {
                self.commands = commands;
                if self.command_state.selected().is_none() && !self.commands.is_empty() {
                    self.command_state.select(Some(0));
                }
            }
            NetEvent::Commands(Err(err)) => {
                tracing::warn!(%err, "failed to fetch example queries");
            }
            NetEvent::ResetDone(Ok(())) => {
                self.chat.reset();
                self.open_message = None;
                self.chat_scroll = 0;
                self.refresh_commands();
                self.chat
                    .append_closed(ChatRole::Assistant, "Conversation reset.".to_string());
            }
            NetEvent::ResetDone(Err(err)) => {
                self.chat
                    .append_closed(ChatRole::Assistant, format!("**Error:** {err}"));
                self.scroll_chat_to_bottom();
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Fragment(text) => {
                if self.thinking {
                    // First fragment replaces the indicator with a real message
                    self.thinking = false;
                    self.open_message = Some(self.chat.append(ChatRole::Assistant, text));
                } else if let Some(id) = self.open_message {
                    self.chat.update(id, text);
                }
                self.scroll_chat_to_bottom();
            }
            SessionEvent::Completed(text) => {
                match self.open_message.take() {
                    Some(id) => {
                        self.chat.update(id, text);
                        self.chat.close(id);
                    }
                    None if !text.is_empty() => {
                        self.chat.append_closed(ChatRole::Assistant, text);
                    }
                    None => {}
                }
                self.finish_turn();
            }
            SessionEvent::Failed(message) => {
                if let Some(id) = self.open_message.take() {
                    self.chat.close(id);
                }
                self.chat
                    .append_closed(ChatRole::Assistant, format!("**Error:** {message}"));
                self.finish_turn();
            }
        }
    }

    /// Common epilogue for every way a turn can end. Runs on success,
    /// failure, and cancellation alike.
    fn finish_turn(&mut self) {
        self.busy = false;
        self.thinking = false;
        self.query_task = None;
        self.query_input.clear();
        self.query_cursor = 0;
        self.input_mode = InputMode::Editing;
        self.scroll_chat_to_bottom();
    }

    // Context picker
    pub fn open_context_picker(&mut self) {
        if self.contexts.is_empty() {
            self.refresh_contexts();
        }
        self.popup = Popup::ContextPicker;
    }

    pub fn context_nav_down(&mut self) {
        let len = self.contexts.len();
        if len > 0 {
            let i = self.context_state.selected().unwrap_or(0);
            self.context_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn context_nav_up(&mut self) {
        let i = self.context_state.selected().unwrap_or(0);
        self.context_state.select(Some(i.saturating_sub(1)));
    }

    pub fn choose_context(&mut self) {
        if let Some(i) = self.context_state.selected() {
            if let Some(context) = self.contexts.get(i) {
                session::spawn_set_context(
                    self.client.clone(),
                    context.clone(),
                    self.net_tx.clone(),
                );
            }
        }
        self.popup = Popup::None;
    }

    // Example query picker
    pub fn command_nav_down(&mut self) {
        let len = self.commands.len();
        if len > 0 {
            let i = self.command_state.selected().unwrap_or(0);
            self.command_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn command_nav_up(&mut self) {
        let i = self.command_state.selected().unwrap_or(0);
        self.command_state.select(Some(i.saturating_sub(1)));
    }

    /// Copy the selected example query into the input and focus it.
    pub fn choose_example(&mut self) {
        if let Some(i) = self.command_state.selected() {
            if let Some(command) = self.commands.get(i) {
                self.query_input = command.clone();
                self.query_cursor = self.query_input.chars().count();
            }
        }
        self.popup = Popup::None;
        self.input_mode = InputMode::Editing;
    }

    // Reset flow
    pub fn confirm_reset(&mut self) {
        self.popup = Popup::None;
        session::spawn_reset(self.client.clone(), self.net_tx.clone());
    }

    pub fn toggle_theme(&mut self) {
        self.dark_mode = !self.dark_mode;
        if let Err(err) = Config::save_dark_mode(self.dark_mode) {
            tracing::warn!(%err, "failed to persist theme");
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.thinking {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Chat scrolling
    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
    }

    /// Keep the newest output visible while streaming.
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in self.chat.messages() {
            total_lines += 1; // Role line ("You:" or "kubectl-ai:")
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1; // Empty line still takes one line
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // Blank line after message
        }

        if self.thinking {
            total_lines += 2; // Role line + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        // Also clamps an over-scrolled viewport back onto the content when
        // everything fits on screen
        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}

/// Abbreviate GKE-style context names (`gke_<project>_<location>_<cluster>`)
/// to `cluster (location)`. Anything else displays verbatim.
pub fn short_context_name(name: &str) -> String {
    if name.starts_with("gke_") {
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() >= 4 {
            return format!("{} ({})", parts[parts.len() - 1], parts[parts.len() - 2]);
        }
    }
    name.to_string()
}
