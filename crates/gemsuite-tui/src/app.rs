use std::path::PathBuf;
use std::sync::Arc;

use gemsuite_core::{
    AnalysisSession, AudioSink, ChatLog, ChatSession, Config, Error, Feature, ImageFile,
    PreviewStore, StorySession, Suite, Thumbnail,
};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::input::TextInput;
use crate::tui::AppEvent;

/// Decoded previews are capped at this size before being fitted to a pane.
const PREVIEW_MAX_WIDTH: u32 = 160;
const PREVIEW_MAX_HEIGHT: u32 = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    /// Path entry for the image of the given tab
    PickImage(Feature),
    ApiKey,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub tab: Feature,
    pub input_mode: InputMode,

    // Remote access, built on first use once a key is known
    pub config: Config,
    pub config_path: PathBuf,
    pub suite: Option<Suite>,

    // Chat; the session is created on first send and dropped on reset
    pub chat: ChatLog,
    pub chat_session: Option<ChatSession>,
    pub chat_input: TextInput,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Image analysis
    pub analysis: AnalysisSession,
    pub prompt_input: TextInput,
    pub analysis_scroll: u16,

    // Storyteller
    pub story: StorySession,
    pub story_scroll: u16,

    pub previews: PreviewStore,
    /// Latest pick per tab; a load that lands after a newer pick or a clear
    /// is dropped.
    pick_generations: [u64; 3],

    // Popups
    pub popup: Option<Popup>,
    pub popup_input: TextInput,
    /// One-line notice shown in the footer, cleared on the next key
    pub status: Option<String>,

    // Animation state
    pub animation_frame: usize,

    // Panel areas for mouse hit-testing (updated during render)
    pub main_area: Option<Rect>,

    events: UnboundedSender<AppEvent>,
    sink: Arc<dyn AudioSink>,
}

impl App {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        events: UnboundedSender<AppEvent>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let suite = Suite::from_config(&config).ok();

        Self {
            should_quit: false,
            tab: Feature::default(),
            input_mode: InputMode::Normal,

            config,
            config_path,
            suite,

            chat: ChatLog::new(),
            chat_session: None,
            chat_input: TextInput::new(),
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            analysis: AnalysisSession::new(),
            prompt_input: TextInput::new(),
            analysis_scroll: 0,

            story: StorySession::new(),
            story_scroll: 0,

            previews: PreviewStore::new(),
            pick_generations: [0; 3],

            popup: None,
            popup_input: TextInput::new(),
            status: None,

            animation_frame: 0,
            main_area: None,

            events,
            sink,
        }
    }

    /// The suite, or `None` after opening the API key popup.
    fn require_suite(&mut self) -> Option<Suite> {
        if self.suite.is_none() {
            match Suite::from_config(&self.config) {
                Ok(suite) => self.suite = Some(suite),
                Err(e) => {
                    if e.is_config() {
                        self.open_api_key_popup();
                    } else {
                        self.status = Some(e.to_string());
                    }
                    return None;
                }
            }
        }
        self.suite.clone()
    }

    pub fn open_api_key_popup(&mut self) {
        self.popup_input.clear();
        self.popup = Some(Popup::ApiKey);
    }

    /// Store the key entered in the popup and rebuild the client with it.
    pub fn submit_api_key(&mut self) {
        let key = self.popup_input.take().trim().to_string();
        self.popup = None;
        if key.is_empty() {
            return;
        }

        self.config.api_key = Some(key);
        if let Err(e) = self.config.save_to(&self.config_path) {
            warn!("Failed to save config: {}", e);
            self.status = Some("API key set for this session only (config not saved)".to_string());
        }

        match Suite::from_config(&self.config) {
            Ok(suite) => {
                info!(source = self.config.key_source().unwrap_or("none"), "API key configured");
                self.suite = Some(suite);
            }
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    pub fn open_pick_popup(&mut self) {
        if self.tab == Feature::Chat {
            return;
        }
        self.popup_input.clear();
        self.popup = Some(Popup::PickImage(self.tab));
    }

    /// Accept the path typed in the pick popup for `target`.
    pub fn submit_image_path(&mut self, target: Feature) {
        let raw = self.popup_input.take();
        self.popup = None;
        let path = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        if path.is_empty() {
            return;
        }

        let image = match ImageFile::from_path(expand_home(path)) {
            Ok(image) => image,
            Err(e) => {
                self.status = Some(e.to_string());
                return;
            }
        };
        if target == Feature::Chat {
            return;
        }
        let generation = self.bump_pick(target);

        // Reading and decoding stay off the event loop
        let tx = self.events.clone();
        tokio::spawn(async move {
            let preview = match Thumbnail::load(&image, PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT).await {
                Ok(thumbnail) => Ok(Some(thumbnail)),
                Err(e @ Error::ImageRead { .. }) => Err(e.to_string()),
                Err(e) => {
                    warn!(path = %image.path.display(), "No preview: {}", e);
                    Ok(None)
                }
            };
            let _ = tx.send(AppEvent::ImagePicked { generation, target, image, preview });
        });
    }

    fn bump_pick(&mut self, target: Feature) -> u64 {
        let slot = &mut self.pick_generations[target.index()];
        *slot += 1;
        *slot
    }

    /// Install a loaded image, unless a newer pick or a clear superseded it.
    pub fn on_image_picked(
        &mut self,
        generation: u64,
        target: Feature,
        image: ImageFile,
        preview: Result<Option<Thumbnail>, String>,
    ) {
        if generation != self.pick_generations[target.index()] {
            return;
        }
        let preview = match preview {
            Ok(thumbnail) => thumbnail.map(|t| self.previews.create(t)),
            Err(e) => {
                self.status = Some(e);
                return;
            }
        };

        match target {
            Feature::Vision => {
                self.analysis.set_image(&mut self.previews, image, preview);
                self.analysis_scroll = 0;
            }
            Feature::Story => {
                self.story.set_image(&mut self.previews, image, preview);
                self.story_scroll = 0;
            }
            Feature::Chat => {
                if let Some(handle) = preview {
                    self.previews.revoke(handle);
                }
            }
        }
    }

    pub fn clear_image(&mut self) {
        if self.tab != Feature::Chat {
            self.bump_pick(self.tab);
        }
        match self.tab {
            Feature::Vision => {
                self.analysis.clear(&mut self.previews);
                self.prompt_input.clear();
                self.analysis_scroll = 0;
            }
            Feature::Story => {
                self.story.clear(&mut self.previews);
                self.story_scroll = 0;
            }
            Feature::Chat => {}
        }
    }

    pub fn submit_chat(&mut self) {
        if self.chat_input.text().trim().is_empty() || self.chat.is_loading() {
            return;
        }
        let Some(suite) = self.require_suite() else {
            return;
        };
        let message = self.chat_input.take();
        let Some(generation) = self.chat.begin_send(&message) else {
            return;
        };
        self.scroll_chat_to_bottom();

        let mut session = self
            .chat_session
            .take()
            .unwrap_or_else(|| suite.new_chat_session());
        let tx = self.events.clone();
        tokio::spawn(async move {
            let updates = tx.clone();
            let result = session
                .send_message_stream(suite.client(), &message, |text| {
                    let _ = updates.send(AppEvent::ChatUpdate {
                        generation,
                        text: text.to_string(),
                    });
                })
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::ChatDone { generation, session, result });
        });
    }

    pub fn on_chat_update(&mut self, generation: u64, text: &str) {
        if self.chat.apply_update(generation, text) {
            self.scroll_chat_to_bottom();
        }
    }

    /// The session comes back with the completion; it is kept only if no
    /// reset happened in the meantime.
    pub fn on_chat_done(&mut self, generation: u64, session: ChatSession, result: Result<String, String>) {
        if generation != self.chat.generation() {
            return;
        }
        self.chat_session = Some(session);
        match result {
            Ok(_) => {
                self.chat.finish(generation);
            }
            Err(_) => {
                self.chat.fail(generation);
            }
        }
        self.scroll_chat_to_bottom();
    }

    /// Start a fresh conversation.
    pub fn reset_chat(&mut self) {
        self.chat.reset();
        self.chat_session = None;
        self.chat_input.clear();
        self.chat_scroll = 0;
    }

    pub fn analyze(&mut self) {
        if self.analysis.slot.is_empty() || self.analysis.is_loading {
            return;
        }
        let Some(suite) = self.require_suite() else {
            return;
        };
        self.analysis.prompt = self.prompt_input.text().to_string();
        let Some((generation, image, prompt)) = self.analysis.begin() else {
            return;
        };
        self.analysis_scroll = 0;

        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = suite
                .analyze_image(&image, &prompt)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::AnalysisDone { generation, result });
        });
    }

    pub fn on_analysis_done(&mut self, generation: u64, result: Result<String, String>) {
        match result {
            Ok(text) => {
                self.analysis.succeed(generation, text);
            }
            Err(_) => {
                self.analysis.fail(generation);
            }
        }
    }

    pub fn generate_story(&mut self) {
        if self.story.slot.is_empty() || self.story.is_loading || self.story.is_playing_audio {
            return;
        }
        let Some(suite) = self.require_suite() else {
            return;
        };
        let Some((generation, image)) = self.story.begin() else {
            return;
        };
        self.story_scroll = 0;

        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = suite.generate_story(&image).await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::StoryDone { generation, result });
        });
    }

    pub fn on_story_done(&mut self, generation: u64, result: Result<String, String>) {
        match result {
            Ok(text) => {
                self.story.succeed(generation, text);
            }
            Err(_) => {
                self.story.fail(generation);
            }
        }
    }

    /// Read the current story aloud.
    pub fn narrate(&mut self) {
        if self.story.story.is_empty() || self.story.is_playing_audio {
            return;
        }
        let Some(suite) = self.require_suite() else {
            return;
        };
        let Some((generation, text)) = self.story.begin_narration() else {
            return;
        };

        let sink = Arc::clone(&self.sink);
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = suite.speak_text(sink, &text).await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::NarrationDone { generation, result });
        });
    }

    pub fn on_narration_done(&mut self, generation: u64, result: Result<(), String>) {
        if let Err(e) = &result {
            warn!("Narration failed: {}", e);
        }
        self.story.finish_narration(generation, result.is_ok());
    }

    pub fn is_busy(&self) -> bool {
        self.chat.is_loading()
            || self.analysis.is_loading
            || self.story.is_loading
            || self.story.is_playing_audio
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_busy() {
            self.animation_frame = self.animation_frame.wrapping_add(1);
        }
    }

    pub fn next_tab(&mut self) {
        self.tab = self.tab.next();
        self.input_mode = InputMode::Normal;
    }

    pub fn previous_tab(&mut self) {
        self.tab = self.tab.previous();
        self.input_mode = InputMode::Normal;
    }

    pub fn select_tab(&mut self, tab: Feature) {
        self.tab = tab;
        self.input_mode = InputMode::Normal;
    }

    /// Scroll position of the pane on the current tab.
    fn current_scroll(&mut self) -> &mut u16 {
        match self.tab {
            Feature::Chat => &mut self.chat_scroll,
            Feature::Vision => &mut self.analysis_scroll,
            Feature::Story => &mut self.story_scroll,
        }
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let scroll = self.current_scroll();
        *scroll = scroll.saturating_add(lines);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        let scroll = self.current_scroll();
        *scroll = scroll.saturating_sub(lines);
    }

    pub fn scroll_to_top(&mut self) {
        *self.current_scroll() = 0;
    }

    /// Scroll chat so the newest message is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in self.chat.messages() {
            total_lines = total_lines.saturating_add(1); // Role line
            let body = if msg.text.is_empty() { " " } else { msg.text.as_str() };
            for line in body.lines() {
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count / wrap_width + 1 };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }

    /// Release every preview still held.
    pub fn shutdown(&mut self) {
        self.analysis.clear(&mut self.previews);
        self.story.clear(&mut self.previews);
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemsuite_core::{AudioBuffer, ChatRole};
    use std::io::Cursor;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct SilentSink;

    impl AudioSink for SilentSink {
        fn play(&self, _buffer: &AudioBuffer) -> gemsuite_core::Result<()> {
            Ok(())
        }
    }

    fn app_with(config: Config) -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config_path = std::env::temp_dir().join("gemsuite-test-unused.json");
        (App::new(config, config_path, tx, Arc::new(SilentSink)), rx)
    }

    fn keyed_app() -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        app_with(Config {
            api_key: Some("test-key".to_string()),
            ..Config::default()
        })
    }

    fn write_png(dir: &TempDir, name: &str) -> String {
        let image = image::RgbImage::from_fn(8, 4, |x, y| image::Rgb([x as u8 * 30, y as u8 * 60, 90]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, bytes.into_inner()).unwrap();
        path.display().to_string()
    }

    fn submit_path(app: &mut App, path: &str) {
        app.open_pick_popup();
        for c in path.chars() {
            app.popup_input.insert(c);
        }
        app.submit_image_path(app.tab);
    }

    /// Hand the next background completion to the app.
    async fn deliver(app: &mut App, rx: &mut mpsc::UnboundedReceiver<AppEvent>) {
        match rx.recv().await {
            Some(AppEvent::ImagePicked { generation, target, image, preview }) => {
                app.on_image_picked(generation, target, image, preview)
            }
            other => panic!("expected a picked image, got {:?}", other),
        }
    }

    async fn pick(app: &mut App, rx: &mut mpsc::UnboundedReceiver<AppEvent>, path: &str) {
        submit_path(app, path);
        deliver(app, rx).await;
    }

    #[tokio::test]
    async fn test_picking_image_creates_preview() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "scene.png");
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Vision);

        submit_path(&mut app, &path);
        assert!(app.analysis.slot.is_empty());
        deliver(&mut app, &mut rx).await;

        let image = app.analysis.slot.image().unwrap();
        assert_eq!(image.name, "scene.png");
        assert_eq!(image.mime_type, "image/png");
        let preview = app.analysis.slot.preview().unwrap();
        assert_eq!(app.previews.get(preview).unwrap().width, 8);
        assert!(app.popup.is_none());
    }

    #[tokio::test]
    async fn test_repicking_and_clearing_release_previews() {
        let dir = TempDir::new().unwrap();
        let first = write_png(&dir, "one.png");
        let second = write_png(&dir, "two.png");
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Story);

        pick(&mut app, &mut rx, &first).await;
        pick(&mut app, &mut rx, &second).await;
        assert_eq!(app.previews.live_count(), 1);

        app.clear_image();
        app.clear_image();
        assert_eq!(app.previews.live_count(), 0);
        assert_eq!(app.previews.revoked_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_path_sets_status() {
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Vision);
        submit_path(&mut app, "/tmp/notes.txt");

        assert!(app.analysis.slot.is_empty());
        assert!(app.status.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreadable_image_reports_status() {
        let dir = TempDir::new().unwrap();
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Vision);

        pick(&mut app, &mut rx, &dir.path().join("gone.png").display().to_string()).await;

        assert!(app.analysis.slot.is_empty());
        assert!(app.status.as_deref().unwrap().contains("gone.png"));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_kept_without_preview() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not really a png").unwrap();
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Story);

        pick(&mut app, &mut rx, &path.display().to_string()).await;

        assert_eq!(app.story.slot.image().unwrap().name, "broken.png");
        assert!(app.story.slot.preview().is_none());
        assert_eq!(app.previews.live_count(), 0);
    }

    #[tokio::test]
    async fn test_load_landing_after_clear_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "late.png");
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Vision);

        submit_path(&mut app, &path);
        app.clear_image();
        deliver(&mut app, &mut rx).await;

        assert!(app.analysis.slot.is_empty());
        assert_eq!(app.previews.live_count(), 0);
    }

    #[tokio::test]
    async fn test_only_latest_pick_is_installed() {
        let dir = TempDir::new().unwrap();
        let first = write_png(&dir, "first.png");
        let second = write_png(&dir, "second.png");
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Story);

        submit_path(&mut app, &first);
        submit_path(&mut app, &second);
        deliver(&mut app, &mut rx).await;
        deliver(&mut app, &mut rx).await;

        assert_eq!(app.story.slot.image().unwrap().name, "second.png");
        assert_eq!(app.previews.live_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_opens_popup_without_sending() {
        for var in gemsuite_core::config::API_KEY_ENV_VARS {
            if std::env::var(var).is_ok() {
                return;
            }
        }
        let (mut app, _rx) = app_with(Config::default());
        for c in "hello".chars() {
            app.chat_input.insert(c);
        }

        app.submit_chat();

        assert_eq!(app.popup, Some(Popup::ApiKey));
        assert_eq!(app.chat_input.text(), "hello");
        assert_eq!(app.chat.messages().len(), 1);
        assert!(!app.chat.is_loading());
    }

    #[tokio::test]
    async fn test_chat_completion_restores_session() {
        let (mut app, _rx) = keyed_app();
        let generation = app.chat.begin_send("Hi").unwrap();
        let session = ChatSession::default();

        app.on_chat_update(generation, "Hel");
        app.on_chat_update(generation, "Hello!");
        app.on_chat_done(generation, session, Ok("Hello!".to_string()));

        assert!(app.chat_session.is_some());
        assert!(!app.chat.is_loading());
        assert_eq!(app.chat.messages().last().unwrap().text, "Hello!");
    }

    #[tokio::test]
    async fn test_chat_failure_replaces_partial_reply() {
        let (mut app, _rx) = keyed_app();
        let generation = app.chat.begin_send("Hi").unwrap();
        let session = ChatSession::default();

        app.on_chat_update(generation, "Hel");
        app.on_chat_done(generation, session, Err("connection reset".to_string()));

        let last = app.chat.messages().last().unwrap();
        assert_eq!(last.role, ChatRole::Model);
        assert!(last.is_error);
        assert_eq!(app.chat.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_reset_drops_in_flight_reply() {
        let (mut app, _rx) = keyed_app();
        let generation = app.chat.begin_send("Hi").unwrap();
        let stale = ChatSession::default();

        app.reset_chat();
        app.on_chat_update(generation, "late");
        app.on_chat_done(generation, stale, Ok("late".to_string()));

        assert_eq!(app.chat.messages().len(), 1);
        assert!(app.chat_session.is_none());
        assert!(!app.chat.is_loading());
    }

    #[tokio::test]
    async fn test_story_results_flow_into_session() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "forest.png");
        let (mut app, mut rx) = keyed_app();
        app.select_tab(Feature::Story);
        pick(&mut app, &mut rx, &path).await;

        let (generation, _) = app.story.begin().unwrap();
        app.on_story_done(generation, Ok("Fog curled between the pines.".to_string()));
        assert_eq!(app.story.story, "Fog curled between the pines.");

        let (narration, _) = app.story.begin_narration().unwrap();
        assert!(app.is_busy());
        app.on_narration_done(narration, Err("no audio".to_string()));
        assert!(!app.story.is_playing_audio);
        assert_eq!(app.story.error.as_deref(), Some("Failed to narrate story."));
    }

    #[tokio::test]
    async fn test_api_key_popup_builds_suite() {
        let dir = TempDir::new().unwrap();
        let (mut app, _rx) = app_with(Config::default());
        app.config_path = dir.path().join("gemsuite").join("config.json");
        app.suite = None;
        app.open_api_key_popup();
        for c in " secret-key ".chars() {
            app.popup_input.insert(c);
        }

        app.submit_api_key();

        assert!(app.popup.is_none());
        assert!(app.suite.is_some());
        let saved = Config::load_from(&app.config_path).unwrap();
        assert_eq!(saved.api_key.as_deref(), Some("secret-key"));
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~/pics/a.png"), home.join("pics/a.png"));
        assert_eq!(expand_home("/abs/a.png"), PathBuf::from("/abs/a.png"));
        assert_eq!(expand_home("~user/a.png"), PathBuf::from("~user/a.png"));
    }

    #[test]
    fn test_tab_cycling_leaves_editing_mode() {
        let (mut app, _rx) = app_with(Config::default());
        app.input_mode = InputMode::Editing;
        app.next_tab();
        assert_eq!(app.tab, Feature::Vision);
        assert_eq!(app.input_mode, InputMode::Normal);
        app.previous_tab();
        app.previous_tab();
        assert_eq!(app.tab, Feature::Story);
    }
}
