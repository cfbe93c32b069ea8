mod activity;
mod api;
mod config;
mod markdown;
mod session;
mod stream;

use iced::widget::{
    button, checkbox, column, container, mouse_area, progress_bar, row, scrollable, text,
    text_input, toggler, Column, Row, Space,
};
use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    mouse,
    widget::scrollable::RelativeOffset,
    window, Element, Length, Subscription, Task, Theme,
};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ChatMessage, EmbedEnd, LocalFile, Sender};
use crate::config::Config;
use crate::session::{AuthPhase, EmbedPhase, PreviewPhase};
use crate::stream::{EmbedOutcome, ProgressEvent};

macro_rules! debug_println {
    ($($arg:tt)*) => {
        if std::env::var("RESEARCH_GPT_DEBUG").is_ok() {
            eprintln!($($arg)*);
        }
    };
}

fn main() -> iced::Result {
    let config = Config::load();

    iced::application("Research-GPT", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(App::new)
}

/// Progress feed of one embed submission, delivered through a stream-backed
/// task so the bar advances while the request is still in flight.
#[derive(Debug, Clone)]
enum EmbedFeed {
    Progress(ProgressEvent),
    Finished(EmbedOutcome),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
enum Message {
    // Auth
    UsernameChanged(String),
    PasswordChanged(String),
    SubmitLogin,
    SubmitRegister,
    LoggedIn { username: String, token: String },
    AuthFailed { username: String, error: String },
    Registered { username: String },
    TokenChecked(Result<String, String>),
    Logout,

    // Chat
    InputChanged(String),
    SendQuestion,
    AnswerReceived(Result<(String, Vec<api::Evidence>), String>),
    OpenModeToggled(bool),

    // Local files
    PickFiles,
    FilesPicked(Vec<LocalFile>),
    ToggleFileSelected(usize),
    SelectAllFiles,
    DeselectAllFiles,
    RemoveSelectedFiles,

    // Embedding lifecycle
    EmbedNameChanged(String),
    StartEmbed,
    CancelEmbed,
    EmbedFeed(EmbedFeed),
    ClearStatus(u64),

    // Embedding registry
    ToggleEmbeddingList,
    EmbeddingListLoaded(Result<Vec<String>, String>),
    SelectEmbedding(String),
    EmbeddingLoaded { name: String, files: Vec<String>, messages: Vec<ChatMessage> },
    EmbeddingLoadFailed(String),
    UnloadEmbedding,
    DeleteEmbedding,
    DeleteConfirmed(bool),
    EmbeddingDeleted(Result<String, String>),

    // Sidebar resize
    SidebarDragStarted,
    SidebarDragged(f32),
    SidebarDragEnded,

    // Preview pane
    PreviewFile(String),
    FilePreviewLoaded { filename: String, bytes: Vec<u8> },
    PreviewChunksRequested(String),
    EvidenceClicked { filename: String, chunk_index: usize },
    ChunksLoaded { filename: String, chunks: Vec<String>, highlight: Option<usize> },
    PreviewFailed(String),
    ClosePreview,
}

/// One row of the sidebar file list. `existing` files came with a loaded
/// embedding and have no local bytes.
#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    bytes: Option<Vec<u8>>,
    selected: bool,
    existing: bool,
}

struct App {
    config: Config,
    api: ApiClient,

    auth: AuthPhase,
    auth_error: Option<String>,
    auth_notice: Option<String>,

    files: Vec<FileEntry>,
    messages: Vec<ChatMessage>,
    input: String,
    asking: bool,
    error: Option<String>,

    embed: EmbedPhase,
    embed_name: String,
    pending_embedding: Option<String>,
    cancel: Option<CancellationToken>,
    status_epoch: u64,
    notice: Option<String>,

    embeddings: Vec<String>,
    show_embedding_list: bool,
    selected_embedding: String,
    open_mode: bool,

    sidebar_width: f32,
    resizing_sidebar: bool,

    preview: PreviewPhase,
}

const SIDEBAR_MIN_WIDTH: f32 = 150.0;
const SIDEBAR_MAX_WIDTH: f32 = 500.0;
const SIDEBAR_DEFAULT_WIDTH: f32 = 320.0;

fn clamped_sidebar_width(cursor_x: f32) -> f32 {
    cursor_x.clamp(SIDEBAR_MIN_WIDTH, SIDEBAR_MAX_WIDTH)
}

/// Preview body for a fetched file: its text, or a placeholder when the
/// bytes are not UTF-8 (a PDF, an image).
fn preview_body(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => format!(
            "No text preview available ({:.1} KB binary file).",
            e.as_bytes().len() as f64 / 1024.0
        ),
    }
}

fn chat_scroll_id() -> scrollable::Id {
    scrollable::Id::new("chat")
}

fn file_icon(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "📄",
        "png" | "jpg" | "jpeg" | "gif" => "🖼️",
        "doc" | "docx" => "📝",
        "xls" | "xlsx" => "📊",
        "zip" | "rar" => "🗜️",
        _ => "📁",
    }
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = Config::load();
        let mut api = ApiClient::new(config.server.base_url.clone());
        api.set_token(Config::load_token());

        let restore = if api.has_token() {
            let client = api.clone();
            Task::future(async move {
                match client.test_auth().await {
                    Ok(username) => Message::TokenChecked(Ok(username)),
                    Err(e) => Message::TokenChecked(Err(e.to_string())),
                }
            })
        } else {
            Task::none()
        };

        let auth = if api.has_token() { AuthPhase::SigningIn } else { AuthPhase::signed_out() };

        let app = App {
            config,
            api,
            auth,
            auth_error: None,
            auth_notice: None,
            files: Vec::new(),
            messages: Vec::new(),
            input: String::new(),
            asking: false,
            error: None,
            embed: EmbedPhase::Idle,
            embed_name: String::new(),
            pending_embedding: None,
            cancel: None,
            status_epoch: 0,
            notice: None,
            embeddings: Vec::new(),
            show_embedding_list: false,
            selected_embedding: String::new(),
            open_mode: false,
            sidebar_width: SIDEBAR_DEFAULT_WIDTH,
            resizing_sidebar: false,
            preview: PreviewPhase::Closed,
        };

        (app, restore)
    }

    fn has_local_uploads(&self) -> bool {
        self.files.iter().any(|f| !f.existing)
    }

    /// Arms the timer that wipes the transient status line, invalidating any
    /// earlier timer still in flight.
    fn schedule_status_clear(&mut self) -> Task<Message> {
        self.status_epoch += 1;
        let epoch = self.status_epoch;
        let delay = std::time::Duration::from_secs(self.config.server.status_clear_secs);
        Task::future(async move {
            tokio::time::sleep(delay).await;
            Message::ClearStatus(epoch)
        })
    }

    fn unload_workspace(&mut self) {
        self.files.clear();
        self.messages.clear();
        self.selected_embedding.clear();
        self.preview = PreviewPhase::Closed;
        self.show_embedding_list = false;
        self.error = None;
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            // ----- Auth -----
            Message::UsernameChanged(value) => {
                if let AuthPhase::SignedOut { username, .. } = &mut self.auth {
                    *username = value;
                }
                Task::none()
            }
            Message::PasswordChanged(value) => {
                if let AuthPhase::SignedOut { password, .. } = &mut self.auth {
                    *password = value;
                }
                Task::none()
            }
            Message::SubmitLogin => self.submit_credentials(false),
            Message::SubmitRegister => self.submit_credentials(true),
            Message::LoggedIn { username, token } => {
                Config::save_token(&token);
                self.api.set_token(Some(token));
                self.auth = AuthPhase::SignedIn { username };
                self.auth_error = None;
                self.auth_notice = None;
                Task::none()
            }
            Message::AuthFailed { username, error } => {
                self.auth = AuthPhase::SignedOut { username, password: String::new() };
                self.auth_error = Some(error);
                Task::none()
            }
            Message::Registered { username } => {
                self.auth = AuthPhase::SignedOut { username, password: String::new() };
                self.auth_error = None;
                self.auth_notice = Some("Account created. You can sign in now.".to_string());
                Task::none()
            }
            Message::TokenChecked(result) => {
                match result {
                    Ok(username) => {
                        activity::log_with(activity::Kind::Auth, format!("session restored for {username}"));
                        self.auth = AuthPhase::SignedIn { username };
                    }
                    Err(e) => {
                        debug_println!("Stored token rejected: {}", e);
                        Config::clear_token();
                        self.api.set_token(None);
                        self.auth = AuthPhase::signed_out();
                    }
                }
                Task::none()
            }
            Message::Logout => {
                Config::clear_token();
                self.api.set_token(None);
                self.unload_workspace();
                self.embeddings.clear();
                self.auth = AuthPhase::signed_out();
                Task::none()
            }

            // ----- Chat -----
            Message::InputChanged(value) => {
                self.input = value;
                Task::none()
            }
            Message::SendQuestion => {
                let question = self.input.trim().to_string();
                if question.is_empty() || self.asking {
                    return Task::none();
                }
                if self.selected_embedding.is_empty() && !self.open_mode {
                    self.error =
                        Some("Load or create an embedding first, or enable open mode.".to_string());
                    return Task::none();
                }

                self.messages.push(ChatMessage {
                    from: Sender::User,
                    content: question.clone(),
                    evidence: None,
                });
                self.input.clear();
                self.error = None;
                self.asking = true;

                let client = self.api.clone();
                let embedding = self.selected_embedding.clone();
                let open_mode = self.open_mode;
                Task::batch([
                    Task::future(async move {
                        match client.ask(&question, &embedding, open_mode).await {
                            Ok(reply) => Message::AnswerReceived(Ok(reply)),
                            Err(e) => Message::AnswerReceived(Err(e.to_string())),
                        }
                    }),
                    scrollable::snap_to(chat_scroll_id(), RelativeOffset::END),
                ])
            }
            Message::AnswerReceived(result) => {
                self.asking = false;
                match result {
                    Ok((answer, evidence)) => {
                        self.messages.push(ChatMessage {
                            from: Sender::Bot,
                            content: answer,
                            evidence: Some(evidence),
                        });
                        scrollable::snap_to(chat_scroll_id(), RelativeOffset::END)
                    }
                    Err(e) => {
                        self.error = Some(e);
                        Task::none()
                    }
                }
            }
            Message::OpenModeToggled(enabled) => {
                self.open_mode = enabled;
                Task::none()
            }

            // ----- Local files -----
            Message::PickFiles => Task::future(async {
                let picked = rfd::AsyncFileDialog::new().pick_files().await;
                let mut files = Vec::new();
                for handle in picked.unwrap_or_default() {
                    let bytes = handle.read().await;
                    files.push(LocalFile { name: handle.file_name(), bytes });
                }
                Message::FilesPicked(files)
            }),
            Message::FilesPicked(picked) => {
                for file in picked {
                    activity::log(format!("picked {} ({} bytes)", file.name, file.bytes.len()));
                    self.files.push(FileEntry {
                        name: file.name,
                        bytes: Some(file.bytes),
                        selected: true,
                        existing: false,
                    });
                }
                Task::none()
            }
            Message::ToggleFileSelected(index) => {
                if let Some(file) = self.files.get_mut(index) {
                    file.selected = !file.selected;
                }
                Task::none()
            }
            Message::SelectAllFiles => {
                for file in &mut self.files {
                    if !file.existing {
                        file.selected = true;
                    }
                }
                Task::none()
            }
            Message::DeselectAllFiles => {
                for file in &mut self.files {
                    file.selected = false;
                }
                Task::none()
            }
            Message::RemoveSelectedFiles => {
                self.files.retain(|f| f.existing || !f.selected);
                Task::none()
            }

            // ----- Embedding lifecycle -----
            Message::EmbedNameChanged(value) => {
                self.embed_name = value;
                Task::none()
            }
            Message::StartEmbed => self.start_embed(),
            Message::CancelEmbed => {
                if let Some(token) = &self.cancel {
                    token.cancel();
                }
                Task::none()
            }
            Message::EmbedFeed(feed) => self.on_embed_feed(feed),
            Message::ClearStatus(epoch) => {
                if epoch == self.status_epoch && !self.embed.in_flight() {
                    self.embed.reset();
                    self.notice = None;
                }
                Task::none()
            }

            // ----- Embedding registry -----
            Message::ToggleEmbeddingList => {
                if self.show_embedding_list {
                    self.show_embedding_list = false;
                    return Task::none();
                }
                let client = self.api.clone();
                Task::future(async move {
                    match client.list_embeddings().await {
                        Ok(names) => Message::EmbeddingListLoaded(Ok(names)),
                        Err(e) => Message::EmbeddingListLoaded(Err(e.to_string())),
                    }
                })
            }
            Message::EmbeddingListLoaded(result) => {
                match result {
                    Ok(names) => {
                        self.embeddings = names;
                        self.show_embedding_list = true;
                    }
                    Err(e) => self.error = Some(format!("Could not fetch embedding list: {e}")),
                }
                Task::none()
            }
            Message::SelectEmbedding(name) => {
                self.show_embedding_list = false;
                let client = self.api.clone();
                Task::future(async move {
                    match client.load_embedding(&name).await {
                        Ok(files) => {
                            // History is best effort; an empty transcript is
                            // fine for a freshly created embedding.
                            let messages = client.load_chat(&name).await.unwrap_or_default();
                            Message::EmbeddingLoaded { name, files, messages }
                        }
                        Err(e) => Message::EmbeddingLoadFailed(e.to_string()),
                    }
                })
            }
            Message::EmbeddingLoaded { name, files, messages } => {
                self.files = files
                    .into_iter()
                    .map(|name| FileEntry { name, bytes: None, selected: false, existing: true })
                    .collect();
                self.messages = messages;
                self.embed_name = name.clone();
                self.selected_embedding = name;
                self.preview = PreviewPhase::Closed;
                self.error = None;
                scrollable::snap_to(chat_scroll_id(), RelativeOffset::END)
            }
            Message::EmbeddingLoadFailed(e) => {
                self.error = Some(format!("Could not load selected embedding: {e}"));
                Task::none()
            }
            Message::UnloadEmbedding => {
                self.unload_workspace();
                self.notice = Some("Embedding unloaded".to_string());
                self.schedule_status_clear()
            }
            Message::DeleteEmbedding => {
                if self.selected_embedding.is_empty() {
                    self.error = Some("No embedding loaded.".to_string());
                    return Task::none();
                }
                let name = self.selected_embedding.clone();
                Task::future(async move {
                    let answer = rfd::AsyncMessageDialog::new()
                        .set_title("Delete embedding")
                        .set_description(format!(
                            "Are you sure you want to delete the embedding \"{name}\"? This action cannot be undone."
                        ))
                        .set_buttons(rfd::MessageButtons::YesNo)
                        .show()
                        .await;
                    Message::DeleteConfirmed(matches!(answer, rfd::MessageDialogResult::Yes))
                })
            }
            Message::DeleteConfirmed(confirmed) => {
                if !confirmed {
                    return Task::none();
                }
                let client = self.api.clone();
                let name = self.selected_embedding.clone();
                Task::future(async move {
                    match client.delete_embedding(&name).await {
                        Ok(message) => Message::EmbeddingDeleted(Ok(message)),
                        Err(e) => Message::EmbeddingDeleted(Err(e.to_string())),
                    }
                })
            }
            Message::EmbeddingDeleted(result) => match result {
                Ok(message) => {
                    self.unload_workspace();
                    self.notice = Some(if message.is_empty() {
                        "Embedding deleted".to_string()
                    } else {
                        message
                    });
                    self.schedule_status_clear()
                }
                Err(e) => {
                    self.error = Some(format!("Failed to delete embedding: {e}"));
                    Task::none()
                }
            },

            // ----- Sidebar resize -----
            Message::SidebarDragStarted => {
                self.resizing_sidebar = true;
                Task::none()
            }
            Message::SidebarDragged(cursor_x) => {
                self.sidebar_width = clamped_sidebar_width(cursor_x);
                Task::none()
            }
            Message::SidebarDragEnded => {
                self.resizing_sidebar = false;
                Task::none()
            }

            // ----- Preview pane -----
            Message::PreviewFile(filename) => {
                self.preview = PreviewPhase::Loading { filename: filename.clone() };
                let client = self.api.clone();
                let embedding = self.selected_embedding.clone();
                Task::future(async move {
                    match client.preview_file(&filename, &embedding).await {
                        Ok(bytes) => Message::FilePreviewLoaded { filename, bytes },
                        Err(e) => Message::PreviewFailed(e.to_string()),
                    }
                })
            }
            Message::FilePreviewLoaded { filename, bytes } => {
                self.preview = PreviewPhase::File { filename, text: preview_body(bytes) };
                Task::none()
            }
            Message::PreviewChunksRequested(filename) => self.load_chunks(filename, None),
            Message::EvidenceClicked { filename, chunk_index } => {
                if let PreviewPhase::Chunks { filename: shown, highlight, .. } = &mut self.preview {
                    if *shown == filename {
                        *highlight = Some(chunk_index);
                        return Task::none();
                    }
                }
                self.load_chunks(filename, Some(chunk_index))
            }
            Message::ChunksLoaded { filename, chunks, highlight } => {
                self.preview = PreviewPhase::Chunks { filename, chunks, highlight };
                Task::none()
            }
            Message::PreviewFailed(e) => {
                self.preview = PreviewPhase::Closed;
                self.error = Some(format!("Preview failed: {e}"));
                Task::none()
            }
            Message::ClosePreview => {
                self.preview = PreviewPhase::Closed;
                Task::none()
            }
        }
    }

    fn submit_credentials(&mut self, register: bool) -> Task<Message> {
        let AuthPhase::SignedOut { username, password } = &self.auth else {
            return Task::none();
        };
        let username = username.trim().to_string();
        let password = password.clone();
        if username.is_empty() || password.is_empty() {
            self.auth_error = Some("Enter a username and password.".to_string());
            return Task::none();
        }

        self.auth = AuthPhase::SigningIn;
        self.auth_error = None;
        self.auth_notice = None;

        let client = self.api.clone();
        Task::future(async move {
            if register {
                match client.register(&username, &password).await {
                    Ok(()) => Message::Registered { username },
                    Err(e) => Message::AuthFailed { username, error: e.to_string() },
                }
            } else {
                match client.login(&username, &password).await {
                    Ok(token) => Message::LoggedIn { username, token },
                    Err(e) => Message::AuthFailed { username, error: e.to_string() },
                }
            }
        })
    }

    fn start_embed(&mut self) -> Task<Message> {
        let selected: Vec<LocalFile> = self
            .files
            .iter()
            .filter(|f| f.selected && !f.existing)
            .filter_map(|f| {
                f.bytes
                    .clone()
                    .map(|bytes| LocalFile { name: f.name.clone(), bytes })
            })
            .collect();
        if selected.is_empty() {
            self.error = Some("No files selected for embedding.".to_string());
            return Task::none();
        }

        let name = if self.embed_name.trim().is_empty() {
            self.selected_embedding.clone()
        } else {
            self.embed_name.trim().to_string()
        };
        if name.is_empty() {
            self.error = Some("Enter a name for this embedding.".to_string());
            return Task::none();
        }

        if !self.embed.begin() {
            self.error = Some("An embedding run is already in progress.".to_string());
            return Task::none();
        }
        self.error = None;
        self.pending_embedding = Some(name.clone());

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        let client = self.api.clone();

        let feed = iced::stream::channel(100, move |mut tx| async move {
            use futures_util::SinkExt;

            // Progress sends are awaited so a burst of lines in one chunk
            // cannot overrun the channel; every event reaches the UI.
            let result = client
                .embed_files(&name, true, selected, cancel, |event| {
                    let mut tx = tx.clone();
                    async move {
                        let _ = tx.send(EmbedFeed::Progress(event)).await;
                    }
                })
                .await;
            let end = match result {
                Ok(EmbedEnd::Completed(outcome)) => EmbedFeed::Finished(outcome),
                Ok(EmbedEnd::Cancelled) => EmbedFeed::Cancelled,
                Err(e) => EmbedFeed::Failed(e.to_string()),
            };
            let _ = tx.send(end).await;
        });

        Task::run(feed, Message::EmbedFeed)
    }

    fn on_embed_feed(&mut self, feed: EmbedFeed) -> Task<Message> {
        match feed {
            EmbedFeed::Progress(event) => {
                self.embed.advance(event);
                Task::none()
            }
            EmbedFeed::Finished(outcome) => {
                self.cancel = None;
                let message = if outcome.message.is_empty() {
                    "Embedding complete".to_string()
                } else {
                    outcome.message.clone()
                };
                self.embed.complete(message.clone());

                if outcome.status.as_deref() != Some("error") {
                    if let Some(name) = self.pending_embedding.take() {
                        self.selected_embedding = name;
                    }
                    for file in &mut self.files {
                        if file.selected && !file.existing {
                            file.existing = true;
                            file.selected = false;
                            file.bytes = None;
                        }
                    }
                }
                self.pending_embedding = None;

                let _ = notify_rust::Notification::new()
                    .summary("Research-GPT")
                    .body(&message)
                    .show();
                self.schedule_status_clear()
            }
            EmbedFeed::Failed(error) => {
                self.cancel = None;
                self.pending_embedding = None;
                self.embed.fail(error.clone());
                let _ = notify_rust::Notification::new()
                    .summary("Research-GPT")
                    .body(&format!("Embedding failed: {error}"))
                    .show();
                self.schedule_status_clear()
            }
            EmbedFeed::Cancelled => {
                self.cancel = None;
                self.pending_embedding = None;
                self.embed.cancel();
                self.schedule_status_clear()
            }
        }
    }

    fn load_chunks(&mut self, filename: String, highlight: Option<usize>) -> Task<Message> {
        let client = self.api.clone();
        let embedding = self.selected_embedding.clone();
        Task::future(async move {
            match client.preview_chunks(&filename, &embedding).await {
                Ok(chunks) => Message::ChunksLoaded { filename, chunks, highlight },
                Err(e) => Message::PreviewFailed(e.to_string()),
            }
        })
    }

    fn subscription(&self) -> Subscription<Message> {
        let keys = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::ClosePreview)
            } else {
                None
            }
        });

        if !self.resizing_sidebar {
            return keys;
        }

        // Only tracked while the divider is held down.
        let drag = event::listen_with(|event, _status, _id| match event {
            IcedEvent::Mouse(mouse::Event::CursorMoved { position }) => {
                Some(Message::SidebarDragged(position.x))
            }
            IcedEvent::Mouse(mouse::Event::ButtonReleased(mouse::Button::Left)) => {
                Some(Message::SidebarDragEnded)
            }
            _ => None,
        });
        Subscription::batch([keys, drag])
    }

    fn view(&self) -> Element<Message> {
        match &self.auth {
            AuthPhase::SignedIn { username } => self.chat_view(username),
            _ => self.login_view(),
        }
    }

    fn login_view(&self) -> Element<Message> {
        let signing_in = matches!(self.auth, AuthPhase::SigningIn);
        let (username, password) = match &self.auth {
            AuthPhase::SignedOut { username, password } => (username.as_str(), password.as_str()),
            _ => ("", ""),
        };

        let mut form = column![
            text("Research-GPT").size(28),
            text_input("Username", username)
                .on_input(Message::UsernameChanged)
                .padding(10),
            text_input("Password", password)
                .on_input(Message::PasswordChanged)
                .on_submit(Message::SubmitLogin)
                .secure(true)
                .padding(10),
            row![
                button(text("Login"))
                    .on_press_maybe((!signing_in).then_some(Message::SubmitLogin))
                    .padding(10),
                button(text("Register"))
                    .on_press_maybe((!signing_in).then_some(Message::SubmitRegister))
                    .padding(10),
            ]
            .spacing(10),
        ]
        .spacing(15)
        .max_width(360);

        if signing_in {
            form = form.push(text("Signing in...").size(14));
        }
        if let Some(error) = &self.auth_error {
            form = form.push(text(format!("⚠ {error}")).size(14));
        }
        if let Some(notice) = &self.auth_notice {
            form = form.push(text(notice.as_str()).size(14));
        }

        container(form)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn chat_view<'a>(&'a self, username: &'a str) -> Element<'a, Message> {
        let resizer = mouse_area(Space::new(Length::Fixed(6.0), Length::Fill))
            .on_press(Message::SidebarDragStarted)
            .interaction(mouse::Interaction::ResizingHorizontally);

        let body = row![
            self.sidebar(),
            resizer,
            column![
                self.header(username),
                self.transcript(),
                self.composer(),
            ]
            .width(Length::Fill),
        ];

        let body: Element<Message> = if self.preview.is_open() {
            row![body.width(Length::FillPortion(2)), self.preview_pane()].into()
        } else {
            body.into()
        };

        container(body).width(Length::Fill).height(Length::Fill).into()
    }

    fn sidebar(&self) -> Element<Message> {
        let embed_button: Element<Message> = if self.embed.in_flight() {
            button(text("✖ Cancel")).on_press(Message::CancelEmbed).padding(8).into()
        } else {
            button(text("🧩 Embed")).on_press(Message::StartEmbed).padding(8).into()
        };

        let mut sidebar = column![
            row![
                button(text("📁 Files...")).on_press(Message::PickFiles).padding(8),
                embed_button,
            ]
            .spacing(6),
            text_input("Embedding name", &self.embed_name)
                .on_input(Message::EmbedNameChanged)
                .padding(6)
                .size(14),
            row![
                button(text(if self.show_embedding_list { "🔄 Load ▴" } else { "🔄 Load ▾" }))
                    .on_press(Message::ToggleEmbeddingList)
                    .padding(8),
                button(text("🚪 Unload")).on_press(Message::UnloadEmbedding).padding(8),
                button(text("🗑 Delete")).on_press(Message::DeleteEmbedding).padding(8),
            ]
            .spacing(6),
        ]
        .spacing(10)
        .padding(10)
        .width(Length::Fixed(self.sidebar_width));

        if self.show_embedding_list {
            let mut list = Column::new().spacing(2);
            if self.embeddings.is_empty() {
                list = list.push(text("No embeddings").size(13));
            } else {
                for name in &self.embeddings {
                    list = list.push(
                        button(text(name.as_str()).size(13))
                            .on_press(Message::SelectEmbedding(name.clone()))
                            .width(Length::Fill)
                            .padding(4),
                    );
                }
            }
            sidebar = sidebar.push(container(list).style(container::bordered_box).padding(4));
        }

        if let Some(event) = self.embed.progress() {
            sidebar = sidebar.push(
                column![
                    progress_bar(0.0..=100.0, event.percent()).height(Length::Fixed(10.0)),
                    text(format!("{} / {} chunks embedded", event.completed, event.total)).size(12),
                ]
                .spacing(4),
            );
        }

        let status = self.embed.status().or_else(|| self.notice.clone());
        if let Some(status) = status {
            sidebar = sidebar.push(text(status).size(12));
        }

        if self.has_local_uploads() {
            sidebar = sidebar.push(
                row![
                    button(text("Select All").size(12)).on_press(Message::SelectAllFiles).padding(4),
                    button(text("Deselect All").size(12)).on_press(Message::DeselectAllFiles).padding(4),
                    button(text("Remove").size(12)).on_press(Message::RemoveSelectedFiles).padding(4),
                ]
                .spacing(6),
            );
        }

        let mut file_list = Column::new().spacing(6);
        for (index, file) in self.files.iter().enumerate() {
            let mut entry = Row::new().spacing(8).align_y(alignment::Vertical::Center);
            if !file.existing {
                entry = entry.push(
                    checkbox("", file.selected).on_toggle(move |_| Message::ToggleFileSelected(index)),
                );
            }
            entry = entry.push(text(file_icon(&file.name)).size(20));
            entry = entry.push(
                button(
                    column![
                        text(file.name.as_str()).size(13),
                        text(match &file.bytes {
                            Some(bytes) => format!("{:.1} KB", bytes.len() as f64 / 1024.0),
                            None => "Embedded".to_string(),
                        })
                        .size(11),
                    ]
                    .spacing(2),
                )
                .style(button::text)
                .on_press(Message::PreviewFile(file.name.clone()))
                .padding(2),
            );
            if file.existing {
                entry = entry.push(
                    button(text("chunks").size(11))
                        .on_press(Message::PreviewChunksRequested(file.name.clone()))
                        .padding(3),
                );
            }
            file_list = file_list.push(entry);
        }
        sidebar = sidebar.push(scrollable(file_list).height(Length::Fill));

        if std::env::var("RESEARCH_GPT_DEBUG").is_ok() {
            if let Some(entry) = activity::recent(1).pop() {
                sidebar = sidebar.push(text(entry.text).size(10));
            }
        }

        container(sidebar).height(Length::Fill).style(container::bordered_box).into()
    }

    fn header<'a>(&'a self, username: &'a str) -> Element<'a, Message> {
        let title = if self.selected_embedding.is_empty() {
            "Research-GPT".to_string()
        } else {
            format!("Research-GPT ({})", self.selected_embedding)
        };

        row![
            text(title).size(20).width(Length::Fill),
            row![
                text(if self.open_mode { "🔓 Use LLM freely" } else { "🔒 Use LLM freely" }).size(13),
                toggler(self.open_mode).on_toggle(Message::OpenModeToggled),
            ]
            .spacing(6)
            .align_y(alignment::Vertical::Center),
            text(format!("👤 {username}")).size(14),
            button(text("Logout")).on_press(Message::Logout).padding(8),
        ]
        .spacing(14)
        .padding(10)
        .align_y(alignment::Vertical::Center)
        .into()
    }

    fn transcript(&self) -> Element<Message> {
        let mut feed = Column::new().spacing(12).padding(12);

        for message in &self.messages {
            feed = feed.push(self.message_view(message));
        }

        if self.asking {
            feed = feed.push(text("…").size(20));
        }
        if let Some(error) = &self.error {
            feed = feed.push(text(format!("⚠ {error}")).size(13));
        }

        scrollable(feed)
            .id(chat_scroll_id())
            .height(Length::Fill)
            .width(Length::Fill)
            .into()
    }

    fn message_view<'a>(&'a self, message: &'a ChatMessage) -> Element<'a, Message> {
        match message.from {
            Sender::User => container(
                container(text(message.content.as_str()).size(15))
                    .style(container::bordered_box)
                    .padding(10)
                    .max_width(520),
            )
            .width(Length::Fill)
            .align_x(alignment::Horizontal::Right)
            .into(),
            Sender::Bot => {
                let mut bubble = column![markdown::view(&message.content)].spacing(6);
                for evidence in message.evidence() {
                    bubble = bubble.push(
                        button(
                            text(format!(
                                "🔍 {}, Chunk {}",
                                evidence.filename,
                                evidence.chunk_index + 1
                            ))
                            .size(12),
                        )
                        .style(button::text)
                        .on_press(Message::EvidenceClicked {
                            filename: evidence.filename.clone(),
                            chunk_index: evidence.chunk_index,
                        })
                        .padding(2),
                    );
                }
                container(
                    container(bubble)
                        .style(container::bordered_box)
                        .padding(10)
                        .max_width(700),
                )
                .width(Length::Fill)
                .align_x(alignment::Horizontal::Left)
                .into()
            }
        }
    }

    fn composer(&self) -> Element<Message> {
        row![
            text_input("Type a message...", &self.input)
                .on_input(Message::InputChanged)
                .on_submit(Message::SendQuestion)
                .padding(12),
            button(text("Send")).on_press(Message::SendQuestion).padding(12),
        ]
        .spacing(8)
        .padding(10)
        .align_y(alignment::Vertical::Center)
        .into()
    }

    fn preview_pane(&self) -> Element<Message> {
        let (title, content): (String, Element<Message>) = match &self.preview {
            PreviewPhase::Closed => (String::new(), text("").into()),
            PreviewPhase::Loading { filename } => (
                filename.clone(),
                text("Loading preview...").size(14).into(),
            ),
            PreviewPhase::File { filename, text: body } => (
                filename.clone(),
                text(body.as_str()).size(13).into(),
            ),
            PreviewPhase::Chunks { filename, chunks, highlight } => {
                let mut list = Column::new().spacing(8);
                for (index, chunk) in chunks.iter().enumerate() {
                    let block = column![
                        text(format!("Chunk {}", index + 1)).size(12),
                        text(chunk.as_str()).size(13),
                    ]
                    .spacing(4);
                    let block = if *highlight == Some(index) {
                        container(block).style(container::bordered_box).padding(8)
                    } else {
                        container(block).padding(8)
                    };
                    list = list.push(block);
                }
                (filename.clone(), list.into())
            }
        };

        container(
            column![
                row![
                    text(format!("📄 {title}")).size(15).width(Length::Fill),
                    button(text("✖")).on_press(Message::ClosePreview).padding(4),
                ]
                .align_y(alignment::Vertical::Center),
                scrollable(container(content).padding(8)).height(Length::Fill),
            ]
            .spacing(8)
            .padding(8),
        )
        .width(Length::FillPortion(1))
        .height(Length::Fill)
        .style(container::bordered_box)
        .into()
    }

    fn theme(&self) -> Theme {
        Theme::Light
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidebar_width_follows_cursor_within_bounds() {
        assert_eq!(clamped_sidebar_width(300.0), 300.0);
        assert_eq!(clamped_sidebar_width(40.0), SIDEBAR_MIN_WIDTH);
        assert_eq!(clamped_sidebar_width(2000.0), SIDEBAR_MAX_WIDTH);
    }

    #[test]
    fn text_preview_passes_through() {
        assert_eq!(preview_body(b"plain contents".to_vec()), "plain contents");
    }

    #[test]
    fn binary_preview_reports_fractional_kilobytes() {
        // Small binaries must not round down to "0 KB".
        let body = preview_body(vec![0xFF; 300]);
        assert_eq!(body, "No text preview available (0.3 KB binary file).");
    }
}
