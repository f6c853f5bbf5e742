//! Confirm-click browser sessions
//!
//! A confirm-click account is completed by a human inside an embedded
//! browser. The crate never clicks "post" itself; it loads the composer,
//! pre-fills the text, then waits for either a navigation to a permalink or
//! the user's explicit "done". Composers with a `success_selector` are also
//! watched from inside the page: an observer flags the success element and
//! the driver polls for it every half second for up to thirty seconds.
//!
//! The logic lives in [`Coordinator`], a pure state machine: it consumes
//! [`SessionEvent`]s and returns [`SessionCommand`]s, so every transition is
//! testable without a browser. [`SessionDriver`] runs a coordinator against a
//! real [`BrowserSurface`] with tokio timers.
//!
//! ```text
//! Idle -> Loading -> PrefillPending -> AwaitingUserConfirm -> Captured
//!                                                          -> MarkedDone
//!                                                          -> TimedOut
//!   (any page-load failure)                                -> Failed
//! ```

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::error::{ErrorCode, PlatformError};
use crate::events::{Event, EventBus};
use crate::imaging::ProcessedImage;
use crate::specs::{ComposerSpec, PlatformSpec};
use crate::types::{AccountConfig, PostResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    PrefillPending,
    AwaitingUserConfirm,
    Captured { url: String },
    MarkedDone,
    TimedOut,
    Failed { code: ErrorCode },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Captured { .. }
                | SessionState::MarkedDone
                | SessionState::TimedOut
                | SessionState::Failed { .. }
        )
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    LoadFinished { ok: bool },
    /// The prefill delay elapsed
    PrefillDue,
    PrefillCompleted { ok: bool },
    Navigated { url: String },
    /// The success poll interval elapsed
    SuccessPollDue,
    /// The page showed its success element, with the permalink if one was found
    SuccessDetected { url: Option<String> },
    UserMarkedDone,
    UserClosed,
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Navigate { url: String },
    SchedulePrefill { delay: Duration },
    InjectText { script: String },
    InstallObserver { script: String },
    SchedulePoll { delay: Duration },
    PollSuccess { script: String },
}

pub const SUCCESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const SUCCESS_POLL_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_SCRIPT: &str =
    "({ success: window.__galefling_post_success === true, url: window.__galefling_post_url || null })";

/// Isolated browser profile (cookies, storage) of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub account_id: String,
    pub dir: PathBuf,
}

/// Everything needed to complete one confirm-click post
#[derive(Clone)]
pub struct BrowserSession {
    account: AccountConfig,
    spec: PlatformSpec,
    profile: SessionProfile,
    composer_url: String,
    text_selector: String,
    prefill_delay: Duration,
    success_url_pattern: Option<Regex>,
    success_selector: Option<String>,
    permalink_selector: Option<String>,
    text: String,
    image: Option<ProcessedImage>,
}

impl BrowserSession {
    pub fn new(
        account: AccountConfig,
        spec: PlatformSpec,
        composer: &ComposerSpec,
        text: String,
        image: Option<ProcessedImage>,
        profile_dir: PathBuf,
    ) -> Self {
        let success_url_pattern = composer
            .success_url_pattern
            .as_deref()
            .and_then(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(platform = %account.platform_id, "Ignoring success_url_pattern: {}", e);
                    None
                }
            });

        Self {
            profile: SessionProfile {
                account_id: account.account_id.clone(),
                dir: profile_dir,
            },
            prefill_delay: spec.confirmation_delay,
            composer_url: composer.composer_url.clone(),
            text_selector: composer.text_selector.clone(),
            success_url_pattern,
            success_selector: composer.success_selector.clone(),
            permalink_selector: composer.permalink_selector.clone(),
            text,
            image,
            account,
            spec,
        }
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn spec(&self) -> &PlatformSpec {
        &self.spec
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    pub fn composer_url(&self) -> &str {
        &self.composer_url
    }

    pub fn text_selector(&self) -> &str {
        &self.text_selector
    }

    pub fn prefill_delay(&self) -> Duration {
        self.prefill_delay
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Adapted image for the user to attach by hand
    pub fn image(&self) -> Option<&ProcessedImage> {
        self.image.as_ref()
    }

    pub fn matches_success_url(&self, url: &str) -> bool {
        self.success_url_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(url))
    }

    /// Script that fills the composer and evaluates to whether the element
    /// was found
    pub fn injection_script(&self) -> String {
        injection_script(&self.text_selector, &self.text)
    }

    pub fn watches_for_success(&self) -> bool {
        self.success_selector.is_some()
    }

    /// Script that installs the success observer, if the composer has one
    pub fn observer_script(&self) -> Option<String> {
        self.success_selector
            .as_deref()
            .map(|selector| observer_script(selector, self.permalink_selector.as_deref()))
    }

    /// Script evaluating to `{ success, url }` as recorded by the observer
    pub fn poll_script(&self) -> &'static str {
        POLL_SCRIPT
    }
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("account_id", &self.account.account_id)
            .field("composer_url", &self.composer_url)
            .field("profile", &self.profile.dir)
            .field("image", &self.image.is_some())
            .finish()
    }
}

fn injection_script(selector: &str, text: &str) -> String {
    // JSON string literals are valid JavaScript string literals
    let selector = Value::String(selector.to_string()).to_string();
    let text = Value::String(text.to_string()).to_string();
    format!(
        r#"(function() {{
    const el = document.querySelector({selector});
    if (!el) {{ return false; }}
    el.focus();
    if (el.tagName === 'TEXTAREA' || el.tagName === 'INPUT') {{
        el.value = {text};
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    }} else {{
        el.textContent = {text};
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    }}
    return true;
}})();"#
    )
}

fn observer_script(success_selector: &str, permalink_selector: Option<&str>) -> String {
    let success = Value::String(success_selector.to_string()).to_string();
    let permalink = Value::from(permalink_selector).to_string();
    format!(
        r#"(function() {{
    if (window.__galefling_observer) {{ return true; }}
    window.__galefling_post_success = false;
    window.__galefling_post_url = null;
    const permalink = {permalink};
    const check = () => {{
        if (!document.querySelector({success})) {{ return; }}
        window.__galefling_post_success = true;
        const link = permalink ? document.querySelector(permalink) : null;
        if (link && link.href) {{ window.__galefling_post_url = link.href; }}
    }};
    const observer = new MutationObserver(check);
    observer.observe(document.body, {{ childList: true, subtree: true }});
    window.__galefling_observer = observer;
    check();
    return true;
}})();"#
    )
}

/// Reads a poll reply; anything but `success: true` means keep waiting
fn parse_poll_reply(reply: &Value) -> Option<Option<String>> {
    if reply.get("success").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    Some(
        reply
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string),
    )
}

/// State machine for one confirm-click session
#[derive(Debug)]
pub struct Coordinator {
    session: BrowserSession,
    state: SessionState,
    result: Option<PostResult>,
    polls_remaining: u32,
}

impl Coordinator {
    pub fn new(session: BrowserSession) -> Self {
        Self {
            session,
            state: SessionState::Idle,
            result: None,
            polls_remaining: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    /// Terminal result, once one exists
    pub fn result(&self) -> Option<&PostResult> {
        self.result.as_ref()
    }

    /// Consumes the coordinator; a session abandoned before reaching a
    /// terminal state counts as closed without confirmation
    pub fn finish(mut self) -> PostResult {
        if !self.state.is_terminal() {
            self.handle(SessionEvent::UserClosed);
        }
        match self.result.take() {
            Some(result) => result,
            None => self.fail(ErrorCode::WvSubmitTimeout, "session ended without a result"),
        }
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionCommand> {
        if self.state.is_terminal() {
            tracing::debug!(account = %self.session.account.account_id, ?event, "Ignoring event after terminal state");
            return Vec::new();
        }

        match (self.state.clone(), event) {
            (SessionState::Idle, SessionEvent::Start) => {
                self.state = SessionState::Loading;
                vec![SessionCommand::Navigate {
                    url: self.session.composer_url.clone(),
                }]
            }

            (SessionState::Loading, SessionEvent::LoadFinished { ok: true }) => {
                self.state = SessionState::PrefillPending;
                vec![SessionCommand::SchedulePrefill {
                    delay: self.session.prefill_delay,
                }]
            }

            (SessionState::Idle, SessionEvent::LoadFinished { .. }) => Vec::new(),

            (_, SessionEvent::LoadFinished { ok: false }) => {
                tracing::warn!(account = %self.session.account.account_id, url = %self.session.composer_url, "Composer failed to load");
                let result = self.fail(ErrorCode::WvLoadFailed, "page load failed");
                self.terminate(SessionState::Failed { code: ErrorCode::WvLoadFailed }, result);
                Vec::new()
            }

            (SessionState::PrefillPending, SessionEvent::PrefillDue) => {
                vec![SessionCommand::InjectText {
                    script: self.session.injection_script(),
                }]
            }

            (SessionState::PrefillPending, SessionEvent::PrefillCompleted { ok }) => {
                if !ok {
                    tracing::warn!(
                        account = %self.session.account.account_id,
                        selector = %self.session.text_selector,
                        code = %ErrorCode::WvPrefillFailed,
                        "Text pre-fill failed; the user can paste it"
                    );
                }
                self.state = SessionState::AwaitingUserConfirm;
                match self.session.observer_script() {
                    Some(script) => {
                        self.polls_remaining = (SUCCESS_POLL_TIMEOUT.as_millis()
                            / SUCCESS_POLL_INTERVAL.as_millis())
                            as u32;
                        vec![
                            SessionCommand::InstallObserver { script },
                            SessionCommand::SchedulePoll {
                                delay: SUCCESS_POLL_INTERVAL,
                            },
                        ]
                    }
                    None => Vec::new(),
                }
            }

            (SessionState::AwaitingUserConfirm, SessionEvent::SuccessPollDue) => {
                if self.polls_remaining == 0 {
                    tracing::debug!(account = %self.session.account.account_id, "Success observer gave up; waiting for the user");
                    return Vec::new();
                }
                self.polls_remaining -= 1;
                let mut commands = vec![SessionCommand::PollSuccess {
                    script: self.session.poll_script().to_string(),
                }];
                if self.polls_remaining > 0 {
                    commands.push(SessionCommand::SchedulePoll {
                        delay: SUCCESS_POLL_INTERVAL,
                    });
                }
                commands
            }

            (
                SessionState::PrefillPending | SessionState::AwaitingUserConfirm,
                SessionEvent::SuccessDetected { url },
            ) => {
                match url {
                    Some(url) => {
                        tracing::info!(account = %self.session.account.account_id, %url, "Post URL read from page");
                        let result = PostResult::captured(&self.session.account, url.clone());
                        self.terminate(SessionState::Captured { url }, result);
                    }
                    None => {
                        tracing::info!(account = %self.session.account.account_id, "Page reported the post without a link");
                        let result = PostResult::marked_done(&self.session.account);
                        self.terminate(SessionState::MarkedDone, result);
                    }
                }
                Vec::new()
            }

            (
                SessionState::PrefillPending | SessionState::AwaitingUserConfirm,
                SessionEvent::Navigated { url },
            ) => {
                if self.session.matches_success_url(&url) {
                    tracing::info!(account = %self.session.account.account_id, %url, "Post URL captured");
                    let result = PostResult::captured(&self.session.account, url.clone());
                    self.terminate(SessionState::Captured { url }, result);
                }
                Vec::new()
            }

            (
                SessionState::Loading
                | SessionState::PrefillPending
                | SessionState::AwaitingUserConfirm,
                SessionEvent::UserMarkedDone,
            ) => {
                tracing::debug!(account = %self.session.account.account_id, "Marked done without a captured URL");
                let result = PostResult::marked_done(&self.session.account);
                self.terminate(SessionState::MarkedDone, result);
                Vec::new()
            }

            (_, SessionEvent::UserClosed) => {
                let result = self.fail(ErrorCode::WvSubmitTimeout, "closed without confirmation");
                self.terminate(SessionState::TimedOut, result);
                Vec::new()
            }

            (state, event) => {
                tracing::trace!(?state, ?event, "No transition");
                Vec::new()
            }
        }
    }

    fn fail(&self, code: ErrorCode, detail: &str) -> PostResult {
        PostResult::failure(
            &self.session.account,
            &self.session.spec,
            &PlatformError::new(code, detail),
        )
    }

    fn terminate(&mut self, state: SessionState, result: PostResult) {
        self.state = state;
        self.result = Some(result);
    }
}

/// Notifications from an embedded browser view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    LoadFinished { ok: bool },
    UrlChanged { url: String },
}

/// One embedded browser view
#[async_trait]
pub trait BrowserSurface: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), PlatformError>;

    /// Evaluates `script` and returns its completion value
    async fn run_script(&mut self, script: &str) -> Result<Value, PlatformError>;

    /// Stream of load and navigation notifications; closing it ends the session
    fn subscribe(&mut self) -> mpsc::Receiver<SurfaceEvent>;
}

/// Opens browser views bound to an isolated profile
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn open(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSurface>, PlatformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserAction {
    MarkDone,
    Close,
}

/// The user's side of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    account_id: String,
    actions: mpsc::UnboundedSender<UserAction>,
}

impl SessionHandle {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// "I posted it"
    pub fn mark_done(&self) {
        let _ = self.actions.send(UserAction::MarkDone);
    }

    /// Panel closed; unconfirmed sessions time out
    pub fn close(&self) {
        let _ = self.actions.send(UserAction::Close);
    }
}

/// Receiving end of a [`SessionHandle`]
#[derive(Debug)]
pub struct SessionControls {
    actions: mpsc::UnboundedReceiver<UserAction>,
}

pub fn session_channel(account_id: impl Into<String>) -> (SessionHandle, SessionControls) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SessionHandle {
            account_id: account_id.into(),
            actions: tx,
        },
        SessionControls { actions: rx },
    )
}

/// Runs a [`Coordinator`] against a live browser view
pub struct SessionDriver {
    session: BrowserSession,
    surface: Box<dyn BrowserSurface>,
    controls: SessionControls,
    events: Option<EventBus>,
}

impl SessionDriver {
    pub fn new(
        session: BrowserSession,
        surface: Box<dyn BrowserSurface>,
        controls: SessionControls,
    ) -> Self {
        Self {
            session,
            surface,
            controls,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Drives the session until it reaches a terminal state
    ///
    /// Dropping every [`SessionHandle`] or closing the surface's event stream
    /// counts as the user closing the session.
    pub async fn run(self) -> PostResult {
        let SessionDriver {
            session,
            mut surface,
            mut controls,
            events,
        } = self;

        let account_id = session.account.account_id.clone();
        let mut surface_events = surface.subscribe();
        let mut coordinator = Coordinator::new(session);
        let mut queue = VecDeque::from([SessionEvent::Start]);
        let mut prefill_at: Option<Instant> = None;
        let mut poll_at: Option<Instant> = None;

        loop {
            while let Some(event) = queue.pop_front() {
                let before = coordinator.state().clone();
                let commands = coordinator.handle(event);

                if *coordinator.state() != before {
                    tracing::debug!(account = %account_id, state = ?coordinator.state(), "Session state changed");
                    if let Some(bus) = &events {
                        bus.emit(Event::SessionStateChanged {
                            account_id: account_id.clone(),
                            state: coordinator.state().clone(),
                        });
                    }
                }

                for command in commands {
                    match command {
                        SessionCommand::Navigate { url } => {
                            if let Err(e) = surface.navigate(&url).await {
                                tracing::warn!(account = %account_id, "Navigation failed: {}", e);
                                queue.push_back(SessionEvent::LoadFinished { ok: false });
                            }
                        }
                        SessionCommand::SchedulePrefill { delay } => {
                            prefill_at = Some(Instant::now() + delay);
                        }
                        SessionCommand::InjectText { script } => {
                            let ok = match surface.run_script(&script).await {
                                Ok(Value::Bool(found)) => found,
                                Ok(other) => {
                                    tracing::debug!(account = %account_id, ?other, "Unexpected prefill script value");
                                    false
                                }
                                Err(e) => {
                                    tracing::debug!(account = %account_id, "Prefill script failed: {}", e);
                                    false
                                }
                            };
                            queue.push_back(SessionEvent::PrefillCompleted { ok });
                        }
                        SessionCommand::InstallObserver { script } => {
                            if let Err(e) = surface.run_script(&script).await {
                                tracing::debug!(account = %account_id, "Success observer failed to install: {}", e);
                            }
                        }
                        SessionCommand::SchedulePoll { delay } => {
                            poll_at = Some(Instant::now() + delay);
                        }
                        SessionCommand::PollSuccess { script } => match surface.run_script(&script).await {
                            Ok(reply) => {
                                if let Some(url) = parse_poll_reply(&reply) {
                                    queue.push_back(SessionEvent::SuccessDetected { url });
                                }
                            }
                            Err(e) => {
                                tracing::debug!(account = %account_id, "Success poll failed: {}", e);
                            }
                        },
                    }
                }
            }

            if coordinator.state().is_terminal() {
                break;
            }

            let next = tokio::select! {
                _ = timer(prefill_at) => {
                    prefill_at = None;
                    SessionEvent::PrefillDue
                }
                _ = timer(poll_at) => {
                    poll_at = None;
                    SessionEvent::SuccessPollDue
                }
                event = surface_events.recv() => match event {
                    Some(SurfaceEvent::LoadFinished { ok }) => SessionEvent::LoadFinished { ok },
                    Some(SurfaceEvent::UrlChanged { url }) => SessionEvent::Navigated { url },
                    None => SessionEvent::UserClosed,
                },
                action = controls.actions.recv() => match action {
                    Some(UserAction::MarkDone) => SessionEvent::UserMarkedDone,
                    Some(UserAction::Close) | None => SessionEvent::UserClosed,
                },
            };
            queue.push_back(next);
        }

        coordinator.finish()
    }
}

async fn timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
