//! Dispatch orchestration
//!
//! Turns one [`PostRequest`] into one terminal [`PostResult`] per selected
//! account. Silent accounts each run on their own tokio task; confirm-click
//! accounts become [`BrowserSession`]s for the front end to complete. A
//! failure in one account (bad credentials, image too large, a panic in a
//! backend) only ever becomes that account's result.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libgalefling::dispatcher::Dispatcher;
//! use libgalefling::platforms::mock::MockFactory;
//! use libgalefling::specs::{PlatformId, SpecTable};
//! use libgalefling::types::{AccountConfig, PostRequest};
//!
//! # async fn example() -> libgalefling::Result<()> {
//! let accounts = vec![AccountConfig::new(PlatformId::Bluesky, "bluesky_1", "rin")];
//! let dispatcher = Dispatcher::new(SpecTable::builtin(), Arc::new(MockFactory::new()));
//!
//! let request = PostRequest::new("Hello").with_accounts(["bluesky_1"]);
//! let mut dispatch = dispatcher.dispatch(&request, &accounts).await?;
//! while let Some(result) = dispatch.next_result().await {
//!     println!("{}: {}", result.account_id, result.success);
//! }
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::{MergeOutcome, ResultAggregator, SharedAggregator, Summary};
use crate::browser::{session_channel, BrowserHost, BrowserSession, SessionDriver, SessionHandle};
use crate::error::{ErrorCode, GaleflingError, PlatformError, Result};
use crate::events::{Event, EventBus};
use crate::imaging::{ImageCache, ProcessedImage, SourceImage};
use crate::platforms::{ClientFactory, PlatformClient};
use crate::specs::{PlatformId, PlatformSpec, SpecTable};
use crate::types::{AccountConfig, PostRequest, PostResult};

type AdaptedImages = HashMap<PlatformId, std::result::Result<ProcessedImage, PlatformError>>;

/// Outcome of one account's connection test
#[derive(Debug, Clone)]
pub struct ConnectionCheck {
    pub account: AccountConfig,
    pub outcome: std::result::Result<(), PlatformError>,
}

impl ConnectionCheck {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Merges results and publishes the matching events
#[derive(Clone)]
struct Recorder {
    dispatch_id: String,
    aggregator: SharedAggregator,
    events: EventBus,
}

impl Recorder {
    fn record(&self, result: PostResult) -> MergeOutcome {
        let outcome = self.aggregator.merge(result.clone());
        if !outcome.recorded {
            return outcome;
        }

        self.events.emit(Event::AccountCompleted {
            dispatch_id: self.dispatch_id.clone(),
            result: Box::new(result),
        });

        if outcome.complete {
            let summary = self.aggregator.summary();
            info!(
                dispatch = %self.dispatch_id,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Dispatch complete"
            );
            self.events.emit(Event::DispatchCompleted {
                dispatch_id: self.dispatch_id.clone(),
                succeeded: summary.succeeded,
                failed: summary.failed,
            });
        }
        outcome
    }
}

/// Recorder plus the sending half of the silent result stream
#[derive(Clone)]
struct ResultSink {
    recorder: Recorder,
    stream: mpsc::UnboundedSender<PostResult>,
}

impl ResultSink {
    fn record(&self, result: PostResult) {
        if self.recorder.record(result.clone()).recorded {
            // the receiver may already be gone; the aggregator still has it
            let _ = self.stream.send(result);
        }
    }
}

/// Fans a post out to the selected accounts
#[derive(Clone)]
pub struct Dispatcher {
    specs: Arc<SpecTable>,
    factory: Arc<dyn ClientFactory>,
    events: EventBus,
    images: ImageCache,
}

impl Dispatcher {
    pub fn new(specs: SpecTable, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            specs: Arc::new(specs),
            factory,
            events: EventBus::default(),
            images: ImageCache::new(),
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = bus;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn specs(&self) -> &SpecTable {
        &self.specs
    }

    /// Adapted images, reused across dispatches of the same source
    pub fn image_cache(&self) -> &ImageCache {
        &self.images
    }

    /// Resolves the request's account ids against the configured accounts
    ///
    /// Duplicates are dropped; disabled accounts stay in the selection so
    /// that [`dispatch`](Self::dispatch) can give them a result.
    ///
    /// # Errors
    ///
    /// [`GaleflingError::InvalidInput`] for empty text, an empty selection,
    /// unknown ids, or a selection with no enabled account.
    pub fn select(
        &self,
        request: &PostRequest,
        accounts: &[AccountConfig],
    ) -> Result<Vec<AccountConfig>> {
        if request.text.trim().is_empty() {
            return Err(GaleflingError::InvalidInput("post text is empty".to_string()));
        }
        if request.account_ids.is_empty() {
            return Err(GaleflingError::InvalidInput("no accounts selected".to_string()));
        }

        let mut selected: Vec<AccountConfig> = Vec::new();
        for id in &request.account_ids {
            if selected.iter().any(|a| &a.account_id == id) {
                continue;
            }
            let account = accounts
                .iter()
                .find(|a| &a.account_id == id)
                .ok_or_else(|| GaleflingError::InvalidInput(format!("unknown account '{}'", id)))?;
            selected.push(account.clone());
        }

        if !selected.iter().any(|a| a.enabled) {
            return Err(GaleflingError::InvalidInput(
                "none of the selected accounts is enabled".to_string(),
            ));
        }
        Ok(selected)
    }

    async fn prepare_images(&self, path: Option<&Path>, selected: &[AccountConfig]) -> AdaptedImages {
        let Some(path) = path else {
            return HashMap::new();
        };

        let mut platforms: Vec<PlatformId> = selected
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.platform_id)
            .collect();
        platforms.sort();
        platforms.dedup();

        let targets: Vec<(PlatformId, PlatformSpec)> = platforms
            .iter()
            .map(|p| (*p, self.specs.get(*p).clone()))
            .collect();
        let cache = self.images.clone();
        let path = path.to_path_buf();

        let joined = tokio::task::spawn_blocking(move || {
            let source = SourceImage::open(&path)?;
            let refs: Vec<(PlatformId, &PlatformSpec)> =
                targets.iter().map(|(p, spec)| (*p, spec)).collect();
            Ok::<_, PlatformError>(cache.adapt_all(&source, &refs))
        })
        .await;

        let shared_error = match joined {
            Ok(Ok(adapted)) => return adapted,
            Ok(Err(e)) => e,
            Err(e) => {
                error!("Image adaptation task failed: {}", e);
                PlatformError::new(ErrorCode::SysUnknown, format!("image adaptation failed: {}", e))
            }
        };
        warn!(code = %shared_error.code(), "Source image unusable: {}", shared_error.detail());
        platforms
            .into_iter()
            .map(|p| (p, Err(shared_error.clone())))
            .collect()
    }

    /// Starts posting `request` to its selected accounts
    ///
    /// Returns as soon as every silent task is spawned and every
    /// confirm-click session is prepared. A selected account that is
    /// disabled is not posted to; it ends with a `POST-FAILED` result.
    pub async fn dispatch(&self, request: &PostRequest, accounts: &[AccountConfig]) -> Result<Dispatch> {
        let selected = self.select(request, accounts)?;
        let dispatch_id = uuid::Uuid::new_v4().to_string();
        let account_ids: Vec<String> = selected.iter().map(|a| a.account_id.clone()).collect();

        info!(dispatch = %dispatch_id, accounts = ?account_ids, "Dispatch started");
        let recorder = Recorder {
            dispatch_id: dispatch_id.clone(),
            aggregator: SharedAggregator::new(ResultAggregator::new(account_ids.clone())),
            events: self.events.clone(),
        };
        self.events.emit(Event::DispatchStarted {
            dispatch_id: dispatch_id.clone(),
            account_ids,
        });

        let images = self
            .prepare_images(request.image_path.as_deref(), &selected)
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ResultSink {
            recorder: recorder.clone(),
            stream: tx,
        };
        let mut sessions = Vec::new();
        let mut cancels = HashMap::new();

        for account in selected {
            let spec = self.specs.get(account.platform_id);

            if !account.enabled {
                warn!(account = %account.account_id, "Selected account is disabled");
                sink.record(PostResult::failure(
                    &account,
                    spec,
                    &PlatformError::new(ErrorCode::PostFailed, "account is disabled"),
                ));
                continue;
            }

            let image = match images.get(&account.platform_id) {
                None => None,
                Some(Ok(image)) => Some(image.clone()),
                Some(Err(e)) => {
                    sink.record(PostResult::failure(&account, spec, e));
                    continue;
                }
            };

            let client = match self.factory.build(&account, spec) {
                Ok(client) => client,
                Err(e) => {
                    warn!(account = %account.account_id, code = %e.code(), "Client unavailable: {}", e.detail());
                    sink.record(PostResult::failure(&account, spec, &e));
                    continue;
                }
            };

            match client {
                PlatformClient::Silent(mut client) => {
                    let text = request.text.clone();
                    let worker = tokio::spawn(async move { client.post(&text, image.as_ref()).await });
                    cancels.insert(account.account_id.clone(), worker.abort_handle());

                    let sink = sink.clone();
                    let spec = spec.clone();
                    tokio::spawn(async move {
                        let result = match worker.await {
                            Ok(result) => result,
                            Err(e) if e.is_panic() => {
                                error!(account = %account.account_id, "Posting task panicked");
                                PostResult::failure(
                                    &account,
                                    &spec,
                                    &PlatformError::new(ErrorCode::SysUnknown, "posting task panicked"),
                                )
                            }
                            Err(_) => {
                                info!(account = %account.account_id, "Posting cancelled");
                                PostResult::failure(
                                    &account,
                                    &spec,
                                    &PlatformError::new(ErrorCode::PostFailed, "cancelled by user"),
                                )
                            }
                        };
                        sink.record(result);
                    });
                }
                PlatformClient::ConfirmClick(client) => match client.prepare(&request.text, image) {
                    Ok(session) => {
                        debug!(account = %account.account_id, url = %session.composer_url(), "Browser session prepared");
                        sessions.push(session);
                    }
                    Err(e) => sink.record(PostResult::failure(&account, spec, &e)),
                },
            }
        }

        Ok(Dispatch {
            id: dispatch_id,
            results: rx,
            sessions,
            cancels,
            recorder,
        })
    }

    /// Re-dispatches exactly one account of `request`
    pub async fn retry(
        &self,
        request: &PostRequest,
        account_id: &str,
        accounts: &[AccountConfig],
    ) -> Result<Dispatch> {
        info!(account = %account_id, "Retrying account");
        let single = PostRequest {
            account_ids: vec![account_id.to_string()],
            ..request.clone()
        };
        self.dispatch(&single, accounts).await
    }

    /// Runs every enabled account's connection test concurrently
    pub async fn test_connections(&self, accounts: &[AccountConfig]) -> Vec<ConnectionCheck> {
        let checks = accounts.iter().filter(|a| a.enabled).map(|account| async move {
            let spec = self.specs.get(account.platform_id);
            let outcome = match self.factory.build(account, spec) {
                Ok(mut client) => client.test_connection().await,
                Err(e) => Err(e),
            };
            match &outcome {
                Ok(()) => info!(account = %account.account_id, "Connection OK"),
                Err(e) => warn!(account = %account.account_id, code = %e.code(), "Connection failed: {}", e.detail()),
            }
            ConnectionCheck {
                account: account.clone(),
                outcome,
            }
        });
        join_all(checks).await
    }
}

/// A dispatch in flight
pub struct Dispatch {
    id: String,
    results: mpsc::UnboundedReceiver<PostResult>,
    sessions: Vec<BrowserSession>,
    cancels: HashMap<String, AbortHandle>,
    recorder: Recorder,
}

impl Dispatch {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next result produced without user involvement: silent posts, and
    /// accounts that failed before reaching their client
    ///
    /// `None` once every such result has been delivered.
    pub async fn next_result(&mut self) -> Option<PostResult> {
        self.results.recv().await
    }

    /// Drains [`next_result`](Self::next_result)
    pub async fn silent_results(&mut self) -> Vec<PostResult> {
        let mut results = Vec::new();
        while let Some(result) = self.results.recv().await {
            results.push(result);
        }
        results
    }

    /// Confirm-click sessions awaiting a browser
    pub fn sessions(&self) -> &[BrowserSession] {
        &self.sessions
    }

    pub fn take_sessions(&mut self) -> Vec<BrowserSession> {
        std::mem::take(&mut self.sessions)
    }

    /// Aborts a silent account's task; its result becomes `POST-FAILED`
    ///
    /// Returns false for accounts without a task. Cancelling a finished task
    /// changes nothing.
    pub fn cancel(&self, account_id: &str) -> bool {
        match self.cancels.get(account_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Records a confirm-click outcome reached outside
    /// [`drive_sessions`](Self::drive_sessions)
    pub fn record(&self, result: PostResult) -> MergeOutcome {
        self.recorder.record(result)
    }

    /// Opens a browser view per pending session and drives each one on its
    /// own task
    ///
    /// The returned handles let the user mark a session done or close it.
    pub async fn drive_sessions(&mut self, host: Arc<dyn BrowserHost>) -> Vec<SessionHandle> {
        let mut handles = Vec::new();
        for session in self.take_sessions() {
            let account = session.account().clone();
            let spec = session.spec().clone();

            let surface = match host.open(session.profile()).await {
                Ok(surface) => surface,
                Err(e) => {
                    warn!(account = %account.account_id, "Could not open browser: {}", e);
                    self.recorder.record(PostResult::failure(&account, &spec, &e));
                    continue;
                }
            };

            let (handle, controls) = session_channel(account.account_id.clone());
            let driver = SessionDriver::new(session, surface, controls)
                .with_events(self.recorder.events.clone());
            let task = tokio::spawn(driver.run());

            let recorder = self.recorder.clone();
            tokio::spawn(async move {
                let result = task.await.unwrap_or_else(|e| {
                    error!(account = %account.account_id, "Browser session task failed: {}", e);
                    PostResult::failure(
                        &account,
                        &spec,
                        &PlatformError::new(ErrorCode::SysUnknown, "browser session task failed"),
                    )
                });
                recorder.record(result);
            });
            handles.push(handle);
        }
        handles
    }

    pub fn aggregator(&self) -> &SharedAggregator {
        &self.recorder.aggregator
    }

    /// Results so far, in request order
    pub fn snapshot(&self) -> Vec<PostResult> {
        self.recorder.aggregator.snapshot()
    }

    pub fn summary(&self) -> Summary {
        self.recorder.aggregator.summary()
    }

    /// Full report once every account is terminal
    pub async fn wait_complete(&self) -> Vec<PostResult> {
        self.recorder.aggregator.wait_complete().await
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("id", &self.id)
            .field("sessions", &self.sessions)
            .field("silent", &self.cancels.keys().collect::<Vec<_>>())
            .finish()
    }
}
