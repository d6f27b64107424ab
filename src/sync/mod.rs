// File: src/sync/mod.rs
// Synchronizer: polls the gateways on an interval and publishes a ViewModel

mod engine;
mod resource;
mod view_model;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::block_gateway::BlockRepository;
use crate::error::SyncError;
use crate::market_gateway::MarketData;

use engine::{Completion, FetchRequest, SyncEngine};

pub use engine::SyncSettings;
pub use resource::Phase;
pub use view_model::{ResourceStatus, ViewModel};

/// Presentation intents forwarded to the sync task
#[derive(Debug)]
enum Command {
    Select(String),
    Refresh,
}

/// Cloneable access for the presentation layer
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: Arc<watch::Sender<ViewModel>>,
}

impl SyncHandle {
    /// Make `hash` the selection and fetch its detail. Queued while stopped.
    pub fn select_block(&self, hash: &str) -> Result<(), SyncError> {
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(SyncError::InvalidSelection("block hash must not be empty".to_string()));
        }
        self.commands
            .send(Command::Select(hash.to_string()))
            .map_err(|_| SyncError::Closed)
    }

    /// Poll every axis now instead of waiting for the next tick
    pub fn refresh(&self) -> Result<(), SyncError> {
        self.commands.send(Command::Refresh).map_err(|_| SyncError::Closed)
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> ViewModel {
        self.view.borrow().clone()
    }
}

#[derive(Clone)]
struct Gateways {
    repository: Arc<dyn BlockRepository>,
    market: Arc<dyn MarketData>,
}

/// Engine state while no task is running
struct Parked {
    engine: SyncEngine,
    commands: mpsc::UnboundedReceiver<Command>,
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<Parked>,
}

pub struct Synchronizer {
    gateways: Gateways,
    settings: SyncSettings,
    handle: SyncHandle,
    parked: Option<Parked>,
    session: Option<Session>,
}

impl Synchronizer {
    pub fn new(
        repository: Arc<dyn BlockRepository>,
        market: Arc<dyn MarketData>,
        settings: SyncSettings,
    ) -> Self {
        let engine = SyncEngine::new(settings);
        let (view, _) = watch::channel(engine.snapshot());
        let (commands, commands_rx) = mpsc::unbounded_channel();

        Self {
            gateways: Gateways { repository, market },
            settings,
            handle: SyncHandle {
                commands,
                view: Arc::new(view),
            },
            parked: Some(Parked {
                engine,
                commands: commands_rx,
            }),
            session: None,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Spawn the sync task on the current Tokio runtime. The first poll
    /// runs immediately. Calling this while running does nothing.
    pub fn start(&mut self, poll_interval: Duration) {
        if self.is_running() {
            warn!("Synchronizer already running");
            return;
        }
        let parked = match self.parked.take() {
            Some(parked) => parked,
            None => self.rebuild(),
        };

        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            parked,
            self.gateways.clone(),
            Arc::clone(&self.handle.view),
            poll_interval,
            cancel.clone(),
        ));

        info!("Synchronizer started, polling every {:?}", poll_interval);
        self.session = Some(Session { cancel, task });
    }

    /// Stop polling. Responses still in flight are discarded when they arrive.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("Synchronizer not running");
            return;
        };

        session.cancel.cancel();
        let mut parked = match session.task.await {
            Ok(parked) => parked,
            Err(err) => {
                error!("Sync task ended abnormally: {}", err);
                self.rebuild()
            }
        };

        if parked.engine.invalidate_in_flight() {
            self.handle.view.send_replace(parked.engine.snapshot());
        }
        self.parked = Some(parked);
        info!("Synchronizer stopped");
    }

    /// Fresh engine and command channel after the task was lost.
    /// Handles cloned earlier keep the dropped channel and report `Closed`.
    fn rebuild(&mut self) -> Parked {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        self.handle.commands = commands;
        let engine = SyncEngine::new(self.settings);
        self.handle.view.send_replace(engine.snapshot());
        Parked {
            engine,
            commands: commands_rx,
        }
    }

    pub fn select_block(&self, hash: &str) -> Result<(), SyncError> {
        self.handle.select_block(hash)
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.handle.subscribe()
    }

    pub fn snapshot(&self) -> ViewModel {
        self.handle.snapshot()
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }
}

enum Event {
    Completed(Result<Completion, JoinError>),
    Command(Command),
    Tick,
    Shutdown,
}

async fn run(
    parked: Parked,
    gateways: Gateways,
    view: Arc<watch::Sender<ViewModel>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> Parked {
    let Parked {
        mut engine,
        mut commands,
    } = parked;
    let mut fetches = JoinSet::new();
    let mut changed = false;

    // Selections made while stopped; queued refreshes are covered by the first tick
    while let Ok(command) = commands.try_recv() {
        if let Command::Select(hash) = command {
            if let Some(request) = engine.select_block(&hash) {
                spawn_fetch(&mut fetches, &gateways, request);
                changed = true;
            }
        }
    }
    if changed {
        view.send_replace(engine.snapshot());
    }

    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::Shutdown,
            Some(joined) = fetches.join_next(), if !fetches.is_empty() => Event::Completed(joined),
            command = commands.recv() => command.map_or(Event::Shutdown, Event::Command),
            _ = ticker.tick() => Event::Tick,
        };

        let changed = match event {
            Event::Shutdown => break,
            Event::Tick => {
                for request in engine.poll() {
                    spawn_fetch(&mut fetches, &gateways, request);
                }
                true
            }
            Event::Command(Command::Refresh) => {
                debug!("Manual refresh");
                for request in engine.poll() {
                    spawn_fetch(&mut fetches, &gateways, request);
                }
                ticker.reset();
                true
            }
            Event::Command(Command::Select(hash)) => match engine.select_block(&hash) {
                Some(request) => {
                    spawn_fetch(&mut fetches, &gateways, request);
                    true
                }
                None => false,
            },
            Event::Completed(Ok(completion)) => {
                let applied = engine.apply(completion);
                if let Some(request) = applied.follow_up {
                    spawn_fetch(&mut fetches, &gateways, request);
                }
                applied.changed
            }
            Event::Completed(Err(err)) => {
                error!("Fetch task failed: {}", err);
                false
            }
        };

        if changed {
            view.send_replace(engine.snapshot());
        }
    }

    // Outstanding fetches finish on their own; their tokens are invalidated by stop()
    fetches.detach_all();
    Parked { engine, commands }
}

fn spawn_fetch(fetches: &mut JoinSet<Completion>, gateways: &Gateways, request: FetchRequest) {
    match request {
        FetchRequest::RecentBlocks { token, limit } => {
            let repository = Arc::clone(&gateways.repository);
            fetches.spawn(async move {
                Completion::RecentBlocks {
                    token,
                    result: repository.fetch_recent_blocks(limit).await,
                }
            });
        }
        FetchRequest::BlockDetail { token, hash } => {
            let repository = Arc::clone(&gateways.repository);
            fetches.spawn(async move {
                let result = repository.fetch_block_detail(&hash).await;
                Completion::BlockDetail { token, hash, result }
            });
        }
        FetchRequest::Market { token } => {
            let market = Arc::clone(&gateways.market);
            fetches.spawn(async move {
                Completion::Market {
                    token,
                    result: market.fetch_market_snapshot().await,
                }
            });
        }
        FetchRequest::PriceSeries { token, window } => {
            let market = Arc::clone(&gateways.market);
            fetches.spawn(async move {
                Completion::PriceSeries {
                    token,
                    result: market.fetch_price_series(window).await,
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::{
        BlockDetail, BlockSummary, FeeTiers, MarketSnapshot, PricePoint, PriceSeries, PriceWindow,
    };
    use crate::error::{ErrorKind, FetchError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    type Reply<T> = oneshot::Sender<Result<T, FetchError>>;

    /// Gateway whose every call waits for the test to answer it
    struct Scripted {
        lists: mpsc::UnboundedSender<Reply<Vec<BlockSummary>>>,
        details: mpsc::UnboundedSender<(String, Reply<BlockDetail>)>,
        markets: mpsc::UnboundedSender<Reply<MarketSnapshot>>,
        series: mpsc::UnboundedSender<Reply<PriceSeries>>,
    }

    struct Calls {
        lists: mpsc::UnboundedReceiver<Reply<Vec<BlockSummary>>>,
        details: mpsc::UnboundedReceiver<(String, Reply<BlockDetail>)>,
        markets: mpsc::UnboundedReceiver<Reply<MarketSnapshot>>,
        series: mpsc::UnboundedReceiver<Reply<PriceSeries>>,
    }

    fn gone() -> FetchError {
        FetchError::UpstreamUnavailable("test gateway dropped".to_string())
    }

    async fn ask<T>(calls: &mpsc::UnboundedSender<Reply<T>>) -> Result<T, FetchError> {
        let (reply, answer) = oneshot::channel();
        calls.send(reply).map_err(|_| gone())?;
        answer.await.unwrap_or_else(|_| Err(gone()))
    }

    #[async_trait]
    impl BlockRepository for Scripted {
        async fn fetch_recent_blocks(&self, _limit: usize) -> Result<Vec<BlockSummary>, FetchError> {
            ask(&self.lists).await
        }

        async fn fetch_block_detail(&self, hash: &str) -> Result<BlockDetail, FetchError> {
            let (reply, answer) = oneshot::channel();
            self.details.send((hash.to_string(), reply)).map_err(|_| gone())?;
            answer.await.unwrap_or_else(|_| Err(gone()))
        }
    }

    #[async_trait]
    impl MarketData for Scripted {
        async fn fetch_price_series(&self, _window: PriceWindow) -> Result<PriceSeries, FetchError> {
            ask(&self.series).await
        }

        async fn fetch_market_snapshot(&self) -> Result<MarketSnapshot, FetchError> {
            ask(&self.markets).await
        }
    }

    const WAIT: Duration = Duration::from_secs(5);
    const SLOW_POLL: Duration = Duration::from_secs(3600);

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    impl Calls {
        async fn answer_list(&mut self, blocks: Vec<BlockSummary>) {
            let _ = next(&mut self.lists).await.send(Ok(blocks));
        }

        async fn next_detail(&mut self) -> (String, Reply<BlockDetail>) {
            next(&mut self.details).await
        }
    }

    fn setup() -> (Synchronizer, Calls) {
        let (lists, lists_rx) = mpsc::unbounded_channel();
        let (details, details_rx) = mpsc::unbounded_channel();
        let (markets, markets_rx) = mpsc::unbounded_channel();
        let (series, series_rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Scripted { lists, details, markets, series });
        let sync = Synchronizer::new(gateway.clone(), gateway, SyncSettings::default());
        let calls = Calls {
            lists: lists_rx,
            details: details_rx,
            markets: markets_rx,
            series: series_rx,
        };
        (sync, calls)
    }

    fn block(hash: &str, height: u64) -> BlockSummary {
        BlockSummary {
            id: height as i64,
            height,
            hash: hash.to_string(),
            time: Utc.timestamp_opt(1_700_000_000 + height as i64 * 600, 0).unwrap(),
        }
    }

    fn detail(hash: &str) -> BlockDetail {
        BlockDetail {
            summary: block(hash, 1),
            previous_hash: "prev".to_string(),
            peer_count: 3,
            fee_tiers: FeeTiers { high: 30, medium: 20, low: 10 },
            price: Some(64_000.0),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            unconfirmed_count: Some(1200),
            volume_24h: None,
        }
    }

    fn series() -> PriceSeries {
        PriceSeries {
            window: PriceWindow::default(),
            points: vec![PricePoint {
                timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                price_usd: 64_000.0,
            }],
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<ViewModel>, mut pred: impl FnMut(&ViewModel) -> bool) -> ViewModel {
        timeout(WAIT, rx.wait_for(|view| pred(view)))
            .await
            .unwrap()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_latest_selection_wins_over_late_detail() {
        let (mut sync, mut calls) = setup();
        let mut view = sync.subscribe();
        sync.start(SLOW_POLL);

        calls.answer_list(vec![block("a", 10), block("b", 9)]).await;
        let (hash, reply_a) = calls.next_detail().await;
        assert_eq!(hash, "a");

        sync.select_block("b").unwrap();
        let (hash, reply_b) = calls.next_detail().await;
        assert_eq!(hash, "b");

        let _ = reply_b.send(Ok(detail("b")));
        wait_for(&mut view, |v| v.selected_detail.as_ref().is_some_and(|d| d.hash() == "b")).await;

        let _ = reply_a.send(Ok(detail("a")));
        time::sleep(Duration::from_millis(50)).await;

        let snap = sync.snapshot();
        assert_eq!(snap.selected_hash.as_deref(), Some("b"));
        assert_eq!(snap.selected_detail.unwrap().hash(), "b");
        sync.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_hash_keeps_selection_and_reports_not_found() {
        let (mut sync, mut calls) = setup();
        let mut view = sync.subscribe();
        sync.start(SLOW_POLL);

        calls.answer_list(vec![block("a", 10)]).await;
        let (_, reply) = calls.next_detail().await;
        let _ = reply.send(Ok(detail("a")));
        wait_for(&mut view, |v| v.selected_detail.is_some()).await;

        sync.select_block("missing").unwrap();
        let (hash, reply) = calls.next_detail().await;
        assert_eq!(hash, "missing");
        let _ = reply.send(Err(FetchError::NotFound("Block not found".to_string())));

        let snap = wait_for(&mut view, |v| v.status.selected_detail.phase == Phase::Failed).await;
        assert_eq!(snap.selected_hash.as_deref(), Some("missing"));
        assert!(snap.selected_detail.is_none());
        assert_eq!(
            snap.status.selected_detail.last_error.map(|e| e.kind),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(snap.recent_blocks.len(), 1);
        sync.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_market_fails_only_that_axis() {
        let (mut sync, mut calls) = setup();
        let mut view = sync.subscribe();
        sync.start(SLOW_POLL);

        let _ = next(&mut calls.markets)
            .await
            .send(Err(FetchError::MalformedResponse("missing field `market_cap`".to_string())));
        let _ = next(&mut calls.series).await.send(Ok(series()));
        calls.answer_list(vec![block("a", 10)]).await;

        let snap = wait_for(&mut view, |v| {
            v.status.market.phase == Phase::Failed
                && v.status.price_series.phase == Phase::Ready
                && v.status.recent_blocks.phase == Phase::Ready
        })
        .await;
        assert!(snap.market.is_none());
        assert_eq!(snap.price_series, Some(series()));
        assert_eq!(
            snap.status.market.last_error.map(|e| e.kind),
            Some(ErrorKind::MalformedResponse)
        );
        sync.stop().await;
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_and_start_resumes() {
        let (mut sync, mut calls) = setup();
        let mut view = sync.subscribe();
        sync.start(SLOW_POLL);
        assert!(sync.is_running());

        let stale_list = next(&mut calls.lists).await;
        sync.stop().await;
        assert!(!sync.is_running());

        let stopped = sync.snapshot();
        assert!(!stopped.status.recent_blocks.loading);
        let _ = stale_list.send(Ok(vec![block("late", 99)]));
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.snapshot().revision, stopped.revision);

        sync.start(SLOW_POLL);
        calls.answer_list(vec![block("fresh", 100)]).await;
        let snap = wait_for(&mut view, |v| !v.recent_blocks.is_empty()).await;
        assert_eq!(snap.recent_blocks[0].hash, "fresh");
        assert_eq!(snap.selected_hash.as_deref(), Some("fresh"));

        sync.stop().await;
        sync.stop().await;
    }

    #[tokio::test]
    async fn test_selection_before_start_is_applied_on_start() {
        let (mut sync, mut calls) = setup();
        assert_eq!(
            sync.select_block("  "),
            Err(SyncError::InvalidSelection("block hash must not be empty".to_string()))
        );
        sync.select_block("chosen").unwrap();
        sync.start(SLOW_POLL);

        let (hash, _reply) = calls.next_detail().await;
        assert_eq!(hash, "chosen");

        calls.answer_list(vec![block("tip", 50)]).await;
        let mut view = sync.subscribe();
        let snap = wait_for(&mut view, |v| !v.recent_blocks.is_empty()).await;
        assert_eq!(snap.selected_hash.as_deref(), Some("chosen"));
        sync.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_keeps_selection_and_never_duplicates() {
        let (mut sync, mut calls) = setup();
        let mut view = sync.subscribe();
        sync.start(SLOW_POLL);

        calls.answer_list(vec![block("b", 9), block("c", 8), block("d", 7)]).await;
        wait_for(&mut view, |v| v.recent_blocks.len() == 3).await;
        sync.select_block("c").unwrap();

        sync.handle().refresh().unwrap();
        calls
            .answer_list(vec![block("a", 10), block("b", 9), block("b", 9), block("c", 8)])
            .await;
        let snap = wait_for(&mut view, |v| v.recent_blocks.first().is_some_and(|b| b.hash == "a")).await;

        let hashes: Vec<_> = snap.recent_blocks.iter().map(|b| b.hash.as_str()).collect();
        assert_eq!(hashes, ["a", "b", "c"]);
        assert_eq!(snap.selected_hash.as_deref(), Some("c"));
        assert_eq!(snap.selected_index(), Some(2));
        sync.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_again_every_interval() {
        let (mut sync, mut calls) = setup();
        sync.start(Duration::from_secs(30));

        let started = time::Instant::now();
        let _ = calls.lists.recv().await.unwrap().send(Ok(vec![]));
        let _ = calls.lists.recv().await.unwrap().send(Ok(vec![]));
        assert!(started.elapsed() >= Duration::from_secs(30));
        let _ = calls.lists.recv().await;
        assert!(started.elapsed() >= Duration::from_secs(60));
        sync.stop().await;
    }
}
