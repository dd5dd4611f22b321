use crate::error::AppError;
use crate::market::api::BaselineSource;
use crate::market::channel::{ChannelEvent, ChannelEvents, StreamChannel, StreamConnector};
use crate::market::delta::{
    compute_deltas, price_map, push_render_decision, zero_deltas, RenderDecision,
};
use crate::market::portfolio::build_portfolio;
use crate::market::render::{RenderGate, RenderSignal};
use crate::market::store::{SnapshotStore, TickerView};
use crate::market::types::{
    parse_stream_message, AccountLedger, ConnectionStatus, ControllerPhase, Stock,
    StreamMessage, TickerStatusSnapshot, TraderAccount,
};
use crate::session::SessionContext;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub account: TraderAccount,
    pub ledger: AccountLedger,
}

/// Seeds the snapshot from an authoritative baseline. Every delta starts at
/// zero because the previous prices are the baseline prices themselves.
pub fn apply_baseline(view: &mut TickerView, stocks: Vec<Stock>) -> RenderDecision {
    view.deltas = zero_deltas(&stocks);
    view.previous_prices = price_map(&stocks);
    view.stocks = stocks;
    view.loading = false;
    view.error = None;
    view.phase = ControllerPhase::Live;
    RenderDecision::Render
}

pub fn apply_baseline_failure(view: &mut TickerView, error: &AppError) -> RenderDecision {
    view.loading = false;
    view.error = Some(error.to_string());
    RenderDecision::Render
}

/// Replaces the snapshot with a pushed collection and recomputes every delta
/// against the snapshot it replaced. Ids missing from the push are dropped.
pub fn apply_push(view: &mut TickerView, stocks: Vec<Stock>) -> RenderDecision {
    let previous = std::mem::replace(&mut view.stocks, stocks);
    view.previous_prices = price_map(&previous);
    view.deltas = compute_deltas(&view.previous_prices, &view.stocks);
    push_render_decision(previous.len(), view.stocks.len(), &view.deltas)
}

/// Rebuilds the portfolio from the current snapshot. Returns whether the
/// rebuilt portfolio differs from the one it replaced.
pub fn refresh_portfolio(view: &mut TickerView, account: Option<&AccountState>) -> bool {
    let portfolio =
        account.map(|state| build_portfolio(&state.account, &state.ledger, &view.stocks));
    let changed = view.portfolio != portfolio;
    view.portfolio = portfolio;
    changed
}

/// [`apply_push`] followed by a portfolio revaluation. A push whose deltas
/// are all zero still renders when the held positions changed value, e.g. a
/// held id swapped out at the same count or a held price moving off zero.
pub fn apply_push_and_revalue(
    view: &mut TickerView,
    stocks: Vec<Stock>,
    account: Option<&AccountState>,
) -> RenderDecision {
    let decision = apply_push(view, stocks);
    if refresh_portfolio(view, account) {
        RenderDecision::Render
    } else {
        decision
    }
}

fn upsert_account(accounts: &mut Vec<TraderAccount>, account: &TraderAccount) {
    match accounts.iter_mut().find(|existing| existing.id == account.id) {
        Some(existing) => *existing = account.clone(),
        None => accounts.push(account.clone()),
    }
}

#[derive(Debug)]
enum FetchOutcome {
    Entities(Result<Vec<Stock>, AppError>),
    Account {
        trader_id: String,
        result: Result<AccountState, AppError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerCommand {
    Reload,
}

struct ReconcileLoop<B: BaselineSource> {
    collection: String,
    store: SnapshotStore,
    render: Arc<RenderGate>,
    baseline: Arc<B>,
    session: SessionContext,
    cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<FetchOutcome>,
    status: watch::Receiver<ConnectionStatus>,
    account: Option<AccountState>,
    observed_disconnect: bool,
}

impl<B: BaselineSource> ReconcileLoop<B> {
    async fn run(
        mut self,
        mut events: ChannelEvents,
        mut outcome_rx: mpsc::UnboundedReceiver<FetchOutcome>,
        mut command_rx: mpsc::UnboundedReceiver<ControllerCommand>,
        mut session_rx: watch::Receiver<Option<String>>,
    ) {
        // Stream events are polled last so a busy push stream cannot hold
        // back fetch results, commands or session changes.
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(outcome) = outcome_rx.recv() => self.apply_outcome(outcome),
                Some(command) = command_rx.recv() => match command {
                    ControllerCommand::Reload => self.reload(),
                },
                Ok(()) = session_rx.changed() => {
                    let trader_id = session_rx.borrow_and_update().clone();
                    self.handle_session_change(trader_id);
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => break,
                },
            }
        }
        debug!(collection = %self.collection, "reconciliation loop exited");
    }

    fn request_render(&self, decision: Option<RenderDecision>) {
        match decision {
            Some(RenderDecision::Render) if !self.cancel.is_cancelled() => {
                self.render.request();
                debug!(generation = self.render.requested(), "render requested");
            }
            Some(RenderDecision::Suppress) => debug!("render suppressed"),
            _ => {}
        }
    }

    fn request_baseline(&self) {
        let baseline = Arc::clone(&self.baseline);
        let outcomes = self.outcomes.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = baseline.fetch_entities() => result,
            };
            let _ = outcomes.send(FetchOutcome::Entities(result));
        });
    }

    fn request_account(&self, trader_id: String) {
        let baseline = Arc::clone(&self.baseline);
        let outcomes = self.outcomes.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let fetched = async {
                let (account, ledger) = tokio::try_join!(
                    baseline.fetch_account(&trader_id),
                    baseline.fetch_account_ledger(&trader_id)
                )?;
                Ok::<_, AppError>(AccountState { account, ledger })
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = fetched => result,
            };
            let _ = outcomes.send(FetchOutcome::Account { trader_id, result });
        });
    }

    fn reload(&self) {
        info!(collection = %self.collection, "reloading baseline");
        self.store.update(|view| view.loading = true);
        self.request_baseline();
        if let Some(trader_id) = self.session.current() {
            self.request_account(trader_id);
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status(ConnectionStatus::Connected) => self.handle_connected(),
            ChannelEvent::Status(_) | ChannelEvent::Closed => self.mark_disconnected(),
            ChannelEvent::Lagged { skipped } => self.resync_after_lag(skipped),
            ChannelEvent::Payload(payload) => {
                let mut bytes = payload.as_bytes().to_vec();
                match parse_stream_message(&mut bytes, &self.collection) {
                    Ok(message) => self.handle_message(message),
                    Err(error) => warn!(%error, "dropping malformed stream payload"),
                }
            }
        }
    }

    fn handle_message(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Connection(ConnectionStatus::Connected) => self.handle_connected(),
            StreamMessage::Connection(_) => self.mark_disconnected(),
            StreamMessage::Entities(stocks) => self.apply_entity_push(stocks),
            StreamMessage::Accounts(accounts) => self.apply_account_push(accounts),
            StreamMessage::Ignored { kind } => debug!(kind = %kind, "ignoring stream message"),
        }
    }

    /// A connect after an observed drop means the server may have moved on
    /// during the outage. The snapshot stays in place until the new
    /// baseline lands.
    fn handle_connected(&mut self) {
        if !self.observed_disconnect {
            return;
        }
        self.observed_disconnect = false;
        info!(collection = %self.collection, "stream reconnected; refreshing baseline");
        self.store.update(|view| view.loading = true);
        self.request_baseline();
        if let Some(trader_id) = self.session.current() {
            self.request_account(trader_id);
        }
    }

    /// Skipped events may have included a drop or a reconnect, so the
    /// snapshot is treated as stale. When the link is up right now the
    /// baseline is refetched at once; otherwise the next connect does it.
    fn resync_after_lag(&mut self, skipped: u64) {
        warn!(skipped, collection = %self.collection, "stream events skipped; resynchronising");
        self.mark_disconnected();
        if *self.status.borrow() == ConnectionStatus::Connected {
            self.handle_connected();
        }
    }

    fn mark_disconnected(&mut self) {
        if self.observed_disconnect {
            return;
        }
        self.observed_disconnect = true;
        self.store.update(|view| {
            if view.phase == ControllerPhase::Live {
                view.phase = ControllerPhase::StaleRecovering;
            }
        });
        info!(collection = %self.collection, "stream dropped; snapshot is stale");
    }

    fn apply_entity_push(&mut self, stocks: Vec<Stock>) {
        let count = stocks.len();
        let account = self.account.as_ref();
        let decision = self
            .store
            .update(|view| apply_push_and_revalue(view, stocks, account));
        debug!(count, "entity push applied");
        self.request_render(decision);
    }

    fn apply_account_push(&mut self, accounts: Vec<TraderAccount>) {
        if let (Some(state), Some(trader_id)) = (self.account.as_mut(), self.session.current()) {
            if let Some(fresh) = accounts.iter().find(|account| account.id == trader_id) {
                state.account = fresh.clone();
            }
        }

        let account = self.account.as_ref();
        let decision = self.store.update(|view| {
            let changed = view.accounts != accounts;
            view.accounts = accounts;
            if refresh_portfolio(view, account) || changed {
                RenderDecision::Render
            } else {
                RenderDecision::Suppress
            }
        });
        self.request_render(decision);
    }

    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Entities(Ok(stocks)) => {
                let count = stocks.len();
                let account = self.account.as_ref();
                let decision = self.store.update(|view| {
                    let decision = apply_baseline(view, stocks);
                    refresh_portfolio(view, account);
                    decision
                });
                info!(count, collection = %self.collection, "baseline applied");
                self.request_render(decision);
            }
            FetchOutcome::Entities(Err(error)) => {
                warn!(%error, collection = %self.collection, "baseline fetch failed");
                let decision = self
                    .store
                    .update(|view| apply_baseline_failure(view, &error));
                self.request_render(decision);
            }
            FetchOutcome::Account { trader_id, result } => {
                if self.session.current().as_deref() != Some(trader_id.as_str()) {
                    debug!(trader_id = %trader_id, "dropping account load for a stale session");
                    return;
                }
                match result {
                    Ok(state) => {
                        self.account = Some(state);
                        let account = self.account.as_ref();
                        let decision = self.store.update(|view| {
                            view.account_error = None;
                            if let Some(state) = account {
                                upsert_account(&mut view.accounts, &state.account);
                            }
                            refresh_portfolio(view, account);
                            RenderDecision::Render
                        });
                        info!(trader_id = %trader_id, "account loaded");
                        self.request_render(decision);
                    }
                    Err(error) => {
                        warn!(%error, trader_id = %trader_id, "account load failed");
                        let decision = self.store.update(|view| {
                            view.account_error = Some(error.to_string());
                            RenderDecision::Render
                        });
                        self.request_render(decision);
                    }
                }
            }
        }
    }

    fn handle_session_change(&mut self, trader_id: Option<String>) {
        self.account = None;
        let decision = self.store.update(|view| {
            view.portfolio = None;
            view.account_error = None;
            RenderDecision::Render
        });
        match trader_id {
            Some(trader_id) => {
                info!(trader_id = %trader_id, "session changed; loading account");
                self.request_account(trader_id);
            }
            None => info!("session cleared"),
        }
        self.request_render(decision);
    }
}

/// Keeps the snapshot of one entity collection reconciled with a baseline
/// source and a live stream. Dropping the controller tears it down.
pub struct TickerController<C: StreamConnector> {
    collection: String,
    channel: StreamChannel<C>,
    store: SnapshotStore,
    render: Arc<RenderGate>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<ControllerCommand>,
    join_handle: Option<JoinHandle<()>>,
}

impl<C: StreamConnector> TickerController<C> {
    /// Enters `Loading`, subscribes to the stream and requests the baseline
    /// (plus the session's account, if any). Must be called inside a tokio
    /// runtime.
    pub fn start<B: BaselineSource>(
        collection: impl Into<String>,
        channel: StreamChannel<C>,
        baseline: Arc<B>,
        session: SessionContext,
    ) -> Self {
        let collection = collection.into();
        let store = SnapshotStore::new();
        store.update(|view| {
            view.phase = ControllerPhase::Loading;
            view.loading = true;
        });
        let render = Arc::new(RenderGate::new());
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session_rx = session.subscribe();

        let events = channel.open();
        let reconcile = ReconcileLoop {
            collection: collection.clone(),
            store: store.clone(),
            render: Arc::clone(&render),
            baseline,
            session,
            cancel: cancel.clone(),
            outcomes: outcome_tx,
            status: channel.status(),
            account: None,
            observed_disconnect: false,
        };
        reconcile.request_baseline();
        if let Some(trader_id) = reconcile.session.current() {
            reconcile.request_account(trader_id);
        }
        info!(collection = %collection, "ticker controller started");

        let join_handle = tokio::spawn(reconcile.run(events, outcome_rx, command_rx, session_rx));

        Self {
            collection,
            channel,
            store,
            render,
            cancel,
            commands: command_tx,
            join_handle: Some(join_handle),
        }
    }

    /// Re-issues the baseline fetch. The current snapshot stays visible
    /// until the new baseline arrives.
    pub fn reload(&self) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::NotRunning);
        }
        self.commands
            .send(ControllerCommand::Reload)
            .map_err(|_| AppError::NotRunning)
    }

    pub fn store(&self) -> SnapshotStore {
        self.store.clone()
    }

    pub fn view(&self) -> TickerView {
        self.store.snapshot()
    }

    pub fn render_signal(&self) -> RenderSignal {
        self.render.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.channel.current_status()
    }

    pub fn status(&self) -> TickerStatusSnapshot {
        let connection = self.channel.current_status();
        let render_count = self.render.requested();
        self.store.read(|view| TickerStatusSnapshot {
            phase: view.phase,
            connection,
            collection: self.collection.clone(),
            entity_count: view.stocks.len(),
            loading: view.loading,
            last_error: view.error.clone(),
            account_error: view.account_error.clone(),
            render_count,
            reason: view.reason.clone(),
        })
    }

    /// Stops the loop, retires the store and closes the channel before
    /// returning. Later calls are no-ops.
    pub fn teardown(&self, reason: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.store.retire_with(|view| {
            view.phase = ControllerPhase::Stopped;
            view.loading = false;
            view.reason = Some(reason.to_string());
        });
        self.channel.close();
        info!(collection = %self.collection, reason, "ticker controller torn down");
    }

    /// Tears down and waits for the reconciliation loop to exit.
    pub async fn shutdown(mut self, reason: &str) {
        self.teardown(reason);
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

impl<C: StreamConnector> Drop for TickerController<C> {
    fn drop(&mut self) {
        self.teardown("controller dropped");
    }
}
