use crate::{
    error::{
        FailureKind,
        GatewayError,
    },
    events::{
        self,
        EventBatch,
        EventListener,
    },
    gateway::{
        EventSource,
        GameGateway,
    },
    orchestrator::{
        self,
        AdmitContext,
        BuyRequest,
        PendingTransaction,
        PurchaseAmount,
        TxKind,
        TxOrchestrator,
        TxRequest,
    },
    player::{
        self,
        FetchTicket,
        PlayerTracker,
    },
    round::{
        self,
        RoundListener,
        RoundSynchronizer,
        RoundUpdate,
    },
    settings::SessionConfig,
    types::{
        Address,
        Affiliate,
        EventRecord,
        GameEvent,
        PlayerState,
        RoundId,
        RoundInfo,
        RoundState,
        TeamId,
        TeamSelection,
        TxHash,
        TxReceipt,
        U256,
    },
};
use chrono::Utc;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
    },
    task::JoinHandle,
    time::{
        self,
        Instant,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

mod handle;

pub use handle::SessionHandle;

/// Wall clock used for round deadlines.
pub trait Clock: Send + Sync + 'static {
    /// Unix seconds.
    fn now(&self) -> u64;

    /// Timer instant at which `unix` is reached.
    fn instant_at(&self, unix: u64) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }

    fn instant_at(&self, unix: u64) -> Instant {
        Instant::now() + Duration::from_secs(unix.saturating_sub(self.now()))
    }
}

/// Snapshot published to every observer after each state change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GameView {
    pub account: Option<Address>,
    pub round_id: RoundId,
    pub round: RoundState,
    pub end_time: u64,
    pub active_team_index: TeamId,
    pub player: PlayerState,
    pub want_x_puffs: U256,
    pub puffs_to_eth: U256,
    pub pending: Vec<PendingTransaction>,
}

type TxReply = oneshot::Sender<Result<TxReceipt, FailureKind>>;

pub(crate) enum SessionCommand {
    Submit {
        request: TxRequest,
        reply: TxReply,
    },
    BuyPuffs {
        affiliate: Option<Affiliate>,
        reply: TxReply,
    },
    FetchNewRound {
        reply: oneshot::Sender<RoundState>,
    },
    RefreshPlayer {
        reply: oneshot::Sender<PlayerState>,
    },
    SelectTeam(TeamId),
    SetWantXPuffs(U256),
    OnRoundChanged(RoundListener),
    Shutdown,
}

enum Internal {
    Round(Result<RoundInfo, GatewayError>),
    Player(FetchTicket, Result<PlayerState, GatewayError>),
    Events(u64, Result<EventBatch, GatewayError>),
    Quote {
        puffs: U256,
        result: Result<U256, GatewayError>,
    },
    Sent(TxKind, TxHash),
    Finished {
        kind: TxKind,
        result: Result<TxReceipt, FailureKind>,
        reply: TxReply,
    },
}

/// Single owner of all client state for one account and gateway.
///
/// Commands, timer ticks and completed gateway calls are multiplexed in
/// one loop; gateway calls run on spawned tasks and report back over
/// `internal`, so the loop never waits on the network.
pub struct Session<G, C = SystemClock> {
    gateway: Arc<G>,
    clock: C,
    config: SessionConfig,
    account: Option<Address>,
    round: RoundSynchronizer,
    player: PlayerTracker,
    orchestrator: TxOrchestrator,
    events: EventListener,
    selection: TeamSelection,
    want_x_puffs: U256,
    puffs_to_eth: U256,
    view_tx: watch::Sender<GameView>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl<G, C> Session<G, C>
where
    G: GameGateway + EventSource,
    C: Clock,
{
    /// Starts the session loop. `team_count` bounds team selection; zero
    /// accepts any non-zero team.
    pub fn spawn(
        gateway: Arc<G>,
        config: SessionConfig,
        team_count: usize,
        clock: C,
    ) -> (SessionHandle, JoinHandle<()>) {
        let account = gateway.account();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(GameView {
            account,
            ..Default::default()
        });
        let session = Session {
            gateway,
            clock,
            config,
            account,
            round: RoundSynchronizer::new(),
            player: PlayerTracker::new(account),
            orchestrator: TxOrchestrator::new(team_count),
            events: EventListener::new(),
            selection: TeamSelection::default(),
            want_x_puffs: U256::zero(),
            puffs_to_eth: U256::zero(),
            view_tx,
            commands: cmd_rx,
            internal_tx,
            internal_rx,
        };
        let task = tokio::spawn(session.run());
        (SessionHandle::new(cmd_tx, view_rx), task)
    }

    async fn run(mut self) {
        info!(account = ?self.account, "session started");
        let start = Instant::now();
        let mut round_ticker = time::interval(self.config.round_poll_interval);
        round_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut player_ticker = time::interval_at(
            start + self.config.player_refresh_interval,
            self.config.player_refresh_interval,
        );
        player_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut event_ticker = time::interval_at(
            start + self.config.event_poll_interval,
            self.config.event_poll_interval,
        );
        event_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polling = true;

        loop {
            let deadline = self
                .round
                .deadline()
                .map(|end| self.clock.instant_at(end) + self.config.deadline_grace);

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        None | Some(SessionCommand::Shutdown) => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                Some(msg) = self.internal_rx.recv() => self.handle_internal(msg),
                _ = round_ticker.tick(), if polling => self.refresh_round(None, false),
                _ = player_ticker.tick() => self.refresh_player(None),
                _ = event_ticker.tick() => self.poll_events(),
                _ = sleep_until(deadline) => {
                    debug!(end_time = self.round.current_round().end_time, "round deadline reached");
                    self.round.mark_deadline_fired();
                    self.refresh_round(None, true);
                }
            }

            let now_polling = self.round.needs_polling();
            if now_polling && !polling {
                round_ticker.reset();
            }
            polling = now_polling;
            self.publish();
        }
        self.events.unsubscribe();
        info!("session stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Submit { request, reply } => self.submit(request, reply),
            SessionCommand::BuyPuffs { affiliate, reply } => {
                let request = TxRequest::Buy(BuyRequest {
                    team: self.selection.active_team,
                    amount: PurchaseAmount::Puffs(self.want_x_puffs),
                    affiliate,
                    round_id: Some(self.round.current_round().round_id),
                });
                self.submit(request, reply);
            }
            SessionCommand::FetchNewRound { reply } => self.refresh_round(Some(reply), false),
            SessionCommand::RefreshPlayer { reply } => self.refresh_player(Some(reply)),
            SessionCommand::SelectTeam(team) => {
                self.selection.active_team = team;
                self.round.rescore(team);
            }
            SessionCommand::SetWantXPuffs(puffs) => {
                self.want_x_puffs = puffs;
                self.refresh_quote();
            }
            SessionCommand::OnRoundChanged(listener) => self.round.on_round_changed(listener),
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Round(result) => {
                let outcome = self
                    .round
                    .finish_refresh(result, self.selection.active_team);
                if outcome.follow_up {
                    self.spawn_round_fetch();
                }
                match outcome.update {
                    RoundUpdate::NewRound { .. } => self.on_new_round(),
                    RoundUpdate::Updated => self.refresh_quote(),
                    _ => {}
                }
            }
            Internal::Player(ticket, result) => {
                let current = self.round.current_round().round_id;
                if let Some(next) = self.player.finish_refresh(ticket, result, current) {
                    self.spawn_player_fetch(next);
                }
            }
            Internal::Events(generation, result) => {
                for record in self.events.finish_poll(generation, result) {
                    self.handle_event(record);
                }
            }
            Internal::Quote { puffs, result } => match result {
                Ok(eth) if puffs == self.want_x_puffs => self.puffs_to_eth = eth,
                Ok(_) => {}
                Err(err) => warn!(?err, %puffs, "price quote failed"),
            },
            Internal::Sent(kind, tx_hash) => self.orchestrator.mark_sent(kind, tx_hash),
            Internal::Finished {
                kind,
                result,
                reply,
            } => self.finish_transaction(kind, result, reply),
        }
    }

    fn handle_event(&mut self, record: EventRecord) {
        debug!(event = ?record.event, block = record.block_number, "game event");
        match record.event {
            GameEvent::NewRound {
                round_id,
                start_time,
                end_time,
            } => {
                if self
                    .round
                    .apply_new_round(round_id, start_time, end_time)
                    .is_new_round()
                {
                    self.on_new_round();
                    self.refresh_round(None, true);
                }
            }
            GameEvent::RoundEnded {
                round_id,
                winner_team_id,
                winner_id,
            } => {
                self.round.apply_round_ended(
                    round_id,
                    winner_team_id,
                    winner_id,
                    self.selection.active_team,
                );
            }
            GameEvent::Purchase { account, .. } => {
                if Some(account) == self.account && !self.orchestrator.tracks(&record.tx_hash)
                {
                    self.refresh_player(None);
                }
                self.refresh_round(None, true);
            }
        }
    }

    fn on_new_round(&mut self) {
        let round_id = self.round.current_round().round_id;
        self.selection.reset();
        self.events.subscribe(round_id);
        self.refresh_player(None);
        self.refresh_quote();
    }

    fn submit(&mut self, request: TxRequest, reply: TxReply) {
        let ctx = AdmitContext {
            account: self.account,
            round: self.round.current_round(),
            player: self.player.current_player(),
            now: self.clock.now(),
        };
        let plan = match self.orchestrator.admit(request, ctx) {
            Ok(plan) => plan,
            Err(failure) => {
                info!(%failure, "request rejected");
                let _ = reply.send(Err(failure));
                return;
            }
        };

        let kind = plan.kind();
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        let confirm_timeout = self.config.confirmation_timeout;
        tokio::spawn(async move {
            let sent = internal.clone();
            let result = orchestrator::execute(gateway.as_ref(), plan, confirm_timeout, move |hash| {
                let _ = sent.send(Internal::Sent(kind, hash));
            })
            .await;
            let _ = internal.send(Internal::Finished {
                kind,
                result,
                reply,
            });
        });
    }

    fn finish_transaction(
        &mut self,
        kind: TxKind,
        result: Result<TxReceipt, FailureKind>,
        reply: TxReply,
    ) {
        match result {
            Ok(receipt) => {
                self.orchestrator.confirm(kind, &receipt);
                self.refresh_round(None, true);
                let (player_tx, player_rx) = oneshot::channel();
                self.refresh_player(Some(player_tx));
                tokio::spawn(async move {
                    let _ = player_rx.await;
                    let _ = reply.send(Ok(receipt));
                });
            }
            Err(failure) => {
                self.orchestrator.fail(kind, failure.clone());
                let _ = reply.send(Err(failure));
            }
        }
    }

    fn refresh_round(&mut self, waiter: Option<oneshot::Sender<RoundState>>, fresh: bool) {
        if self.round.begin_refresh(waiter, fresh) {
            self.spawn_round_fetch();
        }
    }

    fn spawn_round_fetch(&self) {
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = round::fetch_round(gateway.as_ref()).await;
            let _ = internal.send(Internal::Round(result));
        });
    }

    fn refresh_player(&mut self, reply: Option<oneshot::Sender<PlayerState>>) {
        let round_id = self.round.current_round().round_id;
        if let Some(ticket) = self.player.request_refresh(round_id, reply) {
            self.spawn_player_fetch(ticket);
        }
    }

    fn spawn_player_fetch(&self, ticket: FetchTicket) {
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result =
                player::fetch_player(gateway.as_ref(), ticket.account, ticket.round_id).await;
            let _ = internal.send(Internal::Player(ticket, result));
        });
    }

    fn poll_events(&mut self) {
        let Some(ticket) = self.events.begin_poll() else {
            return;
        };
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = events::poll_events(gateway.as_ref(), ticket).await;
            let _ = internal.send(Internal::Events(ticket.generation, result));
        });
    }

    fn refresh_quote(&mut self) {
        let puffs = self.want_x_puffs;
        if puffs.is_zero() {
            self.puffs_to_eth = U256::zero();
            return;
        }
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = gateway.puffs_to_eth(puffs).await;
            let _ = internal.send(Internal::Quote { puffs, result });
        });
    }

    fn publish(&self) {
        let round = self.round.current_round();
        let view = GameView {
            account: self.account,
            round_id: round.round_id,
            round: round.clone(),
            end_time: round.end_time,
            active_team_index: self.selection.active_team,
            player: self.player.current_player().clone(),
            want_x_puffs: self.want_x_puffs,
            puffs_to_eth: self.puffs_to_eth,
            pending: self.orchestrator.pending(),
        };
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
