use super::{
    GameView,
    SessionCommand,
};
use crate::{
    error::FailureKind,
    orchestrator::{
        NameRequest,
        TxRequest,
    },
    types::{
        Affiliate,
        PlayerState,
        RoundState,
        TeamId,
        TxReceipt,
        U256,
    },
};
use tokio::sync::{
    mpsc,
    oneshot,
    watch,
};

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<GameView>,
}

impl SessionHandle {
    pub(super) fn new(
        commands: mpsc::UnboundedSender<SessionCommand>,
        view: watch::Receiver<GameView>,
    ) -> Self {
        Self { commands, view }
    }

    /// Latest published snapshot.
    pub fn view(&self) -> GameView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GameView> {
        self.view.clone()
    }

    pub async fn submit(&self, request: TxRequest) -> Result<TxReceipt, FailureKind> {
        self.request(|reply| SessionCommand::Submit { request, reply })
            .await?
    }

    /// Buys `want_x_puffs` puffs for the selected team in the current round.
    pub async fn buy_puffs(
        &self,
        affiliate: Option<Affiliate>,
    ) -> Result<TxReceipt, FailureKind> {
        self.request(|reply| SessionCommand::BuyPuffs { affiliate, reply })
            .await?
    }

    pub async fn withdraw(&self) -> Result<TxReceipt, FailureKind> {
        self.submit(TxRequest::Withdraw).await
    }

    pub async fn buy_name(
        &self,
        name: impl Into<String>,
        affiliate: Option<Affiliate>,
    ) -> Result<TxReceipt, FailureKind> {
        self.submit(TxRequest::RegisterName(NameRequest {
            name: name.into(),
            affiliate,
        }))
        .await
    }

    pub async fn fetch_new_round(&self) -> Result<RoundState, FailureKind> {
        self.request(|reply| SessionCommand::FetchNewRound { reply })
            .await
    }

    pub async fn refresh_player(&self) -> Result<PlayerState, FailureKind> {
        self.request(|reply| SessionCommand::RefreshPlayer { reply })
            .await
    }

    pub fn select_team(&self, team: TeamId) -> Result<(), FailureKind> {
        self.send(SessionCommand::SelectTeam(team))
    }

    pub fn set_want_x_puffs(&self, puffs: U256) -> Result<(), FailureKind> {
        self.send(SessionCommand::SetWantXPuffs(puffs))
    }

    pub fn on_round_changed(
        &self,
        listener: impl Fn(&RoundState) + Send + Sync + 'static,
    ) -> Result<(), FailureKind> {
        self.send(SessionCommand::OnRoundChanged(Box::new(listener)))
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    fn send(&self, cmd: SessionCommand) -> Result<(), FailureKind> {
        self.commands
            .send(cmd)
            .map_err(|_| FailureKind::SessionClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, FailureKind> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response.await.map_err(|_| FailureKind::SessionClosed)
    }
}
