use crate::{
    error::FailureKind,
    gateway::GameGateway,
    types::{
        Address,
        Affiliate,
        AffiliateRoute,
        BuyOrder,
        NameOrder,
        PlayerState,
        RoundId,
        RoundState,
        TeamId,
        TxHash,
        TxReceipt,
        U256,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::{
        BTreeMap,
        HashSet,
        VecDeque,
    },
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
};
use tracing::{
    info,
    warn,
};

#[cfg(test)]
mod tests;

pub const MAX_NAME_BYTES: usize = 32;
const RECONCILED_HISTORY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxKind {
    Buy,
    Withdraw,
    RegisterName,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed(FailureKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchaseAmount {
    Eth(U256),
    Puffs(U256),
}

impl PurchaseAmount {
    fn is_zero(&self) -> bool {
        match self {
            PurchaseAmount::Eth(value) | PurchaseAmount::Puffs(value) => value.is_zero(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuyRequest {
    pub team: TeamId,
    pub amount: PurchaseAmount,
    pub affiliate: Option<Affiliate>,
    /// Round the purchase was composed against; `None` targets the current one.
    pub round_id: Option<RoundId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameRequest {
    pub name: String,
    pub affiliate: Option<Affiliate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxRequest {
    Buy(BuyRequest),
    Withdraw,
    RegisterName(NameRequest),
}

impl TxRequest {
    pub fn kind(&self) -> TxKind {
        match self {
            TxRequest::Buy(_) => TxKind::Buy,
            TxRequest::Withdraw => TxKind::Withdraw,
            TxRequest::RegisterName(_) => TxKind::RegisterName,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub kind: TxKind,
    pub params: TxRequest,
    pub status: TxStatus,
    pub submitted_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
}

/// Validated, routed form of a request, ready to hit the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxPlan {
    Buy {
        team: TeamId,
        amount: PurchaseAmount,
        affiliate: AffiliateRoute,
    },
    Withdraw,
    RegisterName {
        name: String,
        affiliate: AffiliateRoute,
    },
}

impl TxPlan {
    pub fn kind(&self) -> TxKind {
        match self {
            TxPlan::Buy { .. } => TxKind::Buy,
            TxPlan::Withdraw => TxKind::Withdraw,
            TxPlan::RegisterName { .. } => TxKind::RegisterName,
        }
    }
}

/// Read-only view of the session state used by admission checks.
#[derive(Clone, Copy, Debug)]
pub struct AdmitContext<'a> {
    pub account: Option<Address>,
    pub round: &'a RoundState,
    pub player: &'a PlayerState,
    pub now: u64,
}

/// Admission and bookkeeping for mutating requests. Holds at most one
/// pending transaction per kind.
#[derive(Debug)]
pub struct TxOrchestrator {
    team_count: usize,
    pending: BTreeMap<TxKind, PendingTransaction>,
    session_names: HashSet<String>,
    reconciled: VecDeque<TxHash>,
}

impl TxOrchestrator {
    /// `team_count` of zero accepts any non-zero team.
    pub fn new(team_count: usize) -> Self {
        Self {
            team_count,
            pending: BTreeMap::new(),
            session_names: HashSet::new(),
            reconciled: VecDeque::new(),
        }
    }

    pub fn pending(&self) -> Vec<PendingTransaction> {
        self.pending.values().cloned().collect()
    }

    pub fn pending_of(&self, kind: TxKind) -> Option<&PendingTransaction> {
        self.pending.get(&kind)
    }

    /// Runs every precondition and, on success, records the request as
    /// Submitted. No remote call is made here.
    pub fn admit(
        &mut self,
        request: TxRequest,
        ctx: AdmitContext<'_>,
    ) -> Result<TxPlan, FailureKind> {
        if ctx.account.is_none() {
            return Err(FailureKind::NoAccount);
        }
        let plan = match &request {
            TxRequest::Buy(buy) => self.admit_buy(buy, &ctx)?,
            TxRequest::Withdraw => self.admit_withdraw(&ctx)?,
            TxRequest::RegisterName(register) => self.admit_name(register, &ctx)?,
        };
        if let TxPlan::RegisterName { name, .. } = &plan {
            self.session_names.insert(name.to_lowercase());
        }
        let kind = plan.kind();
        info!(?kind, "transaction submitted");
        self.pending.insert(
            kind,
            PendingTransaction {
                kind,
                params: request,
                status: TxStatus::Submitted,
                submitted_at: Utc::now(),
                tx_hash: None,
            },
        );
        Ok(plan)
    }

    fn admit_buy(&self, buy: &BuyRequest, ctx: &AdmitContext<'_>) -> Result<TxPlan, FailureKind> {
        if buy.team == 0 || (self.team_count != 0 && buy.team > self.team_count as TeamId) {
            return Err(FailureKind::InvalidTeam(buy.team));
        }
        if buy.amount.is_zero() {
            return Err(FailureKind::InvalidAmount);
        }
        let affiliate = route_affiliate(buy.affiliate.as_ref())?;
        self.ensure_idle(TxKind::Buy)?;
        let current = ctx.round.round_id;
        let requested = buy.round_id.unwrap_or(current);
        if requested != current || ctx.round.is_over_at(ctx.now) {
            return Err(FailureKind::StaleRound { requested, current });
        }
        Ok(TxPlan::Buy {
            team: buy.team,
            amount: buy.amount,
            affiliate,
        })
    }

    fn admit_withdraw(&self, ctx: &AdmitContext<'_>) -> Result<TxPlan, FailureKind> {
        self.ensure_idle(TxKind::Withdraw)?;
        if !ctx.player.has_vault_balance() {
            return Err(FailureKind::NothingToWithdraw);
        }
        Ok(TxPlan::Withdraw)
    }

    fn admit_name(
        &self,
        register: &NameRequest,
        ctx: &AdmitContext<'_>,
    ) -> Result<TxPlan, FailureKind> {
        let name = register.name.trim();
        if name.is_empty() {
            return Err(FailureKind::InvalidName("name is empty".to_string()));
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(FailureKind::InvalidName(format!(
                "{name:?} is longer than {MAX_NAME_BYTES} bytes"
            )));
        }
        if self.session_names.contains(&name.to_lowercase()) || ctx.player.owns_name(name) {
            return Err(FailureKind::InvalidName(format!("{name:?} is already taken")));
        }
        let affiliate = route_affiliate(register.affiliate.as_ref())?;
        self.ensure_idle(TxKind::RegisterName)?;
        Ok(TxPlan::RegisterName {
            name: name.to_string(),
            affiliate,
        })
    }

    fn ensure_idle(&self, kind: TxKind) -> Result<(), FailureKind> {
        if self.pending.contains_key(&kind) {
            Err(FailureKind::AlreadyPending(kind))
        } else {
            Ok(())
        }
    }

    pub fn mark_sent(&mut self, kind: TxKind, tx_hash: TxHash) {
        if let Some(pending) = self.pending.get_mut(&kind) {
            pending.tx_hash = Some(tx_hash);
        }
    }

    /// Moves a Submitted transaction to Confirmed and releases its kind.
    pub fn confirm(&mut self, kind: TxKind, receipt: &TxReceipt) -> Option<PendingTransaction> {
        let mut done = self.pending.remove(&kind)?;
        done.status = TxStatus::Confirmed;
        done.tx_hash = Some(receipt.tx_hash);
        if self.reconciled.len() == RECONCILED_HISTORY {
            self.reconciled.pop_front();
        }
        self.reconciled.push_back(receipt.tx_hash);
        info!(?kind, tx_hash = ?receipt.tx_hash, block = ?receipt.block_number, "transaction confirmed");
        Some(done)
    }

    /// Moves a Submitted transaction to Failed and releases its kind.
    pub fn fail(&mut self, kind: TxKind, failure: FailureKind) -> Option<PendingTransaction> {
        let mut done = self.pending.remove(&kind)?;
        if let TxRequest::RegisterName(register) = &done.params {
            self.session_names.remove(&register.name.trim().to_lowercase());
        }
        warn!(?kind, %failure, tx_hash = ?done.tx_hash, "transaction failed");
        done.status = TxStatus::Failed(failure);
        Some(done)
    }

    /// Whether a confirmed transaction of this session already triggered
    /// reconciliation.
    pub fn was_reconciled(&self, tx_hash: &TxHash) -> bool {
        self.reconciled.contains(tx_hash)
    }

    /// Whether this session sent the transaction, so its confirmation
    /// handles reconciliation.
    pub fn tracks(&self, tx_hash: &TxHash) -> bool {
        self.was_reconciled(tx_hash)
            || self
                .pending
                .values()
                .any(|pending| pending.tx_hash.as_ref() == Some(tx_hash))
    }
}

/// Address beats id beats name; no affiliate routes to the zero address.
pub fn route_affiliate(affiliate: Option<&Affiliate>) -> Result<AffiliateRoute, FailureKind> {
    let Some(affiliate) = affiliate else {
        return Ok(AffiliateRoute::default());
    };
    if let Some(address) = affiliate.address {
        if address.is_zero() {
            return Err(FailureKind::InvalidAffiliate("zero address".to_string()));
        }
        return Ok(AffiliateRoute::Address(address));
    }
    if let Some(id) = affiliate.id {
        if id.is_zero() {
            return Err(FailureKind::InvalidAffiliate("zero player id".to_string()));
        }
        return Ok(AffiliateRoute::Id(id));
    }
    if let Some(name) = &affiliate.name {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_BYTES {
            return Err(FailureKind::InvalidAffiliate(format!("name {name:?}")));
        }
        return Ok(AffiliateRoute::Name(name.to_string()));
    }
    Ok(AffiliateRoute::default())
}

/// Sends an admitted plan and waits for its receipt. `timeout` bounds the
/// whole cycle, quote and send included.
pub async fn execute<G: GameGateway>(
    gateway: &G,
    plan: TxPlan,
    timeout: Duration,
    on_sent: impl FnOnce(TxHash),
) -> Result<TxReceipt, FailureKind> {
    let deadline = Instant::now() + timeout;
    let kind = plan.kind();
    let tx_hash = match time::timeout_at(deadline, send(gateway, plan)).await {
        Ok(sent) => sent?,
        Err(_) => {
            return Err(FailureKind::NetworkTimeout(format!(
                "{kind:?} transaction was not sent within {timeout:?}"
            )));
        }
    };
    on_sent(tx_hash);
    match time::timeout_at(deadline, gateway.confirm(tx_hash)).await {
        Ok(result) => result.map_err(FailureKind::from),
        Err(_) => Err(FailureKind::ConfirmationTimeout(tx_hash)),
    }
}

async fn send<G: GameGateway>(gateway: &G, plan: TxPlan) -> Result<TxHash, FailureKind> {
    let tx_hash = match plan {
        TxPlan::Buy {
            team,
            amount,
            affiliate,
        } => {
            let eth = match amount {
                PurchaseAmount::Eth(eth) => eth,
                PurchaseAmount::Puffs(puffs) => gateway.puffs_to_eth(puffs).await?,
            };
            gateway
                .send_buy(&BuyOrder {
                    team,
                    eth,
                    affiliate,
                })
                .await?
        }
        TxPlan::Withdraw => gateway.send_withdraw().await?,
        TxPlan::RegisterName { name, affiliate } => {
            gateway
                .send_register_name(&NameOrder { name, affiliate })
                .await?
        }
    };
    Ok(tx_hash)
}
