use crate::{
    error::GatewayError,
    gateway::{
        EventSource,
        GameGateway,
    },
    session::Clock,
    types::{
        Address,
        BuyOrder,
        EventRecord,
        GameEvent,
        NameOrder,
        PlayerRoundBalances,
        RoundId,
        RoundInfo,
        TxHash,
        TxReceipt,
        U256,
        Vaults,
    },
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    time::Instant,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub round_id: usize,
    pub round_info: usize,
    pub player_id: usize,
    pub player_round: usize,
    pub player_vaults: usize,
    pub owned_nfts: usize,
    pub player_names: usize,
    pub puffs_to_eth: usize,
    pub send_buy: usize,
    pub send_withdraw: usize,
    pub send_register_name: usize,
    pub confirm: usize,
    pub latest_block: usize,
    pub round_events: usize,
}

impl CallCounts {
    pub fn sends(&self) -> usize {
        self.send_buy + self.send_withdraw + self.send_register_name
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentTx {
    Buy(BuyOrder),
    Withdraw,
    RegisterName(NameOrder),
}

#[derive(Debug)]
struct FakeChain {
    account: Option<Address>,
    round: RoundInfo,
    player_id: U256,
    balances: PlayerRoundBalances,
    vaults: Vaults,
    nfts: Vec<U256>,
    names: Vec<String>,
    wei_per_puff: U256,
    head: u64,
    events: Vec<EventRecord>,
    calls: CallCounts,
    sent: Vec<SentTx>,
    unconfirmed: HashMap<TxHash, SentTx>,
    next_tx: u64,
    read_failure: Option<GatewayError>,
    send_revert: Option<String>,
    confirm_revert: Option<String>,
    hold_confirmations: bool,
    never_confirm: bool,
    stall_send: bool,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            account: None,
            round: RoundInfo::default(),
            player_id: U256::zero(),
            balances: PlayerRoundBalances::default(),
            vaults: Vaults::default(),
            nfts: Vec::new(),
            names: Vec::new(),
            wei_per_puff: U256::from(1_000),
            head: 0,
            events: Vec::new(),
            calls: CallCounts::default(),
            sent: Vec::new(),
            unconfirmed: HashMap::new(),
            next_tx: 0,
            read_failure: None,
            send_revert: None,
            confirm_revert: None,
            hold_confirmations: false,
            never_confirm: false,
            stall_send: false,
        }
    }
}

impl FakeChain {
    fn record_send(&mut self, tx: SentTx) -> Result<TxHash, GatewayError> {
        if let Some(reason) = self.send_revert.take() {
            return Err(GatewayError::ChainRevert(reason));
        }
        self.next_tx += 1;
        let tx_hash = TxHash::from_low_u64_be(self.next_tx);
        self.sent.push(tx.clone());
        self.unconfirmed.insert(tx_hash, tx);
        Ok(tx_hash)
    }

    fn mine(&mut self, tx_hash: TxHash) -> TxReceipt {
        self.head += 1;
        match self.unconfirmed.remove(&tx_hash) {
            Some(SentTx::Buy(order)) => {
                if self.player_id.is_zero() {
                    self.player_id = U256::one();
                }
                let puffs = order.eth / self.wei_per_puff;
                self.balances.eth += order.eth;
                self.balances.puffs += puffs;
                self.round.eth += order.eth;
                self.round.puffs += puffs;
                self.round.pot += order.eth;
                self.events.push(EventRecord {
                    event: GameEvent::Purchase {
                        account: self.account.unwrap_or_default(),
                        round_id: self.round.round_id,
                        team: order.team,
                        eth: order.eth,
                        puffs,
                    },
                    block_number: self.head,
                    log_index: 0,
                    tx_hash,
                });
            }
            Some(SentTx::Withdraw) => {
                self.vaults = Vaults::default();
            }
            Some(SentTx::RegisterName(order)) => {
                self.names.push(order.name);
            }
            None => {}
        }
        TxReceipt {
            tx_hash,
            block_number: Some(self.head),
            gas_used: Some(U256::from(21_000)),
        }
    }
}

/// In-memory chain behind both gateway traits. Counts every call.
#[derive(Clone, Default)]
pub struct FakeGateway {
    chain: Arc<Mutex<FakeChain>>,
    release: Arc<Notify>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, account: Address) -> Self {
        self.chain.lock().unwrap().account = Some(account);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.chain.lock().unwrap().calls.clone()
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.chain.lock().unwrap().sent.clone()
    }

    pub fn round(&self) -> RoundInfo {
        self.chain.lock().unwrap().round.clone()
    }

    pub fn set_round(&self, round: RoundInfo) {
        self.chain.lock().unwrap().round = round;
    }

    pub fn update_round(&self, update: impl FnOnce(&mut RoundInfo)) {
        update(&mut self.chain.lock().unwrap().round);
    }

    pub fn set_player(&self, player_id: U256, balances: PlayerRoundBalances, vaults: Vaults) {
        let mut chain = self.chain.lock().unwrap();
        chain.player_id = player_id;
        chain.balances = balances;
        chain.vaults = vaults;
    }

    pub fn set_nfts(&self, nfts: Vec<U256>) {
        self.chain.lock().unwrap().nfts = nfts;
    }

    pub fn set_names(&self, names: Vec<String>) {
        self.chain.lock().unwrap().names = names;
    }

    pub fn set_wei_per_puff(&self, wei: U256) {
        self.chain.lock().unwrap().wei_per_puff = wei;
    }

    pub fn set_head(&self, head: u64) {
        self.chain.lock().unwrap().head = head;
    }

    /// Appends a log entry and advances the head to its block.
    pub fn push_event(&self, record: EventRecord) {
        let mut chain = self.chain.lock().unwrap();
        chain.head = chain.head.max(record.block_number);
        chain.events.push(record);
    }

    pub fn fail_reads(&self, failure: Option<GatewayError>) {
        self.chain.lock().unwrap().read_failure = failure;
    }

    pub fn revert_next_send(&self, reason: impl Into<String>) {
        self.chain.lock().unwrap().send_revert = Some(reason.into());
    }

    pub fn revert_on_confirm(&self, reason: impl Into<String>) {
        self.chain.lock().unwrap().confirm_revert = Some(reason.into());
    }

    /// Confirmations block until `release_confirmation` is called.
    pub fn hold_confirmations(&self, hold: bool) {
        self.chain.lock().unwrap().hold_confirmations = hold;
    }

    pub fn release_confirmation(&self) {
        self.release.notify_one();
    }

    pub fn never_confirm(&self) {
        self.chain.lock().unwrap().never_confirm = true;
    }

    /// The next send never answers; later sends behave normally.
    pub fn stall_next_send(&self) {
        self.chain.lock().unwrap().stall_send = true;
    }

    async fn stall_if_requested(&self) {
        let stall = std::mem::take(&mut self.chain.lock().unwrap().stall_send);
        if stall {
            std::future::pending::<()>().await;
        }
    }

    fn read<T>(
        &self,
        count: impl FnOnce(&mut CallCounts),
        read: impl FnOnce(&FakeChain) -> T,
    ) -> Result<T, GatewayError> {
        let mut chain = self.chain.lock().unwrap();
        count(&mut chain.calls);
        if let Some(failure) = chain.read_failure.clone() {
            return Err(failure);
        }
        Ok(read(&chain))
    }
}

impl GameGateway for FakeGateway {
    fn account(&self) -> Option<Address> {
        self.chain.lock().unwrap().account
    }

    async fn current_round_id(&self) -> Result<RoundId, GatewayError> {
        self.read(|c| c.round_id += 1, |chain| chain.round.round_id)
    }

    async fn round_info(&self, round_id: RoundId) -> Result<RoundInfo, GatewayError> {
        self.read(
            |c| c.round_info += 1,
            |chain| {
                if chain.round.round_id == round_id {
                    chain.round.clone()
                } else {
                    RoundInfo {
                        round_id,
                        ..Default::default()
                    }
                }
            },
        )
    }

    async fn player_id(&self, account: Address) -> Result<U256, GatewayError> {
        self.read(
            |c| c.player_id += 1,
            |chain| {
                if chain.account == Some(account) {
                    chain.player_id
                } else {
                    U256::zero()
                }
            },
        )
    }

    async fn player_round(
        &self,
        _player_id: U256,
        _round_id: RoundId,
    ) -> Result<PlayerRoundBalances, GatewayError> {
        self.read(|c| c.player_round += 1, |chain| chain.balances)
    }

    async fn player_vaults(&self, _player_id: U256) -> Result<Vaults, GatewayError> {
        self.read(|c| c.player_vaults += 1, |chain| chain.vaults)
    }

    async fn owned_nfts(&self, _account: Address) -> Result<Vec<U256>, GatewayError> {
        self.read(|c| c.owned_nfts += 1, |chain| chain.nfts.clone())
    }

    async fn player_names(&self, _account: Address) -> Result<Vec<String>, GatewayError> {
        self.read(|c| c.player_names += 1, |chain| chain.names.clone())
    }

    async fn puffs_to_eth(&self, puffs: U256) -> Result<U256, GatewayError> {
        self.read(|c| c.puffs_to_eth += 1, |chain| puffs * chain.wei_per_puff)
    }

    async fn send_buy(&self, order: &BuyOrder) -> Result<TxHash, GatewayError> {
        self.stall_if_requested().await;
        let mut chain = self.chain.lock().unwrap();
        chain.calls.send_buy += 1;
        chain.record_send(SentTx::Buy(order.clone()))
    }

    async fn send_withdraw(&self) -> Result<TxHash, GatewayError> {
        self.stall_if_requested().await;
        let mut chain = self.chain.lock().unwrap();
        chain.calls.send_withdraw += 1;
        chain.record_send(SentTx::Withdraw)
    }

    async fn send_register_name(&self, order: &NameOrder) -> Result<TxHash, GatewayError> {
        self.stall_if_requested().await;
        let mut chain = self.chain.lock().unwrap();
        chain.calls.send_register_name += 1;
        chain.record_send(SentTx::RegisterName(order.clone()))
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<TxReceipt, GatewayError> {
        let (hold, never) = {
            let mut chain = self.chain.lock().unwrap();
            chain.calls.confirm += 1;
            (chain.hold_confirmations, chain.never_confirm)
        };
        if never {
            std::future::pending::<()>().await;
        }
        if hold {
            self.release.notified().await;
        }
        let mut chain = self.chain.lock().unwrap();
        if let Some(reason) = chain.confirm_revert.take() {
            chain.unconfirmed.remove(&tx_hash);
            return Err(GatewayError::ChainRevert(reason));
        }
        Ok(chain.mine(tx_hash))
    }
}

impl EventSource for FakeGateway {
    async fn latest_block(&self) -> Result<u64, GatewayError> {
        self.read(|c| c.latest_block += 1, |chain| chain.head)
    }

    async fn round_events(
        &self,
        round_id: RoundId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, GatewayError> {
        self.read(
            |c| c.round_events += 1,
            |chain| {
                let mut records: Vec<EventRecord> = chain
                    .events
                    .iter()
                    .filter(|record| {
                        (from_block..=to_block).contains(&record.block_number)
                    })
                    .filter(|record| match &record.event {
                        GameEvent::Purchase { round_id: r, .. }
                        | GameEvent::RoundEnded { round_id: r, .. } => *r == round_id,
                        GameEvent::NewRound { round_id: r, .. } => *r == round_id + 1,
                    })
                    .cloned()
                    .collect();
                records.sort_by_key(EventRecord::position);
                records
            },
        )
    }
}

/// Clock pinned to a unix time at creation and advanced by tokio time, so
/// paused-time tests drive the round deadline.
#[derive(Clone, Copy, Debug)]
pub struct TestClock {
    base_unix: u64,
    base_instant: Instant,
}

impl TestClock {
    pub fn starting_at(unix: u64) -> Self {
        Self {
            base_unix: unix,
            base_instant: Instant::now(),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> u64 {
        self.base_unix + self.base_instant.elapsed().as_secs()
    }

    fn instant_at(&self, unix: u64) -> Instant {
        self.base_instant + Duration::from_secs(unix.saturating_sub(self.base_unix))
    }
}
