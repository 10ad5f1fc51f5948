use super::{
    EventSource,
    GameGateway,
};
use crate::{
    error::GatewayError,
    types::{
        Address,
        AffiliateRoute,
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
use contracts::{
    bytes32_to_name,
    fomoxd_types::{
        FoMoXD,
        NewRoundFilter,
        PurchaseFilter,
        RoundEndedFilter,
    },
    name_to_bytes32,
    nft_types::FoMoERC721,
    player_book_types::PlayerBook,
    round_topic,
};
use ethers::{
    abi::{
        AbiError,
        Detokenize,
        Tokenize,
    },
    contract::{
        Contract,
        ContractError,
    },
    providers::Middleware,
    types::U64,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Register names across every game wired to the player book.
const REGISTER_IN_ALL_GAMES: bool = true;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameAddresses {
    pub game: Address,
    pub nft: Address,
    pub player_book: Address,
}

pub struct EthersGateway<M> {
    client: Arc<M>,
    game: FoMoXD<M>,
    nft: FoMoERC721<M>,
    book: PlayerBook<M>,
    account: Option<Address>,
    receipt_poll_interval: Duration,
}

impl<M: Middleware + 'static> EthersGateway<M> {
    pub fn new(client: Arc<M>, addresses: GameAddresses, account: Option<Address>) -> Self {
        Self {
            game: FoMoXD::new(addresses.game, client.clone()),
            nft: FoMoERC721::new(addresses.nft, client.clone()),
            book: PlayerBook::new(addresses.player_book, client.clone()),
            client,
            account,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    async fn view<T, D>(
        contract: &Contract<M>,
        name: &str,
        args: T,
    ) -> Result<D, GatewayError>
    where
        T: Tokenize + Send,
        D: Detokenize + Send + Sync,
    {
        let call = contract.method::<T, D>(name, args).map_err(abi_error)?;
        call.call().await.map_err(classify::<M>)
    }

    async fn transact<T>(
        &self,
        contract: &Contract<M>,
        name: &str,
        args: T,
        value: Option<U256>,
    ) -> Result<TxHash, GatewayError>
    where
        T: Tokenize + Send,
    {
        let mut call = contract.method::<T, ()>(name, args).map_err(abi_error)?;
        if let Some(value) = value {
            call = call.value(value);
        }
        if let Some(from) = self.account {
            call = call.from(from);
        }
        let pending = call.send().await.map_err(classify::<M>)?;
        let tx_hash = pending.tx_hash();
        debug!(%name, ?tx_hash, "transaction sent");
        Ok(tx_hash)
    }

    async fn book_player_id(&self, account: Address) -> Result<U256, GatewayError> {
        Self::view(&self.book, "pIDxAddr_", account).await
    }
}

fn abi_error(err: AbiError) -> GatewayError {
    GatewayError::Encoding(format!("abi mismatch: {err}"))
}

/// JSON-RPC revert responses already surface as `ContractError::Revert`.
fn classify<M: Middleware>(err: ContractError<M>) -> GatewayError {
    match err {
        ContractError::Revert(_) => GatewayError::ChainRevert(err.to_string()),
        ContractError::AbiError(_)
        | ContractError::DecodingError(_)
        | ContractError::DetokenizationError(_) => GatewayError::Encoding(err.to_string()),
        _ => GatewayError::NetworkTimeout(err.to_string()),
    }
}

fn provider_error(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::NetworkTimeout(err.to_string())
}

type RoundTuple = (
    U256,
    U256,
    U256,
    bool,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
);

impl<M: Middleware + 'static> GameGateway for EthersGateway<M> {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn current_round_id(&self) -> Result<RoundId, GatewayError> {
        let id: U256 = Self::view(&self.game, "roundID_", ()).await?;
        Ok(id.low_u64())
    }

    async fn round_info(&self, round_id: RoundId) -> Result<RoundInfo, GatewayError> {
        let (leader_id, leader_team, end, ended, start, puffs, eth, pot, mask, _, _, _): RoundTuple =
            Self::view(&self.game, "round_", U256::from(round_id)).await?;
        Ok(RoundInfo {
            round_id,
            start_time: start.low_u64(),
            end_time: end.low_u64(),
            ended,
            leader_id,
            leader_team: leader_team.low_u64(),
            pot,
            puffs,
            eth,
            mask,
        })
    }

    async fn player_id(&self, account: Address) -> Result<U256, GatewayError> {
        Self::view(&self.game, "pIDxAddr_", account).await
    }

    async fn player_round(
        &self,
        player_id: U256,
        round_id: RoundId,
    ) -> Result<PlayerRoundBalances, GatewayError> {
        let (eth, puffs, mask, _ico): (U256, U256, U256, U256) =
            Self::view(&self.game, "plyrRnds_", (player_id, U256::from(round_id))).await?;
        Ok(PlayerRoundBalances { eth, puffs, mask })
    }

    async fn player_vaults(&self, player_id: U256) -> Result<Vaults, GatewayError> {
        let (winning, general, affiliate): (U256, U256, U256) =
            Self::view(&self.game, "getPlayerVaults", player_id).await?;
        Ok(Vaults {
            winning,
            general,
            affiliate,
        })
    }

    async fn owned_nfts(&self, account: Address) -> Result<Vec<U256>, GatewayError> {
        let balance: U256 = Self::view(&self.nft, "balanceOf", account).await?;
        let mut tokens = Vec::new();
        for index in 0..balance.low_u64() {
            let token: U256 = Self::view(
                &self.nft,
                "tokenOfOwnerByIndex",
                (account, U256::from(index)),
            )
            .await?;
            tokens.push(token);
        }
        Ok(tokens)
    }

    async fn player_names(&self, account: Address) -> Result<Vec<String>, GatewayError> {
        let player_id = self.book_player_id(account).await?;
        if player_id.is_zero() {
            return Ok(Vec::new());
        }
        let (_addr, _name, _laff, count): (Address, [u8; 32], U256, U256) =
            Self::view(&self.book, "plyr_", player_id).await?;
        let mut names = Vec::new();
        for index in 1..=count.low_u64() {
            let raw: [u8; 32] = Self::view(
                &self.book,
                "plyrNameList_",
                (player_id, U256::from(index)),
            )
            .await?;
            if let Some(name) = bytes32_to_name(&raw) {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn puffs_to_eth(&self, puffs: U256) -> Result<U256, GatewayError> {
        Self::view(&self.game, "iWantXPuffs", puffs).await
    }

    async fn send_buy(&self, order: &BuyOrder) -> Result<TxHash, GatewayError> {
        let team = U256::from(order.team);
        let value = Some(order.eth);
        match &order.affiliate {
            AffiliateRoute::Address(address) => {
                self.transact(&self.game, "buyXaddr", (*address, team), value)
                    .await
            }
            AffiliateRoute::Id(id) => {
                self.transact(&self.game, "buyXid", (*id, team), value).await
            }
            AffiliateRoute::Name(name) => {
                let encoded = encode_name(name)?;
                self.transact(&self.game, "buyXname", (encoded, team), value)
                    .await
            }
        }
    }

    async fn send_withdraw(&self) -> Result<TxHash, GatewayError> {
        self.transact(&self.game, "withdraw", (), None).await
    }

    async fn send_register_name(&self, order: &NameOrder) -> Result<TxHash, GatewayError> {
        let fee: U256 = Self::view(&self.book, "registrationFee_", ()).await?;
        let name = order.name.clone();
        let value = Some(fee);
        match &order.affiliate {
            AffiliateRoute::Address(address) => {
                self.transact(
                    &self.game,
                    "registerNameXaddr",
                    (name, *address, REGISTER_IN_ALL_GAMES),
                    value,
                )
                .await
            }
            AffiliateRoute::Id(id) => {
                self.transact(
                    &self.game,
                    "registerNameXID",
                    (name, *id, REGISTER_IN_ALL_GAMES),
                    value,
                )
                .await
            }
            AffiliateRoute::Name(affiliate) => {
                let encoded = encode_name(affiliate)?;
                self.transact(
                    &self.game,
                    "registerNameXname",
                    (name, encoded, REGISTER_IN_ALL_GAMES),
                    value,
                )
                .await
            }
        }
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<TxReceipt, GatewayError> {
        loop {
            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status == Some(U64::zero()) {
                        return Err(GatewayError::ChainRevert(format!(
                            "transaction {tx_hash:?} reverted"
                        )));
                    }
                    return Ok(TxReceipt {
                        tx_hash,
                        block_number: receipt.block_number.map(|n| n.as_u64()),
                        gas_used: receipt.gas_used,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, ?tx_hash, "receipt lookup failed");
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

impl<M: Middleware + 'static> EventSource for EthersGateway<M> {
    async fn latest_block(&self) -> Result<u64, GatewayError> {
        let number = self
            .client
            .get_block_number()
            .await
            .map_err(provider_error)?;
        Ok(number.as_u64())
    }

    async fn round_events(
        &self,
        round_id: RoundId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, GatewayError> {
        let topic = round_topic(round_id);
        let mut records = Vec::new();

        let purchases = self
            .game
            .event::<PurchaseFilter>()
            .from_block(from_block)
            .to_block(to_block)
            .topic2(topic)
            .query_with_meta()
            .await
            .map_err(classify::<M>)?;
        for (purchase, meta) in purchases {
            records.push(EventRecord {
                event: GameEvent::Purchase {
                    account: purchase.account,
                    round_id: purchase.round_id.low_u64(),
                    team: purchase.team.low_u64(),
                    eth: purchase.eth,
                    puffs: purchase.puffs,
                },
                block_number: meta.block_number.as_u64(),
                log_index: meta.log_index.low_u64(),
                tx_hash: meta.transaction_hash,
            });
        }

        let endings = self
            .game
            .event::<RoundEndedFilter>()
            .from_block(from_block)
            .to_block(to_block)
            .topic1(topic)
            .query_with_meta()
            .await
            .map_err(classify::<M>)?;
        for (ended, meta) in endings {
            records.push(EventRecord {
                event: GameEvent::RoundEnded {
                    round_id: ended.round_id.low_u64(),
                    winner_team_id: ended.winner_team_id.low_u64(),
                    winner_id: ended.winner_id,
                },
                block_number: meta.block_number.as_u64(),
                log_index: meta.log_index.low_u64(),
                tx_hash: meta.transaction_hash,
            });
        }

        let openings = self
            .game
            .event::<NewRoundFilter>()
            .from_block(from_block)
            .to_block(to_block)
            .topic1(round_topic(round_id + 1))
            .query_with_meta()
            .await
            .map_err(classify::<M>)?;
        for (opened, meta) in openings {
            records.push(EventRecord {
                event: GameEvent::NewRound {
                    round_id: opened.round_id.low_u64(),
                    start_time: opened.start_time.low_u64(),
                    end_time: opened.end_time.low_u64(),
                },
                block_number: meta.block_number.as_u64(),
                log_index: meta.log_index.low_u64(),
                tx_hash: meta.transaction_hash,
            });
        }

        records.sort_by_key(EventRecord::position);
        Ok(records)
    }
}

fn encode_name(name: &str) -> Result<[u8; 32], GatewayError> {
    name_to_bytes32(name).map_err(|err| GatewayError::Encoding(err.to_string()))
}
