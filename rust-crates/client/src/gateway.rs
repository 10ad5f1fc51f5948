use crate::{
    error::GatewayError,
    types::{
        Address,
        BuyOrder,
        EventRecord,
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
use std::future::Future;

pub mod ethers_gateway;

pub use ethers_gateway::{
    EthersGateway,
    GameAddresses,
};

/// Typed access to the game, NFT and player-book contracts for one account.
pub trait GameGateway: Send + Sync + 'static {
    /// Account the gateway signs for, if any.
    fn account(&self) -> Option<Address>;

    fn current_round_id(&self) -> impl Future<Output = Result<RoundId, GatewayError>> + Send;

    fn round_info(
        &self,
        round_id: RoundId,
    ) -> impl Future<Output = Result<RoundInfo, GatewayError>> + Send;

    /// Game-side player id; zero for an unknown account.
    fn player_id(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<U256, GatewayError>> + Send;

    fn player_round(
        &self,
        player_id: U256,
        round_id: RoundId,
    ) -> impl Future<Output = Result<PlayerRoundBalances, GatewayError>> + Send;

    fn player_vaults(
        &self,
        player_id: U256,
    ) -> impl Future<Output = Result<Vaults, GatewayError>> + Send;

    fn owned_nfts(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<Vec<U256>, GatewayError>> + Send;

    /// Names registered in the player book, oldest first.
    fn player_names(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<Vec<String>, GatewayError>> + Send;

    /// Current ETH price for `puffs` puffs. The rate is owned by the contract.
    fn puffs_to_eth(
        &self,
        puffs: U256,
    ) -> impl Future<Output = Result<U256, GatewayError>> + Send;

    fn send_buy(
        &self,
        order: &BuyOrder,
    ) -> impl Future<Output = Result<TxHash, GatewayError>> + Send;

    fn send_withdraw(&self) -> impl Future<Output = Result<TxHash, GatewayError>> + Send;

    fn send_register_name(
        &self,
        order: &NameOrder,
    ) -> impl Future<Output = Result<TxHash, GatewayError>> + Send;

    /// Resolves once the transaction is mined; a reverted receipt is `ChainRevert`.
    fn confirm(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<TxReceipt, GatewayError>> + Send;
}

/// Block-range access to the game's event log.
pub trait EventSource: Send + Sync + 'static {
    fn latest_block(&self) -> impl Future<Output = Result<u64, GatewayError>> + Send;

    /// Purchase and RoundEnded events of `round_id` and the NewRound event
    /// opening `round_id + 1`, ordered by position.
    fn round_events(
        &self,
        round_id: RoundId,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<EventRecord>, GatewayError>> + Send;
}
