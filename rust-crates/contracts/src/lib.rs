use ethers::{
    types::{
        H256,
        U256,
    },
    utils::{
        format_bytes32_string,
        parse_bytes32_string,
    },
};

pub mod artifacts;

/// Game contract surface consumed by the client: round and player getters,
/// the payable purchase/registration entry points and the round lifecycle
/// events.
pub mod fomoxd_types {
    use ethers::contract::abigen;

    abigen!(
        FoMoXD,
        r#"[
            function roundID_() external view returns (uint256)
            function round_(uint256) external view returns (uint256, uint256, uint256, bool, uint256, uint256, uint256, uint256, uint256, uint256, uint256, uint256)
            function pIDxAddr_(address) external view returns (uint256)
            function plyrRnds_(uint256, uint256) external view returns (uint256, uint256, uint256, uint256)
            function getPlayerVaults(uint256) external view returns (uint256, uint256, uint256)
            function iWantXPuffs(uint256) external view returns (uint256)
            function buyXaddr(address, uint256) external payable
            function buyXid(uint256, uint256) external payable
            function buyXname(bytes32, uint256) external payable
            function withdraw() external
            function registerNameXaddr(string, address, bool) external payable
            function registerNameXID(string, uint256, bool) external payable
            function registerNameXname(string, bytes32, bool) external payable
            function setOtherFomo(address) external
            function activate() external
            event Purchase(address indexed account, uint256 indexed roundId, uint256 team, uint256 eth, uint256 puffs)
            event RoundEnded(uint256 indexed roundId, uint256 winnerTeamId, uint256 winnerId)
            event NewRound(uint256 indexed roundId, uint256 startTime, uint256 endTime)
        ]"#
    );
}

pub mod nft_types {
    use ethers::contract::abigen;

    abigen!(
        FoMoERC721,
        r#"[
            function balanceOf(address) external view returns (uint256)
            function tokenOfOwnerByIndex(address, uint256) external view returns (uint256)
            function initialize(string, string, string) external
            function setRoundMysteryURI(uint256, string) external
            function setBaseURI(string) external
            function setFoMoGame(address) external
        ]"#
    );
}

pub mod player_book_types {
    use ethers::contract::abigen;

    abigen!(
        PlayerBook,
        r#"[
            function pIDxAddr_(address) external view returns (uint256)
            function plyr_(uint256) external view returns (address, bytes32, uint256, uint256)
            function plyrNameList_(uint256, uint256) external view returns (bytes32)
            function registrationFee_() external view returns (uint256)
            function addGame(address, string) external
        ]"#
    );
}

/// Topic value for an indexed `uint256 roundId` event parameter.
pub fn round_topic(round_id: u64) -> H256 {
    let mut bytes = [0u8; 32];
    U256::from(round_id).to_big_endian(&mut bytes);
    H256::from(bytes)
}

/// Encodes a player name the way the player book stores it.
pub fn name_to_bytes32(name: &str) -> anyhow::Result<[u8; 32]> {
    format_bytes32_string(name)
        .map_err(|e| anyhow::anyhow!("name {name:?} does not fit in bytes32: {e}"))
}

/// Decodes a stored bytes32 name, returning `None` for the empty slot.
pub fn bytes32_to_name(raw: &[u8; 32]) -> Option<String> {
    let decoded = parse_bytes32_string(raw).ok()?;
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.to_string())
    }
}
