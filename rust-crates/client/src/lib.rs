pub mod error;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod player;
pub mod round;
pub mod session;
pub mod settings;
pub mod types;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{
    FailureKind,
    GatewayError,
};
pub use session::{
    GameView,
    Session,
    SessionHandle,
};
