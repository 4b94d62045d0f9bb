//! Contract bindings and `PendingCall` builders for SKALE manager contracts

pub mod token;
pub mod validator_service;

pub use token::IERC20;
pub use validator_service::IValidatorService;
