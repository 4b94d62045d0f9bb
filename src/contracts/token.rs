//! ERC20 token bindings and call builders

use crate::error::TxError;
use crate::rpc::{CallFailure, CallRequest, ChainRpc};
use crate::types::PendingCall;
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    /// Standard ERC20 interface
    #[sol(rpc)]
    interface IERC20 {
        function name() external view returns (string memory);

        function symbol() external view returns (string memory);

        function decimals() external view returns (uint8);

        function totalSupply() external view returns (uint256);

        /// Returns the balance of an account
        function balanceOf(address account) external view returns (uint256);

        /// Returns the allowance of a spender
        function allowance(address owner, address spender) external view returns (uint256);

        /// Approves a spender to spend tokens
        function approve(address spender, uint256 amount) external returns (bool);

        /// Transfers tokens to a recipient
        function transfer(address to, uint256 amount) external returns (bool);

        function transferFrom(address from, address to, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);

        event Approval(address indexed owner, address indexed spender, uint256 value);
    }
}

/// Transfer `amount` of `token` to `to`
pub fn transfer(token: Address, to: Address, amount: U256) -> PendingCall {
    PendingCall::from_call(token, &IERC20::transferCall { to, amount }).with_operation("transfer")
}

/// Approve `spender` for `amount` of `token`
pub fn approve(token: Address, spender: Address, amount: U256) -> PendingCall {
    PendingCall::from_call(token, &IERC20::approveCall { spender, amount })
        .with_operation("approve")
}

/// Read the token balance of `account`
pub async fn balance_of<R: ChainRpc>(
    rpc: &R,
    token: Address,
    account: Address,
) -> Result<U256, TxError> {
    let request = CallRequest {
        from: Address::ZERO,
        to: token,
        data: IERC20::balanceOfCall { account }.abi_encode().into(),
        value: U256::ZERO,
        gas: None,
    };

    let result = rpc.call(&request).await.map_err(|e| match e {
        CallFailure::Revert { reason } => TxError::rpc("balanceOf reverted", reason),
        CallFailure::Node(error) => TxError::rpc("Failed to call balanceOf", error),
    })?;

    IERC20::balanceOfCall::abi_decode_returns(&result)
        .map_err(|e| TxError::rpc("Failed to decode balance", e))
}
