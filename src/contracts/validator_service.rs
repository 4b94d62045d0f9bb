//! SKALE ValidatorService bindings

use crate::error::TxError;
use crate::types::PendingCall;
use crate::wallet::Wallet;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IValidatorService {
        function registerValidator(
            string calldata name,
            string calldata description,
            uint256 feeRate,
            uint256 minimumDelegationAmount
        ) external returns (uint256 validatorId);

        /// Link a node address to the caller's validator; `signature` proves
        /// the node key agreed to it
        function linkNodeAddress(address nodeAddress, bytes calldata signature) external;

        function unlinkNodeAddress(address nodeAddress) external;

        function getValidatorId(address validatorAddress) external view returns (uint256);

        event ValidatorRegistered(uint256 validatorId);

        event NodeAddressWasAdded(uint256 validatorId, address nodeAddress);
    }
}

/// Register the sender as a validator
///
/// `fee_rate` is in per mille.
pub fn register_validator(
    validator_service: Address,
    name: impl Into<String>,
    description: impl Into<String>,
    fee_rate: U256,
    minimum_delegation_amount: U256,
) -> PendingCall {
    let call = IValidatorService::registerValidatorCall {
        name: name.into(),
        description: description.into(),
        feeRate: fee_rate,
        minimumDelegationAmount: minimum_delegation_amount,
    };
    PendingCall::from_call(validator_service, &call).with_operation("register_validator")
}

/// Link `node_address` to the sender's validator using a proof from [`node_address_proof`]
pub fn link_node_address(
    validator_service: Address,
    node_address: Address,
    proof: Bytes,
) -> PendingCall {
    let call = IValidatorService::linkNodeAddressCall {
        nodeAddress: node_address,
        signature: proof,
    };
    PendingCall::from_call(validator_service, &call).with_operation("link_node_address")
}

/// Hash the node wallet signs: keccak256 of the packed `uint256` validator id
pub fn node_address_hash(validator_id: U256) -> B256 {
    keccak256(validator_id.to_be_bytes::<32>())
}

/// Have the node wallet sign the validator id, producing the proof for `linkNodeAddress`
pub async fn node_address_proof<W: Wallet>(
    node_wallet: &W,
    validator_id: U256,
) -> Result<Bytes, TxError> {
    let signature = node_wallet.sign_hash(node_address_hash(validator_id)).await?;
    Ok(Bytes::from(signature.as_bytes().to_vec()))
}
