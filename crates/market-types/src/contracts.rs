//! Solidity bindings for the token standards and exchange the pipeline reads.

use alloy::primitives::{address, Address};
use alloy::sol;

/// Multicall3, deployed at this address on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
	/// Fungible token.
	#[sol(rpc)]
	interface IERC20 {
		event Transfer(address indexed from, address indexed to, uint256 value);
		event Approval(address indexed owner, address indexed spender, uint256 value);

		function balanceOf(address owner) external view returns (uint256);
		function allowance(address owner, address spender) external view returns (uint256);
		function approve(address spender, uint256 amount) external returns (bool);
	}
}

sol! {
	/// Non-fungible token.
	#[sol(rpc)]
	interface IERC721 {
		event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

		function ownerOf(uint256 tokenId) external view returns (address);
		function isApprovedForAll(address owner, address operator) external view returns (bool);
		function setApprovalForAll(address operator, bool approved) external;
	}
}

sol! {
	/// Multi-token.
	#[sol(rpc)]
	interface IERC1155 {
		event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
		event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);

		function balanceOf(address account, uint256 id) external view returns (uint256);
		function isApprovedForAll(address account, address operator) external view returns (bool);
		function setApprovalForAll(address operator, bool approved) external;
	}
}

sol! {
	/// Order status view of the exchange contract.
	#[sol(rpc)]
	interface IExchange {
		function getOrderStatus(bytes32 orderHash) external view returns (bool isValidated, bool isCancelled, uint256 totalFilled, uint256 totalSize);
	}
}

sol! {
	/// Batched static calls.
	#[sol(rpc, all_derives)]
	interface IMulticall3 {
		struct Call3 {
			address target;
			bool allowFailure;
			bytes callData;
		}

		struct Call3Result {
			bool success;
			bytes returnData;
		}

		function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);
		function getEthBalance(address addr) external view returns (uint256 balance);
	}
}
