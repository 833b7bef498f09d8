//! Solidity interfaces of the supported adapter contracts.

use alloy::primitives::{address, Address};
use alloy::sol;

/// Multicall3, deployed at the same address on every supported chain.
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    /// Per-feed state kept by multi-feed adapters.
    #[derive(Debug, PartialEq)]
    struct LastUpdateDetails {
        uint256 dataTimestamp;
        uint256 blockTimestamp;
        uint256 value;
    }

    /// Adapter updating any subset of its feeds independently.
    interface IMultiFeedAdapter {
        function getLastUpdateDetailsUnsafeForMany(bytes32[] calldata dataFeedsIds)
            external view returns (LastUpdateDetails[] memory detailsForFeeds);

        function getValuesForDataFeeds(bytes32[] memory requestedDataFeedIds)
            external view returns (uint256[] memory);

        function updateDataFeedsValuesPartial(bytes32[] memory dataFeedsIdsArray) external;

        function getUniqueSignersThreshold() external view returns (uint8);
    }

    /// Adapter updating all of its feeds together under one timestamp.
    interface IPriceFeedsAdapter {
        function getTimestampsFromLatestUpdate()
            external view returns (uint128 dataTimestamp, uint128 blockTimestamp);

        function getValuesForDataFeeds(bytes32[] memory requestedDataFeedIds)
            external view returns (uint256[] memory);

        function updateDataFeedsValues(uint256 proposedTimestamp) external;

        function getUniqueSignersThreshold() external view returns (uint8);
    }

    /// Batched calls executed in one `eth_call`, later calls seeing earlier writes.
    interface IMulticall3 {
        #[derive(Debug)]
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        #[derive(Debug)]
        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }
}
