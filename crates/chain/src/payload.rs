//! Signed package payload appended to update calldata.
//!
//! Layout, read backwards by the on-chain consumer:
//!
//! ```text
//! [package]* | package count (2) | metadata | metadata size (3) | marker (9)
//! package = [feed id (32) | value (32)]* | timestamp (6) | value size (4) | point count (3) | signature (65)
//! ```

use alloy::primitives::{Bytes, U256};
use anyhow::Result;
use relayer_api::SignedDataPackage;

use crate::types::feed_id_to_bytes32;

pub const REDSTONE_MARKER: [u8; 9] = [0x00, 0x00, 0x02, 0xed, 0x57, 0x01, 0x1e, 0x00, 0x00];

const TIMESTAMP_BS: usize = 6;
const DATA_POINT_VALUE_BS: usize = 32;
const VALUE_SIZE_BS: usize = 4;
const DATA_POINTS_COUNT_BS: usize = 3;
const SIGNATURE_BS: usize = 65;
const DATA_PACKAGES_COUNT_BS: usize = 2;
const METADATA_SIZE_BS: usize = 3;

/// Append the last `width` big-endian bytes of `value`.
fn push_be(out: &mut Vec<u8>, value: u64, width: usize) -> Result<()> {
    let bytes = value.to_be_bytes();
    if width < 8 && value >> (width * 8) != 0 {
        anyhow::bail!("Value {} does not fit in {} bytes", value, width);
    }
    out.extend_from_slice(&bytes[8 - width.min(8)..]);
    Ok(())
}

/// Scale a decimal observation to its on-chain integer representation.
pub fn scale_value(value: f64, decimals: u8) -> Result<U256> {
    let scaled = (value * 10f64.powi(decimals as i32)).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled >= u128::MAX as f64 {
        anyhow::bail!("Value {} cannot be represented with {} decimals", value, decimals);
    }
    Ok(U256::from(scaled as u128))
}

fn encode_package(out: &mut Vec<u8>, package: &SignedDataPackage) -> Result<()> {
    if package.signature.len() != SIGNATURE_BS {
        anyhow::bail!(
            "Package {} from {} has a {}-byte signature",
            package.data_package_id,
            package.signer_address,
            package.signature.len()
        );
    }

    for point in &package.data_points {
        out.extend_from_slice(feed_id_to_bytes32(&point.data_feed_id)?.as_slice());
        out.extend_from_slice(&scale_value(point.value, point.decimals())?.to_be_bytes::<32>());
    }
    push_be(out, package.timestamp_milliseconds, TIMESTAMP_BS)?;
    push_be(out, DATA_POINT_VALUE_BS as u64, VALUE_SIZE_BS)?;
    push_be(out, package.data_points.len() as u64, DATA_POINTS_COUNT_BS)?;
    out.extend_from_slice(&package.signature);
    Ok(())
}

/// Serialize `packages` with `metadata_timestamp_ms` as unsigned metadata.
pub fn encode_payload(packages: &[&SignedDataPackage], metadata_timestamp_ms: u64) -> Result<Bytes> {
    let mut out = Vec::new();
    for package in packages {
        encode_package(&mut out, package)?;
    }
    push_be(&mut out, packages.len() as u64, DATA_PACKAGES_COUNT_BS)?;

    let metadata = format!("{}#relayer", metadata_timestamp_ms);
    out.extend_from_slice(metadata.as_bytes());
    push_be(&mut out, metadata.len() as u64, METADATA_SIZE_BS)?;
    out.extend_from_slice(&REDSTONE_MARKER);

    Ok(Bytes::from(out))
}
