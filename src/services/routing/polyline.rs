//! Encoded polyline decoding (the only decoder in the crate)

use anyhow::Result;

/// Decode an encoded polyline into GeoJSON `[lng, lat]` pairs.
/// Precision is 6 decimal places for Valhalla (vs 5 for Google).
pub fn decode_polyline(encoded: &str, precision: u32) -> Result<Vec<[f64; 2]>> {
    let factor = 10_f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut coordinates = Vec::new();
    let mut lat = 0i64;
    let mut lng = 0i64;
    let mut i = 0;

    while i < bytes.len() {
        lat += next_delta(bytes, &mut i)?;
        lng += next_delta(bytes, &mut i)?;
        coordinates.push([lng as f64 / factor, lat as f64 / factor]);
    }

    Ok(coordinates)
}

/// Read one zig-zag encoded varint starting at `*i`
fn next_delta(bytes: &[u8], i: &mut usize) -> Result<i64> {
    let mut shift = 0;
    let mut result = 0i64;
    loop {
        let Some(&byte) = bytes.get(*i) else {
            anyhow::bail!("Invalid polyline encoding");
        };
        let chunk = byte as i64 - 63;
        if !(0..64).contains(&chunk) || shift > 60 {
            anyhow::bail!("Invalid polyline encoding");
        }
        *i += 1;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}
