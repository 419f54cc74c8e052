use crate::error::Result;
use crate::samples::SampleLocator;

const ROW: usize = 16;

/// Hex + ASCII listing, addressed by absolute buffer offset.
pub fn hex_dump(bytes: &[u8], start_offset: u64) -> String {
    bytes
        .chunks(ROW)
        .enumerate()
        .map(|(row, chunk)| {
            let hexs = chunk.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ");
            let ascii: String = chunk
                .iter()
                .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
                .collect();
            format!("{:08x}  {:<47}  |{}|\n", start_offset + (row * ROW) as u64, hexs, ascii)
        })
        .collect()
}

/// Dump the first `max_len` coded bytes of one frame.
pub fn dump_frame(locator: &SampleLocator<'_>, frame: u32, max_len: usize) -> Result<String> {
    let (offset, _) = locator.sample_range(frame)?;
    let bytes = locator.sample_bytes(frame)?;
    Ok(hex_dump(&bytes[..bytes.len().min(max_len)], offset))
}
