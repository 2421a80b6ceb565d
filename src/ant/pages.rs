use thiserror::Error;

/// An ANT+ broadcast payload as delivered by the transport, tagged with the
/// ID of the device it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPage {
    pub device_id: u16,
    pub data: [u8; 8],
}

/// Bit 7 of byte 0 flips every fourth message so receivers can tell legacy
/// sensors (which never flip it) from current ones. Irrelevant for decoding.
pub const PAGE_TOGGLE_MASK: u8 = 0x80;

/// Highest data page number in the HRM page family (0..=7: default page,
/// cumulative operating time, manufacturer/product info, battery, swim
/// intervals, capabilities).
pub const HRM_PAGE_FAMILY_MAX: u8 = 7;

/// Byte offset of the computed heart rate, common to every HRM page.
const COMPUTED_HR_OFFSET: usize = 7;

/// Why a received page was not accepted. Logged by the receiver, never
/// propagated.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PageRejection {
    #[error("unrecognized data page {0:#04x}")]
    UnknownPage(u8),
}

/// Extracts the instantaneous heart rate from an HRM data page.
///
/// All pages in the HRM family carry the computed heart rate in the last
/// byte; the page-specific bytes 1..=6 (beat time, beat count, background
/// data) are not relayed.
pub fn decode_hrm(data: &[u8; 8]) -> Result<u8, PageRejection> {
    let page_number = data[0] & !PAGE_TOGGLE_MASK;
    if page_number > HRM_PAGE_FAMILY_MAX {
        return Err(PageRejection::UnknownPage(data[0]));
    }
    Ok(data[COMPUTED_HR_OFFSET])
}
