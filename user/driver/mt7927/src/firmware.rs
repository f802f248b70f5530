//! MT7927 Firmware Images
//!
//! Parsed views over the two blobs the MCU needs, ROM patch first:
//! - `WIFI_MT7927_patch_mcu_1_1_hdr.bin` - ROM patch (big-endian header)
//! - `WIFI_RAM_CODE_MT7927_1_1.bin` - RAM code (little-endian trailer)
//!
//! Only the fields needed to chunk the data are interpreted. Both parsers
//! check every offset against the blob before slicing.

use alloc::vec::Vec;
use core::ops::Range;

use crate::error::FirmwareError;

/// Patch header size
pub const PATCH_HDR_SIZE: usize = 96;
/// Patch section descriptor size
pub const PATCH_SEC_SIZE: usize = 64;
/// RAM trailer size
pub const RAM_TRAILER_SIZE: usize = 36;
/// RAM region descriptor size
pub const RAM_REGION_SIZE: usize = 72;

/// One download region: where it goes, and where its bytes are in the blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub target_addr: u32,
    pub len: u32,
    pub range: Range<usize>,
}

#[inline]
fn be32(b: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

#[inline]
fn le32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

/// NUL-padded ASCII field as text
fn ascii(field: &[u8]) -> &str {
    let end = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..end]).unwrap_or("?")
}

fn section_range(offset: usize, len: u32, limit: usize) -> Result<Range<usize>, FirmwareError> {
    let end = offset
        .checked_add(len as usize)
        .ok_or(FirmwareError::SectionOutOfBounds)?;
    if end > limit {
        return Err(FirmwareError::SectionOutOfBounds);
    }
    Ok(offset..end)
}

// ============================================================================
// ROM patch
// ============================================================================

/// ROM patch image
///
/// ```text
/// 0x00 build_date[16]  0x10 platform[4]  0x14 hw_sw_ver  0x18 patch_ver
/// 0x1c checksum u16    0x1e rsv u16
/// 0x20 desc { patch_ver, subsys, feature, n_region, crc, rsv[11] }
/// 0x60 n_region x { type, offs, size, addr, len, sec_key_idx, align_len, rsv[9] }
/// ```
#[derive(Debug, Clone)]
pub struct PatchImage<'a> {
    blob: &'a [u8],
    pub hw_sw_ver: u32,
    pub patch_ver: u32,
    pub n_region: u32,
    section: Section,
}

impl<'a> PatchImage<'a> {
    pub fn parse(blob: &'a [u8]) -> Result<Self, FirmwareError> {
        if blob.len() < PATCH_HDR_SIZE {
            return Err(FirmwareError::Truncated);
        }

        let n_region = be32(blob, 0x2c);
        if n_region == 0 {
            return Err(FirmwareError::Empty);
        }
        let table_end = (n_region as usize)
            .checked_mul(PATCH_SEC_SIZE)
            .and_then(|t| t.checked_add(PATCH_HDR_SIZE))
            .ok_or(FirmwareError::BadRegionCount)?;
        if table_end > blob.len() {
            return Err(FirmwareError::BadRegionCount);
        }

        // only the first section is downloaded
        let sec = PATCH_HDR_SIZE;
        let offs = be32(blob, sec + 0x4) as usize;
        let target_addr = be32(blob, sec + 0xc);
        let len = be32(blob, sec + 0x10);
        if offs < table_end {
            return Err(FirmwareError::SectionOutOfBounds);
        }
        let range = section_range(offs, len, blob.len())?;

        Ok(Self {
            blob,
            hw_sw_ver: be32(blob, 0x14),
            patch_ver: be32(blob, 0x18),
            n_region,
            section: Section { target_addr, len, range },
        })
    }

    pub fn build_date(&self) -> &'a str {
        ascii(&self.blob[..16])
    }

    pub fn platform(&self) -> &'a str {
        ascii(&self.blob[16..20])
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn data(&self) -> &'a [u8] {
        &self.blob[self.section.range.clone()]
    }
}

// ============================================================================
// RAM code
// ============================================================================

/// RAM code image
///
/// Section bytes are packed from offset 0 in region order. The region
/// table and trailer sit at the end:
///
/// ```text
/// [ sec0 | sec1 | ... | region[n_region] (72 B each) | trailer (36 B) ]
/// trailer: chip_id, eco_code, n_region, format_ver, format_flag, rsv[2],
///          fw_ver[10], build_date[15], crc
/// region:  decomp_crc, decomp_len, decomp_blk_sz, rsv[4], addr, len,
///          feature_set, type, rsv[14], name[32]
/// ```
#[derive(Debug, Clone)]
pub struct RamImage<'a> {
    blob: &'a [u8],
    trailer: usize,
    pub chip_id: u8,
    pub eco_code: u8,
    pub format_ver: u8,
    sections: Vec<Section>,
}

impl<'a> RamImage<'a> {
    pub fn parse(blob: &'a [u8]) -> Result<Self, FirmwareError> {
        if blob.len() < RAM_TRAILER_SIZE {
            return Err(FirmwareError::Truncated);
        }
        let t = blob.len() - RAM_TRAILER_SIZE;
        let n_region = blob[t + 2] as usize;
        if n_region == 0 {
            return Err(FirmwareError::Empty);
        }
        let table = n_region * RAM_REGION_SIZE;
        if table > t {
            return Err(FirmwareError::BadRegionCount);
        }
        let table_start = t - table;

        let mut sections = Vec::with_capacity(n_region);
        let mut offset = 0usize;
        for i in 0..n_region {
            let r = table_start + i * RAM_REGION_SIZE;
            let target_addr = le32(blob, r + 0x10);
            let len = le32(blob, r + 0x14);
            // section bytes may not run into the region table
            let range = section_range(offset, len, table_start)?;
            offset = range.end;
            sections.push(Section { target_addr, len, range });
        }

        Ok(Self {
            blob,
            trailer: t,
            chip_id: blob[t],
            eco_code: blob[t + 1],
            format_ver: blob[t + 3],
            sections,
        })
    }

    pub fn fw_ver(&self) -> &'a str {
        ascii(&self.blob[self.trailer + 7..self.trailer + 17])
    }

    pub fn build_date(&self) -> &'a str {
        ascii(&self.blob[self.trailer + 17..self.trailer + 32])
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn data(&self, section: &Section) -> &'a [u8] {
        &self.blob[section.range.clone()]
    }
}
