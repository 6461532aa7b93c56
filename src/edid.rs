//! EDID (Extended Display Identification Data) parsing.
//!
//! Only the handful of fields the rest of the crate cares about are extracted: the
//! manufacturer id, product code, and serial number baked into the first 18 bytes of the
//! 128-byte base EDID block.

use crate::types::EdidData;

const MAGIC_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
const MIN_LENGTH: usize = 128;

impl EdidData {
    /// Parses the leading 128-byte EDID block out of `data`. Fails if the blob is too
    /// short, the magic header doesn't match, any of the three 5-bit PnP ID letters packed
    /// into bytes 8-9 falls outside 1..=26 ('A'..='Z'), or the whole-block checksum doesn't
    /// sum to 0 mod 256.
    pub fn parse(data: &[u8]) -> Option<EdidData> {
        if data.len() < MIN_LENGTH {
            return None;
        }
        let block = &data[..MIN_LENGTH];

        if block[0..8] != MAGIC_HEADER {
            return None;
        }

        let checksum: u8 = block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if checksum != 0 {
            return None;
        }

        let manufacturer_id = decode_manufacturer_id(block[8], block[9])?;
        let product_code = format!("{:02X}{:02X}", block[11], block[10]);
        let serial_number = u32::from_le_bytes([block[12], block[13], block[14], block[15]]);

        Some(EdidData {
            manufacturer_id,
            product_code,
            serial_number,
        })
    }

    /// Builds an `EdidData` from the `edidManufactureId`/`edidProductCodeId` fields Windows
    /// hands back directly on `DISPLAYCONFIG_TARGET_DEVICE_NAME`, bypassing the full 128-byte
    /// blob entirely. Windows exposes these already in the EDID's native per-field byte
    /// order (manufacturer id big-endian, product code little-endian), so no further
    /// byte-swapping is needed. The serial number isn't part of this API surface and is
    /// reported as 0.
    pub fn from_windows_ids(manufacturer_id: u16, product_code_id: u16) -> Option<EdidData> {
        let manufacturer_id = decode_manufacturer_id((manufacturer_id >> 8) as u8, (manufacturer_id & 0xFF) as u8)?;
        Some(EdidData {
            manufacturer_id,
            product_code: format!("{:04X}", product_code_id),
            serial_number: 0,
        })
    }
}

/// Decodes the 3-letter PnP manufacturer id packed as 5-bit letters across bytes 8-9,
/// big-endian: bits [14:10]=letter1, [9:5]=letter2, [4:0]=letter3, each 1-indexed from 'A'
/// (1='A', 26='Z'). Fails if any letter's 5-bit value is 0 or above 26.
fn decode_manufacturer_id(byte8: u8, byte9: u8) -> Option<String> {
    let packed = ((byte8 as u16) << 8) | byte9 as u16;
    let letter = |shift: u16| -> Option<char> {
        let value = (packed >> shift) & 0x1F;
        if value == 0 || value > 26 {
            None
        } else {
            Some((b'A' - 1 + value as u8) as char)
        }
    };
    Some([letter(10)?, letter(5)?, letter(0)?].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal valid 128-byte EDID block encoding manufacturer "LOL", product
    /// code "1337", and serial number 1234, with a correct checksum.
    fn known_good_edid() -> Vec<u8> {
        let mut block = vec![0u8; 128];
        block[0..8].copy_from_slice(&MAGIC_HEADER);

        // "LOL" -> L=12, O=15, L=12 (1-indexed from 'A').
        let packed: u16 = (12u16 << 10) | (15u16 << 5) | 12u16;
        block[8] = (packed >> 8) as u8;
        block[9] = (packed & 0xFF) as u8;
        // product_code "1337" -> bytes are little-endian-swapped hex: product_code =
        // format!("{:02X}{:02X}", block[11], block[10]) == "1337" => block[11]=0x13, block[10]=0x37
        block[10] = 0x37;
        block[11] = 0x13;

        let serial_number: u32 = 1234;
        block[12..16].copy_from_slice(&serial_number.to_le_bytes());

        let sum: u8 = block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        block[127] = block[127].wrapping_sub(sum);
        block
    }

    #[test]
    fn parses_known_good_edid() {
        let block = known_good_edid();
        let parsed = EdidData::parse(&block).expect("should parse");
        assert_eq!(parsed.manufacturer_id, "LOL");
        assert_eq!(parsed.product_code, "1337");
        assert_eq!(parsed.serial_number, 1234);
    }

    #[test]
    fn fails_on_corrupted_checksum() {
        let mut block = known_good_edid();
        block[16] = block[16].wrapping_add(1);
        assert!(EdidData::parse(&block).is_none());

        let mut block = known_good_edid();
        block[16] = block[16].wrapping_sub(1);
        assert!(EdidData::parse(&block).is_none());
    }

    #[test]
    fn fails_on_bad_magic_header() {
        let mut block = known_good_edid();
        block[0] = 0x01;
        assert!(EdidData::parse(&block).is_none());
    }

    /// Mirrors `original_source`'s `InvalidManufacturerId/BelowLimit` vector: a packed
    /// value whose first letter decodes to 0, below 'A'.
    #[test]
    fn fails_on_manufacturer_letter_below_range() {
        let mut block = known_good_edid();
        block[8] = 0x00;
        block[9] = 0x6D;
        let sum: u8 = block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        block[127] = block[127].wrapping_sub(sum);
        assert!(EdidData::parse(&block).is_none());
    }

    /// Mirrors `original_source`'s `InvalidManufacturerId/AboveLimit` vector: a packed
    /// value whose first letter decodes to 27, above 'Z'.
    #[test]
    fn fails_on_manufacturer_letter_above_range() {
        let mut block = known_good_edid();
        block[8] = 0x6D;
        block[9] = 0x00;
        let sum: u8 = block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        block[127] = block[127].wrapping_sub(sum);
        assert!(EdidData::parse(&block).is_none());
    }

    #[test]
    fn fails_on_short_input() {
        assert!(EdidData::parse(&[0u8; 64]).is_none());
    }
}
