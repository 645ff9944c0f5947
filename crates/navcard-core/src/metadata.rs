//! Legacy database metadata record
//!
//! Older Garmin units look for a short `{cycle~serviceId}` record, e.g.
//! `{2303~12345678}`, in the last sector of a 16 MB card. The rest of the
//! sector is left erased.

use core::fmt;

use heapless::String;

use crate::error::{Error, Result};
use crate::geometry::CardGeometry;

/// Only cards of exactly this size carry the record
pub const METADATA_CARD_CAPACITY: u32 = 16 * 1024 * 1024;

const CYCLE_LEN: usize = 16;
const SERVICE_ID_LEN: usize = 32;

/// Parsed metadata record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMetadata {
    /// Database cycle, e.g. `2303`
    pub cycle: String<CYCLE_LEN>,
    /// Subscription service id
    pub service_id: String<SERVICE_ID_LEN>,
}

fn field<const N: usize>(s: &str) -> Result<String<N>> {
    let valid = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '{' | '}' | '~'));
    if !valid {
        return Err(Error::MetadataFormat);
    }
    let mut out = String::new();
    out.push_str(s).map_err(|_| Error::MetadataFormat)?;
    Ok(out)
}

impl DatabaseMetadata {
    /// Build a record from its parts
    pub fn new(cycle: &str, service_id: &str) -> Result<Self> {
        Ok(Self {
            cycle: field(cycle)?,
            service_id: field(service_id)?,
        })
    }

    /// Parse `{cycle~serviceId}`
    pub fn parse(text: &str) -> Result<Self> {
        let inner = text
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or(Error::MetadataFormat)?;
        let (cycle, service_id) = inner.split_once('~').ok_or(Error::MetadataFormat)?;
        Self::new(cycle, service_id)
    }

    /// Decode the raw metadata sector
    ///
    /// Returns `None` for an erased sector.
    pub fn decode(sector: &[u8]) -> Result<Option<Self>> {
        let end = sector
            .iter()
            .rposition(|&b| b != 0xFF)
            .map_or(0, |p| p + 1);
        if end == 0 {
            return Ok(None);
        }
        let text = core::str::from_utf8(&sector[..end]).map_err(|_| Error::MetadataFormat)?;
        Self::parse(text).map(Some)
    }

    /// Write the record into `sector`, filling the rest with `0xFF`
    pub fn encode_into(&self, sector: &mut [u8]) -> Result<()> {
        let mut text: String<{ CYCLE_LEN + SERVICE_ID_LEN + 3 }> = String::new();
        fmt::write(&mut text, format_args!("{}", self)).map_err(|_| Error::MetadataFormat)?;
        let bytes = text.as_bytes();
        if bytes.len() > sector.len() {
            return Err(Error::MetadataFormat);
        }
        sector.fill(0xFF);
        sector[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl fmt::Display for DatabaseMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}~{}}}", self.cycle, self.service_id)
    }
}

/// Logical offset of the metadata sector
///
/// # Errors
/// * `MetadataUnsupported` - the card is not a 16 MB card
pub fn metadata_offset(geometry: &CardGeometry) -> Result<u32> {
    if geometry.total_capacity != METADATA_CARD_CAPACITY {
        return Err(Error::MetadataUnsupported);
    }
    Ok(geometry.total_capacity - geometry.sector_size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{identify, CardId};
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn test_parse() {
        let m = DatabaseMetadata::parse("{2303~12345678}").unwrap();
        assert_eq!(m.cycle.as_str(), "2303");
        assert_eq!(m.service_id.as_str(), "12345678");
        assert_eq!(m.to_string(), "{2303~12345678}");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "2303~12345678",
            "{2303~12345678",
            "{230312345678}",
            "{~12345678}",
            "{2303~}",
            "{23 03~1}",
            "{2303~1~2}",
        ] {
            assert_eq!(DatabaseMetadata::parse(bad), Err(Error::MetadataFormat), "{}", bad);
        }
    }

    #[test]
    fn test_sector_round_trip() {
        let m = DatabaseMetadata::new("2303", "12345678").unwrap();
        let mut sector = vec![0u8; 0x10000];
        m.encode_into(&mut sector).unwrap();
        assert_eq!(&sector[..15], b"{2303~12345678}");
        assert!(sector[15..].iter().all(|&b| b == 0xFF));
        assert_eq!(DatabaseMetadata::decode(&sector), Ok(Some(m)));
    }

    #[test]
    fn test_erased_sector() {
        assert_eq!(DatabaseMetadata::decode(&[0xFF; 64]), Ok(None));
    }

    #[test]
    fn test_offset_only_on_16mb() {
        let waas = identify(CardId {
            manufacturer: 0x01,
            chip: 0x41,
            chips: 4,
        })
        .unwrap();
        assert_eq!(metadata_offset(&waas), Ok(0xFF_0000));

        let green = identify(CardId {
            manufacturer: 0x01,
            chip: 0xAD,
            chips: 4,
        })
        .unwrap();
        assert_eq!(metadata_offset(&green), Err(Error::MetadataUnsupported));
    }
}
