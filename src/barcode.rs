//! Read family and strand decoding from barcode annotation tags

use crate::Strand;
use rust_htslib::bam::record::{Aux, Record};

/// Aux tag holding the read family identifier
pub const FAMILY_TAG: &[u8; 2] = b"RF";
/// Aux tag holding the strand of the read within its family (`W` or `C`)
pub const STRAND_TAG: &[u8; 2] = b"RS";
/// Aux tag marking a read with supplementary alignments
pub const SUPPLEMENTARY_TAG: &[u8; 2] = b"SA";

/// Read family identifier, if the read carries one
pub fn family_id(record: &Record) -> Option<String> {
    match record.aux(FAMILY_TAG) {
        Ok(Aux::String(id)) => Some(id.to_string()),
        Ok(Aux::I32(id)) => Some(id.to_string()),
        Ok(Aux::U32(id)) => Some(id.to_string()),
        Ok(Aux::I16(id)) => Some(id.to_string()),
        Ok(Aux::U16(id)) => Some(id.to_string()),
        Ok(Aux::I8(id)) => Some(id.to_string()),
        Ok(Aux::U8(id)) => Some(id.to_string()),
        _ => None,
    }
}

/// Strand of the read within its family
pub fn strand(record: &Record) -> Option<Strand> {
    match record.aux(STRAND_TAG) {
        Ok(Aux::Char(c)) => Strand::from_tag(c),
        Ok(Aux::String(s)) => s.bytes().next().and_then(Strand::from_tag),
        _ => None,
    }
}

/// Decode both barcode fields at once
pub fn family_and_strand(record: &Record) -> Option<(String, Strand)> {
    Some((family_id(record)?, strand(record)?))
}

/// Whether the read is annotated with supplementary alignments
pub fn has_supplementary_alignment(record: &Record) -> bool {
    record.aux(SUPPLEMENTARY_TAG).is_ok()
}
