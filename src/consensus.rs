//! Duplex consensus calling from matched Watson/Crick piles

use crate::pileup::{Pile, NUCLEOTIDES};
use crate::reference::ReferenceSource;
use crate::{CallerConfig, DebugTrace, DuplexResult, VariantCall};
use std::cmp::Ordering;

/// Dominant signal type at one pile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantType {
    Snv,
    Insertion,
    Deletion,
    None,
}

/// Strongest allele of each kind seen at a pile, and the type they resolve to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PileSignal {
    pub variant_type: VariantType,
    pub snv_base: Option<u8>,
    pub snv_count: u32,
    pub insertion: Option<String>,
    pub insertion_count: u32,
    pub deletion_len: u32,
    pub deletion_count: u32,
}

impl PileSignal {
    /// Count supporting the allele of the resolved type
    pub fn allele_count(&self) -> u32 {
        match self.variant_type {
            VariantType::Snv => self.snv_count,
            VariantType::Insertion => self.insertion_count,
            VariantType::Deletion => self.deletion_count,
            VariantType::None => 0,
        }
    }
}

/// Pick the dominant base, deletion length and insertion sequence of a pile.
///
/// Ties keep the first key seen: `A,C,G,T` order, shortest deletion,
/// lexicographically smallest insertion.
pub fn classify(pile: &Pile) -> PileSignal {
    let mut snv_base = None;
    let mut snv_count = 0;
    for (idx, &base) in NUCLEOTIDES.iter().enumerate() {
        let count = pile.base_count(idx);
        if count > snv_count {
            snv_base = Some(base);
            snv_count = count;
        }
    }

    let mut deletion_len = 0;
    let mut deletion_count = 0;
    for (&len, counts) in &pile.deletions {
        if counts.total() > deletion_count {
            deletion_len = len;
            deletion_count = counts.total();
        }
    }

    let mut insertion = None;
    let mut insertion_count = 0;
    for (seq, counts) in &pile.insertions {
        if counts.total() > insertion_count {
            insertion = Some(seq.clone());
            insertion_count = counts.total();
        }
    }

    let variant_type = if snv_count > insertion_count && snv_count > deletion_count {
        VariantType::Snv
    } else if insertion_count > deletion_count {
        VariantType::Insertion
    } else if deletion_len > 0 {
        VariantType::Deletion
    } else {
        VariantType::None
    };

    PileSignal {
        variant_type,
        snv_base,
        snv_count,
        insertion,
        insertion_count,
        deletion_len,
        deletion_count,
    }
}

fn fraction(count: u32, depth: u32) -> f64 {
    if depth == 0 {
        0.0
    } else {
        count as f64 / depth as f64
    }
}

/// Walk two position-sorted pile lists and call every pair sharing a position
pub fn piles_to_calls(
    watson: &[Pile],
    crick: &[Pile],
    chrom: &str,
    family_id: &str,
    reference: &dyn ReferenceSource,
    config: &CallerConfig,
    trace: &DebugTrace,
) -> DuplexResult<Vec<VariantCall>> {
    let mut calls = Vec::new();
    let (mut w, mut c) = (0, 0);

    while w < watson.len() && c < crick.len() {
        match crick[c].pos.cmp(&watson[w].pos) {
            Ordering::Greater => w += 1,
            Ordering::Less => c += 1,
            Ordering::Equal => {
                if let Some(call) = call_pile_pair(
                    &watson[w], &crick[c], chrom, family_id, reference, config, trace,
                )? {
                    calls.push(call);
                }
                w += 1;
                c += 1;
            }
        }
    }

    Ok(calls)
}

/// Call a variant from one Watson pile and the Crick pile at the same position.
///
/// Returns `Ok(None)` when any agreement or threshold check fails; errors are
/// reserved for reference lookups.
pub fn call_pile_pair(
    watson: &Pile,
    crick: &Pile,
    chrom: &str,
    family_id: &str,
    reference: &dyn ReferenceSource,
    config: &CallerConfig,
    trace: &DebugTrace,
) -> DuplexResult<Option<VariantCall>> {
    let watson_depth = watson.depth(config.base_qual_penalty);
    let crick_depth = crick.depth(config.base_qual_penalty);

    let mut ws = classify(watson);
    let mut cs = classify(crick);
    trace.emit(|| format!("{}:{} watson: {:?}, crick: {:?}", chrom, watson.pos, watson, crick));

    // insertions sit on the base before the event, so they can lose a plain majority vote
    if fraction(ws.insertion_count, watson_depth) > config.min_af
        || fraction(cs.insertion_count, crick_depth) > config.min_af
    {
        ws.variant_type = VariantType::Insertion;
        cs.variant_type = VariantType::Insertion;
        trace.emit(|| "triggered insertion bias".to_string());
    }

    if ws.variant_type != cs.variant_type {
        trace.emit(|| {
            format!(
                "variant types do not match: {:?} vs {:?}",
                ws.variant_type, cs.variant_type
            )
        });
        return Ok(None);
    }

    let (watson_count, crick_count) = (ws.allele_count(), cs.allele_count());
    let watson_af = fraction(watson_count, watson_depth);
    let crick_af = fraction(crick_count, crick_depth);
    if watson_af < config.min_af || crick_af < config.min_af {
        trace.emit(|| {
            format!(
                "does not meet af requirements, watson: ({}/{}) = {:.3}, crick: ({}/{}) = {:.3}",
                watson_count, watson_depth, watson_af, crick_count, crick_depth, crick_af
            )
        });
        return Ok(None);
    }

    if watson_count < config.min_stranded_depth
        || crick_count < config.min_stranded_depth
        || watson_count + crick_count < config.min_total_depth
    {
        trace.emit(|| "does not meet minimum read depth".to_string());
        return Ok(None);
    }

    let pos = watson.pos;
    let (ref_allele, alt_allele, pos) = match ws.variant_type {
        VariantType::Snv => {
            let (Some(wb), Some(cb)) = (ws.snv_base, cs.snv_base) else {
                return Ok(None);
            };
            if wb != cb {
                trace.emit(|| {
                    format!("variant bases do not match: {} vs {}", wb as char, cb as char)
                });
                return Ok(None);
            }
            let ref_base = reference.base(chrom, pos as u64 - 1)?;
            if ref_base == wb {
                trace.emit(|| "alt base matches ref".to_string());
                return Ok(None);
            }
            ((ref_base as char).to_string(), (wb as char).to_string(), pos)
        }
        VariantType::Insertion => {
            let seq = match (&ws.insertion, &cs.insertion) {
                (Some(w), Some(c)) if w == c => w.clone(),
                _ => {
                    trace.emit(|| "inserted sequences do not match".to_string());
                    return Ok(None);
                }
            };
            let ref_base = (reference.base(chrom, pos as u64 - 1)? as char).to_string();
            let alt = format!("{}{}", ref_base, seq);
            (ref_base, alt, pos)
        }
        VariantType::Deletion => {
            if ws.deletion_len != cs.deletion_len {
                trace.emit(|| "deletion lengths do not match".to_string());
                return Ok(None);
            }
            if pos < 2 {
                trace.emit(|| "deletion has no anchor base".to_string());
                return Ok(None);
            }
            let anchor = pos as u64 - 2;
            let span = reference.fetch(chrom, anchor, anchor + 1 + ws.deletion_len as u64)?;
            let ref_allele = String::from_utf8_lossy(&span).into_owned();
            let alt = ref_allele[..1].to_string();
            (ref_allele, alt, pos - 1)
        }
        VariantType::None => return Ok(None),
    };

    Ok(Some(VariantCall {
        chrom: chrom.to_string(),
        pos,
        ref_allele,
        alt_allele,
        total_depth: watson.total_observations() + crick.total_observations(),
        watson_depth: watson_count,
        crick_depth: crick_count,
        family_id: family_id.to_string(),
    }))
}
