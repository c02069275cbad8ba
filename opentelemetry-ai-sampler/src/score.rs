use opentelemetry::trace::TraceId;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Inputs shorter than this are repeated until they reach it before hashing.
const MIN_HASH_INPUT_LEN: usize = 8;

/// Returns the sampling score of a trace, a value in `[0, 100]`.
///
/// The score is computed from the lowercase hex rendering of the trace id
/// with the hash every Application Insights SDK uses, so a trace is sampled
/// the same way by all of its participants regardless of which SDK they run.
///
/// A span of the trace is sampled at percentage `p` iff `score < p`.
pub fn sampling_score(trace_id: TraceId) -> f64 {
    let bytes = trace_id.to_bytes();
    let hex = bytes
        .iter()
        .flat_map(|b| [HEX_DIGITS[(b >> 4) as usize], HEX_DIGITS[(b & 0x0f) as usize]])
        .map(u16::from);

    // 32 hex digits never need padding.
    score_from_hash(hash_code_units(hex))
}

/// Returns the sampling score of an arbitrary operation id.
///
/// Use this for ids that are not W3C trace ids, such as legacy request ids
/// produced by older SDKs. An empty id scores `0`.
pub fn sampling_score_for_id(id: &str) -> f64 {
    if id.is_empty() {
        return 0.0;
    }

    let len = id.encode_utf16().count();
    let repeat = MIN_HASH_INPUT_LEN.div_ceil(len);
    let units = std::iter::repeat(id)
        .take(repeat)
        .flat_map(str::encode_utf16);

    score_from_hash(hash_code_units(units))
}

fn hash_code_units(units: impl Iterator<Item = u16>) -> i32 {
    let hash = units.fold(5381i32, |hash, unit| {
        (hash << 5)
            .wrapping_add(hash)
            .wrapping_add(i32::from(unit))
    });

    if hash == i32::MIN {
        i32::MAX
    } else {
        hash.abs()
    }
}

fn score_from_hash(hash: i32) -> f64 {
    f64::from(hash) / f64::from(i32::MAX) * 100.0
}
