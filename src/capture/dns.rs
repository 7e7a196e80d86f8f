//! Minimal DNS wire-format reader: just enough to pull the queried name out
//! of a UDP payload. Anything beyond the first question is ignored.

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 253;

/// Extract the first question name from a raw DNS message, or `None` if the
/// payload is not a parseable DNS message with at least one question.
///
/// Label compression never appears in the question section of a well-formed
/// message, so a compression pointer aborts the parse.
pub fn question_name(payload: &[u8]) -> Option<String> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return None;
    }

    let mut pos = HEADER_LEN;
    let mut name = String::new();
    loop {
        let len = *payload.get(pos)? as usize;
        if len == 0 {
            break;
        }
        if len & 0xC0 != 0 {
            return None;
        }
        pos += 1;
        let label = payload.get(pos..pos + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
        if name.len() > MAX_NAME_LEN {
            return None;
        }
        pos += len;
    }

    if name.is_empty() { None } else { Some(name) }
}
