//! Wire Decoder. Turns an opaque multipart payload plus a content-type
//! header into a field-name → string-value map. No byte sequence is ever
//! dropped: invalid UTF-8 is recovered with the replacement character.

use std::collections::HashMap;

const BOUNDARY_SCAN_WINDOW: usize = 200;

#[derive(Debug, thiserror::Error)]
#[error("wire decoder found no recognizable multipart fields")]
pub struct WireError;

pub fn decode(body: &[u8], content_type: Option<&str>, default_boundary: &str) -> Result<HashMap<String, String>, WireError> {
    let declared_boundary = content_type
        .and_then(extract_boundary_param)
        .unwrap_or_else(|| default_boundary.to_owned());

    let mut fields = split_and_parse(body, &declared_boundary);

    if fields.len() < 2 {
        if let Some(sniffed) = sniff_boundary(body) {
            if sniffed != declared_boundary {
                fields = split_and_parse(body, &sniffed);
            }
        }
    }

    if fields.is_empty() {
        return Err(WireError);
    }

    Ok(fields)
}

fn extract_boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|segment| {
        let segment = segment.trim();
        segment
            .strip_prefix("boundary=")
            .map(|v| v.trim_matches('"').to_owned())
    })
}

/// Scans the first `BOUNDARY_SCAN_WINDOW` bytes for a `--token` delimiter
/// line when the declared boundary produced fewer than two parts.
fn sniff_boundary(body: &[u8]) -> Option<String> {
    let window = &body[..body.len().min(BOUNDARY_SCAN_WINDOW)];
    let text = String::from_utf8_lossy(window);
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("--") {
            if !rest.is_empty() && !rest.starts_with('-') {
                return Some(rest.trim_end_matches("--").to_owned());
            }
        }
    }
    None
}

fn split_and_parse(body: &[u8], boundary: &str) -> HashMap<String, String> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut fields = HashMap::new();

    for segment in split_on(body, &delimiter) {
        if segment.is_empty() || segment == b"--\r\n" || segment == b"--" {
            continue;
        }
        if let Some((name, value)) = parse_part(segment) {
            fields.insert(name, value);
        }
    }
    fields
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    if needle.is_empty() {
        return vec![haystack];
    }
    let mut parts = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = find_subslice(rest, needle) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + needle.len()..];
    }
    parts.push(rest);
    parts
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses a single multipart section: headers, blank line, body. Returns
/// `None` if no `name=` parameter is present on the `Content-Disposition`
/// header.
fn parse_part(segment: &[u8]) -> Option<(String, String)> {
    let separator = b"\r\n\r\n";
    let split_at = find_subslice(segment, separator)
        .map(|pos| (pos, separator.len()))
        .or_else(|| find_subslice(segment, b"\n\n").map(|pos| (pos, 2)));

    let (header_bytes, body_bytes) = match split_at {
        Some((pos, sep_len)) => (&segment[..pos], &segment[pos + sep_len..]),
        None => (segment, &b""[..]),
    };

    let headers = String::from_utf8_lossy(header_bytes);
    let name = headers.lines().find_map(|line| {
        if !line.to_ascii_lowercase().contains("content-disposition") {
            return None;
        }
        line.split(';').find_map(|segment| {
            let segment = segment.trim();
            segment.strip_prefix("name=").map(|v| v.trim_matches('"').to_owned())
        })
    })?;

    let body_bytes = trim_trailing_crlf(body_bytes);
    let value = String::from_utf8(body_bytes.to_vec()).unwrap_or_else(|_| String::from_utf8_lossy(body_bytes).into_owned());
    Some((name, value))
}

fn trim_trailing_crlf(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && (bytes[end - 1] == b'\n' || bytes[end - 1] == b'\r') {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(boundary: &str) -> Vec<u8> {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"to\"\r\n\r\nadvice@ops.example\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"from\"\r\n\r\nJohn Smith <js@client.example>\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"subject\"\r\n\r\nHoliday policy question\r\n\
             --{b}--\r\n",
            b = boundary
        )
        .into_bytes()
    }

    #[test]
    fn decodes_basic_fields() {
        let body = sample_payload("xYzZY");
        let fields = decode(&body, Some("multipart/form-data; boundary=xYzZY"), "xYzZY").unwrap();
        assert_eq!(fields.get("to").unwrap(), "advice@ops.example");
        assert_eq!(fields.get("from").unwrap(), "John Smith <js@client.example>");
        assert_eq!(fields.get("subject").unwrap(), "Holiday policy question");
    }

    #[test]
    fn falls_back_to_default_boundary_when_content_type_absent() {
        let body = sample_payload("xYzZY");
        let fields = decode(&body, None, "xYzZY").unwrap();
        assert_eq!(fields.get("to").unwrap(), "advice@ops.example");
    }

    #[test]
    fn empty_part_body_is_still_emitted() {
        let body = b"--xYzZY\r\nContent-Disposition: form-data; name=\"subject\"\r\n\r\n\r\n--xYzZY--\r\n".to_vec();
        let fields = decode(&body, Some("multipart/form-data; boundary=xYzZY"), "xYzZY").unwrap();
        assert_eq!(fields.get("subject").unwrap(), "");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let mut body = b"--xYzZY\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n".to_vec();
        body.extend_from_slice(&[0x68, 0x69, 0xff, 0xfe]);
        body.extend_from_slice(b"\r\n--xYzZY--\r\n");
        let fields = decode(&body, Some("multipart/form-data; boundary=xYzZY"), "xYzZY").unwrap();
        assert!(fields.get("text").unwrap().contains('\u{FFFD}'));
    }

    #[test]
    fn parts_without_name_are_ignored() {
        let body = b"--xYzZY\r\nContent-Disposition: form-data\r\n\r\nignored\r\n--xYzZY--\r\n".to_vec();
        let result = decode(&body, Some("multipart/form-data; boundary=xYzZY"), "xYzZY");
        assert!(result.is_err());
    }

    #[test]
    fn sniffs_boundary_when_declared_one_yields_too_few_parts() {
        let body = sample_payload("actualboundary123");
        let fields = decode(&body, Some("multipart/form-data; boundary=wrongvalue"), "wrongvalue").unwrap();
        assert_eq!(fields.get("to").unwrap(), "advice@ops.example");
    }

    #[test]
    fn empty_payload_fails() {
        let result = decode(&[], None, "xYzZY");
        assert!(result.is_err());
    }
}
