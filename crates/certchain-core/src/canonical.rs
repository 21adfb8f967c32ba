//! Canonical encoding of flat string records.
//!
//! Certificate attributes and audit events are flat `string -> string`
//! mappings. They are encoded as a compact JSON object with keys sorted by
//! their UTF-8 bytes and values escaped the way RFC 8785 (JCS) escapes
//! strings, so the same mapping always produces the same bytes.

use std::collections::BTreeMap;

/// Encode a flat mapping into its canonical JSON object form.
///
/// `BTreeMap<String, _>` iterates in byte order, which is exactly the JCS key
/// order for the ASCII keys used here.
///
/// ```rust
/// use std::collections::BTreeMap;
/// use certchain_core::canonical::encode_fields;
///
/// let mut fields = BTreeMap::new();
/// fields.insert("b".to_string(), "2".to_string());
/// fields.insert("a".to_string(), "say \"hi\"".to_string());
/// assert_eq!(encode_fields(&fields), r#"{"a":"say \"hi\"","b":"2"}"#);
/// ```
pub fn encode_fields(fields: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(2 + fields.len() * 32);
    out.push('{');
    for (idx, (key, value)) in fields.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        push_json_string(&mut out, key);
        out.push(':');
        push_json_string(&mut out, value);
    }
    out.push('}');
    out
}

fn push_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
