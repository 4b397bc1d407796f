//! Text renderings of atoms for logs, debugging and test failure messages.

use crate::atom::Atom;
use crate::value::Value;
use std::fmt::Write;

/// Space-separated lowercase hex.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classic 16-bytes-per-row dump with addresses starting at `base`.
pub fn hexdump(bytes: &[u8], base: u64) -> String {
    let mut out = String::new();
    for (i, row) in bytes.chunks(16).enumerate() {
        let ascii: String = row
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        let _ = writeln!(
            out,
            "{:08x}  {:<47}  {}",
            base + (i * 16) as u64,
            hex(row),
            ascii
        );
    }
    out
}

fn preview(bytes: &[u8]) -> String {
    const LIMIT: usize = 16;
    if bytes.len() > LIMIT {
        format!("{} ...", hex(&bytes[..LIMIT]))
    } else {
        hex(bytes)
    }
}

fn scalar(value: &Value, width: u64) -> Option<String> {
    let digits = (width * 2).max(2) as usize;
    match value {
        Value::Unsigned(x) => Some(format!("{x:#0w$x} ({x})", w = digits + 2)),
        Value::Signed(x) => Some(format!("{x}")),
        Value::Bool(b) => Some(b.to_string()),
        Value::Float(x) => Some(format!("{x}")),
        Value::Text(s) => Some(format!("{s:?}")),
        Value::Bytes(b) => Some(format!("[{}]", preview(b))),
        Value::Bits(b) => Some(b.to_string()),
        Value::Struct(_) | Value::List(_) => None,
    }
}

/// One line: offset, name, type and a short rendering of the value.
pub fn summary(atom: &Atom<'_>) -> String {
    let name = if atom.name().is_empty() { "<bits>" } else { atom.name() };
    let head = format!("[{:#x}] {} {}", atom.offset(), name, atom.type_name());
    if atom.is_null() {
        return format!("{head} <null>");
    }
    if !atom.is_initialized() {
        return format!("{head} <uninitialized>");
    }
    if atom.decode_failed() {
        return format!("{head} [{}] <undecodable>", preview(&atom.serialize()));
    }
    if !atom.is_empty() || atom.referent().is_some() {
        return format!("{head} ({} bytes, {} members)", atom.size(), atom.len());
    }
    match atom.value() {
        Ok(v) => match scalar(&v, atom.size()) {
            Some(s) => format!("{head} {s}"),
            None => format!("{head} ({} bytes)", atom.size()),
        },
        Err(e) => format!("{head} <{e}>"),
    }
}

/// Indented tree of `atom` and its descendants, one [`summary`] per line.
pub fn dump(atom: &Atom<'_>) -> String {
    let mut out = String::new();
    let depth0 = crate::walk::ancestors(atom).count();
    for a in atom.walk() {
        let depth = crate::walk::ancestors(&a).count() - depth0;
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), summary(&a));
    }
    out
}
