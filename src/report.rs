//! Human-readable rendering of a reconstructed record table.

use std::io;

use crate::eeprom::{RecordEntry, RecordMap};

/// Payload bytes per hex row.
const ROW: usize = 16;

/// Render the whole table: one summary line per id, followed by hex+ASCII
/// rows of the payload for every record that was actually written.
pub fn render(records: &RecordMap) -> String {
    let mut out = String::new();
    for entry in records.values() {
        render_entry(&mut out, entry);
    }
    out
}

fn render_entry(out: &mut String, entry: &RecordEntry) {
    if !entry.is_resolved() {
        out.push_str(&format!(
            "id {:#06x}  {} words, never written\n",
            entry.id, entry.length_words
        ));
        return;
    }
    out.push_str(&format!(
        "id {:#06x}  {} words @ {:#010x} (ref {:#010x})\n",
        entry.id, entry.length_words, entry.address, entry.reference_address
    ));
    let bytes = entry.bytes();
    for (row, chunk) in bytes.chunks(ROW).enumerate() {
        out.push_str(&format!("  {:04x}:", row * ROW));
        for column in 0..ROW {
            match chunk.get(column) {
                Some(byte) => out.push_str(&format!(" {byte:02x}")),
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        for byte in chunk {
            out.push(if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
}

/// Write the rendered table to any sink.
pub fn write_report<W: io::Write>(writer: &mut W, records: &RecordMap) -> io::Result<()> {
    writer.write_all(render(records).as_bytes())
}
