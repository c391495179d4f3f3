//
// utf16.rs
//
// Column conversions between protocol UTF-16 units and string offsets
//

/// Byte offset of a UTF-16 column within `line`, clamped to the line length.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut units = 0usize;
    for (byte_idx, ch) in line.char_indices() {
        if units >= utf16_col as usize {
            return byte_idx;
        }
        units += ch.len_utf16();
    }
    line.len()
}
