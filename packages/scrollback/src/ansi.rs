/// Strip terminal control sequences from a line, keeping only color/style
/// (SGR, `ESC [ ... m`) escapes.
///
/// Removed: OSC sequences (`ESC ]` ... BEL or `ESC \`), every non-SGR CSI
/// sequence (cursor movement, erase, scroll region, ...), and stray
/// two-character escapes like `ESC 7` / `ESC =`.
pub fn scrub_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // CSI: parameter/intermediate bytes until a final byte in
                // 0x40..=0x7e. Keep the whole sequence only if it is SGR.
                let mut seq = String::from("\x1b[");
                let mut is_sgr = false;
                for c in chars.by_ref() {
                    seq.push(c);
                    if ('\x40'..='\x7e').contains(&c) {
                        is_sgr = c == 'm';
                        break;
                    }
                }
                if is_sgr {
                    out.push_str(&seq);
                }
            }
            Some(']') => {
                chars.next();
                // OSC: swallow until BEL or ST (ESC \)
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' {
                        if chars.peek() == Some(&'\\') {
                            chars.next();
                        }
                        break;
                    }
                }
            }
            Some(_) => {
                // Stray single-char escape (ESC 7, ESC =, ESC M, ...)
                chars.next();
            }
            None => {}
        }
    }

    out
}
