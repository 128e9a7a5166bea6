//! Plain-text extraction from raw terminal bytes.
//!
//! This is not screen emulation: there is no cursor addressing and no grid.
//! Escape sequences are parsed with `vte` and dropped; what is left is the
//! text an agent wants to read.

use vte::{Params, Perform};

/// Strip escape sequences and apply the few control characters that matter
/// for reading output: newline, tab, backspace and carriage return.
///
/// A carriage return not followed by a newline restarts the line, so
/// progress bars collapse to their final state.
pub fn plain_text(bytes: &[u8]) -> String {
    let mut extractor = TextExtractor::default();
    let mut parser = vte::Parser::new();
    for byte in bytes {
        parser.advance(&mut extractor, *byte);
    }
    extractor.into_string()
}

/// Bytes as text without any processing; invalid UTF-8 is replaced.
pub fn raw_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Default)]
struct TextExtractor {
    done: String,
    line: Vec<char>,
    carriage_return: bool,
}

impl TextExtractor {
    fn restart_line_if_pending(&mut self) {
        if self.carriage_return {
            self.line.clear();
            self.carriage_return = false;
        }
    }

    fn into_string(mut self) -> String {
        self.done.extend(self.line.drain(..));
        self.done
    }
}

impl Perform for TextExtractor {
    fn print(&mut self, c: char) {
        self.restart_line_if_pending();
        self.line.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // LF
            0x0A => {
                self.carriage_return = false;
                self.done.extend(self.line.drain(..));
                self.done.push('\n');
            }
            // CR
            0x0D => self.carriage_return = true,
            // HT
            0x09 => {
                self.restart_line_if_pending();
                self.line.push('\t');
            }
            // BS
            0x08 => {
                if !self.carriage_return {
                    self.line.pop();
                }
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines() {
        assert_eq!(plain_text(b"a\r\nb\r\n"), "a\nb\n");
        assert_eq!(plain_text(b"no newline"), "no newline");
    }

    #[test]
    fn test_strips_sgr_and_osc() {
        assert_eq!(
            plain_text(b"\x1b[1;31merror\x1b[0m: bad\r\n"),
            "error: bad\n"
        );
        assert_eq!(plain_text(b"\x1b]0;title\x07text"), "text");
    }

    #[test]
    fn test_carriage_return_restarts_line() {
        assert_eq!(plain_text(b"10%\r50%\r100%\r\ndone\n"), "100%\ndone\n");
        assert_eq!(plain_text(b"trailing\r"), "trailing");
    }

    #[test]
    fn test_backspace_and_tab() {
        assert_eq!(plain_text(b"abx\x08c"), "abc");
        assert_eq!(plain_text(b"a\tb"), "a\tb");
    }

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(plain_text("héllo ✓\n".as_bytes()), "héllo ✓\n");
    }

    #[test]
    fn test_raw_text_is_lossy() {
        assert_eq!(raw_text(b"ok\xff"), "ok\u{fffd}");
    }
}
