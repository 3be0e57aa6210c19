//! Reconstructs submitted command lines from raw keystrokes so they can be
//! written to the command history. This is a best-effort approximation: it
//! does not know about shell-side editing such as tab completion or history
//! recall.
//!
//! Lines typed while the terminal has echo turned off (password prompts) are
//! never returned.

/// Longest line kept; further input on the same line is dropped.
const MAX_LINE_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Start,
    Csi,
    Ss3,
}

#[derive(Debug)]
pub struct LineCapture {
    line: String,
    escape: Escape,
    /// Part of the current line arrived while echo was off.
    hidden: bool,
}

impl LineCapture {
    pub fn new() -> Self {
        Self {
            line: String::new(),
            escape: Escape::None,
            hidden: false,
        }
    }

    /// Feed input and return every line completed by it, trimmed and non-empty.
    ///
    /// `echo` is the terminal's echo state when the input arrived. A line
    /// that received any input with echo off is discarded on submit.
    pub fn feed(&mut self, input: &str, echo: bool) -> Vec<String> {
        if !echo {
            self.hidden = true;
        }
        let mut done = Vec::new();
        for c in input.chars() {
            match self.escape {
                Escape::Start => {
                    self.escape = match c {
                        '[' => Escape::Csi,
                        'O' => Escape::Ss3,
                        _ => Escape::None,
                    };
                    continue;
                }
                Escape::Csi => {
                    if ('\x40'..='\x7e').contains(&c) {
                        self.escape = Escape::None;
                    }
                    continue;
                }
                Escape::Ss3 => {
                    self.escape = Escape::None;
                    continue;
                }
                Escape::None => {}
            }

            match c {
                '\r' | '\n' => {
                    let line = self.line.trim();
                    if !line.is_empty() && !self.hidden {
                        done.push(line.to_string());
                    }
                    self.line.clear();
                    self.hidden = !echo;
                }
                '\x1b' => self.escape = Escape::Start,
                // backspace / DEL
                '\x08' | '\x7f' => {
                    self.line.pop();
                }
                // Ctrl-C, Ctrl-U
                '\x03' | '\x15' => self.line.clear(),
                c if c.is_control() => {}
                c => {
                    if self.line.chars().count() < MAX_LINE_CHARS {
                        self.line.push(c);
                    }
                }
            }
        }
        done
    }
}

impl Default for LineCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut lc = LineCapture::new();
        assert_eq!(lc.feed("ls -la\r", true), vec!["ls -la"]);
    }

    #[test]
    fn test_keystrokes_across_frames() {
        let mut lc = LineCapture::new();
        assert!(lc.feed("p", true).is_empty());
        assert!(lc.feed("w", true).is_empty());
        assert_eq!(lc.feed("d\n", true), vec!["pwd"]);
    }

    #[test]
    fn test_backspace_and_clear() {
        let mut lc = LineCapture::new();
        assert_eq!(lc.feed("lss\x7f\r", true), vec!["ls"]);
        assert!(lc.feed("rm -rf /\x03\r", true).is_empty());
        assert!(lc.feed("oops\x15\r", true).is_empty());
    }

    #[test]
    fn test_escape_sequences_skipped() {
        let mut lc = LineCapture::new();
        // Arrow keys (CSI and SS3 forms) must not leak into the line.
        assert_eq!(lc.feed("git\x1b[A\x1bOB status\r", true), vec!["git status"]);
    }

    #[test]
    fn test_blank_lines_dropped_and_multiple_lines() {
        let mut lc = LineCapture::new();
        assert_eq!(lc.feed("  \recho a\necho b\r", true), vec!["echo a", "echo b"]);
    }

    #[test]
    fn test_line_typed_with_echo_off_is_dropped() {
        let mut lc = LineCapture::new();
        assert_eq!(
            lc.feed("stty -echo; read pw; stty echo\r", true),
            vec!["stty -echo; read pw; stty echo"]
        );
        assert!(lc.feed("hunter2-secret\r", false).is_empty());
        assert_eq!(lc.feed("ls\r", true), vec!["ls"]);
    }

    #[test]
    fn test_partial_secret_taints_line_until_submit() {
        let mut lc = LineCapture::new();
        assert!(lc.feed("hunter", false).is_empty());
        // Echo came back before the line was finished; still a secret.
        assert!(lc.feed("2\r", true).is_empty());
        assert_eq!(lc.feed("pwd\r", true), vec!["pwd"]);
    }

    #[test]
    fn test_every_line_in_a_hidden_frame_is_dropped() {
        let mut lc = LineCapture::new();
        assert!(lc.feed("one\rtwo\r", false).is_empty());
    }
}
