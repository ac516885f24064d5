//! Shell-style command tokenizer.
//!
//! Splits on unquoted whitespace, honors single/double quoted segments
//! and backslash escapes. A malformed trailing escape is flushed as
//! literal content instead of raising an error.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Between arguments.
    Outside,
    /// Inside an argument, quoted or bare.
    Inside,
    /// The current argument just closed.
    End,
}

struct ArgumentScanner<'a> {
    input: &'a [u8],
    /// Index of the character under inspection; -1 before the first advance.
    pos: isize,
    state: ScanState,
    /// Opening quote of the current argument, 0 for a bare argument.
    start_token: u8,
    /// The next character is escaped.
    pending_escape: bool,
    current: Vec<u8>,
    exhausted: bool,
}

impl<'a> ArgumentScanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: -1,
            state: ScanState::Outside,
            start_token: 0,
            pending_escape: false,
            current: Vec::with_capacity(16),
            exhausted: false,
        }
    }

    fn scan(mut self) -> Vec<String> {
        let mut arguments = Vec::new();
        loop {
            self.advance();

            if self.exhausted {
                // a trailing backslash is literal content, not an error
                if self.pending_escape {
                    self.current.push(b'\\');
                }
                if !self.current.is_empty() {
                    arguments.push(String::from_utf8_lossy(&self.current).into_owned());
                }
                return arguments;
            }

            match self.state {
                ScanState::Outside => self.detect_start(),
                ScanState::Inside => {
                    if !self.detect_end() {
                        self.consume();
                    }
                }
                ScanState::End => {
                    self.state = ScanState::Outside;
                    arguments.push(String::from_utf8_lossy(&self.current).into_owned());
                    self.current.clear();
                }
            }
        }
    }

    fn advance(&mut self) {
        if self.input.len() as isize - self.pos == 1 {
            self.exhausted = true;
            return;
        }
        self.pos += 1;
    }

    fn retreat(&mut self) {
        if self.pos >= 0 {
            self.pos -= 1;
        }
    }

    fn at(&self) -> u8 {
        self.input[self.pos as usize]
    }

    fn detect_start(&mut self) {
        let c = self.at();
        if c == b' ' {
            return;
        }
        match c {
            b'\\' => {
                self.start_token = 0;
                self.pending_escape = true;
            }
            b'"' | b'\'' => self.start_token = c,
            _ => {
                self.start_token = 0;
                self.retreat();
            }
        }
        self.state = ScanState::Inside;
    }

    fn consume(&mut self) {
        let c = self.at();

        if self.pending_escape {
            // only the space, the backslash, and the opening quote are
            // escapable; anything else keeps its backslash
            if c == b' ' || c == b'\\' || c == self.start_token {
                self.current.push(c);
            } else {
                self.current.push(b'\\');
                self.current.push(c);
            }
            self.pending_escape = false;
            return;
        }

        if c == b'\\' {
            self.pending_escape = true;
        } else {
            self.current.push(c);
        }
    }

    fn detect_end(&mut self) -> bool {
        let c = self.at();

        if self.start_token == 0 {
            if c == b' ' && !self.pending_escape {
                self.state = ScanState::End;
                self.retreat();
                return true;
            }
            return false;
        }

        if c == self.start_token && !self.pending_escape {
            self.state = ScanState::End;
            return true;
        }
        false
    }
}

/// Tokenize the arguments part of a command line.
pub fn scan_arguments(input: &str) -> Vec<String> {
    ArgumentScanner::new(input).scan()
}

/// Split a raw command string into the executable path plus its argument
/// list. The executable is everything up to the first space; the
/// remainder goes through the quoting-aware scanner.
pub fn split_command(raw: &str) -> Vec<String> {
    match raw.split_once(' ') {
        None => vec![raw.to_string()],
        Some((program, rest)) => {
            let mut argv = Vec::with_capacity(2);
            argv.push(program.to_string());
            argv.extend(scan_arguments(rest));
            argv
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_unquoted_whitespace() {
        assert_eq!(scan_arguments("-a -b  -c"), vec!["-a", "-b", "-c"]);
    }

    #[test]
    fn quoted_segments_keep_spaces() {
        assert_eq!(scan_arguments(r#"-m "b c" 'd e'"#), vec!["-m", "b c", "d e"]);
    }

    #[test]
    fn escaped_quote_inside_quotes() {
        assert_eq!(scan_arguments(r"'d\'e'"), vec!["d'e"]);
    }

    #[test]
    fn unknown_escape_keeps_backslash() {
        assert_eq!(scan_arguments(r"a\tb"), vec![r"a\tb"]);
    }

    #[test]
    fn escaped_space_in_bare_argument() {
        assert_eq!(scan_arguments(r"a\ b"), vec!["a b"]);
    }

    #[test]
    fn trailing_escape_is_literal() {
        assert_eq!(scan_arguments(r"x \"), vec!["x", r"\"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(scan_arguments("").is_empty());
        assert!(scan_arguments("   ").is_empty());
    }

    #[test]
    fn split_command_program_and_arguments() {
        assert_eq!(
            split_command(r#"cmd -a "b c" 'd\'e'"#),
            vec!["cmd", "-a", "b c", "d'e"]
        );
    }

    #[test]
    fn split_command_bare_program() {
        assert_eq!(split_command("uptime"), vec!["uptime"]);
    }

    #[test]
    fn split_command_trailing_escape() {
        assert_eq!(split_command(r"cmd \"), vec!["cmd", r"\"]);
    }
}
