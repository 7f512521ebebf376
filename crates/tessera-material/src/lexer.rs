//! Whitespace-separated token reader for material scripts.
//!
//! Tokens are runs of non-whitespace bytes or double-quoted strings.
//! `//` and `/* */` comments are skipped. A caller that does not allow line
//! breaks gets `None` as soon as the next token would be on a later line,
//! which is how keywords with a variable number of arguments find their end.

/// Cursor over script text.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    /// Start reading `src` at byte offset `pos`.
    pub fn at(src: &'a str, pos: usize) -> Self {
        let line = 1 + src.as_bytes()[..pos.min(src.len())]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        Self {
            src,
            pos: pos.min(src.len()),
            line,
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 1-based line of the cursor.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Skip whitespace and comments. Returns true if a newline was crossed,
    /// or `None` at end of input.
    fn skip_whitespace_and_comments(&mut self) -> Option<bool> {
        let bytes = self.src.as_bytes();
        let mut crossed = false;
        loop {
            while self.pos < bytes.len() && bytes[self.pos] <= b' ' {
                if bytes[self.pos] == b'\n' {
                    self.line += 1;
                    crossed = true;
                }
                self.pos += 1;
            }
            if self.pos >= bytes.len() {
                return None;
            }
            if bytes[self.pos..].starts_with(b"//") {
                while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if bytes[self.pos..].starts_with(b"/*") {
                self.pos += 2;
                while self.pos < bytes.len() && !bytes[self.pos..].starts_with(b"*/") {
                    if bytes[self.pos] == b'\n' {
                        self.line += 1;
                        crossed = true;
                    }
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(bytes.len());
            } else {
                return Some(crossed);
            }
        }
    }

    /// Next token. With `allow_line_breaks == false` a token on a later line
    /// is not returned; the cursor still moves to the start of that line.
    pub fn next_token(&mut self, allow_line_breaks: bool) -> Option<&'a str> {
        let crossed = self.skip_whitespace_and_comments()?;
        if crossed && !allow_line_breaks {
            return None;
        }

        let bytes = self.src.as_bytes();
        if bytes[self.pos] == b'"' {
            self.pos += 1;
            let start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos] != b'"' {
                if bytes[self.pos] == b'\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }
            let token = &self.src[start..self.pos];
            self.pos = (self.pos + 1).min(bytes.len());
            return Some(token);
        }

        let start = self.pos;
        while self.pos < bytes.len() && bytes[self.pos] > b' ' {
            self.pos += 1;
        }
        Some(&self.src[start..self.pos])
    }

    /// Every remaining token on the current line.
    pub fn rest_of_line(&mut self) -> Vec<&'a str> {
        let mut tokens = Vec::new();
        while let Some(t) = self.next_token(false) {
            tokens.push(t);
        }
        tokens
    }

    /// Discard input up to and including the next newline.
    pub fn skip_rest_of_line(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            let c = bytes[self.pos];
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                break;
            }
        }
    }

    /// Skip a brace block whose opening brace may or may not have been
    /// consumed yet (`depth` 0 or 1). Returns false if input ends first.
    pub fn skip_braced_section(&mut self, mut depth: usize) -> bool {
        loop {
            match self.next_token(true) {
                Some("{") => depth += 1,
                Some("}") => depth = depth.saturating_sub(1),
                Some(_) => {}
                None => return depth == 0,
            }
            if depth == 0 {
                return true;
            }
        }
    }
}

/// Lenient float conversion: leading numeric prefix, 0.0 when none.
pub fn atof(token: &str) -> f32 {
    let t = token.trim();
    let bytes = t.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }
    let mut candidate = &t[..end];
    while !candidate.is_empty() {
        if let Ok(v) = candidate.parse::<f32>() {
            return v;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_and_comments() {
        let mut lx = Lexer::new("a // comment\n/* block\n */ b \"quoted str\"");
        assert_eq!(lx.next_token(true), Some("a"));
        assert_eq!(lx.next_token(true), Some("b"));
        assert_eq!(lx.next_token(true), Some("quoted str"));
        assert_eq!(lx.next_token(true), None);
        assert_eq!(lx.line(), 3);
    }

    #[test]
    fn test_line_break_stops_token() {
        let mut lx = Lexer::new("animMap 10 a b\n next");
        assert_eq!(lx.next_token(true), Some("animMap"));
        assert_eq!(lx.rest_of_line(), vec!["10", "a", "b"]);
        assert_eq!(lx.next_token(false), Some("next"));
    }

    #[test]
    fn test_skip_rest_of_line() {
        let mut lx = Lexer::new("qer_editorimage foo bar\nmap x");
        lx.next_token(true);
        lx.skip_rest_of_line();
        assert_eq!(lx.next_token(true), Some("map"));
    }

    #[test]
    fn test_skip_braced_section() {
        let mut lx = Lexer::new("name { { map a } } after");
        assert_eq!(lx.next_token(true), Some("name"));
        assert!(lx.skip_braced_section(0));
        assert_eq!(lx.next_token(true), Some("after"));

        let mut open = Lexer::new("{ map a");
        assert!(!open.skip_braced_section(0));
    }

    #[test]
    fn test_atof_prefix() {
        assert_eq!(atof("0.5"), 0.5);
        assert_eq!(atof("-2"), -2.0);
        assert_eq!(atof("3x"), 3.0);
        assert_eq!(atof("1e2"), 100.0);
        assert_eq!(atof("abc"), 0.0);
        assert_eq!(atof(".25"), 0.25);
    }
}
