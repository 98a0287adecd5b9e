use crate::error::{LispResult, ReadError};
use crate::heap::Heap;
use crate::value::Value;

/// Deepest list or quote nesting the reader accepts. Each level costs a few
/// native frames, and this keeps a read well inside a 2 MiB thread stack.
pub const MAX_READ_DEPTH: usize = 256;

/// Parses source text into values on the heap.
///
/// Every value the reader builds is only held in native locals until the
/// caller links it somewhere, so anything that must survive a later
/// allocation in the same read is pinned.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    heap: &'a mut Heap,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap) -> Self {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            depth: 0,
            heap,
        }
    }

    /// Read one expression. Returns None at end of input.
    pub fn read(&mut self) -> LispResult<Option<Value>> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let val = self.read_expr()?;
        Ok(Some(val))
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some(b';') {
                while self.peek().is_some_and(|c| c != b'\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_expr(&mut self) -> LispResult<Value> {
        self.skip_whitespace_and_comments();

        let ch = self.peek().ok_or(ReadError::UnexpectedEof)?;

        match ch {
            b'(' => self.read_list(),
            b')' => Err(ReadError::UnexpectedClose { pos: self.pos }.into()),
            b'\'' => self.read_quote(),
            b'"' => self.read_string(),
            _ => self.read_atom(),
        }
    }

    /// Run `f` with a pin scope on the heap.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> LispResult<T>) -> LispResult<T> {
        let mark = self.heap.pin_mark();
        let out = f(self);
        self.heap.release_pins(mark);
        out
    }

    /// Run `f` one nesting level deeper, failing past `MAX_READ_DEPTH`.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> LispResult<T>) -> LispResult<T> {
        if self.depth >= MAX_READ_DEPTH {
            return Err(ReadError::TooDeep { pos: self.pos }.into());
        }
        self.depth += 1;
        let out = self.scoped(f);
        self.depth -= 1;
        out
    }

    /// Read a list: (a b c) or (a . b) or (a b . c)
    fn read_list(&mut self) -> LispResult<Value> {
        self.nested(|r| {
            r.advance(); // consume '('
            let mut elements = Vec::new();
            let mut dot_tail = None;

            loop {
                r.skip_whitespace_and_comments();
                match r.peek() {
                    None => return Err(ReadError::UnexpectedEof.into()),
                    Some(b')') => {
                        r.advance();
                        break;
                    }
                    Some(b'.') if r.is_dot_separator() => {
                        let dot_pos = r.pos;
                        if elements.is_empty() {
                            return Err(ReadError::MisplacedDot { pos: dot_pos }.into());
                        }
                        r.advance(); // consume '.'
                        let tail = r.read_expr()?;
                        r.heap.pin(tail);
                        dot_tail = Some(tail);
                        r.skip_whitespace_and_comments();
                        match r.advance() {
                            Some(b')') => break,
                            None => return Err(ReadError::UnexpectedEof.into()),
                            Some(_) => {
                                return Err(ReadError::MisplacedDot { pos: dot_pos }.into())
                            }
                        }
                    }
                    Some(_) => {
                        let element = r.read_expr()?;
                        r.heap.pin(element);
                        elements.push(element);
                    }
                }
            }

            // Build the list back to front; each cons protects the tail it
            // is given, and the remaining elements are pinned above.
            let mut result = dot_tail.unwrap_or_else(|| r.heap.nil());
            for val in elements.into_iter().rev() {
                result = r.heap.cons(val, result)?;
            }
            Ok(result)
        })
    }

    /// A '.' is a separator when followed by whitespace, a paren, or EOF.
    fn is_dot_separator(&self) -> bool {
        match self.input.get(self.pos + 1) {
            None => true,
            Some(&next) => next.is_ascii_whitespace() || next == b'(' || next == b')',
        }
    }

    /// Read quote: 'expr -> (quote expr)
    fn read_quote(&mut self) -> LispResult<Value> {
        self.nested(|r| {
            r.advance(); // consume '\''
            let expr = r.read_expr()?;
            r.heap.pin(expr);
            // Interning may allocate the first time round.
            let quote = r.heap.intern("quote")?;
            r.heap.list(&[quote, expr])
        })
    }

    /// Read a string literal with \n \t \r \\ \" escapes.
    fn read_string(&mut self) -> LispResult<Value> {
        let start = self.pos;
        self.advance(); // consume '"'
        let mut bytes = Vec::new();

        loop {
            let ch = self
                .advance()
                .ok_or(ReadError::UnterminatedString { pos: start })?;
            match ch {
                b'"' => break,
                b'\\' => {
                    let esc = self
                        .advance()
                        .ok_or(ReadError::UnterminatedString { pos: start })?;
                    bytes.push(match esc {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        other => other,
                    });
                }
                c => bytes.push(c),
            }
        }

        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.heap.make_str(text)
    }

    /// Read a fixnum, `nil`, or a symbol.
    fn read_atom(&mut self) -> LispResult<Value> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if self.is_delimiter(ch) {
                break;
            }
            self.pos += 1;
        }
        let word = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();

        if looks_numeric(&word) {
            return match word.parse::<i64>() {
                Ok(n) => self.heap.make_fixnum(n),
                Err(_) => Err(ReadError::FixnumOverflow {
                    pos: start,
                    text: word,
                }
                .into()),
            };
        }
        if word == "nil" {
            return Ok(self.heap.nil());
        }
        self.heap.intern(&word)
    }

    fn is_delimiter(&self, ch: u8) -> bool {
        ch.is_ascii_whitespace() || matches!(ch, b'(' | b')' | b'\'' | b'"' | b';')
    }
}

/// Optional sign followed by one or more digits.
fn looks_numeric(word: &str) -> bool {
    let digits = word.strip_prefix(['-', '+']).unwrap_or(word);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Read a single expression from a string.
pub fn read_str(input: &str, heap: &mut Heap) -> LispResult<Value> {
    let mut reader = Reader::new(input, heap);
    reader.read()?.ok_or_else(|| ReadError::UnexpectedEof.into())
}

/// Read one expression starting at byte offset `pos`.
/// Returns `Ok(Some((value, new_pos)))` or `Ok(None)` if only whitespace/comments remain.
pub fn read_one_at(input: &str, pos: usize, heap: &mut Heap) -> LispResult<Option<(Value, usize)>> {
    let mut reader = Reader::new(&input[pos..], heap);
    match reader.read()? {
        Some(val) => Ok(Some((val, pos + reader.position()))),
        None => Ok(None),
    }
}
