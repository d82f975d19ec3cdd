use crate::{
    ast::{
        ActionNode, ArgNode, BranchNode, CommandNode, CommentNode, LeafNode, ListNode, Node,
        PipeNode, TemplateNode, TextNode, Tree,
    },
    error::{ParseError, ParseErrorKind, line_column},
};

type ParseResult<T> = Result<T, ParseError>;

/// Deepest `if`/`range`/`with` nesting accepted by default, both when parsing
/// and when rewriting.
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    If,
    Range,
    With,
}

impl BranchKind {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "if" => Some(Self::If),
            "range" => Some(Self::Range),
            "with" => Some(Self::With),
            _ => None,
        }
    }

    const fn keyword(self) -> &'static str {
        match self {
            Self::If => "if",
            Self::Range => "range",
            Self::With => "with",
        }
    }

    fn into_node(self, branch: BranchNode) -> Node {
        match self {
            Self::If => Node::If(branch),
            Self::Range => Node::Range(branch),
            Self::With => Node::With(branch),
        }
    }
}

/// What stopped `parse_list`.
#[derive(Debug, Clone, Copy)]
enum Terminator {
    Eof,
    End {
        pos: usize,
    },
    /// A plain `{{else}}` has been consumed entirely. For `{{else if ...}}`
    /// the parser stops right after the chained keyword.
    Else {
        pos: usize,
        chain: Option<(BranchKind, usize, usize)>,
        open: usize,
    },
}

/// Where a pipeline stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeEnd {
    /// `}}` or ` -}}`.
    Action,
    /// `)` of a parenthesised pipeline.
    Paren,
}

/// Saved cursor state used to back out of a speculative parse.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    pos: usize,
    line: usize,
    line_start_pos: usize,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Set by a `-}}` so the following text loses its leading whitespace.
    trim_next: bool,
    depth: usize,
    max_depth: usize,
    /// Number of enclosing `range` bodies, for `{{break}}` and `{{continue}}`.
    range_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, max_depth: usize) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            trim_next: false,
            depth: 0,
            max_depth,
            range_depth: 0,
        }
    }

    #[inline]
    fn current_column(&self) -> usize {
        self.slice(self.line_start_pos, self.pos).chars().count() + 1
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    /// Builds an error pointing at an earlier offset, such as the `{{` of an
    /// action that never closed.
    fn make_error_at(&self, pos: usize, kind: ParseErrorKind) -> ParseError {
        let (line, column) = line_column(self.input, pos);
        ParseError { line, column, kind }
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        self.input.get(start..end).unwrap_or("")
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or("")
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second_char(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            line: self.line,
            line_start_pos: self.line_start_pos,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.line = checkpoint.line;
        self.line_start_pos = checkpoint.line_start_pos;
    }

    /// Advances the parser position by char_len bytes, correctly handling
    /// multi-byte characters. Updates line and column numbers if a newline is
    /// encountered.
    #[inline]
    fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances the parser position by `len` bytes.
    /// Only used for fixed delimiters, which never contain newlines.
    #[inline]
    fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    /// Advances character by character up to the byte offset `end`.
    fn advance_to(&mut self, end: usize) {
        while self.pos < end {
            let Some(current_char) = self.peek_char() else {
                break;
            };
            self.advance_by_char(current_char, current_char.len_utf8());
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    /// Consume whitespace inside an action, newlines included.
    fn consume_whitespace(&mut self) {
        while let Some(current_char) = self.peek_char() {
            if !current_char.is_ascii_whitespace() {
                break;
            }
            self.advance_by_char(current_char, current_char.len_utf8());
        }
    }

    /// Returns the identifier-like word at the cursor without consuming it.
    fn peek_word(&self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
            .map_or(rest.len(), |(i, _)| i);
        rest.get(..end).unwrap_or("")
    }

    fn consume_word(&mut self) -> &'a str {
        let word = self.peek_word();
        self.advance_bytes_no_newline(word.len());
        word
    }

    /// A `{{-` only trims when followed by whitespace, so `{{-3}}` stays a number.
    fn at_left_trim(&self) -> bool {
        self.rest()
            .strip_prefix("{{-")
            .and_then(|r| r.chars().next())
            .is_some_and(|c| c.is_ascii_whitespace())
    }

    fn at_right_delim(&self) -> bool {
        self.peek("}}") || self.peek("-}}")
    }

    fn at_pipe_end(&self, end: PipeEnd) -> bool {
        match end {
            PipeEnd::Action => self.at_right_delim(),
            PipeEnd::Paren => self.peek(")"),
        }
    }

    /// Consumes the closing delimiter of the action opened at `open`.
    fn close_action(&mut self, open: usize) -> ParseResult<()> {
        self.consume_whitespace();
        if self.consume("-}}") {
            self.trim_next = true;
            return Ok(());
        }
        if self.consume("}}") {
            return Ok(());
        }
        if self.eof() {
            return Err(self.make_error_at(open, ParseErrorKind::UnclosedAction));
        }
        Err(self.make_error(ParseErrorKind::Expected {
            description: format!("'}}}}', found '{}'", self.peek_char().unwrap_or_default()),
        }))
    }

    fn enter(&mut self, pos: usize) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.make_error_at(pos, ParseErrorKind::NestingTooDeep {
                limit: self.max_depth,
            }));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Parses the text up to the next action, applying any pending trims.
    fn parse_text(&mut self) -> Option<Node> {
        let start = self.pos;
        let end = self.rest().find("{{").map_or(self.input.len(), |i| start + i);
        self.advance_to(end);

        let mut text = self.slice(start, end);
        let mut text_pos = start;
        if std::mem::take(&mut self.trim_next) {
            let trimmed = text.trim_start_matches(|c: char| c.is_ascii_whitespace());
            text_pos += text.len() - trimmed.len();
            text = trimmed;
        }
        if self.at_left_trim() {
            text = text.trim_end_matches(|c: char| c.is_ascii_whitespace());
        }

        if text.is_empty() {
            None
        } else {
            Some(Node::Text(TextNode {
                pos: text_pos,
                text: text.to_string(),
            }))
        }
    }

    /// Parse nodes until `{{end}}`, `{{else ...}}` or the end of input.
    fn parse_list(&mut self) -> ParseResult<(ListNode, Terminator)> {
        let mut list = ListNode::new(self.pos);
        loop {
            if self.eof() {
                return Ok((list, Terminator::Eof));
            }
            if !self.peek("{{") {
                if let Some(text) = self.parse_text() {
                    list.push(text);
                }
                continue;
            }
            match self.parse_action()? {
                Parsed::Node(node) => list.push(node),
                Parsed::Stop(terminator) => return Ok((list, terminator)),
            }
        }
    }

    fn parse_action(&mut self) -> ParseResult<Parsed> {
        let open = self.pos;
        // A pending `-}}` trim only applies to text directly after it.
        self.trim_next = false;
        self.advance_bytes_no_newline(2);
        if self.peek("-") && self.peek_second_char().is_some_and(|c| c.is_ascii_whitespace()) {
            self.advance_bytes_no_newline(1);
        }
        self.consume_whitespace();

        if self.consume("/*") {
            return self.parse_comment(open).map(Parsed::Node);
        }

        let start = self.pos;
        let line = self.line;
        let word = self.peek_word();

        if let Some(kind) = BranchKind::from_keyword(word) {
            self.consume_word();
            return self.parse_branch(kind, start, line, open).map(Parsed::Node);
        }

        match word {
            "end" => {
                self.consume_word();
                self.close_action(open)?;
                Ok(Parsed::Stop(Terminator::End { pos: start }))
            }
            "else" => {
                self.consume_word();
                self.consume_whitespace();
                let chain_pos = self.pos;
                let chain_line = self.line;
                match BranchKind::from_keyword(self.peek_word()) {
                    Some(kind) => {
                        self.consume_word();
                        Ok(Parsed::Stop(Terminator::Else {
                            pos: start,
                            chain: Some((kind, chain_pos, chain_line)),
                            open,
                        }))
                    }
                    None => {
                        self.close_action(open)?;
                        Ok(Parsed::Stop(Terminator::Else {
                            pos: start,
                            chain: None,
                            open,
                        }))
                    }
                }
            }
            "template" => {
                self.consume_word();
                self.parse_template_call(start, line, open).map(Parsed::Node)
            }
            "break" | "continue" => {
                self.consume_word();
                if self.range_depth == 0 {
                    return Err(self.make_error_at(start, ParseErrorKind::UnexpectedKeyword {
                        keyword: word.to_string(),
                    }));
                }
                self.close_action(open)?;
                let leaf = LeafNode { pos: start, line };
                Ok(Parsed::Node(if word == "break" {
                    Node::Break(leaf)
                } else {
                    Node::Continue(leaf)
                }))
            }
            "define" | "block" => Err(self.make_error(ParseErrorKind::UnknownKeyword {
                keyword: word.to_string(),
            })),
            _ => {
                let pipe = self.parse_pipeline(PipeEnd::Action)?;
                if pipe.cmds.is_empty() {
                    return Err(self.make_error_at(start, ParseErrorKind::MissingPipeline {
                        keyword: "command".to_string(),
                    }));
                }
                self.close_action(open)?;
                Ok(Parsed::Node(Node::Action(ActionNode {
                    pos: start,
                    line,
                    pipe,
                })))
            }
        }
    }

    fn parse_comment(&mut self, open: usize) -> ParseResult<Node> {
        let start = self.pos;
        let Some(len) = self.rest().find("*/") else {
            return Err(self.make_error_at(open, ParseErrorKind::UnclosedComment));
        };
        self.advance_to(start + len);
        let text = self.slice(start, start + len).to_string();
        self.advance_bytes_no_newline(2);
        self.close_action(open)?;
        Ok(Node::Comment(CommentNode { pos: open, text }))
    }

    /// Parses the rest of an `if`, `range` or `with` action, its bodies and
    /// the closing `{{end}}`. The keyword itself has been consumed.
    fn parse_branch(
        &mut self,
        kind: BranchKind,
        pos: usize,
        line: usize,
        open: usize,
    ) -> ParseResult<Node> {
        self.enter(pos)?;
        let pipe = self.parse_pipeline(PipeEnd::Action)?;
        if pipe.cmds.is_empty() {
            return Err(self.make_error_at(pos, ParseErrorKind::MissingPipeline {
                keyword: kind.keyword().to_string(),
            }));
        }
        self.close_action(open)?;

        if kind == BranchKind::Range {
            self.range_depth += 1;
        }
        let (list, terminator) = self.parse_list()?;
        if kind == BranchKind::Range {
            self.range_depth = self.range_depth.saturating_sub(1);
        }

        let else_list = match terminator {
            Terminator::End { .. } => None,
            Terminator::Eof => {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some("{{end}}"))));
            }
            Terminator::Else {
                chain: None, ..
            } => {
                let (else_list, terminator) = self.parse_list()?;
                match terminator {
                    Terminator::End { .. } => Some(else_list),
                    Terminator::Eof => {
                        return Err(
                            self.make_error(ParseErrorKind::unexpected_eof(Some("{{end}}")))
                        );
                    }
                    Terminator::Else { pos, .. } => {
                        return Err(self.make_error_at(pos, ParseErrorKind::UnexpectedKeyword {
                            keyword: "else".to_string(),
                        }));
                    }
                }
            }
            Terminator::Else {
                pos: else_pos,
                chain: Some((chained, chain_pos, chain_line)),
                open: else_open,
            } => {
                if chained != kind || kind == BranchKind::Range {
                    return Err(self.make_error_at(else_pos, ParseErrorKind::UnexpectedKeyword {
                        keyword: format!("else {}", chained.keyword()),
                    }));
                }
                // The chained branch owns the shared {{end}}.
                let nested = self.parse_branch(chained, chain_pos, chain_line, else_open)?;
                let mut else_list = ListNode::new(chain_pos);
                else_list.push(nested);
                Some(else_list)
            }
        };

        self.leave();
        Ok(kind.into_node(BranchNode {
            pos,
            line,
            pipe,
            list,
            else_list,
        }))
    }

    fn parse_template_call(&mut self, pos: usize, line: usize, open: usize) -> ParseResult<Node> {
        self.consume_whitespace();
        let name = match self.parse_operand()? {
            ArgNode::String { text, .. } => text,
            other => {
                return Err(self.make_error_at(other.pos(), ParseErrorKind::Expected {
                    description: "template name in quotes".to_string(),
                }));
            }
        };
        self.consume_whitespace();
        let pipe = if self.at_right_delim() {
            None
        } else {
            Some(self.parse_pipeline(PipeEnd::Action)?)
        };
        self.close_action(open)?;
        Ok(Node::Template(TemplateNode {
            pos,
            line,
            name,
            pipe,
        }))
    }

    /// Parses `$x, $y :=` or `$x =` when present, rewinding otherwise.
    fn parse_declarations(&mut self, pipe: &mut PipeNode) -> ParseResult<()> {
        if !self.peek("$") {
            return Ok(());
        }
        let checkpoint = self.checkpoint();
        let mut decl = Vec::new();
        loop {
            if !self.consume("$") {
                self.restore(checkpoint);
                return Ok(());
            }
            decl.push(format!("${}", self.consume_word()));
            self.consume_whitespace();
            if self.consume(",") {
                self.consume_whitespace();
                continue;
            }
            break;
        }

        if self.consume(":=") {
            pipe.is_assign = false;
        } else if self.peek("=") && !self.peek("==") {
            self.advance_bytes_no_newline(1);
            pipe.is_assign = true;
        } else {
            self.restore(checkpoint);
            return Ok(());
        }
        if decl.len() > 2 {
            return Err(self.make_error_at(checkpoint.pos, ParseErrorKind::Expected {
                description: "at most two variables in a declaration".to_string(),
            }));
        }
        pipe.decl = decl;
        Ok(())
    }

    fn parse_pipeline(&mut self, end: PipeEnd) -> ParseResult<PipeNode> {
        self.consume_whitespace();
        let mut pipe = PipeNode::new(self.pos, self.line);
        self.parse_declarations(&mut pipe)?;

        loop {
            self.consume_whitespace();
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(match end {
                    PipeEnd::Action => "}}",
                    PipeEnd::Paren => ")",
                }))));
            }
            if self.at_pipe_end(end) {
                if pipe.cmds.is_empty() && !pipe.decl.is_empty() {
                    return Err(self.make_error(ParseErrorKind::MissingPipeline {
                        keyword: "declaration".to_string(),
                    }));
                }
                break;
            }
            let cmd = self.parse_command(end)?;
            pipe.cmds.push(cmd);
            self.consume_whitespace();
            if self.consume("|") {
                self.consume_whitespace();
                if self.at_pipe_end(end) {
                    return Err(self.make_error(ParseErrorKind::EmptyCommand));
                }
            }
        }

        if end == PipeEnd::Paren {
            self.advance_bytes_no_newline(1);
        }
        Ok(pipe)
    }

    fn parse_command(&mut self, end: PipeEnd) -> ParseResult<CommandNode> {
        let mut cmd = CommandNode {
            pos: self.pos,
            args: Vec::new(),
        };
        loop {
            self.consume_whitespace();
            if self.eof() || self.at_pipe_end(end) || self.peek("|") {
                break;
            }
            cmd.args.push(self.parse_operand()?);
        }
        if cmd.args.is_empty() {
            return Err(self.make_error(ParseErrorKind::EmptyCommand));
        }
        Ok(cmd)
    }

    fn parse_operand(&mut self) -> ParseResult<ArgNode> {
        let pos = self.pos;
        let Some(current_char) = self.peek_char() else {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some("}}"))));
        };

        match current_char {
            '"' => self.parse_interpreted_string(),
            '`' => self.parse_raw_string(),
            '\'' => self.parse_char_constant(),
            '.' => {
                if self.peek_second_char().is_some_and(is_ident_start) {
                    Ok(ArgNode::Field {
                        pos,
                        idents: self.parse_field_chain(),
                    })
                } else {
                    self.advance_bytes_no_newline(1);
                    Ok(ArgNode::Dot { pos })
                }
            }
            '$' => {
                self.advance_bytes_no_newline(1);
                let mut idents = vec![format!("${}", self.consume_word())];
                if self.peek(".") && self.peek_second_char().is_some_and(is_ident_start) {
                    idents.extend(self.parse_field_chain());
                }
                Ok(ArgNode::Variable { pos, idents })
            }
            '(' => {
                self.advance_bytes_no_newline(1);
                self.enter(pos)?;
                let pipe = self.parse_pipeline(PipeEnd::Paren)?;
                self.leave();
                if pipe.cmds.is_empty() {
                    return Err(self.make_error_at(pos, ParseErrorKind::MissingPipeline {
                        keyword: "parenthesized pipeline".to_string(),
                    }));
                }
                let node = ArgNode::Pipe(Box::new(pipe));
                if self.peek(".") && self.peek_second_char().is_some_and(is_ident_start) {
                    Ok(ArgNode::Chain {
                        pos,
                        node: Box::new(node),
                        fields: self.parse_field_chain(),
                    })
                } else {
                    Ok(node)
                }
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+')
                    && self.peek_second_char().is_some_and(|n| n.is_ascii_digit())) =>
            {
                Ok(self.parse_number())
            }
            c if is_ident_start(c) => {
                let word = self.consume_word();
                Ok(match word {
                    "true" => ArgNode::Bool { pos, value: true },
                    "false" => ArgNode::Bool { pos, value: false },
                    "nil" => ArgNode::Nil { pos },
                    _ => ArgNode::Identifier {
                        pos,
                        ident: word.to_string(),
                    },
                })
            }
            other => Err(self.make_error(ParseErrorKind::Expected {
                description: format!("operand, found '{}'", other),
            })),
        }
    }

    /// Consumes `.A.B.C` and returns `["A", "B", "C"]`.
    fn parse_field_chain(&mut self) -> Vec<String> {
        let mut idents = Vec::new();
        while self.peek(".") && self.peek_second_char().is_some_and(is_ident_start) {
            self.advance_bytes_no_newline(1);
            idents.push(self.consume_word().to_string());
        }
        idents
    }

    fn parse_number(&mut self) -> ArgNode {
        let pos = self.pos;
        let mut prev = None;
        while let Some(c) = self.peek_char() {
            let sign_ok =
                (c == '-' || c == '+') && (self.pos == pos || matches!(prev, Some('e' | 'E' | 'p' | 'P')));
            if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || sign_ok) {
                break;
            }
            prev = Some(c);
            self.advance_bytes_no_newline(c.len_utf8());
        }
        ArgNode::Number {
            pos,
            text: self.slice(pos, self.pos).to_string(),
        }
    }

    fn parse_interpreted_string(&mut self) -> ParseResult<ArgNode> {
        let pos = self.pos;
        self.advance_bytes_no_newline(1);
        let mut text = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.make_error_at(pos, ParseErrorKind::UnterminatedString));
            };
            match c {
                '"' => {
                    self.advance_bytes_no_newline(1);
                    break;
                }
                '\n' => return Err(self.make_error_at(pos, ParseErrorKind::UnterminatedString)),
                '\\' => {
                    self.advance_bytes_no_newline(1);
                    text.push(self.parse_escape(pos)?);
                }
                _ => {
                    text.push(c);
                    self.advance_bytes_no_newline(c.len_utf8());
                }
            }
        }
        Ok(ArgNode::String {
            pos,
            quoted: self.slice(pos, self.pos).to_string(),
            text,
        })
    }

    fn parse_escape(&mut self, string_pos: usize) -> ParseResult<char> {
        let Some(c) = self.peek_char() else {
            return Err(self.make_error_at(string_pos, ParseErrorKind::UnterminatedString));
        };
        self.advance_bytes_no_newline(c.len_utf8());
        let simple = match c {
            'a' => Some('\u{07}'),
            'b' => Some('\u{08}'),
            'f' => Some('\u{0C}'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\u{0B}'),
            '\\' | '"' | '\'' => Some(c),
            _ => None,
        };
        if let Some(escaped) = simple {
            return Ok(escaped);
        }
        let digits = match c {
            'x' => 2,
            'u' => 4,
            'U' => 8,
            _ => {
                return Err(self.make_error(ParseErrorKind::Expected {
                    description: format!("valid escape sequence, found '\\{}'", c),
                }));
            }
        };
        let hex = self.rest().get(..digits).unwrap_or("");
        let value = u32::from_str_radix(hex, 16)
            .ok()
            .filter(|_| hex.len() == digits)
            .and_then(char::from_u32);
        match value {
            Some(escaped) => {
                self.advance_bytes_no_newline(digits);
                Ok(escaped)
            }
            None => Err(self.make_error(ParseErrorKind::Expected {
                description: format!("{} hex digits after '\\{}'", digits, c),
            })),
        }
    }

    fn parse_raw_string(&mut self) -> ParseResult<ArgNode> {
        let pos = self.pos;
        self.advance_bytes_no_newline(1);
        let start = self.pos;
        let Some(len) = self.rest().find('`') else {
            return Err(self.make_error_at(pos, ParseErrorKind::UnterminatedString));
        };
        self.advance_to(start + len);
        let text = self.slice(start, self.pos).to_string();
        self.advance_bytes_no_newline(1);
        Ok(ArgNode::String {
            pos,
            quoted: self.slice(pos, self.pos).to_string(),
            text,
        })
    }

    /// Character constants such as `'a'` are numbers in Go templates; the
    /// literal is kept verbatim.
    fn parse_char_constant(&mut self) -> ParseResult<ArgNode> {
        let pos = self.pos;
        self.advance_bytes_no_newline(1);
        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return Err(self.make_error_at(pos, ParseErrorKind::UnterminatedString));
                }
                Some('\'') => {
                    self.advance_bytes_no_newline(1);
                    break;
                }
                Some('\\') => {
                    self.advance_bytes_no_newline(1);
                    if let Some(c) = self.peek_char() {
                        self.advance_bytes_no_newline(c.len_utf8());
                    }
                }
                Some(c) => self.advance_bytes_no_newline(c.len_utf8()),
            }
        }
        Ok(ArgNode::Number {
            pos,
            text: self.slice(pos, self.pos).to_string(),
        })
    }
}

enum Parsed {
    Node(Node),
    Stop(Terminator),
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Parses `input` into a [`Tree`] named `name`.
///
/// # Errors
///
/// Returns a [`ParseError`] carrying the line and column of the first
/// syntax error.
pub fn parse<N: Into<String>>(name: N, input: &str) -> Result<Tree, ParseError> {
    parse_with_max_depth(name, input, DEFAULT_MAX_DEPTH)
}

/// Like [`parse`], with an explicit limit on how deeply `if`/`range`/`with`
/// bodies and parenthesized pipelines may nest.
///
/// # Errors
///
/// Returns a [`ParseError`] on invalid syntax, or
/// [`ParseErrorKind::NestingTooDeep`] when nesting goes deeper than
/// `max_depth`.
pub fn parse_with_max_depth<N: Into<String>>(
    name: N,
    input: &str,
    max_depth: usize,
) -> Result<Tree, ParseError> {
    let mut parser = Parser::new(input, max_depth);
    let (root, terminator) = parser.parse_list()?;
    match terminator {
        Terminator::Eof => Ok(Tree::new(name, root)),
        Terminator::End { pos } => Err(parser.make_error_at(pos, ParseErrorKind::UnexpectedKeyword {
            keyword: "end".to_string(),
        })),
        Terminator::Else { pos, .. } => {
            Err(parser.make_error_at(pos, ParseErrorKind::UnexpectedKeyword {
                keyword: "else".to_string(),
            }))
        }
    }
}


/// Tests for the parser module via `parse`.
#[cfg(test)]
mod tests {
    use super::*;

    fn root(input: &str) -> Vec<Node> {
        parse("test", input).unwrap().root.nodes
    }

    fn first_args(node: &Node) -> &[ArgNode] {
        match node {
            Node::Action(action) => &action.pipe.cmds[0].args,
            other => panic!("expected action, got {:?}", other),
        }
    }

    fn round_trip(input: &str) -> String {
        parse("test", input).unwrap().to_string()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        let tree = parse("empty", "").unwrap();
        assert_eq!(tree.name, "empty");
        assert!(tree.root.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_simple_text() {
        assert_eq!(root("hello world"), vec![Node::Text(TextNode {
            pos: 0,
            text: "hello world".to_string()
        })]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_action_position_is_first_token() {
        let nodes = root("ab{{  render }}");
        let Node::Action(action) = &nodes[1] else {
            panic!("expected action");
        };
        assert_eq!(action.pos, 6);
        assert_eq!(action.line, 1);
        assert_eq!(action.pipe.cmds[0].args, vec![ArgNode::Identifier {
            pos: 6,
            ident: "render".to_string()
        }]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_action_line_number() {
        let nodes = root("one\ntwo\n{{partial \"x\"}}");
        let Node::Action(action) = &nodes[1] else {
            panic!("expected action");
        };
        assert_eq!(action.line, 3);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_arguments() {
        let nodes = root(r#"{{partial "nav.html" .Menu.Items}}"#);
        assert_eq!(first_args(&nodes[0]), &[
            ArgNode::Identifier {
                pos: 2,
                ident: "partial".to_string()
            },
            ArgNode::String {
                pos: 10,
                quoted: "\"nav.html\"".to_string(),
                text: "nav.html".to_string()
            },
            ArgNode::Field {
                pos: 21,
                idents: vec!["Menu".to_string(), "Items".to_string()]
            },
        ]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_operand_kinds() {
        let nodes = root("{{f . $ $x.Y 12 -3 1e+5 true false nil 'a' `raw`}}");
        let args = first_args(&nodes[0]);
        assert!(matches!(args[1], ArgNode::Dot { .. }));
        assert!(matches!(&args[2], ArgNode::Variable { idents, .. } if idents == &["$"]));
        assert!(matches!(&args[3], ArgNode::Variable { idents, .. } if idents == &["$x", "Y"]));
        assert!(matches!(&args[4], ArgNode::Number { text, .. } if text == "12"));
        assert!(matches!(&args[5], ArgNode::Number { text, .. } if text == "-3"));
        assert!(matches!(&args[6], ArgNode::Number { text, .. } if text == "1e+5"));
        assert!(matches!(args[7], ArgNode::Bool { value: true, .. }));
        assert!(matches!(args[8], ArgNode::Bool { value: false, .. }));
        assert!(matches!(args[9], ArgNode::Nil { .. }));
        assert!(matches!(&args[10], ArgNode::Number { text, .. } if text == "'a'"));
        assert!(matches!(&args[11], ArgNode::String { text, .. } if text == "raw"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_escapes() {
        let nodes = root(r#"{{print "a\"b\n\x41é"}}"#);
        let args = first_args(&nodes[0]);
        assert!(matches!(&args[1], ArgNode::String { text, .. } if text == "a\"b\nAé"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_pipeline_and_declarations() {
        assert_eq!(
            round_trip(r#"{{$x := .Name | printf "%s" | html}}"#),
            r#"{{$x := .Name | printf "%s" | html}}"#
        );
        assert_eq!(round_trip("{{$x = 3}}"), "{{$x = 3}}");
        assert_eq!(
            round_trip("{{range $i, $e := .Items}}{{$e}}{{end}}"),
            "{{range $i, $e := .Items}}{{$e}}{{end}}"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bare_variable_is_not_a_declaration() {
        let nodes = root("{{$x}}");
        let Node::Action(action) = &nodes[0] else {
            panic!("expected action");
        };
        assert!(action.pipe.decl.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parenthesized_pipeline_and_chain() {
        assert_eq!(
            round_trip("{{len (index .Items 1)}}{{(user).Name}}"),
            "{{len (index .Items 1)}}{{(user).Name}}"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if_else() {
        let nodes = root("{{if .Ok}}yes{{else}}no{{end}}");
        let Node::If(branch) = &nodes[0] else {
            panic!("expected if");
        };
        assert_eq!(branch.list.len(), 1);
        assert_eq!(branch.else_list.as_ref().map(ListNode::len), Some(1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_else_if_chain_nests() {
        let nodes = root("{{if .A}}a{{else if .B}}b{{else}}c{{end}}");
        let Node::If(outer) = &nodes[0] else {
            panic!("expected if");
        };
        let else_list = outer.else_list.as_ref().unwrap();
        assert_eq!(else_list.len(), 1);
        let Node::If(inner) = &else_list.nodes[0] else {
            panic!("expected nested if");
        };
        assert_eq!(inner.pos, 17);
        assert!(inner.else_list.is_some());
        assert_eq!(
            round_trip("{{if .A}}a{{else if .B}}b{{end}}"),
            "{{if .A}}a{{else}}{{if .B}}b{{end}}{{end}}"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_with_else_with_chain() {
        let nodes = root("{{with .A}}a{{else with .B}}b{{end}}");
        assert!(matches!(&nodes[0], Node::With(w) if w.else_list.is_some()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_range_with_break_and_continue() {
        let nodes = root("{{range .Items}}{{if .Skip}}{{continue}}{{end}}{{break}}{{else}}none{{end}}");
        let Node::Range(range) = &nodes[0] else {
            panic!("expected range");
        };
        assert!(matches!(range.list.nodes[1], Node::Break(_)));
        assert_eq!(range.else_list.as_ref().map(ListNode::len), Some(1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_invocation() {
        let nodes = root(r#"{{template "header"}}{{template "row" .Item}}"#);
        assert_eq!(nodes[0], Node::Template(TemplateNode {
            pos: 2,
            line: 1,
            name: "header".to_string(),
            pipe: None
        }));
        assert!(matches!(&nodes[1], Node::Template(t) if t.name == "row" && t.pipe.is_some()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comment() {
        let nodes = root("a{{/* note */}}b");
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[1], Node::Comment(c) if c.text == " note "));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_trim_markers() {
        assert_eq!(round_trip("a  \n {{- .X -}} \n b"), "a{{.X}}b");
        assert_eq!(round_trip("a {{-3}}"), "a {{-3}}");
        assert_eq!(round_trip("{{.A -}}{{.B}} x"), "{{.A}}{{.B}} x");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_multiline_action() {
        let nodes = root("{{partial\n  \"a.html\"\n  .Foo}}");
        let args = first_args(&nodes[0]);
        assert_eq!(args.len(), 3);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unclosed_action() {
        let err = parse("t", "ab\n  {{ .X").unwrap_err();
        assert_eq!((err.line, err.column), (2, 8));
        assert_eq!(err.kind, ParseErrorKind::unexpected_eof(Some("}}")));

        let err = parse("t", "{{.X").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedEOF { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_missing_end() {
        let err = parse("t", "{{if .X}}yes").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::unexpected_eof(Some("{{end}}")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unexpected_end_and_else() {
        let err = parse("t", "a\n{{end}}").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert_eq!(err.kind, ParseErrorKind::UnexpectedKeyword {
            keyword: "end".to_string()
        });

        let err = parse("t", "{{else}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedKeyword {
            keyword: "else".to_string()
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_double_else() {
        let err = parse("t", "{{if .X}}a{{else}}b{{else}}c{{end}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedKeyword {
            keyword: "else".to_string()
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_mismatched_else_chain() {
        let err = parse("t", "{{if .X}}a{{else with .Y}}b{{end}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedKeyword {
            keyword: "else with".to_string()
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_break_outside_range() {
        let err = parse("t", "{{break}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedKeyword {
            keyword: "break".to_string()
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_missing_pipeline() {
        let err = parse("t", "{{if}}x{{end}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingPipeline {
            keyword: "if".to_string()
        });
        let err = parse("t", "{{}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingPipeline {
            keyword: "command".to_string()
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_empty_command_in_pipeline() {
        let err = parse("t", "{{.X | }}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::EmptyCommand);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unsupported_keyword() {
        let err = parse("t", r#"{{define "x"}}{{end}}"#).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownKeyword {
            keyword: "define".to_string()
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unterminated_string() {
        let err = parse("t", "{{partial \"a.html}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);
        assert_eq!((err.line, err.column), (1, 11));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unclosed_comment() {
        let err = parse("t", "x{{/* never").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedComment);
        assert_eq!((err.line, err.column), (1, 2));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_template_name_must_be_string() {
        let err = parse("t", "{{template .Name}}").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Expected { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nesting_limit() {
        let input = "{{if .A}}{{if .B}}{{if .C}}x{{end}}{{end}}{{end}}";
        assert!(parse_with_max_depth("t", input, 3).is_ok());
        let err = parse_with_max_depth("t", input, 2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NestingTooDeep { limit: 2 });
        assert_eq!((err.line, err.column), (1, 21));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_paren_nesting_limit() {
        assert!(parse_with_max_depth("t", "{{((1))}}", 2).is_ok());
        let err = parse_with_max_depth("t", "{{(((1)))}}", 2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NestingTooDeep { limit: 2 });
        assert_eq!((err.line, err.column), (1, 5));
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_deep_paren_nesting_is_an_error() {
        let input = format!("{{{{{}1{}}}}}", "(".repeat(5_000), ")".repeat(5_000));
        let err = parse("deep.html", &input).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NestingTooDeep {
            limit: DEFAULT_MAX_DEPTH
        });
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_paren_depth_is_released_after_close() {
        let input = "{{((1))}}{{((2))}}{{if .A}}{{((3))}}{{end}}";
        assert!(parse_with_max_depth("t", input, 3).is_ok());
    }
}
