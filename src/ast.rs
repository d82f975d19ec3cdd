//! Parse tree for Go-style templates.
//!
//! Every node records `pos`, the byte offset of the node in the raw template
//! source, and `line`, the 1-indexed line that offset falls on. The rewrite
//! pass reports errors against `pos`.
//!
//! `Display` writes a node back out as template source, which makes a
//! rewritten tree easy to inspect:
//!
//! ```
//! use mold::{Mode, Template};
//!
//! let mut template = Template::parse("page", r#"{{partial "nav.html" .Menu}}"#).unwrap();
//! template.process(Mode::all()).unwrap();
//! assert_eq!(template.tree().to_string(), r#"{{template "nav.html" .Menu}}"#);
//! ```

use std::fmt;

/// A named, parsed template.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub name: String,
    pub root: ListNode,
}

impl Tree {
    pub fn new<N: Into<String>>(name: N, root: ListNode) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Plain text between actions, after whitespace trimming.
    Text(TextNode),
    /// A `{{/* ... */}}` comment.
    Comment(CommentNode),
    /// A `{{ pipeline }}` evaluated for output.
    Action(ActionNode),
    /// A nested sequence of nodes.
    List(ListNode),
    If(BranchNode),
    Range(BranchNode),
    With(BranchNode),
    /// `{{template "name" pipeline}}`.
    Template(TemplateNode),
    Break(LeafNode),
    Continue(LeafNode),
}

impl Node {
    pub const fn pos(&self) -> usize {
        match self {
            Self::Text(n) => n.pos,
            Self::Comment(n) => n.pos,
            Self::Action(n) => n.pos,
            Self::List(n) => n.pos,
            Self::If(n) | Self::Range(n) | Self::With(n) => n.pos,
            Self::Template(n) => n.pos,
            Self::Break(n) | Self::Continue(n) => n.pos,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(n) => f.write_str(&n.text),
            Self::Comment(n) => write!(f, "{{{{/*{}*/}}}}", n.text),
            Self::Action(n) => write!(f, "{{{{{}}}}}", n.pipe),
            Self::List(n) => write!(f, "{}", n),
            Self::If(n) => n.write_branch(f, "if"),
            Self::Range(n) => n.write_branch(f, "range"),
            Self::With(n) => n.write_branch(f, "with"),
            Self::Template(n) => write!(f, "{}", n),
            Self::Break(_) => f.write_str("{{break}}"),
            Self::Continue(_) => f.write_str("{{continue}}"),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListNode {
    pub pos: usize,
    pub nodes: Vec<Node>,
}

impl ListNode {
    pub const fn new(pos: usize) -> Self {
        Self {
            pos,
            nodes: Vec::new(),
        }
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Display for ListNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    pub pos: usize,
    pub text: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    pub pos: usize,
    pub text: String,
}

/// `{{break}}` and `{{continue}}` carry nothing but their position.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafNode {
    pub pos: usize,
    pub line: usize,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionNode {
    pub pos: usize,
    pub line: usize,
    pub pipe: PipeNode,
}

/// The shared shape of `if`, `range` and `with`.
///
/// `list` is the body run when the pipeline holds, `else_list` the optional
/// `{{else}}` body. An `{{else if ...}}` chain is stored as an `else_list`
/// holding a single nested branch node.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    pub pos: usize,
    pub line: usize,
    pub pipe: PipeNode,
    pub list: ListNode,
    pub else_list: Option<ListNode>,
}

impl BranchNode {
    fn write_branch(&self, f: &mut fmt::Formatter<'_>, keyword: &str) -> fmt::Result {
        write!(f, "{{{{{} {}}}}}{}", keyword, self.pipe, self.list)?;
        if let Some(else_list) = &self.else_list {
            write!(f, "{{{{else}}}}{}", else_list)?;
        }
        f.write_str("{{end}}")
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateNode {
    pub pos: usize,
    pub line: usize,
    pub name: String,
    pub pipe: Option<PipeNode>,
}

impl fmt::Display for TemplateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pipe {
            Some(pipe) => write!(f, "{{{{template {:?} {}}}}}", self.name, pipe),
            None => write!(f, "{{{{template {:?}}}}}", self.name),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeNode {
    pub pos: usize,
    pub line: usize,
    /// `true` for `$x = ...`, `false` for `$x := ...`.
    pub is_assign: bool,
    /// Declared or assigned variables, `$` included.
    pub decl: Vec<String>,
    pub cmds: Vec<CommandNode>,
}

impl PipeNode {
    pub const fn new(pos: usize, line: usize) -> Self {
        Self {
            pos,
            line,
            is_assign: false,
            decl: Vec::new(),
            cmds: Vec::new(),
        }
    }
}

impl fmt::Display for PipeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.decl.is_empty() {
            write!(f, "{}", self.decl.join(", "))?;
            f.write_str(if self.is_assign { " = " } else { " := " })?;
        }
        for (i, cmd) in self.cmds.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", cmd)?;
        }
        Ok(())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    pub pos: usize,
    pub args: Vec<ArgNode>,
}

impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

/// A single operand of a command.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgNode {
    /// A function name such as `render`, `partial` or `printf`.
    Identifier { pos: usize, ident: String },
    /// `.A.B.C`, stored without the dots.
    Field { pos: usize, idents: Vec<String> },
    /// `.`, the current data context.
    Dot { pos: usize },
    /// `$x.A.B`; the first ident is the variable itself, `$` included.
    Variable { pos: usize, idents: Vec<String> },
    /// `quoted` keeps the literal as written, `text` holds the unquoted value.
    String {
        pos: usize,
        quoted: String,
        text: String,
    },
    Number { pos: usize, text: String },
    Bool { pos: usize, value: bool },
    Nil { pos: usize },
    /// A parenthesised pipeline.
    Pipe(Box<PipeNode>),
    /// `(pipeline).A.B`.
    Chain { pos: usize, node: Box<ArgNode>, fields: Vec<String> },
}

impl ArgNode {
    pub fn pos(&self) -> usize {
        match self {
            Self::Identifier { pos, .. }
            | Self::Field { pos, .. }
            | Self::Dot { pos }
            | Self::Variable { pos, .. }
            | Self::String { pos, .. }
            | Self::Number { pos, .. }
            | Self::Bool { pos, .. }
            | Self::Nil { pos }
            | Self::Chain { pos, .. } => *pos,
            Self::Pipe(pipe) => pipe.pos,
        }
    }
}

impl fmt::Display for ArgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier { ident, .. } => f.write_str(ident),
            Self::Field { idents, .. } => {
                for ident in idents {
                    write!(f, ".{}", ident)?;
                }
                Ok(())
            }
            Self::Dot { .. } => f.write_str("."),
            Self::Variable { idents, .. } => f.write_str(&idents.join(".")),
            Self::String { quoted, .. } => f.write_str(quoted),
            Self::Number { text, .. } => f.write_str(text),
            Self::Bool { value, .. } => write!(f, "{}", value),
            Self::Nil { .. } => f.write_str("nil"),
            Self::Pipe(pipe) => write!(f, "({})", pipe),
            Self::Chain { node, fields, .. } => {
                write!(f, "{}", node)?;
                for field in fields {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
        }
    }
}
