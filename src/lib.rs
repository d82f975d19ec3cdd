mod ast;
mod error;
mod parser;
mod rewrite;
mod template;

// Public exports.
pub use ast::{
    ActionNode, ArgNode, BranchNode, CommandNode, CommentNode, LeafNode, ListNode, Node, PipeNode,
    TemplateNode, TextNode, Tree,
};
pub use error::{MoldError, MoldResult, ParseError, ParseErrorKind, line_column};
pub use parser::{DEFAULT_MAX_DEPTH, parse, parse_with_max_depth};
pub use rewrite::{Mode, Rewriter, process_tree};
pub use template::Template;
