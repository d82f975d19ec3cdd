//! Turns `render` and `partial` actions into template invocations.
//!
//! Layouts call `{{render}}` (or `{{render "name"}}`) where a named section of
//! the page goes, defaulting to `"body"`. Any template can pull in a separate
//! file with `{{partial "file.html"}}`, optionally scoped to a field of the
//! current data with `{{partial "file.html" .Field}}`. Both become ordinary
//! `{{template "..." ...}}` nodes so the tree can be executed by any engine
//! that understands Go-style templates.

use tracing::{debug, trace};

use crate::{
    ast::{ArgNode, BranchNode, CommandNode, ListNode, Node, PipeNode, TemplateNode, Tree},
    error::{MoldResult, RewriteError},
    parser::DEFAULT_MAX_DEPTH,
};

const RENDER_FUNC: &str = "render";
const PARTIAL_FUNC: &str = "partial";
/// Section injected by a bare `{{render}}`.
const DEFAULT_RENDER_NAME: &str = "body";
const MISSING_PARTIAL_PATH: &str = "partial: path to partial file is not specified";

/// Selects which directives a pass rewrites.
///
/// The two switches are independent: a layout is usually processed with
/// [`Mode::layout`] and a page with [`Mode::partials`], each in its own pass.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode {
    pub render: bool,
    pub partial: bool,
}

impl Mode {
    /// Rewrites both `render` and `partial`.
    pub const fn all() -> Self {
        Self {
            render: true,
            partial: true,
        }
    }

    /// Rewrites `render` only.
    pub const fn layout() -> Self {
        Self {
            render: true,
            partial: false,
        }
    }

    /// Rewrites `partial` only.
    pub const fn partials() -> Self {
        Self {
            render: false,
            partial: true,
        }
    }
}

/// A configured rewrite pass.
///
/// ```
/// use mold::{Mode, Rewriter, parse};
///
/// let raw = r#"<main>{{render}}</main>{{partial "footer.html"}}"#;
/// let mut tree = parse("layout.html", raw).unwrap();
///
/// let references = Rewriter::new(Mode::all()).process(&mut tree, raw).unwrap();
/// assert_eq!(references, vec!["footer.html".to_string()]);
/// assert_eq!(
///     tree.to_string(),
///     r#"<main>{{template "body" .}}</main>{{template "footer.html" .}}"#
/// );
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rewriter {
    mode: Mode,
    max_depth: usize,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new(Mode::all())
    }
}

impl Rewriter {
    pub const fn new(mode: Mode) -> Self {
        Self {
            mode,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Limits how deeply `if`/`range`/`with` bodies may nest before the pass
    /// gives up with a positioned error.
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Rewrites `tree` in place and returns every literal template name its
    /// actions mention, in document order.
    ///
    /// `raw` must be the source `tree` was parsed from; it is only read to
    /// turn a failing node's byte offset into a line and column.
    ///
    /// # Errors
    ///
    /// - [`MoldError::Template`](crate::MoldError::Template) when a directive
    ///   is malformed or the tree nests too deeply, formatted as
    ///   `"<template>:<line>:<column>: <message>"`.
    /// - [`MoldError::Internal`](crate::MoldError::Internal) if the walk
    ///   reaches a slot that cannot be rewritten.
    ///
    /// Nodes rewritten before the error stay rewritten.
    pub fn process(&self, tree: &mut Tree, raw: &str) -> MoldResult<Vec<String>> {
        let mut references = Vec::new();
        match self.walk_list(&mut tree.root, 0, &mut references) {
            Ok(()) => {
                debug!(
                    template = %tree.name,
                    references = references.len(),
                    "processed template tree"
                );
                Ok(references)
            }
            Err(err) => Err(err.into_mold_error(&tree.name, raw)),
        }
    }

    fn walk_list(
        &self,
        list: &mut ListNode,
        depth: usize,
        references: &mut Vec<String>,
    ) -> Result<(), RewriteError> {
        trace!(pos = list.pos, len = list.len(), depth, "visiting list");
        for index in 0..list.len() {
            self.walk_node(list, index, depth, references)?;
        }
        Ok(())
    }

    fn walk_node(
        &self,
        parent: &mut ListNode,
        index: usize,
        depth: usize,
        references: &mut Vec<String>,
    ) -> Result<(), RewriteError> {
        let Some(node) = parent.nodes.get_mut(index) else {
            return Err(RewriteError::internal(format!(
                "rewrite: list has no node at index {}",
                index
            )));
        };

        match node {
            Node::Action(action) => {
                let Some(cmd) = action.pipe.cmds.first() else {
                    return Ok(());
                };
                let args = ActionArgs::from_command(cmd);
                let is_directive = args.is_directive();
                let name = args.name.map(str::to_owned);

                if is_directive {
                    rewrite_action(Some(parent), index, self.mode)?;
                }
                // Collected whether or not the action was rewritten.
                references.extend(name);
                Ok(())
            }
            Node::List(list) => {
                self.check_depth(list.pos, depth + 1)?;
                self.walk_list(list, depth + 1, references)
            }
            Node::If(branch) | Node::Range(branch) | Node::With(branch) => {
                self.walk_branch(branch, depth + 1, references)
            }
            Node::Text(_)
            | Node::Comment(_)
            | Node::Template(_)
            | Node::Break(_)
            | Node::Continue(_) => Ok(()),
        }
    }

    fn walk_branch(
        &self,
        branch: &mut BranchNode,
        depth: usize,
        references: &mut Vec<String>,
    ) -> Result<(), RewriteError> {
        self.check_depth(branch.pos, depth)?;
        self.walk_list(&mut branch.list, depth, references)?;
        if let Some(else_list) = &mut branch.else_list {
            self.walk_list(else_list, depth, references)?;
        }
        Ok(())
    }

    /// Branches and directly nested lists both count towards the limit.
    fn check_depth(&self, pos: usize, depth: usize) -> Result<(), RewriteError> {
        if depth > self.max_depth {
            return Err(RewriteError::positioned(
                pos,
                format!(
                    "template nesting exceeds maximum depth of {}",
                    self.max_depth
                ),
            ));
        }
        Ok(())
    }
}

/// Rewrites `tree` with the default depth limit. See [`Rewriter::process`].
///
/// # Errors
///
/// See [`Rewriter::process`].
pub fn process_tree(tree: &mut Tree, raw: &str, mode: Mode) -> MoldResult<Vec<String>> {
    Rewriter::new(mode).process(tree, raw)
}

/// The positional arguments of an action's first command.
///
/// A missing argument, or one of the wrong kind, is simply `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ActionArgs<'a> {
    /// Argument 0 when it is an identifier.
    func: Option<&'a str>,
    /// Argument 1 when it is a non-empty string literal.
    name: Option<&'a str>,
    /// Argument 2 when it is a field access such as `.Menu`.
    field: Option<&'a ArgNode>,
}

impl<'a> ActionArgs<'a> {
    fn from_command(cmd: &'a CommandNode) -> Self {
        let mut args = Self::default();
        if let Some(ArgNode::Identifier { ident, .. }) = cmd.args.first() {
            args.func = Some(ident.as_str());
        }
        if let Some(ArgNode::String { text, .. }) = cmd.args.get(1) {
            args.name = Some(text.as_str()).filter(|name| !name.is_empty());
        }
        if let Some(field @ ArgNode::Field { .. }) = cmd.args.get(2) {
            args.field = Some(field);
        }
        args
    }

    fn is_directive(&self) -> bool {
        matches!(self.func, Some(RENDER_FUNC | PARTIAL_FUNC))
    }
}

/// Replaces the action at `parent.nodes[index]` with a template invocation
/// when it is a `render` or `partial` call enabled by `mode`.
///
/// Any other action is left alone. `parent` is only modified on success.
fn rewrite_action(
    parent: Option<&mut ListNode>,
    index: usize,
    mode: Mode,
) -> Result<(), RewriteError> {
    let Some(parent) = parent else {
        return Err(RewriteError::internal("rewrite: parent node is missing"));
    };
    let Some(slot) = parent.nodes.get_mut(index) else {
        return Err(RewriteError::internal(format!(
            "rewrite: parent has no node at index {}",
            index
        )));
    };
    let Node::Action(action) = &mut *slot else {
        return Err(RewriteError::internal(format!(
            "rewrite: node at index {} is not an action",
            index
        )));
    };
    let Some(cmd) = action.pipe.cmds.first() else {
        return Ok(());
    };

    let args = ActionArgs::from_command(cmd);
    let (name, data) = match args.func {
        Some(PARTIAL_FUNC) if mode.partial => {
            let data = args
                .field
                .cloned()
                .unwrap_or(ArgNode::Dot { pos: cmd.pos });
            let Some(name) = args.name else {
                return Err(RewriteError::positioned(action.pos, MISSING_PARTIAL_PATH));
            };
            (name.to_owned(), data)
        }
        // A field argument is ignored: render always passes the whole context.
        Some(RENDER_FUNC) if mode.render => (
            args.name.unwrap_or(DEFAULT_RENDER_NAME).to_owned(),
            ArgNode::Dot { pos: cmd.pos },
        ),
        _ => return Ok(()),
    };

    let pos = action.pos;
    let line = action.line;
    let mut pipe = std::mem::replace(&mut action.pipe, PipeNode::new(pos, line));
    pipe.cmds.truncate(1);
    if let Some(cmd) = pipe.cmds.first_mut() {
        cmd.args = vec![data];
    }

    debug!(name = %name, pos, line, "rewrote action into template invocation");
    *slot = Node::Template(TemplateNode {
        pos,
        line,
        name,
        pipe: Some(pipe),
    });
    Ok(())
}
