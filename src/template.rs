use crate::ast::Tree;
use crate::error::MoldResult;
use crate::parser::parse;
use crate::rewrite::{Mode, Rewriter};

/// A Template pairs raw template source with its parse tree.
///
/// Keeping the source next to the tree means errors from the rewrite pass can
/// always be reported with a line and column.
///
/// # Example
///
/// ```rust
/// use mold::{Mode, Template};
///
/// let mut page = Template::parse(
///     "page.html",
///     r#"<h1>{{.Title}}</h1>{{partial "comments.html" .Comments}}"#,
/// )
/// .unwrap();
///
/// let references = page.process(Mode::partials()).unwrap();
/// assert_eq!(references, vec!["comments.html".to_string()]);
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    content: String,
    tree: Tree,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // A missing tree is rebuilt from the content, so templates can be
        // written by hand as just a name and a body.
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            name: String,
            content: String,
            #[serde(default)]
            tree: Option<Tree>,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;
        match helper.tree {
            Some(tree) => Ok(Template {
                name: helper.name,
                content: helper.content,
                tree,
            }),
            None => Template::parse(helper.name, helper.content)
                .map_err(|e| serde::de::Error::custom(format!("Failed to parse template: {}", e))),
        }
    }
}

impl Template {
    /// Parses `content` into a new template called `name`.
    ///
    /// # Errors
    ///
    /// Returns a `MoldError::Parse` error if the template syntax is invalid.
    pub fn parse<N: Into<String>, C: Into<String>>(name: N, content: C) -> MoldResult<Self> {
        let name = name.into();
        let content = content.into();
        let tree = parse(name.as_str(), &content)?;
        Ok(Self {
            name,
            content,
            tree,
        })
    }

    /// Wraps a tree built by another parser. `content` must be the source the
    /// tree's offsets refer to.
    pub fn from_tree<C: Into<String>>(content: C, tree: Tree) -> Self {
        Self {
            name: tree.name.clone(),
            content: content.into(),
            tree,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub const fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn into_tree(self) -> Tree {
        self.tree
    }

    /// Runs the rewrite pass over this template's tree.
    ///
    /// # Errors
    ///
    /// See [`Rewriter::process`].
    pub fn process(&mut self, mode: Mode) -> MoldResult<Vec<String>> {
        self.process_with(&Rewriter::new(mode))
    }

    /// Like [`Template::process`], with a preconfigured [`Rewriter`].
    ///
    /// # Errors
    ///
    /// See [`Rewriter::process`].
    pub fn process_with(&mut self, rewriter: &Rewriter) -> MoldResult<Vec<String>> {
        rewriter.process(&mut self.tree, &self.content)
    }
}
