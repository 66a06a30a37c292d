//! Condition Compiler - Render predicate trees into target query representations
//!
//! One predicate tree, two targets:
//!
//! ```text
//! Predicate ──► Compiler(Relational) ──► "age = ? AND score > ?" + [30, 10]
//!           └─► Compiler(Document)   ──► {"$and": [{"age": {"$eq": 30}}, ...]}
//!                        │
//!                        └─► CacheSignature (cache_key, cache_value, default_cacheable)
//! ```
//!
//! The compiler is a value, not a global: construct one per target and pass
//! it to whoever builds queries. Compilation is pure.
//!
//! Besides [`Compiler::compile`], the compiler exposes the building blocks
//! directly so callers can assemble queries incrementally:
//!
//! - [`Compiler::and`] / [`Compiler::or`] join children with a boolean joiner.
//! - [`Compiler::add`] concatenates pre-joined fragments without a joiner,
//!   stripping the leading joiner of the first one.
//! - [`Compiler::group`] parenthesizes a fragment, keeping its leading joiner
//!   outside the parentheses.
//!
//! Children may be fresh [`Predicate`]s or already-compiled queries; see
//! [`Clause`].

mod document;
mod relational;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{CompileError, KeelResult};
use crate::predicate::{Condition, Predicate};
use crate::signature::CacheSignature;

// ============================================================================
// TARGETS AND JOINERS
// ============================================================================

/// Query representation a compiler renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Relational query text with positional placeholders.
    Relational,
    /// Structured document-store filter.
    Document,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relational => f.write_str("relational"),
            Self::Document => f.write_str("document"),
        }
    }
}

/// Boolean joiner between sibling fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Joiner {
    And,
    Or,
}

impl Joiner {
    /// Relational token, including surrounding spaces.
    pub fn sql(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }

    /// Document-store logical operator key.
    pub fn document_key(self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
        }
    }
}

// ============================================================================
// COMPILED QUERY
// ============================================================================

/// Target-specific output of compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    /// Query text and its ordered positional parameters.
    Relational { text: String, parameters: Vec<Value> },
    /// Filter document. Empty when there is no predicate.
    Document(Map<String, Value>),
}

impl Representation {
    pub fn target(&self) -> Target {
        match self {
            Self::Relational { .. } => Target::Relational,
            Self::Document(_) => Target::Document,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Relational { text, .. } => text.is_empty(),
            Self::Document(doc) => doc.is_empty(),
        }
    }

    fn empty(target: Target) -> Self {
        match target {
            Target::Relational => Self::Relational {
                text: String::new(),
                parameters: Vec::new(),
            },
            Target::Document => Self::Document(Map::new()),
        }
    }
}

/// A compiled predicate: its rendered representation plus cache signature.
///
/// The leading joiner records how this fragment attaches to a preceding one
/// when it is later concatenated with [`Compiler::add`]. It is never part of
/// [`CompiledQuery::sql`]; [`CompiledQuery::fragment`] shows it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    representation: Representation,
    leading: Option<Joiner>,
    signature: Option<CacheSignature>,
}

impl CompiledQuery {
    /// A query with no predicate (unconditional read) for `target`.
    pub fn empty(target: Target) -> Self {
        Self {
            representation: Representation::empty(target),
            leading: None,
            signature: None,
        }
    }

    pub fn target(&self) -> Target {
        self.representation.target()
    }

    pub fn representation(&self) -> &Representation {
        &self.representation
    }

    /// True when there is no predicate at all.
    pub fn is_empty(&self) -> bool {
        self.representation.is_empty()
    }

    pub fn leading_joiner(&self) -> Option<Joiner> {
        self.leading
    }

    /// Relational text without any leading joiner.
    pub fn sql(&self) -> Option<&str> {
        match &self.representation {
            Representation::Relational { text, .. } => Some(text),
            Representation::Document(_) => None,
        }
    }

    /// Relational text including the leading joiner, exactly as it would be
    /// appended to a running query.
    pub fn fragment(&self) -> Option<String> {
        let text = self.sql()?;
        if text.is_empty() {
            return Some(String::new());
        }
        Some(match self.leading {
            Some(joiner) => format!("{}{}", joiner.sql(), text),
            None => text.to_string(),
        })
    }

    /// Ordered positional parameters. Empty for the document target.
    pub fn parameters(&self) -> &[Value] {
        match &self.representation {
            Representation::Relational { parameters, .. } => parameters,
            Representation::Document(_) => &[],
        }
    }

    /// Filter document, for the document target.
    pub fn document(&self) -> Option<&Map<String, Value>> {
        match &self.representation {
            Representation::Document(doc) => Some(doc),
            Representation::Relational { .. } => None,
        }
    }

    /// Cache signature; `None` when the predicate is empty.
    pub fn signature(&self) -> Option<&CacheSignature> {
        self.signature.as_ref()
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.signature.as_ref().map(CacheSignature::cache_key)
    }

    pub fn cache_value(&self) -> Option<&str> {
        self.signature.as_ref().map(CacheSignature::cache_value)
    }

    /// True only for a non-empty, all-equality predicate.
    pub fn default_cacheable(&self) -> bool {
        self.signature
            .as_ref()
            .is_some_and(CacheSignature::default_cacheable)
    }
}

/// A child handed to [`Compiler::and`], [`Compiler::or`], [`Compiler::add`]
/// or [`Compiler::group`].
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// A predicate still to be compiled.
    Node(Predicate),
    /// An already-compiled inner query, incorporated verbatim.
    Compiled(CompiledQuery),
}

impl From<Predicate> for Clause {
    fn from(node: Predicate) -> Self {
        Self::Node(node)
    }
}

impl From<Condition> for Clause {
    fn from(cond: Condition) -> Self {
        Self::Node(Predicate::Leaf(cond))
    }
}

impl From<CompiledQuery> for Clause {
    fn from(query: CompiledQuery) -> Self {
        Self::Compiled(query)
    }
}

// ============================================================================
// COMPILER
// ============================================================================

/// Compiler options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Positional placeholder emitted for each relational parameter.
    pub placeholder: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            placeholder: "?".to_string(),
        }
    }
}

/// Renders predicates for one target.
#[derive(Debug, Clone)]
pub struct Compiler {
    target: Target,
    config: CompilerConfig,
}

impl Compiler {
    /// Create a compiler for `target` with default options.
    pub fn new(target: Target) -> Self {
        Self::with_config(target, CompilerConfig::default())
    }

    pub fn with_config(target: Target, config: CompilerConfig) -> Self {
        Self { target, config }
    }

    /// Compiler for relational query text.
    pub fn relational() -> Self {
        Self::new(Target::Relational)
    }

    /// Compiler for document-store filters.
    pub fn document() -> Self {
        Self::new(Target::Document)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Compile a whole predicate tree.
    ///
    /// `And`/`Or` nodes join their children without adding parentheses; wrap
    /// mixed sub-trees in [`Predicate::Group`] where precedence matters.
    pub fn compile(&self, node: &Predicate) -> KeelResult<CompiledQuery> {
        match node {
            Predicate::Leaf(cond) => self.leaf(cond),
            Predicate::And(children) => {
                let compiled = self.compile_all(children)?;
                Ok(self.join(compiled, Joiner::And))
            }
            Predicate::Or(children) => {
                let compiled = self.compile_all(children)?;
                Ok(self.join(compiled, Joiner::Or))
            }
            Predicate::Group(inner) => {
                let compiled = self.compile(inner)?;
                self.wrap_group(compiled)
            }
        }
    }

    /// Join children with ` AND ` / `$and`.
    pub fn and<I>(&self, children: I) -> KeelResult<CompiledQuery>
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        let compiled = self.resolve_all(children)?;
        Ok(self.join(compiled, Joiner::And))
    }

    /// Join children with ` OR ` / `$or`.
    pub fn or<I>(&self, children: I) -> KeelResult<CompiledQuery>
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        let compiled = self.resolve_all(children)?;
        Ok(self.join(compiled, Joiner::Or))
    }

    /// Concatenate pre-joined children without inserting a joiner.
    ///
    /// The leading joiner of the first non-empty child is stripped; later
    /// children keep theirs, so `add(and(A, B), or(C))` renders
    /// `A AND B OR C`. The document target builds the filter that text
    /// means, with AND binding tighter than OR.
    pub fn add<I>(&self, children: I) -> KeelResult<CompiledQuery>
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        let compiled: Vec<_> = self
            .resolve_all(children)?
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect();

        let signature = CacheSignature::concat(compiled.iter().map(|c| c.signature.as_ref()));
        let representation = match self.target {
            Target::Relational => {
                let parts = compiled
                    .into_iter()
                    .map(|c| {
                        let text = relational::SqlFragment::from_representation(c.representation);
                        (c.leading, text)
                    })
                    .collect();
                relational::concat(parts).into_representation()
            }
            Target::Document => {
                let parts = compiled
                    .into_iter()
                    .map(|c| (c.leading, document::from_representation(c.representation)))
                    .collect();
                Representation::Document(document::concat(parts))
            }
        };

        Ok(CompiledQuery {
            representation,
            leading: None,
            signature,
        })
    }

    /// Parenthesize a child.
    ///
    /// A leading joiner stays outside: ` AND (A AND B)`. The document target
    /// has no grouping construct and reports a capability error.
    pub fn group(&self, child: impl Into<Clause>) -> KeelResult<CompiledQuery> {
        let compiled = self.resolve(child.into())?;
        self.wrap_group(compiled)
    }

    fn wrap_group(&self, child: CompiledQuery) -> KeelResult<CompiledQuery> {
        match self.target {
            Target::Relational => {
                let leading = child.leading;
                let signature = child.signature;
                let fragment = relational::SqlFragment::from_representation(child.representation);
                Ok(CompiledQuery {
                    representation: relational::group(fragment).into_representation(),
                    leading,
                    signature,
                })
            }
            Target::Document => Err(CompileError::Unsupported {
                target: Target::Document,
                construct: "group",
            }
            .into()),
        }
    }

    fn leaf(&self, cond: &Condition) -> KeelResult<CompiledQuery> {
        match self.target {
            Target::Relational => {
                let fragment = relational::leaf(cond, &self.config.placeholder)?;
                Ok(CompiledQuery {
                    representation: fragment.into_representation(),
                    leading: None,
                    signature: Some(CacheSignature::for_condition(cond)),
                })
            }
            Target::Document => match document::leaf(cond) {
                Some(doc) => Ok(CompiledQuery {
                    representation: Representation::Document(doc),
                    leading: None,
                    signature: Some(CacheSignature::for_condition(cond)),
                }),
                None => Ok(CompiledQuery::empty(Target::Document)),
            },
        }
    }

    fn join(&self, children: Vec<CompiledQuery>, joiner: Joiner) -> CompiledQuery {
        let children: Vec<_> = children.into_iter().filter(|c| !c.is_empty()).collect();
        if children.is_empty() {
            return CompiledQuery::empty(self.target);
        }

        let signature = CacheSignature::concat(children.iter().map(|c| c.signature.as_ref()));
        let representation = match self.target {
            Target::Relational => {
                let parts = children
                    .into_iter()
                    .map(|c| relational::SqlFragment::from_representation(c.representation))
                    .collect();
                relational::join(parts, joiner).into_representation()
            }
            Target::Document => {
                let parts = children
                    .into_iter()
                    .map(|c| document::from_representation(c.representation))
                    .collect();
                Representation::Document(document::join(parts, joiner))
            }
        };

        CompiledQuery {
            representation,
            leading: Some(joiner),
            signature,
        }
    }

    fn compile_all(&self, nodes: &[Predicate]) -> KeelResult<Vec<CompiledQuery>> {
        nodes.iter().map(|node| self.compile(node)).collect()
    }

    fn resolve_all<I>(&self, children: I) -> KeelResult<Vec<CompiledQuery>>
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        children
            .into_iter()
            .map(|child| self.resolve(child.into()))
            .collect()
    }

    fn resolve(&self, clause: Clause) -> KeelResult<CompiledQuery> {
        match clause {
            Clause::Node(node) => self.compile(&node),
            Clause::Compiled(query) if query.target() == self.target => Ok(query),
            Clause::Compiled(query) => Err(CompileError::TargetMismatch {
                expected: self.target,
                found: query.target(),
            }
            .into()),
        }
    }
}
