//! Handlers for documents loaded by the plain-text toolkit.

use od_core::error::{OdError, Result};
use od_core::params::ParameterBag;
use od_core::text::TextDocument;
use od_core::types::DocumentType;
use regex::{NoExpand, Regex};
use serde_json::json;

use crate::context::DocumentContext;
use crate::handler::{OperationHandler, OperationOutput};
use crate::registry::{factory, HandlerFactory, HandlerRegistry};

pub const TEXT_HANDLERS: &[HandlerFactory] = &[
    factory::<GetText>,
    factory::<SetText>,
    factory::<AppendText>,
    factory::<ReplaceText>,
    factory::<TextStats>,
];

/// One registry per document type, each holding every text handler.
pub fn registries() -> Result<Vec<HandlerRegistry>> {
    DocumentType::ALL
        .iter()
        .map(|ty| HandlerRegistry::from_table(*ty, TEXT_HANDLERS))
        .collect()
}

/// `get-text`: the whole text, or its first `max_chars` characters.
#[derive(Default)]
pub struct GetText;

impl OperationHandler for GetText {
    fn operation(&self) -> &'static str {
        "get-text"
    }

    fn execute(&self, ctx: &mut DocumentContext<'_>, params: &ParameterBag) -> Result<OperationOutput> {
        let doc = ctx.document_as::<TextDocument>()?;
        let max_chars: Option<usize> = params.get_optional("max_chars", None);
        let text = match max_chars {
            Some(n) => doc.content.chars().take(n).collect(),
            None => doc.content.clone(),
        };
        Ok(OperationOutput::Text(text))
    }
}

/// `set-text`: replace the whole content with `text`.
#[derive(Default)]
pub struct SetText;

impl OperationHandler for SetText {
    fn operation(&self) -> &'static str {
        "set-text"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut DocumentContext<'_>, params: &ParameterBag) -> Result<OperationOutput> {
        let text: String = params.get_required("text")?;
        let doc = ctx.document_as_mut::<TextDocument>()?;
        if doc.content != text {
            doc.content = text;
            ctx.mark_dirty();
        }
        Ok(OperationOutput::Empty)
    }
}

/// `append-text`: add `text`, optionally preceded by `separator`.
#[derive(Default)]
pub struct AppendText;

impl OperationHandler for AppendText {
    fn operation(&self) -> &'static str {
        "append-text"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut DocumentContext<'_>, params: &ParameterBag) -> Result<OperationOutput> {
        let text: String = params.get_required("text")?;
        let separator: String = params.get_optional("separator", String::new());
        if text.is_empty() {
            return Ok(OperationOutput::Empty);
        }
        let doc = ctx.document_as_mut::<TextDocument>()?;
        if !doc.content.is_empty() {
            doc.content.push_str(&separator);
        }
        doc.content.push_str(&text);
        let length = doc.content.chars().count();
        ctx.mark_dirty();
        OperationOutput::json(json!({ "length": length }))
    }
}

/// `replace-text`: replace `find` with `replace`, literally or as a regex.
///
/// `limit` caps the number of replacements; 0 means all.
#[derive(Default)]
pub struct ReplaceText;

impl OperationHandler for ReplaceText {
    fn operation(&self) -> &'static str {
        "replace-text"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut DocumentContext<'_>, params: &ParameterBag) -> Result<OperationOutput> {
        let find: String = params.get_required("find")?;
        let replace: String = params.get_required("replace")?;
        let use_regex: bool = params.get_optional("regex", false);
        let limit: usize = params.get_optional("limit", 0);
        if find.is_empty() {
            return Err(OdError::argument("parameter 'find' must not be empty"));
        }
        let source = if use_regex { find.clone() } else { regex::escape(&find) };
        let pattern = Regex::new(&source)
            .map_err(|e| OdError::argument(format!("invalid pattern for 'find': {e}")))?;

        let doc = ctx.document_as_mut::<TextDocument>()?;
        let found = pattern.find_iter(&doc.content).count();
        let replacements = if limit == 0 { found } else { found.min(limit) };
        if replacements > 0 {
            let updated = if use_regex {
                pattern.replacen(&doc.content, limit, replace.as_str())
            } else {
                pattern.replacen(&doc.content, limit, NoExpand(&replace))
            };
            doc.content = updated.into_owned();
            ctx.mark_dirty();
        }
        OperationOutput::json(json!({ "replacements": replacements }))
    }
}

/// `text-stats`: character, word and line counts.
#[derive(Default)]
pub struct TextStats;

impl OperationHandler for TextStats {
    fn operation(&self) -> &'static str {
        "text-stats"
    }

    fn execute(&self, ctx: &mut DocumentContext<'_>, _params: &ParameterBag) -> Result<OperationOutput> {
        let doc = ctx.document_as::<TextDocument>()?;
        OperationOutput::json(json!({
            "chars": doc.content.chars().count(),
            "words": doc.content.split_whitespace().count(),
            "lines": doc.content.lines().count(),
        }))
    }
}
