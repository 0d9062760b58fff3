//! Selector resolution over a flattened tree.

use folio_types::{CountFrom, FlatBlock, Selector};
use serde::Serialize;

use crate::error::{FolioError, FolioResult};

/// Result of resolving a selector where ambiguity is acceptable.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectorResolution {
    /// The single chosen block, if one could be chosen.
    pub selected: Option<FlatBlock>,
    /// More than one block matched and no `nth` was given.
    pub ambiguous: bool,
    /// Every match, in flatten order.
    pub matches: Vec<FlatBlock>,
}

/// Resolve `selector` against `blocks` (flatten order).
///
/// With `nth`, an index beyond the match list is not found, never clamped.
pub fn resolve_selector(blocks: &[FlatBlock], selector: &Selector) -> FolioResult<SelectorResolution> {
    selector.validate()?;
    let matches: Vec<FlatBlock> = blocks
        .iter()
        .filter(|b| selector.matches(b))
        .cloned()
        .collect();

    if let Some(nth) = selector.nth {
        let n = nth as usize;
        if n > matches.len() {
            return Err(FolioError::NotFound(format!(
                "selector nth={nth} is out of range: {} blocks matched",
                matches.len()
            )));
        }
        let index = match selector.from.unwrap_or_default() {
            CountFrom::Start => n - 1,
            CountFrom::End => matches.len() - n,
        };
        return Ok(SelectorResolution {
            selected: Some(matches[index].clone()),
            ambiguous: false,
            matches,
        });
    }

    Ok(match matches.len() {
        1 => SelectorResolution {
            selected: matches.first().cloned(),
            ambiguous: false,
            matches,
        },
        n => SelectorResolution {
            selected: None,
            ambiguous: n > 1,
            matches,
        },
    })
}

/// Resolve to exactly one block: no match is not found, several are invalid input.
pub fn resolve_single(blocks: &[FlatBlock], selector: &Selector) -> FolioResult<FlatBlock> {
    let resolution = resolve_selector(blocks, selector)?;
    match resolution.selected {
        Some(block) => Ok(block),
        None if resolution.ambiguous => Err(FolioError::InvalidInput(format!(
            "{} blocks matched; disambiguate with nth/parentId",
            resolution.matches.len()
        ))),
        None => Err(FolioError::NotFound("no block matched the selector".into())),
    }
}
