//! Line-based merge of two text blobs
//!
//! `merge(theirs, mine)` diffs the local content against the incoming one,
//! classifies the differing regions into blocks and resolves each block
//! according to the operation mask and the conflict resolution.

use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};

use crate::{
    error::usage,
    printer::Printer,
    text::{Eol, TextFile},
};

/// Similarity above which a single-line replacement is an in-line edit
const MODIFY_RATIO: f32 = 0.75;

/// Which kinds of incoming changes to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeOperation {
    /// Only add what the other side has in addition
    Insert,
    /// Only drop what the other side no longer has
    Remove,
    #[default]
    Both,
}

impl MergeOperation {
    pub fn includes_insert(&self) -> bool {
        matches!(self, MergeOperation::Insert | MergeOperation::Both)
    }

    pub fn includes_remove(&self) -> bool {
        matches!(self, MergeOperation::Remove | MergeOperation::Both)
    }
}

/// How to decide blocks both sides changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    Theirs,
    Mine,
    Ask,
    /// Finer-grained merge; currently takes theirs with a warning
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBlockType {
    Keep,
    Insert,
    Remove,
    Replace,
    Modify,
}

/// Changed character positions of a single-line edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// `Insert` or `Remove` for one-sided edits, `Modify` otherwise
    pub tipe: MergeBlockType,
    pub indexes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeBlock {
    pub tipe: MergeBlockType,
    /// Lines of the block; for `Replace`/`Modify` the incoming lines
    pub lines: Vec<String>,
    /// First line number in the local content
    pub line: usize,
    /// The local lines replaced by this block
    pub replaces: Option<Box<MergeBlock>>,
    pub range: Option<Range>,
}

impl MergeBlock {
    fn new(tipe: MergeBlockType, line: usize) -> Self {
        MergeBlock {
            tipe,
            lines: Vec::new(),
            line,
            replaces: None,
            range: None,
        }
    }

    fn replaced_lines(&self) -> &[String] {
        match &self.replaces {
            Some(replaced) => &replaced.lines,
            None => &[],
        }
    }
}

/// Classify the changed characters of one edited line
fn char_range(mine: &str, theirs: &str) -> Range {
    let diff = TextDiff::from_chars(mine, theirs);
    let mut indexes = Vec::new();
    let (mut inserted, mut removed) = (false, false);
    let mut column = 0usize;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => column += 1,
            ChangeTag::Delete => {
                removed = true;
                indexes.push(column);
                column += 1;
            }
            ChangeTag::Insert => {
                inserted = true;
                indexes.push(column);
            }
        }
    }
    let tipe = match (inserted, removed) {
        (true, false) => MergeBlockType::Insert,
        (false, true) => MergeBlockType::Remove,
        _ => MergeBlockType::Modify,
    };
    indexes.dedup();
    Range { tipe, indexes }
}

/// Coalesce the line diff into blocks and fuse remove/insert pairs
pub fn merge_blocks(mine: &[String], theirs: &[String]) -> Vec<MergeBlock> {
    let mine: Vec<&str> = mine.iter().map(String::as_str).collect();
    let theirs: Vec<&str> = theirs.iter().map(String::as_str).collect();
    let diff = TextDiff::from_slices(&mine, &theirs);
    let mut blocks: Vec<MergeBlock> = Vec::new();
    let mut line = 0usize;
    for change in diff.iter_all_changes() {
        let tipe = match change.tag() {
            ChangeTag::Equal => MergeBlockType::Keep,
            ChangeTag::Delete => MergeBlockType::Remove,
            ChangeTag::Insert => MergeBlockType::Insert,
        };
        if blocks.last().map(|b| b.tipe) != Some(tipe) {
            blocks.push(MergeBlock::new(tipe, line));
        }
        if let Some(block) = blocks.last_mut() {
            block.lines.push(change.value().to_string());
        }
        if tipe != MergeBlockType::Insert {
            line += 1;
        }
    }

    let mut fused: Vec<MergeBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        let pair = matches!(
            (fused.last(), block.tipe),
            (Some(prev), MergeBlockType::Insert)
                if prev.tipe == MergeBlockType::Remove && prev.lines.len() == block.lines.len()
        );
        if !pair {
            fused.push(block);
            continue;
        }
        let removed = match fused.pop() {
            Some(removed) => removed,
            None => continue,
        };
        let similar_line = block.lines.len() == 1
            && TextDiff::from_chars(removed.lines[0].as_str(), block.lines[0].as_str()).ratio()
                > MODIFY_RATIO;
        let (tipe, range) = if similar_line {
            (
                MergeBlockType::Modify,
                Some(char_range(&removed.lines[0], &block.lines[0])),
            )
        } else {
            (MergeBlockType::Replace, None)
        };
        fused.push(MergeBlock {
            tipe,
            lines: block.lines,
            line: removed.line,
            replaces: Some(Box::new(removed)),
            range,
        });
    }
    fused
}

/// Decide a conflicting block
fn resolve_conflict(
    block: &MergeBlock,
    resolution: ConflictResolution,
    printer: &dyn Printer,
) -> Result<Vec<String>> {
    let mine = block.replaced_lines();
    let theirs = &block.lines;
    match resolution {
        ConflictResolution::Theirs => Ok(theirs.clone()),
        ConflictResolution::Mine => Ok(mine.to_vec()),
        ConflictResolution::Next => {
            printer.warn("Intra-line merge is not supported, taking their version");
            Ok(theirs.clone())
        }
        ConflictResolution::Ask => {
            printer.line(&format!("Conflict at line {}:", block.line + 1));
            for l in mine {
                printer.line(&format!("  mine:   {}", l));
            }
            for l in theirs {
                printer.line(&format!("  theirs: {}", l));
            }
            if let Some(range) = &block.range {
                printer.line(&format!("  differs at column(s) {:?}", range.indexes));
            }
            loop {
                let answer =
                    printer.ask("Keep (m)ine, (t)heirs, (b)oth, go (d)eeper or (u)ser input? ")?;
                match answer.trim() {
                    "m" => return Ok(mine.to_vec()),
                    "t" => return Ok(theirs.clone()),
                    "b" => return Ok(mine.iter().chain(theirs.iter()).cloned().collect()),
                    "d" => return resolve_conflict(block, ConflictResolution::Next, printer),
                    "u" => {
                        let line = printer.ask("Enter replacement line: ")?;
                        return Ok(vec![line.trim_end_matches(['\r', '\n']).to_string()]);
                    }
                    other => printer.warn(&format!("Unknown answer '{}'", other)),
                }
            }
        }
    }
}

/// Output lines of one block under the operation mask
fn resolve_block(
    block: &MergeBlock,
    operation: MergeOperation,
    resolution: ConflictResolution,
    printer: &dyn Printer,
) -> Result<Vec<String>> {
    let mine = block.replaced_lines();
    Ok(match block.tipe {
        MergeBlockType::Keep => block.lines.clone(),
        MergeBlockType::Insert => {
            if operation.includes_insert() {
                block.lines.clone()
            } else {
                Vec::new()
            }
        }
        MergeBlockType::Remove => {
            if operation.includes_remove() {
                Vec::new()
            } else {
                block.lines.clone()
            }
        }
        MergeBlockType::Replace => match operation {
            MergeOperation::Insert => mine.iter().chain(block.lines.iter()).cloned().collect(),
            MergeOperation::Remove => Vec::new(),
            MergeOperation::Both => resolve_conflict(block, resolution, printer)?,
        },
        MergeBlockType::Modify => {
            let range = block.range.as_ref().map(|r| r.tipe);
            match (operation, range) {
                (MergeOperation::Both, _) | (_, Some(MergeBlockType::Modify)) | (_, None) => {
                    resolve_conflict(block, resolution, printer)?
                }
                (MergeOperation::Insert, Some(MergeBlockType::Insert))
                | (MergeOperation::Remove, Some(MergeBlockType::Remove)) => block.lines.clone(),
                _ => mine.to_vec(),
            }
        }
    })
}

/// Merge `theirs` into `mine`, returning the encoded result.
///
/// The result uses the encoding and line ending of `mine` where it has one.
pub fn merge(
    theirs: &[u8],
    mine: &[u8],
    theirs_name: &str,
    mine_name: &str,
    operation: MergeOperation,
    resolution: ConflictResolution,
    printer: &dyn Printer,
) -> Result<Vec<u8>> {
    let decode = |content: &[u8]| {
        TextFile::decode(content).map_err(|e| {
            usage(format!(
                "Cannot merge {} into {}: undecodable content ({})",
                theirs_name, mine_name, e
            ))
        })
    };
    let theirs_text = decode(theirs)?;
    let mine_text = decode(mine)?;

    if theirs_text.mixed_eol || mine_text.mixed_eol {
        tracing::warn!("Mixed line endings in {} or {}", theirs_name, mine_name);
        printer.warn(&format!(
            "Mixed line endings found merging {} into {}",
            theirs_name, mine_name
        ));
    }
    if let (Some(a), Some(b)) = (theirs_text.eol, mine_text.eol) {
        if a != b {
            printer.warn(&format!(
                "Line endings differ between {} and {}",
                theirs_name, mine_name
            ));
        }
    }
    let eol = mine_text.eol.or(theirs_text.eol).unwrap_or(Eol::Lf);

    let mut output = Vec::with_capacity(mine_text.lines.len());
    for block in merge_blocks(&mine_text.lines, &theirs_text.lines) {
        output.extend(resolve_block(&block, operation, resolution, printer)?);
    }
    mine_text
        .encode_lines(&output, eol)
        .with_context(|| format!("Failed to encode merge result for {}", mine_name))
}
