//! Chapter tree built from a flat, levelled heading list

use serde::Serialize;

use crate::model::Heading;

/// A node of the chapter tree. Built once per document load and never patched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub heading: Heading,
    pub children: Vec<Chapter>,
}

impl Chapter {
    fn leaf(heading: Heading) -> Self {
        Self {
            heading,
            children: Vec::new(),
        }
    }
}

/// Build the chapter tree in one pass.
///
/// A heading closes every open chapter at its level or deeper, then becomes a
/// child of whatever is left open. Level jumps (0 → 3) are accepted and nest a
/// single level deep.
pub fn build(headings: &[Heading]) -> Vec<Chapter> {
    let mut roots: Vec<Chapter> = Vec::new();
    // Open chapters, outermost first; each entry is a finished-so-far node.
    let mut stack: Vec<Chapter> = Vec::new();

    for heading in headings {
        while stack
            .last()
            .is_some_and(|open| open.heading.level >= heading.level)
        {
            close_top(&mut stack, &mut roots);
        }
        stack.push(Chapter::leaf(heading.clone()));
    }

    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }

    roots
}

fn close_top(stack: &mut Vec<Chapter>, roots: &mut Vec<Chapter>) {
    let Some(done) = stack.pop() else {
        return;
    };
    match stack.last_mut() {
        Some(parent) => parent.children.push(done),
        None => roots.push(done),
    }
}

/// Depth-first traversal of the tree, reproducing the input heading order
pub fn flatten(chapters: &[Chapter]) -> Vec<&Heading> {
    let mut out = Vec::new();
    flatten_into(chapters, &mut out);
    out
}

fn flatten_into<'a>(chapters: &'a [Chapter], out: &mut Vec<&'a Heading>) {
    for chapter in chapters {
        out.push(&chapter.heading);
        flatten_into(&chapter.children, out);
    }
}

/// Number of chapters in the tree
pub fn count(chapters: &[Chapter]) -> usize {
    chapters.iter().map(|c| 1 + count(&c.children)).sum()
}

/// Child-index path to the chapter containing `render_index`.
///
/// The containing chapter is the last one, in reading order, whose resolved
/// render index is at or before `render_index`. Unresolved headings are skipped.
pub fn find_current(chapters: &[Chapter], render_index: usize) -> Option<Vec<usize>> {
    let mut best: Option<Vec<usize>> = None;
    let mut path = Vec::new();
    find_current_into(chapters, render_index, &mut path, &mut best);
    best
}

fn find_current_into(
    chapters: &[Chapter],
    render_index: usize,
    path: &mut Vec<usize>,
    best: &mut Option<Vec<usize>>,
) {
    for (i, chapter) in chapters.iter().enumerate() {
        path.push(i);
        if let Some(start) = chapter.heading.render_index {
            if start <= render_index {
                *best = Some(path.clone());
            }
        }
        find_current_into(&chapter.children, render_index, path, best);
        path.pop();
    }
}

/// Follow a child-index path from the roots
pub fn at_path<'a>(chapters: &'a [Chapter], path: &[usize]) -> Option<&'a Chapter> {
    let (first, rest) = path.split_first()?;
    let mut node = chapters.get(*first)?;
    for i in rest {
        node = node.children.get(*i)?;
    }
    Some(node)
}
