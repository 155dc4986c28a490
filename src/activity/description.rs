//! Description composition.
//!
//! A description is a list of blocks separated by blank lines; the string
//! form is a deterministic rendering. Enricher contributions either append an
//! anonymous block or replace the block owning their section header.
//!
//! Uniform header rule: when a contribution declares a header, the rendered
//! block's first line starts with that header (it is prepended when the body
//! does not already carry it). Replacement matches the first line of each
//! existing block against the header, so merging is a list mutation, not
//! string surgery.

/// Block separator in the rendered form.
const SEPARATOR: &str = "\n\n";

/// A composed description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Description {
    blocks: Vec<String>,
}

impl Description {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a rendered description back into blocks.
    ///
    /// Blank-line runs collapse; `parse(render(d)) == d` for any description
    /// built through [`Description::contribute`].
    pub fn parse(text: &str) -> Self {
        let blocks = text
            .split(SEPARATOR)
            .map(str::trim_end)
            .filter(|block| !block.trim().is_empty())
            .map(str::to_string)
            .collect();
        Self { blocks }
    }

    /// Deterministic string rendering.
    pub fn render(&self) -> String {
        self.blocks.join(SEPARATOR)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Apply one enricher contribution.
    ///
    /// With a header the section is upserted; without one the body is
    /// appended as an anonymous block.
    pub fn contribute(&mut self, header: Option<&str>, body: &str) {
        match header {
            Some(header) if !header.trim().is_empty() => self.upsert_section(header, body),
            _ => self.append(body),
        }
    }

    /// Append an anonymous block. Empty bodies are dropped.
    pub fn append(&mut self, body: &str) {
        let body = body.trim_end();
        if body.trim().is_empty() {
            return;
        }
        self.blocks.push(body.to_string());
    }

    /// Replace the block owning `header`, or append it when absent.
    pub fn upsert_section(&mut self, header: &str, body: &str) {
        let rendered = render_section(header, body);
        match self.blocks.iter_mut().find(|block| owns_header(block, header)) {
            Some(block) => *block = rendered,
            None => self.blocks.push(rendered),
        }
    }

    /// Merge another description into this one, block by block.
    ///
    /// Blocks are keyed by [`block_key`]: a matching key replaces, a new key
    /// appends, and exact duplicates are left alone. Used on uploads in
    /// update mode, where the remote description may have drifted (user
    /// edits) since the original upload. Idempotent: merging the same
    /// description twice equals merging it once.
    pub fn merge_with(&mut self, incoming: &Description) {
        for block in &incoming.blocks {
            if self.blocks.iter().any(|existing| existing == block) {
                continue;
            }
            let key = block_key(block);
            match self
                .blocks
                .iter_mut()
                .find(|existing| block_key(existing) == key)
            {
                Some(existing) => *existing = block.clone(),
                None => self.blocks.push(block.clone()),
            }
        }
    }

    /// The block owning `header`, when present.
    pub fn section(&self, header: &str) -> Option<&str> {
        self.blocks
            .iter()
            .find(|block| owns_header(block, header))
            .map(String::as_str)
    }
}

/// Render one section: the first line carries the header.
fn render_section(header: &str, body: &str) -> String {
    let body = body.trim_end();
    if body.starts_with(header) {
        body.to_string()
    } else if body.trim().is_empty() {
        header.to_string()
    } else {
        format!("{header}\n{body}")
    }
}

fn first_line(block: &str) -> &str {
    block.lines().next().unwrap_or("")
}

/// Canonical section key of a block: the first line through its first colon
/// (headers end with one), or the whole first line otherwise.
fn block_key(block: &str) -> &str {
    let first = first_line(block);
    match first.find(':') {
        Some(idx) => &first[..=idx],
        None => first,
    }
}

/// A block owns a header when its first line starts with it.
fn owns_header(block: &str, header: &str) -> bool {
    block
        .lines()
        .next()
        .map(|first| first.starts_with(header))
        .unwrap_or(false)
}

/// Merge one contribution into an already-rendered description.
///
/// Used by uploaders when updating a remote activity: the remote description
/// is parsed, the new section merged under the same rules as the enricher
/// engine, and the result rendered back.
pub fn merge_contribution(existing: &str, header: Option<&str>, body: &str) -> String {
    let mut description = Description::parse(existing);
    description.contribute(header, body);
    description.render()
}
