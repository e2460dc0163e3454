//! Indentation-based chunker for Python sources.
//!
//! Produces top-level functions, class headers, methods (`Class.method`) and
//! the non-mutable code between them. Every line lands in exactly one chunk,
//! so concatenating the chunks reproduces the input byte-for-byte.

use crate::collaborators::Chunker;
use crate::error::{MortError, Result};
use crate::types::{Chunk, ChunkContext, ChunkType, FileData};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct IndentChunker;

impl Chunker for IndentChunker {
    fn extract_chunks(&self, code: &str, file_path: &str) -> Result<FileData> {
        let lines = split_lines(code);
        let infos = scan_lines(&lines);
        let mut builder = Builder::new(&lines, &infos);
        builder.module();

        let data = FileData::new(file_path, builder.chunks, code);
        if !data.reconstructs_exactly() {
            return Err(MortError::Chunking(format!(
                "chunks of {} do not reconstruct the file",
                file_path
            )));
        }

        log::info!(
            "Extracted {} chunks ({} mutable) from {}",
            data.chunks.len(),
            data.mutable_chunks().len(),
            file_path
        );
        Ok(data)
    }
}

fn split_lines(code: &str) -> Vec<&str> {
    code.split_inclusive('\n').collect()
}

/// Per-physical-line facts needed to find block boundaries.
#[derive(Debug, Clone, Copy, Default)]
struct LineInfo {
    indent: usize,
    blank: bool,
    comment: bool,
    /// False for lines continuing a bracket, backslash or triple-quoted string
    starts_logical: bool,
}

impl LineInfo {
    fn is_code(&self) -> bool {
        self.starts_logical && !self.blank && !self.comment
    }
}

fn scan_lines(lines: &[&str]) -> Vec<LineInfo> {
    let mut depth = 0usize;
    // Open triple-quote delimiter carried across lines
    let mut triple: Option<char> = None;
    let mut continued = false;

    lines
        .iter()
        .map(|line| {
            let trimmed = line.trim();
            let info = LineInfo {
                indent: indent_width(line),
                blank: trimmed.is_empty(),
                comment: trimmed.starts_with('#'),
                starts_logical: depth == 0 && triple.is_none() && !continued,
            };
            continued = scan_line(line, &mut depth, &mut triple);
            info
        })
        .collect()
}

/// Update bracket depth and string state for one line; returns whether the
/// line ends in a backslash continuation.
fn scan_line(line: &str, depth: &mut usize, triple: &mut Option<char>) -> bool {
    let chars: Vec<char> = line.trim_end_matches(['\n', '\r']).chars().collect();
    let mut single: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = *triple {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q && triple_at(&chars, i, q) {
                *triple = None;
                i += 3;
                continue;
            }
            i += 1;
            continue;
        }
        if let Some(q) = single {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                single = None;
            }
            i += 1;
            continue;
        }

        match c {
            '#' => break,
            '"' | '\'' if triple_at(&chars, i, c) => {
                *triple = Some(c);
                i += 3;
                continue;
            }
            '"' | '\'' => single = Some(c),
            '(' | '[' | '{' => *depth += 1,
            ')' | ']' | '}' => *depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }

    triple.is_none() && single.is_none() && chars.last() == Some(&'\\')
}

fn triple_at(chars: &[char], i: usize, q: char) -> bool {
    chars.get(i) == Some(&q) && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q)
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefKind {
    Function,
    Class,
}

/// `def name`, `async def name` or `class Name` at the start of `trimmed`.
fn parse_def(trimmed: &str) -> Option<(DefKind, String)> {
    let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("async def ") {
        (DefKind::Function, rest)
    } else if let Some(rest) = trimmed.strip_prefix("def ") {
        (DefKind::Function, rest)
    } else if let Some(rest) = trimmed.strip_prefix("class ") {
        (DefKind::Class, rest)
    } else {
        return None;
    };

    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some((kind, name))
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// A definition found at some indentation level.
struct Def {
    /// First line, decorators included
    start: usize,
    /// The `def`/`class` line
    header: usize,
    kind: DefKind,
    name: String,
}

struct Builder<'a> {
    lines: &'a [&'a str],
    infos: &'a [LineInfo],
    chunks: Vec<Chunk>,
    gap_counter: usize,
    seen_ids: HashMap<String, usize>,
}

impl<'a> Builder<'a> {
    fn new(lines: &'a [&'a str], infos: &'a [LineInfo]) -> Self {
        Self {
            lines,
            infos,
            chunks: Vec::new(),
            gap_counter: 0,
            seen_ids: HashMap::new(),
        }
    }

    fn module(&mut self) {
        let n = self.lines.len();
        let mut gap_start = 0;
        let mut i = 0;

        while i < n {
            let Some(def) = self.def_at(i, 0) else {
                i += 1;
                continue;
            };

            self.gap(gap_start, i, None);
            let body_end = self.block_end(def.header, 0);
            let end = self.extend_blanks(body_end, n);
            match def.kind {
                DefKind::Function => self.function(&def, end, None),
                DefKind::Class => self.class(&def, body_end, end),
            }
            i = end;
            gap_start = end;
        }
        self.gap(gap_start, n, None);
    }

    /// A definition (possibly decorated) starting at line `i` with `indent`.
    fn def_at(&self, i: usize, indent: usize) -> Option<Def> {
        let info = self.infos[i];
        if !info.is_code() || info.indent != indent {
            return None;
        }

        let mut header = i;
        loop {
            let trimmed = self.lines[header].trim();
            if let Some((kind, name)) = parse_def(trimmed) {
                return Some(Def {
                    start: i,
                    header,
                    kind,
                    name,
                });
            }
            if !trimmed.starts_with('@') {
                return None;
            }
            // Skip the rest of the decorator (it may span lines) and any
            // comments before the next logical line.
            header += 1;
            while header < self.lines.len() && !self.infos[header].is_code() {
                header += 1;
            }
            if header >= self.lines.len() || self.infos[header].indent != indent {
                return None;
            }
        }
    }

    /// Exclusive end of the block whose header is on line `header`: the line
    /// after the last body line deeper than `indent`.
    fn block_end(&self, header: usize, indent: usize) -> usize {
        let mut last = header;
        for j in header + 1..self.lines.len() {
            let info = self.infos[j];
            if info.blank || (info.starts_logical && info.comment) {
                continue;
            }
            if !info.starts_logical || info.indent > indent {
                last = j;
            } else {
                break;
            }
        }
        last + 1
    }

    fn extend_blanks(&self, mut end: usize, limit: usize) -> usize {
        while end < limit && self.infos[end].blank {
            end += 1;
        }
        end
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.lines[start..end].concat()
    }

    fn decorators(&self, def: &Def) -> Vec<String> {
        (def.start..def.header)
            .filter(|&j| self.infos[j].is_code() && self.lines[j].trim().starts_with('@'))
            .map(|j| self.lines[j].trim().to_string())
            .collect()
    }

    fn unique_id(&mut self, base: String) -> String {
        let count = self.seen_ids.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{}_{}", base, count)
        }
    }

    fn context(&self, def: Option<&Def>, start: usize, end: usize) -> ChunkContext {
        ChunkContext {
            parent_class: None,
            class_header: None,
            line_start: start + 1,
            line_end: end,
            indentation: def.map(|d| self.infos[d.header].indent).unwrap_or(0),
            decorators: def.map(|d| self.decorators(d)).unwrap_or_default(),
        }
    }

    fn gap(&mut self, start: usize, end: usize, class: Option<(&str, &str)>) {
        if start >= end {
            return;
        }
        let chunk_id = format!("gap_{}", self.gap_counter);
        self.gap_counter += 1;

        let mut context = self.context(None, start, end);
        if let Some((name, header)) = class {
            context.parent_class = Some(name.to_string());
            context.class_header = Some(header.to_string());
        }
        self.chunks.push(Chunk {
            chunk_id,
            chunk_type: ChunkType::Gap,
            original_code: self.text(start, end),
            is_mutable: false,
            context,
        });
    }

    fn function(&mut self, def: &Def, end: usize, class: Option<(&str, &str)>) {
        let mut context = self.context(Some(def), def.start, end);
        let (chunk_type, base_id) = match class {
            Some((name, header)) => {
                context.parent_class = Some(name.to_string());
                context.class_header = Some(header.to_string());
                (ChunkType::Method, format!("{}.{}", name, def.name))
            }
            None => (ChunkType::Function, def.name.clone()),
        };

        let chunk_id = self.unique_id(base_id);
        self.chunks.push(Chunk {
            chunk_id,
            chunk_type,
            original_code: self.text(def.start, end),
            is_mutable: !is_dunder(&def.name),
            context,
        });
    }

    /// `body_end` excludes trailing blank lines; `end` includes them.
    fn class(&mut self, def: &Def, body_end: usize, end: usize) {
        let body_indent = (def.header + 1..body_end)
            .find(|&j| self.infos[j].is_code())
            .map(|j| self.infos[j].indent);

        let first_method = body_indent.and_then(|indent| {
            (def.header + 1..body_end).find(|&j| {
                self.def_at(j, indent)
                    .map(|d| d.kind == DefKind::Function)
                    .unwrap_or(false)
            })
        });

        let (Some(indent), Some(first_method)) = (body_indent, first_method) else {
            // No methods: the class is mutated as a whole.
            let chunk_id = self.unique_id(def.name.clone());
            let context = self.context(Some(def), def.start, end);
            self.chunks.push(Chunk {
                chunk_id,
                chunk_type: ChunkType::Class,
                original_code: self.text(def.start, end),
                is_mutable: true,
                context,
            });
            return;
        };

        let header_text = self.text(def.start, first_method);
        let chunk_id = self.unique_id(def.name.clone());
        let context = self.context(Some(def), def.start, first_method);
        self.chunks.push(Chunk {
            chunk_id,
            chunk_type: ChunkType::Class,
            original_code: header_text.clone(),
            is_mutable: false,
            context,
        });

        let class = (def.name.as_str(), header_text.as_str());
        let mut p = first_method;
        let mut gap_start = first_method;
        while p < body_end {
            match self.def_at(p, indent).filter(|d| d.kind == DefKind::Function) {
                Some(method) => {
                    self.gap(gap_start, p, Some(class));
                    let method_end = self.block_end(method.header, indent).min(body_end);
                    let method_end = self.extend_blanks(method_end, end);
                    self.function(&method, method_end, Some(class));
                    p = method_end;
                    gap_start = method_end;
                }
                None => p += 1,
            }
        }
        self.gap(gap_start, end, Some(class));
    }
}
