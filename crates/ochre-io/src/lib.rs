//! IO helpers for Ochre
//!
//! Reads sparse matrices from Matrix-Market coordinate files:
//!
//! ```text
//! %%MatrixMarket matrix coordinate real symmetric
//! % comments
//! nrows ncols nnz
//! row col value        (one-based indices)
//! ```
//!
//! Supported declarations are `coordinate` `real`/`pattern` with
//! `general`/`symmetric` symmetry. Entries come back as zero-based
//! [`Triplet`]s sorted row-major with ascending columns; symmetric files
//! have their off-diagonal entries mirrored so the result always holds the
//! full matrix, which is what the staging representation expects.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ochre_core::{Error, Index, Result, Triplet, Value};

/// Value field of a Matrix-Market declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Real,
    /// Structure only; every entry has the implied value 1.
    Pattern,
}

/// Symmetry of a Matrix-Market declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symmetry {
    General,
    Symmetric,
}

/// A matrix read from a Matrix-Market source.
#[derive(Debug, Clone)]
pub struct MarketMatrix<T, I> {
    pub nrows: usize,
    pub ncols: usize,
    /// Whether the file declared itself symmetric. Entries are already
    /// mirrored; the flag records the declaration for the engine.
    pub symmetric: bool,
    pub entries: Vec<Triplet<T, I>>,
}

impl<T, I> MarketMatrix<T, I> {
    /// Number of stored entries after symmetric expansion.
    #[inline]
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }
}

fn parse_err(line: usize, msg: impl Into<String>) -> Error {
    Error::Parse {
        line,
        msg: msg.into(),
    }
}

fn parse_banner(line: &str, lineno: usize) -> Result<(Field, Symmetry)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 5 || !tokens[0].eq_ignore_ascii_case("%%MatrixMarket") {
        return Err(parse_err(lineno, "malformed MatrixMarket banner"));
    }
    if !tokens[1].eq_ignore_ascii_case("matrix") {
        return Err(Error::Unsupported(format!("object `{}`", tokens[1])));
    }
    if !tokens[2].eq_ignore_ascii_case("coordinate") {
        return Err(Error::Unsupported(format!("format `{}`", tokens[2])));
    }
    let field = if tokens[3].eq_ignore_ascii_case("real") {
        Field::Real
    } else if tokens[3].eq_ignore_ascii_case("pattern") {
        Field::Pattern
    } else {
        return Err(Error::Unsupported(format!("field `{}`", tokens[3])));
    };
    let symmetry = if tokens[4].eq_ignore_ascii_case("general") {
        Symmetry::General
    } else if tokens[4].eq_ignore_ascii_case("symmetric") {
        Symmetry::Symmetric
    } else {
        return Err(Error::Unsupported(format!("symmetry `{}`", tokens[4])));
    };
    Ok((field, symmetry))
}

fn parse_index<I: Index>(token: &str, bound: usize, lineno: usize) -> Result<I> {
    let one_based: usize = token
        .parse()
        .map_err(|_| parse_err(lineno, format!("bad index `{token}`")))?;
    if one_based == 0 || one_based > bound {
        return Err(parse_err(
            lineno,
            format!("index {one_based} outside [1, {bound}]"),
        ));
    }
    Ok(I::from_usize(one_based - 1))
}

/// Reads a Matrix-Market coordinate matrix from any buffered reader.
pub fn read_market<T: Value, I: Index, R: BufRead>(reader: R) -> Result<MarketMatrix<T, I>> {
    let mut lines = reader.lines();
    let mut lineno = 0usize;

    let banner = loop {
        match lines.next() {
            Some(line) => {
                lineno += 1;
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(parse_err(lineno, "empty input")),
        }
    };
    let (field, symmetry) = parse_banner(&banner, lineno)?;

    // Skip comments and blank lines up to the dimension line.
    let dims = loop {
        match lines.next() {
            Some(line) => {
                lineno += 1;
                let line = line?;
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('%') {
                    break line;
                }
            }
            None => return Err(parse_err(lineno, "missing dimension line")),
        }
    };
    let mut it = dims.split_whitespace();
    let mut next_dim = |name: &str| -> Result<usize> {
        it.next()
            .ok_or_else(|| parse_err(lineno, format!("missing {name}")))?
            .parse()
            .map_err(|_| parse_err(lineno, format!("bad {name}")))
    };
    let nrows = next_dim("nrows")?;
    let ncols = next_dim("ncols")?;
    let declared_nnz = next_dim("nnz")?;

    let mut entries: Vec<Triplet<T, I>> = Vec::with_capacity(match symmetry {
        Symmetry::Symmetric => declared_nnz * 2,
        Symmetry::General => declared_nnz,
    });
    let mut seen = 0usize;
    for line in lines {
        lineno += 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        if seen == declared_nnz {
            return Err(parse_err(lineno, "more entries than declared"));
        }
        let mut tokens = trimmed.split_whitespace();
        let row: I = parse_index(
            tokens.next().ok_or_else(|| parse_err(lineno, "missing row"))?,
            nrows,
            lineno,
        )?;
        let col: I = parse_index(
            tokens
                .next()
                .ok_or_else(|| parse_err(lineno, "missing column"))?,
            ncols,
            lineno,
        )?;
        let value = match field {
            Field::Pattern => T::one(),
            Field::Real => {
                let token = tokens
                    .next()
                    .ok_or_else(|| parse_err(lineno, "missing value"))?;
                let parsed: f64 = token
                    .parse()
                    .map_err(|_| parse_err(lineno, format!("bad value `{token}`")))?;
                T::from(parsed)
                    .ok_or_else(|| parse_err(lineno, format!("value `{token}` not representable")))?
            }
        };
        if tokens.next().is_some() {
            return Err(parse_err(lineno, "trailing tokens on entry line"));
        }
        entries.push(Triplet::new(row, col, value));
        if symmetry == Symmetry::Symmetric && row != col {
            entries.push(Triplet::new(col, row, value));
        }
        seen += 1;
    }
    if seen != declared_nnz {
        return Err(parse_err(
            lineno,
            format!("expected {declared_nnz} entries, found {seen}"),
        ));
    }

    entries.sort_unstable_by_key(|t| (t.row.as_usize(), t.col.as_usize()));

    Ok(MarketMatrix {
        nrows,
        ncols,
        symmetric: symmetry == Symmetry::Symmetric,
        entries,
    })
}

/// Reads a Matrix-Market coordinate matrix from a file path.
pub fn read_market_path<T: Value, I: Index>(path: impl AsRef<Path>) -> Result<MarketMatrix<T, I>> {
    let file = File::open(path)?;
    read_market(BufReader::new(file))
}
