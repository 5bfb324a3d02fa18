use std::ops::Range;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{Asset, Catalog};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgramError {
    #[error("catalog has no assets")]
    EmptyCatalog,
    #[error("catalog must be reordered before cutting a program")]
    Unordered,
    #[error("catalog exhausted: window ending at {end} cannot grow past {len} assets")]
    CatalogExhausted { end: usize, len: usize },
}

pub type ProgramResult<T> = std::result::Result<T, ProgramError>;

/// One cycle's content: the half-open window `[start, end)` over the live catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Program {
    start: usize,
    end: usize,
}

impl Program {
    /// Cuts the first window of `catalog` whose running duration reaches `target`.
    ///
    /// The first guess is `target / mean duration` assets; it only ever grows from
    /// there, until the target is met or the catalog runs out.
    pub fn make(catalog: &Catalog, target: Duration) -> ProgramResult<Self> {
        if catalog.is_empty() {
            return Err(ProgramError::EmptyCatalog);
        }
        if !catalog.is_ordered() {
            return Err(ProgramError::Unordered);
        }
        let len = catalog.len();
        let total = catalog
            .cumulative_duration(len - 1)
            .ok_or(ProgramError::Unordered)?;
        let average = total.as_secs_f64() / len as f64;

        let mut n = if average > 0.0 {
            ((target.as_secs_f64() / average).floor() as usize).max(1)
        } else {
            len
        };
        if n >= len {
            return Ok(Self { start: 0, end: len });
        }
        while n < len
            && catalog
                .cumulative_duration(n - 1)
                .map(|covered| covered < target)
                .unwrap_or(false)
        {
            n += 1;
        }
        Ok(Self { start: 0, end: n })
    }

    /// The next cycle's window: starts where this one ended and doubles the end.
    ///
    /// Fails with `CatalogExhausted` once the doubled end reaches the catalog
    /// length; the caller is expected to reshuffle and `make` a fresh program.
    pub fn advance(&self, catalog: &Catalog) -> ProgramResult<Self> {
        let len = catalog.len();
        let end = self.end.saturating_mul(2);
        if end >= len {
            return Err(ProgramError::CatalogExhausted { end: self.end, len });
        }
        Ok(Self {
            start: self.end,
            end,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn assets<'a>(&self, catalog: &'a Catalog) -> &'a [Asset] {
        catalog.window(self)
    }

    pub fn duration(&self, catalog: &Catalog) -> Duration {
        self.assets(catalog).iter().map(|asset| asset.duration).sum()
    }
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
