use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use polars::prelude::{DataFrame, PolarsResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TransformError;

type TransformFn = dyn Fn(DataFrame) -> PolarsResult<DataFrame> + Send + Sync;

/// One declarative reshaping step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum TransformStep {
    /// Drop columns by name. Every name must exist.
    Drop { columns: Vec<String> },
    /// Drop columns by 0-based position in the frame as it was before this step.
    DropPositions { positions: Vec<usize> },
    /// Rename columns (`old -> new`); names absent from the frame are ignored.
    Rename { columns: BTreeMap<String, String> },
    /// Keep only these columns, in this order.
    Select { columns: Vec<String> },
}

impl TransformStep {
    fn apply(&self, mut df: DataFrame) -> Result<DataFrame, TransformError> {
        match self {
            Self::Drop { columns } => {
                for column in columns {
                    df = df.drop(column)?;
                }
                Ok(df)
            }
            Self::DropPositions { positions } => {
                let names: Vec<String> = df
                    .get_column_names()
                    .iter()
                    .map(|name| name.to_string())
                    .collect();
                let mut targets = Vec::with_capacity(positions.len());
                for &position in positions {
                    let name = names.get(position).ok_or(TransformError::PositionOutOfRange {
                        position,
                        width: names.len(),
                    })?;
                    targets.push(name.clone());
                }
                for name in &targets {
                    df = df.drop(name)?;
                }
                Ok(df)
            }
            Self::Rename { columns } => {
                for (old, new) in columns {
                    if df.column(old).is_err() {
                        warn!(column = %old, "Rename target not present; skipping");
                        continue;
                    }
                    df.rename(old, new.as_str().into())?;
                }
                Ok(df)
            }
            Self::Select { columns } => Ok(df.select(columns.iter().map(String::as_str))?),
        }
    }
}

/// Reshaping hook applied between parse and load.
///
/// `Identity` stands in for "no transform" so orchestration never checks for
/// an empty slot.
#[derive(Clone, Default)]
pub enum Transform {
    #[default]
    Identity,
    Steps(Vec<TransformStep>),
    Custom(Arc<TransformFn>),
}

impl Transform {
    /// Wrap an arbitrary `DataFrame -> DataFrame` function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(DataFrame) -> PolarsResult<DataFrame> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn steps(steps: impl IntoIterator<Item = TransformStep>) -> Self {
        let steps: Vec<TransformStep> = steps.into_iter().collect();
        if steps.is_empty() {
            Self::Identity
        } else {
            Self::Steps(steps)
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Short human-readable label.
    pub fn describe(&self) -> String {
        match self {
            Self::Identity => "identity".to_string(),
            Self::Steps(steps) if steps.len() == 1 => "1 step".to_string(),
            Self::Steps(steps) => format!("{} steps", steps.len()),
            Self::Custom(_) => "custom".to_string(),
        }
    }

    /// `self` unless it is the identity, in which case `fallback`.
    pub fn or<'a>(&'a self, fallback: &'a Transform) -> &'a Transform {
        if self.is_identity() {
            fallback
        } else {
            self
        }
    }

    pub fn apply(&self, df: DataFrame) -> Result<DataFrame, TransformError> {
        match self {
            Self::Identity => Ok(df),
            Self::Steps(steps) => steps.iter().try_fold(df, |df, step| step.apply(df)),
            Self::Custom(f) => Ok(f(df)?),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Steps(steps) => f.debug_tuple("Steps").field(steps).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
