//! Action generators: lazy producers of candidate tuning actions.

pub mod indexes;
pub mod knobs;

use crate::facts::FactsError;
use crate::models::Action;
use itertools::Itertools;
use snafu::Snafu;
use std::collections::HashSet;
use std::fmt;

pub use indexes::{
    DropIndexArgs, DropIndexGenerator, ExhaustiveIndexArgs, ExhaustiveIndexGenerator,
    TypedIndexArgs, TypedIndexGenerator, WorkloadIndexArgs, WorkloadIndexGenerator,
};
pub use knobs::{
    CategoricalKnobArgs, CategoricalKnobGenerator, KnobMode, NumericalKnobArgs,
    NumericalKnobGenerator,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GeneratorError {
    #[snafu(display("{}", source))]
    Facts { source: FactsError },

    #[snafu(display(
        "Parameter {} has type {}, expected integer or real",
        parameter,
        vartype
    ))]
    NotNumeric {
        parameter: String,
        vartype: &'static str,
    },

    #[snafu(display(
        "Parameter {} has no numeric current value: {:?}",
        parameter,
        value
    ))]
    NoCurrentValue { parameter: String, value: String },

    #[snafu(display("Sweep interval must be positive, got {}", interval))]
    InvalidInterval { interval: f64 },

    #[snafu(display(
        "Value {} for parameter {} is outside its legal range [{}, {}]",
        value,
        parameter,
        min,
        max
    ))]
    OutOfRange {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// A fresh, finite pass over a generator's actions.
pub type ActionStream<'a> = Box<dyn Iterator<Item = Result<Action, GeneratorError>> + 'a>;

pub trait ActionGenerator: fmt::Debug + Send + Sync {
    /// Starts a new pass. Each call yields the same sequence.
    fn actions(&self) -> ActionStream<'_>;

    /// Non-fatal findings collected while the generator was built.
    fn diagnostics(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Every ordered selection of `width` columns, for widths 1 through
/// `max_width`, skipping selections already yielded through `seen`.
pub(crate) fn column_permutations<'a>(
    table: &'a str,
    column_sets: Vec<Vec<String>>,
    max_width: usize,
) -> impl Iterator<Item = (&'a str, Vec<String>)> + 'a {
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    (1..=max_width)
        .flat_map(move |width| {
            column_sets
                .clone()
                .into_iter()
                .filter(move |columns| columns.len() >= width)
                .flat_map(move |columns| columns.into_iter().permutations(width))
        })
        .filter(move |perm| seen.insert(perm.clone()))
        .map(move |perm| (table, perm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn permutations_cover_each_width() {
        let perms: Vec<_> = column_permutations("t", vec![cols(&["a", "b", "c"])], 2)
            .map(|(_, perm)| perm)
            .collect();
        assert_eq!(perms.len(), 3 + 6);
        assert_eq!(perms[0], cols(&["a"]));
        assert_eq!(perms[3], cols(&["a", "b"]));
    }

    #[test]
    fn overlapping_sets_are_deduplicated() {
        let perms: Vec<_> = column_permutations(
            "t",
            vec![cols(&["a", "b"]), cols(&["b", "a"]), cols(&["a"])],
            2,
        )
        .map(|(_, perm)| perm)
        .collect();
        assert_eq!(
            perms,
            vec![cols(&["a"]), cols(&["b"]), cols(&["a", "b"]), cols(&["b", "a"])]
        );
    }

    #[test]
    fn widths_beyond_the_set_are_skipped() {
        let count = column_permutations("t", vec![cols(&["a"])], 3).count();
        assert_eq!(count, 1);
    }
}
