//! Linear models: sums of weighted products of descriptors.
//!
//! A [`Model`] goes through two phases. While it is being built, terms are
//! added with [`Model::add_term`] and descriptors eliminated with
//! [`Model::substitute`]; both need `&mut self`. Afterwards the model is read
//! through `&self`, typically many times and possibly from several threads:
//! [`Model::descriptors`] gives the value layout, [`Model::normalize`] and
//! [`Model::evaluate`] work on value vectors following that layout.
//!
//! Everything the read side needs is derived from the term list on first use
//! and cached. Any mutation drops every cache at once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use tracing::debug;

use crate::descriptor::{CoverageDescriptor, Descriptor};
use crate::error::{ModelError, Result};
use crate::term::Term;

/// Term list compiled to positions in [`Model::descriptors`].
#[derive(Debug, Clone)]
struct EvaluationCache {
    index: Vec<Box<[usize]>>,
    coefficients: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Model<D, T = String> {
    target: T,
    terms: Vec<Term<D>>,
    descriptors: OnceLock<Vec<D>>,
    evaluation: OnceLock<EvaluationCache>,
    /// Positions in `descriptors` whose normalization is not the identity.
    normalization: OnceLock<Vec<usize>>,
}

/// Model over coverage descriptors, labelled by the name of the layer it computes.
pub type CoverageModel = Model<CoverageDescriptor, String>;

impl<D: Descriptor, T> Model<D, T> {
    /// Creates a model for `target`.
    ///
    /// The initial terms go through [`add_term`](Self::add_term) one by one,
    /// so `terms()` holds one term per distinct factor multiset and may be
    /// shorter than the input: `[2·a·b, c, 1·b·a]` becomes `[3·a·b, c]`.
    pub fn new(target: T, terms: impl IntoIterator<Item = Term<D>>) -> Self {
        let mut model = Self {
            target,
            terms: Vec::new(),
            descriptors: OnceLock::new(),
            evaluation: OnceLock::new(),
            normalization: OnceLock::new(),
        };
        for term in terms {
            model.merge(term);
        }
        model
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn terms(&self) -> &[Term<D>] {
        &self.terms
    }

    /// Adds `term`, summing its coefficient into an existing term with the
    /// same factors if there is one.
    pub fn add_term(&mut self, term: Term<D>) {
        self.merge(term);
        self.invalidate();
    }

    /// Replaces every occurrence of `descriptor` by the sum of `expansion`,
    /// distributing the products.
    ///
    /// Returns how many (term, expansion term) products were inserted. The
    /// model is left untouched when an error is returned.
    pub fn substitute(&mut self, descriptor: &D, expansion: &[Term<D>]) -> Result<usize> {
        if !descriptor.normalization().is_identity() {
            return Err(ModelError::UnsupportedSubstitution {
                descriptor: descriptor.name().to_string(),
            });
        }
        if expansion.iter().any(|term| term.contains(descriptor)) {
            return Err(ModelError::RecursiveSubstitution {
                descriptor: descriptor.name().to_string(),
            });
        }
        if let Some(factor) = expansion
            .iter()
            .flat_map(|term| &term.descriptors)
            .find(|d| !d.normalization().is_identity())
        {
            return Err(ModelError::UnsupportedSubstitution {
                descriptor: factor.name().to_string(),
            });
        }

        let mut total = 0;
        loop {
            let (matched, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.terms)
                .into_iter()
                .partition(|term| term.contains(descriptor));
            self.terms = kept;

            let mut count = 0;
            for term in matched {
                let Some(position) = term.descriptors.iter().position(|d| d == descriptor) else {
                    continue;
                };
                let mut remaining = term.descriptors;
                remaining.remove(position);
                for factor in expansion {
                    let mut descriptors =
                        Vec::with_capacity(remaining.len() + factor.descriptors.len());
                    descriptors.extend_from_slice(&remaining);
                    descriptors.extend_from_slice(&factor.descriptors);
                    self.merge(Term::new(term.coefficient * factor.coefficient, descriptors));
                    count += 1;
                }
            }
            if count == 0 {
                break;
            }
            debug!(
                descriptor = descriptor.name(),
                count, "substitution pass inserted terms"
            );
            total += count;
        }

        self.invalidate();
        Ok(total)
    }

    /// Every descriptor used by the model, once, in ascending order.
    pub fn descriptors(&self) -> &[D] {
        self.descriptors.get_or_init(|| {
            let unique: HashSet<&D> = self
                .terms
                .iter()
                .flat_map(|term| &term.descriptors)
                .collect();
            let mut descriptors: Vec<D> = unique.into_iter().cloned().collect();
            descriptors.sort_unstable();
            descriptors
        })
    }

    /// Computes the model value. `values[i]` is the value of `descriptors()[i]`.
    ///
    /// # Panics
    ///
    /// Panics if `values` is shorter than [`descriptors`](Self::descriptors).
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        let cache = self.evaluation_cache();
        cache
            .index
            .iter()
            .zip(&cache.coefficients)
            .map(|(index, &coefficient)| index.iter().fold(coefficient, |p, &i| p * values[i]))
            .sum()
    }

    /// Applies each descriptor's normalization to its slot of `values`, in place.
    ///
    /// # Panics
    ///
    /// Panics if `values` is shorter than [`descriptors`](Self::descriptors).
    pub fn normalize(&self, values: &mut [f64]) {
        let descriptors = self.descriptors();
        let positions = self.normalization.get_or_init(|| {
            descriptors
                .iter()
                .enumerate()
                .filter(|(_, d)| !d.normalization().is_identity())
                .map(|(i, _)| i)
                .collect()
        });
        for &i in positions {
            values[i] = descriptors[i].normalization().normalize(values[i]);
        }
    }

    fn evaluation_cache(&self) -> &EvaluationCache {
        self.evaluation.get_or_init(|| {
            let positions: HashMap<&D, usize> = self
                .descriptors()
                .iter()
                .enumerate()
                .map(|(i, d)| (d, i))
                .collect();
            let index = self
                .terms
                .iter()
                .map(|term| term.descriptors.iter().map(|d| positions[d]).collect())
                .collect();
            let coefficients = self.terms.iter().map(|term| term.coefficient).collect();
            debug!(
                terms = self.terms.len(),
                descriptors = positions.len(),
                "compiled evaluation cache"
            );
            EvaluationCache {
                index,
                coefficients,
            }
        })
    }

    /// Scans from the end for a term with the same factors.
    fn merge(&mut self, term: Term<D>) {
        match self
            .terms
            .iter_mut()
            .rev()
            .find(|existing| existing.same_factors(&term))
        {
            Some(existing) => existing.coefficient += term.coefficient,
            None => self.terms.push(term),
        }
    }

    fn invalidate(&mut self) {
        self.descriptors.take();
        self.evaluation.take();
        self.normalization.take();
    }
}

impl<D: fmt::Display, T: fmt::Display> fmt::Display for Model<D, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} =", self.target)?;
        if self.terms.is_empty() {
            return f.write_str(" 0");
        }
        for (i, term) in self.terms.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", term)?;
            } else {
                write!(f, " + {}", term)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::Distribution;

    const EPSILON: f64 = 1e-9;

    fn descriptor(name: &str) -> CoverageDescriptor {
        CoverageDescriptor::new(name, name.to_uppercase())
    }

    fn term(coefficient: f64, descriptors: &[&CoverageDescriptor]) -> Term<CoverageDescriptor> {
        Term::new(coefficient, descriptors.iter().map(|&d| d.clone()).collect())
    }

    #[test]
    fn test_merge_terms_with_same_factors() {
        let (a, b) = (descriptor("a"), descriptor("b"));
        let mut model = Model::new("m".to_string(), vec![term(1.5, &[&a, &b])]);
        model.add_term(term(2.0, &[&b, &a]));

        assert_eq!(model.terms().len(), 1);
        assert!((model.terms()[0].coefficient - 3.5).abs() < EPSILON);
        assert_eq!(model.terms()[0].descriptors, vec![a, b]);
    }

    #[test]
    fn test_distinct_factors_never_merge() {
        let (a, b) = (descriptor("a"), descriptor("b"));
        let mut model = Model::new("m".to_string(), vec![term(1.0, &[&a, &a, &b])]);
        model.add_term(term(1.0, &[&a, &b]));
        assert_eq!(model.terms().len(), 2);

        model.add_term(term(2.0, &[&b, &a, &a]));
        assert_eq!(model.terms().len(), 2);
        assert!((model.terms()[0].coefficient - 3.0).abs() < EPSILON);
        assert!((model.terms()[1].coefficient - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_constructor_merges_initial_terms() {
        let a = descriptor("a");
        let model = Model::new(
            "m".to_string(),
            vec![term(1.0, &[&a]), Term::constant(2.0), term(4.0, &[&a])],
        );
        assert_eq!(model.terms().len(), 2);
        assert!((model.terms()[0].coefficient - 5.0).abs() < EPSILON);

        let (b, c) = (descriptor("b"), descriptor("c"));
        let model = Model::new(
            "m".to_string(),
            vec![term(2.0, &[&a, &b]), term(1.0, &[&c]), term(1.0, &[&b, &a])],
        );
        assert_eq!(model.terms(), &[term(3.0, &[&a, &b]), term(1.0, &[&c])]);
    }

    #[test]
    fn test_evaluate_linear() {
        let a = descriptor("a");
        let (c1, c2) = (0.75, -4.0);
        let model = Model::new("m".to_string(), vec![term(c1, &[&a]), Term::constant(c2)]);

        for value in [-10.0, 0.0, 0.5, 3.0, 1e6] {
            assert!((model.evaluate(&[value]) - (c1 * value + c2)).abs() < EPSILON);
        }
    }

    #[test]
    fn test_evaluate_products_and_powers() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        // 2·x·x·y - 3·y + 1
        let model = Model::new(
            "m".to_string(),
            vec![
                term(2.0, &[&x, &x, &y]),
                term(-3.0, &[&y]),
                Term::constant(1.0),
            ],
        );
        assert_eq!(model.descriptors(), &[x, y]);
        let (xv, yv) = (1.5, -2.0);
        let expected = 2.0 * xv * xv * yv - 3.0 * yv + 1.0;
        assert!((model.evaluate(&[xv, yv]) - expected).abs() < EPSILON);
    }

    #[test]
    fn test_empty_model_evaluates_to_zero() {
        let model: CoverageModel = Model::new("m".to_string(), Vec::new());
        assert!(model.descriptors().is_empty());
        assert_eq!(model.evaluate(&[]), 0.0);
    }

    #[test]
    fn test_substitute_expands_polynomial() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        let mut model = Model::new("m".to_string(), vec![term(2.0, &[&x])]);

        // x ↦ 3y + 1
        let count = model
            .substitute(&x, &[term(3.0, &[&y]), Term::constant(1.0)])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(model.descriptors(), &[y]);

        for yv in [-2.0, 0.0, 0.25, 7.0] {
            assert!((model.evaluate(&[yv]) - (6.0 * yv + 2.0)).abs() < EPSILON);
        }
    }

    #[test]
    fn test_substitute_repeated_factor() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        // x·x + x
        let mut model = Model::new(
            "m".to_string(),
            vec![term(1.0, &[&x, &x]), term(1.0, &[&x])],
        );

        // x ↦ y + 2
        let count = model
            .substitute(&x, &[term(1.0, &[&y]), Term::constant(2.0)])
            .unwrap();
        assert!(count >= 4);
        assert!(model.terms().iter().all(|t| !t.contains(&x)));

        for yv in [-3.0, 0.0, 1.5, 4.0] {
            let xv = yv + 2.0;
            assert!((model.evaluate(&[yv]) - (xv * xv + xv)).abs() < EPSILON);
        }
    }

    #[test]
    fn test_substitute_merges_into_existing_terms() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        // 2x + 5y
        let mut model = Model::new(
            "m".to_string(),
            vec![term(2.0, &[&x]), term(5.0, &[&y])],
        );
        model.substitute(&x, &[term(0.5, &[&y])]).unwrap();

        assert_eq!(model.terms().len(), 1);
        assert!((model.terms()[0].coefficient - 6.0).abs() < EPSILON);
    }

    #[test]
    fn test_substitute_by_nothing_removes_terms() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        let mut model = Model::new(
            "m".to_string(),
            vec![term(2.0, &[&x, &y]), term(5.0, &[&y])],
        );
        assert_eq!(model.substitute(&x, &[]).unwrap(), 0);
        assert_eq!(model.terms().len(), 1);
        assert_eq!(model.descriptors(), &[y]);
    }

    #[test]
    fn test_substitute_rejects_normalized_descriptor() {
        let x = descriptor("x").with_distribution(Distribution::log_normal());
        let y = descriptor("y");
        let mut model = Model::new("m".to_string(), vec![term(2.0, &[&x])]);
        let before = model.terms().to_vec();

        let err = model.substitute(&x, &[term(1.0, &[&y])]).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedSubstitution { ref descriptor } if descriptor == "x"));
        assert_eq!(model.terms(), before.as_slice());
    }

    #[test]
    fn test_substitute_rejects_normalized_expansion() {
        let x = descriptor("x");
        let y = descriptor("y").with_distribution(Distribution::log_normal());
        let mut model = Model::new("m".to_string(), vec![term(2.0, &[&x])]);
        let before = model.terms().to_vec();

        let err = model
            .substitute(&x, &[Term::constant(1.0), term(1.0, &[&y])])
            .unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedSubstitution { ref descriptor } if descriptor == "y"));
        assert_eq!(model.terms(), before.as_slice());
    }

    #[test]
    fn test_substitute_rejects_recursion() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        let mut model = Model::new("m".to_string(), vec![term(2.0, &[&x, &y])]);
        let before = model.terms().to_vec();

        let err = model
            .substitute(&x, &[term(1.0, &[&y]), term(1.0, &[&x, &y])])
            .unwrap_err();
        assert!(matches!(err, ModelError::RecursiveSubstitution { .. }));
        assert_eq!(model.terms(), before.as_slice());
    }

    #[test]
    fn test_descriptors_sorted_and_unique() {
        let a = descriptor("a");
        let b = descriptor("b").with_time_offset(-3);
        let c = descriptor("c");
        let model = Model::new(
            "m".to_string(),
            vec![term(1.0, &[&c, &a]), term(1.0, &[&a, &b]), term(1.0, &[&c])],
        );
        assert_eq!(model.descriptors(), &[b, a, c]);
    }

    #[test]
    fn test_normalize_identity_is_noop() {
        let (a, b) = (descriptor("a"), descriptor("b"));
        let model = Model::new("m".to_string(), vec![term(1.0, &[&a, &b])]);
        let mut values = [3.0, -7.5];
        model.normalize(&mut values);
        assert_eq!(values, [3.0, -7.5]);
    }

    #[test]
    fn test_normalize_applies_strategies_in_place() {
        let a = descriptor("a");
        let b = descriptor("b").with_distribution(Distribution::log_normal());
        let c = descriptor("c").with_distribution(Distribution::new("half", 0.5, 0.0, false));
        let model = Model::new("m".to_string(), vec![term(1.0, &[&a, &b, &c])]);

        let mut values = [2.0, std::f64::consts::E, 10.0];
        model.normalize(&mut values);
        assert_eq!(values[0], 2.0);
        assert!((values[1] - 1.0).abs() < EPSILON);
        assert_eq!(values[2], 5.0);
    }

    #[test]
    fn test_mutation_invalidates_caches() {
        let (a, b) = (descriptor("a"), descriptor("b"));
        let mut model = Model::new("m".to_string(), vec![term(2.0, &[&a])]);
        let values = [3.0, 5.0];
        assert!((model.evaluate(&values) - 6.0).abs() < EPSILON);

        model.add_term(Term::constant(1.0));
        assert!((model.evaluate(&values) - 7.0).abs() < EPSILON);

        model.add_term(term(1.0, &[&b]));
        assert_eq!(model.descriptors(), &[a.clone(), b.clone()]);
        assert!((model.evaluate(&values) - 12.0).abs() < EPSILON);

        // a ↦ 10
        model.substitute(&a, &[Term::constant(10.0)]).unwrap();
        assert_eq!(model.descriptors(), &[b]);
        assert!((model.evaluate(&[5.0]) - 26.0).abs() < EPSILON);
    }

    #[test]
    fn test_normalization_cache_follows_descriptors() {
        let a = descriptor("a");
        let b = descriptor("b").with_distribution(Distribution::log_normal());
        let mut model = Model::new("m".to_string(), vec![term(1.0, &[&b])]);
        let mut values = [1.0];
        model.normalize(&mut values);
        assert_eq!(values, [0.0]);

        // `a` sorts before `b`, shifting the log slot to position 1.
        model.add_term(term(1.0, &[&a]));
        let mut values = [1.0, 1.0];
        model.normalize(&mut values);
        assert_eq!(values, [1.0, 0.0]);
    }

    #[test]
    fn test_shared_evaluation_across_threads() {
        use rayon::prelude::*;

        let (x, y) = (descriptor("x"), descriptor("y"));
        let model = Model::new(
            "m".to_string(),
            vec![term(2.0, &[&x, &y]), term(-1.0, &[&y]), Term::constant(0.5)],
        );
        let results: Vec<f64> = (0..64)
            .into_par_iter()
            .map(|i| model.evaluate(&[i as f64, 2.0]))
            .collect();
        for (i, result) in results.into_iter().enumerate() {
            let expected = 4.0 * i as f64 - 2.0 + 0.5;
            assert!((result - expected).abs() < EPSILON);
        }
    }

    #[test]
    fn test_display() {
        let (x, y) = (descriptor("x"), descriptor("y"));
        let model = Model::new(
            "gradient".to_string(),
            vec![term(2.0, &[&x, &y]), Term::constant(-1.0)],
        );
        assert_eq!(model.to_string(), "gradient = 2·x·y + -1");

        let empty: CoverageModel = Model::new("empty".to_string(), Vec::new());
        assert_eq!(empty.to_string(), "empty = 0");
    }
}
