use std::fmt;

/// `coefficient × Π descriptors`. A descriptor may repeat; an empty factor
/// list is a constant term.
#[derive(Debug, Clone, PartialEq)]
pub struct Term<D> {
    pub coefficient: f64,
    pub descriptors: Vec<D>,
}

impl<D: PartialEq> Term<D> {
    pub fn new(coefficient: f64, descriptors: Vec<D>) -> Self {
        Self {
            coefficient,
            descriptors,
        }
    }

    pub fn constant(coefficient: f64) -> Self {
        Self::new(coefficient, Vec::new())
    }

    pub fn is_constant(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn contains(&self, descriptor: &D) -> bool {
        self.descriptors.contains(descriptor)
    }

    /// Whether both terms multiply the same factors, ignoring order but not
    /// multiplicity: `[a, a, b]` matches `[b, a, a]` and not `[a, b]`.
    pub fn same_factors(&self, other: &Self) -> bool {
        if self.descriptors.len() != other.descriptors.len() {
            return false;
        }
        let mut remaining: Vec<&D> = other.descriptors.iter().collect();
        for descriptor in &self.descriptors {
            match remaining.iter().position(|d| *d == descriptor) {
                Some(i) => {
                    remaining.swap_remove(i);
                }
                None => return false,
            }
        }
        remaining.is_empty()
    }
}

impl<D: fmt::Display> fmt::Display for Term<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coefficient)?;
        for descriptor in &self.descriptors {
            write!(f, "·{}", descriptor)?;
        }
        Ok(())
    }
}
