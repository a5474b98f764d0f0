use std::fmt;

/// A per-descriptor transform applied to raw values before evaluation.
pub trait Normalization: fmt::Debug + Send + Sync {
    /// `true` when [`normalize`](Self::normalize) is the mathematical identity.
    fn is_identity(&self) -> bool;

    fn normalize(&self, value: f64) -> f64;
}

/// Affine transform optionally followed by a natural logarithm:
/// `ln(value * scale + offset)` when `log` is set, `value * scale + offset` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub name: String,
    pub scale: f64,
    pub offset: f64,
    pub log: bool,
}

impl Distribution {
    pub fn new(name: impl Into<String>, scale: f64, offset: f64, log: bool) -> Self {
        Self {
            name: name.into(),
            scale,
            offset,
            log,
        }
    }

    /// Values used as they are.
    pub fn normal() -> Self {
        Self::new("normal", 1.0, 0.0, false)
    }

    /// Values replaced by their natural logarithm.
    pub fn log_normal() -> Self {
        Self::new("log", 1.0, 0.0, true)
    }

    /// Looks up one of the built-in distributions.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "normal" => Some(Self::normal()),
            "log" => Some(Self::log_normal()),
            _ => None,
        }
    }
}

impl Default for Distribution {
    fn default() -> Self {
        Self::normal()
    }
}

impl Normalization for Distribution {
    fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0 && !self.log
    }

    fn normalize(&self, value: f64) -> f64 {
        let value = value * self.scale + self.offset;
        if self.log {
            value.ln()
        } else {
            value
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
