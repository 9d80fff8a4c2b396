//! Log-domain arithmetic in a configurable base.

/// Log-domain arithmetic helper.
///
/// Scores handed around by the decoder are logarithms in `base`; the
/// language model file stores values in that same domain, so the model only
/// needs this for the word insertion penalty and for tooling.
#[derive(Debug, Clone, Copy)]
pub struct LogMath {
    base: f64,
    ln_base: f64,
}

impl LogMath {
    /// Logarithm of zero: the smallest representable score.
    pub const LOG_ZERO: f32 = -f32::MAX;

    /// Base used by the decoder unless configured otherwise.
    pub const DEFAULT_BASE: f64 = 1.0001;

    pub fn new(base: f64) -> Self {
        Self {
            base,
            ln_base: base.ln(),
        }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// `log_base(value)`, with `LOG_ZERO` for non-positive inputs.
    pub fn linear_to_log(&self, value: f64) -> f32 {
        if value <= 0.0 {
            return Self::LOG_ZERO;
        }
        let v = value.ln() / self.ln_base;
        (v as f32).max(Self::LOG_ZERO)
    }

    pub fn log_to_linear(&self, log_value: f32) -> f64 {
        if log_value <= Self::LOG_ZERO {
            return 0.0;
        }
        (log_value as f64 * self.ln_base).exp()
    }

    /// Convert a base-10 logarithm to this base.
    pub fn log10_to_log(&self, log10_value: f32) -> f32 {
        if log10_value <= Self::LOG_ZERO {
            return Self::LOG_ZERO;
        }
        (log10_value as f64 * std::f64::consts::LN_10 / self.ln_base) as f32
    }

    /// `log(linear(a) + linear(b))` without leaving the log domain.
    pub fn add_as_linear(&self, a: f32, b: f32) -> f32 {
        let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
        if lo <= Self::LOG_ZERO {
            return hi;
        }
        let diff = (lo as f64 - hi as f64) * self.ln_base;
        hi + (diff.exp().ln_1p() / self.ln_base) as f32
    }
}

impl Default for LogMath {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}
