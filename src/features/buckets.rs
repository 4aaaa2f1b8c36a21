//! Fixed bins for grouped descriptive output; never used as model input

/// Left-closed bins `[edges[i], edges[i + 1])` with one label each
#[derive(Debug, Clone, Copy)]
pub struct Bins {
    pub edges: &'static [f64],
    pub labels: &'static [&'static str],
}

pub const AGE_BINS: Bins = Bins {
    edges: &[18.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0],
    labels: &["18-29", "30-39", "40-49", "50-59", "60-69", "70-80"],
};

pub const INCOME_BINS: Bins = Bins {
    edges: &[
        0.0,
        100_000.0,
        200_000.0,
        500_000.0,
        1_000_000.0,
        2_000_000.0,
        5_000_000.0,
        8_500_000.0,
    ],
    labels: &[
        "0-100K",
        "100K-200K",
        "200K-500K",
        "500K-1M",
        "1M-2M",
        "2M-5M",
        "5M+",
    ],
};

impl Bins {
    /// Label of the bin holding `x`, `None` outside the edges or for NaN
    pub fn label(&self, x: f64) -> Option<&'static str> {
        self.edges
            .windows(2)
            .position(|w| x >= w[0] && x < w[1])
            .map(|i| self.labels[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_bins() {
        assert_eq!(AGE_BINS.label(18.0), Some("18-29"));
        assert_eq!(AGE_BINS.label(29.9), Some("18-29"));
        assert_eq!(AGE_BINS.label(30.0), Some("30-39"));
        assert_eq!(AGE_BINS.label(79.0), Some("70-80"));
        assert_eq!(AGE_BINS.label(80.0), None);
        assert_eq!(AGE_BINS.label(17.0), None);
        assert_eq!(AGE_BINS.label(f64::NAN), None);
    }

    #[test]
    fn test_income_bins() {
        assert_eq!(INCOME_BINS.label(0.0), Some("0-100K"));
        assert_eq!(INCOME_BINS.label(150_000.0), Some("100K-200K"));
        assert_eq!(INCOME_BINS.label(1_000_000.0), Some("1M-2M"));
        assert_eq!(INCOME_BINS.label(6_000_000.0), Some("5M+"));
        assert_eq!(INCOME_BINS.label(9_000_000.0), None);
    }

    #[test]
    fn test_labels_match_edges() {
        for bins in [AGE_BINS, INCOME_BINS] {
            assert_eq!(bins.labels.len() + 1, bins.edges.len());
        }
    }
}
