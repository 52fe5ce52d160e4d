use serde::{Deserialize, Serialize};

use super::value::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Outside `Q1 - 1.5*IQR .. Q3 + 1.5*IQR`.
    Iqr,
    /// `|z| > threshold`.
    ZScore { threshold: f64 },
}

impl Default for OutlierMethod {
    fn default() -> Self {
        OutlierMethod::Iqr
    }
}

/// A numeric cell flagged as a statistical outlier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutlierFlag {
    pub row: usize,
    pub column: String,
    pub value: Value,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// One weighted contributor to the overall quality score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityFactor {
    pub name: String,
    /// 0-100
    pub score: f64,
    pub weight: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    /// Weighted average of the factor scores, 0-100.
    pub overall_score: f64,
    pub grade: char,
    pub factors: Vec<QualityFactor>,
}

impl QualityReport {
    pub fn grade_for(score: f64) -> char {
        match score {
            s if s >= 90.0 => 'A',
            s if s >= 80.0 => 'B',
            s if s >= 70.0 => 'C',
            s if s >= 60.0 => 'D',
            _ => 'F',
        }
    }

    pub fn factor(&self, name: &str) -> Option<&QualityFactor> {
        self.factors.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(QualityReport::grade_for(95.0), 'A');
        assert_eq!(QualityReport::grade_for(90.0), 'A');
        assert_eq!(QualityReport::grade_for(89.9), 'B');
        assert_eq!(QualityReport::grade_for(70.0), 'C');
        assert_eq!(QualityReport::grade_for(60.0), 'D');
        assert_eq!(QualityReport::grade_for(12.0), 'F');
    }

    #[test]
    fn test_outlier_method_serde() {
        let m: OutlierMethod = serde_json::from_str(r#"{"method":"z_score","threshold":2.5}"#).unwrap();
        assert_eq!(m, OutlierMethod::ZScore { threshold: 2.5 });
        let m: OutlierMethod = serde_json::from_str(r#"{"method":"iqr"}"#).unwrap();
        assert_eq!(m, OutlierMethod::Iqr);
    }
}
