//! Condition operators shared by the access-stage filters and the
//! assignment-rule matcher.

use serde::{Deserialize, Serialize};

/// Comparison operator applied to one record/alert field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Include,
    Exclude,
    Reg,
    Nreg,
}

impl std::str::FromStr for ConditionOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            "reg" => Ok(Self::Reg),
            "nreg" => Ok(Self::Nreg),
            _ => Err(format!("unknown condition operator: {s}")),
        }
    }
}

impl ConditionOp {
    /// Whether the field value satisfies this operator against any of the
    /// expected values (positive operators are any-of, negative operators
    /// are all-of, the usual condition-list semantics).
    pub fn matches(self, value: &str, expected: &[String]) -> bool {
        match self {
            Self::Eq => expected.iter().any(|e| e == value),
            Self::Neq => expected.iter().all(|e| e != value),
            Self::Gt => numeric(value, expected, |v, e| v > e),
            Self::Gte => numeric(value, expected, |v, e| v >= e),
            Self::Lt => numeric(value, expected, |v, e| v < e),
            Self::Lte => numeric(value, expected, |v, e| v <= e),
            Self::Include => expected.iter().any(|e| value.contains(e.as_str())),
            Self::Exclude => expected.iter().all(|e| !value.contains(e.as_str())),
            Self::Reg => expected
                .iter()
                .any(|e| regex::Regex::new(e).map(|r| r.is_match(value)).unwrap_or(false)),
            Self::Nreg => expected
                .iter()
                .all(|e| !regex::Regex::new(e).map(|r| r.is_match(value)).unwrap_or(false)),
        }
    }
}

fn numeric(value: &str, expected: &[String], cmp: impl Fn(f64, f64) -> bool) -> bool {
    let Ok(v) = value.parse::<f64>() else {
        return false;
    };
    expected
        .iter()
        .any(|e| e.parse::<f64>().map(|e| cmp(v, e)).unwrap_or(false))
}

/// One field condition. A condition list is a conjunction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub values: Vec<String>,
}

impl Condition {
    pub fn matches(&self, value: &str) -> bool {
        self.op.matches(value, &self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn eq_is_any_of() {
        assert!(ConditionOp::Eq.matches("a", &vals(&["b", "a"])));
        assert!(!ConditionOp::Eq.matches("c", &vals(&["b", "a"])));
    }

    #[test]
    fn neq_is_all_of() {
        assert!(ConditionOp::Neq.matches("c", &vals(&["a", "b"])));
        assert!(!ConditionOp::Neq.matches("a", &vals(&["a", "b"])));
    }

    #[test]
    fn numeric_operators_parse_values() {
        assert!(ConditionOp::Gte.matches("51", &vals(&["51"])));
        assert!(ConditionOp::Lte.matches("100", &vals(&["100"])));
        assert!(!ConditionOp::Gt.matches("51", &vals(&["51"])));
        assert!(!ConditionOp::Gt.matches("not-a-number", &vals(&["1"])));
    }

    #[test]
    fn regex_operators() {
        assert!(ConditionOp::Reg.matches("web-01", &vals(&["^web-\\d+$"])));
        assert!(ConditionOp::Nreg.matches("db-01", &vals(&["^web-\\d+$"])));
        // A broken pattern never matches rather than erroring out.
        assert!(!ConditionOp::Reg.matches("x", &vals(&["["])));
    }
}
