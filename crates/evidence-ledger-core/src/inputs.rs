use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::TargetPath;
use crate::LedgerError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Drivers {
    #[serde(default)]
    pub sales_growth: Vec<f64>,
    #[serde(default)]
    pub oper_margin: Vec<f64>,
    #[serde(default)]
    pub stable_growth: Option<f64>,
    #[serde(default)]
    pub stable_margin: Option<f64>,
    /// Kernel fields this crate never addresses, carried through untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Snapshot of the valuation kernel's inputs.
///
/// Only the fields a [`TargetPath`] can address are typed; everything else the kernel
/// needs (tax rate, share count, discounting mode, ...) round-trips through `other`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValuationInputs {
    pub ticker: String,
    #[serde(default)]
    pub drivers: Drivers,
    #[serde(default)]
    pub wacc: Vec<f64>,
    #[serde(default)]
    pub sales_to_capital: Vec<f64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ValuationInputs {
    /// Check the addressable fields are usable as a baseline.
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] for a blank ticker or any non-finite driver value.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.ticker.trim().is_empty() {
            return Err(LedgerError::schema("inputs.ticker", "ticker MUST be provided"));
        }

        let series = [
            ("drivers.sales_growth", self.drivers.sales_growth.as_slice()),
            ("drivers.oper_margin", self.drivers.oper_margin.as_slice()),
            ("wacc", self.wacc.as_slice()),
            ("sales_to_capital", self.sales_to_capital.as_slice()),
        ];
        for (name, values) in series {
            if let Some(index) = values.iter().position(|value| !value.is_finite()) {
                return Err(LedgerError::schema(
                    format!("inputs.{name}[{index}]"),
                    "driver values MUST be finite",
                ));
            }
        }

        for (name, value) in [
            ("drivers.stable_growth", self.drivers.stable_growth),
            ("drivers.stable_margin", self.drivers.stable_margin),
        ] {
            if value.is_some_and(|value| !value.is_finite()) {
                return Err(LedgerError::schema(format!("inputs.{name}"), "driver values MUST be finite"));
            }
        }

        Ok(())
    }

    /// Current value at `path`, or `None` when the field is absent.
    #[must_use]
    pub fn read(&self, path: TargetPath) -> Option<f64> {
        match path {
            TargetPath::SalesGrowth(index) => self.drivers.sales_growth.get(index).copied(),
            TargetPath::OperMargin(index) => self.drivers.oper_margin.get(index).copied(),
            TargetPath::StableGrowth => self.drivers.stable_growth,
            TargetPath::StableMargin => self.drivers.stable_margin,
            TargetPath::TerminalWacc => self.wacc.last().copied(),
            TargetPath::TerminalSalesToCapital => self.sales_to_capital.last().copied(),
        }
    }

    /// Store `value` at `path`.
    ///
    /// Indexed paths may overwrite an existing element or append exactly one element
    /// (`index == len`). Terminal paths overwrite the last element, or seed an empty
    /// series.
    ///
    /// # Errors
    /// Returns [`LedgerError::NonFinite`] for NaN or infinite values and
    /// [`LedgerError::Path`] when an index would leave a gap in the series.
    pub fn write(&mut self, path: TargetPath, value: f64) -> Result<(), LedgerError> {
        if !value.is_finite() {
            return Err(LedgerError::NonFinite { target_path: path.to_string(), value });
        }

        match path {
            TargetPath::SalesGrowth(index) => {
                write_index(&mut self.drivers.sales_growth, index, value, path)
            }
            TargetPath::OperMargin(index) => {
                write_index(&mut self.drivers.oper_margin, index, value, path)
            }
            TargetPath::StableGrowth => {
                self.drivers.stable_growth = Some(value);
                Ok(())
            }
            TargetPath::StableMargin => {
                self.drivers.stable_margin = Some(value);
                Ok(())
            }
            TargetPath::TerminalWacc => {
                write_last(&mut self.wacc, value);
                Ok(())
            }
            TargetPath::TerminalSalesToCapital => {
                write_last(&mut self.sales_to_capital, value);
                Ok(())
            }
        }
    }
}

fn write_index(
    values: &mut Vec<f64>,
    index: usize,
    value: f64,
    path: TargetPath,
) -> Result<(), LedgerError> {
    if let Some(slot) = values.get_mut(index) {
        *slot = value;
        return Ok(());
    }
    if index == values.len() {
        values.push(value);
        return Ok(());
    }
    Err(LedgerError::Path {
        target_path: path.to_string(),
        message: format!("index {index} is beyond the series length {}", values.len()),
    })
}

fn write_last(values: &mut Vec<f64>, value: f64) {
    match values.last_mut() {
        Some(slot) => *slot = value,
        None => values.push(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_inputs() -> ValuationInputs {
        let raw = serde_json::json!({
            "ticker": "ACME",
            "revenue_t0": 1000.0,
            "shares_out": 50.0,
            "drivers": {
                "sales_growth": [0.10, 0.08, 0.06],
                "oper_margin": [0.15],
                "stable_growth": 0.03,
                "stable_margin": 0.18,
                "terminal_growth_override": null
            },
            "wacc": [0.09, 0.085],
            "sales_to_capital": [],
            "discounting": {"mode": "midyear"}
        });
        match serde_json::from_value(raw) {
            Ok(inputs) => inputs,
            Err(err) => panic!("fixture inputs failed to decode: {err}"),
        }
    }

    #[test]
    fn reads_follow_target_paths() {
        let inputs = mk_inputs();
        assert_eq!(inputs.read(TargetPath::SalesGrowth(1)), Some(0.08));
        assert_eq!(inputs.read(TargetPath::OperMargin(1)), None);
        assert_eq!(inputs.read(TargetPath::StableMargin), Some(0.18));
        assert_eq!(inputs.read(TargetPath::TerminalWacc), Some(0.085));
        assert_eq!(inputs.read(TargetPath::TerminalSalesToCapital), None);
    }

    #[test]
    fn writes_extend_by_one_and_refuse_gaps() {
        let mut inputs = mk_inputs();
        assert!(inputs.write(TargetPath::OperMargin(1), 0.16).is_ok());
        assert_eq!(inputs.drivers.oper_margin, vec![0.15, 0.16]);

        match inputs.write(TargetPath::OperMargin(5), 0.2) {
            Err(LedgerError::Path { target_path, .. }) => {
                assert_eq!(target_path, "drivers.oper_margin[5]");
            }
            other => panic!("expected path error, got {other:?}"),
        }

        assert!(inputs.write(TargetPath::TerminalSalesToCapital, 2.5).is_ok());
        assert!(inputs.write(TargetPath::TerminalWacc, 0.095).is_ok());
        assert_eq!(inputs.sales_to_capital, vec![2.5]);
        assert_eq!(inputs.wacc, vec![0.09, 0.095]);
    }

    #[test]
    fn non_finite_writes_are_refused() {
        let mut inputs = mk_inputs();
        match inputs.write(TargetPath::StableGrowth, f64::INFINITY) {
            Err(LedgerError::NonFinite { target_path, .. }) => {
                assert_eq!(target_path, "drivers.stable_growth");
            }
            other => panic!("expected non-finite error, got {other:?}"),
        }
        assert_eq!(inputs.drivers.stable_growth, Some(0.03));
    }

    #[test]
    fn unaddressed_kernel_fields_round_trip() {
        let inputs = mk_inputs();
        let encoded = match serde_json::to_value(&inputs) {
            Ok(value) => value,
            Err(err) => panic!("encode failed: {err}"),
        };
        assert_eq!(encoded["discounting"]["mode"], "midyear");
        assert_eq!(encoded["revenue_t0"], 1000.0);
        assert!(encoded["drivers"]["terminal_growth_override"].is_null());
        assert!(inputs.validate().is_ok());
    }
}
