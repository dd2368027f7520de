use std::fmt::{Display, Formatter};

use crate::evidence::{Driver, EvidenceClaim, Horizon};

/// Address of one driver value inside [`crate::ValuationInputs`].
///
/// `y2-3` claims share index 1 of the per-year arrays; year 2 and year 3 are not
/// distinguished.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TargetPath {
    SalesGrowth(usize),
    OperMargin(usize),
    StableGrowth,
    StableMargin,
    TerminalWacc,
    TerminalSalesToCapital,
}

impl TargetPath {
    #[must_use]
    pub fn map(driver: Driver, horizon: Horizon) -> Self {
        match (driver, horizon) {
            (Driver::Growth, Horizon::Y1) => Self::SalesGrowth(0),
            (Driver::Growth, Horizon::Y2To3) => Self::SalesGrowth(1),
            (Driver::Growth, Horizon::LongTerm) => Self::StableGrowth,
            (Driver::Margin, Horizon::Y1) => Self::OperMargin(0),
            (Driver::Margin, Horizon::Y2To3) => Self::OperMargin(1),
            (Driver::Margin, Horizon::LongTerm) => Self::StableMargin,
            (Driver::Wacc, _) => Self::TerminalWacc,
            (Driver::S2c, _) => Self::TerminalSalesToCapital,
        }
    }

    #[must_use]
    pub fn for_claim(claim: &EvidenceClaim) -> Self {
        Self::map(claim.driver, claim.horizon)
    }

    #[must_use]
    pub fn driver(self) -> Driver {
        match self {
            Self::SalesGrowth(_) | Self::StableGrowth => Driver::Growth,
            Self::OperMargin(_) | Self::StableMargin => Driver::Margin,
            Self::TerminalWacc => Driver::Wacc,
            Self::TerminalSalesToCapital => Driver::S2c,
        }
    }

    /// Field path without any index suffix, e.g. `drivers.sales_growth`.
    #[must_use]
    pub fn base(self) -> &'static str {
        match self {
            Self::SalesGrowth(_) => "drivers.sales_growth",
            Self::OperMargin(_) => "drivers.oper_margin",
            Self::StableGrowth => "drivers.stable_growth",
            Self::StableMargin => "drivers.stable_margin",
            Self::TerminalWacc => "wacc",
            Self::TerminalSalesToCapital => "sales_to_capital",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "drivers.stable_growth" => return Some(Self::StableGrowth),
            "drivers.stable_margin" => return Some(Self::StableMargin),
            "wacc[-1]" => return Some(Self::TerminalWacc),
            "sales_to_capital[-1]" => return Some(Self::TerminalSalesToCapital),
            _ => {}
        }

        let (base, rest) = value.split_once('[')?;
        let index = rest.strip_suffix(']')?.parse::<usize>().ok()?;
        match base {
            "drivers.sales_growth" => Some(Self::SalesGrowth(index)),
            "drivers.oper_margin" => Some(Self::OperMargin(index)),
            _ => None,
        }
    }
}

impl Display for TargetPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SalesGrowth(index) | Self::OperMargin(index) => {
                write!(f, "{}[{index}]", self.base())
            }
            Self::StableGrowth | Self::StableMargin => f.write_str(self.base()),
            Self::TerminalWacc | Self::TerminalSalesToCapital => write!(f, "{}[-1]", self.base()),
        }
    }
}
