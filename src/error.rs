use std::error;
use std::fmt;

/// Error to represent a rejected solver configuration. Every variant is
/// fatal by policy: the driver refuses to start rather than silently
/// producing wrong physics. Validation runs before any collective call so
/// a malformed parameter can never hang a partially started computation.
#[derive(Debug)]
pub enum Error {
    UnknownIdType(u32),
    DegenerateToleranceRamp(f64, f64),
    NonPositiveTolerance(f64),
    RefinementAboveMaxDepth(u32, u32),
    MaxDepthTooDeep(u32),
    PaddingTooNarrow(usize, usize),
    OddElementCount(usize),
    EmptyDomain(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            UnknownIdType(id) => writeln!(fmt, "unknown initial data type: {}", id),
            DegenerateToleranceRamp(r0, r1) => {
                writeln!(fmt, "degenerate tolerance ramp: r0={} r1={}", r0, r1)
            }
            NonPositiveTolerance(tol) => writeln!(fmt, "non-positive tolerance: {}", tol),
            RefinementAboveMaxDepth(reg, max) => {
                writeln!(fmt, "refinement level {} exceeds max depth {}", reg, max)
            }
            MaxDepthTooDeep(d) => writeln!(fmt, "max depth {} exceeds the supported cap", d),
            PaddingTooNarrow(got, need) => {
                writeln!(fmt, "padding width {} below the stencil reach {}", got, need)
            }
            OddElementCount(n) => {
                writeln!(fmt, "elements per axis must be even and at least 4: {}", n)
            }
            EmptyDomain(axis) => writeln!(fmt, "domain is empty on axis {}", axis),
        }
    }
}

impl error::Error for Error {}
