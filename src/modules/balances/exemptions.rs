use crate::schemas::{parse_integer, BalanceExemption, ExemptionType};

/// Find the first exemption whose type permits `difference`
/// (`live - computed`). `GreaterOrEqual` covers non-negative drift,
/// `LessOrEqual` non-positive drift, `Dynamic` any drift.
///
/// `difference` is engine-computed and always an integer string; a
/// malformed value matches nothing.
pub fn match_balance_exemption<'a>(
    exemptions: &'a [BalanceExemption],
    difference: &str,
) -> Option<&'a BalanceExemption> {
    let diff = parse_integer(difference).ok()?;
    exemptions.iter().find(|exemption| match exemption.exemption_type {
        Some(ExemptionType::GreaterOrEqual) => diff >= 0,
        Some(ExemptionType::LessOrEqual) => diff <= 0,
        Some(ExemptionType::Dynamic) => true,
        None => false,
    })
}
