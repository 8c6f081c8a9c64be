//! Logical key names shown in the run ledger, e.g. `COST[OrgUnit=A,Period=P01]`

use plancalc_core::{CellKey, DimId, Dimension, DimensionRegistry};

/// Name a key figure qualified by dimension values, in the given order
pub fn key_name<'d>(
    registry: &DimensionRegistry,
    key_figure: DimId,
    dimensions: impl IntoIterator<Item = (&'d Dimension, DimId)>,
) -> String {
    let mut name = registry.code_or_id(&Dimension::KeyFigure, key_figure);
    let qualifiers: Vec<String> = dimensions
        .into_iter()
        .filter(|(dimension, _)| **dimension != Dimension::KeyFigure)
        .map(|(dimension, id)| format!("{}={}", dimension, registry.code_or_id(dimension, id)))
        .collect();
    if !qualifiers.is_empty() {
        name.push('[');
        name.push_str(&qualifiers.join(","));
        name.push(']');
    }
    name
}

/// Name of a full cell: every set dimension, built-ins first, then extras by name
pub fn cell_name(registry: &DimensionRegistry, cell: &CellKey) -> String {
    let mut dimensions: Vec<(Dimension, DimId)> = [
        Dimension::Version,
        Dimension::Year,
        Dimension::Period,
        Dimension::OrgUnit,
        Dimension::Service,
        Dimension::Account,
    ]
    .into_iter()
    .filter_map(|dimension| cell.value_of(&dimension).map(|id| (dimension, id)))
    .collect();
    dimensions.extend(
        cell.extra
            .iter()
            .map(|(name, id)| (Dimension::Extra(name.to_string()), id)),
    );

    key_name(
        registry,
        cell.key_figure,
        dimensions.iter().map(|(dimension, id)| (dimension, *id)),
    )
}
