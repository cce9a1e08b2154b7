//! Builds the `Annotation` block of a result envelope from the
//! `SemanticQuery` that produced it and the registry it was validated
//! against.

use crate::model::measure::MeasureType;
use crate::model::query::SemanticQuery;
use crate::model::registry::split_member_ref;
use crate::model::CubeRegistry;

use super::result::{Annotation, MemberAnnotation};

pub fn build_annotation(registry: &CubeRegistry, query: &SemanticQuery) -> Annotation {
    let mut annotation = Annotation::default();

    for name in &query.measures {
        if let Some(r) = split_member_ref(name) {
            if let Some(measure) = registry.measure(r.cube, r.member) {
                annotation
                    .measures
                    .insert(name.clone(), MemberAnnotation::new(name, measure_type_label(&measure.measure_type)));
            }
        }
    }

    for name in &query.dimensions {
        if let Some(r) = split_member_ref(name) {
            if let Some(dim) = registry.dimension(r.cube, r.member) {
                annotation
                    .dimensions
                    .insert(name.clone(), MemberAnnotation::new(name, dimension_type_label(dim)));
            }
        }
    }

    for td in &query.time_dimensions {
        if let Some(r) = split_member_ref(&td.dimension) {
            if let Some(dim) = registry.dimension(r.cube, r.member) {
                let mut member = MemberAnnotation::new(&td.dimension, dimension_type_label(dim));
                if let Some(g) = td.granularity {
                    member = member.with_granularity(granularity_label(g));
                }
                annotation.time_dimensions.insert(td.dimension.clone(), member);
            }
        }
    }

    for name in &query.segments {
        annotation
            .segments
            .insert(name.clone(), MemberAnnotation::new(name, "segment"));
    }

    annotation
}

fn measure_type_label(measure_type: &MeasureType) -> &'static str {
    match measure_type {
        MeasureType::Count => "count",
        MeasureType::CountDistinct { .. } => "countDistinct",
        MeasureType::Aggregate { agg, .. } => aggregation_label(*agg),
        MeasureType::Number { .. } => "number",
        MeasureType::Calculated { .. } => "calculated",
        MeasureType::Window { kind, .. } => window_kind_label(*kind),
    }
}

fn aggregation_label(agg: crate::model::types::AggregationType) -> &'static str {
    use crate::model::types::AggregationType;
    match agg {
        AggregationType::Sum => "sum",
        AggregationType::Count => "count",
        AggregationType::CountDistinct => "countDistinct",
        AggregationType::Avg => "avg",
        AggregationType::Min => "min",
        AggregationType::Max => "max",
    }
}

fn window_kind_label(kind: crate::model::measure::WindowMeasureKind) -> &'static str {
    use crate::model::measure::WindowMeasureKind;
    match kind {
        WindowMeasureKind::RunningTotal => "runningTotal",
        WindowMeasureKind::Lag => "lag",
        WindowMeasureKind::Lead => "lead",
        WindowMeasureKind::Rank => "rank",
        WindowMeasureKind::DenseRank => "denseRank",
        WindowMeasureKind::PercentRank => "percentRank",
        WindowMeasureKind::NTile => "nTile",
        WindowMeasureKind::FirstValue => "firstValue",
        WindowMeasureKind::LastValue => "lastValue",
        WindowMeasureKind::MovingAverage => "movingAverage",
        WindowMeasureKind::PercentOfTotal => "percentOfTotal",
    }
}

fn dimension_type_label(dim: &crate::model::Dimension) -> &'static str {
    use crate::model::dimension::DimensionType;
    match dim.dimension_type {
        DimensionType::String(_) => "string",
        DimensionType::Number(_) => "number",
        DimensionType::Boolean(_) => "boolean",
        DimensionType::Time(_) => "time",
    }
}

fn granularity_label(granularity: crate::model::types::Granularity) -> &'static str {
    use crate::model::types::Granularity;
    match granularity {
        Granularity::Second => "second",
        Granularity::Minute => "minute",
        Granularity::Hour => "hour",
        Granularity::Day => "day",
        Granularity::Week => "week",
        Granularity::Month => "month",
        Granularity::Quarter => "quarter",
        Granularity::Year => "year",
    }
}
