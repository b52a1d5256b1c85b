//! EXPLAIN-style JSON rendering of a physical plan.
//!
//! One object per operator: `operator_type`, the operator's runtime params,
//! and `inputs` for its children. Route queries are rendered as the wire
//! SQL the shards will receive.

use serde_json::{json, Value};

use crate::logical_plan::{JoinOpcode, LogicalPlan};

pub fn plan_description(plan: &LogicalPlan) -> Value {
    match plan {
        LogicalPlan::Route(route) => json!({
            "operator_type": "Route",
            "variant": route.opcode.to_string(),
            "query": route.select.to_string(),
            "order_by": route.eroute.order_by,
            "truncate_column_count": route.eroute.truncate_column_count,
        }),
        LogicalPlan::Join(join) => json!({
            "operator_type": "Join",
            "variant": join_variant(join.opcode),
            "cols": join.cols,
            "vars": join.vars.iter().map(|(name, col)| json!({"name": name, "column": col})).collect::<Vec<_>>(),
            "inputs": [plan_description(&join.left), plan_description(&join.right)],
        }),
        LogicalPlan::HashJoin(join) => json!({
            "operator_type": "HashJoin",
            "variant": join_variant(join.opcode),
            "cols": join.cols,
            "inputs": [plan_description(&join.left), plan_description(&join.right)],
        }),
        LogicalPlan::SemiJoin(join) => json!({
            "operator_type": "SemiJoin",
            "cols": join.cols,
            "inputs": [plan_description(&join.lhs), plan_description(&join.rhs)],
        }),
        LogicalPlan::OrderedAggregate(aggregate) => json!({
            "operator_type": "OrderedAggregate",
            "aggregates": aggregate.eaggr.aggregates,
            "group_by_keys": aggregate.eaggr.group_by_keys,
            "pre_process": aggregate.eaggr.pre_process,
            "truncate_column_count": aggregate.eaggr.truncate_column_count,
            "inputs": [plan_description(&aggregate.input)],
        }),
        LogicalPlan::MemorySort(sort) => json!({
            "operator_type": "MemorySort",
            "order_by": sort.ems.order_by,
            "truncate_column_count": sort.ems.truncate_column_count,
            "inputs": [plan_description(&sort.input)],
        }),
        LogicalPlan::SimpleProjection(projection) => json!({
            "operator_type": "SimpleProjection",
            "cols": projection.eproj.cols,
            "inputs": [plan_description(&projection.input)],
        }),
        LogicalPlan::VindexFunc(vindex_func) => json!({
            "operator_type": "VindexFunc",
            "fields": vindex_func.evindex.fields,
            "cols": vindex_func.evindex.cols,
        }),
        LogicalPlan::PulloutSubquery(pullout) => json!({
            "operator_type": "PulloutSubquery",
            "inputs": [plan_description(&pullout.subquery), plan_description(&pullout.underlying)],
        }),
        LogicalPlan::Filter(filter) => json!({
            "operator_type": "Filter",
            "predicate": filter.predicate.to_string(),
            "inputs": [plan_description(&filter.input)],
        }),
        LogicalPlan::Limit(limit) => json!({
            "operator_type": "Limit",
            "count": limit.row_count,
            "inputs": [plan_description(&limit.input)],
        }),
        LogicalPlan::Distinct(distinct) => json!({
            "operator_type": "Distinct",
            "inputs": [plan_description(&distinct.input)],
        }),
        LogicalPlan::Concatenate(concatenate) => json!({
            "operator_type": "Concatenate",
            "inputs": concatenate.sources.iter().map(plan_description).collect::<Vec<_>>(),
        }),
    }
}

fn join_variant(opcode: JoinOpcode) -> &'static str {
    match opcode {
        JoinOpcode::Normal => "Join",
        JoinOpcode::LeftJoin => "LeftJoin",
    }
}
