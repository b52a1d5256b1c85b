#[cfg(test)]
mod planner_tests {
    use kestrel_common::error::{ErrorCode, PlanError, PlanResult};
    use kestrel_common::types::{CollationId, DataType, TableSet};
    use kestrel_common::unsupported;
    use kestrel_sql_frontend::ast::{AliasedExpr, ColName, Expr, SelectStatement};
    use kestrel_sql_frontend::parser::{parse_select, parse_select_statement};
    use kestrel_sql_frontend::semantics::{ColumnInfo, SemTable};

    use crate::context::{PlanningContext, StaticVschema};
    use crate::describe::plan_description;
    use crate::engine::{AggregateOpcode, RouteOpcode, RouteParams};
    use crate::horizon::{plan_horizon, HorizonPlanning};
    use crate::logical_plan::*;
    use crate::projection::push_projection;
    use crate::query_projection::QueryProjection;

    // ── Fixtures ────────────────────────────────────────────────────────

    /// t(k·vindex, a int, b/g/d text), l(lid·vindex, la int, lb text),
    /// r(rid·vindex, x text, y int)
    struct Fixture {
        sem: SemTable,
        vschema: StaticVschema,
        t: TableSet,
        l: TableSet,
        r: TableSet,
    }

    fn fixture() -> Fixture {
        let mut sem = SemTable::new();
        let t = sem.add_table(
            "t",
            vec![
                ColumnInfo::new("k", DataType::Int64),
                ColumnInfo::new("a", DataType::Int64),
                ColumnInfo::new("b", DataType::VarChar),
                ColumnInfo::new("g", DataType::VarChar),
                ColumnInfo::new("d", DataType::VarChar),
            ],
        );
        let l = sem.add_table(
            "l",
            vec![
                ColumnInfo::new("lid", DataType::Int64),
                ColumnInfo::new("la", DataType::Int64),
                ColumnInfo::new("lb", DataType::VarChar),
            ],
        );
        let r = sem.add_table(
            "r",
            vec![
                ColumnInfo::new("rid", DataType::Int64),
                ColumnInfo::new("x", DataType::VarChar),
                ColumnInfo::new("y", DataType::Int64),
            ],
        );
        let vschema = StaticVschema::new()
            .with_unique_vindex("t", "k")
            .with_unique_vindex("l", "lid")
            .with_unique_vindex("r", "rid");
        Fixture { sem, vschema, t, l, r }
    }

    impl Fixture {
        fn plan(&mut self, sql: &str, plan: LogicalPlan) -> PlanResult<LogicalPlan> {
            let sel = parse_select(sql).unwrap();
            let mut ctx = PlanningContext::new(&mut self.sem, &self.vschema);
            plan_horizon(&mut ctx, &sel, plan)
        }
    }

    /// A route as the operator phase leaves it: FROM and WHERE in place, the
    /// projection list still empty (the horizon owns it).
    fn empty_route(opcode: RouteOpcode, from_sql: &str, tables: TableSet) -> LogicalPlan {
        let mut sel = parse_select(from_sql).unwrap();
        sel.select_exprs.clear();
        LogicalPlan::Route(Route {
            opcode,
            tables,
            select: SelectStatement::Select(Box::new(sel)),
            eroute: RouteParams::default(),
        })
    }

    fn scatter(from_sql: &str, tables: TableSet) -> LogicalPlan {
        empty_route(RouteOpcode::Scatter, from_sql, tables)
    }

    fn join_of(left: LogicalPlan, right: LogicalPlan, opcode: JoinOpcode) -> LogicalPlan {
        LogicalPlan::Join(Join {
            left: Box::new(left),
            right: Box::new(right),
            opcode,
            cols: vec![],
            vars: vec![],
        })
    }

    fn as_route(plan: &LogicalPlan) -> &Route {
        match plan {
            LogicalPlan::Route(route) => route,
            other => panic!("expected a route, got {}", other.kind()),
        }
    }

    fn as_aggregate(plan: &LogicalPlan) -> &OrderedAggregate {
        match plan {
            LogicalPlan::OrderedAggregate(aggregate) => aggregate,
            other => panic!("expected an ordered aggregate, got {}", other.kind()),
        }
    }

    fn as_sort(plan: &LogicalPlan) -> &MemorySort {
        match plan {
            LogicalPlan::MemorySort(sort) => sort,
            other => panic!("expected a memory sort, got {}", other.kind()),
        }
    }

    fn route_sql(plan: &LogicalPlan) -> String {
        as_route(plan).select.to_string()
    }

    // ── Single-shard shortcut ───────────────────────────────────────────

    #[test]
    fn single_shard_select_installs_full_query() {
        let mut fx = fixture();
        let input = empty_route(RouteOpcode::EqualUnique, "select 1 from t where k = 1", fx.t);
        let plan = fx.plan("select a, b from t where k = 1", input).unwrap();
        assert_eq!(route_sql(&plan), "select a, b from t where k = 1");
        let route = as_route(&plan);
        assert!(route.eroute.order_by.is_empty());
        assert_eq!(route.eroute.truncate_column_count, 0);
    }

    #[test]
    fn single_shard_shortcut_carries_everything() {
        let mut fx = fixture();
        let input = empty_route(RouteOpcode::EqualUnique, "select 1 from t where k = 1", fx.t);
        let plan = fx
            .plan(
                "select distinct g, count(*) from t where k = 1 \
                 group by g having count(*) > 2 order by g desc limit 3",
                input,
            )
            .unwrap();
        assert_eq!(
            route_sql(&plan),
            "select distinct g, count(*) from t where k = 1 \
             group by g having count(*) > 2 order by g desc limit 3"
        );
    }

    #[test]
    fn unsharded_keyspace_qualifiers_are_stripped() {
        let mut fx = fixture();
        let input = empty_route(RouteOpcode::Unsharded, "select 1 from t", fx.t);
        let plan = fx.plan("select ks.t.a from ks.t order by ks.t.b", input).unwrap();
        assert_eq!(route_sql(&plan), "select t.a from t order by t.b asc");
    }

    // ── Scatter projections ─────────────────────────────────────────────

    #[test]
    fn scatter_select_takes_shortcut_without_horizon_work() {
        let mut fx = fixture();
        let plan = fx.plan("select a + 1 from t", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(route_sql(&plan), "select a + 1 from t");
        assert_eq!(as_route(&plan).eroute.truncate_column_count, 0);
    }

    #[test]
    fn scatter_expression_pushed_through_eval_gate() {
        let mut fx = fixture();
        let plan =
            fx.plan("select a + 1 from t order by a", scatter("select 1 from t", fx.t)).unwrap();
        // a+1 is tolerated on the preserved side even though the gateway
        // cannot evaluate it; the sort key lands behind it.
        assert_eq!(route_sql(&plan), "select a + 1, a from t order by a asc");
        let route = as_route(&plan);
        assert_eq!(route.eroute.order_by.len(), 1);
        assert_eq!(route.eroute.order_by[0].col, 1);
        assert_eq!(route.eroute.order_by[0].weight_string_col, None);
        assert_eq!(route.eroute.truncate_column_count, 1);
    }

    #[test]
    fn projection_reuse_returns_same_offset() {
        let mut fx = fixture();
        let mut plan = scatter("select 1 from t", fx.t);
        let mut ctx = PlanningContext::new(&mut fx.sem, &fx.vschema);
        let mut first = AliasedExpr::unaliased(Expr::col("b"));
        let mut second = AliasedExpr::unaliased(Expr::col("b"));
        assert_eq!(push_projection(&mut ctx, &mut first, &mut plan, true, true, false).unwrap(), (0, true));
        assert_eq!(push_projection(&mut ctx, &mut second, &mut plan, true, true, false).unwrap(), (0, false));
        assert_eq!(as_route(&plan).select.column_count(), 1);
    }

    #[test]
    fn derived_table_projection_is_rewritten() {
        let mut fx = fixture();
        let dt = fx.sem.add_derived_table(
            "dt",
            vec![("v".to_string(), Expr::col("b"), DataType::VarChar)],
        );
        let mut plan = scatter("select 1 from t", dt);
        let mut ctx = PlanningContext::new(&mut fx.sem, &fx.vschema);
        let mut expr = AliasedExpr::unaliased(Expr::ColName(ColName::qualified("dt", "v")));
        let (offset, added) =
            push_projection(&mut ctx, &mut expr, &mut plan, true, false, false).unwrap();
        assert_eq!((offset, added), (0, true));
        assert_eq!(route_sql(&plan), "select b from t");
    }

    // ── Scatter aggregation ─────────────────────────────────────────────

    #[test]
    fn scatter_group_by_text_column() {
        let mut fx = fixture();
        let plan = fx
            .plan("select g, count(*) from t group by g", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        assert_eq!(
            route_sql(&aggregate.input),
            "select g, count(*), weight_string(g) from t \
             group by g, weight_string(g) order by g asc"
        );
        assert_eq!(aggregate.eaggr.aggregates.len(), 1);
        assert_eq!(aggregate.eaggr.aggregates[0].opcode, AggregateOpcode::Count);
        assert_eq!(aggregate.eaggr.aggregates[0].col, 1);
        assert_eq!(aggregate.eaggr.group_by_keys.len(), 1);
        assert_eq!(aggregate.eaggr.group_by_keys[0].key_col, 0);
        assert_eq!(aggregate.eaggr.group_by_keys[0].weight_string_col, Some(2));
        assert_eq!(
            aggregate.eaggr.group_by_keys[0].collation,
            CollationId::UTF8MB4_GENERAL_CI
        );
        assert!(!aggregate.eaggr.pre_process);
        assert_eq!(aggregate.eaggr.truncate_column_count, 2);
    }

    #[test]
    fn scatter_group_by_numeric_column_skips_weight_string() {
        let mut fx = fixture();
        let plan = fx
            .plan("select a, count(*) from t group by a", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        assert_eq!(
            route_sql(&aggregate.input),
            "select a, count(*) from t group by a order by a asc"
        );
        assert_eq!(aggregate.eaggr.group_by_keys[0].weight_string_col, None);
        assert_eq!(aggregate.eaggr.truncate_column_count, 0);
    }

    #[test]
    fn group_by_ordinal_resolves_to_select_expression() {
        let mut fx = fixture();
        let plan = fx
            .plan("select b, count(*) from t group by 1", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        assert_eq!(
            route_sql(&aggregate.input),
            "select b, count(*), weight_string(b) from t \
             group by b, weight_string(b) order by b asc"
        );
    }

    #[test]
    fn unique_vindex_grouping_stays_on_the_route() {
        let mut fx = fixture();
        let plan = fx
            .plan(
                "select k, count(*) from t group by k having count(*) > 1",
                scatter("select 1 from t", fx.t),
            )
            .unwrap();
        // every group lives on one shard; no gateway aggregation, and the
        // HAVING goes straight into the route SQL
        assert_eq!(
            route_sql(&plan),
            "select k, count(*) from t group by k having count(*) > 1"
        );
    }

    #[test]
    fn unknown_aggregation_function_fails() {
        let mut fx = fixture();
        let err = fx
            .plan("select group_concat(b) from t", scatter("select 1 from t", fx.t))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: in scatter query: aggregation function 'group_concat'"
        );
    }

    #[test]
    fn complex_aggregate_expression_error_is_deferred() {
        let mut fx = fixture();
        // gateway aggregation path: the cached projection error surfaces
        let err = fx
            .plan("select count(*) + 1 from t", scatter("select 1 from t", fx.t))
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported: in scatter query: complex aggregate expression");

        // unique-vindex grouping never enters that path; the same projection
        // is simply pushed down
        let plan = fx
            .plan(
                "select count(*) + 1, k from t group by k",
                scatter("select 1 from t", fx.t),
            )
            .unwrap();
        assert_eq!(route_sql(&plan), "select count(*) + 1, k from t group by k");
    }

    // ── Distinct aggregates ─────────────────────────────────────────────

    #[test]
    fn count_distinct_scatter_is_rewritten() {
        let mut fx = fixture();
        let plan = fx
            .plan("select count(distinct d) from t", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        assert_eq!(
            route_sql(&aggregate.input),
            "select d, weight_string(d) from t group by d, weight_string(d) order by d asc"
        );
        assert_eq!(aggregate.eaggr.aggregates.len(), 1);
        let aggr = &aggregate.eaggr.aggregates[0];
        assert_eq!(aggr.opcode, AggregateOpcode::CountDistinct);
        assert_eq!(aggr.col, 0);
        assert_eq!(aggr.alias, "count(distinct d)");
        assert_eq!(aggr.w_col, Some(1));
        assert!(aggregate.eaggr.pre_process);
        // the synthetic group key belongs to the aggregate, not the key list
        assert!(aggregate.eaggr.group_by_keys.is_empty());
        assert_eq!(aggregate.eaggr.truncate_column_count, 1);
    }

    #[test]
    fn count_distinct_on_unique_vindex_stays_plain() {
        let mut fx = fixture();
        let plan = fx
            .plan("select count(distinct k) from t", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        // each k value lives on exactly one shard; shard-local distinct is
        // correct and the gateway just sums the counts
        assert_eq!(route_sql(&aggregate.input), "select count(distinct k) from t");
        assert_eq!(aggregate.eaggr.aggregates[0].opcode, AggregateOpcode::Count);
        assert!(!aggregate.eaggr.pre_process);
    }

    #[test]
    fn min_distinct_ignores_the_distinct() {
        let mut fx = fixture();
        let plan = fx
            .plan("select min(distinct b) from t", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        assert_eq!(route_sql(&aggregate.input), "select min(distinct b) from t");
        assert_eq!(aggregate.eaggr.aggregates[0].opcode, AggregateOpcode::Min);
    }

    // ── Scatter ORDER BY ────────────────────────────────────────────────

    #[test]
    fn scatter_order_by_text_column_gets_weight_string() {
        let mut fx = fixture();
        let plan =
            fx.plan("select a, b from t order by b", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(route_sql(&plan), "select a, b, weight_string(b) from t order by b asc");
        let route = as_route(&plan);
        assert_eq!(route.eroute.order_by.len(), 1);
        let key = &route.eroute.order_by[0];
        assert_eq!(key.col, 1);
        assert_eq!(key.weight_string_col, Some(2));
        assert!(!key.desc);
        assert_eq!(key.collation, CollationId::UTF8MB4_GENERAL_CI);
        assert_eq!(route.eroute.truncate_column_count, 2);
    }

    #[test]
    fn scatter_order_by_numeric_column_desc() {
        let mut fx = fixture();
        let plan =
            fx.plan("select a, b from t order by a desc", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(route_sql(&plan), "select a, b from t order by a desc");
        let route = as_route(&plan);
        assert_eq!(route.eroute.order_by[0].col, 0);
        assert_eq!(route.eroute.order_by[0].weight_string_col, None);
        assert!(route.eroute.order_by[0].desc);
        // nothing synthesized, nothing to truncate
        assert_eq!(route.eroute.truncate_column_count, 0);
    }

    #[test]
    fn order_by_alias_resolves_to_underlying_expression() {
        let mut fx = fixture();
        let plan =
            fx.plan("select b as x from t order by x", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(
            route_sql(&plan),
            "select b as x, weight_string(b) from t order by x asc"
        );
        let route = as_route(&plan);
        assert_eq!(route.eroute.order_by[0].col, 0);
        assert_eq!(route.eroute.order_by[0].weight_string_col, Some(1));
        assert_eq!(route.eroute.truncate_column_count, 1);
    }

    #[test]
    fn order_by_rand_installs_no_sort_key() {
        let mut fx = fixture();
        let plan =
            fx.plan("select a from t order by rand()", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(route_sql(&plan), "select a from t order by rand() asc");
        assert!(as_route(&plan).eroute.order_by.is_empty());
    }

    #[test]
    fn order_by_null_over_aggregation_is_dropped() {
        let mut fx = fixture();
        let plan = fx
            .plan("select count(*) from t order by null", scatter("select 1 from t", fx.t))
            .unwrap();
        let aggregate = as_aggregate(&plan);
        assert_eq!(route_sql(&aggregate.input), "select count(*) from t");
    }

    #[test]
    fn scatter_star_projection_cannot_be_pushed() {
        let mut fx = fixture();
        let err =
            fx.plan("select * from t order by b", scatter("select 1 from t", fx.t)).unwrap_err();
        assert_eq!(err.to_string(), "unsupported: '*' expression in cross-shard query");
    }

    #[test]
    fn scatter_order_by_with_star_must_reference_select_list() {
        let mut fx = fixture();
        let sel = parse_select("select * from t order by b").unwrap();
        let mut ctx = PlanningContext::new(&mut fx.sem, &fx.vschema);
        let qp = QueryProjection::from_select(&sel, ctx.sem_table).unwrap();
        let mut hp =
            HorizonPlanning { sel: &sel, qp, needs_truncation: false, gateway_grouping: false };
        let order_exprs = hp.qp.order_exprs.clone();
        let err = hp
            .plan_order_by(&mut ctx, &order_exprs, scatter("select 1 from t", fx.t))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: in scatter query: order by must reference a column \
             in the select list: b asc"
        );
    }

    // ── HAVING ──────────────────────────────────────────────────────────

    #[test]
    fn having_on_gateway_aggregation_becomes_a_filter() {
        let mut fx = fixture();
        let plan = fx
            .plan(
                "select g, count(*) as c from t group by g having c > 10",
                scatter("select 1 from t", fx.t),
            )
            .unwrap();
        let LogicalPlan::Filter(filter) = &plan else { panic!("expected filter root") };
        assert_eq!(filter.predicate.to_string(), "c > 10");
        let aggregate = as_aggregate(&filter.input);
        assert_eq!(
            route_sql(&aggregate.input),
            "select g, count(*) as c, weight_string(g) from t \
             group by g, weight_string(g) order by g asc"
        );
        // truncation reaches through the filter to the aggregate
        assert_eq!(aggregate.eaggr.truncate_column_count, 2);
    }

    // ── Joins ───────────────────────────────────────────────────────────

    #[test]
    fn join_columns_carry_signed_provenance() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let plan = fx.plan("select l.la, r.x, 1 + 1 from l join r on l.lid = r.rid", input).unwrap();
        let LogicalPlan::Join(join) = &plan else { panic!("expected join root") };
        // negative = left child, positive = right child, 1-based; literals
        // have no dependencies and default to the left
        assert_eq!(join.cols, vec![-1, 1, -2]);
        assert!(join.cols.iter().all(|c| *c != 0));
        assert_eq!(route_sql(&join.left), "select l.la, 1 + 1 from l");
        assert_eq!(route_sql(&join.right), "select r.x from r");
    }

    #[test]
    fn expression_spanning_join_is_split_with_bindvars() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let plan = fx.plan("select l.la + r.y from l join r on l.lid = r.rid", input).unwrap();
        let LogicalPlan::Join(join) = &plan else { panic!("expected join root") };
        assert_eq!(join.vars, vec![("l_la_1".to_string(), 0)]);
        assert_eq!(join.cols, vec![1]);
        assert_eq!(route_sql(&join.left), "select l.la from l");
        assert_eq!(route_sql(&join.right), "select :l_la_1 + r.y from r");
    }

    #[test]
    fn left_join_right_side_expression_fails() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::LeftJoin,
        );
        let err = fx
            .plan("select l.la, r.y + 1 from l left join r on l.lid = r.rid", input)
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported: cross-shard left join and column expressions");
    }

    #[test]
    fn aggregate_spanning_join_fails() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let err = fx
            .plan("select count(l.la + r.y) from l join r on l.lid = r.rid", input)
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported: cross-shard query with aggregates");
    }

    #[test]
    fn grouped_aggregation_over_join_fails() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let err = fx
            .plan("select r.x, count(*) from l join r on l.lid = r.rid group by r.x", input)
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported: cross-shard query with aggregates");
    }

    #[test]
    fn hash_join_cannot_project_from_both_sides() {
        let mut fx = fixture();
        let input = LogicalPlan::HashJoin(HashJoin {
            left: Box::new(scatter("select 1 from l", fx.l)),
            right: Box::new(scatter("select 1 from r", fx.r)),
            opcode: JoinOpcode::Normal,
            cols: vec![],
        });
        let err = fx.plan("select l.la + r.y from l join r on l.lid = r.rid", input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: hash join with projection from both sides of the join"
        );
    }

    #[test]
    fn order_by_right_side_inserts_memory_sort_over_join() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let plan = fx
            .plan("select l.la, r.x from l join r on l.lid = r.rid order by r.x", input)
            .unwrap();
        let sort = as_sort(&plan);
        assert_eq!(sort.ems.order_by.len(), 1);
        assert_eq!(sort.ems.order_by[0].col, 1);
        assert_eq!(sort.ems.order_by[0].weight_string_col, Some(2));
        assert_eq!(sort.ems.order_by[0].star_col_fixed_index, 1);
        assert_eq!(sort.ems.truncate_column_count, 2);
        let LogicalPlan::Join(join) = sort.input.as_ref() else { panic!("expected join input") };
        assert_eq!(join.cols, vec![-1, 1, 2]);
        assert_eq!(route_sql(&join.right), "select r.x, weight_string(r.x) from r");
    }

    #[test]
    fn order_by_left_side_is_pushed_below_the_join() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let plan = fx
            .plan("select l.la, r.x from l join r on l.lid = r.rid order by l.la", input)
            .unwrap();
        let LogicalPlan::Join(join) = &plan else { panic!("expected join root") };
        assert_eq!(route_sql(&join.left), "select l.la from l order by l.la asc");
        assert_eq!(as_route(&join.left).eroute.order_by.len(), 1);
    }

    #[test]
    fn hash_join_order_follows_the_right_side() {
        let mut fx = fixture();
        let input = LogicalPlan::HashJoin(HashJoin {
            left: Box::new(scatter("select 1 from l", fx.l)),
            right: Box::new(scatter("select 1 from r", fx.r)),
            opcode: JoinOpcode::Normal,
            cols: vec![],
        });
        let plan = fx
            .plan("select l.la, r.x from l join r on l.lid = r.rid order by r.x", input)
            .unwrap();
        let LogicalPlan::HashJoin(join) = &plan else { panic!("expected hash join root") };
        assert_eq!(
            route_sql(&join.right),
            "select r.x, weight_string(r.x) from r order by r.x asc"
        );
    }

    // ── Ordering over aggregation ───────────────────────────────────────

    #[test]
    fn order_by_aggregate_inserts_memory_sort_above_aggregation() {
        let mut fx = fixture();
        let plan = fx
            .plan(
                "select g, count(*) as c from t group by g order by c",
                scatter("select 1 from t", fx.t),
            )
            .unwrap();
        let sort = as_sort(&plan);
        assert_eq!(sort.ems.order_by.len(), 1);
        assert_eq!(sort.ems.order_by[0].col, 1);
        assert_eq!(sort.ems.order_by[0].weight_string_col, None);
        assert_eq!(sort.ems.truncate_column_count, 2);
        let aggregate = as_aggregate(&sort.input);
        // the aggregate's input was pre-sorted on the group key instead
        assert_eq!(
            route_sql(&aggregate.input),
            "select g, count(*) as c, weight_string(g) from t \
             group by g, weight_string(g) order by g asc"
        );
    }

    // ── DISTINCT ────────────────────────────────────────────────────────

    #[test]
    fn distinct_with_unique_vindex_is_route_only() {
        let mut fx = fixture();
        let plan = fx.plan("select distinct k, b from t", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(route_sql(&plan), "select distinct k, b from t");
    }

    #[test]
    fn distinct_scatter_needs_gateway_dedup() {
        let mut fx = fixture();
        let plan = fx.plan("select distinct b from t", scatter("select 1 from t", fx.t)).unwrap();
        let aggregate = as_aggregate(&plan);
        assert!(aggregate.eaggr.aggregates.is_empty());
        assert_eq!(aggregate.eaggr.group_by_keys.len(), 1);
        assert_eq!(aggregate.eaggr.group_by_keys[0].key_col, 0);
        assert_eq!(aggregate.eaggr.group_by_keys[0].weight_string_col, Some(1));
        assert_eq!(aggregate.eaggr.truncate_column_count, 1);
        assert_eq!(
            route_sql(&aggregate.input),
            "select distinct b, weight_string(b) from t order by b asc"
        );
    }

    #[test]
    fn distinct_over_aggregation_reuses_projected_columns() {
        let mut fx = fixture();
        let plan = fx
            .plan(
                "select distinct g, count(*) as c from t group by g",
                scatter("select 1 from t", fx.t),
            )
            .unwrap();
        let outer = as_aggregate(&plan);
        assert_eq!(outer.eaggr.group_by_keys.len(), 2);
        assert_eq!(outer.eaggr.group_by_keys[0].key_col, 0);
        assert_eq!(outer.eaggr.group_by_keys[0].weight_string_col, Some(2));
        assert_eq!(outer.eaggr.group_by_keys[1].key_col, 1);
        assert_eq!(outer.eaggr.group_by_keys[1].weight_string_col, None);
        assert_eq!(outer.eaggr.truncate_column_count, 2);
        let inner = as_aggregate(&outer.input);
        assert_eq!(inner.eaggr.aggregates.len(), 1);
    }

    #[test]
    fn distinct_over_aggregation_requires_projected_columns() {
        let mut fx = fixture();
        let err = fx
            .plan(
                "select distinct g, b, count(*) as c from t group by g",
                scatter("select 1 from t", fx.t),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err
            .to_string()
            .starts_with("[BUG] unable to plan distinct query as the column is not projected"));
    }

    #[test]
    fn ambiguous_aliases_fail_distinct_planning() {
        let mut fx = fixture();
        let err = fx
            .plan("select distinct a as q, b as q from t", scatter("select 1 from t", fx.t))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: generating order by clause: ambiguous symbol reference: q"
        );
    }

    #[test]
    fn alias_colliding_with_column_name_is_ambiguous() {
        let mut fx = fixture();
        let err = fx
            .plan("select distinct a, b as a from t", scatter("select 1 from t", fx.t))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: generating order by clause: ambiguous symbol reference: a"
        );
    }

    // ── Transparent operators and unions ────────────────────────────────

    #[test]
    fn pullout_subquery_is_transparent() {
        let mut fx = fixture();
        let input = LogicalPlan::PulloutSubquery(PulloutSubquery {
            subquery: Box::new(scatter("select 1 from r", fx.r)),
            underlying: Box::new(scatter("select 1 from t", fx.t)),
        });
        let plan = fx.plan("select b from t order by b", input).unwrap();
        let LogicalPlan::PulloutSubquery(pullout) = &plan else { panic!("expected pullout root") };
        assert_eq!(
            route_sql(&pullout.underlying),
            "select b, weight_string(b) from t order by b asc"
        );
        // truncation recursed into the underlying route
        assert_eq!(as_route(&pullout.underlying).eroute.truncate_column_count, 1);
    }

    #[test]
    fn union_route_rejects_new_columns() {
        let mut fx = fixture();
        let statement = parse_select_statement("select a from t union select a from t").unwrap();
        let input = LogicalPlan::Route(Route {
            opcode: RouteOpcode::Scatter,
            tables: fx.t,
            select: statement,
            eroute: RouteParams::default(),
        });
        let err = fx.plan("select a from t order by b", input).unwrap_err();
        assert_eq!(err, PlanError::bad_field("a", "order clause"));
    }

    #[test]
    fn union_route_reuses_existing_columns() {
        let mut fx = fixture();
        let statement = parse_select_statement("select a from t union select a from t").unwrap();
        let mut plan = LogicalPlan::Route(Route {
            opcode: RouteOpcode::Scatter,
            tables: fx.t,
            select: statement,
            eroute: RouteParams::default(),
        });
        let mut ctx = PlanningContext::new(&mut fx.sem, &fx.vschema);
        let mut expr = AliasedExpr::unaliased(Expr::col("a"));
        let (offset, added) =
            push_projection(&mut ctx, &mut expr, &mut plan, true, true, false).unwrap();
        assert_eq!((offset, added), (0, false));
    }

    #[test]
    fn concatenate_requires_existing_columns() {
        let mut fx = fixture();
        let make_source = |fx: &Fixture| {
            let sel = parse_select("select a from t").unwrap();
            LogicalPlan::Route(Route {
                opcode: RouteOpcode::Scatter,
                tables: fx.t,
                select: SelectStatement::Select(Box::new(sel)),
                eroute: RouteParams::default(),
            })
        };
        let mut plan = LogicalPlan::Concatenate(Concatenate {
            sources: vec![make_source(&fx), make_source(&fx)],
        });
        let mut ctx = PlanningContext::new(&mut fx.sem, &fx.vschema);

        let mut existing = AliasedExpr::unaliased(Expr::col("a"));
        assert_eq!(
            push_projection(&mut ctx, &mut existing, &mut plan, true, true, false).unwrap(),
            (0, false)
        );

        let mut fresh = AliasedExpr::unaliased(Expr::col("b"));
        let err =
            push_projection(&mut ctx, &mut fresh, &mut plan, true, true, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);

        let mut aggr = AliasedExpr::unaliased(Expr::col("a"));
        let err = push_projection(&mut ctx, &mut aggr, &mut plan, true, true, true).unwrap_err();
        assert_eq!(err.to_string(), "unsupported: aggregation on unions");
    }

    #[test]
    fn group_by_over_semi_join_fails() {
        let mut fx = fixture();
        let input = LogicalPlan::SemiJoin(SemiJoin {
            lhs: Box::new(scatter("select 1 from t", fx.t)),
            rhs: Box::new(scatter("select 1 from r", fx.r)),
            cols: vec![],
        });
        let err = fx.plan("select a from t group by a", input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: group by in a query having a correlated subquery"
        );
    }

    #[test]
    fn sharded_error_surfaces_for_non_route_plans() {
        let mut fx = fixture();
        fx.sem.set_sharded_error(unsupported!("subqueries in sharded keyspace"));
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        let err = fx.plan("select l.la from l join r on l.lid = r.rid", input).unwrap_err();
        assert_eq!(err.to_string(), "unsupported: subqueries in sharded keyspace");

        // a route root is immune to the sentinel
        let plan = fx.plan("select a from t", scatter("select 1 from t", fx.t)).unwrap();
        assert_eq!(route_sql(&plan), "select a from t");
    }

    // ── Leftover aggregates and simple projections ──────────────────────

    #[test]
    fn simple_projection_over_aggregate_reuses_columns() {
        let mut fx = fixture();
        let count = parse_select("select count(*) as c from t").unwrap();
        let input = LogicalPlan::OrderedAggregate(OrderedAggregate {
            input: Box::new(LogicalPlan::Route(Route {
                opcode: RouteOpcode::Scatter,
                tables: fx.t,
                select: SelectStatement::Select(Box::new(count.clone())),
                eroute: RouteParams::default(),
            })),
            eaggr: crate::engine::OrderedAggregateParams {
                aggregates: vec![crate::engine::AggregateParams {
                    opcode: AggregateOpcode::Count,
                    col: 0,
                    alias: "c".into(),
                    expr: match &count.select_exprs[0] {
                        kestrel_sql_frontend::ast::SelectExpr::Aliased(ae) => match &ae.expr {
                            Expr::FuncExpr(f) => f.clone(),
                            _ => panic!("expected count(*)"),
                        },
                        _ => panic!("expected aliased expr"),
                    },
                    w_col: None,
                }],
                ..Default::default()
            },
        });
        let plan = fx.plan("select c from t", input).unwrap();
        let LogicalPlan::SimpleProjection(projection) = &plan else {
            panic!("expected simple projection root")
        };
        assert_eq!(projection.eproj.cols, vec![0]);
    }

    #[test]
    fn new_projections_on_aggregates_are_rejected() {
        let mut fx = fixture();
        let input = LogicalPlan::OrderedAggregate(OrderedAggregate {
            input: Box::new(scatter("select 1 from t", fx.t)),
            eaggr: Default::default(),
        });
        let err = fx.plan("select b from t", input).unwrap_err();
        assert_eq!(err.to_string(), "[BUG] cannot push projections in ordered aggregates");
    }

    // ── Truncation ──────────────────────────────────────────────────────

    #[test]
    fn truncation_rejects_unknown_roots() {
        let mut fx = fixture();
        let sel = parse_select("select a from t").unwrap();
        let qp = QueryProjection::from_select(&sel, &mut fx.sem).unwrap();
        let hp = HorizonPlanning { sel: &sel, qp, needs_truncation: true, gateway_grouping: false };
        let mut plan = LogicalPlan::Limit(Limit {
            input: Box::new(scatter("select 1 from t", fx.t)),
            row_count: 10,
        });
        let err = hp.truncate_columns_if_needed(&mut plan).unwrap_err();
        assert_eq!(
            err.to_string(),
            "[BUG] plan type not known for column truncation: limit"
        );
    }

    #[test]
    fn joins_never_truncate() {
        let mut fx = fixture();
        let input = join_of(
            scatter("select 1 from l", fx.l),
            scatter("select 1 from r", fx.r),
            JoinOpcode::Normal,
        );
        // weight_string(lb) widens the frame, but join output is allowed to
        // stay wide
        let plan = fx
            .plan("select l.la, l.lb, r.x from l join r on l.lid = r.rid order by l.lb", input)
            .unwrap();
        let LogicalPlan::Join(join) = &plan else { panic!("expected join root") };
        assert_eq!(as_route(&join.left).eroute.truncate_column_count, 0);
    }

    // ── Vindex functions ────────────────────────────────────────────────

    #[test]
    fn vindex_func_supplies_fixed_fields() {
        let mut fx = fixture();
        let mut plan = LogicalPlan::VindexFunc(VindexFunc {
            tables: fx.t,
            evindex: Default::default(),
        });
        let mut ctx = PlanningContext::new(&mut fx.sem, &fx.vschema);
        let mut id = AliasedExpr::unaliased(Expr::col("id"));
        assert_eq!(push_projection(&mut ctx, &mut id, &mut plan, true, true, false).unwrap(), (0, true));
        let mut again = AliasedExpr::unaliased(Expr::col("id"));
        assert_eq!(
            push_projection(&mut ctx, &mut again, &mut plan, true, true, false).unwrap(),
            (0, false)
        );
        let mut bad = AliasedExpr::unaliased(Expr::col("nope"));
        let err = push_projection(&mut ctx, &mut bad, &mut plan, true, true, false).unwrap_err();
        assert_eq!(err, PlanError::bad_field("nope", "field list"));
    }

    // ── Plan description ────────────────────────────────────────────────

    #[test]
    fn plan_description_renders_the_operator_tree() {
        let mut fx = fixture();
        let plan = fx
            .plan("select g, count(*) from t group by g", scatter("select 1 from t", fx.t))
            .unwrap();
        let description = plan_description(&plan);
        assert_eq!(description["operator_type"], "OrderedAggregate");
        assert_eq!(description["aggregates"][0]["opcode"], "count");
        assert_eq!(description["group_by_keys"][0]["key_col"], 0);
        assert_eq!(description["truncate_column_count"], 2);
        assert_eq!(description["inputs"][0]["operator_type"], "Route");
        assert_eq!(description["inputs"][0]["variant"], "Scatter");
        assert_eq!(
            description["inputs"][0]["query"],
            "select g, count(*), weight_string(g) from t \
             group by g, weight_string(g) order by g asc"
        );
    }
}
