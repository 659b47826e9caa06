use std::sync::Arc;

use strata_error::{DbError, Result};
use tracing::{debug, trace};

use super::PlanNode;
use crate::context::QueryContext;
use crate::scalar::ScalarValue;
use crate::table::composite::CompositeTable;
use crate::table::filter::{ReferenceTable, SubsetColumnTable};
use crate::table::function::FunctionTable;
use crate::table::memory::MemoryTable;
use crate::table::resolver::{NoVariables, find_variable};
use crate::table::{Table, TableRef, ops};

impl PlanNode {
    /// Evaluate this plan into a table.
    pub fn evaluate(&self, ctx: &QueryContext) -> Result<TableRef> {
        let table = self.evaluate_inner(ctx)?;
        debug!(node = self.name(), rows = table.row_count(), "evaluated plan node");
        Ok(table)
    }

    fn evaluate_inner(&self, ctx: &QueryContext) -> Result<TableRef> {
        Ok(match self {
            Self::SingleRow => MemoryTable::single_row().into_table_ref(),
            Self::FetchTable { name, alias } => {
                let table = ctx.catalog().get_table(name).ok_or_else(|| {
                    DbError::planning(format!("Table '{name}' does not exist"))
                })?;
                match alias {
                    Some(alias) => Arc::new(ReferenceTable::new(table, alias.clone())),
                    None => table,
                }
            }
            Self::FetchView { child, .. } => child.evaluate(ctx)?,
            Self::CachePoint { id, child } => {
                let frame_local = child.has_outer_references();
                if let Some(table) = ctx.cached_table(*id, frame_local) {
                    trace!(id, frame_local, "cache point hit");
                    return Ok(table);
                }
                let table = child.evaluate(ctx)?;
                ctx.cache_table(*id, table.clone(), frame_local);
                table
            }
            Self::Subset {
                child,
                columns,
                aliases,
            } => {
                let table = child.evaluate(ctx)?;
                Arc::new(SubsetColumnTable::try_new(
                    table,
                    columns.clone(),
                    aliases.clone(),
                )?)
            }
            Self::Distinct { child, columns } => {
                let table = child.evaluate(ctx)?;
                ops::distinct(&table, columns)?
            }
            Self::Sort { child, keys } => {
                let table = child.evaluate(ctx)?;
                ops::order_by_columns(&table, keys)?
            }
            Self::SimpleSelect {
                child,
                column,
                op,
                value,
            } => {
                let table = child.evaluate(ctx)?;
                let column = find_variable(table.as_ref(), column)?;
                let value = value.evaluate(None, &NoVariables, ctx)?;
                ops::simple_select(&table, column, *op, &value)?
            }
            Self::RangeSelect {
                child,
                column,
                ranges,
            } => {
                let table = child.evaluate(ctx)?;
                let column = find_variable(table.as_ref(), column)?;
                ops::range_select(&table, column, ranges)?
            }
            Self::PatternSelect {
                child,
                column,
                pattern,
                negated,
            } => {
                let table = child.evaluate(ctx)?;
                let column = find_variable(table.as_ref(), column)?;
                match pattern.evaluate(None, &NoVariables, ctx)? {
                    ScalarValue::Utf8(pattern) => {
                        ops::pattern_select(&table, column, &pattern, *negated)?
                    }
                    ScalarValue::Null => ops::constant_select(&table, false),
                    other => {
                        return Err(DbError::new(format!(
                            "LIKE pattern must be a string, got {}",
                            other.datatype()
                        )));
                    }
                }
            }
            Self::ExhaustiveSelect { child, predicate } => {
                let table = child.evaluate(ctx)?;
                ops::exhaustive_select(&table, predicate, ctx)?
            }
            Self::ConstantSelect { child, predicate } => {
                let table = child.evaluate(ctx)?;
                let keep = predicate.evaluate_predicate(None, &NoVariables, ctx)?;
                ops::constant_select(&table, keep)
            }
            Self::Join {
                left,
                right,
                left_column,
                op,
                right_column,
            } => {
                let left = left.evaluate(ctx)?;
                let right = right.evaluate(ctx)?;
                let left_column = find_variable(left.as_ref(), left_column)?;
                let right_column = find_variable(right.as_ref(), right_column)?;
                ops::simple_join(&left, left_column, *op, &right, right_column)?
            }
            Self::NaturalJoin { left, right } => {
                let left = left.evaluate(ctx)?;
                let right = right.evaluate(ctx)?;
                ops::cross_join(&left, &right)
            }
            Self::OuterJoin {
                left,
                right,
                join_type,
                on,
            } => {
                let left = left.evaluate(ctx)?;
                let right = right.evaluate(ctx)?;
                ops::outer_join(&left, &right, *join_type, on, ctx)?
            }
            Self::LogicalUnion { source, branches } => {
                let source = source.evaluate(ctx)?;
                let branches = branches
                    .iter()
                    .map(|b| b.evaluate(ctx))
                    .collect::<Result<Vec<_>>>()?;
                ops::logical_union(&source, &branches)?
            }
            Self::NonCorrelatedAnyAll {
                child,
                column,
                op,
                all,
                subquery,
            } => {
                let table = child.evaluate(ctx)?;
                let subquery = subquery.evaluate(ctx)?;
                let column = find_variable(table.as_ref(), column)?;
                ops::any_all_select(&table, column, *op, &subquery, *all)?
            }
            Self::Functions {
                child,
                exprs,
                names,
            } => {
                let table = child.evaluate(ctx)?;
                let functions =
                    FunctionTable::try_new(table, exprs.clone(), names.clone(), ctx)?;
                Arc::new(functions).merge_with_reference(None)?
            }
            Self::Group {
                child,
                group_by,
                group_max,
                exprs,
                names,
            } => {
                let table = child.evaluate(ctx)?;
                let columns = group_by
                    .iter()
                    .map(|var| find_variable(table.as_ref(), var))
                    .collect::<Result<Vec<_>>>()?;
                let group_max = group_max
                    .as_ref()
                    .map(|var| find_variable(table.as_ref(), var))
                    .transpose()?;

                let mut functions =
                    FunctionTable::try_new(table, exprs.clone(), names.clone(), ctx)?;
                if columns.is_empty() {
                    functions.set_whole_table_as_group();
                } else {
                    functions.create_group_matrix(&columns)?;
                }
                Arc::new(functions).merge_with_reference(group_max)?
            }
            Self::Composite {
                left,
                right,
                function,
                all,
            } => {
                let left = left.evaluate(ctx)?;
                let right = right.evaluate(ctx)?;
                Arc::new(CompositeTable::try_new(vec![left, right], *function, *all)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::session::SessionConfig;
    use crate::expr::{ComparisonOperator, Expression};
    use crate::scalar::datatype::DataType;
    use crate::schema::{ColumnInfo, TableInfo, TableName, Variable};
    use crate::table::collect_rows;
    use crate::table::composite::CompositeFunction;
    use crate::table::ops::SortKey;

    fn context() -> QueryContext {
        let catalog = MemoryCatalog::new();
        let t = catalog
            .create_table(TableInfo::new(
                TableName::new("t"),
                [
                    ColumnInfo::new("a", DataType::Int32),
                    ColumnInfo::new("b", DataType::Utf8),
                ],
            ))
            .unwrap();
        t.insert_all([
            vec![3.into(), "x".into()],
            vec![1.into(), "y".into()],
            vec![2.into(), "x".into()],
        ])
        .unwrap();
        QueryContext::new(Arc::new(catalog), SessionConfig::default())
    }

    fn fetch() -> Box<PlanNode> {
        Box::new(PlanNode::FetchTable {
            name: TableName::new("t"),
            alias: None,
        })
    }

    #[test]
    fn fetch_missing_table_is_planning_error() {
        let ctx = context();
        let plan = PlanNode::FetchTable {
            name: TableName::new("missing"),
            alias: None,
        };
        let err = plan.evaluate(&ctx).unwrap_err();
        assert!(err.is_planning(), "{err}");
    }

    #[test]
    fn select_then_sort() {
        let ctx = context();
        let plan = PlanNode::Sort {
            child: Box::new(PlanNode::SimpleSelect {
                child: fetch(),
                column: Variable::parse("t.b"),
                op: ComparisonOperator::Eq,
                value: Expression::lit("x"),
            }),
            keys: vec![SortKey::asc(0)],
        };
        let out = plan.evaluate(&ctx).unwrap();
        assert_eq!(
            vec![vec![ScalarValue::from(2), "x".into()], vec![3.into(), "x".into()]],
            collect_rows(out.as_ref()).unwrap()
        );
    }

    #[test]
    fn aliased_fetch_and_subset() {
        let ctx = context();
        let plan = PlanNode::Subset {
            child: Box::new(PlanNode::FetchTable {
                name: TableName::new("t"),
                alias: Some(TableName::new("u")),
            }),
            columns: vec![1],
            aliases: vec![Variable::parse("v.name")],
        };
        let out = plan.evaluate(&ctx).unwrap();
        assert_eq!(1, out.column_count());
        assert_eq!(Variable::parse("v.name"), out.table_info().columns()[0].variable());
    }

    #[test]
    fn cache_point_evaluates_once() {
        let ctx = context();
        let plan = PlanNode::CachePoint {
            id: 7,
            child: fetch(),
        };
        let first = plan.evaluate(&ctx).unwrap();
        let second = plan.evaluate(&ctx).unwrap();
        assert_eq!(first.table_id(), second.table_id());
    }

    #[test]
    fn group_counts() {
        let ctx = context();
        let plan = PlanNode::Group {
            child: fetch(),
            group_by: vec![Variable::parse("t.b")],
            group_max: None,
            exprs: vec![Expression::count_star()],
            names: vec![Variable::parse("FUNCTIONTABLE.0")],
        };
        let out = plan.evaluate(&ctx).unwrap();
        let rows = collect_rows(out.as_ref()).unwrap();
        assert_eq!(2, rows.len());
        assert_eq!(ScalarValue::from("x"), rows[0][1]);
        assert_eq!(ScalarValue::Int64(2), rows[0][2]);
        assert_eq!(ScalarValue::Int64(1), rows[1][2]);
    }

    #[test]
    fn union_of_same_table() {
        let ctx = context();
        let plan = PlanNode::Composite {
            left: fetch(),
            right: fetch(),
            function: CompositeFunction::Union,
            all: false,
        };
        assert_eq!(3, plan.evaluate(&ctx).unwrap().row_count());
    }

    #[test]
    fn missing_table_errors() {
        let ctx = context();
        let plan = PlanNode::FetchTable {
            name: TableName::new("missing"),
            alias: None,
        };
        assert!(plan.evaluate(&ctx).is_err());
    }
}
